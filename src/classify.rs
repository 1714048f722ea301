use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::models::{ClassifiedItem, NormalizedItem, Tag};

/// Tunable inputs of the tag rules. Everything here is plain data so the
/// thresholds can come from the environment without touching the rules.
#[derive(Debug, Clone)]
pub struct ClassifierRules {
    /// Title substrings that mark an item as a major test.
    pub exam_keywords: Vec<String>,
    /// A point value at or above this qualifies on its own.
    pub exam_point_threshold: f64,
    /// Description substrings betraying a proctored test.
    pub proctor_markers: Vec<String>,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            exam_keywords: vec![
                "midterm".to_string(),
                "final".to_string(),
                "exam".to_string(),
            ],
            exam_point_threshold: 50.0,
            proctor_markers: vec!["respondus".to_string(), "lockdown browser".to_string()],
        }
    }
}

struct RuleCtx<'a> {
    item: &'a NormalizedItem,
    rules: &'a ClassifierRules,
    today: NaiveDate,
    due_date: NaiveDate,
}

/// Ordered rule table; the first matching row assigns the tag. The final
/// catch-all keeps the table total.
const RULE_TABLE: &[(Tag, fn(&RuleCtx) -> bool)] = &[
    (Tag::Exam, |ctx| is_exam(ctx.item, ctx.rules)),
    (Tag::DueToday, |ctx| ctx.due_date == ctx.today),
    (Tag::DueTomorrow, |ctx| {
        ctx.today
            .succ_opt()
            .map_or(false, |tomorrow| ctx.due_date == tomorrow)
    }),
    (Tag::Regular, |_| true),
];

pub fn classify(
    items: Vec<NormalizedItem>,
    rules: &ClassifierRules,
    now: DateTime<Utc>,
    timezone: Tz,
) -> Vec<ClassifiedItem> {
    items
        .into_iter()
        .map(|item| {
            let tag = tag_for(&item, rules, now, timezone);
            let countdown = countdown(item.due_at, now, timezone);
            ClassifiedItem {
                item,
                tag,
                countdown,
            }
        })
        .collect()
}

fn tag_for(item: &NormalizedItem, rules: &ClassifierRules, now: DateTime<Utc>, timezone: Tz) -> Tag {
    let ctx = RuleCtx {
        item,
        rules,
        today: now.with_timezone(&timezone).date_naive(),
        due_date: item.due_at.with_timezone(&timezone).date_naive(),
    };
    for (tag, applies) in RULE_TABLE {
        if applies(&ctx) {
            return *tag;
        }
    }
    Tag::Regular
}

fn is_exam(item: &NormalizedItem, rules: &ClassifierRules) -> bool {
    let title = item.title.to_lowercase();
    if rules.exam_keywords.iter().any(|kw| title.contains(kw)) {
        return true;
    }
    if item
        .points
        .is_some_and(|points| points >= rules.exam_point_threshold)
    {
        return true;
    }
    if let Some(description) = &item.description {
        let description = description.to_lowercase();
        if rules
            .proctor_markers
            .iter()
            .any(|marker| description.contains(marker))
        {
            return true;
        }
    }
    false
}

/// Human-readable time-to-due line. Under a day it counts hours (or minutes
/// under an hour); past that it names the day and the local clock time.
pub fn countdown(due_at: DateTime<Utc>, now: DateTime<Utc>, timezone: Tz) -> String {
    let delta = due_at - now;
    let due_local = due_at.with_timezone(&timezone);
    let now_local = now.with_timezone(&timezone);

    if delta.num_hours() < 1 {
        return format!("Due in {}", plural(delta.num_minutes().max(1), "minute"));
    }
    if delta.num_hours() < 24 {
        return format!("Due in {}", plural(delta.num_hours(), "hour"));
    }

    let clock = due_local.format("%-I:%M %p");
    let tomorrow = now_local.date_naive().succ_opt();
    if tomorrow == Some(due_local.date_naive()) {
        format!("Due tomorrow at {}", clock)
    } else {
        format!("Due in {} at {}", plural(delta.num_days(), "day"), clock)
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{} {}", n, unit)
    } else {
        format!("{} {}s", n, unit)
    }
}
