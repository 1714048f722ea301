use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::models::{PlannedItem, Tag};

/// Telegram rejects message text past this many characters.
const TELEGRAM_LIMIT: usize = 4096;

/// Renders the digest: date-grouped sections under a dated header, split into
/// several messages at group boundaries when one would run over the transport
/// limit. An empty run composes the all-clear message instead.
pub fn compose(
    items: &[PlannedItem],
    now: DateTime<Utc>,
    timezone: Tz,
    horizon: Duration,
    degraded_sources: &[String],
) -> Vec<String> {
    let note = partial_note(degraded_sources);
    if items.is_empty() {
        let mut message = all_clear(now, timezone, horizon);
        if let Some(note) = note {
            message.push_str("\n\n");
            message.push_str(&note);
        }
        return vec![message];
    }

    let header = header(now, timezone);
    let blocks = sized_blocks(group_by_date(items, timezone), header.len());

    let mut messages = Vec::new();
    let mut current = header;
    for block in blocks {
        if current.len() + 2 + block.len() > TELEGRAM_LIMIT && !current.is_empty() {
            messages.push(std::mem::take(&mut current));
        }
        if current.is_empty() {
            current = block;
        } else {
            current.push_str("\n\n");
            current.push_str(&block);
        }
    }
    messages.push(current);

    if let Some(note) = note {
        match messages.last_mut() {
            Some(last) if last.len() + 2 + note.len() <= TELEGRAM_LIMIT => {
                last.push_str("\n\n");
                last.push_str(&note);
            }
            _ => messages.push(note),
        }
    }
    messages
}

fn header(now: DateTime<Utc>, timezone: Tz) -> String {
    format!(
        "📚 Daily Canvas Update\n📅 {}",
        now.with_timezone(&timezone).format("%A, %B %-d, %Y")
    )
}

fn all_clear(now: DateTime<Utc>, timezone: Tz, horizon: Duration) -> String {
    format!(
        "✅ *Daily Canvas Update*\n📅 {}\n\n\
         🎉 *No assignments due in the next {}!*\n\n\
         Enjoy your free time or get ahead on upcoming work! 💪",
        now.with_timezone(&timezone).format("%A, %B %-d, %Y"),
        horizon_days(horizon)
    )
}

fn partial_note(degraded_sources: &[String]) -> Option<String> {
    if degraded_sources.is_empty() {
        return None;
    }
    Some(format!(
        "⚠️ _Partial data: {} did not respond fully._",
        degraded_sources.join(", ")
    ))
}

fn horizon_days(horizon: Duration) -> String {
    let hours = horizon.num_hours();
    if hours % 24 == 0 {
        let days = hours / 24;
        if days == 1 {
            "1 day".to_string()
        } else {
            format!("{} days", days)
        }
    } else {
        format!("{:.1} days", hours as f64 / 24.0)
    }
}

/// Compact course label: text before any parenthetical, spaces removed.
/// "MGMT 311 (Winter 2026; 23330)" becomes "MGMT311".
pub fn course_code(course: &str) -> String {
    let head = course.split('(').next().unwrap_or(course).trim();
    head.chars().filter(|ch| !ch.is_whitespace()).collect()
}

/// Month-day section heading like "Jan 27th:".
fn date_heading(date: NaiveDate) -> String {
    let day = date.day();
    let suffix = match day {
        4..=20 | 24..=30 => "th",
        _ => match day % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    };
    format!("{} {}{}:", date.format("%b"), day, suffix)
}

struct Section {
    heading: String,
    items: Vec<String>,
}

fn group_by_date(items: &[PlannedItem], timezone: Tz) -> Vec<Section> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&PlannedItem>> = BTreeMap::new();
    for planned in items {
        let date = planned.item().due_at.with_timezone(&timezone).date_naive();
        by_date.entry(date).or_default().push(planned);
    }

    by_date
        .into_iter()
        .map(|(date, mut group)| {
            group.sort_by(|a, b| {
                a.item()
                    .due_at
                    .cmp(&b.item().due_at)
                    .then_with(|| {
                        b.item()
                            .points
                            .unwrap_or(0.0)
                            .total_cmp(&a.item().points.unwrap_or(0.0))
                    })
                    .then_with(|| a.item().title.cmp(&b.item().title))
            });
            Section {
                heading: date_heading(date),
                items: group.iter().map(|planned| render_item(planned)).collect(),
            }
        })
        .collect()
}

/// Cuts sections into blocks that each fit in a message even alongside the
/// header. A section too large on its own is split between items, repeating
/// its heading; a single item is never split.
fn sized_blocks(sections: Vec<Section>, header_len: usize) -> Vec<String> {
    let budget = TELEGRAM_LIMIT - header_len - 2;
    let mut blocks = Vec::new();
    for section in sections {
        let whole = format!("{}\n{}", section.heading, section.items.join("\n\n"));
        if whole.len() <= budget {
            blocks.push(whole);
            continue;
        }
        let mut chunk = section.heading.clone();
        for item in &section.items {
            if chunk != section.heading && chunk.len() + 2 + item.len() > budget {
                blocks.push(std::mem::replace(&mut chunk, section.heading.clone()));
            }
            if chunk == section.heading {
                chunk.push('\n');
            } else {
                chunk.push_str("\n\n");
            }
            chunk.push_str(item);
        }
        if chunk != section.heading {
            blocks.push(chunk);
        }
    }
    blocks
}

fn render_item(planned: &PlannedItem) -> String {
    let item = planned.item();
    let mut lines = vec![format!(
        "{} *{}* ({})",
        planned.tag().symbol(),
        item.title,
        course_code(&item.course)
    )];

    let mut due_line = format!("   {}", planned.classified.countdown);
    if let Some(points) = item.points {
        due_line.push_str(&format!(" | {} pts", points));
    }
    lines.push(due_line);

    lines.push(format!("   ⏱ Est: {}", planned.plan.time_estimate));
    for (idx, step) in planned.plan.steps.iter().enumerate() {
        lines.push(format!("   {}. {}", idx + 1, step));
    }
    if !planned.plan.tips.is_empty() {
        lines.push(format!("   💡 {}", planned.plan.tips.join(" | ")));
    }
    if planned.tag() == Tag::Exam {
        lines.push("   📖 _Study guide on the way - check the follow-up message_".to_string());
    }
    if item.url != "#" {
        lines.push(format!("   [Open in Canvas]({})", item.url));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassifiedItem, MergeKey, NormalizedItem, Plan};
    use chrono::TimeZone;

    const PACIFIC: Tz = chrono_tz::America::Los_Angeles;

    fn now() -> DateTime<Utc> {
        // 2026-01-27 08:00 PST.
        Utc.with_ymd_and_hms(2026, 1, 27, 16, 0, 0).unwrap()
    }

    fn planned(title: &str, due: DateTime<Utc>, points: Option<f64>, tag: Tag) -> PlannedItem {
        PlannedItem {
            classified: ClassifiedItem {
                item: NormalizedItem {
                    key: MergeKey {
                        course: "acct 382".to_string(),
                        title: title.to_lowercase(),
                        due_minute: due.timestamp().div_euclid(60),
                    },
                    title: title.to_string(),
                    course: "ACCT 382 (Winter 2026; 23330)".to_string(),
                    due_at: due,
                    points,
                    description: None,
                    account: "State U".to_string(),
                    url: "https://canvas.example.edu/courses/1/assignments/9".to_string(),
                },
                tag,
                countdown: "Due in 5 hours".to_string(),
            },
            plan: Plan {
                time_estimate: "2 hours".to_string(),
                steps: vec!["Review notes".to_string(), "Do practice set".to_string()],
                tips: vec!["Start early".to_string()],
            },
        }
    }

    #[test]
    fn course_codes_compact() {
        assert_eq!(course_code("MGMT 311 (Winter 2026; 23330)"), "MGMT311");
        assert_eq!(course_code("ACCT 382"), "ACCT382");
        assert_eq!(course_code("Biology"), "Biology");
    }

    #[test]
    fn date_headings_pick_ordinal_suffixes() {
        let date = |d| NaiveDate::from_ymd_opt(2026, 1, d).unwrap();
        assert_eq!(date_heading(date(1)), "Jan 1st:");
        assert_eq!(date_heading(date(2)), "Jan 2nd:");
        assert_eq!(date_heading(date(3)), "Jan 3rd:");
        assert_eq!(date_heading(date(11)), "Jan 11th:");
        assert_eq!(date_heading(date(21)), "Jan 21st:");
        assert_eq!(date_heading(date(22)), "Jan 22nd:");
        assert_eq!(date_heading(date(27)), "Jan 27th:");
        assert_eq!(date_heading(date(31)), "Jan 31st:");
    }

    #[test]
    fn digest_groups_by_date_and_orders_within_groups() {
        let tue_night = Utc.with_ymd_and_hms(2026, 1, 28, 7, 59, 0).unwrap();
        let wed_noon = Utc.with_ymd_and_hms(2026, 1, 28, 20, 0, 0).unwrap();
        let items = vec![
            planned("Later quiz", wed_noon, Some(10.0), Tag::Regular),
            planned("Small quiz", tue_night, Some(10.0), Tag::DueToday),
            planned("Big exam", tue_night, Some(100.0), Tag::Exam),
        ];

        let messages = compose(&items, now(), PACIFIC, Duration::hours(84), &[]);
        assert_eq!(messages.len(), 1);
        let text = &messages[0];

        assert!(text.starts_with("📚 Daily Canvas Update\n📅 Tuesday, January 27, 2026"));
        let jan27 = text.find("Jan 27th:").unwrap();
        let jan28 = text.find("Jan 28th:").unwrap();
        assert!(jan27 < jan28);

        // Same due time: higher points first.
        let exam = text.find("Big exam").unwrap();
        let quiz = text.find("Small quiz").unwrap();
        assert!(jan27 < exam && exam < quiz && quiz < jan28);
        assert!(text.find("Later quiz").unwrap() > jan28);
    }

    #[test]
    fn exam_items_carry_the_study_guide_line() {
        let due = Utc.with_ymd_and_hms(2026, 1, 28, 7, 59, 0).unwrap();
        let exam = render_item(&planned("Midterm", due, Some(100.0), Tag::Exam));
        assert!(exam.contains("Study guide on the way"));
        assert!(exam.contains("🚨 *Midterm* (ACCT382)"));
        assert!(exam.contains("Due in 5 hours | 100 pts"));
        assert!(exam.contains("1. Review notes"));
        assert!(exam.contains("[Open in Canvas]"));

        let regular = render_item(&planned("Quiz", due, Some(10.0), Tag::Regular));
        assert!(!regular.contains("Study guide"));
    }

    #[test]
    fn long_digests_split_at_group_boundaries() {
        let tue = Utc.with_ymd_and_hms(2026, 1, 28, 7, 59, 0).unwrap();
        let wed = Utc.with_ymd_and_hms(2026, 1, 29, 7, 59, 0).unwrap();
        let mut items = Vec::new();
        for idx in 0..12 {
            let due = if idx % 2 == 0 { tue } else { wed };
            let mut item = planned(&format!("Assignment number {:02}", idx), due, Some(10.0), Tag::Regular);
            item.plan.steps = vec!["A step that takes up a fair amount of message room".to_string(); 4];
            items.push(item);
        }

        let messages = compose(&items, now(), PACIFIC, Duration::hours(84), &[]);
        assert!(messages.len() >= 2);
        for message in &messages {
            assert!(message.len() <= TELEGRAM_LIMIT);
        }
        // Continuation messages pick up at a date heading, never mid-item.
        for message in &messages[1..] {
            assert!(message.starts_with("Jan 2"), "got: {}", &message[..20]);
        }
        // Every item survives the split intact.
        let total: usize = messages
            .iter()
            .map(|message| message.matches("Assignment number").count())
            .sum();
        assert_eq!(total, 12);
        let estimates: usize = messages
            .iter()
            .map(|message| message.matches("Est: 2 hours").count())
            .sum();
        assert_eq!(estimates, 12);
    }

    #[test]
    fn oversized_single_group_splits_between_items() {
        let tue = Utc.with_ymd_and_hms(2026, 1, 28, 7, 59, 0).unwrap();
        let mut items = Vec::new();
        for idx in 0..10 {
            let mut item = planned(&format!("Essay draft {:02}", idx), tue, Some(10.0), Tag::Regular);
            item.plan.steps = vec!["Write a section of roughly five hundred words covering the assigned topic in detail".to_string(); 8];
            items.push(item);
        }

        let messages = compose(&items, now(), PACIFIC, Duration::hours(84), &[]);
        assert!(messages.len() >= 2);
        for (idx, message) in messages.iter().enumerate() {
            assert!(message.len() <= TELEGRAM_LIMIT);
            assert!(message.contains("Jan 27th:"), "message {} lost its heading", idx);
        }
        let total: usize = messages
            .iter()
            .map(|message| message.matches("Essay draft").count())
            .sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn empty_run_composes_all_clear() {
        let messages = compose(&[], now(), PACIFIC, Duration::hours(84), &[]);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("No assignments due in the next 3.5 days!"));

        let whole_days = compose(&[], now(), PACIFIC, Duration::hours(72), &[]);
        assert!(whole_days[0].contains("next 3 days!"));
    }

    #[test]
    fn degraded_sources_add_a_partial_data_note() {
        let degraded = vec!["State U/planner".to_string()];
        let empty = compose(&[], now(), PACIFIC, Duration::hours(84), &degraded);
        assert!(empty[0].contains("Partial data: State U/planner"));

        let due = Utc.with_ymd_and_hms(2026, 1, 28, 7, 59, 0).unwrap();
        let items = vec![planned("Quiz", due, Some(10.0), Tag::Regular)];
        let messages = compose(&items, now(), PACIFIC, Duration::hours(84), &degraded);
        assert!(messages.last().unwrap().contains("Partial data"));
    }
}
