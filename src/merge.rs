use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::models::{EndpointKind, MergeKey, NormalizedItem, RawItem};

/// Lowercased, whitespace-collapsed form used for identity comparisons.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Collapses duplicates across endpoints and accounts. Items sharing a
/// normalized (course, title) merge when their due timestamps fall within
/// `tolerance_secs` of each other; the assignments endpoint wins field
/// conflicts, with gaps filled from the rest of the group.
pub fn dedupe(raw: Vec<RawItem>, tolerance_secs: i64) -> Vec<NormalizedItem> {
    let mut clusters: HashMap<(String, String), Vec<RawItem>> = HashMap::new();
    for item in raw {
        let key = (normalize_name(&item.course), normalize_name(&item.title));
        clusters.entry(key).or_default().push(item);
    }

    let mut merged = Vec::new();
    for ((course_norm, title_norm), mut items) in clusters {
        items.sort_by_key(|item| item.due_at);

        let mut group: Vec<RawItem> = Vec::new();
        let mut group_start: Option<DateTime<Utc>> = None;
        for item in items {
            match group_start {
                Some(start) if (item.due_at - start).num_seconds() <= tolerance_secs => {
                    group.push(item);
                }
                _ => {
                    if !group.is_empty() {
                        merged.push(merge_group(
                            std::mem::take(&mut group),
                            &course_norm,
                            &title_norm,
                        ));
                    }
                    group_start = Some(item.due_at);
                    group.push(item);
                }
            }
        }
        if !group.is_empty() {
            merged.push(merge_group(group, &course_norm, &title_norm));
        }
    }

    merged.sort_by(|a, b| {
        a.due_at
            .cmp(&b.due_at)
            .then_with(|| a.key.course.cmp(&b.key.course))
            .then_with(|| a.key.title.cmp(&b.key.title))
    });
    merged
}

fn merge_group(group: Vec<RawItem>, course_norm: &str, title_norm: &str) -> NormalizedItem {
    let winner_idx = group
        .iter()
        .position(|item| item.endpoint == EndpointKind::Assignments)
        .unwrap_or(0);

    let mut points = group[winner_idx].points;
    let mut description = group[winner_idx].description.clone();
    let mut url = group[winner_idx].url.clone();
    for (idx, item) in group.iter().enumerate() {
        if idx == winner_idx {
            continue;
        }
        if points.is_none() {
            points = item.points;
        }
        if description.is_none() {
            description = item.description.clone();
        }
        if url == "#" && item.url != "#" {
            url = item.url.clone();
        }
    }

    let winner = &group[winner_idx];
    NormalizedItem {
        key: MergeKey {
            course: course_norm.to_string(),
            title: title_norm.to_string(),
            due_minute: winner.due_at.timestamp().div_euclid(60),
        },
        title: winner.title.clone(),
        course: winner.course.clone(),
        due_at: winner.due_at,
        points,
        description,
        account: winner.account.clone(),
        url,
    }
}

/// Keeps items due within [now, now + horizon]. Past-due items are dropped;
/// both bounds are inclusive, so something due this instant or exactly at the
/// cutoff is still reported.
pub fn window_filter(
    items: Vec<NormalizedItem>,
    now: DateTime<Utc>,
    horizon: Duration,
) -> Vec<NormalizedItem> {
    let cutoff = now + horizon;
    items
        .into_iter()
        .filter(|item| item.due_at >= now && item.due_at <= cutoff)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(
        title: &str,
        course: &str,
        due: DateTime<Utc>,
        endpoint: EndpointKind,
        points: Option<f64>,
    ) -> RawItem {
        RawItem {
            id: format!("{}-{}", endpoint.as_str(), title),
            title: title.to_string(),
            course: course.to_string(),
            due_at: due,
            points,
            description: None,
            endpoint,
            account: "State U".to_string(),
            url: "#".to_string(),
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 27, h, m, s).unwrap()
    }

    #[test]
    fn duplicates_across_endpoints_collapse_to_one() {
        let due = at(7, 59, 0);
        let items = vec![
            raw("Midterm  Exam", "ACCT 382", due, EndpointKind::Planner, None),
            raw(
                "midterm exam",
                "acct 382",
                due + Duration::seconds(30),
                EndpointKind::Assignments,
                Some(100.0),
            ),
        ];

        let merged = dedupe(items, 60);
        assert_eq!(merged.len(), 1);
        let item = &merged[0];
        // Assignments endpoint supplies the canonical fields.
        assert_eq!(item.title, "midterm exam");
        assert_eq!(item.points, Some(100.0));
        assert_eq!(item.due_at, due + Duration::seconds(30));
        assert_eq!(item.key.course, "acct 382");
        assert_eq!(item.key.title, "midterm exam");
    }

    #[test]
    fn assignments_endpoint_wins_conflicts_and_gaps_fill() {
        let due = at(7, 59, 0);
        let mut planner = raw("Quiz 3", "MGMT 311", due, EndpointKind::Planner, Some(10.0));
        planner.description = Some("Covers chapters 4-6".to_string());
        planner.url = "https://canvas.example.edu/quiz3".to_string();
        let assignments = raw("Quiz 3", "MGMT 311", due, EndpointKind::Assignments, Some(25.0));

        let merged = dedupe(vec![planner, assignments], 60);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].points, Some(25.0));
        assert_eq!(
            merged[0].description.as_deref(),
            Some("Covers chapters 4-6")
        );
        assert_eq!(merged[0].url, "https://canvas.example.edu/quiz3");
    }

    #[test]
    fn tolerance_is_inclusive_and_bounds_the_cluster() {
        let due = at(7, 0, 0);
        let within = dedupe(
            vec![
                raw("HW 1", "CS 101", due, EndpointKind::Planner, None),
                raw(
                    "HW 1",
                    "CS 101",
                    due + Duration::seconds(60),
                    EndpointKind::Assignments,
                    None,
                ),
            ],
            60,
        );
        assert_eq!(within.len(), 1);

        let beyond = dedupe(
            vec![
                raw("HW 1", "CS 101", due, EndpointKind::Planner, None),
                raw(
                    "HW 1",
                    "CS 101",
                    due + Duration::seconds(61),
                    EndpointKind::Assignments,
                    None,
                ),
            ],
            60,
        );
        assert_eq!(beyond.len(), 2);
    }

    #[test]
    fn distinct_titles_stay_separate() {
        let due = at(7, 59, 0);
        let merged = dedupe(
            vec![
                raw("Quiz 3", "MGMT 311", due, EndpointKind::Planner, None),
                raw("Quiz 4", "MGMT 311", due, EndpointKind::Planner, None),
            ],
            60,
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn output_is_sorted_by_due_then_identity() {
        let merged = dedupe(
            vec![
                raw("Zeta", "CS 101", at(9, 0, 0), EndpointKind::Planner, None),
                raw("Alpha", "CS 101", at(8, 0, 0), EndpointKind::Planner, None),
                raw("Beta", "CS 101", at(8, 0, 0), EndpointKind::Planner, None),
            ],
            60,
        );
        let titles: Vec<&str> = merged.iter().map(|item| item.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "Beta", "Zeta"]);
    }

    #[test]
    fn window_keeps_both_bounds_and_drops_past_due() {
        let now = at(8, 0, 0);
        let horizon = Duration::hours(84);
        let items = dedupe(
            vec![
                raw("Past", "CS 101", now - Duration::seconds(1), EndpointKind::Planner, None),
                raw("Due now", "CS 101", now, EndpointKind::Planner, None),
                raw(
                    "At cutoff",
                    "CS 101",
                    now + horizon,
                    EndpointKind::Planner,
                    None,
                ),
                raw(
                    "Past cutoff",
                    "CS 101",
                    now + horizon + Duration::seconds(1),
                    EndpointKind::Planner,
                    None,
                ),
            ],
            60,
        );

        let kept = window_filter(items, now, horizon);
        let titles: Vec<&str> = kept.iter().map(|item| item.title.as_str()).collect();
        assert_eq!(titles, vec!["Due now", "At cutoff"]);
    }
}
