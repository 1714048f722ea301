use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::{PlannerError, Result};
use crate::models::{ClassifiedItem, Plan, PlannedItem, Tag};
use crate::openai::OpenAiClient;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

const PLAN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
const PLAN_MAX_TOKENS: u32 = 300;
const DESCRIPTION_CAP: usize = 500;

const SYSTEM_PROMPT: &str =
    "You are a helpful academic assistant. Respond only with valid JSON.";

#[derive(Debug, Deserialize)]
struct PlanResponse {
    time_estimate: String,
    #[serde(default)]
    steps: Vec<String>,
    #[serde(default)]
    tips: Vec<String>,
}

/// Generates an action plan per item with bounded concurrency, keeping the
/// input order in the output. An item whose generation fails or times out
/// gets the deterministic fallback instead of sinking the run.
pub async fn generate_plans(
    client: &OpenAiClient,
    items: Vec<ClassifiedItem>,
    timezone: Tz,
    concurrency: usize,
) -> Vec<PlannedItem> {
    let mut planned: Vec<(usize, PlannedItem)> = futures::stream::iter(
        items.into_iter().enumerate().map(|(idx, classified)| {
            let client = client.clone();
            async move {
                let plan = match plan_for(&client, &classified, timezone).await {
                    Ok(plan) => plan,
                    Err(err) => {
                        tracing::warn!(error = %err, "using fallback plan");
                        fallback_plan(classified.item.points)
                    }
                };
                (idx, PlannedItem { classified, plan })
            }
        }),
    )
    .buffer_unordered(concurrency.max(1))
    .collect()
    .await;

    planned.sort_by_key(|(idx, _)| *idx);
    planned.into_iter().map(|(_, item)| item).collect()
}

async fn plan_for(client: &OpenAiClient, classified: &ClassifiedItem, timezone: Tz) -> Result<Plan> {
    let item = &classified.item;
    let prompt = build_prompt(
        &item.title,
        &item.course,
        item.due_at,
        item.points,
        classified.tag,
        item.description.as_deref(),
        timezone,
    );

    let generated = tokio::time::timeout(
        PLAN_TIMEOUT,
        client.chat_json::<PlanResponse>(SYSTEM_PROMPT, &prompt, PLAN_MAX_TOKENS),
    )
    .await;

    match generated {
        Ok(Ok(response)) => Ok(Plan {
            time_estimate: response.time_estimate,
            steps: response.steps,
            tips: response.tips,
        }),
        Ok(Err(err)) => Err(PlannerError::GenerationFailed {
            subject: item.title.clone(),
            reason: format!("{:#}", err),
        }),
        Err(_) => Err(PlannerError::GenerationFailed {
            subject: item.title.clone(),
            reason: format!("timed out after {}s", PLAN_TIMEOUT.as_secs()),
        }),
    }
}

fn build_prompt(
    title: &str,
    course: &str,
    due_at: DateTime<Utc>,
    points: Option<f64>,
    tag: Tag,
    description: Option<&str>,
    timezone: Tz,
) -> String {
    let due = due_at
        .with_timezone(&timezone)
        .format("%A, %B %-d at %-I:%M %p");
    let points = points
        .map(|p| format!("{}", p))
        .unwrap_or_else(|| "N/A".to_string());
    let description = description
        .map(|raw| truncate(&strip_html(raw), DESCRIPTION_CAP))
        .unwrap_or_default();

    format!(
        "Create a quick action plan for this assignment:\n\
         Assignment: {}\n\
         Course: {}\n\
         Due: {}\n\
         Points: {}\n\
         Priority: {}\n\
         Description: {}\n\n\
         Provide a JSON response with:\n\
         - \"time_estimate\": realistic time needed (e.g., \"2-3 hours\")\n\
         - \"steps\": array of 3-4 specific action steps\n\
         - \"tips\": array of 1-2 quick tips for success",
        title, course, due, points, tag.label(), description
    )
}

/// Deterministic stand-in when generation is unavailable. The estimate
/// scales with the point value, floored at half an hour.
pub fn fallback_plan(points: Option<f64>) -> Plan {
    let hours = (points.unwrap_or(0.0) / 100.0 * 3.0).max(0.5);
    Plan {
        time_estimate: format!("{:.1} hours", hours),
        steps: vec![
            "Review assignment requirements".to_string(),
            "Complete the work".to_string(),
            "Submit before deadline".to_string(),
        ],
        tips: vec!["Start early to avoid stress".to_string()],
    }
}

fn strip_html(raw: &str) -> String {
    let text = TAG_RE.replace_all(raw, " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str, cap: usize) -> String {
    text.chars().take(cap).collect()
}
