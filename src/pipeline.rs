//! One scheduled run end to end: fetch, merge, classify, plan, compose,
//! dispatch, then the study-kit follow-up.

use chrono::{DateTime, Utc};

use crate::canvas;
use crate::classify;
use crate::compose;
use crate::config::Config;
use crate::error::PlannerError;
use crate::merge;
use crate::models::{ClassifiedItem, Tag};
use crate::openai::OpenAiClient;
use crate::plan;
use crate::study_kit::{self, ExamSource, StudyKitTask};
use crate::telegram::TelegramClient;

/// Tallies from one completed run, logged at exit.
#[derive(Debug)]
pub struct RunReport {
    pub items: usize,
    pub messages: usize,
    pub delivered: usize,
    pub study_kits: usize,
}

/// Runs the daily digest. `now` is injected so a run is reproducible.
///
/// Partial failures (one source down, one generation failed) degrade the
/// output; only zero sources or zero delivered messages fail the run.
pub async fn run(config: &Config, now: DateTime<Utc>) -> anyhow::Result<RunReport> {
    let today = now.with_timezone(&config.timezone).date_naive();
    let (batches, warnings) =
        canvas::fetch_all(&config.accounts, today, config.fetch_max_pages).await;
    if batches.is_empty() {
        let reasons = warnings
            .iter()
            .map(|warning| warning.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        anyhow::bail!("no Canvas source responded: {}", reasons);
    }
    let degraded: Vec<String> = warnings
        .iter()
        .filter_map(|warning| match warning {
            PlannerError::SourceUnavailable { source, .. }
            | PlannerError::Truncated { source, .. } => Some(source.clone()),
            _ => None,
        })
        .collect();

    let raw: Vec<_> = batches.into_iter().flat_map(|batch| batch.items).collect();
    let merged = merge::dedupe(raw, config.merge_tolerance_secs);
    let upcoming = merge::window_filter(merged, now, config.horizon);
    let classified = classify::classify(upcoming, &config.rules, now, config.timezone);
    tracing::info!(
        items = classified.len(),
        degraded = degraded.len(),
        "run input assembled"
    );

    let openai = OpenAiClient::new(&config.openai);
    let kits = spawn_study_kits(config, &openai, &classified);

    let planned =
        plan::generate_plans(&openai, classified, config.timezone, config.plan_concurrency).await;
    let messages = compose::compose(&planned, now, config.timezone, config.horizon, &degraded);

    let telegram = TelegramClient::new(&config.telegram);
    let mut delivered = 0usize;
    let mut last_error = None;
    for (part, message) in messages.iter().enumerate() {
        match telegram.send_message(message).await {
            Ok(()) => delivered += 1,
            Err(err) => {
                tracing::error!(part = part + 1, error = %err, "digest message not delivered");
                last_error = Some(err);
            }
        }
    }
    if delivered == 0 {
        let reason = last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "nothing to send".to_string());
        anyhow::bail!("no digest message delivered: {}", reason);
    }
    tracing::info!(delivered, total = messages.len(), "digest dispatched");

    let study_kits = kits.len();
    if !kits.is_empty() {
        let outcomes = study_kit::collect_outcomes(kits, config.study_kit_timeout).await;
        if let Some(message) = study_kit::follow_up_message(&outcomes) {
            if let Err(err) = telegram.send_message(&message).await {
                tracing::error!(error = %err, "study guide follow-up not delivered");
            }
        }
        for outcome in &outcomes {
            if let Ok(path) = &outcome.result {
                if let Err(err) = telegram
                    .send_document(path, &study_kit::document_caption(&outcome.exam_title))
                    .await
                {
                    tracing::error!(
                        exam = %outcome.exam_title,
                        error = %err,
                        "study guide upload failed"
                    );
                }
            }
        }
    }

    Ok(RunReport {
        items: planned.len(),
        messages: messages.len(),
        delivered,
        study_kits,
    })
}

/// One background generation per exam item, started before plan generation so
/// the heavy call overlaps the rest of the run.
fn spawn_study_kits(
    config: &Config,
    openai: &OpenAiClient,
    classified: &[ClassifiedItem],
) -> Vec<StudyKitTask> {
    let mut kits = Vec::new();
    for entry in classified {
        if entry.tag != Tag::Exam {
            continue;
        }
        let Some(account) = config
            .accounts
            .iter()
            .find(|account| account.name == entry.item.account)
        else {
            tracing::warn!(
                exam = %entry.item.title,
                account = %entry.item.account,
                "no account on record for exam item"
            );
            continue;
        };
        kits.push(study_kit::spawn(
            account.clone(),
            openai.clone(),
            ExamSource {
                title: entry.item.title.clone(),
                course: entry.item.course.clone(),
                due_at: Some(entry.item.due_at),
                points: entry.item.points,
                description: entry.item.description.clone(),
            },
            config.study_kit_dir.clone(),
            config.fetch_max_pages,
            config.timezone,
        ));
    }
    kits
}
