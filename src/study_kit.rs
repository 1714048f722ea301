use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::task::JoinHandle;

use crate::canvas::{CanvasClient, Module};
use crate::config::{Account, Config};
use crate::models::StudyKitOutcome;
use crate::openai::OpenAiClient;
use crate::telegram::TelegramClient;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static UNSAFE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").unwrap());
static DASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]+").unwrap());
static CHAPTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"ch[apter]*\s*([\d\s,]+)").unwrap());

/// Module names that are never exam material.
const EXCLUDED_MODULES: &[&str] = &[
    "course essentials",
    "microsoft teams",
    "library research",
    "library guide",
    "instruction guide",
    "getting started",
    "syllabus",
    "resources",
    "how to",
    "orientation",
];
/// Without an unlock date, only modules that look like course content count.
const CONTENT_MODULE_HINTS: &[&str] = &["week", "chapter", "ch ", "module"];

const MAX_CONTENT_ITEMS: usize = 25;
const ITEM_CHAR_CAP: usize = 2000;
const PROMPT_CHAR_CAP: usize = 12_000;
const GUIDE_MAX_TOKENS: u32 = 8000;

const SEARCH_PREFIXES: &[&str] = &[
    "create study guide for ",
    "help me study for ",
    "study materials for ",
    "guide for ",
];

const SYSTEM_PROMPT: &str =
    "You are an expert tutor creating comprehensive study materials with multiple choice questions.";

/// Everything the generator needs to know about the exam itself.
#[derive(Debug, Clone)]
pub struct ExamSource {
    pub title: String,
    pub course: String,
    pub due_at: Option<DateTime<Utc>>,
    pub points: Option<f64>,
    pub description: Option<String>,
}

/// An in-flight study-kit generation, awaited after the primary digest.
pub struct StudyKitTask {
    pub exam_title: String,
    pub course: String,
    handle: JoinHandle<StudyKitOutcome>,
}

struct ContentPiece {
    kind: String,
    module: String,
    title: String,
    body: String,
}

/// Starts generation in the background so the digest dispatch is never held
/// up by it.
pub fn spawn(
    account: Account,
    openai: OpenAiClient,
    exam: ExamSource,
    dir: PathBuf,
    max_pages: u32,
    timezone: Tz,
) -> StudyKitTask {
    let exam_title = exam.title.clone();
    let course = exam.course.clone();
    let handle = tokio::spawn(async move {
        let result = generate(&account, &openai, &exam, &dir, max_pages, timezone)
            .await
            .map_err(|err| format!("{:#}", err));
        if let Err(reason) = &result {
            tracing::warn!(exam = %exam.title, error = %reason, "study kit generation failed");
        }
        StudyKitOutcome {
            exam_title: exam.title,
            course: exam.course,
            result,
        }
    });
    StudyKitTask {
        exam_title,
        course,
        handle,
    }
}

/// Awaits the spawned tasks, all under one shared deadline. A task that
/// misses the deadline is abandoned and reported as timed out.
pub async fn collect_outcomes(
    tasks: Vec<StudyKitTask>,
    bound: std::time::Duration,
) -> Vec<StudyKitOutcome> {
    let deadline = tokio::time::Instant::now() + bound;
    let mut outcomes = Vec::new();
    for task in tasks {
        let outcome = match tokio::time::timeout_at(deadline, task.handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => StudyKitOutcome {
                exam_title: task.exam_title,
                course: task.course,
                result: Err(format!("task failed: {}", join_err)),
            },
            Err(_) => StudyKitOutcome {
                exam_title: task.exam_title,
                course: task.course,
                result: Err("timed out; generation abandoned".to_string()),
            },
        };
        outcomes.push(outcome);
    }
    outcomes
}

async fn generate(
    account: &Account,
    openai: &OpenAiClient,
    exam: &ExamSource,
    dir: &Path,
    max_pages: u32,
    timezone: Tz,
) -> anyhow::Result<PathBuf> {
    let client = CanvasClient::new(account);
    let (courses, _) = client
        .active_courses(max_pages)
        .await
        .context("listing courses failed")?;
    let course = courses
        .iter()
        .find(|course| course.name == exam.course)
        .ok_or_else(|| anyhow!("course {:?} not found in account {}", exam.course, account.name))?;

    build_guide(&client, openai, course.id, exam, dir, max_pages, timezone).await
}

async fn build_guide(
    client: &CanvasClient,
    openai: &OpenAiClient,
    course_id: i64,
    exam: &ExamSource,
    dir: &Path,
    max_pages: u32,
    timezone: Tz,
) -> anyhow::Result<PathBuf> {
    let modules = client
        .course_modules(course_id, max_pages)
        .await
        .context("listing modules failed")?;
    let relevant = relevant_modules(modules, exam.due_at);
    tracing::info!(exam = %exam.title, modules = relevant.len(), "assembling exam material");

    let pieces = collect_content(client, course_id, &relevant).await;
    if pieces.is_empty() {
        anyhow::bail!("no course material published before the exam");
    }
    tracing::info!(exam = %exam.title, items = pieces.len(), "generating study guide");

    let prompt = build_guide_prompt(&exam.title, &pieces);
    let analysis = openai
        .chat_text(SYSTEM_PROMPT, &prompt, GUIDE_MAX_TOKENS)
        .await
        .context("guide generation failed")?;

    let text = render_guide(exam, &pieces, &analysis, Utc::now(), timezone);
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {} failed", dir.display()))?;
    let path = dir.join(file_name(&exam.title));
    tokio::fs::write(&path, text)
        .await
        .with_context(|| format!("writing {} failed", path.display()))?;
    tracing::info!(path = %path.display(), "study guide saved");
    Ok(path)
}

/// Keeps modules unlocked before the exam; modules with no unlock date pass
/// only when their name marks them as weekly or chapter content.
fn relevant_modules(modules: Vec<Module>, exam_due: Option<DateTime<Utc>>) -> Vec<Module> {
    modules
        .into_iter()
        .filter(|module| {
            let name = module.name.as_deref().unwrap_or("").to_lowercase();
            if EXCLUDED_MODULES.iter().any(|kw| name.contains(kw)) {
                return false;
            }
            match (module.unlock_at, exam_due) {
                (Some(unlock), Some(due)) => unlock < due,
                (Some(_), None) => true,
                (None, _) => CONTENT_MODULE_HINTS.iter().any(|hint| name.contains(hint)),
            }
        })
        .collect()
}

async fn collect_content(
    client: &CanvasClient,
    course_id: i64,
    modules: &[Module],
) -> Vec<ContentPiece> {
    let mut pieces = Vec::new();
    for module in modules {
        let module_name = module.name.clone().unwrap_or_else(|| "Module".to_string());
        for item in &module.items {
            if pieces.len() >= MAX_CONTENT_ITEMS {
                return pieces;
            }
            let kind = item.kind.as_deref().unwrap_or("");
            let fetched = match kind {
                "Page" => match &item.page_url {
                    Some(slug) => client.page_content(course_id, slug).await,
                    None => Ok(None),
                },
                "Assignment" => match item.content_id {
                    Some(id) => client.assignment_content(course_id, id).await,
                    None => Ok(None),
                },
                "Discussion" => match item.content_id {
                    Some(id) => client.discussion_content(course_id, id).await,
                    None => Ok(None),
                },
                _ => Ok(None),
            };
            match fetched {
                Ok(Some((title, body))) => {
                    let body = clean_html(&body);
                    if !body.is_empty() {
                        pieces.push(ContentPiece {
                            kind: kind.to_string(),
                            module: module_name.clone(),
                            title,
                            body,
                        });
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        module = %module_name,
                        item = item.title.as_deref().unwrap_or("?"),
                        error = %format!("{:#}", err),
                        "skipping module item"
                    );
                }
            }
        }
    }
    pieces
}

fn build_guide_prompt(exam_title: &str, pieces: &[ContentPiece]) -> String {
    let mut content_text = String::new();
    for piece in pieces.iter().take(MAX_CONTENT_ITEMS) {
        content_text.push_str(&format!("\n\n=== {}: {} ===\n", piece.kind, piece.title));
        content_text.push_str(&cap(&piece.body, ITEM_CHAR_CAP));
    }
    let content_text = cap(&content_text, PROMPT_CHAR_CAP);

    format!(
        "You are analyzing course materials to create a comprehensive study guide for an upcoming exam.\n\n\
         Exam: {}{}\n\n\
         Below are course materials (lectures, pages, assignments, discussions) from ONLY the modules/weeks covered on this exam:\n\
         {}\n\n\
         Create a comprehensive study guide with:\n\n\
         1. KEY CONCEPTS (organized by topic)\n\
            - List ALL important concepts\n\
            - Brief explanation of each\n\
            - Why it's important\n\n\
         2. KEY IDEAS & THEORIES\n\
            - Main theories/frameworks\n\
            - How they connect\n\
            - Real-world applications\n\n\
         3. MULTIPLE CHOICE PRACTICE QUESTIONS (70-100 questions)\n\
            CRITICAL: ONLY create questions about material that will be on THIS exam (covered chapters/weeks only).\n\
            Do NOT include questions on future topics or material not yet covered.\n\n\
            IMPORTANT FORMAT:\n\
            - Each question must be multiple choice with 4 answer options (A, B, C, D)\n\
            - Label questions as Q1, Q2, Q3, etc.\n\
            - Cover definitions, applications, comparisons, analysis\n\
            - Mix difficulty levels (easy, medium, hard)\n\
            - Cover ALL topics from the PROVIDED materials ONLY\n\
            - DO NOT include answers here - answers go in answer key\n\n\
         4. ANSWER KEY\n\
            - List ONLY the correct letter for each question\n\
            - Format: Q1: B, Q2: A, Q3: D, etc.\n\
            - Put this section at the very end\n\n\
         Format clearly with headers. Be comprehensive - this is for exam prep.",
        exam_title,
        chapter_note(exam_title),
        content_text
    )
}

/// Exam titles like "Midterm Exam Ch 1, 2, 3" narrow the guide to those
/// chapters.
fn chapter_note(exam_title: &str) -> String {
    let lowered = exam_title.to_lowercase();
    CHAPTER_RE
        .captures(&lowered)
        .and_then(|caps| caps.get(1))
        .map(|chapters| chapters.as_str().trim())
        .filter(|chapters| !chapters.is_empty())
        .map(|chapters| {
            format!(
                "\n\nIMPORTANT: This exam covers ONLY Chapters {}. Focus your study guide ONLY on these specific chapters.",
                chapters
            )
        })
        .unwrap_or_default()
}

fn render_guide(
    exam: &ExamSource,
    pieces: &[ContentPiece],
    analysis: &str,
    now: DateTime<Utc>,
    timezone: Tz,
) -> String {
    let exam_date = exam
        .due_at
        .map(|due| {
            due.with_timezone(&timezone)
                .format("%B %-d, %Y at %-I:%M %p")
                .to_string()
        })
        .unwrap_or_else(|| "TBD".to_string());
    let points = exam
        .points
        .map(|p| p.to_string())
        .unwrap_or_else(|| "N/A".to_string());

    let mut text = format!(
        "# Comprehensive Study Guide\n\n\
         ## {}\n\n\
         - Course: {}\n\
         - Exam Date: {}\n\
         - Points: {}\n\
         - Materials Covered: {} items\n\
         - Generated: {}\n",
        exam.title,
        exam.course,
        exam_date,
        points,
        pieces.len(),
        now.with_timezone(&timezone)
            .format("%B %-d, %Y at %-I:%M %p"),
    );

    if let Some(description) = &exam.description {
        let cleaned = clean_html(description);
        if !cleaned.is_empty() {
            text.push_str("\n## Exam Description\n\n");
            text.push_str(&cleaned);
            text.push('\n');
        }
    }

    text.push_str("\n## Study Guide Content\n\n");
    text.push_str(analysis);
    text.push('\n');

    text.push_str("\n## Course Materials Reviewed\n\n");
    text.push_str(&format!(
        "This study guide was created from {} course materials:\n",
        pieces.len()
    ));
    let mut current_module = "";
    for piece in pieces {
        if piece.module != current_module {
            text.push_str(&format!("\n### 📚 {}\n", piece.module));
            current_module = &piece.module;
        }
        text.push_str(&format!("- {}: {}\n", piece.kind, piece.title));
    }
    text
}

fn file_name(exam_title: &str) -> String {
    let stripped = UNSAFE_RE.replace_all(exam_title, "");
    let dashed = DASH_RE.replace_all(stripped.trim(), "-");
    format!("{}-COMPREHENSIVE-study-guide.md", dashed)
}

fn clean_html(raw: &str) -> String {
    let text = TAG_RE.replace_all(raw, " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cap(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Follow-up message summarizing how each study kit ended up.
pub fn follow_up_message(outcomes: &[StudyKitOutcome]) -> Option<String> {
    if outcomes.is_empty() {
        return None;
    }
    let mut message = "📚 *Auto-Generated Study Guides:*\n".to_string();
    for outcome in outcomes {
        match &outcome.result {
            Ok(path) => {
                message.push_str(&format!(
                    "✅ {}\n   `{}`\n",
                    outcome.exam_title,
                    path.display()
                ));
            }
            Err(reason) => {
                message.push_str(&format!(
                    "❌ {} ({})\n   _{}_\n",
                    outcome.exam_title, outcome.course, reason
                ));
            }
        }
    }
    Some(message)
}

pub fn document_caption(exam_title: &str) -> String {
    format!(
        "📖 *Study Guide: {}*\n\n\
         ✅ AI-generated with:\n\
         • Key concepts organized by topic\n\
         • Key ideas & theories\n\
         • 70-100 multiple choice practice questions\n\
         • Answer key on last page\n\
         • All course materials reviewed\n\n\
         Download and open on your phone! 📱",
        exam_title
    )
}

/// Strips conversational lead-ins from an on-demand request, leaving the
/// bare search term with its original casing.
pub fn extract_search_term(raw: &str) -> String {
    let trimmed = raw.trim();
    for prefix in SEARCH_PREFIXES {
        if trimmed.len() >= prefix.len() && trimmed.is_char_boundary(prefix.len()) {
            let (head, tail) = trimmed.split_at(prefix.len());
            if head.eq_ignore_ascii_case(prefix) {
                return tail.trim().to_string();
            }
        }
    }
    trimmed.to_string()
}

/// On-demand entry point: find the assignment by name, generate its guide,
/// report progress and the result over Telegram.
pub async fn run_on_demand(config: &Config, request: &str) -> anyhow::Result<()> {
    let term = extract_search_term(request);
    if term.is_empty() {
        anyhow::bail!("empty study guide request");
    }
    tracing::info!(term = %term, "on-demand study guide requested");

    let telegram = TelegramClient::new(&config.telegram);
    let openai = OpenAiClient::new(&config.openai);

    let mut found = None;
    for account in &config.accounts {
        let client = CanvasClient::new(account);
        match client.search_assignments(&term, config.fetch_max_pages).await {
            Ok(matches) => {
                if let Some(assignment) = matches.into_iter().next() {
                    found = Some((client, assignment));
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(
                    account = %account.name,
                    error = %format!("{:#}", err),
                    "search failed for account"
                );
            }
        }
    }

    let Some((client, assignment)) = found else {
        telegram
            .send_message(&format!("❌ No assignments found for: {}", term))
            .await?;
        anyhow::bail!("no assignment matched {:?}", term);
    };

    telegram
        .send_message(&format!(
            "🤖 Generating study guide for:\n*{}*\n{}",
            assignment.title, assignment.course_name
        ))
        .await?;

    let exam = ExamSource {
        title: assignment.title.clone(),
        course: assignment.course_name.clone(),
        due_at: assignment.due_at,
        points: assignment.points,
        description: assignment.description.clone(),
    };
    let path = build_guide(
        &client,
        &openai,
        assignment.course_id,
        &exam,
        &config.study_kit_dir,
        config.fetch_max_pages,
        config.timezone,
    )
    .await?;

    telegram
        .send_message(&format!(
            "✅ *Study Guide Complete!*\n\n\
             📋 {}\n\
             🎓 {}\n\n\
             📄 Saved to:\n`{}`\n\n\
             Open the file to view your AI-generated study guide! 🤖",
            exam.title,
            exam.course,
            path.display()
        ))
        .await?;
    telegram
        .send_document(&path, &document_caption(&exam.title))
        .await?;
    Ok(())
}
