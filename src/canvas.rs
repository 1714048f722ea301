use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use futures::StreamExt;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::Account;
use crate::error::{PlannerError, Result};
use crate::models::{EndpointKind, RawItem};

const PAGE_SIZE: u32 = 100;
const FETCH_CONCURRENCY: usize = 4;
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
/// How far ahead the planner feed is asked to look. Wider than the horizon so
/// the window filter, not the API query, decides what is notification-worthy.
const PLANNER_LOOKAHEAD_DAYS: i64 = 7;

/// All items one (account, endpoint) sub-fetch produced.
#[derive(Debug)]
pub struct SourceBatch {
    pub origin: String,
    pub items: Vec<RawItem>,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct CourseRef {
    pub id: i64,
    pub name: String,
}

/// Assignment located by the on-demand study-kit search.
#[derive(Debug, Clone)]
pub struct FoundAssignment {
    pub course_id: i64,
    pub course_name: String,
    pub title: String,
    pub due_at: Option<DateTime<Utc>>,
    pub points: Option<f64>,
    pub description: Option<String>,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct Module {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    pub unlock_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub items: Vec<ModuleItem>,
}

#[derive(Debug, Deserialize)]
pub struct ModuleItem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub content_id: Option<i64>,
    #[serde(default)]
    pub page_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlannerEntry {
    plannable_date: Option<DateTime<Utc>>,
    #[serde(default)]
    context_name: Option<String>,
    #[serde(default)]
    plannable: Plannable,
}

#[derive(Debug, Default, Deserialize)]
struct Plannable {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    points_possible: Option<f64>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Course {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    workflow_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Assignment {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    points_possible: Option<f64>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Discussion {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Client for one Canvas account.
#[derive(Clone)]
pub struct CanvasClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    account: String,
}

impl CanvasClient {
    pub fn new(account: &Account) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: account.url.clone(),
            token: account.api_token.clone(),
            account: account.name.clone(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    fn origin(&self, endpoint: EndpointKind) -> String {
        format!("{}/{}", self.account, endpoint.as_str())
    }

    async fn get_raw(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<String> {
        let url = format!("{}/api/v1/{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .query(query)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .with_context(|| format!("reading {} response failed", path))?;

        if !status.is_success() {
            anyhow::bail!(
                "Canvas API error on {}: {} - {}",
                path,
                status,
                snippet(&body)
            );
        }
        Ok(body)
    }

    /// Follows `page=N` to exhaustion, up to `max_pages`. The second element
    /// is true when the bound was hit with the last page still full, meaning
    /// the source likely has more data than was fetched.
    async fn fetch_paged<T: DeserializeOwned>(
        &self,
        path: &str,
        base_query: &[(&str, String)],
        max_pages: u32,
    ) -> anyhow::Result<(Vec<T>, bool)> {
        let mut all = Vec::new();
        for page in 1..=max_pages {
            let mut query: Vec<(&str, String)> = base_query.to_vec();
            query.push(("per_page", PAGE_SIZE.to_string()));
            query.push(("page", page.to_string()));

            let body = self.get_raw(path, &query).await?;
            let batch: Vec<T> = serde_json::from_str(&body)
                .with_context(|| format!("parsing {} response failed", path))?;

            let batch_len = batch.len() as u32;
            all.extend(batch);
            if batch_len < PAGE_SIZE {
                return Ok((all, false));
            }
        }
        Ok((all, true))
    }

    async fn fetch_one<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let body = self.get_raw(path, &[]).await?;
        serde_json::from_str(&body).with_context(|| format!("parsing {} response failed", path))
    }

    /// Dashboard planner feed: everything Canvas shows on the to-do list for
    /// [today, today + 7d].
    pub async fn planner_feed(&self, today: NaiveDate, max_pages: u32) -> Result<SourceBatch> {
        let origin = self.origin(EndpointKind::Planner);
        let start = today.format("%Y-%m-%d").to_string();
        let end = (today + chrono::Duration::days(PLANNER_LOOKAHEAD_DAYS))
            .format("%Y-%m-%d")
            .to_string();

        let (entries, truncated) = self
            .fetch_paged::<PlannerEntry>(
                "planner/items",
                &[("start_date", start), ("end_date", end)],
                max_pages,
            )
            .await
            .map_err(|err| PlannerError::SourceUnavailable {
                source: origin.clone(),
                reason: format!("{:#}", err),
            })?;

        let items = entries
            .into_iter()
            .filter_map(|entry| self.planner_item(entry))
            .collect::<Vec<_>>();
        tracing::info!(source = %origin, count = items.len(), "fetched planner feed");

        Ok(SourceBatch {
            origin,
            items,
            truncated,
        })
    }

    fn planner_item(&self, entry: PlannerEntry) -> Option<RawItem> {
        let due_at = entry.plannable_date?;
        let title = entry.plannable.title.filter(|t| !t.trim().is_empty())?;
        let id = entry
            .plannable
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| format!("{}@{}", title, due_at.timestamp()));
        Some(RawItem {
            id,
            title,
            course: entry
                .context_name
                .unwrap_or_else(|| "Unknown".to_string()),
            due_at,
            points: entry.plannable.points_possible,
            description: entry.plannable.description,
            endpoint: EndpointKind::Planner,
            account: self.account.clone(),
            url: entry.plannable.html_url.unwrap_or_else(|| "#".to_string()),
        })
    }

    /// Published assignments across active courses. Catches items the planner
    /// feed omits; a single failing course is skipped, not fatal.
    pub async fn assignment_feed(&self, max_pages: u32) -> Result<SourceBatch> {
        let origin = self.origin(EndpointKind::Assignments);
        let (courses, mut truncated) =
            self.active_courses(max_pages)
                .await
                .map_err(|err| PlannerError::SourceUnavailable {
                    source: origin.clone(),
                    reason: format!("{:#}", err),
                })?;

        let mut items = Vec::new();
        for course in &courses {
            let path = format!("courses/{}/assignments", course.id);
            match self.fetch_paged::<Assignment>(&path, &[], max_pages).await {
                Ok((assignments, t)) => {
                    truncated |= t;
                    for assignment in assignments {
                        if let Some(item) = self.assignment_item(assignment, &course.name) {
                            items.push(item);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        source = %origin,
                        course = %course.name,
                        error = %format!("{:#}", err),
                        "skipping course assignments"
                    );
                }
            }
        }
        tracing::info!(
            source = %origin,
            courses = courses.len(),
            count = items.len(),
            "fetched assignment lists"
        );

        Ok(SourceBatch {
            origin,
            items,
            truncated,
        })
    }

    fn assignment_item(&self, assignment: Assignment, course: &str) -> Option<RawItem> {
        let due_at = assignment.due_at?;
        Some(RawItem {
            id: assignment.id.to_string(),
            title: assignment.name.unwrap_or_else(|| "Unnamed".to_string()),
            course: course.to_string(),
            due_at,
            points: assignment.points_possible,
            description: assignment.description,
            endpoint: EndpointKind::Assignments,
            account: self.account.clone(),
            url: assignment.html_url.unwrap_or_else(|| "#".to_string()),
        })
    }

    pub async fn active_courses(&self, max_pages: u32) -> anyhow::Result<(Vec<CourseRef>, bool)> {
        let (courses, truncated) = self
            .fetch_paged::<Course>(
                "courses",
                &[("enrollment_state", "active".to_string())],
                max_pages,
            )
            .await?;

        let refs = courses
            .into_iter()
            .filter(|course| {
                !matches!(
                    course.workflow_state.as_deref(),
                    Some("completed") | Some("deleted")
                )
            })
            .map(|course| CourseRef {
                id: course.id,
                name: course.name.unwrap_or_else(|| "Unknown".to_string()),
            })
            .collect();
        Ok((refs, truncated))
    }

    /// Case-insensitive substring search over assignment titles, used by the
    /// on-demand study-kit request. First match wins downstream.
    pub async fn search_assignments(
        &self,
        query: &str,
        max_pages: u32,
    ) -> anyhow::Result<Vec<FoundAssignment>> {
        let needle = query.to_lowercase();
        let (courses, _) = self.active_courses(max_pages).await?;

        let mut matches = Vec::new();
        for course in &courses {
            let path = format!("courses/{}/assignments", course.id);
            let (assignments, _) = match self.fetch_paged::<Assignment>(&path, &[], max_pages).await
            {
                Ok(found) => found,
                Err(err) => {
                    tracing::warn!(
                        account = %self.account,
                        course = %course.name,
                        error = %format!("{:#}", err),
                        "skipping course during search"
                    );
                    continue;
                }
            };
            for assignment in assignments {
                let title = assignment.name.clone().unwrap_or_default();
                if title.to_lowercase().contains(&needle) {
                    matches.push(FoundAssignment {
                        course_id: course.id,
                        course_name: course.name.clone(),
                        title,
                        due_at: assignment.due_at,
                        points: assignment.points_possible,
                        description: assignment.description,
                        url: assignment.html_url.unwrap_or_else(|| "#".to_string()),
                    });
                }
            }
        }
        Ok(matches)
    }

    pub async fn course_modules(&self, course_id: i64, max_pages: u32) -> anyhow::Result<Vec<Module>> {
        let path = format!("courses/{}/modules", course_id);
        let (modules, _) = self
            .fetch_paged::<Module>(&path, &[("include[]", "items".to_string())], max_pages)
            .await?;
        Ok(modules)
    }

    pub async fn page_content(
        &self,
        course_id: i64,
        slug: &str,
    ) -> anyhow::Result<Option<(String, String)>> {
        let page: Page = self
            .fetch_one(&format!("courses/{}/pages/{}", course_id, slug))
            .await?;
        Ok(page.body.filter(|body| !body.trim().is_empty()).map(|body| {
            (page.title.unwrap_or_else(|| "Untitled".to_string()), body)
        }))
    }

    pub async fn assignment_content(
        &self,
        course_id: i64,
        assignment_id: i64,
    ) -> anyhow::Result<Option<(String, String)>> {
        let assignment: Assignment = self
            .fetch_one(&format!("courses/{}/assignments/{}", course_id, assignment_id))
            .await?;
        Ok(assignment
            .description
            .filter(|desc| !desc.trim().is_empty())
            .map(|desc| {
                (
                    assignment.name.unwrap_or_else(|| "Unnamed".to_string()),
                    desc,
                )
            }))
    }

    pub async fn discussion_content(
        &self,
        course_id: i64,
        topic_id: i64,
    ) -> anyhow::Result<Option<(String, String)>> {
        let discussion: Discussion = self
            .fetch_one(&format!("courses/{}/discussion_topics/{}", course_id, topic_id))
            .await?;
        Ok(discussion
            .message
            .filter(|msg| !msg.trim().is_empty())
            .map(|msg| {
                (
                    discussion.title.unwrap_or_else(|| "Untitled".to_string()),
                    msg,
                )
            }))
    }
}

/// Runs one sub-fetch per (account, endpoint) with bounded concurrency.
/// A failed sub-fetch becomes a warning; the rest of the run continues with
/// whatever succeeded.
pub async fn fetch_all(
    accounts: &[Account],
    today: NaiveDate,
    max_pages: u32,
) -> (Vec<SourceBatch>, Vec<PlannerError>) {
    let subfetches: Vec<(CanvasClient, EndpointKind)> = accounts
        .iter()
        .flat_map(|account| {
            let client = CanvasClient::new(account);
            [
                (client.clone(), EndpointKind::Planner),
                (client, EndpointKind::Assignments),
            ]
        })
        .collect();

    let results = futures::stream::iter(subfetches)
        .map(|(client, endpoint)| async move {
            match endpoint {
                EndpointKind::Planner => client.planner_feed(today, max_pages).await,
                EndpointKind::Assignments => client.assignment_feed(max_pages).await,
            }
        })
        .buffer_unordered(FETCH_CONCURRENCY)
        .collect::<Vec<_>>()
        .await;

    let mut batches = Vec::new();
    let mut warnings = Vec::new();
    for result in results {
        match result {
            Ok(batch) => {
                if batch.truncated {
                    warnings.push(PlannerError::Truncated {
                        source: batch.origin.clone(),
                        pages: max_pages,
                    });
                }
                batches.push(batch);
            }
            Err(err) => {
                tracing::warn!(error = %err, "sub-fetch failed");
                warnings.push(err);
            }
        }
    }
    (batches, warnings)
}

fn snippet(body: &str) -> &str {
    let end = body
        .char_indices()
        .take(200)
        .last()
        .map(|(idx, ch)| idx + ch.len_utf8())
        .unwrap_or(0);
    &body[..end]
}
