use chrono::{DateTime, Utc};

/// Which Canvas endpoint produced an item. The assignments endpoint carries
/// richer data than the planner feed and wins merge conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EndpointKind {
    Planner,
    Assignments,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Planner => "planner",
            EndpointKind::Assignments => "assignments",
        }
    }
}

/// A work item exactly as one endpoint reported it. The raw id is only unique
/// within one account+endpoint pair; the same logical assignment shows up
/// under both endpoints with unrelated ids.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub id: String,
    pub title: String,
    pub course: String,
    pub due_at: DateTime<Utc>,
    pub points: Option<f64>,
    pub description: Option<String>,
    pub endpoint: EndpointKind,
    pub account: String,
    pub url: String,
}

/// Key identifying one logical assignment across accounts and endpoints:
/// lowercased, whitespace-collapsed course and title plus the due time
/// rounded to the minute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeKey {
    pub course: String,
    pub title: String,
    pub due_minute: i64,
}

/// One logical assignment after merging duplicates from all sources.
#[derive(Debug, Clone)]
pub struct NormalizedItem {
    pub key: MergeKey,
    pub title: String,
    pub course: String,
    pub due_at: DateTime<Utc>,
    pub points: Option<f64>,
    pub description: Option<String>,
    pub account: String,
    pub url: String,
}

/// Priority bucket assigned by the classifier, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Exam,
    DueToday,
    DueTomorrow,
    Regular,
}

impl Tag {
    /// Leading symbol used in the digest for this bucket.
    pub fn symbol(&self) -> &'static str {
        match self {
            Tag::Exam => "🚨",
            Tag::DueToday => "⚠️",
            Tag::DueTomorrow => "📌",
            Tag::Regular => "📋",
        }
    }

    /// Bucket name as plain prose, for prompts and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Tag::Exam => "exam",
            Tag::DueToday => "due today",
            Tag::DueTomorrow => "due tomorrow",
            Tag::Regular => "regular",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifiedItem {
    pub item: NormalizedItem,
    pub tag: Tag,
    pub countdown: String,
}

/// Generated study advice for one assignment. Produced by the plan generator,
/// or by the deterministic fallback when generation fails.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub time_estimate: String,
    pub steps: Vec<String>,
    pub tips: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlannedItem {
    pub classified: ClassifiedItem,
    pub plan: Plan,
}

impl PlannedItem {
    pub fn item(&self) -> &NormalizedItem {
        &self.classified.item
    }

    pub fn tag(&self) -> Tag {
        self.classified.tag
    }
}

/// Result of one study-kit generation attempt, reported in the follow-up
/// message after the primary digest.
#[derive(Debug, Clone)]
pub struct StudyKitOutcome {
    pub exam_title: String,
    pub course: String,
    pub result: std::result::Result<std::path::PathBuf, String>,
}
