//! Failure taxonomy for a pipeline run.
//!
//! Failures local to one source or one item are absorbed where they occur and
//! reported through these variants; only total fetch failure or total dispatch
//! failure escalates to the run's exit status.

/// A reportable failure inside one pipeline run.
#[derive(Debug)]
pub enum PlannerError {
    /// One account/endpoint could not be fetched. That source is skipped and
    /// the run continues with whatever else succeeded.
    SourceUnavailable { source: String, reason: String },

    /// The pagination safety bound was hit for one source. The partial batch
    /// is used and the digest notes the gap.
    Truncated { source: String, pages: u32 },

    /// Text or document generation failed or timed out. The affected item
    /// degrades to fallback content.
    GenerationFailed { subject: String, reason: String },

    /// The messaging transport rejected a message even after retries.
    DispatchFailed(String),
}

// Hand-written rather than derived via `thiserror`: the derive treats any
// field literally named `source` as an error cause (requiring `Error`), but
// here `source` is the name of the data source that failed.
impl std::fmt::Display for PlannerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlannerError::SourceUnavailable { source, reason } => {
                write!(f, "source {source} unavailable: {reason}")
            }
            PlannerError::Truncated { source, pages } => {
                write!(f, "source {source} truncated after {pages} pages")
            }
            PlannerError::GenerationFailed { subject, reason } => {
                write!(f, "generation failed for {subject}: {reason}")
            }
            PlannerError::DispatchFailed(reason) => write!(f, "dispatch failed: {reason}"),
        }
    }
}

impl std::error::Error for PlannerError {}

pub type Result<T> = std::result::Result<T, PlannerError>;
