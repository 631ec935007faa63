use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Job identifier
pub type JobId = String;

/// Unit of work consumed by the worker pool
#[async_trait]
pub trait Job: Send {
    /// Execute the job. The worker owns the job for the whole call.
    async fn execute(&mut self) -> Result<()>;

    /// Stable identifier used in logs and summaries
    fn id(&self) -> JobId;

    /// Line appended to the failure file when the job fails
    fn failure_line(&self) -> String;

    /// Get job type (for logging/debugging)
    fn job_type(&self) -> &str;
}

/// Reported result of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub id: JobId,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn success(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            succeeded: true,
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            id: id.into(),
            succeeded: false,
            error: Some(error.to_string()),
        }
    }
}
