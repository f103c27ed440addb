//! Wire types pushed by the job server.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque job identifier. Numeric ids on the wire are kept as their decimal text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawJobId", into = "String")]
pub struct JobId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawJobId {
    Text(String),
    Number(u64),
}

impl From<RawJobId> for JobId {
    fn from(raw: RawJobId) -> Self {
        match raw {
            RawJobId::Text(s) => JobId(s),
            RawJobId::Number(n) => JobId(n.to_string()),
        }
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        JobId(s)
    }
}

impl From<u64> for JobId {
    fn from(n: u64) -> Self {
        JobId(n.to_string())
    }
}

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Other(String),
}

impl JobStatus {
    /// `completed` and `failed`; nothing further is expected after these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Other(s) => s,
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => JobStatus::Pending,
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Other(s),
        }
    }
}

impl From<&str> for JobStatus {
    fn from(s: &str) -> Self {
        JobStatus::from(s.to_string())
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub artifact_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    StatusUpdate {
        job_id: JobId,
        #[serde(default)]
        status: Option<JobStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress_percentage: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_stage: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selected_options: Option<Vec<String>>,
        #[serde(default)]
        timestamp: String,
    },
    /// Payload-free: the event itself says "logs changed, pull them".
    LogUpdate {
        job_id: JobId,
        #[serde(default)]
        timestamp: String,
    },
    ArtifactUpdate {
        job_id: JobId,
        artifact: ArtifactRef,
        #[serde(default)]
        timestamp: String,
    },
    Error {
        job_id: JobId,
        #[serde(rename = "error")]
        message: String,
    },
}

impl InboundMessage {
    pub fn job_id(&self) -> &JobId {
        match self {
            InboundMessage::StatusUpdate { job_id, .. }
            | InboundMessage::LogUpdate { job_id, .. }
            | InboundMessage::ArtifactUpdate { job_id, .. }
            | InboundMessage::Error { job_id, .. } => job_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::StatusUpdate { .. } => "status_update",
            InboundMessage::LogUpdate { .. } => "log_update",
            InboundMessage::ArtifactUpdate { .. } => "artifact_update",
            InboundMessage::Error { .. } => "error",
        }
    }

    pub fn status(&self) -> Option<&JobStatus> {
        match self {
            InboundMessage::StatusUpdate { status, .. } => status.as_ref(),
            _ => None,
        }
    }
}
