//! Decides which inbound messages become user-facing notifications.

use std::collections::HashSet;

use crate::events::{InboundMessage, JobId, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub job_id: JobId,
    pub severity: Severity,
    pub message: String,
}

/// The notification surface (toasts, console, desktop...).
pub trait Notifier: Send + Sync {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

pub fn deliver(notifier: &dyn Notifier, note: &Notification) {
    match note.severity {
        Severity::Success => notifier.success(&note.message),
        Severity::Error => notifier.error(&note.message),
    }
}

/// Per-subscription de-duplication state.
///
/// The first concrete status seen only primes `previous`; it is whatever the
/// job already was when we (re)connected, not something that just happened.
#[derive(Debug, Default)]
pub struct NotificationCoalescer {
    previous: Option<JobStatus>,
    announced_artifacts: HashSet<(JobId, String)>,
}

impl NotificationCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.previous.is_some()
    }

    pub fn previous_status(&self) -> Option<&JobStatus> {
        self.previous.as_ref()
    }

    /// Back to `uninitialized`, artifact set emptied.
    pub fn reset(&mut self) {
        self.previous = None;
        self.announced_artifacts.clear();
    }

    pub fn observe(&mut self, msg: &InboundMessage) -> Option<Notification> {
        match msg {
            InboundMessage::StatusUpdate {
                job_id,
                status: Some(status),
                ..
            } => self.on_status(job_id, status),
            InboundMessage::StatusUpdate { status: None, .. } => None,
            InboundMessage::ArtifactUpdate {
                job_id, artifact, ..
            } => self.on_artifact(job_id, &artifact.artifact_type),
            InboundMessage::Error { job_id, message } => Some(Notification {
                job_id: job_id.clone(),
                severity: Severity::Error,
                message: format!("Job {} error: {}", job_id, message),
            }),
            InboundMessage::LogUpdate { .. } => None,
        }
    }

    fn on_status(&mut self, job_id: &JobId, status: &JobStatus) -> Option<Notification> {
        let previous = self.previous.replace(status.clone())?;
        if previous == *status {
            return None;
        }
        match status {
            JobStatus::Completed => Some(Notification {
                job_id: job_id.clone(),
                severity: Severity::Success,
                message: format!("Job {} completed", job_id),
            }),
            JobStatus::Failed => Some(Notification {
                job_id: job_id.clone(),
                severity: Severity::Error,
                message: format!("Job {} failed", job_id),
            }),
            _ => None,
        }
    }

    fn on_artifact(&mut self, job_id: &JobId, artifact_type: &str) -> Option<Notification> {
        if !self
            .announced_artifacts
            .insert((job_id.clone(), artifact_type.to_string()))
        {
            return None;
        }
        Some(Notification {
            job_id: job_id.clone(),
            severity: Severity::Success,
            message: format!("{} is ready for job {}", artifact_type.replace('_', " "), job_id),
        })
    }
}
