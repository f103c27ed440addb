use std::fmt;
use std::time::Duration;

use crate::events::{InboundMessage, JobId};

/// A cached view that downstream consumers refetch when told to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKey {
    JobDetail(JobId),
    JobArtifacts(JobId),
    JobLogs(JobId),
    JobList,
}

impl ResourceKey {
    /// Everything that depends on a job once it reaches a terminal status.
    pub fn dependents_of(job_id: &JobId) -> [ResourceKey; 4] {
        [
            ResourceKey::JobDetail(job_id.clone()),
            ResourceKey::JobArtifacts(job_id.clone()),
            ResourceKey::JobLogs(job_id.clone()),
            ResourceKey::JobList,
        ]
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::JobDetail(id) => write!(f, "job/{}", id),
            ResourceKey::JobArtifacts(id) => write!(f, "job/{}/artifacts", id),
            ResourceKey::JobLogs(id) => write!(f, "job/{}/logs", id),
            ResourceKey::JobList => write!(f, "jobs"),
        }
    }
}

/// REST-boundary hook: "the data behind this key is stale".
pub trait InvalidationSink: Send + Sync {
    fn invalidate(&self, key: &ResourceKey);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationPlan {
    /// Fire now, superseding anything pending for these keys.
    Immediate(Vec<ResourceKey>),
    Debounce(Vec<ResourceKey>, Duration),
}

#[derive(Debug, Clone, Copy)]
pub struct Delays {
    pub status: Duration,
    pub logs: Duration,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            status: Duration::from_millis(100),
            logs: Duration::from_millis(300),
        }
    }
}

pub fn plan_for(msg: &InboundMessage, delays: &Delays) -> InvalidationPlan {
    let job_id = msg.job_id();
    match msg {
        InboundMessage::StatusUpdate { status, .. } => {
            if status.as_ref().is_some_and(|s| s.is_terminal()) {
                InvalidationPlan::Immediate(ResourceKey::dependents_of(job_id).to_vec())
            } else {
                InvalidationPlan::Debounce(
                    vec![ResourceKey::JobDetail(job_id.clone()), ResourceKey::JobList],
                    delays.status,
                )
            }
        }
        InboundMessage::LogUpdate { .. } => {
            InvalidationPlan::Debounce(vec![ResourceKey::JobLogs(job_id.clone())], delays.logs)
        }
        InboundMessage::ArtifactUpdate { .. } => {
            InvalidationPlan::Immediate(vec![ResourceKey::JobArtifacts(job_id.clone())])
        }
        InboundMessage::Error { .. } => {
            InvalidationPlan::Debounce(vec![ResourceKey::JobDetail(job_id.clone())], delays.status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> InboundMessage {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_terminal_status_is_immediate_for_all_dependents() {
        let msg = parse(r#"{"type":"status_update","job_id":"J1","status":"completed","timestamp":"t"}"#);
        match plan_for(&msg, &Delays::default()) {
            InvalidationPlan::Immediate(keys) => {
                assert_eq!(keys.len(), 4);
                assert!(keys.contains(&ResourceKey::JobList));
                assert!(keys.contains(&ResourceKey::JobLogs(JobId::from("J1"))));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_message_class_delays() {
        let d = Delays::default();
        let running = parse(r#"{"type":"status_update","job_id":"J1","status":"running","timestamp":"t"}"#);
        assert_eq!(
            plan_for(&running, &d),
            InvalidationPlan::Debounce(
                vec![ResourceKey::JobDetail(JobId::from("J1")), ResourceKey::JobList],
                Duration::from_millis(100)
            )
        );
        let logs = parse(r#"{"type":"log_update","job_id":"J1","timestamp":"t"}"#);
        assert_eq!(
            plan_for(&logs, &d),
            InvalidationPlan::Debounce(vec![ResourceKey::JobLogs(JobId::from("J1"))], Duration::from_millis(300))
        );
        let art = parse(r#"{"type":"artifact_update","job_id":"J1","artifact":{"artifact_type":"x"},"timestamp":"t"}"#);
        assert_eq!(
            plan_for(&art, &d),
            InvalidationPlan::Immediate(vec![ResourceKey::JobArtifacts(JobId::from("J1"))])
        );
    }

    #[test]
    fn test_key_display() {
        assert_eq!(ResourceKey::JobLogs(JobId::from("9")).to_string(), "job/9/logs");
        assert_eq!(ResourceKey::JobList.to_string(), "jobs");
    }
}
