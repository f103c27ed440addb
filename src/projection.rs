//! Last known state of every watched job.
//!
//! The projection is an explicitly constructed service: clone the handle to
//! share it. Records are only created by `register`/`ensure`, changed by
//! `merge`, and dropped by `remove`; readers always get owned copies.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::events::{InboundMessage, JobId, JobStatus};
use crate::logging::{log, obj, v_str, Domain, Level};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_options: Option<Vec<String>>,
}

impl JobRecord {
    pub fn new(id: JobId, status: JobStatus) -> Self {
        Self {
            id,
            status,
            progress_percentage: None,
            current_stage: None,
            selected_options: None,
        }
    }
}

/// Partial update. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPatch {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub progress_percentage: Option<f64>,
    #[serde(default)]
    pub current_stage: Option<String>,
    #[serde(default)]
    pub selected_options: Option<Vec<String>>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.progress_percentage.is_none()
            && self.current_stage.is_none()
            && self.selected_options.is_none()
    }

    /// Patch carried by a `status_update`; other messages carry none.
    pub fn from_message(msg: &InboundMessage) -> Option<Self> {
        match msg {
            InboundMessage::StatusUpdate {
                status,
                progress_percentage,
                current_stage,
                selected_options,
                ..
            } => Some(Self {
                status: status.clone(),
                progress_percentage: *progress_percentage,
                current_stage: current_stage.clone(),
                selected_options: selected_options.clone(),
            }),
            _ => None,
        }
    }

    fn apply(self, record: &mut JobRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(pct) = self.progress_percentage {
            record.progress_percentage = Some(pct);
        }
        if let Some(stage) = self.current_stage {
            record.current_stage = Some(stage);
        }
        if let Some(opts) = self.selected_options {
            record.selected_options = Some(opts);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusProjection {
    records: Arc<RwLock<HashMap<JobId, JobRecord>>>,
}

impl StatusProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a full record (job creation, REST refetch).
    pub fn register(&self, record: JobRecord) {
        if let Ok(mut map) = self.records.write() {
            map.insert(record.id.clone(), record);
        }
    }

    /// Create a `pending` record for `job_id` unless one exists.
    ///
    /// `pending` is a placeholder: it does not reflect the server's view until
    /// the first status frame (or a `register` with a known record) lands.
    pub fn ensure(&self, job_id: &JobId) {
        if let Ok(mut map) = self.records.write() {
            map.entry(job_id.clone())
                .or_insert_with(|| JobRecord::new(job_id.clone(), JobStatus::Pending));
        }
    }

    /// Overwrite only the fields present in `patch`. Returns false when the
    /// job is not registered, in which case nothing changes.
    pub fn merge(&self, job_id: &JobId, patch: JobPatch) -> bool {
        let Ok(mut map) = self.records.write() else {
            return false;
        };
        match map.get_mut(job_id) {
            Some(record) => {
                patch.apply(record);
                true
            }
            None => {
                log(
                    Level::Debug,
                    Domain::Projection,
                    "merge_unregistered",
                    obj(&[("job_id", v_str(job_id.as_str()))]),
                );
                false
            }
        }
    }

    pub fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        self.records.read().ok()?.get(job_id).cloned()
    }

    pub fn remove(&self, job_id: &JobId) -> Option<JobRecord> {
        let removed = self.records.write().ok()?.remove(job_id);
        if removed.is_some() {
            log(
                Level::Debug,
                Domain::Projection,
                "remove",
                obj(&[("job_id", v_str(job_id.as_str()))]),
            );
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records, ordered by id.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        let mut out: Vec<JobRecord> = self
            .records
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(id: &str) -> JobRecord {
        JobRecord {
            id: JobId::from(id),
            status: JobStatus::Running,
            progress_percentage: Some(10.0),
            current_stage: Some("market".to_string()),
            selected_options: Some(vec!["market".to_string()]),
        }
    }

    #[test]
    fn test_merge_overwrites_only_present_fields() {
        let proj = StatusProjection::new();
        proj.register(running("J1"));
        let id = JobId::from("J1");

        let merged = proj.merge(
            &id,
            JobPatch {
                progress_percentage: Some(55.0),
                ..Default::default()
            },
        );
        assert!(merged);
        let rec = proj.get(&id).unwrap();
        assert_eq!(rec.progress_percentage, Some(55.0));
        assert_eq!(rec.status, JobStatus::Running);
        assert_eq!(rec.current_stage.as_deref(), Some("market"));
    }

    #[test]
    fn test_empty_merge_is_idempotent() {
        let proj = StatusProjection::new();
        proj.register(running("J1"));
        let id = JobId::from("J1");
        let before = proj.get(&id).unwrap();
        assert!(JobPatch::default().is_empty());
        proj.merge(&id, JobPatch::default());
        proj.merge(&id, JobPatch::default());
        assert_eq!(proj.get(&id).unwrap(), before);
    }

    #[test]
    fn test_merge_ignored_for_unregistered_job() {
        let proj = StatusProjection::new();
        let id = JobId::from("ghost");
        let merged = proj.merge(
            &id,
            JobPatch {
                status: Some(JobStatus::Completed),
                ..Default::default()
            },
        );
        assert!(!merged);
        assert!(proj.get(&id).is_none());
        assert!(proj.is_empty());
    }

    #[test]
    fn test_ensure_does_not_clobber_existing() {
        let proj = StatusProjection::new();
        proj.register(running("J1"));
        proj.ensure(&JobId::from("J1"));
        proj.ensure(&JobId::from("J2"));
        assert_eq!(proj.get(&JobId::from("J1")).unwrap().status, JobStatus::Running);
        assert_eq!(proj.get(&JobId::from("J2")).unwrap().status, JobStatus::Pending);
        assert_eq!(proj.len(), 2);
    }

    #[test]
    fn test_remove_and_snapshot_order() {
        let proj = StatusProjection::new();
        proj.register(running("b"));
        proj.register(running("a"));
        let ids: Vec<String> = proj.snapshot().iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(proj.remove(&JobId::from("a")).is_some());
        assert!(proj.remove(&JobId::from("a")).is_none());
        assert_eq!(proj.len(), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let proj = StatusProjection::new();
        let reader = proj.clone();
        proj.register(running("J1"));
        assert!(reader.get(&JobId::from("J1")).is_some());
    }

    #[test]
    fn test_patch_from_status_message() {
        let msg: InboundMessage = serde_json::from_str(
            r#"{"type":"status_update","job_id":"J1","status":"failed","timestamp":"t"}"#,
        )
        .unwrap();
        let patch = JobPatch::from_message(&msg).unwrap();
        assert_eq!(patch.status, Some(JobStatus::Failed));
        assert!(patch.progress_percentage.is_none());

        let log_msg: InboundMessage =
            serde_json::from_str(r#"{"type":"log_update","job_id":"J1","timestamp":"t"}"#).unwrap();
        assert!(JobPatch::from_message(&log_msg).is_none());
    }
}
