use std::collections::HashMap;

use crate::config::WatchConfig;
use crate::connection::ConnectionState;
use crate::dispatch::HandlerRegistry;
use crate::events::JobId;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::projection::{JobRecord, StatusProjection};
use crate::session::{Collaborators, Subscription};

/// Owns every live subscription; at most one per job.
pub struct JobWatcher {
    config: WatchConfig,
    projection: StatusProjection,
    collab: Collaborators,
    subscriptions: HashMap<JobId, Subscription>,
}

impl JobWatcher {
    pub fn new(config: WatchConfig, projection: StatusProjection, collab: Collaborators) -> Self {
        Self {
            config,
            projection,
            collab,
            subscriptions: HashMap::new(),
        }
    }

    pub fn projection(&self) -> &StatusProjection {
        &self.projection
    }

    /// Start watching `job_id`. An existing subscription for the same job is
    /// closed first, so per-subscription state (replay guard, announced
    /// artifacts, reconnect attempts) starts over.
    ///
    /// A job without a record is seeded as `pending` until its first status
    /// frame arrives; use [`JobWatcher::subscribe_with`] when the status is
    /// already known.
    pub async fn subscribe(&mut self, job_id: JobId) -> HandlerRegistry {
        if let Some(previous) = self.subscriptions.remove(&job_id) {
            log(
                Level::Debug,
                Domain::Connection,
                "resubscribe",
                obj(&[("job_id", v_str(job_id.as_str()))]),
            );
            previous.close().await;
        }
        let sub = Subscription::spawn(
            job_id.clone(),
            self.config.clone(),
            self.projection.clone(),
            self.collab.clone(),
        );
        let handlers = sub.handlers().clone();
        self.subscriptions.insert(job_id, sub);
        handlers
    }

    /// Like `subscribe`, but first stores `record` (e.g. from a REST listing)
    /// so readers never see the `pending` placeholder.
    pub async fn subscribe_with(&mut self, record: JobRecord) -> HandlerRegistry {
        let job_id = record.id.clone();
        self.projection.register(record);
        self.subscribe(job_id).await
    }

    pub async fn unsubscribe(&mut self, job_id: &JobId) -> bool {
        match self.subscriptions.remove(job_id) {
            Some(sub) => {
                sub.close().await;
                true
            }
            None => false,
        }
    }

    /// Unsubscribe and drop the job's record (job deleted).
    pub async fn forget(&mut self, job_id: &JobId) -> Option<JobRecord> {
        self.unsubscribe(job_id).await;
        self.projection.remove(job_id)
    }

    pub fn is_subscribed(&self, job_id: &JobId) -> bool {
        self.subscriptions.contains_key(job_id)
    }

    pub fn state(&self, job_id: &JobId) -> Option<ConnectionState> {
        self.subscriptions.get(job_id).map(|s| s.state())
    }

    pub fn handlers(&self, job_id: &JobId) -> Option<HandlerRegistry> {
        self.subscriptions.get(job_id).map(|s| s.handlers().clone())
    }

    pub fn subscribed(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.subscriptions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn shutdown(&mut self) {
        for (_, sub) in self.subscriptions.drain() {
            sub.close().await;
        }
    }
}
