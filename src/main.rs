use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;

use jobwatch::logging::{log, obj, v_str, Domain, Level};
use jobwatch::projection::JobPatch;
use jobwatch::transport::WsTransport;
use jobwatch::{
    Collaborators, InvalidationSink, JobId, JobStatus, JobWatcher, Notifier, ResourceKey,
    StaticToken, StatusProjection, WatchConfig,
};

struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn success(&self, message: &str) {
        println!("[ok] {}", message);
    }

    fn error(&self, message: &str) {
        println!("[error] {}", message);
    }
}

#[derive(Debug, Deserialize)]
struct JobSnapshot {
    status: Option<JobStatus>,
    progress_percentage: Option<f64>,
    current_stage: Option<String>,
    selected_options: Option<Vec<String>>,
}

/// Pulls job detail from the REST API whenever its key is invalidated and
/// folds the result into the projection.
#[derive(Clone)]
struct RestRefresher {
    client: Client,
    api_base: String,
    token: Option<String>,
    projection: StatusProjection,
}

impl RestRefresher {
    async fn fetch_detail(&self, job_id: &JobId) -> Result<JobSnapshot> {
        let url = format!("{}/api/jobs/{}", self.api_base.trim_end_matches('/'), job_id);
        let mut req = self.client.get(&url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.context("job detail request")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("job detail {}: {}", status, body));
        }
        Ok(resp.json().await?)
    }
}

impl InvalidationSink for RestRefresher {
    fn invalidate(&self, key: &ResourceKey) {
        let ResourceKey::JobDetail(job_id) = key else {
            println!("[stale] {}", key);
            return;
        };
        let this = self.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move {
            match this.fetch_detail(&job_id).await {
                Ok(snap) => {
                    this.projection.merge(
                        &job_id,
                        JobPatch {
                            status: snap.status,
                            progress_percentage: snap.progress_percentage,
                            current_stage: snap.current_stage,
                            selected_options: snap.selected_options,
                        },
                    );
                    if let Some(rec) = this.projection.get(&job_id) {
                        println!(
                            "[job {}] {} {}% {}",
                            rec.id,
                            rec.status,
                            rec.progress_percentage.unwrap_or(0.0),
                            rec.current_stage.as_deref().unwrap_or("-")
                        );
                    }
                }
                Err(err) => log(
                    Level::Warn,
                    Domain::Invalidate,
                    "refetch_failed",
                    obj(&[("job_id", v_str(job_id.as_str())), ("error", v_str(&format!("{:#}", err)))]),
                ),
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let job_ids: Vec<JobId> = std::env::args().skip(1).map(JobId::from).collect();
    if job_ids.is_empty() {
        eprintln!("usage: jobwatch <job_id>...");
        return Err(anyhow!("no job ids given"));
    }

    let cfg = WatchConfig::from_env();
    let projection = StatusProjection::new();
    let refresher = RestRefresher {
        client: Client::new(),
        api_base: cfg.api_base.clone(),
        token: cfg.token.clone(),
        projection: projection.clone(),
    };
    let collab = Collaborators {
        transport: Arc::new(WsTransport),
        credentials: Arc::new(StaticToken(cfg.token.clone())),
        notifier: Arc::new(ConsoleNotifier),
        sink: Arc::new(refresher),
    };

    log(
        Level::Info,
        Domain::System,
        "start",
        obj(&[
            ("ws_base", v_str(&cfg.ws_base)),
            ("jobs", serde_json::json!(job_ids.iter().map(|j| j.as_str()).collect::<Vec<_>>())),
        ]),
    );

    let mut watcher = JobWatcher::new(cfg, projection.clone(), collab);
    for job_id in job_ids {
        watcher.subscribe(job_id).await;
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    watcher.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&projection.to_json())?);
    log(Level::Info, Domain::System, "shutdown", obj(&[]));
    Ok(())
}
