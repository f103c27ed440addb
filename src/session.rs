//! One task per subscribed job.
//!
//! Socket events, heartbeat, reconnect timer, debounce deadlines and control
//! commands are multiplexed on a single task, so none of the per-subscription
//! state needs a lock. Closing a subscription awaits the task; nothing it owns
//! can fire afterwards.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, sleep_until, timeout, Instant, MissedTickBehavior};

use crate::config::WatchConfig;
use crate::connection::{
    apply_event, connection_url, redacted, CloseIntent, ConnEvent, Connection, ConnectionState,
    CredentialSource, Transition,
};
use crate::dispatch::{classify, HandlerRegistry, PING};
use crate::events::{InboundMessage, JobId};
use crate::invalidation::{plan_for, Delays, InvalidationPlan, InvalidationSink, ResourceKey};
use crate::logging::{agg_increment, log, obj, tick_aggregator, v_str, Domain, Level};
use crate::notify::{deliver, NotificationCoalescer, Notifier};
use crate::projection::{JobPatch, StatusProjection};
use crate::reconnect::ReconnectPolicy;
use crate::scheduler::CoalescingScheduler;
use crate::transport::{Socket, Transport, TransportEvent};

/// External collaborators shared by every subscription.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub credentials: Arc<dyn CredentialSource>,
    pub notifier: Arc<dyn Notifier>,
    pub sink: Arc<dyn InvalidationSink>,
}

#[derive(Debug)]
enum Command {
    Close,
}

/// Handle to a running subscription.
pub struct Subscription {
    job_id: JobId,
    handlers: HandlerRegistry,
    state: watch::Receiver<ConnectionState>,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Registers the job in the projection (if absent) and starts its session.
    pub fn spawn(
        job_id: JobId,
        config: WatchConfig,
        projection: StatusProjection,
        collab: Collaborators,
    ) -> Self {
        projection.ensure(&job_id);
        let handlers = HandlerRegistry::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);

        let session = Session {
            conn: Connection::new(job_id.clone()),
            delays: Delays {
                status: config.status_delay(),
                logs: config.log_delay(),
            },
            reconnect: ReconnectPolicy::from_config(&config),
            config,
            projection,
            collab,
            handlers: handlers.clone(),
            coalescer: NotificationCoalescer::new(),
            scheduler: CoalescingScheduler::new(),
            state_tx,
            commands: cmd_rx,
        };
        let task = tokio::spawn(session.run());

        log(
            Level::Info,
            Domain::Connection,
            "subscribed",
            obj(&[("job_id", v_str(job_id.as_str()))]),
        );
        Self {
            job_id,
            handlers,
            state: state_rx,
            commands: cmd_tx,
            task,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Listener registry for this subscription's message stream.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Caller-initiated close. Returns once the session task has finished:
    /// pending invalidations are dropped and handlers released.
    pub async fn close(self) {
        let _ = self.commands.send(Command::Close).await;
        if let Err(err) = self.task.await {
            log(
                Level::Error,
                Domain::Connection,
                "session_join_failed",
                obj(&[
                    ("job_id", v_str(self.job_id.as_str())),
                    ("error", v_str(&err.to_string())),
                ]),
            );
        }
    }
}

enum OpenOutcome {
    Opened(Box<dyn Socket>),
    Failed,
    Abandoned,
}

struct Session {
    conn: Connection,
    config: WatchConfig,
    delays: Delays,
    projection: StatusProjection,
    collab: Collaborators,
    handlers: HandlerRegistry,
    reconnect: ReconnectPolicy,
    coalescer: NotificationCoalescer,
    scheduler: CoalescingScheduler<ResourceKey>,
    state_tx: watch::Sender<ConnectionState>,
    commands: mpsc::Receiver<Command>,
}

async fn next_event(socket: &mut Option<Box<dyn Socket>>) -> TransportEvent {
    match socket {
        Some(s) => s.next_event().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Session {
    async fn run(mut self) {
        let mut socket: Option<Box<dyn Socket>> = None;
        let mut retry_at: Option<Instant> = None;
        match self.open().await {
            OpenOutcome::Opened(s) => socket = Some(s),
            OpenOutcome::Failed => retry_at = self.schedule_reconnect(),
            OpenOutcome::Abandoned => {}
        }

        let every = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + every, every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = interval(Duration::from_secs(self.config.stats_secs.max(1)));

        loop {
            let deadline = self.scheduler.next_deadline();
            tokio::select! {
                // Close wins over queued frames and due timers.
                biased;
                _ = self.commands.recv() => {
                    // An explicit close and a dropped handle mean the same.
                    self.shutdown(socket.take()).await;
                    break;
                }
                event = next_event(&mut socket) => match event {
                    TransportEvent::Text(text) => self.on_text(&text),
                    TransportEvent::Error(reason) => {
                        log(
                            Level::Warn,
                            Domain::Connection,
                            "transport_error",
                            obj(&[("job_id", v_str(self.conn.job_id.as_str())), ("error", v_str(&reason))]),
                        );
                        self.transition(ConnEvent::Error { reason });
                    }
                    TransportEvent::Closed(reason) => {
                        socket = None;
                        log(
                            Level::Info,
                            Domain::Connection,
                            "closed",
                            obj(&[
                                ("job_id", v_str(self.conn.job_id.as_str())),
                                ("reason", reason.as_deref().map(v_str).unwrap_or(serde_json::Value::Null)),
                            ]),
                        );
                        if let Some(Transition::Closed(CloseIntent::Unintentional)) =
                            self.transition(ConnEvent::Closed { reason })
                        {
                            retry_at = self.schedule_reconnect();
                        }
                    }
                },
                _ = sleep_until_opt(retry_at) => {
                    retry_at = None;
                    agg_increment("reconnect");
                    match self.open().await {
                        OpenOutcome::Opened(s) => {
                            socket = Some(s);
                            heartbeat.reset();
                        }
                        OpenOutcome::Failed => retry_at = self.schedule_reconnect(),
                        OpenOutcome::Abandoned => {}
                    }
                }
                _ = heartbeat.tick(), if socket.is_some() => {
                    if let Some(s) = socket.as_mut() {
                        match timeout(self.config.connect_timeout(), s.send_text(PING)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => log(
                                Level::Debug,
                                Domain::Connection,
                                "heartbeat_failed",
                                obj(&[("job_id", v_str(self.conn.job_id.as_str())), ("error", v_str(&err.to_string()))]),
                            ),
                            Err(_) => log(
                                Level::Warn,
                                Domain::Connection,
                                "heartbeat_timeout",
                                obj(&[("job_id", v_str(self.conn.job_id.as_str()))]),
                            ),
                        }
                    }
                }
                _ = sleep_until_opt(deadline) => self.flush_due(),
                _ = stats.tick() => tick_aggregator(),
            }
        }
    }

    fn transition(&mut self, event: ConnEvent) -> Option<Transition> {
        match apply_event(&mut self.conn, event) {
            Ok(t) => {
                self.state_tx.send_replace(self.conn.state);
                Some(t)
            }
            Err(err) => {
                log(
                    Level::Error,
                    Domain::Connection,
                    "invalid_transition",
                    obj(&[("job_id", v_str(self.conn.job_id.as_str())), ("error", v_str(&err.msg))]),
                );
                None
            }
        }
    }

    async fn open(&mut self) -> OpenOutcome {
        let job = self.conn.job_id.clone();
        let Some(token) = self.collab.credentials.token() else {
            self.transition(ConnEvent::Abandon { reason: "no credentials".to_string() });
            log(
                Level::Info,
                Domain::Connection,
                "no_credentials",
                obj(&[("job_id", v_str(job.as_str()))]),
            );
            return OpenOutcome::Abandoned;
        };
        let url = match connection_url(&self.config.ws_base, &job, &token) {
            Ok(url) => url,
            Err(err) => {
                log(
                    Level::Error,
                    Domain::Connection,
                    "bad_endpoint",
                    obj(&[("job_id", v_str(job.as_str())), ("error", v_str(&format!("{:#}", err)))]),
                );
                self.transition(ConnEvent::Abandon { reason: err.to_string() });
                return OpenOutcome::Abandoned;
            }
        };

        self.transition(ConnEvent::Open);
        log(
            Level::Info,
            Domain::Connection,
            "connecting",
            obj(&[
                ("job_id", v_str(job.as_str())),
                ("url", v_str(&redacted(&url))),
                ("attempt", json!(self.reconnect.attempts())),
            ]),
        );

        let result = timeout(self.config.connect_timeout(), self.collab.transport.connect(&url)).await;
        let reason = match result {
            Ok(Ok(socket)) => {
                self.transition(ConnEvent::Opened);
                self.reconnect.reset();
                log(Level::Info, Domain::Connection, "open", obj(&[("job_id", v_str(job.as_str()))]));
                return OpenOutcome::Opened(socket);
            }
            Ok(Err(err)) => format!("{:#}", err),
            Err(_) => "connect timeout".to_string(),
        };
        log(
            Level::Warn,
            Domain::Connection,
            "connect_failed",
            obj(&[("job_id", v_str(job.as_str())), ("error", v_str(&reason))]),
        );
        self.transition(ConnEvent::Closed { reason: Some(reason) });
        OpenOutcome::Failed
    }

    fn schedule_reconnect(&mut self) -> Option<Instant> {
        let job = self.conn.job_id.as_str();
        match self.reconnect.next_delay() {
            Some(delay) => {
                log(
                    Level::Info,
                    Domain::Connection,
                    "reconnect_scheduled",
                    obj(&[
                        ("job_id", v_str(job)),
                        ("attempt", json!(self.reconnect.attempts())),
                        ("delay_ms", json!(delay.as_millis() as u64)),
                    ]),
                );
                Some(Instant::now() + delay)
            }
            None => {
                log(
                    Level::Info,
                    Domain::Connection,
                    "reconnect_exhausted",
                    obj(&[("job_id", v_str(job)), ("attempts", json!(self.reconnect.attempts()))]),
                );
                None
            }
        }
    }

    fn on_text(&mut self, text: &str) {
        let Some(msg) = classify(self.conn.job_id.as_str(), text) else {
            return;
        };
        if msg.job_id() != &self.conn.job_id {
            log(
                Level::Warn,
                Domain::Dispatch,
                "foreign_job",
                obj(&[
                    ("job_id", v_str(self.conn.job_id.as_str())),
                    ("message_job_id", v_str(msg.job_id().as_str())),
                    ("type", v_str(msg.kind())),
                ]),
            );
            return;
        }
        self.apply_message(msg);
    }

    fn apply_message(&mut self, msg: InboundMessage) {
        if let Some(patch) = JobPatch::from_message(&msg) {
            self.projection.merge(msg.job_id(), patch);
        }

        self.handlers.dispatch(&msg);

        if let Some(note) = self.coalescer.observe(&msg) {
            agg_increment("notification");
            log(
                Level::Info,
                Domain::Notify,
                "notification",
                obj(&[
                    ("job_id", v_str(note.job_id.as_str())),
                    ("severity", v_str(&format!("{:?}", note.severity).to_lowercase())),
                    ("msg", v_str(&note.message)),
                ]),
            );
            deliver(self.collab.notifier.as_ref(), &note);
        }

        match plan_for(&msg, &self.delays) {
            InvalidationPlan::Immediate(keys) => {
                for key in keys {
                    self.scheduler.cancel(&key);
                    self.emit(&key);
                }
            }
            InvalidationPlan::Debounce(keys, delay) => {
                for key in keys {
                    self.scheduler.schedule(key, delay);
                }
            }
        }
    }

    fn flush_due(&mut self) {
        for key in self.scheduler.take_due(Instant::now()) {
            self.emit(&key);
        }
    }

    fn emit(&self, key: &ResourceKey) {
        agg_increment("invalidation");
        log(
            Level::Debug,
            Domain::Invalidate,
            "invalidate",
            obj(&[("job_id", v_str(self.conn.job_id.as_str())), ("key", v_str(&key.to_string()))]),
        );
        self.collab.sink.invalidate(key);
    }

    async fn shutdown(&mut self, socket: Option<Box<dyn Socket>>) {
        let dropped = self.scheduler.cancel_all();
        self.handlers.clear();
        self.coalescer.reset();

        if let Some(mut s) = socket {
            self.transition(ConnEvent::CloseRequested);
            match timeout(self.config.connect_timeout(), s.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => log(
                    Level::Debug,
                    Domain::Connection,
                    "close_failed",
                    obj(&[("job_id", v_str(self.conn.job_id.as_str())), ("error", v_str(&format!("{:#}", err)))]),
                ),
                Err(_) => log(
                    Level::Debug,
                    Domain::Connection,
                    "close_timeout",
                    obj(&[("job_id", v_str(self.conn.job_id.as_str()))]),
                ),
            }
            self.transition(ConnEvent::Closed { reason: None });
        }

        log(
            Level::Info,
            Domain::Connection,
            "unsubscribed",
            obj(&[
                ("job_id", v_str(self.conn.job_id.as_str())),
                ("dropped_invalidations", json!(dropped)),
            ]),
        );
    }
}
