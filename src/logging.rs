//! Structured logging for the job status sync core.
//!
//! Design goals:
//! 1. Multi-level granularity (TRACE → FATAL)
//! 2. Domain-specific categories for filtering
//! 3. One JSON object per line, ordered by a process-wide sequence number
//! 4. Credentials never reach a log line
//! 5. Periodic counters instead of per-frame noise

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Connection, // Socket lifecycle, heartbeat, reconnects
    Dispatch,   // Frame parsing, handler fan-out
    Projection, // Job record cache
    Notify,     // User-facing notifications
    Invalidate, // Debounced refresh signals
    System,     // Startup, shutdown, stats
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Connection => "connection",
            Domain::Dispatch => "dispatch",
            Domain::Projection => "projection",
            Domain::Notify => "notify",
            Domain::Invalidate => "invalidate",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // Check LOG_DOMAINS env var (comma-separated list or "all")
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Sequence counter for ordering
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    files: Option<RunFiles>,
}

/// Per-run JSONL files under `<dir>/<run_id>/`.
#[derive(Debug)]
pub struct RunFiles {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

impl RunFiles {
    pub fn open(base: &Path, run_id: &str) -> io::Result<Self> {
        let mut run_dir = PathBuf::from(base);
        run_dir.push(run_id);
        create_dir_all(&run_dir)?;
        std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        )?;
        let open = |name: &str| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(run_dir.join(name))
        };
        Ok(Self {
            events: Mutex::new(BufWriter::new(open("events.jsonl")?)),
            trace: Mutex::new(BufWriter::new(open("trace.jsonl")?)),
        })
    }

    fn write(&self, level: Level, line: &str) {
        match level {
            Level::Trace | Level::Debug => write_line(&self.trace, line),
            _ => write_line(&self.events, line),
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let files = std::env::var("LOG_DIR").ok().and_then(|base| {
            RunFiles::open(Path::new(&base), &run_id)
                .map_err(|err| eprintln!("[log] failed to open run files: {}", err))
                .ok()
        });
        RunContext { run_id, files }
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["authorization", "Authorization", "token", "credential"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["job_id", "handler_id", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }

    let ctx = ensure_run_context();
    let line = render_record(&ctx.run_id, level, domain, event, fields);
    if let Some(files) = &ctx.files {
        files.write(level, &line);
    }
    eprintln!("{}", line);
}

fn render_record(
    run_id: &str,
    level: Level,
    domain: Domain,
    event: &str,
    fields: Map<String, Value>,
) -> String {
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(run_id));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(domain.as_str()));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));
    Value::Object(entry).to_string()
}

// =============================================================================
// Field helpers
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Counter aggregator for periodic session stats
// =============================================================================

static AGGREGATOR: OnceLock<Mutex<LogAggregator>> = OnceLock::new();

fn get_aggregator() -> &'static Mutex<LogAggregator> {
    AGGREGATOR.get_or_init(|| Mutex::new(LogAggregator::new()))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u64,
    pub keepalives: u64,
    pub malformed: u64,
    pub reconnects: u64,
    pub notifications: u64,
    pub invalidations: u64,
}

struct LogAggregator {
    stats: SessionStats,
    last_flush: Instant,
    flush_interval_secs: u64,
}

impl LogAggregator {
    fn new() -> Self {
        Self {
            stats: SessionStats::default(),
            last_flush: Instant::now(),
            flush_interval_secs: std::env::var("STATS_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        }
    }

    fn increment(&mut self, event: &str) {
        match event {
            "frame" => self.stats.frames += 1,
            "keepalive" => self.stats.keepalives += 1,
            "malformed" => self.stats.malformed += 1,
            "reconnect" => self.stats.reconnects += 1,
            "notification" => self.stats.notifications += 1,
            "invalidation" => self.stats.invalidations += 1,
            _ => {}
        }
    }

    fn maybe_flush(&mut self) -> Option<SessionStats> {
        if self.last_flush.elapsed().as_secs() >= self.flush_interval_secs {
            let result = std::mem::take(&mut self.stats);
            self.last_flush = Instant::now();
            Some(result)
        } else {
            None
        }
    }
}

/// Call periodically to emit aggregated stats
pub fn tick_aggregator() {
    if let Ok(mut agg) = get_aggregator().lock() {
        if let Some(stats) = agg.maybe_flush() {
            log(
                Level::Info,
                Domain::System,
                "aggregated_stats",
                obj(&[
                    ("frames", json!(stats.frames)),
                    ("keepalives", json!(stats.keepalives)),
                    ("malformed", json!(stats.malformed)),
                    ("reconnects", json!(stats.reconnects)),
                    ("notifications", json!(stats.notifications)),
                    ("invalidations", json!(stats.invalidations)),
                ]),
            );
        }
    }
}

/// Increment a counter in the aggregator
pub fn agg_increment(event: &str) {
    if let Ok(mut agg) = get_aggregator().lock() {
        agg.increment(event);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }

    #[test]
    fn test_token_is_redacted() {
        let line = render_record(
            "r-test",
            Level::Info,
            Domain::Connection,
            "open",
            obj(&[("token", v_str("secret-abc")), ("job_id", v_str("J1"))]),
        );
        assert!(!line.contains("secret-abc"));
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["job_id"], "J1");
        assert_eq!(parsed["data"]["token"], "[REDACTED]");
        assert_eq!(parsed["component"], "connection");
        assert_eq!(parsed["lvl"], "INFO");
    }

    #[test]
    fn test_run_files_split_by_level() {
        let dir = tempfile::tempdir().unwrap();
        let files = RunFiles::open(dir.path(), "r-files").unwrap();
        files.write(Level::Debug, "{\"a\":1}");
        files.write(Level::Warn, "{\"b\":2}");

        let run_dir = dir.path().join("r-files");
        let trace = std::fs::read_to_string(run_dir.join("trace.jsonl")).unwrap();
        let events = std::fs::read_to_string(run_dir.join("events.jsonl")).unwrap();
        assert_eq!(trace.trim(), "{\"a\":1}");
        assert_eq!(events.trim(), "{\"b\":2}");
        assert!(run_dir.join("manifest.json").exists());
    }

    #[test]
    fn test_aggregator_counts_known_events_only() {
        let mut agg = LogAggregator::new();
        agg.increment("frame");
        agg.increment("frame");
        agg.increment("keepalive");
        agg.increment("bogus");
        assert_eq!(agg.stats.frames, 2);
        assert_eq!(agg.stats.keepalives, 1);
        agg.flush_interval_secs = 0;
        let flushed = agg.maybe_flush().unwrap();
        assert_eq!(flushed.frames, 2);
        assert_eq!(agg.stats, SessionStats::default());
    }
}
