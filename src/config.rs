use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Base of the push endpoint; `http(s)` is mapped to `ws(s)`.
    pub ws_base: String,
    /// Base of the REST boundary used by the CLI refresher.
    pub api_base: String,
    pub token: Option<String>,
    pub heartbeat_secs: u64,
    pub connect_timeout_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_attempts: u32,
    pub reconnect_jitter: f64,
    pub status_debounce_ms: u64,
    pub log_debounce_ms: u64,
    pub stats_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            ws_base: "ws://127.0.0.1:8000".to_string(),
            api_base: "http://127.0.0.1:8000".to_string(),
            token: None,
            heartbeat_secs: 30,
            connect_timeout_ms: 10_000,
            reconnect_base_ms: 1000,
            reconnect_max_attempts: 5,
            reconnect_jitter: 0.0,
            status_debounce_ms: 100,
            log_debounce_ms: 300,
            stats_secs: 300,
        }
    }
}

impl WatchConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            ws_base: std::env::var("JOBWATCH_WS_BASE").unwrap_or(d.ws_base),
            api_base: std::env::var("JOBWATCH_API_BASE").unwrap_or(d.api_base),
            token: std::env::var("JOBWATCH_TOKEN").ok().filter(|t| !t.is_empty()),
            heartbeat_secs: std::env::var("HEARTBEAT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.heartbeat_secs),
            connect_timeout_ms: std::env::var("CONNECT_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.connect_timeout_ms),
            reconnect_base_ms: std::env::var("RECONNECT_BASE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.reconnect_base_ms),
            reconnect_max_attempts: std::env::var("RECONNECT_MAX_ATTEMPTS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.reconnect_max_attempts),
            reconnect_jitter: std::env::var("RECONNECT_JITTER").ok().and_then(|v| v.parse().ok()).unwrap_or(d.reconnect_jitter),
            status_debounce_ms: std::env::var("STATUS_DEBOUNCE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.status_debounce_ms),
            log_debounce_ms: std::env::var("LOG_DEBOUNCE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.log_debounce_ms),
            stats_secs: std::env::var("STATS_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.stats_secs),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn status_delay(&self) -> Duration {
        Duration::from_millis(self.status_debounce_ms)
    }

    pub fn log_delay(&self) -> Duration {
        Duration::from_millis(self.log_debounce_ms)
    }
}
