//! Connection lifecycle as an explicit state machine.
//!
//! The close intent lives inside `Closing`, so every `open()` starts from a
//! state that carries no leftover "don't reconnect" marker.

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::events::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseIntent {
    Intentional,
    Unintentional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing(CloseIntent),
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing(_) => "closing",
            ConnectionState::Closed => "closed",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing(_)
        )
    }
}

#[derive(Debug, Clone)]
pub enum ConnEvent {
    /// Caller asks for a connection and credentials are available.
    Open,
    /// Caller asks for a connection that cannot be attempted (no credential,
    /// unusable endpoint).
    Abandon { reason: String },
    Opened,
    /// Transport-level error. Logged by the caller; the close that follows
    /// is what changes state.
    Error { reason: String },
    /// Transport closed, or a connect attempt failed.
    Closed { reason: Option<String> },
    /// Caller-initiated close.
    CloseRequested,
}

/// What the caller should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stay,
    Connecting,
    Opened,
    Closing,
    Closed(CloseIntent),
    /// Closed without ever attempting a connection.
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct TransitionError {
    pub msg: String,
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub job_id: JobId,
    pub state: ConnectionState,
}

impl Connection {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            state: ConnectionState::Idle,
        }
    }
}

pub fn apply_event(conn: &mut Connection, event: ConnEvent) -> Result<Transition, TransitionError> {
    use ConnectionState::*;
    match (conn.state, event) {
        (Idle | Closed, ConnEvent::Open) => {
            conn.state = Connecting;
            Ok(Transition::Connecting)
        }
        (Idle | Closed, ConnEvent::Abandon { .. }) => {
            conn.state = Closed;
            Ok(Transition::Abandoned)
        }
        (Connecting, ConnEvent::Opened) => {
            conn.state = Open;
            Ok(Transition::Opened)
        }
        (Connecting | Open, ConnEvent::CloseRequested) => {
            conn.state = Closing(CloseIntent::Intentional);
            Ok(Transition::Closing)
        }
        (Connecting | Open, ConnEvent::Closed { .. }) => {
            conn.state = Closed;
            Ok(Transition::Closed(CloseIntent::Unintentional))
        }
        (Closing(intent), ConnEvent::Closed { .. }) => {
            conn.state = Closed;
            Ok(Transition::Closed(intent))
        }
        (Idle | Closed | Closing(_), ConnEvent::CloseRequested) => Ok(Transition::Stay),
        (Idle | Closed, ConnEvent::Closed { .. }) => Ok(Transition::Stay),
        (_, ConnEvent::Error { .. }) => Ok(Transition::Stay),
        (state, ConnEvent::Open) | (state, ConnEvent::Abandon { .. }) => Err(TransitionError {
            msg: format!("open requested while {}", state.as_str()),
        }),
        (state, ConnEvent::Opened) => Err(TransitionError {
            msg: format!("opened while {}", state.as_str()),
        }),
    }
}

/// Supplies the auth token. Asked on every open so a refreshed token is used.
pub trait CredentialSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl CredentialSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone().filter(|t| !t.is_empty())
    }
}

/// `{ws|wss}://{host}/ws/jobs/{job_id}?token={token}`; `http(s)` bases map to `ws(s)`.
pub fn connection_url(base: &str, job_id: &JobId, token: &str) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("invalid ws base {}", base))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(anyhow!("unsupported scheme {}", other)),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot use scheme {} for {}", scheme, base))?;
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|_| anyhow!("ws base cannot carry a path: {}", base))?
        .pop_if_empty()
        .extend(["ws", "jobs", job_id.as_str()]);
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// URL with the query stripped, for logs.
pub fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        Connection::new(JobId::from("J1"))
    }

    #[test]
    fn test_happy_path_then_unintentional_close() {
        let mut c = conn();
        assert_eq!(apply_event(&mut c, ConnEvent::Open).unwrap(), Transition::Connecting);
        assert_eq!(apply_event(&mut c, ConnEvent::Opened).unwrap(), Transition::Opened);
        assert_eq!(c.state, ConnectionState::Open);
        let t = apply_event(&mut c, ConnEvent::Error { reason: "reset".into() }).unwrap();
        assert_eq!(t, Transition::Stay);
        assert_eq!(c.state, ConnectionState::Open);
        let t = apply_event(&mut c, ConnEvent::Closed { reason: None }).unwrap();
        assert_eq!(t, Transition::Closed(CloseIntent::Unintentional));
        assert_eq!(c.state, ConnectionState::Closed);
    }

    #[test]
    fn test_intentional_close_then_reopen_is_clean() {
        let mut c = conn();
        apply_event(&mut c, ConnEvent::Open).unwrap();
        apply_event(&mut c, ConnEvent::Opened).unwrap();
        apply_event(&mut c, ConnEvent::CloseRequested).unwrap();
        assert_eq!(c.state, ConnectionState::Closing(CloseIntent::Intentional));
        let t = apply_event(&mut c, ConnEvent::Closed { reason: None }).unwrap();
        assert_eq!(t, Transition::Closed(CloseIntent::Intentional));

        // Next open starts fresh; a later drop is unintentional again.
        apply_event(&mut c, ConnEvent::Open).unwrap();
        apply_event(&mut c, ConnEvent::Opened).unwrap();
        let t = apply_event(&mut c, ConnEvent::Closed { reason: None }).unwrap();
        assert_eq!(t, Transition::Closed(CloseIntent::Unintentional));
    }

    #[test]
    fn test_missing_credentials_goes_closed_without_connecting() {
        let mut c = conn();
        let t = apply_event(&mut c, ConnEvent::Abandon { reason: "no token".into() }).unwrap();
        assert_eq!(t, Transition::Abandoned);
        assert_eq!(c.state, ConnectionState::Closed);
    }

    #[test]
    fn test_failed_connect_counts_as_unintentional_close() {
        let mut c = conn();
        apply_event(&mut c, ConnEvent::Open).unwrap();
        let t = apply_event(&mut c, ConnEvent::Closed { reason: Some("refused".into()) }).unwrap();
        assert_eq!(t, Transition::Closed(CloseIntent::Unintentional));
    }

    #[test]
    fn test_second_open_while_live_is_rejected() {
        let mut c = conn();
        apply_event(&mut c, ConnEvent::Open).unwrap();
        assert!(apply_event(&mut c, ConnEvent::Open).is_err());
        apply_event(&mut c, ConnEvent::Opened).unwrap();
        assert!(apply_event(&mut c, ConnEvent::Open).is_err());
        assert!(apply_event(&mut c, ConnEvent::Opened).is_err());
        assert!(c.state.is_live());
    }

    #[test]
    fn test_connection_url_shapes() {
        let id = JobId::from("J 1");
        let url = connection_url("https://api.example.com", &id, "a b&c").unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/ws/jobs/J%201");
        assert_eq!(url.query(), Some("token=a+b%26c"));
        assert_eq!(redacted(&url), "wss://api.example.com/ws/jobs/J%201");

        let url = connection_url("http://localhost:8000/", &JobId::from(7u64), "t").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/jobs/7?token=t");

        assert!(connection_url("ftp://x", &id, "t").is_err());
    }
}
