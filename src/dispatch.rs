//! Frame classification and handler fan-out.

use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::events::InboundMessage;
use crate::logging::{agg_increment, log, obj, v_str, Domain, Level};

pub const PING: &str = "ping";
pub const PONG: &str = "pong";

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Keepalive,
    Message(InboundMessage),
    Malformed(String),
}

/// Keepalive tokens are matched literally and never reach the JSON parser.
pub fn parse_frame(text: &str) -> Frame {
    if text == PING || text == PONG {
        return Frame::Keepalive;
    }
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(msg) => Frame::Message(msg),
        Err(err) => Frame::Malformed(err.to_string()),
    }
}

pub type Handler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Listeners observing one subscription's message stream.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(HandlerId, Handler)>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut list) = self.inner.handlers.lock() {
            list.push((id, Arc::new(handler)));
        }
        id
    }

    pub fn remove(&self, id: HandlerId) -> bool {
        match self.inner.handlers.lock() {
            Ok(mut list) => {
                let before = list.len();
                list.retain(|(hid, _)| *hid != id);
                list.len() != before
            }
            Err(_) => false,
        }
    }

    pub fn clear(&self) {
        if let Ok(mut list) = self.inner.handlers.lock() {
            list.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.handlers.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls every registered handler once, in registration order. The list
    /// is snapshotted first so handlers may add or remove listeners.
    pub fn dispatch(&self, msg: &InboundMessage) -> usize {
        let snapshot: Vec<Handler> = match self.inner.handlers.lock() {
            Ok(list) => list.iter().map(|(_, h)| h.clone()).collect(),
            Err(_) => return 0,
        };
        for handler in &snapshot {
            handler(msg);
        }
        snapshot.len()
    }
}

/// Parse a frame and report anything that is not a message. Returns the
/// message when there is one to route.
pub fn classify(job_id: &str, text: &str) -> Option<InboundMessage> {
    agg_increment("frame");
    match parse_frame(text) {
        Frame::Keepalive => {
            agg_increment("keepalive");
            None
        }
        Frame::Message(msg) => Some(msg),
        Frame::Malformed(err) => {
            agg_increment("malformed");
            let preview: String = text.chars().take(120).collect();
            log(
                Level::Warn,
                Domain::Dispatch,
                "malformed_frame",
                obj(&[
                    ("job_id", v_str(job_id)),
                    ("error", v_str(&err)),
                    ("frame", v_str(&preview)),
                    ("len", json!(text.len())),
                ]),
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn status_msg() -> InboundMessage {
        serde_json::from_str(
            r#"{"type":"status_update","job_id":"J1","status":"running","timestamp":"t"}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_keepalive_tokens_are_not_parsed() {
        assert_eq!(parse_frame("ping"), Frame::Keepalive);
        assert_eq!(parse_frame("pong"), Frame::Keepalive);
        assert!(matches!(parse_frame("\"ping\""), Frame::Malformed(_)));
        assert!(matches!(parse_frame("PING"), Frame::Malformed(_)));
        assert!(matches!(parse_frame("{not json"), Frame::Malformed(_)));
        assert!(classify("J1", "ping").is_none());
        assert!(classify("J1", "garbage").is_none());
    }

    #[test]
    fn test_every_handler_sees_each_message_once() {
        let registry = HandlerRegistry::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let a2 = a.clone();
        let b2 = b.clone();
        registry.add(move |_| {
            a2.fetch_add(1, Ordering::SeqCst);
        });
        let hb = registry.add(move |_| {
            b2.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.dispatch(&status_msg()), 2);
        assert!(registry.remove(hb));
        assert!(!registry.remove(hb));
        assert_eq!(registry.dispatch(&status_msg()), 1);

        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_remove_itself_during_dispatch() {
        let registry = HandlerRegistry::new();
        let slot: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));
        let reg = registry.clone();
        let slot2 = slot.clone();
        let id = registry.add(move |_| {
            if let Some(id) = *slot2.lock().unwrap() {
                reg.remove(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        registry.dispatch(&status_msg());
        assert!(registry.is_empty());
    }
}
