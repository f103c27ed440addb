use anyhow::Result;
use async_trait::async_trait;
use url::Url;

mod ws;

pub use ws::WsTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Error(String),
    Closed(Option<String>),
}

#[async_trait]
pub trait Socket: Send {
    async fn send_text(&mut self, text: &str) -> Result<()>;
    /// Next inbound event, `Closed` once the peer is gone. Must be cancel safe:
    /// the session polls it inside `select!`.
    async fn next_event(&mut self) -> TransportEvent;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Socket>>;
}
