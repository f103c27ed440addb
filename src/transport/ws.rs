use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{Socket, Transport, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Socket>> {
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .context("websocket connect")?;
        Ok(Box::new(WsSocket {
            inner: ws,
            failed: None,
        }))
    }
}

struct WsSocket {
    inner: WsStream,
    // Set once the stream yields an error; the next poll reports the close.
    failed: Option<String>,
}

#[async_trait]
impl Socket for WsSocket {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.inner
            .send(Message::Text(text.to_string()))
            .await
            .context("websocket send")
    }

    async fn next_event(&mut self) -> TransportEvent {
        if let Some(reason) = &self.failed {
            return TransportEvent::Closed(Some(reason.clone()));
        }
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Text(text),
                Some(Ok(Message::Close(frame))) => {
                    return TransportEvent::Closed(
                        frame.map(|f| format!("{} {}", u16::from(f.code), f.reason)),
                    )
                }
                // Binary frames carry nothing for us; control frames are
                // answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    let reason = err.to_string();
                    self.failed = Some(reason.clone());
                    return TransportEvent::Error(reason);
                }
                None => return TransportEvent::Closed(None),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close(None).await.context("websocket close")
    }
}
