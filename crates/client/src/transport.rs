//! Message-oriented connections underneath the STOMP session.
//!
//! A [`Transport`] opens [`Link`]s; the session never touches sockets
//! directly, which lets tests swap in an in-memory broker.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::TransportError;

/// Everything needed to open one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    /// Extra headers for the upgrade request.
    pub headers: Vec<(String, String)>,
}

impl ConnectRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: ConnectRequest) -> Result<Box<dyn Link>, TransportError>;
}

/// One open connection carrying text messages.
#[async_trait]
pub trait Link: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound text message. `None` once the peer has closed.
    async fn recv_text(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self);
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, request: ConnectRequest) -> Result<Box<dyn Link>, TransportError> {
        let invalid = |reason: String| TransportError::InvalidRequest {
            url: request.url.clone(),
            reason,
        };

        let mut upgrade = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| invalid(e.to_string()))?;
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            upgrade.headers_mut().insert(name, value);
        }

        let (stream, response) = connect_async(upgrade)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        debug!(
            component = "transport",
            event = "transport.websocket.opened",
            url = %request.url,
            status = %response.status(),
            "WebSocket upgraded"
        );

        Ok(Box::new(WebSocketLink { stream }))
    }
}

struct WebSocketLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Link for WebSocketLink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(data)) => {
                    return Some(Ok(String::from_utf8_lossy(&data).into_owned()))
                }
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite itself.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(
                component = "transport",
                event = "transport.websocket.close_failed",
                error = %e,
                "WebSocket close failed"
            );
        }
    }
}
