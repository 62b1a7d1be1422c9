//! Transport seam between the lifecycle driver and the wire.
//!
//! The driver is generic over [`Connect`] so lifecycle behavior can be
//! exercised with an in-memory fake; [`WsConnect`] is the production
//! implementation over tokio-tungstenite, with a reqwest liveness probe for
//! the health-check path.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::close_code::CloseInfo;
use crate::error::ChannelError;

/// Event surfaced by a connected transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound payload, delivered unmodified.
    Message(String),
    /// The transport is gone; carries the recorded close code and reason.
    Closed(CloseInfo),
}

/// Opens transports and probes backend liveness.
pub trait Connect: Send + Sync + 'static {
    type Transport: Transport;

    fn connect(
        &self,
        url: &str,
        subprotocols: &[String],
    ) -> impl Future<Output = Result<Self::Transport, ChannelError>> + Send;

    /// Lightweight liveness probe; true means the backend accepts traffic.
    fn health_check(&self, url: &str) -> impl Future<Output = bool> + Send;
}

/// One live duplex connection. Owned exclusively by the lifecycle driver.
pub trait Transport: Send + 'static {
    fn send_text(&mut self, text: &str) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Next inbound event. Resolves to `Closed` exactly once, after which
    /// the transport must not be used again.
    fn next_event(&mut self) -> impl Future<Output = TransportEvent> + Send;

    /// Close with a normal-closure code. Errors are ignored; the peer may
    /// already be gone.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Production connector: WebSocket over TCP/TLS plus an HTTP health probe.
#[derive(Debug, Clone)]
pub struct WsConnect {
    http: reqwest::Client,
}

impl WsConnect {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for WsConnect {
    fn default() -> Self {
        Self::new()
    }
}

impl Connect for WsConnect {
    type Transport = WsTransport;

    async fn connect(
        &self,
        url: &str,
        subprotocols: &[String],
    ) -> Result<WsTransport, ChannelError> {
        let mut request = url
            .into_client_request()
            .map_err(|err| ChannelError::Handshake(err.to_string()))?;
        if !subprotocols.is_empty() {
            let value = HeaderValue::from_str(&subprotocols.join(", "))
                .map_err(|_| ChannelError::Handshake("invalid subprotocol list".to_string()))?;
            request
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", value);
        }

        let (inner, _response) = connect_async(request)
            .await
            .map_err(|err| ChannelError::Handshake(err.to_string()))?;
        tracing::debug!(url, "websocket connected");
        Ok(WsTransport { inner })
    }

    async fn health_check(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!("health probe request failed: {err}");
                false
            }
        }
    }
}

/// WebSocket transport. Text frames pass through unmodified; binary frames
/// are delivered lossily as UTF-8; pings are answered inline.
#[derive(Debug)]
pub struct WsTransport {
    inner: WsStream,
}

impl Transport for WsTransport {
    async fn send_text(&mut self, text: &str) -> Result<(), ChannelError> {
        self.inner
            .send(Message::Text(text.to_owned()))
            .await
            .map_err(ChannelError::from)
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Message(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return TransportEvent::Message(String::from_utf8_lossy(&bytes).into_owned())
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = self.inner.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    return TransportEvent::Closed(close_info_from_frame(frame))
                }
                Some(Err(err)) => return TransportEvent::Closed(CloseInfo::abnormal(err.to_string())),
                None => return TransportEvent::Closed(CloseInfo::abnormal("stream ended")),
            }
        }
    }

    async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client closed".into(),
        };
        let _ = self.inner.close(Some(frame)).await;
    }
}

fn close_info_from_frame(frame: Option<CloseFrame<'_>>) -> CloseInfo {
    match frame {
        Some(frame) => CloseInfo::new(u16::from(frame.code), frame.reason.into_owned()),
        None => CloseInfo::no_status(),
    }
}
