//! Transport seams used by the [`SubscriptionManager`](super::subscription_manager::SubscriptionManager).
//!
//! A [`Connector`] opens one [`Transport`] per connection attempt, a
//! [`TokenProvider`] supplies the bearer credential for that attempt. The
//! production pair is [`WebSocketConnector`] over tokio-tungstenite; tests plug
//! in an in-memory connector.

use futures::{SinkExt, StreamExt, future::BoxFuture};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};
use tracing::debug;

/// Failures of a single connection or frame exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket level failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// The bearer token cannot be carried in an HTTP header.
    #[error("bearer token is not a valid header value")]
    InvalidCredential,
    /// Connecting took longer than the configured timeout.
    #[error("connection attempt timed out")]
    Timeout,
    /// The peer sent something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The connection is closed.
    #[error("connection closed")]
    Closed,
}

/// One established, bidirectional text-frame connection.
///
/// `recv` must be cancel safe: it is raced against other events.
pub trait Transport: Send {
    /// Send one text frame.
    fn send(&mut self, frame: String) -> BoxFuture<'_, Result<(), TransportError>>;
    /// Next text frame, `None` once the peer closed the connection.
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<String, TransportError>>>;
    /// Close the connection.
    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Factory for transports, one call per connection attempt.
pub trait Connector: Send + Sync {
    /// Open a connection, presenting `token` as bearer credential when present.
    fn connect(
        &self,
        token: Option<String>,
    ) -> BoxFuture<'static, Result<Box<dyn Transport>, TransportError>>;
}

/// Supplies the credential used when a connection is opened.
///
/// Only consulted at connect time; refreshing an expired token is up to the implementor.
pub trait TokenProvider: Send + Sync {
    /// Current bearer token, if any.
    fn bearer_token(&self) -> BoxFuture<'static, Option<String>>;
}

/// Token provider returning a fixed value.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl TokenProvider for StaticToken {
    fn bearer_token(&self) -> BoxFuture<'static, Option<String>> {
        let token = self.0.clone();
        Box::pin(async move { token })
    }
}

/// Connector opening WebSocket connections to a relay.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Connector for the relay at `url` (`ws://` only).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WebSocketConnector {
    fn connect(
        &self,
        token: Option<String>,
    ) -> BoxFuture<'static, Result<Box<dyn Transport>, TransportError>> {
        let url = self.url.clone();
        Box::pin(async move {
            let mut request = url.as_str().into_client_request()?;
            if let Some(token) = token {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| TransportError::InvalidCredential)?;
                request.headers_mut().insert(AUTHORIZATION, value);
            }

            let (stream, response) = connect_async(request).await?;
            debug!(url = %url, status = %response.status(), "websocket handshake completed");
            Ok::<_, TransportError>(Box::new(WebSocketTransport { stream }) as Box<dyn Transport>)
        })
    }
}

/// [`Transport`] over a tokio-tungstenite stream.
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Transport for WebSocketTransport {
    fn send(&mut self, frame: String) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.stream.send(Message::Text(frame.into())).await?;
            Ok::<_, TransportError>(())
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<Result<String, TransportError>>> {
        Box::pin(async move {
            loop {
                let Some(message) = self.stream.next().await else {
                    return None;
                };
                match message {
                    Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(_)) => {
                        return Some(Err(TransportError::Protocol(
                            "binary frames are not supported".into(),
                        )));
                    }
                    Ok(Message::Close(_)) => return None,
                    // Pings are answered by tungstenite on the next read or write.
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                    Err(err) => return Some(Err(TransportError::from(err))),
                }
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.stream.close(None).await?;
            Ok::<_, TransportError>(())
        })
    }
}
