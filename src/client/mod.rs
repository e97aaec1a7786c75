use futures_util::{FutureExt, SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: WsError,
    },
    #[error("websocket error: {0}")]
    Ws(#[from] WsError),
    #[error("connection closed")]
    Closed,
}

/// What the connection reported since the last poll
#[derive(Debug)]
pub enum TransportEvent {
    Text(String),
    Error(TransportError),
    /// Terminal: the connection keeps reporting `Closed` from here on
    Closed,
}

/// Opens connections to the analysis service.
///
/// `connect` takes `&self` so a handshake can be in flight while the
/// session keeps servicing timers.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Conn: Connection;

    async fn connect(&self, endpoint: String) -> Result<Self::Conn, TransportError>;
}

/// One live bidirectional text channel
#[allow(async_fn_in_trait)]
pub trait Connection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Must be cancel safe: the session polls it inside `select!`.
    async fn next_event(&mut self) -> TransportEvent;

    async fn close(&mut self);

    /// Synchronous release for drop paths, where `close` cannot be awaited.
    /// Best effort on the handshake. The channel must be unusable afterwards.
    fn abort(&mut self);
}

/// Plain websocket client
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Conn = WsConnection;

    async fn connect(&self, endpoint: String) -> Result<WsConnection, TransportError> {
        match connect_async(endpoint.clone()).await {
            Ok((ws, _response)) => Ok(WsConnection {
                ws,
                failed: false,
                closed: false,
            }),
            Err(source) => Err(TransportError::Connect { endpoint, source }),
        }
    }
}

pub struct WsConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    failed: bool,
    closed: bool,
}

impl Connection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.ws.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        // An error is always followed by a close, same as a browser socket
        if self.closed || self.failed {
            self.closed = true;
            return TransportEvent::Closed;
        }

        loop {
            match self.ws.next().await {
                Some(Ok(WsMessage::Text(text))) => return TransportEvent::Text(text),
                Some(Ok(WsMessage::Close(frame))) => {
                    tracing::debug!(?frame, "Remote closed the connection");
                    // tungstenite only queues the close reply; push it out
                    // before the connection is dropped
                    if let Err(e) = self.ws.flush().await {
                        tracing::debug!(error = %e, "Close reply not delivered");
                    }
                    self.closed = true;
                    return TransportEvent::Closed;
                }
                // Binary, ping, pong: not part of the signal protocol
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    self.closed = true;
                    return TransportEvent::Closed;
                }
                Some(Err(e)) => {
                    self.failed = true;
                    return TransportEvent::Error(e.into());
                }
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.ws.close(None).await {
                tracing::debug!(error = %e, "Close handshake did not complete");
            }
        }
    }

    fn abort(&mut self) {
        if !self.closed {
            self.closed = true;
            // One poll: enough to hand the close frame to the socket in the
            // common case. The TCP stream goes away with `self` regardless.
            if self.ws.close(None).now_or_never().is_none() {
                tracing::debug!("Close frame not written before drop");
            }
        }
    }
}

/// What to do after the connection drops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// A dropped connection ends streaming for the session
    #[default]
    Never,
    /// Exponential backoff: initial, 2x, 4x, ... capped at `max`
    Backoff { initial: Duration, max: Duration },
}

impl ReconnectPolicy {
    pub fn backoff(max: Duration) -> Self {
        ReconnectPolicy::Backoff {
            initial: Duration::from_secs(1),
            max,
        }
    }
}

/// Delay schedule for reconnect attempts
#[derive(Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    current: Option<Duration>,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current: None,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, or `None` if reconnecting is disabled
    pub fn next_delay(&mut self) -> Option<Duration> {
        let ReconnectPolicy::Backoff { initial, max } = self.policy else {
            return None;
        };
        let delay = match self.current {
            None => initial,
            Some(prev) => (prev * 2).min(max),
        };
        self.current = Some(delay);
        self.attempt += 1;
        Some(delay)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Connection established, start over from the initial delay
    pub fn reset(&mut self) {
        self.current = None;
        self.attempt = 0;
    }
}
