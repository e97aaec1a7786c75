//! Streaming session: connection lifecycle, sampling loop and motion alerts.
//!
//! Everything runs on one task. `run` multiplexes the handshake, inbound
//! events and the three timers (next tick, alert reset, reconnect) through a
//! single `select!`, and a tick always runs to completion before the loop
//! polls anything else, so two sends never overlap.

pub mod alert;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

use crate::capture::{CaptureError, CaptureSource};
use crate::client::{Backoff, Connection, Connector, ReconnectPolicy, TransportError, TransportEvent};
use crate::frame::{EncodedFrame, FrameBuffer, DEFAULT_JPEG_QUALITY};
use crate::protocol::{Signal, DEFAULT_ENDPOINT, MOTION_SIGNAL};
use alert::MotionAlert;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: String,
    /// Delay between the end of one send and the start of the next tick
    pub frame_interval: Duration,
    /// How long the alert stays up after the most recent motion signal
    pub alert_window: Duration,
    pub sentinel: String,
    pub jpeg_quality: u8,
    /// Stop the camera track on teardown
    pub release_device_on_teardown: bool,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            frame_interval: Duration::from_millis(200),
            alert_window: Duration::from_secs(2),
            sentinel: MOTION_SIGNAL.to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            release_device_on_teardown: true,
            reconnect: ReconnectPolicy::Never,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempted yet
    Idle,
    Connecting,
    Open,
    /// Terminal for the current connection
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Sent { bytes: usize },
    /// No surface or no connection. Not rescheduled.
    Idle,
    /// Capture or encode failed for this frame; the next tick is still scheduled
    Dropped,
    /// The send failed and the connection was dropped
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Shutdown,
    /// Connection gone, no reconnect scheduled and no alert pending
    ConnectionClosed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_dropped: u64,
    pub motion_signals: u64,
    pub connects: u64,
}

type ConnectFuture<'k, C> = Pin<Box<dyn Future<Output = Result<C, TransportError>> + 'k>>;

enum Step<C> {
    Shutdown,
    Transport(TransportEvent),
    Connected(Result<C, TransportError>),
    AlertExpired,
    Tick,
    Reconnect,
}

pub struct StreamingSession<C: Connection> {
    config: SessionConfig,
    capture: CaptureSource,
    buffer: FrameBuffer,
    state: ConnectionState,
    connection: Option<C>,
    next_tick: Option<Instant>,
    alert: MotionAlert,
    backoff: Backoff,
    reconnect_at: Option<Instant>,
    stats: SessionStats,
    torn_down: bool,
}

impl<C: Connection> StreamingSession<C> {
    pub fn new(config: SessionConfig, mut capture: CaptureSource) -> Self {
        capture.set_release_on_drop(config.release_device_on_teardown);
        let alert = MotionAlert::new(config.alert_window);
        let backoff = Backoff::new(config.reconnect);
        Self {
            config,
            capture,
            buffer: FrameBuffer::new(),
            state: ConnectionState::Idle,
            connection: None,
            next_tick: None,
            alert,
            backoff,
            reconnect_at: None,
            stats: SessionStats::default(),
            torn_down: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True while an open connection is available to the sampling loop
    pub fn is_available(&self) -> bool {
        self.connection.is_some()
    }

    pub fn alert_active(&self) -> bool {
        self.alert.is_active()
    }

    /// Follow the alert flag (the overlay's view of the session)
    pub fn subscribe_alerts(&self) -> watch::Receiver<bool> {
        self.alert.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn capture(&self) -> &CaptureSource {
        &self.capture
    }

    pub fn frame_buffer_size(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    pub fn next_tick(&self) -> Option<Instant> {
        self.next_tick
    }

    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Open a connection and wait for the handshake to finish.
    pub async fn open<K: Connector<Conn = C>>(&mut self, connector: &K) {
        if self.torn_down {
            return;
        }
        let pending = self.start_connect(connector);
        match pending.await {
            Ok(conn) => self.on_open(conn),
            Err(e) => self.on_connect_failed(e),
        }
    }

    pub fn on_open(&mut self, conn: C) {
        tracing::info!(endpoint = %self.config.endpoint, "WebSocket Connected");
        self.state = ConnectionState::Open;
        self.connection = Some(conn);
        self.reconnect_at = None;
        self.backoff.reset();
        self.stats.connects += 1;
        // Availability is what starts the sampling loop
        self.next_tick = Some(Instant::now());
    }

    pub fn on_connect_failed(&mut self, err: TransportError) {
        tracing::warn!(error = %err, "WebSocket handshake failed");
        self.on_close();
    }

    pub fn on_message(&mut self, payload: &str) {
        match Signal::classify(payload, &self.config.sentinel) {
            Signal::Motion => {
                self.stats.motion_signals += 1;
                if !self.alert.is_active() {
                    tracing::info!("Motion detected");
                }
                self.alert.trigger(Instant::now());
            }
            Signal::Unrecognized => {
                tracing::debug!(len = payload.len(), "Ignoring unrecognized message");
            }
        }
    }

    /// Log only. The transport reports its own close afterwards.
    pub fn on_error(&mut self, err: TransportError) {
        tracing::warn!(error = %err, "WebSocket Error");
    }

    pub fn on_close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if self.connection.take().is_some() {
            tracing::info!("WebSocket Closed");
        }
        self.state = ConnectionState::Closed;
        self.next_tick = None;

        if self.torn_down {
            return;
        }
        if let Some(delay) = self.backoff.next_delay() {
            tracing::info!(
                attempt = self.backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Connection lost, reconnecting"
            );
            self.reconnect_at = Some(Instant::now() + delay);
        }
    }

    /// One sampling tick: resize, rasterize, encode, send.
    pub async fn tick(&mut self) -> TickOutcome {
        self.next_tick = None;

        let (Some(surface), Some(conn)) = (self.capture.surface_mut(), self.connection.as_mut())
        else {
            tracing::trace!("Sampling loop idle: no feed or no connection");
            return TickOutcome::Idle;
        };

        self.buffer.resize_to(surface.intrinsic_size());
        let frame = match surface.current_frame() {
            Ok(frame) => frame,
            Err(CaptureError::Stopped) => {
                tracing::debug!("Camera track stopped, sampling loop idle");
                return TickOutcome::Idle;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping frame");
                self.stats.frames_dropped += 1;
                self.next_tick = Some(Instant::now() + self.config.frame_interval);
                return TickOutcome::Dropped;
            }
        };
        self.buffer.rasterize(&frame);

        let encoded = match EncodedFrame::encode(&self.buffer, self.config.jpeg_quality) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping frame");
                self.stats.frames_dropped += 1;
                self.next_tick = Some(Instant::now() + self.config.frame_interval);
                return TickOutcome::Dropped;
            }
        };

        let bytes = encoded.len();
        let result = conn.send_text(encoded.into_payload()).await;
        match result {
            Ok(()) => {
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += bytes as u64;
                tracing::trace!(bytes, seq = self.stats.frames_sent, "Frame sent");
                self.next_tick = Some(Instant::now() + self.config.frame_interval);
                TickOutcome::Sent { bytes }
            }
            Err(e) => {
                self.on_error(e);
                self.on_close();
                TickOutcome::Failed
            }
        }
    }

    /// Release everything the session holds. Safe to call more than once.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.next_tick = None;
        self.reconnect_at = None;

        if let Some(mut conn) = self.connection.take() {
            conn.close().await;
            tracing::info!("WebSocket Closed");
        }
        self.state = ConnectionState::Closed;

        if self.config.release_device_on_teardown {
            self.capture.release();
        } else if self.capture.is_bound() {
            tracing::info!("Leaving camera track running");
        }

        let s = self.stats;
        tracing::info!(
            frames_sent = s.frames_sent,
            bytes_sent = s.bytes_sent,
            frames_dropped = s.frames_dropped,
            motion_signals = s.motion_signals,
            connects = s.connects,
            "Session torn down"
        );
    }

    /// Drive the session until `shutdown` resolves or it goes idle.
    /// Teardown runs on every exit path.
    pub async fn run<'k, K, F>(&mut self, connector: &'k K, shutdown: F) -> SessionEnd
    where
        K: Connector<Conn = C>,
        F: Future<Output = ()>,
    {
        if self.torn_down {
            return SessionEnd::Shutdown;
        }
        tokio::pin!(shutdown);

        let mut pending: Option<ConnectFuture<'k, C>> = None;
        if self.connection.is_none() {
            pending = Some(self.start_connect(connector));
        }

        let end = loop {
            if pending.is_none() && self.is_idle() {
                break SessionEnd::ConnectionClosed;
            }

            let step = tokio::select! {
                biased;
                _ = &mut shutdown => Step::Shutdown,
                event = next_event(self.connection.as_mut()) => Step::Transport(event),
                result = finish_connect(&mut pending) => Step::Connected(result),
                _ = sleep_until_opt(self.alert.deadline()) => Step::AlertExpired,
                _ = sleep_until_opt(self.next_tick) => Step::Tick,
                _ = sleep_until_opt(self.reconnect_at) => Step::Reconnect,
            };

            match step {
                Step::Shutdown => break SessionEnd::Shutdown,
                Step::Transport(TransportEvent::Text(text)) => self.on_message(&text),
                Step::Transport(TransportEvent::Error(e)) => self.on_error(e),
                Step::Transport(TransportEvent::Closed) => self.on_close(),
                Step::Connected(result) => {
                    pending = None;
                    match result {
                        Ok(conn) => self.on_open(conn),
                        Err(e) => self.on_connect_failed(e),
                    }
                }
                Step::AlertExpired => {
                    if self.alert.expire(Instant::now()) {
                        tracing::info!("Motion alert cleared");
                    }
                }
                Step::Tick => {
                    self.tick().await;
                }
                Step::Reconnect => {
                    pending = Some(self.start_connect(connector));
                }
            }
        };

        // Dropping a handshake in flight abandons it
        drop(pending);
        self.teardown().await;
        end
    }

    fn start_connect<'k, K: Connector<Conn = C>>(&mut self, connector: &'k K) -> ConnectFuture<'k, C> {
        self.reconnect_at = None;
        self.state = ConnectionState::Connecting;
        tracing::info!(endpoint = %self.config.endpoint, "Connecting");
        Box::pin(connector.connect(self.config.endpoint.clone()))
    }

    fn is_idle(&self) -> bool {
        self.connection.is_none() && self.reconnect_at.is_none() && !self.alert.is_active()
    }
}

/// Covers the exits `teardown` can't: a cancelled `run`, an early return,
/// a panic. The camera side is handled by `CaptureSource`'s own drop.
impl<C: Connection> Drop for StreamingSession<C> {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        if let Some(mut conn) = self.connection.take() {
            conn.abort();
            tracing::info!("WebSocket Closed (session dropped)");
        }
    }
}

async fn next_event<C: Connection>(conn: Option<&mut C>) -> TransportEvent {
    match conn {
        Some(conn) => conn.next_event().await,
        None => std::future::pending().await,
    }
}

async fn finish_connect<C>(pending: &mut Option<ConnectFuture<'_, C>>) -> Result<C, TransportError> {
    match pending {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
