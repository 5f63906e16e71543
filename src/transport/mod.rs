//! Persistent backend connection with bounded reconnection.
//!
//! [`Transport`] owns one WebSocket at a time through a background
//! connection task. Inbound text frames are decoded and forwarded, in
//! arrival order, to the frame channel returned by [`Transport::new`].
//! Outbound frames are queued to the same task so [`Transport::send`] never
//! blocks.
//!
//! # Architecture
//!
//! ```text
//!   Transport (Clone)                 connection task
//!        │  send(type, body) ──────►  outbound queue ──► FrameSink
//!        │  close() ───────────────►  cancel token
//!        │                                 │
//!        │           frames channel ◄──────┤◄── FrameSource
//!        │           notices channel ◄─────┘    (grace-gated)
//! ```
//!
//! The socket sits behind the [`Connector`] trait: production uses
//! [`crate::ws::WsConnector`], tests use [`fake::FakeConnector`].

pub mod fake;
pub mod lifecycle;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::constants;
use crate::frame::{InboundFrame, OutboundFrame};
use crate::ws::WsMessage;

pub use lifecycle::{CloseOutcome, ConnectionLifecycle, ConnectionState, GraceGate};

/// Write half of a connected socket.
#[async_trait]
pub trait FrameSink: Send {
    /// Send a UTF-8 text frame.
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Answer a server ping.
    async fn send_pong(&mut self, data: Vec<u8>) -> Result<()>;

    /// Close the socket gracefully.
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a connected socket.
#[async_trait]
pub trait FrameSource: Send {
    /// Next message, or `None` once the stream has ended.
    async fn recv(&mut self) -> Option<Result<WsMessage>>;
}

/// Split socket returned by a [`Connector`].
pub type SocketPair = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Opens sockets. One call per connect attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a socket to `url`.
    async fn connect(&self, url: &str) -> Result<SocketPair>;
}

/// Reconnect and error-reporting timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// Reconnects allowed after a drop (counter resets on open).
    pub max_reconnect_attempts: u32,
    /// Fixed delay before each reconnect.
    pub reconnect_delay: Duration,
    /// Startup window in which errors stay quiet until a first connection.
    pub grace_period: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: constants::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: constants::DEFAULT_RECONNECT_DELAY,
            grace_period: constants::DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Category of a user-visible connectivity problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// An established connection dropped.
    ConnectionLost,
    /// A send was attempted without a live connection.
    SendFailed,
    /// Reconnection gave up.
    Exhausted,
}

impl NoticeKind {
    /// Actionable text for the user.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::ConnectionLost => constants::MSG_CANNOT_REACH_SERVER,
            Self::SendFailed => constants::MSG_BACKEND_NOT_CONNECTED,
            Self::Exhausted => constants::MSG_RECONNECT_EXHAUSTED,
        }
    }

    /// Whether the problem persists until the client is restarted.
    pub fn is_persistent(self) -> bool {
        self == Self::Exhausted
    }
}

impl std::fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost => write!(f, "connection_lost"),
            Self::SendFailed => write!(f, "send_failed"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// A connectivity problem that passed the grace gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityNotice {
    /// What went wrong.
    pub kind: NoticeKind,
    /// Text to show the user.
    pub message: &'static str,
}

impl ConnectivityNotice {
    fn new(kind: NoticeKind) -> Self {
        Self {
            kind,
            message: kind.user_message(),
        }
    }
}

/// Receiving ends handed out by [`Transport::new`].
#[derive(Debug)]
pub struct TransportChannels {
    /// Decoded inbound frames in arrival order.
    pub frames: mpsc::UnboundedReceiver<InboundFrame>,
    /// User-visible connectivity notices.
    pub notices: mpsc::UnboundedReceiver<ConnectivityNotice>,
}

/// State shared between [`Transport`] handles and the connection task.
struct Shared {
    lifecycle: Mutex<ConnectionLifecycle>,
    grace: GraceGate,
    settings: TransportSettings,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
    frames_tx: mpsc::UnboundedSender<InboundFrame>,
    notices_tx: mpsc::UnboundedSender<ConnectivityNotice>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl Shared {
    fn lifecycle(&self) -> MutexGuard<'_, ConnectionLifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forward a notice to the user unless the grace gate holds it back.
    ///
    /// Exhaustion always gets through.
    fn report(&self, kind: NoticeKind) {
        let ever_connected = self.lifecycle().ever_connected();
        if !kind.is_persistent() && !self.grace.allows(ever_connected) {
            log::info!("[Transport] Suppressing {kind} notice during startup grace period");
            return;
        }
        let _ = self.notices_tx.send(ConnectivityNotice::new(kind));
    }
}

/// Handle to the backend connection.
///
/// Cheap to clone; every clone talks to the same connection task.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
    outbound_tx: mpsc::UnboundedSender<String>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lifecycle = self.shared.lifecycle();
        f.debug_struct("Transport")
            .field("state", &lifecycle.state())
            .field("attempts", &lifecycle.attempts())
            .field("settings", &self.shared.settings)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Create a disconnected transport and start the grace window.
    pub fn new(
        connector: Arc<dyn Connector>,
        settings: TransportSettings,
    ) -> (Self, TransportChannels) {
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (notices_tx, notices) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            lifecycle: Mutex::new(ConnectionLifecycle::new(settings.max_reconnect_attempts)),
            grace: GraceGate::start(settings.grace_period),
            settings,
            connector,
            cancel: CancellationToken::new(),
            frames_tx,
            notices_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        });

        (
            Self {
                shared,
                outbound_tx,
            },
            TransportChannels { frames, notices },
        )
    }

    /// Spawn the connection task for `url`.
    ///
    /// Must be called from within a tokio runtime. A transport connects
    /// once; later calls are ignored.
    pub fn connect(&self, url: impl Into<String>) {
        let outbound_rx = self
            .shared
            .outbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(outbound_rx) = outbound_rx else {
            log::warn!("[Transport] connect() called twice, ignoring");
            return;
        };

        tokio::spawn(run_connection_loop(
            url.into(),
            Arc::clone(&self.shared),
            outbound_rx,
        ));
    }

    /// Queue a frame for delivery.
    ///
    /// Returns `false` without sending when the connection is not
    /// `Connected`; the failure is reported as a notice (grace-gated).
    /// Frames still queued when the connection drops are discarded, never
    /// replayed on the next connection.
    pub fn send(&self, frame: &OutboundFrame) -> bool {
        let state = self.state();
        if state != ConnectionState::Connected {
            log::warn!("[Transport] Cannot send '{}' while {state}", frame.kind);
            self.shared.report(NoticeKind::SendFailed);
            return false;
        }

        if self.outbound_tx.send(frame.to_json()).is_err() {
            log::warn!("[Transport] Connection task gone, dropping '{}'", frame.kind);
            return false;
        }
        log::trace!("[Transport] Queued '{}'", frame.kind);
        true
    }

    /// Close the connection and suppress any further reconnection.
    pub fn close(&self) {
        self.shared.lifecycle().close();
        self.shared.cancel.cancel();
        log::info!("[Transport] Closed by client");
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lifecycle().state()
    }

    /// Reconnect attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.shared.lifecycle().attempts()
    }

    /// Whether a connection has ever opened.
    pub fn ever_connected(&self) -> bool {
        self.shared.lifecycle().ever_connected()
    }
}

/// Result of the inner message loop.
enum ConnectionLoopExit {
    /// Close was requested.
    Shutdown,
    /// Connection was lost -- may reconnect.
    Disconnected,
}

/// Connect, pump messages, and reconnect until closed or exhausted.
async fn run_connection_loop(
    url: String,
    shared: Arc<Shared>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    loop {
        if !shared.lifecycle().begin_connect() {
            break;
        }

        log::info!("[Transport] Connecting to {url}");

        let connected = tokio::select! {
            () = shared.cancel.cancelled() => break,
            result = shared.connector.connect(&url) => result,
        };

        match connected {
            Ok((mut sink, mut source)) => {
                shared.lifecycle().opened();
                log::info!("[Transport] WebSocket connected");

                let exit = run_message_loop(&shared, &mut *sink, &mut *source, &mut outbound_rx).await;
                if let ConnectionLoopExit::Shutdown = exit {
                    if let Err(e) = sink.close().await {
                        log::debug!("[Transport] Close handshake failed: {e:#}");
                    }
                    break;
                }
                discard_unsent(&mut outbound_rx);
                shared.report(NoticeKind::ConnectionLost);
            }
            Err(e) => {
                log::warn!("[Transport] Connection failed: {e:#}");
            }
        }

        let outcome = shared.lifecycle().connection_lost();
        match outcome {
            CloseOutcome::Reconnect { attempt } => {
                log::info!(
                    "[Transport] Reconnecting in {}ms (attempt {attempt}/{})",
                    shared.settings.reconnect_delay.as_millis(),
                    shared.settings.max_reconnect_attempts
                );
                tokio::select! {
                    () = shared.cancel.cancelled() => break,
                    () = tokio::time::sleep(shared.settings.reconnect_delay) => {}
                }
            }
            CloseOutcome::Exhausted => {
                log::error!(
                    "[Transport] Giving up after {} reconnect attempts",
                    shared.settings.max_reconnect_attempts
                );
                shared.report(NoticeKind::Exhausted);
                break;
            }
            CloseOutcome::Closed => break,
        }
    }

    log::debug!("[Transport] Connection loop finished");
}

/// Drop frames queued for a connection that no longer exists.
fn discard_unsent(outbound_rx: &mut mpsc::UnboundedReceiver<String>) {
    let mut dropped = 0usize;
    while outbound_rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        log::warn!("[Transport] Discarded {dropped} unsent frame(s) after connection loss");
    }
}

/// Pump one live connection until it drops or close is requested.
async fn run_message_loop(
    shared: &Shared,
    sink: &mut dyn FrameSink,
    source: &mut dyn FrameSource,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
) -> ConnectionLoopExit {
    loop {
        tokio::select! {
            biased;

            () = shared.cancel.cancelled() => return ConnectionLoopExit::Shutdown,

            msg = source.recv() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => handle_text_message(shared, &text),
                    Some(Ok(WsMessage::Ping(data))) => {
                        if let Err(e) = sink.send_pong(data).await {
                            log::warn!("[Transport] Failed to answer ping: {e:#}");
                            return ConnectionLoopExit::Disconnected;
                        }
                    }
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        log::info!("[Transport] Connection closed by server ({code}: {reason})");
                        return ConnectionLoopExit::Disconnected;
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        log::debug!("[Transport] Ignoring {}-byte binary frame", data.len());
                    }
                    Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Err(e)) => {
                        log::warn!("[Transport] WebSocket error: {e:#}");
                        return ConnectionLoopExit::Disconnected;
                    }
                    None => {
                        log::info!("[Transport] WebSocket stream ended");
                        return ConnectionLoopExit::Disconnected;
                    }
                }
            }

            Some(text) = outbound_rx.recv() => {
                if let Err(e) = sink.send_text(&text).await {
                    log::warn!("[Transport] Send failed: {e:#}");
                    return ConnectionLoopExit::Disconnected;
                }
            }
        }
    }
}

/// Decode one text frame and forward it; malformed frames are dropped.
fn handle_text_message(shared: &Shared, text: &str) {
    if !shared.lifecycle().accepts_frames() {
        log::debug!("[Transport] Dropping frame received outside Connected state");
        return;
    }

    match InboundFrame::parse(text) {
        Ok(frame) => {
            log::trace!("[Transport] Received '{}'", frame.kind);
            if shared.frames_tx.send(frame).is_err() {
                log::debug!("[Transport] Frame receiver dropped");
            }
        }
        Err(e) => {
            let preview: String = text.chars().take(100).collect();
            log::warn!("[Transport] {e} ({preview})");
        }
    }
}
