//! In-memory [`Connector`] for tests and offline runs.
//!
//! Every successful `connect` hands a [`FakeServer`] to the paired
//! [`FakeListener`], which plays the backend side of the socket: it pushes
//! messages to the client, reads what the client sent, and can drop the
//! connection to simulate a backend restart.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Connector, FrameSink, FrameSource, SocketPair};
use crate::ws::WsMessage;

/// Connector whose sockets are channel pairs.
#[derive(Debug, Clone)]
pub struct FakeConnector {
    refuse: Arc<AtomicBool>,
    calls: Arc<AtomicU32>,
    accepted_tx: mpsc::UnboundedSender<FakeServer>,
}

/// Receives the server side of each connection the fake accepts.
#[derive(Debug)]
pub struct FakeListener {
    accepted_rx: mpsc::UnboundedReceiver<FakeServer>,
}

/// Backend side of one fake connection.
#[derive(Debug)]
pub struct FakeServer {
    to_client: mpsc::UnboundedSender<WsMessage>,
    from_client: mpsc::UnboundedReceiver<String>,
    pongs: Arc<Mutex<Vec<Vec<u8>>>>,
}

struct FakeSink {
    to_server: Option<mpsc::UnboundedSender<String>>,
    pongs: Arc<Mutex<Vec<Vec<u8>>>>,
}

struct FakeSource {
    from_server: mpsc::UnboundedReceiver<WsMessage>,
}

impl FakeConnector {
    /// New connector that accepts connections, plus its listener.
    pub fn new() -> (Self, FakeListener) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        (
            Self {
                refuse: Arc::new(AtomicBool::new(false)),
                calls: Arc::new(AtomicU32::new(0)),
                accepted_tx,
            },
            FakeListener { accepted_rx },
        )
    }

    /// Make subsequent connect attempts fail (backend down).
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of connect attempts so far, successful or not.
    pub fn connect_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<SocketPair> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused: {url}");
        }

        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        let pongs = Arc::new(Mutex::new(Vec::new()));

        let server = FakeServer {
            to_client,
            from_client,
            pongs: Arc::clone(&pongs),
        };
        if self.accepted_tx.send(server).is_err() {
            anyhow::bail!("fake listener dropped");
        }

        Ok((
            Box::new(FakeSink {
                to_server: Some(to_server),
                pongs,
            }),
            Box::new(FakeSource { from_server }),
        ))
    }
}

impl FakeListener {
    /// Wait for the next accepted connection.
    pub async fn accept(&mut self) -> Option<FakeServer> {
        self.accepted_rx.recv().await
    }

    /// Accepted connection, if one is already waiting.
    pub fn try_accept(&mut self) -> Option<FakeServer> {
        self.accepted_rx.try_recv().ok()
    }
}

impl FakeServer {
    /// Push any message to the client. Returns `false` if the client is gone.
    pub fn send(&self, message: WsMessage) -> bool {
        self.to_client.send(message).is_ok()
    }

    /// Push a text frame to the client.
    pub fn send_text(&self, text: &str) -> bool {
        self.send(WsMessage::Text(text.to_string()))
    }

    /// Push a JSON value as a text frame.
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_text(&value.to_string())
    }

    /// Next text frame from the client; `None` once the client closed.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Text frame from the client, if one is already waiting.
    pub fn try_recv_text(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Pong payloads the client has sent so far (drained).
    pub fn take_pongs(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.pongs.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Drop the connection from the server side.
    pub fn disconnect(self) {
        drop(self);
    }
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        let Some(tx) = &self.to_server else {
            anyhow::bail!("fake socket closed");
        };
        tx.send(text.to_string())
            .map_err(|e| anyhow::anyhow!("fake server dropped: {e}"))
    }

    async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.pongs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.to_server = None;
        Ok(())
    }
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn recv(&mut self) -> Option<Result<WsMessage>> {
        self.from_server.recv().await.map(Ok)
    }
}
