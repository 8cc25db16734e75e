//! In-memory transport for tests and demos.
//!
//! Every successful `connect` hands the far end of the new socket to the
//! test as a [`MockServer`], which can read what the session wrote and
//! inject messages, closes and errors.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::codec::WireMessage;
use crate::error::StreamError;
use crate::network::socket::{DEFAULT_QUEUE_DEPTH, Socket, SocketEvent};
use crate::network::Connector;
use crate::target::SessionTarget;

/// A scripted outcome for one upcoming connect.
enum Scripted {
    Fail(StreamError),
    /// Never resolve, like a server that accepts TCP but never upgrades.
    Hang,
}

#[derive(Default)]
struct MockState {
    script: VecDeque<Scripted>,
    fail_always: bool,
    attempts: Vec<Instant>,
    /// Event senders of every socket handed out, to count live ones.
    handed_out: Vec<mpsc::Sender<SocketEvent>>,
}

/// A [`Connector`] whose sockets are driven by the test.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    accepted_tx: mpsc::UnboundedSender<MockServer>,
    accepted_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MockServer>>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            accepted_tx,
            accepted_rx: Arc::new(tokio::sync::Mutex::new(accepted_rx)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next connect with `err`.
    pub fn fail_next(&self, err: StreamError) {
        self.lock().script.push_back(Scripted::Fail(err));
    }

    /// Leave the next connect pending forever.
    pub fn hang_next(&self) {
        self.lock().script.push_back(Scripted::Hang);
    }

    /// Refuse every connect until switched off again.
    pub fn set_fail_always(&self, fail: bool) {
        self.lock().fail_always = fail;
    }

    /// When each connect was attempted.
    pub fn attempts(&self) -> Vec<Instant> {
        self.lock().attempts.clone()
    }

    /// Sockets handed out whose session side still exists.
    pub fn live_sockets(&self) -> usize {
        self.lock()
            .handed_out
            .iter()
            .filter(|events| !events.is_closed())
            .count()
    }

    /// Wait for the next successfully opened socket.
    pub async fn accept(&self) -> Option<MockServer> {
        self.accepted_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &SessionTarget) -> Result<Socket, StreamError> {
        let scripted = {
            let mut state = self.lock();
            state.attempts.push(Instant::now());
            if state.fail_always && state.script.is_empty() {
                return Err(StreamError::Connect("mock: connection refused".into()));
            }
            state.script.pop_front()
        };
        match scripted {
            Some(Scripted::Fail(err)) => return Err(err),
            Some(Scripted::Hang) => std::future::pending::<()>().await,
            None => {}
        }

        let (client_tx, mut relay_rx) = mpsc::channel::<WireMessage>(DEFAULT_QUEUE_DEPTH);
        let (server_tx, server_rx) = mpsc::unbounded_channel::<WireMessage>();
        let (events_tx, events_rx) = mpsc::channel::<SocketEvent>(DEFAULT_QUEUE_DEPTH);

        // Relay: forwards what the session writes, and answers a close
        // frame the way a well-behaved peer would.
        let echo_tx = events_tx.clone();
        let relay = tokio::spawn(async move {
            while let Some(msg) = relay_rx.recv().await {
                let close = match &msg {
                    WireMessage::Close { code, reason } => Some((*code, reason.clone())),
                    _ => None,
                };
                let _ = server_tx.send(msg);
                if let Some((code, reason)) = close {
                    let _ = echo_tx.send(SocketEvent::Closed { code, reason }).await;
                    break;
                }
            }
        });

        self.lock().handed_out.push(events_tx.clone());
        let server = MockServer {
            target: target.clone(),
            inbound: server_rx,
            events: events_tx,
        };
        self.accepted_tx
            .send(server)
            .map_err(|_| StreamError::Connect("mock: nobody accepting".into()))?;

        Ok(Socket::from_parts(client_tx, events_rx, vec![relay]))
    }
}

/// The server side of one mock socket.
pub struct MockServer {
    target: SessionTarget,
    inbound: mpsc::UnboundedReceiver<WireMessage>,
    events: mpsc::Sender<SocketEvent>,
}

impl MockServer {
    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    /// Next message the session wrote.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.inbound.recv().await
    }

    /// A message the session wrote, if one is already waiting.
    pub fn try_recv(&mut self) -> Option<WireMessage> {
        self.inbound.try_recv().ok()
    }

    pub async fn send_text(&self, text: impl Into<String>) {
        self.push(SocketEvent::Message(WireMessage::Text(text.into())))
            .await;
    }

    pub async fn send_binary(&self, bytes: impl Into<Bytes>) {
        self.push(SocketEvent::Message(WireMessage::Binary(bytes.into())))
            .await;
    }

    /// Close from the server side with `code`.
    pub async fn close(&self, code: u16, reason: &str) {
        self.push(SocketEvent::Closed {
            code,
            reason: reason.to_owned(),
        })
        .await;
    }

    /// Fail the transport.
    pub async fn error(&self, message: &str) {
        self.push(SocketEvent::Error(message.to_owned())).await;
    }

    /// Whether the session still holds this socket.
    pub fn is_client_alive(&self) -> bool {
        !self.events.is_closed()
    }

    async fn push(&self, event: SocketEvent) {
        // The session may already have dropped the socket.
        let _ = self.events.send(event).await;
    }
}
