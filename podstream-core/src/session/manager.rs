//! Caller-facing handle to one streaming session.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, info_span};

use crate::codec::{Frame, FrameCodec};
use crate::error::{SessionFailure, StreamError};
use crate::network::Connector;
use crate::session::buffer::{OutputChunk, OutputQueue};
use crate::session::config::SessionOptions;
use crate::session::driver::{Command, Driver};
use crate::state::{SessionState, SessionStatus};
use crate::target::SessionTarget;
use crate::token::SessionTokenSource;

const COMMAND_QUEUE_DEPTH: usize = 64;

/// One log tail or terminal session.
///
/// The manager owns a background task that runs the connection state
/// machine; every method here is a message to that task, so calls from
/// several tasks are processed one at a time in arrival order.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use podstream_core::*;
/// # async fn demo() -> Result<(), StreamError> {
/// let connector = Arc::new(WsConnector::new("https://tigron-server.lan")?);
/// let session = SessionManager::new(
///     SessionTarget::logs("api-7f9c"),
///     connector,
///     SessionOptions::default(),
/// );
/// session.open(Arc::new(StaticTokenSource::new("secret"))).await?;
/// while let Some(chunk) = session.next_output().await {
///     print!("{}", String::from_utf8_lossy(&chunk.data));
/// }
/// # Ok(())
/// # }
/// ```
pub struct SessionManager {
    target: SessionTarget,
    codec: FrameCodec,
    options: SessionOptions,
    commands: mpsc::Sender<Command>,
    status_rx: watch::Receiver<SessionStatus>,
    output: Arc<OutputQueue>,
    task: JoinHandle<()>,
}

impl SessionManager {
    /// Create an idle session for `target`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        target: SessionTarget,
        connector: Arc<dyn Connector>,
        options: SessionOptions,
    ) -> Self {
        let (commands, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let output = Arc::new(OutputQueue::new(options.buffer));
        let codec = FrameCodec::new(target.mode()).with_max_frame_size(options.max_frame_size);

        let span = info_span!(
            "session",
            resource = %target.resource_id(),
            mode = %target.mode()
        );
        let driver = Driver::new(
            target.clone(),
            connector,
            options.clone(),
            commands_rx,
            status_tx,
            Arc::clone(&output),
        );
        let task = tokio::spawn(driver.run().instrument(span));

        Self {
            target,
            codec,
            options,
            commands,
            status_rx,
            output,
            task,
        }
    }

    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Connect, authenticate and start streaming.
    ///
    /// Resolves once the session reaches `Streaming` (`Ok`) or `Failed`
    /// (`Err` with the cause). Transient failures on the way are retried
    /// by the reconnection policy before this returns.
    pub async fn open(&self, token_source: Arc<dyn SessionTokenSource>) -> Result<(), StreamError> {
        self.options.validate()?;

        let state = self.state();
        if state != SessionState::Idle {
            return Err(StreamError::AlreadyOpened(state));
        }

        let (reply, rx) = oneshot::channel();
        self.command(Command::Open {
            token_source,
            reply,
        })
        .await?;
        rx.await?
    }

    /// Close gracefully and release the socket.
    ///
    /// Resolves once the session is `Closed`. A `Failed` session stays
    /// `Failed`; closing twice is a no-op.
    pub async fn close(&self) -> Result<(), StreamError> {
        if self.state().is_terminal() {
            return Ok(());
        }

        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).await.is_err() {
            // The task is gone, and with it the socket.
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    // ── Outbound ─────────────────────────────────────────────────

    /// Send one frame on the live connection.
    ///
    /// Frames the mode does not allow are refused with
    /// [`StreamError::UnsupportedFrame`]; anything sent outside
    /// `Streaming` is refused with [`StreamError::NotStreaming`]. Neither
    /// touches the session state.
    pub async fn send(&self, frame: Frame) -> Result<(), StreamError> {
        self.codec.check_outbound(&frame)?;

        let state = self.state();
        if !state.is_streaming() {
            return Err(StreamError::NotStreaming(state));
        }

        let (reply, rx) = oneshot::channel();
        self.command(Command::Send { frame, reply }).await?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(StreamError::NotStreaming(self.state())),
        }
    }

    /// Forward keystrokes (terminal sessions).
    pub async fn send_input(&self, bytes: impl Into<Bytes>) -> Result<(), StreamError> {
        self.send(Frame::Input(bytes.into())).await
    }

    /// Report a new terminal size (terminal sessions).
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), StreamError> {
        self.send(Frame::Resize { cols, rows }).await
    }

    // ── Inbound ──────────────────────────────────────────────────

    /// Next output chunk in arrival order.
    ///
    /// Returns `None` once the session has ended and every chunk was
    /// delivered. Chunks go to the callback instead once
    /// [`on_output`](Self::on_output) is registered.
    pub async fn next_output(&self) -> Option<OutputChunk> {
        self.output.next().await
    }

    /// Everything buffered right now, without waiting.
    pub fn drain_output(&self) -> Vec<OutputChunk> {
        self.output.drain()
    }

    /// Chunks discarded by a `DropOldest` buffer.
    pub fn dropped_output(&self) -> u64 {
        self.output.dropped()
    }

    /// Deliver output to `callback` from now on.
    ///
    /// Chunks already buffered are handed over first, in order. The
    /// callback runs on the session task and must not block.
    pub async fn on_output<F>(&self, callback: F) -> Result<(), StreamError>
    where
        F: FnMut(OutputChunk) + Send + 'static,
    {
        self.command(Command::OnOutput(Box::new(callback))).await
    }

    /// Call `callback` when the session reaches `Failed`.
    ///
    /// Registering on a session that already failed calls it right away.
    pub async fn on_failure<F>(&self, callback: F) -> Result<(), StreamError>
    where
        F: Fn(&SessionFailure) + Send + Sync + 'static,
    {
        self.command(Command::OnFailure(Box::new(callback))).await
    }

    // ── Status ───────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.status_rx.borrow().state
    }

    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    /// A receiver that sees every published status change.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Wait until the status satisfies `predicate` and return it.
    pub async fn wait_until<F>(&self, mut predicate: F) -> Result<SessionStatus, StreamError>
    where
        F: FnMut(&SessionStatus) -> bool,
    {
        let mut rx = self.status_rx.clone();
        let status = rx
            .wait_for(|status| predicate(status))
            .await
            .map_err(|_| StreamError::ChannelClosed)?;
        Ok(status.clone())
    }

    async fn command(&self, cmd: Command) -> Result<(), StreamError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| StreamError::ChannelClosed)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("target", &self.target)
            .field("status", &*self.status_rx.borrow())
            .finish()
    }
}
