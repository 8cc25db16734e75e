//! The session task.
//!
//! One task per session owns the state machine, the socket, the pending
//! timer and the reconnect counter. Caller commands, socket events and
//! timers all arrive through one `select!` loop, so transitions for a
//! session are processed strictly one at a time.

use std::pin::Pin;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Sleep};
use tracing::{debug, error, info, warn};

use crate::codec::{ABNORMAL_CLOSURE, Frame, FrameCodec, NORMAL_CLOSURE, WireMessage};
use crate::error::{AuthError, SessionFailure, StreamError};
use crate::network::{Connector, Socket, SocketEvent};
use crate::reconnect::{ReconnectAttemptCounter, ReconnectDecision, ReconnectPolicy};
use crate::session::buffer::{OutputChunk, OutputQueue};
use crate::session::config::SessionOptions;
use crate::state::{SessionState, SessionStatus};
use crate::target::SessionTarget;
use crate::token::SessionTokenSource;

pub(crate) type OutputCallback = Box<dyn FnMut(OutputChunk) + Send + 'static>;
pub(crate) type FailureCallback = Box<dyn Fn(&SessionFailure) + Send + Sync + 'static>;

/// Reason sent with a client-initiated close.
pub(crate) const CLOSE_REASON: &str = "session closed";

/// Requests from the [`SessionManager`](crate::SessionManager).
pub(crate) enum Command {
    Open {
        token_source: Arc<dyn SessionTokenSource>,
        reply: oneshot::Sender<Result<(), StreamError>>,
    },
    Send {
        frame: Frame,
        reply: oneshot::Sender<Result<(), StreamError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    OnOutput(OutputCallback),
    OnFailure(FailureCallback),
}

// ── Step ─────────────────────────────────────────────────────────

/// The single asynchronous operation the session is waiting on.
enum Step {
    Idle,
    Connect(BoxFuture<'static, Result<Socket, StreamError>>),
    Token(BoxFuture<'static, Result<String, AuthError>>),
    Backoff(Pin<Box<Sleep>>),
}

enum StepOutcome {
    Connected(Result<Socket, StreamError>),
    Token(Result<String, AuthError>),
    BackoffElapsed,
}

impl Step {
    fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Poll the pending operation. Dropping the returned future leaves
    /// the operation in place; completing it resets the step to `Idle`.
    async fn run(&mut self) -> StepOutcome {
        let outcome = match self {
            Self::Idle => std::future::pending::<StepOutcome>().await,
            Self::Connect(fut) => StepOutcome::Connected(fut.await),
            Self::Token(fut) => StepOutcome::Token(fut.await),
            Self::Backoff(sleep) => {
                sleep.await;
                StepOutcome::BackoffElapsed
            }
        };
        *self = Self::Idle;
        outcome
    }
}

enum Event {
    Command(Option<Command>),
    Step(StepOutcome),
    Socket(Option<SocketEvent>),
    AuthGraceElapsed,
}

async fn next_socket_event(socket: &mut Option<Socket>) -> Option<SocketEvent> {
    match socket {
        Some(socket) => socket.recv().await,
        None => std::future::pending().await,
    }
}

async fn grace_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ── Driver ───────────────────────────────────────────────────────

pub(crate) struct Driver {
    target: SessionTarget,
    codec: FrameCodec,
    connector: Arc<dyn Connector>,
    token_source: Option<Arc<dyn SessionTokenSource>>,
    options: SessionOptions,
    policy: ReconnectPolicy,
    counter: ReconnectAttemptCounter,

    state: SessionState,
    connection: u64,
    last_error: Option<SessionFailure>,

    /// The only socket this session may hold.
    socket: Option<Socket>,
    step: Step,
    /// Set once the token is on the wire; reaching it means accepted.
    auth_deadline: Option<Instant>,

    commands: mpsc::Receiver<Command>,
    status_tx: watch::Sender<SessionStatus>,
    output: Arc<OutputQueue>,
    output_callback: Option<OutputCallback>,
    failure_callbacks: Vec<FailureCallback>,
    open_reply: Option<oneshot::Sender<Result<(), StreamError>>>,
}

impl Driver {
    pub(crate) fn new(
        target: SessionTarget,
        connector: Arc<dyn Connector>,
        options: SessionOptions,
        commands: mpsc::Receiver<Command>,
        status_tx: watch::Sender<SessionStatus>,
        output: Arc<OutputQueue>,
    ) -> Self {
        let codec = FrameCodec::new(target.mode()).with_max_frame_size(options.max_frame_size);
        let policy = ReconnectPolicy::for_mode(target.mode(), &options.reconnect);
        Self {
            target,
            codec,
            connector,
            token_source: None,
            options,
            policy,
            counter: ReconnectAttemptCounter::default(),
            state: SessionState::Idle,
            connection: 0,
            last_error: None,
            socket: None,
            step: Step::Idle,
            auth_deadline: None,
            commands,
            status_tx,
            output,
            output_callback: None,
            failure_callbacks: Vec::new(),
            open_reply: None,
        }
    }

    /// Process events until the owning manager goes away.
    pub(crate) async fn run(mut self) {
        loop {
            let event = tokio::select! {
                cmd = self.commands.recv() => Event::Command(cmd),
                outcome = self.step.run(), if !self.step.is_idle() => Event::Step(outcome),
                ev = next_socket_event(&mut self.socket), if self.socket.is_some() => Event::Socket(ev),
                _ = grace_elapsed(self.auth_deadline), if self.auth_deadline.is_some() => {
                    Event::AuthGraceElapsed
                }
            };

            match event {
                Event::Command(None) => break,
                Event::Command(Some(cmd)) => self.on_command(cmd).await,
                Event::Step(outcome) => self.on_step(outcome),
                Event::Socket(ev) => {
                    let ev = ev.unwrap_or(SocketEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "socket tasks ended".into(),
                    });
                    self.on_socket(ev);
                }
                Event::AuthGraceElapsed => {
                    debug!("no rejection within the grace period; handshake accepted");
                    self.accept();
                }
            }
        }

        debug!("session manager dropped; releasing resources");
        self.step = Step::Idle;
        self.socket = None;
        self.output.close();
    }

    // ── Commands ─────────────────────────────────────────────────

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Open {
                token_source,
                reply,
            } => {
                if self.state != SessionState::Idle {
                    let _ = reply.send(Err(StreamError::AlreadyOpened(self.state)));
                    return;
                }
                info!("opening session");
                self.token_source = Some(token_source);
                self.open_reply = Some(reply);
                self.start_connect();
            }
            Command::Send { frame, reply } => {
                let result = self.send_frame(frame).await;
                let _ = reply.send(result);
            }
            Command::Close { reply } => {
                self.close(NORMAL_CLOSURE, CLOSE_REASON).await;
                let _ = reply.send(());
            }
            Command::OnOutput(mut callback) => {
                for chunk in self.output.drain() {
                    callback(chunk);
                }
                self.output_callback = Some(callback);
            }
            Command::OnFailure(callback) => {
                if self.state == SessionState::Failed {
                    if let Some(failure) = &self.last_error {
                        callback(failure);
                    }
                }
                self.failure_callbacks.push(callback);
            }
        }
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), StreamError> {
        if !self.state.is_streaming() {
            return Err(StreamError::NotStreaming(self.state));
        }
        if let Frame::ControlClose { code, reason } = &frame {
            self.codec.check_outbound(&frame)?;
            self.close(*code, reason).await;
            return Ok(());
        }

        let msg = self.codec.encode(&frame)?;
        match self.socket.as_ref() {
            Some(socket) => socket.send(msg),
            None => Err(StreamError::NotStreaming(self.state)),
        }
    }

    // ── Connection lifecycle ─────────────────────────────────────

    fn start_connect(&mut self) {
        // At most one socket per session: the old one is gone before a
        // new attempt starts.
        self.release_socket();

        if let Err(e) = self.state.begin_connect() {
            warn!(error = %e, "connect requested in the wrong state");
            return;
        }
        self.publish();

        let connector = Arc::clone(&self.connector);
        let target = self.target.clone();
        let timeout = self.options.connect_timeout();
        self.step = Step::Connect(Box::pin(async move {
            match tokio::time::timeout(timeout, connector.connect(&target)).await {
                Ok(result) => result,
                Err(_) => Err(StreamError::Timeout(timeout)),
            }
        }));
    }

    fn on_step(&mut self, outcome: StepOutcome) {
        match outcome {
            StepOutcome::Connected(Ok(socket)) => self.on_socket_open(socket),
            StepOutcome::Connected(Err(e)) => self.recover(e),
            StepOutcome::Token(Ok(token)) => self.send_token(token),
            StepOutcome::Token(Err(e)) => self.fail(StreamError::Auth(e)),
            StepOutcome::BackoffElapsed => {
                info!(attempt = self.counter.attempts(), "reconnecting");
                self.start_connect();
            }
        }
    }

    fn on_socket_open(&mut self, socket: Socket) {
        if self.state.begin_authenticate().is_err() {
            // Dropping the socket releases it.
            return;
        }
        self.socket = Some(socket);
        self.publish();

        let Some(source) = self.token_source.clone() else {
            self.fail(StreamError::Auth(AuthError::Missing));
            return;
        };
        self.step = Step::Token(Box::pin(async move { source.get_token().await }));
    }

    fn send_token(&mut self, token: String) {
        let msg = self.codec.encode_token(&token);
        let sent = match self.socket.as_ref() {
            Some(socket) => socket.send(msg),
            None => Err(StreamError::ChannelClosed),
        };
        match sent {
            Ok(()) => {
                debug!("session token sent");
                self.auth_deadline = Some(Instant::now() + self.options.auth_grace());
            }
            Err(e) => self.recover(e),
        }
    }

    fn accept(&mut self) {
        if self.state.accept().is_err() {
            return;
        }
        self.auth_deadline = None;
        self.counter.reset();
        self.connection += 1;
        self.last_error = None;
        info!(connection = self.connection, "streaming");
        self.publish();

        if let Some(reply) = self.open_reply.take() {
            let _ = reply.send(Ok(()));
        }
    }

    // ── Socket events ────────────────────────────────────────────

    fn on_socket(&mut self, event: SocketEvent) {
        let token_sent = self.auth_deadline.is_some();
        match (self.state, event) {
            (SessionState::Authenticating, SocketEvent::Message(msg)) => {
                if !token_sent {
                    debug!("dropping message received before the token was sent");
                    return;
                }
                // No explicit ack exists: the first frame after the token
                // is taken as acceptance.
                self.accept();
                self.deliver(msg);
            }
            (SessionState::Streaming, SocketEvent::Message(msg)) => self.deliver(msg),
            (SessionState::Authenticating, SocketEvent::Closed { code, reason }) if token_sent => {
                self.fail(StreamError::Auth(AuthError::Rejected { code, reason }));
            }
            (SessionState::Streaming, SocketEvent::Closed { code, reason })
                if code == NORMAL_CLOSURE =>
            {
                self.finish_remote_close(&reason);
            }
            (_, SocketEvent::Closed { code, reason }) => {
                self.recover(StreamError::UnexpectedClose { code, reason });
            }
            (_, SocketEvent::Error(e)) => self.recover(StreamError::Transport(e)),
            (state, SocketEvent::Message(_)) => {
                debug!(%state, "ignoring message outside a live connection");
            }
        }
    }

    fn deliver(&mut self, msg: WireMessage) {
        match self.codec.decode(msg) {
            Ok(Frame::Output(data)) => {
                let chunk = OutputChunk {
                    connection: self.connection,
                    data,
                };
                match self.output_callback.as_mut() {
                    Some(callback) => callback(chunk),
                    None => {
                        if self.output.push(chunk) {
                            debug!("output buffer full; dropped oldest chunk");
                        }
                    }
                }
            }
            Ok(other) => debug!(kind = other.kind(), "ignoring unexpected inbound frame"),
            Err(e) => warn!(error = %e, "dropping malformed frame"),
        }
    }

    // ── Failure handling ─────────────────────────────────────────

    /// Hand a failure to the reconnection policy.
    fn recover(&mut self, err: StreamError) {
        if !err.is_transient() {
            self.fail(err);
            return;
        }

        self.release_socket();
        self.step = Step::Idle;
        self.auth_deadline = None;

        match self.policy.decide(&mut self.counter) {
            ReconnectDecision::Retry { attempt, delay } => {
                if let Err(e) = self.state.begin_reconnect() {
                    warn!(error = %e, "reconnect requested in the wrong state");
                    return;
                }
                warn!(
                    error = %err,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "connection lost; scheduling reconnect"
                );
                self.last_error = Some(SessionFailure::from_error(&err, attempt));
                self.step = Step::Backoff(Box::pin(tokio::time::sleep(delay)));
                self.publish();
            }
            ReconnectDecision::GiveUp { attempts } => {
                warn!(error = %err, attempts, "reconnect budget exhausted");
                self.fail(StreamError::ReconnectExhausted { attempts });
            }
        }
    }

    fn fail(&mut self, err: StreamError) {
        self.release_socket();
        self.step = Step::Idle;
        self.auth_deadline = None;

        if self.state.fail().is_err() {
            return;
        }

        let failure = SessionFailure::from_error(&err, self.counter.attempts());
        error!(error = %err, attempts = failure.attempts, "session failed");
        for callback in &self.failure_callbacks {
            callback(&failure);
        }
        self.last_error = Some(failure);
        self.publish();
        self.output.close();

        if let Some(reply) = self.open_reply.take() {
            let _ = reply.send(Err(err));
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────

    fn finish_remote_close(&mut self, reason: &str) {
        self.release_socket();
        if self.state.finish_close().is_ok() {
            info!(reason, "server ended the stream");
            self.publish();
            self.output.close();
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        match self.state {
            SessionState::Closed | SessionState::Failed => return,
            SessionState::Idle => {
                let _ = self.state.finish_close();
                self.publish();
                self.output.close();
                return;
            }
            _ => {}
        }

        // Cancels a pending connect, token fetch or reconnect timer.
        self.step = Step::Idle;
        self.auth_deadline = None;

        if let Err(e) = self.state.begin_close() {
            warn!(error = %e, "close requested in the wrong state");
            return;
        }
        self.publish();

        if let Some(socket) = self.socket.take() {
            socket.close(code, reason, self.options.close_timeout()).await;
        }

        let _ = self.state.finish_close();
        info!("session closed");
        self.publish();
        self.output.close();

        if let Some(reply) = self.open_reply.take() {
            let _ = reply.send(Err(StreamError::NotStreaming(SessionState::Closed)));
        }
    }

    fn release_socket(&mut self) {
        if self.socket.take().is_some() {
            debug!("socket released");
        }
    }

    fn publish(&self) {
        debug!(state = %self.state, attempts = self.counter.attempts(), "session state");
        self.status_tx.send_replace(SessionStatus {
            state: self.state,
            last_error: self.last_error.clone(),
            attempts: self.counter.attempts(),
            connection: self.connection,
        });
    }
}
