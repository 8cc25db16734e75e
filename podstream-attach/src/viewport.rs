//! Local terminal side of a session.
//!
//! Log sessions are printed to stdout as they arrive. Shell sessions put
//! the local terminal in raw mode and bridge stdin, stdout and the window
//! size to the remote shell until the user detaches with Ctrl-].

use std::time::Duration;

use bytes::Bytes;
use crossterm::terminal::{self, disable_raw_mode, enable_raw_mode};
use podstream_core::{OutputChunk, SessionManager, SessionState, SessionStatus, StreamError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Ctrl-]
pub const DETACH_BYTE: u8 = 0x1d;

const SIZE_POLL_INTERVAL: Duration = Duration::from_millis(250);
const STDIN_CHUNK: usize = 1024;

// ── Raw mode ─────────────────────────────────────────────────────

/// Restores cooked mode when dropped.
pub struct RawModeGuard(bool);

impl RawModeGuard {
    pub fn enable() -> Self {
        match enable_raw_mode() {
            Ok(()) => Self(true),
            Err(e) => {
                warn!("failed to enable raw mode: {e}");
                Self(false)
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.0 {
            let _ = disable_raw_mode();
        }
    }
}

// ── Output ───────────────────────────────────────────────────────

/// Tracks which connection output came from, to mark fresh streams.
#[derive(Debug, Default)]
pub struct StreamMarker {
    connection: Option<u64>,
}

impl StreamMarker {
    /// A separator line when `chunk` is the first of a new connection.
    pub fn separator(&mut self, chunk: &OutputChunk) -> Option<String> {
        match self.connection.replace(chunk.connection) {
            Some(previous) if previous != chunk.connection => Some(format!(
                "--- reconnected; stream restarted (connection {}) ---",
                chunk.connection
            )),
            _ => None,
        }
    }
}

/// Print log output until the session ends.
pub async fn follow_logs(session: &SessionManager) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut marker = StreamMarker::default();

    while let Some(chunk) = session.next_output().await {
        if let Some(line) = marker.separator(&chunk) {
            eprintln!("{line}");
        }
        stdout.write_all(&chunk.data).await?;
        stdout.flush().await?;
    }
    Ok(())
}

// ── Shell ────────────────────────────────────────────────────────

/// Split keyboard input at the detach key.
///
/// Returns the bytes to forward and whether the user asked to detach.
pub fn split_at_detach(input: &[u8]) -> (&[u8], bool) {
    match input.iter().position(|&b| b == DETACH_BYTE) {
        Some(pos) => (&input[..pos], true),
        None => (input, false),
    }
}

/// Bridge the local terminal to a shell session until it ends or the
/// user detaches.
pub async fn run_shell(session: &SessionManager) -> Result<(), StreamError> {
    let _raw = RawModeGuard::enable();

    let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(64);
    let reader = tokio::spawn(read_stdin(input_tx));

    let mut stdout = tokio::io::stdout();
    let mut size = terminal::size().ok();
    if let Some((cols, rows)) = size {
        forward(session.resize(cols, rows).await, session.state())?;
    }

    let mut ticker = tokio::time::interval(SIZE_POLL_INTERVAL);
    let result = loop {
        tokio::select! {
            chunk = session.next_output() => {
                let Some(chunk) = chunk else { break Ok(()) };
                if let Err(e) = write_out(&mut stdout, &chunk.data).await {
                    warn!("stdout closed: {e}");
                    break session.close().await;
                }
            }
            input = input_rx.recv() => {
                let Some(bytes) = input else {
                    debug!("stdin closed; detaching");
                    break session.close().await;
                };
                let (keys, detach) = split_at_detach(&bytes);
                if !keys.is_empty() {
                    let sent = session.send_input(Bytes::copy_from_slice(keys)).await;
                    if let Err(e) = forward(sent, session.state()) {
                        break Err(e);
                    }
                }
                if detach {
                    debug!("detach requested");
                    break session.close().await;
                }
            }
            _ = ticker.tick() => {
                let current = terminal::size().ok();
                if current != size {
                    if let Some((cols, rows)) = current {
                        let sent = session.resize(cols, rows).await;
                        if let Err(e) = forward(sent, session.state()) {
                            break Err(e);
                        }
                    }
                    size = current;
                }
            }
        }
    };

    reader.abort();
    result
}

/// Keystrokes and resizes are dropped while the session is reconnecting,
/// including those that raced the socket going away. `state` is read after
/// the send returned.
fn forward(result: Result<(), StreamError>, state: SessionState) -> Result<(), StreamError> {
    match result {
        Err(StreamError::NotStreaming(state)) => {
            debug!(%state, "input dropped while not streaming");
            Ok(())
        }
        Err(e) if e.is_transient() && !state.is_terminal() => {
            debug!(%state, "input dropped: {e}");
            Ok(())
        }
        other => other,
    }
}

async fn write_out(stdout: &mut tokio::io::Stdout, data: &[u8]) -> std::io::Result<()> {
    stdout.write_all(data).await?;
    stdout.flush().await
}

async fn read_stdin(tx: mpsc::Sender<Bytes>) {
    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; STDIN_CHUNK];
    loop {
        match stdin.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("stdin read failed: {e}");
                break;
            }
        }
    }
}

// ── Exit status ──────────────────────────────────────────────────

/// Process exit code for a finished session.
pub fn exit_code(status: &SessionStatus) -> i32 {
    match status.state {
        SessionState::Failed => 1,
        _ => 0,
    }
}

/// One-line summary printed when a session fails.
pub fn failure_message(status: &SessionStatus) -> Option<String> {
    if status.state != SessionState::Failed {
        return None;
    }
    if status.needs_reauthentication() {
        return Some("session key rejected; reauthenticate and try again".into());
    }
    Some(match &status.last_error {
        Some(failure) => format!("session failed: {}", failure.message),
        None => "session failed".into(),
    })
}

// ── Tests ────────────────────────────────────────────────────────
