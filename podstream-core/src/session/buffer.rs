//! Output buffering between the session task and the viewport.
//!
//! Chunks are kept in arrival order. The session task is the only
//! producer, so chunks from one connection are always queued before any
//! chunk of the next.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

// ── BufferPolicy ─────────────────────────────────────────────────

/// How many undelivered chunks a session may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BufferPolicy {
    /// Keep everything until the viewport drains it.
    #[default]
    Unbounded,
    /// Keep at most `capacity` chunks, discarding the oldest.
    DropOldest { capacity: usize },
}

// ── OutputChunk ──────────────────────────────────────────────────

/// One delivered `Output` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Which connection produced the chunk (1 for the first `Streaming`
    /// socket, incremented on every reconnect that reaches `Streaming`).
    pub connection: u64,
    pub data: Bytes,
}

// ── OutputBuffer ─────────────────────────────────────────────────

/// Ordered queue of chunks not yet delivered.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    policy: BufferPolicy,
    queue: VecDeque<OutputChunk>,
    dropped: u64,
}

impl OutputBuffer {
    pub fn new(policy: BufferPolicy) -> Self {
        Self {
            policy,
            queue: VecDeque::new(),
            dropped: 0,
        }
    }

    /// Append a chunk. Returns `true` if an older chunk was discarded.
    pub fn push(&mut self, chunk: OutputChunk) -> bool {
        let mut evicted = false;
        if let BufferPolicy::DropOldest { capacity } = self.policy {
            if capacity == 0 {
                self.dropped += 1;
                return true;
            }
            while self.queue.len() >= capacity {
                self.queue.pop_front();
                self.dropped += 1;
                evicted = true;
            }
        }
        self.queue.push_back(chunk);
        evicted
    }

    pub fn pop(&mut self) -> Option<OutputChunk> {
        self.queue.pop_front()
    }

    pub fn drain(&mut self) -> Vec<OutputChunk> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Chunks discarded by the `DropOldest` policy so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

// ── OutputQueue ──────────────────────────────────────────────────

struct QueueState {
    buffer: OutputBuffer,
    closed: bool,
}

/// The buffer shared by the session task (producer) and the session
/// manager (consumer).
pub(crate) struct OutputQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl OutputQueue {
    pub(crate) fn new(policy: BufferPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState {
                buffer: OutputBuffer::new(policy),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn push(&self, chunk: OutputChunk) -> bool {
        let evicted = self.lock().buffer.push(chunk);
        self.notify.notify_waiters();
        evicted
    }

    pub(crate) fn drain(&self) -> Vec<OutputChunk> {
        self.lock().buffer.drain()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.lock().buffer.dropped()
    }

    /// No more chunks will arrive; wakes any waiting consumer.
    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Next chunk in arrival order, or `None` once the session has ended
    /// and everything was delivered.
    pub(crate) async fn next(&self) -> Option<OutputChunk> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some(chunk) = state.buffer.pop() {
                    return Some(chunk);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }
}
