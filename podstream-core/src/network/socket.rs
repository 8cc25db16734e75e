use std::fmt::Display;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::{ABNORMAL_CLOSURE, WireMessage};
use crate::error::StreamError;

/// Default depth of the outbound and inbound queues.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Something that happened on a live socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A data message from the peer.
    Message(WireMessage),
    /// The peer closed the socket, or it vanished (`ABNORMAL_CLOSURE`).
    Closed { code: u16, reason: String },
    /// The transport failed.
    Error(String),
}

/// One open socket.
///
/// Owning a `Socket` is owning the connection: dropping it stops the
/// background reader and writer tasks and releases the transport.
#[derive(Debug)]
pub struct Socket {
    // Outbound messages to the background writer task
    tx: mpsc::Sender<WireMessage>,
    // Events from the background reader task
    rx: mpsc::Receiver<SocketEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl Socket {
    /// Assemble a socket from channels a transport already drives.
    ///
    /// `tasks` are aborted when the socket is dropped.
    pub fn from_parts(
        tx: mpsc::Sender<WireMessage>,
        rx: mpsc::Receiver<SocketEvent>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self { tx, rx, tasks }
    }

    /// Drive a message stream with a reader and a writer task.
    pub fn spawn<S, E>(stream: S, queue_depth: usize) -> Self
    where
        S: Stream<Item = Result<WireMessage, E>> + Sink<WireMessage, Error = E> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (mut net_writer, mut net_reader) = stream.split();

        // User -> Network
        let (user_tx, mut network_rx) = mpsc::channel::<WireMessage>(queue_depth);

        // Network -> User
        let (network_tx, user_rx) = mpsc::channel::<SocketEvent>(queue_depth);

        // Writer task: User -> Network
        let writer_events = network_tx.clone();
        let writer = tokio::spawn(async move {
            while let Some(msg) = network_rx.recv().await {
                let closing = matches!(msg, WireMessage::Close { .. });
                if let Err(e) = net_writer.send(msg).await {
                    warn!("socket write error: {e}");
                    let _ = writer_events.send(SocketEvent::Error(e.to_string())).await;
                    break;
                }
                if closing {
                    // Nothing may follow a close frame.
                    break;
                }
            }
        });

        // Reader task: Network -> User
        let reader = tokio::spawn(async move {
            let mut closed = false;
            while let Some(result) = net_reader.next().await {
                let event = match result {
                    Ok(WireMessage::Close { code, reason }) if !closed => {
                        closed = true;
                        SocketEvent::Closed { code, reason }
                    }
                    // Keep reading after a close so the transport can
                    // finish its closing handshake.
                    Ok(_) if closed => continue,
                    Ok(msg) => SocketEvent::Message(msg),
                    Err(e) => {
                        debug!("socket read error: {e}");
                        let _ = network_tx.send(SocketEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                if network_tx.send(event).await.is_err() {
                    // Socket handle was dropped, stop reading
                    return;
                }
            }
            if !closed {
                let _ = network_tx
                    .send(SocketEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "connection dropped".into(),
                    })
                    .await;
            }
        });

        Self::from_parts(user_tx, user_rx, vec![writer, reader])
    }

    /// Queue a message for the writer task without waiting.
    ///
    /// A full queue means the peer stopped reading; that is reported as a
    /// transport error instead of blocking the caller.
    pub fn send(&self, msg: WireMessage) -> Result<(), StreamError> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(StreamError::Transport("outbound queue full".into()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(StreamError::ChannelClosed),
        }
    }

    /// Next event. `None` means the socket tasks are gone.
    pub async fn recv(&mut self) -> Option<SocketEvent> {
        self.rx.recv().await
    }

    /// Send a close frame and wait up to `wait` for the peer to answer,
    /// then release the socket.
    ///
    /// Returns within `wait` even when the writer is stalled.
    pub async fn close(mut self, code: u16, reason: &str, wait: Duration) {
        let close = WireMessage::Close {
            code,
            reason: reason.to_owned(),
        };
        if let Err(e) = self.tx.try_send(close) {
            debug!("close frame not queued ({e}); dropping socket");
            return;
        }

        let acknowledged = tokio::time::timeout(wait, async {
            while let Some(event) = self.rx.recv().await {
                match event {
                    SocketEvent::Closed { .. } | SocketEvent::Error(_) => return,
                    SocketEvent::Message(_) => continue,
                }
            }
        })
        .await;

        if acknowledged.is_err() {
            debug!("peer did not acknowledge close within {wait:?}; dropping socket");
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::channel::mpsc as fmpsc;

    use super::*;

    /// A duplex built from two futures channels: what the socket writes
    /// appears on `sent`, what the test pushes on `incoming` is read.
    struct Duplex {
        incoming: fmpsc::UnboundedReceiver<Result<WireMessage, String>>,
        sent: fmpsc::UnboundedSender<WireMessage>,
    }

    impl Stream for Duplex {
        type Item = Result<WireMessage, String>;

        fn poll_next(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Option<Self::Item>> {
            self.incoming.poll_next_unpin(cx)
        }
    }

    impl Sink<WireMessage> for Duplex {
        type Error = String;

        fn poll_ready(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), String>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn start_send(self: std::pin::Pin<&mut Self>, item: WireMessage) -> Result<(), String> {
            self.sent.unbounded_send(item).map_err(|e| e.to_string())
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), String>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_close(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), String>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    /// A peer that never reads and never writes.
    struct Stalled;

    impl Stream for Stalled {
        type Item = Result<WireMessage, String>;

        fn poll_next(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Option<Self::Item>> {
            std::task::Poll::Pending
        }
    }

    impl Sink<WireMessage> for Stalled {
        type Error = String;

        fn poll_ready(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), String>> {
            std::task::Poll::Pending
        }

        fn start_send(self: std::pin::Pin<&mut Self>, _item: WireMessage) -> Result<(), String> {
            Ok(())
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), String>> {
            std::task::Poll::Pending
        }

        fn poll_close(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), String>> {
            std::task::Poll::Pending
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_does_not_block() {
        let socket = Socket::spawn(Stalled, 1);

        // The writer takes the first message and stalls in the sink; the
        // second fills the queue.
        socket.send(WireMessage::Text("a".into())).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        socket.send(WireMessage::Text("b".into())).unwrap();

        let err = socket.send(WireMessage::Text("c".into())).unwrap_err();
        assert!(matches!(err, StreamError::Transport(_)));

        let closed = tokio::time::timeout(
            Duration::from_secs(60),
            socket.close(1000, "bye", Duration::from_secs(2)),
        )
        .await;
        assert!(closed.is_ok());
    }

    #[tokio::test]
    async fn relays_both_directions() {
        let (in_tx, in_rx) = fmpsc::unbounded();
        let (sent_tx, mut sent_rx) = fmpsc::unbounded();
        let mut socket = Socket::spawn(
            Duplex {
                incoming: in_rx,
                sent: sent_tx,
            },
            8,
        );

        socket
            .send(WireMessage::Binary(Bytes::from_static(b"ls\r")))
            .unwrap();
        assert_eq!(
            sent_rx.next().await.unwrap(),
            WireMessage::Binary(Bytes::from_static(b"ls\r"))
        );

        in_tx
            .unbounded_send(Ok(WireMessage::Text("out".into())))
            .unwrap();
        assert_eq!(
            socket.recv().await.unwrap(),
            SocketEvent::Message(WireMessage::Text("out".into()))
        );
    }

    #[tokio::test]
    async fn stream_end_reports_abnormal_close() {
        let (in_tx, in_rx) = fmpsc::unbounded();
        let (sent_tx, _sent_rx) = fmpsc::unbounded();
        let mut socket = Socket::spawn(
            Duplex {
                incoming: in_rx,
                sent: sent_tx,
            },
            8,
        );
        drop(in_tx);

        assert_eq!(
            socket.recv().await.unwrap(),
            SocketEvent::Closed {
                code: ABNORMAL_CLOSURE,
                reason: "connection dropped".into()
            }
        );
    }

    #[tokio::test]
    async fn read_error_is_reported() {
        let (in_tx, in_rx) = fmpsc::unbounded();
        let (sent_tx, _sent_rx) = fmpsc::unbounded();
        let mut socket = Socket::spawn(
            Duplex {
                incoming: in_rx,
                sent: sent_tx,
            },
            8,
        );
        in_tx.unbounded_send(Err("reset by peer".into())).unwrap();

        assert_eq!(
            socket.recv().await.unwrap(),
            SocketEvent::Error("reset by peer".into())
        );
    }
}
