//! WebSocket transport via `tokio-tungstenite`.
//!
//! Text and binary messages map one-to-one onto [`WireMessage`]; ping and
//! pong are answered by tungstenite and never reach the session.

use std::borrow::Cow;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;
use url::Url;

use crate::codec::WireMessage;
use crate::error::{AuthError, StreamError};
use crate::network::socket::{DEFAULT_QUEUE_DEPTH, Socket};
use crate::network::Connector;
use crate::target::SessionTarget;

/// Close code for a close frame that carried no status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// Connects sessions to `{base}/api/ws/{logs|terminal}/{id}`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: Url,
    queue_depth: usize,
}

impl WsConnector {
    /// `base_url` is the dashboard's server, e.g. `https://tigron-server.lan`.
    pub fn new(base_url: &str) -> Result<Self, StreamError> {
        Ok(Self::from_url(Url::parse(base_url)?))
    }

    pub fn from_url(base_url: Url) -> Self {
        Self {
            base_url,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }

    /// Depth of the per-socket outbound and inbound queues.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, target: &SessionTarget) -> Result<Socket, StreamError> {
        let url = target.endpoint(&self.base_url)?;
        debug!(%url, "opening websocket");

        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(classify_connect_error)?;

        let stream = ws
            .with(|msg: WireMessage| future::ready(Ok::<_, WsError>(to_message(msg))))
            .filter_map(|item| {
                future::ready(match item {
                    Ok(msg) => from_message(msg).map(Ok),
                    Err(e) => Some(Err(e)),
                })
            });

        Ok(Socket::spawn(stream, self.queue_depth))
    }
}

/// An upgrade refused with 401/403 will not succeed on retry.
fn classify_connect_error(err: WsError) -> StreamError {
    if let WsError::Http(response) = &err {
        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return StreamError::Auth(AuthError::Rejected {
                code: status,
                reason: "websocket upgrade refused".into(),
            });
        }
    }
    StreamError::Connect(err.to_string())
}

fn to_message(msg: WireMessage) -> Message {
    match msg {
        WireMessage::Text(text) => Message::Text(text),
        WireMessage::Binary(bytes) => Message::Binary(bytes.to_vec()),
        WireMessage::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason),
        })),
    }
}

fn from_message(msg: Message) -> Option<WireMessage> {
    match msg {
        Message::Text(text) => Some(WireMessage::Text(text)),
        Message::Binary(bytes) => Some(WireMessage::Binary(Bytes::from(bytes))),
        Message::Close(Some(frame)) => Some(WireMessage::Close {
            code: u16::from(frame.code),
            reason: frame.reason.into_owned(),
        }),
        Message::Close(None) => Some(WireMessage::Close {
            code: NO_STATUS_RECEIVED,
            reason: String::new(),
        }),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}
