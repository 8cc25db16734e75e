//! Frame codec: typed session frames to and from socket messages.
//!
//! # Wire Protocol
//!
//! ```text
//! Client ──[Text: bearer token]──────────────────► Server   (first message)
//!
//! LOG
//! Server ──[Text: log chunk]─────────────────────► Client   (repeated)
//!
//! TERMINAL
//! Client ──[Binary: keystrokes]──────────────────► Server
//! Client ──[Text: {"type":"resize","cols":..,"rows":..}]─► Server
//! Server ──[Text | Binary: terminal output]──────► Client   (verbatim)
//!
//! Either ──[Close: code, reason]─────────────────► Other
//! ```
//!
//! Keystrokes always travel as binary messages and resize requests always
//! as text messages, so the message opcode alone separates them and a
//! resize can never be read as typed input.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, StreamError};
use crate::target::SessionMode;

/// Largest single payload accepted in either direction.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Close code for a normal, expected closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when a socket vanished without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

// ── Frame ────────────────────────────────────────────────────────

/// One logical unit of the streaming protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Server output: a log chunk or raw terminal bytes.
    Output(Bytes),
    /// Keystrokes for the remote shell. TERMINAL only.
    Input(Bytes),
    /// Terminal window size change. TERMINAL only.
    Resize { cols: u16, rows: u16 },
    /// Close request or notification.
    ControlClose { code: u16, reason: String },
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Output(_) => "output",
            Self::Input(_) => "input",
            Self::Resize { .. } => "resize",
            Self::ControlClose { .. } => "close",
        }
    }

    /// Whether `mode` may carry this frame at all.
    pub fn allowed_in(&self, mode: SessionMode) -> bool {
        match self {
            Self::Output(_) | Self::ControlClose { .. } => true,
            Self::Input(_) | Self::Resize { .. } => mode == SessionMode::Terminal,
        }
    }
}

// ── WireMessage ──────────────────────────────────────────────────

/// A transport-neutral socket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
    Close { code: u16, reason: String },
}

impl WireMessage {
    fn payload_len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
            Self::Close { reason, .. } => reason.len(),
        }
    }
}

/// Out-of-band control messages sent as JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Resize { cols: u16, rows: u16 },
}

// ── FrameCodec ───────────────────────────────────────────────────

/// Per-session codec; the mode decides how messages are interpreted.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    mode: SessionMode,
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Override the payload limit.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Reject frames the caller may not send in this mode.
    pub fn check_outbound(&self, frame: &Frame) -> Result<(), StreamError> {
        let outbound = !matches!(frame, Frame::Output(_));
        if outbound && frame.allowed_in(self.mode) {
            return Ok(());
        }
        Err(StreamError::UnsupportedFrame {
            frame: frame.kind(),
            mode: self.mode.as_str(),
        })
    }

    /// The handshake message: the bearer token as a bare string.
    pub fn encode_token(&self, token: &str) -> WireMessage {
        WireMessage::Text(token.to_owned())
    }

    /// Encode an outbound frame.
    pub fn encode(&self, frame: &Frame) -> Result<WireMessage, StreamError> {
        self.check_outbound(frame)?;

        let msg = match frame {
            Frame::Output(_) => {
                return Err(StreamError::UnsupportedFrame {
                    frame: frame.kind(),
                    mode: self.mode.as_str(),
                });
            }
            Frame::Input(bytes) => WireMessage::Binary(bytes.clone()),
            Frame::Resize { cols, rows } => {
                let ctl = ControlMessage::Resize {
                    cols: *cols,
                    rows: *rows,
                };
                let text = serde_json::to_string(&ctl)
                    .map_err(|e| DecodeError::Control(e.to_string()))?;
                WireMessage::Text(text)
            }
            Frame::ControlClose { code, reason } => WireMessage::Close {
                code: *code,
                reason: reason.clone(),
            },
        };

        self.check_size(&msg)?;
        Ok(msg)
    }

    /// Decode an inbound message.
    ///
    /// Errors here are per-frame; the caller drops the frame and keeps
    /// the connection.
    pub fn decode(&self, msg: WireMessage) -> Result<Frame, DecodeError> {
        self.check_size(&msg)?;

        match msg {
            WireMessage::Close { code, reason } => Ok(Frame::ControlClose { code, reason }),
            WireMessage::Text(text) => Ok(Frame::Output(Bytes::from(text))),
            WireMessage::Binary(bytes) => match self.mode {
                SessionMode::Log => {
                    if std::str::from_utf8(&bytes).is_err() {
                        return Err(DecodeError::InvalidUtf8);
                    }
                    Ok(Frame::Output(bytes))
                }
                SessionMode::Terminal => Ok(Frame::Output(bytes)),
            },
        }
    }

    fn check_size(&self, msg: &WireMessage) -> Result<(), DecodeError> {
        let size = msg.payload_len();
        if size > self.max_frame_size {
            return Err(DecodeError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_is_text_and_input_is_binary() {
        let codec = FrameCodec::new(SessionMode::Terminal);

        let resize = codec.encode(&Frame::Resize { cols: 120, rows: 40 }).unwrap();
        match resize {
            WireMessage::Text(text) => {
                let ctl: ControlMessage = serde_json::from_str(&text).unwrap();
                assert_eq!(ctl, ControlMessage::Resize { cols: 120, rows: 40 });
            }
            other => panic!("expected text, got {other:?}"),
        }

        // Keystrokes that happen to look like a resize envelope still go binary.
        let sneaky = Bytes::from_static(br#"{"type":"resize","cols":1,"rows":1}"#);
        let input = codec.encode(&Frame::Input(sneaky.clone())).unwrap();
        assert_eq!(input, WireMessage::Binary(sneaky));
    }

    #[test]
    fn log_mode_rejects_terminal_frames() {
        let codec = FrameCodec::new(SessionMode::Log);
        let err = codec
            .encode(&Frame::Input(Bytes::from_static(b"ls\n")))
            .unwrap_err();
        assert!(matches!(err, StreamError::UnsupportedFrame { frame: "input", .. }));
        assert!(codec.encode(&Frame::Resize { cols: 1, rows: 1 }).is_err());
    }

    #[test]
    fn output_is_never_outbound() {
        let codec = FrameCodec::new(SessionMode::Terminal);
        assert!(
            codec
                .encode(&Frame::Output(Bytes::from_static(b"x")))
                .is_err()
        );
    }

    #[test]
    fn log_decode_requires_utf8() {
        let codec = FrameCodec::new(SessionMode::Log);
        let ok = codec.decode(WireMessage::Text("line 1\n".into())).unwrap();
        assert_eq!(ok, Frame::Output(Bytes::from_static(b"line 1\n")));

        let bad = codec.decode(WireMessage::Binary(Bytes::from_static(&[0xff, 0xfe])));
        assert_eq!(bad, Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn terminal_decode_is_verbatim() {
        let codec = FrameCodec::new(SessionMode::Terminal);
        let raw = Bytes::from_static(&[0x1b, b'[', b'H', 0xff]);
        assert_eq!(
            codec.decode(WireMessage::Binary(raw.clone())).unwrap(),
            Frame::Output(raw)
        );
    }

    #[test]
    fn close_decodes_to_control_close() {
        let codec = FrameCodec::new(SessionMode::Log);
        let frame = codec
            .decode(WireMessage::Close {
                code: 4001,
                reason: "bad token".into(),
            })
            .unwrap();
        assert_eq!(
            frame,
            Frame::ControlClose {
                code: 4001,
                reason: "bad token".into()
            }
        );
    }

    #[test]
    fn oversized_frames_rejected() {
        let codec = FrameCodec::new(SessionMode::Terminal).with_max_frame_size(4);
        assert_eq!(
            codec.decode(WireMessage::Text("too long".into())),
            Err(DecodeError::FrameTooLarge { size: 8, max: 4 })
        );
        assert!(
            codec
                .encode(&Frame::Input(Bytes::from_static(b"12345")))
                .is_err()
        );
    }

    #[test]
    fn token_is_bare_text() {
        let codec = FrameCodec::new(SessionMode::Log);
        assert_eq!(codec.encode_token("abc"), WireMessage::Text("abc".into()));
    }
}
