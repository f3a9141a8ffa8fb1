//! Frame types shared by the connection manager and its callers.

use std::fmt;

use tokio_tungstenite::tungstenite::Message;

/// Discriminator for the kinds of data frames the manager can write.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// UTF-8 text frame
    Text,
    /// Opaque binary frame
    Binary,
    /// Control PING frame
    Ping,
    /// Control PONG frame
    Pong,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Ping => "ping",
            Self::Pong => "pong",
        };
        f.write_str(name)
    }
}

/// A single outbound frame.
///
/// The manager never looks inside the payload; it only needs to know which
/// WebSocket opcode to use when writing it.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
}

impl Frame {
    /// Build a frame of the given kind from raw bytes.
    ///
    /// Returns `None` when a text frame is requested for a payload that is not valid UTF-8.
    #[must_use]
    pub fn from_parts(kind: FrameKind, payload: Vec<u8>) -> Option<Self> {
        match kind {
            FrameKind::Text => String::from_utf8(payload).ok().map(Self::Text),
            FrameKind::Binary => Some(Self::Binary(payload)),
            FrameKind::Ping => Some(Self::Ping(payload)),
            FrameKind::Pong => Some(Self::Pong(payload)),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        match self {
            Self::Text(_) => FrameKind::Text,
            Self::Binary(_) => FrameKind::Binary,
            Self::Ping(_) => FrameKind::Ping,
            Self::Pong(_) => FrameKind::Pong,
        }
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) | Self::Ping(bytes) | Self::Pong(bytes) => bytes,
        }
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::text(text),
            Frame::Binary(bytes) => Message::binary(bytes),
            Frame::Ping(bytes) => Message::Ping(bytes.into()),
            Frame::Pong(bytes) => Message::Pong(bytes.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_rejects_invalid_utf8_text() {
        assert!(Frame::from_parts(FrameKind::Text, vec![0xff, 0xfe]).is_none());
        assert_eq!(
            Frame::from_parts(FrameKind::Binary, vec![0xff, 0xfe]),
            Some(Frame::Binary(vec![0xff, 0xfe]))
        );
    }

    #[test]
    fn frame_maps_to_matching_message() {
        let message: Message = Frame::from("ping").into();
        assert!(matches!(message, Message::Text(ref text) if text.as_str() == "ping"));

        let message: Message = Frame::Ping(b"hb".to_vec()).into();
        assert!(matches!(message, Message::Ping(ref bytes) if bytes.as_ref() == b"hb"));
    }

    #[test]
    fn payload_and_kind_round_out_the_frame() {
        let frame = Frame::Pong(vec![1, 2, 3]);

        assert_eq!(frame.kind(), FrameKind::Pong);
        assert_eq!(frame.payload(), &[1, 2, 3]);
        assert_eq!(FrameKind::Binary.to_string(), "binary");
    }
}
