//! Error codes and error types (RFC 7540 Section 7).
//!
//! Every failure detected while processing a connection is an [`H2Error`]:
//! connection-scoped errors end the connection with GOAWAY, stream-scoped
//! errors end a single stream with RST_STREAM.

use std::fmt;

use thiserror::Error;

/// HTTP/2 error codes as carried in RST_STREAM and GOAWAY payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Map a wire value to an error code. Unknown codes become `InternalError`.
    #[must_use]
    pub fn from_u32(value: u32) -> Self {
        match value {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            _ => Self::InternalError,
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> u32 {
        code as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoError => "NO_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::FlowControlError => "FLOW_CONTROL_ERROR",
            Self::SettingsTimeout => "SETTINGS_TIMEOUT",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::FrameSizeError => "FRAME_SIZE_ERROR",
            Self::RefusedStream => "REFUSED_STREAM",
            Self::Cancel => "CANCEL",
            Self::CompressionError => "COMPRESSION_ERROR",
            Self::ConnectError => "CONNECT_ERROR",
            Self::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            Self::InadequateSecurity => "INADEQUATE_SECURITY",
            Self::Http11Required => "HTTP_1_1_REQUIRED",
        };
        f.write_str(name)
    }
}

/// A protocol failure, scoped either to the whole connection or to one stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum H2Error {
    #[error("connection error ({code}): {message}")]
    Connection { code: ErrorCode, message: String },

    #[error("stream {stream_id} error ({code}): {message}")]
    Stream {
        stream_id: u32,
        code: ErrorCode,
        message: String,
    },
}

impl H2Error {
    #[must_use]
    pub fn connection(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Connection {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn stream(stream_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Stream {
            stream_id,
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::connection(ErrorCode::ProtocolError, message)
    }

    #[must_use]
    pub fn frame_size(message: impl Into<String>) -> Self {
        Self::connection(ErrorCode::FrameSizeError, message)
    }

    #[must_use]
    pub fn flow_control(message: impl Into<String>) -> Self {
        Self::connection(ErrorCode::FlowControlError, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::connection(ErrorCode::InternalError, message)
    }

    #[must_use]
    pub fn stream_closed(stream_id: u32, message: impl Into<String>) -> Self {
        Self::stream(stream_id, ErrorCode::StreamClosed, message)
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Connection { code, .. } | Self::Stream { code, .. } => *code,
        }
    }

    /// The stream this error is scoped to, `None` for connection errors.
    #[must_use]
    pub fn stream_id(&self) -> Option<u32> {
        match self {
            Self::Connection { .. } => None,
            Self::Stream { stream_id, .. } => Some(*stream_id),
        }
    }

    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Connection { message, .. } | Self::Stream { message, .. } => message,
        }
    }
}

/// Failures inside the HPACK codec.
///
/// None of these are recoverable: once a header block fails to decode the
/// dynamic table can no longer be assumed to match the peer's, so they all
/// surface as connection-level PROTOCOL_ERROR.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HpackError {
    #[error("invalid table index {0}")]
    InvalidIndex(usize),

    #[error("header block truncated while reading {0}")]
    Truncated(&'static str),

    #[error("integer exceeds the decoder's limit")]
    IntegerOverflow,

    #[error("invalid huffman-coded string: {0}")]
    InvalidHuffman(&'static str),

    #[error("dynamic table size update to {requested} exceeds limit {limit}")]
    TableSizeExceeded { requested: usize, limit: usize },

    #[error("dynamic table size update after a header field")]
    MisplacedSizeUpdate,

    #[error("decoded header list exceeds {limit} bytes")]
    HeaderListTooLarge { limit: usize },
}

impl From<HpackError> for H2Error {
    fn from(err: HpackError) -> Self {
        H2Error::protocol(format!("HPACK decode failed: {err}"))
    }
}

impl From<std::io::Error> for H2Error {
    fn from(err: std::io::Error) -> Self {
        H2Error::internal(err.to_string())
    }
}
