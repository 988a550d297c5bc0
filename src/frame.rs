//! HTTP/2 frame layer (RFC 7540 Section 4 and 6).
//!
//! Parses the 9-byte frame header, buffers partial input until whole frames
//! are available, strips padding/priority fields from payloads, and
//! serializes outgoing frames as single contiguous buffers.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ErrorCode, H2Error};

/// Size of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 9;

/// Largest payload the 24-bit length field can declare.
pub const MAX_FRAME_PAYLOAD: u32 = (1 << 24) - 1;

/// The HTTP/2 connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// HTTP/2 frame types (RFC 7540 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

impl FrameType {
    /// `None` for extension frame types, which receivers ignore.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            _ => return None,
        })
    }

    /// Whether frames of this type must name a stream (non-zero id).
    #[must_use]
    pub fn is_stream_scoped(self) -> bool {
        matches!(
            self,
            Self::Data
                | Self::Headers
                | Self::Priority
                | Self::RstStream
                | Self::PushPromise
                | Self::Continuation
        )
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Data => "DATA",
            Self::Headers => "HEADERS",
            Self::Priority => "PRIORITY",
            Self::RstStream => "RST_STREAM",
            Self::Settings => "SETTINGS",
            Self::PushPromise => "PUSH_PROMISE",
            Self::Ping => "PING",
            Self::GoAway => "GOAWAY",
            Self::WindowUpdate => "WINDOW_UPDATE",
            Self::Continuation => "CONTINUATION",
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// HTTP/2 frame flags
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,    // 24 bits
    pub frame_type: u8, // raw, may be an unknown extension type
    pub flags: u8,
    pub stream_id: u32, // 31 bits (high bit reserved)
}

impl FrameHeader {
    pub fn new(frame_type: FrameType, flags: u8, stream_id: u32, length: u32) -> Self {
        Self {
            length,
            frame_type: frame_type as u8,
            flags,
            stream_id: stream_id & 0x7FFF_FFFF,
        }
    }

    /// Parse a 9-byte frame header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }

        let length = u32::from_be_bytes([0, data[0], data[1], data[2]]);
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & 0x7FFF_FFFF;

        Some(Self {
            length,
            frame_type: data[3],
            flags: data[4],
            stream_id,
        })
    }

    /// Known frame type, `None` for extension frames.
    #[must_use]
    pub fn kind(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }

    /// Total frame size including header
    #[must_use]
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    #[must_use]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Check if END_STREAM flag is set
    #[must_use]
    pub fn is_end_stream(&self) -> bool {
        self.has_flag(flags::END_STREAM)
    }

    /// Check if END_HEADERS flag is set
    #[must_use]
    pub fn is_end_headers(&self) -> bool {
        self.has_flag(flags::END_HEADERS)
    }

    /// ACK shares bit 0x1 with END_STREAM; only meaningful on SETTINGS and PING.
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.has_flag(flags::ACK)
    }

    /// Write the 9-byte header. The reserved stream id bit is always zero.
    pub fn encode(&self, dst: &mut BytesMut) {
        let length = self.length.to_be_bytes();
        dst.put_slice(&length[1..]);
        dst.put_u8(self.frame_type);
        dst.put_u8(self.flags);
        dst.put_u32(self.stream_id & 0x7FFF_FFFF);
    }
}

/// A complete frame: header plus exactly `header.length` payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

/// Parse one frame from the front of `buf`.
///
/// Returns `None` when fewer than 9 bytes are present or the declared payload
/// is not fully buffered yet; otherwise the frame and the bytes consumed.
pub fn read_frame(buf: &[u8]) -> Option<(Frame, usize)> {
    let header = FrameHeader::parse(buf)?;
    let total = header.total_size();
    if buf.len() < total {
        return None;
    }
    let payload = Bytes::copy_from_slice(&buf[FRAME_HEADER_LEN..total]);
    Some((Frame { header, payload }, total))
}

/// Accumulates transport bytes and yields whole frames.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn consume(&mut self, n: usize) {
        self.buffer.advance(n.min(self.buffer.len()));
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Header of the next frame, available as soon as 9 bytes are buffered.
    #[must_use]
    pub fn peek_header(&self) -> Option<FrameHeader> {
        FrameHeader::parse(&self.buffer)
    }

    /// Split off the next complete frame without copying its payload.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let header = self.peek_header()?;
        if self.buffer.len() < header.total_size() {
            return None;
        }
        let mut frame = self.buffer.split_to(header.total_size());
        frame.advance(FRAME_HEADER_LEN);
        Some(Frame {
            header,
            payload: frame.freeze(),
        })
    }
}

// ============================================================================
// Payload helpers
// ============================================================================

/// Stream dependency and weight carried by PRIORITY frames and prioritized
/// HEADERS. Parsed and retained, never used for scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    pub exclusive: bool,
    pub dependency: u32,
    pub weight: u8,
}

impl PrioritySpec {
    pub const LEN: usize = 5;

    /// Parse the 5-byte priority block.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        let raw = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        Some(Self {
            exclusive: raw & 0x8000_0000 != 0,
            dependency: raw & 0x7FFF_FFFF,
            weight: data[4],
        })
    }
}

/// Remove the pad-length octet and trailing padding from a DATA payload.
pub fn strip_data_padding(frame_flags: u8, mut payload: Bytes) -> Result<Bytes, H2Error> {
    if frame_flags & flags::PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(H2Error::protocol("PADDED DATA frame with no payload"));
    }
    let pad_length = usize::from(payload.get_u8());
    if pad_length > payload.len() {
        return Err(H2Error::protocol("Invalid padding length in DATA frame"));
    }
    payload.truncate(payload.len() - pad_length);
    Ok(payload)
}

/// Split a HEADERS payload into its optional priority block and the header
/// block fragment, dropping any padding.
pub fn split_headers_payload(
    frame_flags: u8,
    mut payload: Bytes,
) -> Result<(Option<PrioritySpec>, Bytes), H2Error> {
    let mut pad_length = 0;
    if frame_flags & flags::PADDED != 0 {
        if payload.is_empty() {
            return Err(H2Error::protocol("PADDED HEADERS frame with no payload"));
        }
        pad_length = usize::from(payload.get_u8());
    }

    let mut priority = None;
    if frame_flags & flags::PRIORITY != 0 {
        if payload.len() < PrioritySpec::LEN {
            return Err(H2Error::frame_size(
                "PRIORITY HEADERS frame with insufficient data",
            ));
        }
        priority = PrioritySpec::parse(&payload.split_to(PrioritySpec::LEN));
    }

    if pad_length > payload.len() {
        return Err(H2Error::protocol("Invalid padding length in HEADERS frame"));
    }
    payload.truncate(payload.len() - pad_length);
    Ok((priority, payload))
}

// ============================================================================
// Frame writers
// ============================================================================

/// Append one frame to `dst`.
pub fn encode_frame(
    frame_type: FrameType,
    frame_flags: u8,
    stream_id: u32,
    payload: &[u8],
    dst: &mut BytesMut,
) {
    debug_assert!(payload.len() <= MAX_FRAME_PAYLOAD as usize);
    dst.reserve(FRAME_HEADER_LEN + payload.len());
    FrameHeader::new(frame_type, frame_flags, stream_id, payload.len() as u32).encode(dst);
    dst.put_slice(payload);
}

/// Serialize one frame as a single contiguous buffer.
pub fn write_frame(
    frame_type: FrameType,
    frame_flags: u8,
    stream_id: u32,
    payload: &[u8],
) -> Bytes {
    let mut dst = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    encode_frame(frame_type, frame_flags, stream_id, payload, &mut dst);
    dst.freeze()
}

/// Create a RST_STREAM frame
pub fn rst_stream(stream_id: u32, error_code: ErrorCode) -> Bytes {
    write_frame(
        FrameType::RstStream,
        0,
        stream_id,
        &u32::from(error_code).to_be_bytes(),
    )
}

/// Create a GOAWAY frame
pub fn goaway(last_stream_id: u32, error_code: ErrorCode) -> Bytes {
    let mut payload = [0u8; 8];
    payload[..4].copy_from_slice(&(last_stream_id & 0x7FFF_FFFF).to_be_bytes());
    payload[4..].copy_from_slice(&u32::from(error_code).to_be_bytes());
    write_frame(FrameType::GoAway, 0, 0, &payload)
}

/// Create a SETTINGS ACK frame
pub fn settings_ack() -> Bytes {
    write_frame(FrameType::Settings, flags::ACK, 0, &[])
}

/// Create a SETTINGS frame from (identifier, value) pairs
pub fn settings(entries: &[(u16, u32)]) -> Bytes {
    let mut payload = BytesMut::with_capacity(entries.len() * 6);
    for &(id, value) in entries {
        payload.put_u16(id);
        payload.put_u32(value);
    }
    write_frame(FrameType::Settings, 0, 0, &payload)
}

/// Create a PING frame carrying `data`, optionally as an ACK
pub fn ping(data: [u8; 8], ack: bool) -> Bytes {
    let frame_flags = if ack { flags::ACK } else { 0 };
    write_frame(FrameType::Ping, frame_flags, 0, &data)
}

/// Create a WINDOW_UPDATE frame
/// stream_id=0 updates connection-level window, otherwise stream-level
pub fn window_update(stream_id: u32, increment: u32) -> Bytes {
    write_frame(
        FrameType::WindowUpdate,
        0,
        stream_id,
        &(increment & 0x7FFF_FFFF).to_be_bytes(),
    )
}

/// Create a CONTINUATION frame to continue a header block
/// end_headers: true if this is the final frame in the header block sequence
pub fn continuation(stream_id: u32, payload: &[u8], end_headers: bool) -> Bytes {
    let frame_flags = if end_headers { flags::END_HEADERS } else { 0 };
    write_frame(FrameType::Continuation, frame_flags, stream_id, payload)
}

/// Write a header block as one HEADERS frame followed by as many
/// CONTINUATION frames as `max_frame_size` requires.
pub fn encode_headers(
    stream_id: u32,
    block: &[u8],
    end_stream: bool,
    max_frame_size: usize,
    dst: &mut BytesMut,
) {
    let first_flags = if end_stream { flags::END_STREAM } else { 0 };
    encode_header_block(
        FrameType::Headers,
        first_flags,
        stream_id,
        &[],
        block,
        max_frame_size,
        dst,
    );
}

/// Write a PUSH_PROMISE (promised id + header block) plus CONTINUATION frames.
pub fn encode_push_promise(
    stream_id: u32,
    promised_stream_id: u32,
    block: &[u8],
    max_frame_size: usize,
    dst: &mut BytesMut,
) {
    let prefix = (promised_stream_id & 0x7FFF_FFFF).to_be_bytes();
    encode_header_block(FrameType::PushPromise, 0, stream_id, &prefix, block, max_frame_size, dst);
}

fn encode_header_block(
    frame_type: FrameType,
    first_flags: u8,
    stream_id: u32,
    prefix: &[u8],
    block: &[u8],
    max_frame_size: usize,
    dst: &mut BytesMut,
) {
    let first_len = block.len().min(max_frame_size.saturating_sub(prefix.len()));
    let (first, mut rest) = block.split_at(first_len);
    let end_headers = if rest.is_empty() { flags::END_HEADERS } else { 0 };

    let mut payload = BytesMut::with_capacity(prefix.len() + first.len());
    payload.put_slice(prefix);
    payload.put_slice(first);
    encode_frame(frame_type, first_flags | end_headers, stream_id, &payload, dst);

    while !rest.is_empty() {
        let (chunk, tail) = rest.split_at(rest.len().min(max_frame_size));
        let frame_flags = if tail.is_empty() { flags::END_HEADERS } else { 0 };
        encode_frame(FrameType::Continuation, frame_flags, stream_id, chunk, dst);
        rest = tail;
    }
}

/// Write a body as DATA frames of at most `max_frame_size` bytes. An empty
/// body with `end_stream` still produces one empty END_STREAM frame.
pub fn encode_data(
    stream_id: u32,
    body: &[u8],
    end_stream: bool,
    max_frame_size: usize,
    dst: &mut BytesMut,
) {
    if body.is_empty() {
        if end_stream {
            encode_frame(FrameType::Data, flags::END_STREAM, stream_id, &[], dst);
        }
        return;
    }
    let mut chunks = body.chunks(max_frame_size.max(1)).peekable();
    while let Some(chunk) = chunks.next() {
        let last = chunks.peek().is_none();
        let frame_flags = if last && end_stream { flags::END_STREAM } else { 0 };
        encode_frame(FrameType::Data, frame_flags, stream_id, chunk, dst);
    }
}
