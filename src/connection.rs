//! Server-side HTTP/2 connection state.
//!
//! [`Connection`] is sans-I/O: feed it transport bytes with
//! [`Connection::receive`], act on the returned events, answer requests with
//! [`Connection::respond`], and write whatever [`Connection::take_output`]
//! hands back to the transport.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::{ErrorCode, H2Error};
use crate::frame::{self, Frame, FrameReader, FrameType, PrioritySpec, CONNECTION_PREFACE};
use crate::hpack::{self, Decoder, Encoder, HeaderField};
use crate::message::{self, Request, Response};
use crate::settings::Settings;
use crate::stream::{StreamEvent, StreamState, StreamTable};

/// Something the application needs to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A complete request (headers, body and trailers) is ready to answer.
    Request(Request),
    /// The peer reset a stream.
    StreamReset { stream_id: u32, error_code: ErrorCode },
    /// The peer is shutting the connection down.
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Bytes,
    },
    /// The peer acknowledged our SETTINGS.
    SettingsAcknowledged,
    /// The peer answered one of our PINGs.
    PingAcknowledged([u8; 8]),
}

/// A header block started by HEADERS and still waiting for END_HEADERS.
#[derive(Debug)]
struct PendingHeaders {
    stream_id: u32,
    end_stream: bool,
    priority: Option<PrioritySpec>,
    block: BytesMut,
}

/// One server connection: settings, HPACK contexts, streams and buffers.
#[derive(Debug)]
pub struct Connection {
    config: ConnectionConfig,
    local_settings: Settings,
    remote_settings: Settings,
    encoder: Encoder,
    decoder: Decoder,
    streams: StreamTable,
    reader: FrameReader,
    output: BytesMut,
    /// Bytes at the front of `output` holding our initial SETTINGS, until
    /// the first `take_output`.
    unsent_preface: usize,
    pending_headers: Option<PendingHeaders>,
    preface_received: bool,
    closed: bool,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

impl Connection {
    /// Create a connection and queue our initial SETTINGS frame.
    pub fn new(config: ConnectionConfig) -> Self {
        let local_settings = config.settings().clone();

        let mut decoder = Decoder::new();
        decoder.set_max_table_size(local_settings.header_table_size as usize);
        decoder.set_max_header_list_size(
            local_settings.max_header_list_size.map(|limit| limit as usize),
        );

        let mut output = BytesMut::new();
        output.extend_from_slice(&frame::settings(&local_settings.to_entries()));
        let unsent_preface = output.len();

        Self {
            streams: StreamTable::new(
                local_settings.max_concurrent_streams,
                config.retained_closed_streams(),
            ),
            config,
            local_settings,
            remote_settings: Settings::default(),
            encoder: Encoder::new(),
            decoder,
            reader: FrameReader::new(),
            output,
            unsent_preface,
            pending_headers: None,
            preface_received: false,
            closed: false,
        }
    }

    /// Feed bytes from the transport and collect the resulting events.
    ///
    /// Stream errors are answered with RST_STREAM and processing continues.
    /// A connection error queues GOAWAY (except for a bad preface, which gets
    /// no response at all), closes the connection and is returned.
    pub fn receive(&mut self, data: &[u8]) -> Result<Vec<ConnectionEvent>, H2Error> {
        let mut events = Vec::new();
        if self.closed {
            trace!(len = data.len(), "discarding input on closed connection");
            return Ok(events);
        }
        self.reader.extend(data);

        if !self.preface_received && !self.read_preface()? {
            return Ok(events);
        }

        loop {
            match self.process_next_frame(&mut events) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) if err.is_connection_error() => {
                    self.fail(&err);
                    return Err(err);
                }
                Err(err) => self.reset_on_error(&err),
            }
        }
        Ok(events)
    }

    /// Match the client preface. `Ok(false)` while more bytes are needed.
    fn read_preface(&mut self) -> Result<bool, H2Error> {
        let buffered = self.reader.buffered();
        let n = buffered.len().min(CONNECTION_PREFACE.len());
        if buffered[..n] != CONNECTION_PREFACE[..n] {
            warn!("invalid connection preface, closing");
            self.closed = true;
            self.reader.clear();
            return Err(H2Error::protocol("invalid connection preface"));
        }
        if n < CONNECTION_PREFACE.len() {
            return Ok(false);
        }
        self.reader.consume(CONNECTION_PREFACE.len());
        self.preface_received = true;
        debug!("connection preface received");
        Ok(true)
    }

    /// Handle one buffered frame. `Ok(false)` when no complete frame is left.
    fn process_next_frame(&mut self, events: &mut Vec<ConnectionEvent>) -> Result<bool, H2Error> {
        let Some(header) = self.reader.peek_header() else {
            return Ok(false);
        };
        if header.length > self.local_settings.max_frame_size {
            return Err(H2Error::frame_size(format!(
                "frame length {} exceeds SETTINGS_MAX_FRAME_SIZE {}",
                header.length, self.local_settings.max_frame_size
            )));
        }
        let Some(frame) = self.reader.next_frame() else {
            return Ok(false);
        };
        trace!(
            stream_id = frame.header.stream_id,
            frame_type = frame.header.frame_type,
            flags = frame.header.flags,
            length = frame.header.length,
            "frame received"
        );
        self.handle_frame(frame, events)?;
        Ok(true)
    }

    fn handle_frame(
        &mut self,
        frame: Frame,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), H2Error> {
        let stream_id = frame.header.stream_id;
        let kind = frame.header.kind();

        if let Some(kind) = kind {
            if kind.is_stream_scoped() && stream_id == 0 {
                return Err(H2Error::protocol(format!("{kind} frame on stream 0")));
            }
            let connection_scoped =
                matches!(kind, FrameType::Settings | FrameType::Ping | FrameType::GoAway);
            if connection_scoped && stream_id != 0 {
                return Err(H2Error::protocol(format!(
                    "{kind} frame on stream {stream_id}"
                )));
            }
        }

        match (&self.pending_headers, kind) {
            (Some(pending), Some(FrameType::Continuation)) if pending.stream_id == stream_id => {}
            (Some(pending), _) => {
                return Err(H2Error::protocol(format!(
                    "expected CONTINUATION for stream {}, got frame type {} on stream {stream_id}",
                    pending.stream_id, frame.header.frame_type
                )));
            }
            (None, Some(FrameType::Continuation)) => {
                return Err(H2Error::protocol(format!(
                    "unexpected CONTINUATION frame for stream {stream_id}"
                )));
            }
            (None, _) => {}
        }

        let Some(kind) = kind else {
            trace!(frame_type = frame.header.frame_type, "ignoring unknown frame type");
            return Ok(());
        };

        match kind {
            FrameType::Data => self.on_data(frame, events),
            FrameType::Headers => self.on_headers(frame, events),
            FrameType::Continuation => self.on_continuation(frame, events),
            FrameType::Priority => self.on_priority(frame),
            FrameType::RstStream => self.on_rst_stream(frame, events),
            FrameType::Settings => self.on_settings(frame, events),
            FrameType::PushPromise => Err(H2Error::protocol("client sent PUSH_PROMISE")),
            FrameType::Ping => self.on_ping(frame, events),
            FrameType::GoAway => self.on_goaway(frame, events),
            FrameType::WindowUpdate => self.on_window_update(frame),
        }
    }

    // ========================================================================
    // Frame handlers
    // ========================================================================

    fn on_data(&mut self, frame: Frame, events: &mut Vec<ConnectionEvent>) -> Result<(), H2Error> {
        let stream_id = frame.header.stream_id;
        let end_stream = frame.header.is_end_stream();
        let flow_controlled = frame.header.length;
        let data = frame::strip_data_padding(frame.header.flags, frame.payload)?;

        // Windows are replenished as data arrives. The connection window is
        // credited even when the stream then rejects the frame.
        if flow_controlled > 0 {
            self.queue(frame::window_update(0, flow_controlled));
        }

        self.streams
            .transition(stream_id, StreamEvent::RecvData { end_stream })?;
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.append_body(&data);
        }
        if flow_controlled > 0 && !end_stream {
            self.queue(frame::window_update(stream_id, flow_controlled));
        }

        if end_stream {
            self.complete_request(stream_id, events);
        }
        Ok(())
    }

    fn on_headers(
        &mut self,
        frame: Frame,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), H2Error> {
        let (priority, fragment) = frame::split_headers_payload(frame.header.flags, frame.payload)?;
        self.check_header_block_size(fragment.len())?;

        let pending = PendingHeaders {
            stream_id: frame.header.stream_id,
            end_stream: frame.header.is_end_stream(),
            priority,
            block: BytesMut::from(&fragment[..]),
        };
        if frame.header.is_end_headers() {
            self.process_header_block(pending, events)
        } else {
            self.pending_headers = Some(pending);
            Ok(())
        }
    }

    fn on_continuation(
        &mut self,
        frame: Frame,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), H2Error> {
        let Some(mut pending) = self.pending_headers.take() else {
            return Err(H2Error::protocol("unexpected CONTINUATION frame"));
        };
        self.check_header_block_size(pending.block.len() + frame.payload.len())?;
        pending.block.extend_from_slice(&frame.payload);

        if frame.header.is_end_headers() {
            self.process_header_block(pending, events)
        } else {
            self.pending_headers = Some(pending);
            Ok(())
        }
    }

    fn check_header_block_size(&self, size: usize) -> Result<(), H2Error> {
        let limit = self.config.header_block_limit();
        if size > limit {
            return Err(H2Error::protocol(format!(
                "Header block too large ({size} bytes, max {limit})"
            )));
        }
        Ok(())
    }

    /// Decode a complete header block and apply it to its stream.
    ///
    /// The block is decoded before any other check so the HPACK context stays
    /// in step with the peer even when the stream is then rejected.
    fn process_header_block(
        &mut self,
        pending: PendingHeaders,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), H2Error> {
        let PendingHeaders {
            stream_id,
            end_stream,
            priority,
            block,
        } = pending;

        let fields = self.decoder.decode(&block)?;
        trace!(stream_id, fields = fields.len(), end_stream, "header block decoded");

        let before = self.streams.state(stream_id);
        self.streams
            .transition(stream_id, StreamEvent::RecvHeaders { end_stream })?;

        if let Some(priority) = priority {
            check_priority(stream_id, priority)?;
            if let Some(stream) = self.streams.get_mut(stream_id) {
                stream.set_priority(priority);
            }
        }

        match before {
            StreamState::Idle => {
                let request = Request::from_headers(stream_id, fields)?;
                debug!(
                    stream_id,
                    method = %request.method,
                    path = %request.path,
                    "request headers"
                );
                if let Some(stream) = self.streams.get_mut(stream_id) {
                    stream.set_request(request);
                }
            }
            _ => {
                if !end_stream {
                    return Err(H2Error::stream(
                        stream_id,
                        ErrorCode::ProtocolError,
                        "trailers without END_STREAM",
                    ));
                }
                message::validate_trailers(stream_id, &fields)?;
                if let Some(stream) = self.streams.get_mut(stream_id) {
                    stream.set_trailers(fields);
                }
            }
        }

        if end_stream {
            self.complete_request(stream_id, events);
        }
        Ok(())
    }

    fn complete_request(&mut self, stream_id: u32, events: &mut Vec<ConnectionEvent>) {
        if let Some(request) = self
            .streams
            .get_mut(stream_id)
            .and_then(|stream| stream.take_request())
        {
            debug!(stream_id, body_len = request.body.len(), "request complete");
            events.push(ConnectionEvent::Request(request));
        }
    }

    fn on_priority(&mut self, frame: Frame) -> Result<(), H2Error> {
        let stream_id = frame.header.stream_id;
        let priority = PrioritySpec::parse(&frame.payload)
            .filter(|_| frame.payload.len() == PrioritySpec::LEN)
            .ok_or_else(|| {
                H2Error::stream(
                    stream_id,
                    ErrorCode::FrameSizeError,
                    "PRIORITY frame must be 5 bytes",
                )
            })?;
        check_priority(stream_id, priority)?;
        self.streams.transition(stream_id, StreamEvent::RecvPriority)?;
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.set_priority(priority);
        }
        Ok(())
    }

    fn on_rst_stream(
        &mut self,
        frame: Frame,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), H2Error> {
        let stream_id = frame.header.stream_id;
        if frame.payload.len() != 4 {
            return Err(H2Error::frame_size("RST_STREAM frame must be 4 bytes"));
        }
        let error_code = ErrorCode::from_u32(frame.payload.clone().get_u32());

        match self.streams.transition(stream_id, StreamEvent::RecvRstStream) {
            Ok(_) => {}
            Err(err) if err.is_connection_error() => return Err(err),
            Err(err) => {
                // RST_STREAM is never answered with RST_STREAM.
                trace!(stream_id, %err, "ignoring RST_STREAM");
                return Ok(());
            }
        }
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.reset(error_code);
        }
        debug!(stream_id, %error_code, "stream reset by peer");
        events.push(ConnectionEvent::StreamReset {
            stream_id,
            error_code,
        });
        Ok(())
    }

    fn on_settings(
        &mut self,
        frame: Frame,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), H2Error> {
        if frame.header.is_ack() {
            if !frame.payload.is_empty() {
                return Err(H2Error::frame_size("SETTINGS ACK with a payload"));
            }
            debug!("SETTINGS acknowledged");
            events.push(ConnectionEvent::SettingsAcknowledged);
            return Ok(());
        }

        self.remote_settings.apply_payload(&frame.payload)?;
        let table_size =
            (self.remote_settings.header_table_size as usize).min(hpack::DEFAULT_TABLE_SIZE);
        self.encoder.set_max_table_size(table_size);
        debug!(settings = ?self.remote_settings, "peer SETTINGS applied");
        self.queue(frame::settings_ack());
        Ok(())
    }

    fn on_ping(&mut self, frame: Frame, events: &mut Vec<ConnectionEvent>) -> Result<(), H2Error> {
        let data: [u8; 8] = frame.payload[..]
            .try_into()
            .map_err(|_| H2Error::frame_size("PING frame must be 8 bytes"))?;
        if frame.header.is_ack() {
            events.push(ConnectionEvent::PingAcknowledged(data));
        } else {
            self.queue(frame::ping(data, true));
        }
        Ok(())
    }

    fn on_goaway(
        &mut self,
        frame: Frame,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), H2Error> {
        if frame.payload.len() < 8 {
            return Err(H2Error::frame_size("GOAWAY frame too short"));
        }
        let mut payload = frame.payload;
        let last_stream_id = payload.get_u32() & 0x7FFF_FFFF;
        let error_code = ErrorCode::from_u32(payload.get_u32());
        debug!(last_stream_id, %error_code, "GOAWAY received");
        events.push(ConnectionEvent::GoAway {
            last_stream_id,
            error_code,
            debug_data: payload,
        });
        Ok(())
    }

    fn on_window_update(&mut self, frame: Frame) -> Result<(), H2Error> {
        let stream_id = frame.header.stream_id;
        if frame.payload.len() != 4 {
            return Err(H2Error::frame_size("WINDOW_UPDATE frame must be 4 bytes"));
        }
        let increment = frame.payload.clone().get_u32() & 0x7FFF_FFFF;
        if increment == 0 {
            return Err(H2Error::protocol(format!(
                "WINDOW_UPDATE with zero increment on stream {stream_id}"
            )));
        }
        if stream_id != 0 {
            self.streams
                .transition(stream_id, StreamEvent::RecvWindowUpdate)?;
        }
        trace!(stream_id, increment, "window update");
        Ok(())
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Answer the request on `stream_id`.
    ///
    /// Push paths become PUSH_PROMISE frames first (when the peer allows
    /// push); the promised requests are returned so the caller can answer them
    /// with further `respond` calls on their even stream ids. Then HEADERS and
    /// DATA go out, END_STREAM on the last frame.
    pub fn respond(&mut self, stream_id: u32, response: Response) -> Result<Vec<Request>, H2Error> {
        if self.closed {
            return Err(H2Error::internal("connection is closed"));
        }

        let state = self.streams.state(stream_id);
        if !matches!(
            state,
            StreamState::Open | StreamState::HalfClosedRemote | StreamState::ReservedLocal
        ) {
            return Err(H2Error::stream(
                stream_id,
                ErrorCode::InternalError,
                format!("cannot respond on stream in state {state:?}"),
            ));
        }

        let mut promised = Vec::new();
        if !response.push_paths.is_empty() {
            if self.remote_settings.enable_push && stream_id % 2 == 1 {
                for path in &response.push_paths {
                    match self.push_promise(stream_id, path) {
                        Ok(request) => promised.push(request),
                        Err(err) => warn!(stream_id, path = %path, %err, "push skipped"),
                    }
                }
            } else {
                debug!(stream_id, "push disabled or not allowed here, skipping promises");
            }
        }

        let max_frame_size = self.remote_settings.max_frame_size as usize;
        let end_stream = response.body.is_empty();
        self.streams
            .transition(stream_id, StreamEvent::SendHeaders { end_stream })?;
        let block = self.encoder.encode(&response.header_fields());
        frame::encode_headers(stream_id, &block, end_stream, max_frame_size, &mut self.output);
        debug!(
            stream_id,
            status = response.status,
            body_len = response.body.len(),
            "response sent"
        );

        if !end_stream {
            self.streams
                .transition(stream_id, StreamEvent::SendData { end_stream: true })?;
            frame::encode_data(stream_id, &response.body, true, max_frame_size, &mut self.output);
        }
        Ok(promised)
    }

    fn push_promise(&mut self, stream_id: u32, path: &str) -> Result<Request, H2Error> {
        let (scheme, authority) = self
            .streams
            .get(stream_id)
            .and_then(|stream| stream.origin().cloned())
            .unwrap_or_else(|| ("https".to_owned(), None));

        let mut fields = vec![
            HeaderField::new(":method", "GET"),
            HeaderField::new(":scheme", scheme),
            HeaderField::new(":path", path.to_owned()),
        ];
        if let Some(authority) = authority {
            fields.push(HeaderField::new(":authority", authority));
        }
        let mut request = Request::from_headers(0, fields.clone()).map_err(|err| {
            H2Error::internal(format!("invalid push for {path:?}: {}", err.message()))
        })?;

        self.streams.transition(stream_id, StreamEvent::SendPushPromise)?;
        let promised_id = self.streams.reserve_push()?;
        let block = self.encoder.encode(&fields);
        frame::encode_push_promise(
            stream_id,
            promised_id,
            &block,
            self.remote_settings.max_frame_size as usize,
            &mut self.output,
        );
        debug!(stream_id, promised_id, path, "push promised");

        request.stream_id = promised_id;
        request.pushed = true;
        Ok(request)
    }

    /// Reset one stream with `code`.
    pub fn reset_stream(&mut self, stream_id: u32, code: ErrorCode) -> Result<(), H2Error> {
        if self.closed {
            return Err(H2Error::internal("connection is closed"));
        }
        if self.streams.state(stream_id) == StreamState::Closed {
            trace!(stream_id, "stream already closed, not resetting");
            return Ok(());
        }
        self.streams.transition(stream_id, StreamEvent::SendRstStream)?;
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.reset(code);
        }
        self.queue(frame::rst_stream(stream_id, code));
        Ok(())
    }

    /// Queue GOAWAY naming the last peer stream processed and close the
    /// connection to further input.
    pub fn goaway(&mut self, code: ErrorCode) {
        if self.closed {
            return;
        }
        let last_stream_id = self.streams.last_peer_stream_id();
        debug!(last_stream_id, %code, "sending GOAWAY");
        self.queue(frame::goaway(last_stream_id, code));
        self.closed = true;
    }

    /// Everything queued for the transport since the last call.
    pub fn take_output(&mut self) -> Bytes {
        self.unsent_preface = 0;
        self.output.split().freeze()
    }

    #[must_use]
    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    fn queue(&mut self, frame: Bytes) {
        self.output.extend_from_slice(&frame);
    }

    fn fail(&mut self, err: &H2Error) {
        warn!(code = %err.code(), "connection error: {}", err.message());
        self.pending_headers = None;
        self.reader.clear();
        // Unsent responses are dropped; our SETTINGS still has to lead.
        self.output.truncate(self.unsent_preface);
        self.goaway(err.code());
    }

    fn reset_on_error(&mut self, err: &H2Error) {
        let Some(stream_id) = err.stream_id() else {
            return;
        };
        if self.streams.state(stream_id) == StreamState::Idle {
            debug!(
                stream_id,
                code = %err.code(),
                "ignoring error on idle stream: {}",
                err.message()
            );
            return;
        }
        debug!(stream_id, code = %err.code(), "stream error: {}", err.message());
        self.streams.reset(stream_id, err.code());
        self.queue(frame::rst_stream(stream_id, err.code()));
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    #[must_use]
    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    #[must_use]
    pub fn stream_state(&self, stream_id: u32) -> StreamState {
        self.streams.state(stream_id)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn preface_received(&self) -> bool {
        self.preface_received
    }

    /// Skip preface matching, for connections upgraded from HTTP/1.1 where
    /// the preface was already consumed.
    pub fn set_preface_received(&mut self, received: bool) {
        self.preface_received = received;
    }

    /// Whether a header block is waiting for CONTINUATION frames.
    #[must_use]
    pub fn has_pending_headers(&self) -> bool {
        self.pending_headers.is_some()
    }

    #[must_use]
    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    #[must_use]
    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }
}

fn check_priority(stream_id: u32, priority: PrioritySpec) -> Result<(), H2Error> {
    if priority.dependency == stream_id {
        return Err(H2Error::stream(
            stream_id,
            ErrorCode::ProtocolError,
            "stream depends on itself",
        ));
    }
    Ok(())
}
