//! Stream lifecycle (RFC 7540 Section 5.1).
//!
//! [`next_state`] is the whole state machine as a pure function so every
//! (state, event) pair can be checked in isolation. [`StreamTable`] layers the
//! connection-wide identifier rules on top: parity, monotonic peer ids,
//! the concurrency cap and bounded retention of closed streams.

use std::collections::{HashMap, VecDeque};

use bytes::BytesMut;
use tracing::trace;

use crate::error::{ErrorCode, H2Error};
use crate::frame::PrioritySpec;
use crate::hpack::HeaderField;
use crate::message::Request;

/// Largest legal stream identifier.
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// ```text
///                          +--------+
///                  send PP |        | recv PP
///                 ,--------|  idle  |--------.
///                /         |        |         \
///               v          +--------+          v
///        +----------+          |           +----------+
///        | reserved |          | send H /  | reserved |
///        | (local)  |          | recv H    | (remote) |
///        +----------+          v           +----------+
///            |             +--------+             |
///            |     recv ES |        | send ES     |
///     send H |     ,-------|  open  |-------.     | recv H
///            v    /        +--------+        \    v
///        +----------+          |           +----------+
///        |   half   |          |           |   half   |
///        |  closed  |          | send R /  |  closed  |
///        | (remote) |          | recv R    | (local)  |
///        +----------+          v           +----------+
///            |             +--------+             |
///            `------------>| closed |<------------'
///                          +--------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// Counts against SETTINGS_MAX_CONCURRENT_STREAMS.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Open | Self::HalfClosedLocal | Self::HalfClosedRemote
        )
    }

    #[must_use]
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

/// A frame sent or received on a stream, as far as the state machine cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    RecvHeaders { end_stream: bool },
    SendHeaders { end_stream: bool },
    RecvData { end_stream: bool },
    SendData { end_stream: bool },
    RecvPushPromise,
    SendPushPromise,
    RecvRstStream,
    SendRstStream,
    RecvPriority,
    RecvWindowUpdate,
}

impl StreamEvent {
    fn is_send(self) -> bool {
        matches!(
            self,
            Self::SendHeaders { .. }
                | Self::SendData { .. }
                | Self::SendPushPromise
                | Self::SendRstStream
        )
    }
}

/// Compute the state that follows `event` on a stream in `state`.
///
/// Pairs without a defined transition are errors:
/// - receiving in idle or reserved states, or a PUSH_PROMISE anywhere:
///   connection PROTOCOL_ERROR
/// - receiving in half-closed (remote) or closed: stream STREAM_CLOSED
/// - sending when the state forbids it: stream INTERNAL_ERROR
pub fn next_state(
    stream_id: u32,
    state: StreamState,
    event: StreamEvent,
) -> Result<StreamState, H2Error> {
    use StreamEvent::*;
    use StreamState::*;

    let next = match (state, event) {
        // RST_STREAM closes every non-idle state; a closed stream may still
        // send one.
        (Idle, RecvRstStream | SendRstStream) | (Closed, RecvRstStream) => None,
        (_, RecvRstStream | SendRstStream) => Some(Closed),

        // PRIORITY is legal in every state and never changes it.
        (_, RecvPriority) => Some(state),

        (Idle, RecvHeaders { end_stream: true }) => Some(HalfClosedRemote),
        (Idle, RecvHeaders { end_stream: false }) => Some(Open),
        (Idle, SendHeaders { end_stream: true }) => Some(HalfClosedLocal),
        (Idle, SendHeaders { end_stream: false }) => Some(Open),
        (Idle, SendPushPromise) => Some(ReservedLocal),
        (Idle, RecvPushPromise) => Some(ReservedRemote),

        (ReservedLocal, SendHeaders { end_stream: true }) => Some(Closed),
        (ReservedLocal, SendHeaders { end_stream: false }) => Some(HalfClosedRemote),
        (ReservedLocal, RecvWindowUpdate) => Some(ReservedLocal),

        (ReservedRemote, RecvHeaders { end_stream: true }) => Some(Closed),
        (ReservedRemote, RecvHeaders { end_stream: false }) => Some(HalfClosedLocal),

        (Open, RecvHeaders { end_stream } | RecvData { end_stream }) => {
            Some(if end_stream { HalfClosedRemote } else { Open })
        }
        (Open, SendHeaders { end_stream } | SendData { end_stream }) => {
            Some(if end_stream { HalfClosedLocal } else { Open })
        }
        (Open, SendPushPromise | RecvWindowUpdate) => Some(Open),

        (HalfClosedLocal, RecvHeaders { end_stream } | RecvData { end_stream }) => {
            Some(if end_stream { Closed } else { HalfClosedLocal })
        }
        (HalfClosedLocal, RecvWindowUpdate) => Some(HalfClosedLocal),

        (HalfClosedRemote, SendHeaders { end_stream } | SendData { end_stream }) => {
            Some(if end_stream { Closed } else { HalfClosedRemote })
        }
        (HalfClosedRemote, SendPushPromise | RecvWindowUpdate) => Some(HalfClosedRemote),

        _ => None,
    };

    if let Some(next) = next {
        return Ok(next);
    }

    let message = format!("{event:?} not allowed in state {state:?}");
    Err(if event.is_send() {
        H2Error::stream(stream_id, ErrorCode::InternalError, message)
    } else if event == RecvPushPromise {
        H2Error::protocol(message)
    } else {
        match state {
            HalfClosedRemote | Closed => H2Error::stream_closed(stream_id, message),
            _ => H2Error::protocol(message),
        }
    })
}

/// Per-stream bookkeeping: lifecycle state plus the request being assembled.
#[derive(Debug)]
pub struct Stream {
    id: u32,
    state: StreamState,
    request: Option<Request>,
    body: BytesMut,
    /// Scheme and authority of the delivered request, for push promises.
    origin: Option<(String, Option<String>)>,
    priority: Option<PrioritySpec>,
    reset_code: Option<ErrorCode>,
}

impl Stream {
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self::with_state(id, StreamState::Idle)
    }

    fn with_state(id: u32, state: StreamState) -> Self {
        Self {
            id,
            state,
            request: None,
            body: BytesMut::new(),
            origin: None,
            priority: None,
            reset_code: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Apply one event, moving to the next state or leaving the stream
    /// untouched on error.
    pub fn apply(&mut self, event: StreamEvent) -> Result<StreamState, H2Error> {
        let next = next_state(self.id, self.state, event)?;
        if next != self.state {
            trace!(
                stream_id = self.id,
                from = ?self.state,
                to = ?next,
                ?event,
                "stream transition"
            );
        }
        self.state = next;
        Ok(next)
    }

    /// Force the stream closed, recording why and dropping any partial request.
    pub fn reset(&mut self, code: ErrorCode) {
        self.state = StreamState::Closed;
        self.reset_code = Some(code);
        self.request = None;
        self.body.clear();
    }

    #[must_use]
    pub fn reset_code(&self) -> Option<ErrorCode> {
        self.reset_code
    }

    #[must_use]
    pub fn priority(&self) -> Option<PrioritySpec> {
        self.priority
    }

    pub fn set_priority(&mut self, priority: PrioritySpec) {
        self.priority = Some(priority);
    }

    /// The request whose headers have arrived but whose body may not have.
    #[must_use]
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn set_request(&mut self, request: Request) {
        self.request = Some(request);
    }

    pub fn set_trailers(&mut self, trailers: Vec<HeaderField>) {
        if let Some(request) = self.request.as_mut() {
            request.trailers = trailers;
        }
    }

    pub fn append_body(&mut self, data: &[u8]) {
        if self.request.is_some() {
            self.body.extend_from_slice(data);
        }
    }

    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Hand out the finished request with its body attached.
    pub fn take_request(&mut self) -> Option<Request> {
        let mut request = self.request.take()?;
        request.body = self.body.split().freeze();
        self.origin = Some((
            request.scheme.clone().unwrap_or_else(|| "https".to_owned()),
            request.authority.clone(),
        ));
        Some(request)
    }

    #[must_use]
    pub fn origin(&self) -> Option<&(String, Option<String>)> {
        self.origin.as_ref()
    }
}

/// All streams of one connection, keyed by identifier.
#[derive(Debug)]
pub struct StreamTable {
    streams: HashMap<u32, Stream>,
    closed: VecDeque<u32>,
    max_retained_closed: usize,
    max_concurrent: u32,
    last_peer_stream_id: u32,
    next_push_id: u32,
}

impl StreamTable {
    #[must_use]
    pub fn new(max_concurrent: u32, max_retained_closed: usize) -> Self {
        Self {
            streams: HashMap::new(),
            closed: VecDeque::new(),
            max_retained_closed,
            max_concurrent,
            last_peer_stream_id: 0,
            next_push_id: 2,
        }
    }

    #[must_use]
    pub fn get(&self, stream_id: u32) -> Option<&Stream> {
        self.streams.get(&stream_id)
    }

    pub fn get_mut(&mut self, stream_id: u32) -> Option<&mut Stream> {
        self.streams.get_mut(&stream_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Highest peer-initiated stream id seen so far (GOAWAY last-stream-id).
    #[must_use]
    pub fn last_peer_stream_id(&self) -> u32 {
        self.last_peer_stream_id
    }

    /// Peer-initiated streams counting against the concurrency cap.
    #[must_use]
    pub fn active_peer_streams(&self) -> usize {
        self.streams
            .values()
            .filter(|s| s.id % 2 == 1 && s.state.is_active())
            .count()
    }

    /// State of any stream id, including ones never seen or already pruned.
    ///
    /// Peer ids at or below the highest one seen, and push ids already
    /// handed out, are implicitly closed once they leave the table.
    #[must_use]
    pub fn state(&self, stream_id: u32) -> StreamState {
        if let Some(stream) = self.streams.get(&stream_id) {
            return stream.state;
        }
        let seen = if stream_id % 2 == 1 {
            stream_id <= self.last_peer_stream_id
        } else {
            stream_id < self.next_push_id
        };
        if seen {
            StreamState::Closed
        } else {
            StreamState::Idle
        }
    }

    /// Apply `event` to `stream_id`, creating the entry when the stream
    /// leaves idle.
    ///
    /// A peer opening a stream must use a fresh odd id above every earlier
    /// one and stay within the concurrency cap; violations are connection
    /// errors.
    pub fn transition(
        &mut self,
        stream_id: u32,
        event: StreamEvent,
    ) -> Result<StreamState, H2Error> {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            let was_closed = stream.state.is_closed();
            let next = stream.apply(event)?;
            if next.is_closed() && !was_closed {
                self.retire(stream_id);
            }
            return Ok(next);
        }

        let current = self.state(stream_id);
        if let StreamEvent::RecvHeaders { .. } = event {
            self.check_peer_open(stream_id, current)?;
        }

        let next = next_state(stream_id, current, event)?;
        if current == StreamState::Idle && next != StreamState::Idle {
            trace!(stream_id, to = ?next, ?event, "stream created");
            if stream_id % 2 == 1 {
                self.last_peer_stream_id = self.last_peer_stream_id.max(stream_id);
            }
            self.streams.insert(stream_id, Stream::with_state(stream_id, next));
            if next.is_closed() {
                self.retire(stream_id);
            }
        }
        Ok(next)
    }

    fn check_peer_open(&self, stream_id: u32, current: StreamState) -> Result<(), H2Error> {
        if stream_id % 2 == 0 {
            return Err(H2Error::protocol(format!(
                "client opened even stream id {stream_id}"
            )));
        }
        if current != StreamState::Idle {
            return Err(H2Error::protocol(format!(
                "stream id {stream_id} is not greater than last stream id {}",
                self.last_peer_stream_id
            )));
        }
        if self.active_peer_streams() >= self.max_concurrent as usize {
            return Err(H2Error::protocol(format!(
                "stream {stream_id} exceeds SETTINGS_MAX_CONCURRENT_STREAMS ({})",
                self.max_concurrent
            )));
        }
        Ok(())
    }

    /// Reserve the next even id for a server push (idle → reserved-local).
    pub fn reserve_push(&mut self) -> Result<u32, H2Error> {
        let stream_id = self.next_push_id;
        if stream_id > MAX_STREAM_ID {
            return Err(H2Error::internal("server-initiated stream ids exhausted"));
        }
        self.transition(stream_id, StreamEvent::SendPushPromise)?;
        self.next_push_id += 2;
        Ok(stream_id)
    }

    /// Close a stream outside the state machine (stream error, local reset).
    pub fn reset(&mut self, stream_id: u32, code: ErrorCode) {
        let current = self.state(stream_id);
        match self.streams.get_mut(&stream_id) {
            Some(stream) if !stream.state.is_closed() => {
                stream.reset(code);
                self.retire(stream_id);
            }
            Some(_) => {}
            // Never opened: nothing to close, and the id stays usable.
            None if current == StreamState::Idle => {
                trace!(stream_id, "not resetting idle stream");
            }
            None => {
                let mut stream = Stream::new(stream_id);
                stream.reset(code);
                self.streams.insert(stream_id, stream);
                self.retire(stream_id);
            }
        }
    }

    fn retire(&mut self, stream_id: u32) {
        self.closed.push_back(stream_id);
        while self.closed.len() > self.max_retained_closed {
            if let Some(oldest) = self.closed.pop_front() {
                trace!(stream_id = oldest, "pruning closed stream");
                self.streams.remove(&oldest);
            }
        }
    }
}
