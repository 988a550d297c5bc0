//! h2-server-sans-io: the protocol core of an HTTP/2 server, without I/O
//!
//! This crate turns bytes from a client into complete requests and turns
//! responses back into frames. It owns everything between the transport and
//! the application: HPACK, framing, stream lifecycles and error signalling.
//!
//! # Features
//!
//! - **Sans-I/O Design**: feed bytes in, take bytes out; no async runtime
//! - **HPACK**: static/dynamic tables, Huffman coding, size updates (RFC 7541)
//! - **Stream State Machine**: every RFC 7540 Section 5.1 transition, with
//!   stream-id parity, monotonicity and concurrency limits
//! - **CONTINUATION Assembly**: header blocks reassembled with a size cap
//! - **Request Validation**: pseudo-header and connection-header rules
//! - **Server Push**: PUSH_PROMISE for paths named by the application
//! - **Errors as Frames**: stream errors become RST_STREAM, connection errors
//!   become GOAWAY
//!
//! # Quick Start
//!
//! ```rust
//! use h2_server_sans_io::{Connection, ConnectionConfig, ConnectionEvent, Response};
//! use h2_server_sans_io::frame::{self, flags, FrameType, CONNECTION_PREFACE};
//! use h2_server_sans_io::hpack::{Encoder, HeaderField};
//!
//! let mut conn = Connection::new(ConnectionConfig::default());
//!
//! // A client request: preface, then one HEADERS frame.
//! let block = Encoder::new().encode(&[
//!     HeaderField::new(":method", "GET"),
//!     HeaderField::new(":scheme", "https"),
//!     HeaderField::new(":path", "/"),
//! ]);
//! let mut input = CONNECTION_PREFACE.to_vec();
//! input.extend_from_slice(&frame::write_frame(
//!     FrameType::Headers,
//!     flags::END_HEADERS | flags::END_STREAM,
//!     1,
//!     &block,
//! ));
//!
//! for event in conn.receive(&input).unwrap() {
//!     if let ConnectionEvent::Request(request) = event {
//!         assert_eq!(request.path, "/");
//!         conn.respond(request.stream_id, Response::new(200).body("hello")).unwrap();
//!     }
//! }
//!
//! // SETTINGS, HEADERS and DATA, ready for the socket.
//! let bytes_to_write = conn.take_output();
//! assert!(!bytes_to_write.is_empty());
//! ```
//!
//! # Architecture
//!
//! - [`frame`]: 9-byte frame headers, buffered reading, frame builders
//! - [`hpack`] and [`huffman`]: header compression
//! - [`stream`]: the per-stream state machine and stream table
//! - [`connection`]: frame handlers tying the above together
//! - [`driver`]: a blocking loop for any `Read + Write` transport
//!
//! It does NOT provide:
//! - TCP listeners or TLS/ALPN (bring your own transport)
//! - Flow-control backpressure (windows are replenished, never enforced)
//! - Priority scheduling (priorities are parsed and stored only)

pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod frame;
pub mod hpack;
pub mod huffman;
pub mod message;
pub mod settings;
pub mod stream;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionEvent};
pub use driver::{serve, Handler};
pub use error::{ErrorCode, H2Error, HpackError};
pub use frame::{Frame, FrameHeader, FrameType, CONNECTION_PREFACE};
pub use hpack::HeaderField;
pub use message::{Request, Response};
pub use settings::Settings;
pub use stream::{StreamEvent, StreamState};
