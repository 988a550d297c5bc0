//! Tests for request assembly and validation

use h2_server_sans_io::frame::{flags, FrameType};
use h2_server_sans_io::hpack::{Decoder, Encoder, HeaderField};
use h2_server_sans_io::{ConnectionEvent, ErrorCode, Request, Response, StreamState};

use super::{
    connected, data_frame, expect_rst_stream, headers_frame, parse_frames, GET_ROOT_BLOCK,
};

fn single_request(events: Vec<ConnectionEvent>) -> Request {
    match <[ConnectionEvent; 1]>::try_from(events) {
        Ok([ConnectionEvent::Request(request)]) => request,
        Ok([other]) => panic!("Expected Request event, got {other:?}"),
        Err(events) => panic!("Expected exactly one event, got {events:?}"),
    }
}

// ============================================================================
// Simple request scenario
// ============================================================================

#[test]
fn test_simple_get_request() {
    let mut conn = connected();

    // Client SETTINGS then HEADERS with END_HEADERS | END_STREAM
    let mut data = vec![0, 0, 0, 4, 0, 0, 0, 0, 0];
    data.extend(headers_frame(1, flags::END_HEADERS | flags::END_STREAM, &GET_ROOT_BLOCK));

    let request = single_request(conn.receive(&data).unwrap());
    assert_eq!(request.stream_id, 1);
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/");
    assert_eq!(request.scheme.as_deref(), Some("https"));
    assert_eq!(request.authority.as_deref(), Some("test"));
    assert!(request.body.is_empty());
    assert!(!request.pushed);

    conn.respond(1, Response::new(200).header("content-type", "text/plain").body("ok"))
        .unwrap();

    let frames = parse_frames(&conn.take_output());
    let kinds: Vec<_> = frames.iter().map(|f| f.header.kind()).collect();
    assert_eq!(
        kinds,
        [
            Some(FrameType::Settings),
            Some(FrameType::Headers),
            Some(FrameType::Data)
        ]
    );
    assert!(frames[0].header.is_ack());
    assert_eq!(frames[1].header.stream_id, 1);
    assert!(frames[1].header.is_end_headers());
    assert_eq!(frames[2].header.stream_id, 1);
    assert!(frames[2].header.is_end_stream());

    let fields = Decoder::new().decode(&frames[1].payload).unwrap();
    assert_eq!(fields[0], HeaderField::new(":status", "200"));
    assert_eq!(fields[1], HeaderField::new("content-type", "text/plain"));
}

#[test]
fn test_request_with_body_across_data_frames() {
    let mut conn = connected();
    let mut data = headers_frame(1, flags::END_HEADERS, &[0x83, 0x87, 0x84]); // POST https /
    data.extend(data_frame(1, 0, b"hello "));
    data.extend(data_frame(1, flags::END_STREAM, b"world"));

    let request = single_request(conn.receive(&data).unwrap());
    assert_eq!(request.method, "POST");
    assert_eq!(request.body.as_ref(), b"hello world");
    assert_eq!(conn.stream_state(1), StreamState::HalfClosedRemote);
}

#[test]
fn test_request_not_delivered_before_end_stream() {
    let mut conn = connected();
    let events = conn
        .receive(&headers_frame(1, flags::END_HEADERS, &[0x83, 0x87, 0x84]))
        .unwrap();
    assert!(events.is_empty());
    assert_eq!(conn.stream_state(1), StreamState::Open);

    let events = conn
        .receive(&data_frame(1, flags::END_STREAM, b""))
        .unwrap();
    assert_eq!(single_request(events).body.len(), 0);
}

#[test]
fn test_padded_data_is_stripped() {
    let mut conn = connected();
    let mut data = headers_frame(1, flags::END_HEADERS, &[0x83, 0x87, 0x84]);
    // pad length 3, "abc", padding
    data.extend(data_frame(
        1,
        flags::PADDED | flags::END_STREAM,
        &[3, b'a', b'b', b'c', 0, 0, 0],
    ));

    let request = single_request(conn.receive(&data).unwrap());
    assert_eq!(request.body.as_ref(), b"abc");
}

#[test]
fn test_received_data_replenishes_windows() {
    let mut conn = connected();
    conn.receive(&headers_frame(1, flags::END_HEADERS, &[0x83, 0x87, 0x84]))
        .unwrap();
    conn.receive(&data_frame(1, 0, &[0u8; 100])).unwrap();

    let frames = parse_frames(&conn.take_output());
    let updates: Vec<(u32, u32)> = frames
        .iter()
        .filter(|f| f.header.kind() == Some(FrameType::WindowUpdate))
        .map(|f| {
            let p = &f.payload;
            (f.header.stream_id, u32::from_be_bytes([p[0], p[1], p[2], p[3]]))
        })
        .collect();
    assert_eq!(updates, [(0, 100), (1, 100)]);
}

#[test]
fn test_request_trailers() {
    let mut conn = connected();
    let mut encoder = Encoder::new();
    let head = encoder.encode(&[
        HeaderField::new(":method", "POST"),
        HeaderField::new(":scheme", "https"),
        HeaderField::new(":path", "/upload"),
        HeaderField::new("te", "trailers"),
    ]);
    let trailers = encoder.encode(&[HeaderField::new("x-checksum", "abc123")]);

    let mut data = headers_frame(1, flags::END_HEADERS, &head);
    data.extend(data_frame(1, 0, b"payload"));
    data.extend(headers_frame(1, flags::END_HEADERS | flags::END_STREAM, &trailers));

    let request = single_request(conn.receive(&data).unwrap());
    assert_eq!(request.path, "/upload");
    assert_eq!(request.header("te"), Some("trailers"));
    assert_eq!(request.body.as_ref(), b"payload");
    assert_eq!(request.trailers, [HeaderField::new("x-checksum", "abc123")]);
}

#[test]
fn test_trailers_without_end_stream_reset_stream() {
    let mut conn = connected();
    let mut data = headers_frame(1, flags::END_HEADERS, &[0x83, 0x87, 0x84]);
    data.extend(headers_frame(1, flags::END_HEADERS, &[0x40, 1, b'x', 1, b'y']));

    assert!(conn.receive(&data).unwrap().is_empty());
    expect_rst_stream(&mut conn, 1, ErrorCode::ProtocolError);
    assert_eq!(conn.stream_state(1), StreamState::Closed);
}

// ============================================================================
// Header validation
// ============================================================================

#[test]
fn test_pseudo_header_after_regular_header() {
    let mut conn = connected();
    let block = Encoder::new().encode(&[
        HeaderField::new(":method", "GET"),
        HeaderField::new(":scheme", "https"),
        HeaderField::new("content-type", "text/plain"),
        HeaderField::new(":path", "/"),
    ]);

    let events = conn
        .receive(&headers_frame(1, flags::END_HEADERS | flags::END_STREAM, &block))
        .unwrap();
    assert!(events.is_empty(), "Malformed request must not reach the handler");
    expect_rst_stream(&mut conn, 1, ErrorCode::ProtocolError);
}

#[test]
fn test_missing_method_rejected() {
    let mut conn = connected();
    // :scheme https, :path /
    conn.receive(&headers_frame(1, flags::END_HEADERS | flags::END_STREAM, &[0x87, 0x84]))
        .unwrap();
    expect_rst_stream(&mut conn, 1, ErrorCode::ProtocolError);
}

#[test]
fn test_connection_specific_header_rejected() {
    let mut conn = connected();
    let block = Encoder::new().encode(&[
        HeaderField::new(":method", "GET"),
        HeaderField::new(":scheme", "https"),
        HeaderField::new(":path", "/"),
        HeaderField::new("connection", "keep-alive"),
    ]);
    conn.receive(&headers_frame(1, flags::END_HEADERS | flags::END_STREAM, &block))
        .unwrap();
    expect_rst_stream(&mut conn, 1, ErrorCode::ProtocolError);
}

#[test]
fn test_uppercase_header_name_rejected() {
    let mut conn = connected();
    let mut block = vec![0x82, 0x87, 0x84];
    // literal without indexing, new name "X-Bad", value "1"
    block.extend_from_slice(&[0x00, 5, b'X', b'-', b'B', b'a', b'd', 1, b'1']);
    conn.receive(&headers_frame(1, flags::END_HEADERS | flags::END_STREAM, &block))
        .unwrap();
    expect_rst_stream(&mut conn, 1, ErrorCode::ProtocolError);
}

#[test]
fn test_stream_error_keeps_dynamic_table_in_sync() {
    let mut conn = connected();
    let mut encoder = Encoder::new();

    // Rejected (missing :method) but the literal is still indexed by both sides.
    let bad = encoder.encode(&[
        HeaderField::new(":scheme", "https"),
        HeaderField::new(":path", "/"),
        HeaderField::new("x-trace", "abc"),
    ]);
    conn.receive(&headers_frame(1, flags::END_HEADERS | flags::END_STREAM, &bad))
        .unwrap();
    expect_rst_stream(&mut conn, 1, ErrorCode::ProtocolError);

    let good = encoder.encode(&[
        HeaderField::new(":method", "GET"),
        HeaderField::new(":scheme", "https"),
        HeaderField::new(":path", "/"),
        HeaderField::new("x-trace", "abc"),
    ]);
    let request = single_request(
        conn.receive(&headers_frame(3, flags::END_HEADERS | flags::END_STREAM, &good))
            .unwrap(),
    );
    assert_eq!(request.header("x-trace"), Some("abc"));
    assert_eq!(conn.decoder().table(), encoder.table());
}
