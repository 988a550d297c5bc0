//! Tests for connection-level error handling and GOAWAY emission

use h2_server_sans_io::frame::{self, flags, FrameType, CONNECTION_PREFACE};
use h2_server_sans_io::{Connection, ConnectionConfig, ConnectionEvent, ErrorCode};

use super::{connected, data_frame, expect_goaway, headers_frame, init_logging, simple_get};

#[test]
fn test_invalid_preface_closes_silently() {
    init_logging();
    let mut conn = Connection::new(ConnectionConfig::default());
    conn.take_output();

    let err = conn
        .receive(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProtocolError);
    assert!(conn.is_closed());
    assert!(conn.take_output().is_empty(), "No GOAWAY for a bad preface");
}

#[test]
fn test_preface_and_frames_in_one_read() {
    init_logging();
    let mut conn = Connection::new(ConnectionConfig::default());
    let mut data = CONNECTION_PREFACE.to_vec();
    data.extend(simple_get(1));

    let events = conn.receive(&data).unwrap();
    assert!(conn.preface_received());
    assert_eq!(events.len(), 1);
}

#[test]
fn test_upgraded_connection_skips_preface() {
    init_logging();
    let mut conn = Connection::new(ConnectionConfig::default());
    conn.set_preface_received(true);
    assert_eq!(conn.receive(&simple_get(1)).unwrap().len(), 1);
}

#[test]
fn test_oversized_frame() {
    let mut conn = connected();

    // DATA frame declaring 16385 bytes; only the header has arrived.
    let data = [0x00, 0x40, 0x01, 0, 0, 0, 0, 0, 1];
    let err = conn.receive(&data).unwrap_err();
    assert_eq!(err.code(), ErrorCode::FrameSizeError);
    assert!(err.is_connection_error());
    expect_goaway(&mut conn, ErrorCode::FrameSizeError);
}

#[test]
fn test_larger_frame_allowed_when_advertised() {
    let mut conn = connected_with_frame_size(32_768);
    let mut data = headers_frame(1, flags::END_HEADERS, &[0x83, 0x87, 0x84]);
    data.extend(data_frame(1, flags::END_STREAM, &vec![7u8; 20_000]));

    let events = conn.receive(&data).unwrap();
    match &events[..] {
        [ConnectionEvent::Request(request)] => assert_eq!(request.body.len(), 20_000),
        _ => panic!("Expected Request event"),
    }
}

fn connected_with_frame_size(size: u32) -> Connection {
    super::connected_with(ConnectionConfig::new().max_frame_size(size))
}

#[test]
fn test_stream_frame_on_stream_zero() {
    let mut conn = connected();
    let err = conn.receive(&data_frame(0, 0, b"x")).unwrap_err();
    assert!(err.message().contains("stream 0"));
    expect_goaway(&mut conn, ErrorCode::ProtocolError);
}

#[test]
fn test_connection_frame_on_stream() {
    let mut conn = connected();
    let ping = frame::write_frame(FrameType::Ping, 0, 1, &[0; 8]);
    assert!(conn.receive(&ping).is_err());
    expect_goaway(&mut conn, ErrorCode::ProtocolError);
}

#[test]
fn test_hpack_failure_is_connection_error() {
    let mut conn = connected();
    // Indexed field with index 0
    let err = conn
        .receive(&headers_frame(1, flags::END_HEADERS | flags::END_STREAM, &[0x80]))
        .unwrap_err();
    assert!(err.is_connection_error());
    assert!(err.message().contains("HPACK"));
    expect_goaway(&mut conn, ErrorCode::ProtocolError);
}

#[test]
fn test_goaway_reports_last_processed_stream() {
    let mut conn = connected();
    conn.receive(&simple_get(1)).unwrap();
    conn.receive(&simple_get(5)).unwrap();
    conn.take_output();

    assert!(conn.receive(&data_frame(0, 0, b"x")).is_err());
    assert_eq!(expect_goaway(&mut conn, ErrorCode::ProtocolError), 5);
}

#[test]
fn test_processing_stops_after_connection_error() {
    let mut conn = connected();
    let mut data = data_frame(0, 0, b"x");
    data.extend(simple_get(1));

    assert!(conn.receive(&data).is_err());
    expect_goaway(&mut conn, ErrorCode::ProtocolError);
    assert!(conn.receive(&simple_get(3)).unwrap().is_empty());
    assert!(conn.take_output().is_empty());
}

#[test]
fn test_invalid_padding() {
    let mut conn = connected();
    let mut data = headers_frame(1, flags::END_HEADERS, &[0x83, 0x87, 0x84]);
    data.extend(data_frame(1, flags::PADDED, &[9, b'a']));

    let err = conn.receive(&data).unwrap_err();
    assert!(err.message().contains("padding"));
    expect_goaway(&mut conn, ErrorCode::ProtocolError);
}

#[test]
fn test_local_goaway_stops_input() {
    let mut conn = connected();
    conn.receive(&simple_get(1)).unwrap();
    conn.goaway(ErrorCode::NoError);
    assert_eq!(expect_goaway(&mut conn, ErrorCode::NoError), 1);
    assert!(conn.receive(&simple_get(3)).unwrap().is_empty());
}

#[test]
fn test_connection_error_discards_unsent_responses() {
    let mut conn = connected();
    conn.receive(&simple_get(1)).unwrap();
    conn.respond(1, h2_server_sans_io::Response::new(200).body("hello"))
        .unwrap();
    assert!(conn.has_output());

    assert!(conn.receive(&data_frame(0, 0, b"x")).is_err());
    let out = conn.take_output();
    assert_eq!(out, frame::goaway(1, ErrorCode::ProtocolError));
}

#[test]
fn test_connection_error_keeps_unsent_settings() {
    init_logging();
    let mut conn = Connection::new(ConnectionConfig::default());
    let mut input = CONNECTION_PREFACE.to_vec();
    input.extend(frame::ping(*b"12345678", false));
    input.extend(data_frame(0, 0, b"x"));

    assert!(conn.receive(&input).is_err());
    let out = conn.take_output();
    let kinds: Vec<_> = super::parse_frames(&out)
        .iter()
        .filter_map(|f| f.header.kind())
        .collect();
    assert_eq!(kinds, [FrameType::Settings, FrameType::GoAway]);
}
