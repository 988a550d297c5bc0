//! Tests for HPACK decoding

use h2_server_sans_io::hpack::{Decoder, HeaderField};
use h2_server_sans_io::HpackError;

use super::hex;

fn fields(pairs: &[(&'static str, &'static str)]) -> Vec<HeaderField> {
    pairs
        .iter()
        .map(|&(name, value)| HeaderField::new(name, value))
        .collect()
}

fn table_entries(decoder: &Decoder) -> Vec<(String, String)> {
    decoder
        .table()
        .iter()
        .map(|f| (f.name_str().unwrap().to_owned(), f.value_str().unwrap().to_owned()))
        .collect()
}

#[test]
fn test_decode_indexed_header() {
    let mut decoder = Decoder::new();

    // 0x82 = indexed header, index 2 = :method: GET
    let headers = decoder.decode(&[0x82]).unwrap();
    assert_eq!(headers, fields(&[(":method", "GET")]));
    assert!(decoder.table().is_empty());
}

#[test]
fn test_decode_literal_with_indexing() {
    let mut decoder = Decoder::new();
    let data = [
        0x40, // Literal with indexing, new name
        0x06, b'c', b'u', b's', b't', b'o', b'm',
        0x05, b'v', b'a', b'l', b'u', b'e',
    ];

    let headers = decoder.decode(&data).unwrap();
    assert_eq!(headers, fields(&[("custom", "value")]));
    assert_eq!(decoder.table().len(), 1);
    assert_eq!(decoder.table().size(), 6 + 5 + 32);

    // Index 62 now refers to the inserted entry.
    assert_eq!(decoder.decode(&[0xbe]).unwrap(), fields(&[("custom", "value")]));
}

#[test]
fn test_decode_literal_without_indexing() {
    let mut decoder = Decoder::new();
    // RFC 7541 C.2.2: :path /sample/path
    let data = hex("040c 2f73 616d 706c 652f 7061 7468");
    assert_eq!(decoder.decode(&data).unwrap(), fields(&[(":path", "/sample/path")]));
    assert!(decoder.table().is_empty());
}

#[test]
fn test_decode_never_indexed() {
    let mut decoder = Decoder::new();
    // RFC 7541 C.2.3: password: secret
    let data = hex("1008 7061 7373 776f 7264 0673 6563 7265 74");
    let headers = decoder.decode(&data).unwrap();
    assert_eq!(headers, [HeaderField::sensitive("password", "secret")]);
    assert!(headers[0].never_indexed);
    assert!(decoder.table().is_empty());
}

// RFC 7541 C.3: requests without Huffman coding, one decoder across blocks.
#[test]
fn test_rfc_request_sequence() {
    let mut decoder = Decoder::new();

    let first = hex("8286 8441 0f77 7777 2e65 7861 6d70 6c65 2e63 6f6d");
    assert_eq!(
        decoder.decode(&first).unwrap(),
        fields(&[
            (":method", "GET"),
            (":scheme", "http"),
            (":path", "/"),
            (":authority", "www.example.com"),
        ])
    );
    assert_eq!(decoder.table().size(), 57);

    let second = hex("8286 84be 5808 6e6f 2d63 6163 6865");
    assert_eq!(
        decoder.decode(&second).unwrap(),
        fields(&[
            (":method", "GET"),
            (":scheme", "http"),
            (":path", "/"),
            (":authority", "www.example.com"),
            ("cache-control", "no-cache"),
        ])
    );
    assert_eq!(decoder.table().size(), 110);

    let third = hex(
        "8287 85bf 400a 6375 7374 6f6d 2d6b 6579 0c63 7573 746f 6d2d 7661 6c75 65",
    );
    assert_eq!(
        decoder.decode(&third).unwrap(),
        fields(&[
            (":method", "GET"),
            (":scheme", "https"),
            (":path", "/index.html"),
            (":authority", "www.example.com"),
            ("custom-key", "custom-value"),
        ])
    );
    assert_eq!(decoder.table().size(), 164);
    assert_eq!(
        table_entries(&decoder)[0],
        ("custom-key".to_owned(), "custom-value".to_owned())
    );
}

// RFC 7541 C.4: the same requests with Huffman-coded literals.
#[test]
fn test_rfc_request_sequence_huffman() {
    let mut decoder = Decoder::new();

    let first = hex("8286 8441 8cf1 e3c2 e5f2 3a6b a0ab 90f4 ff");
    let headers = decoder.decode(&first).unwrap();
    assert_eq!(headers[3], HeaderField::new(":authority", "www.example.com"));

    let second = hex("8286 84be 5886 a8eb 1064 9cbf");
    let headers = decoder.decode(&second).unwrap();
    assert_eq!(headers[4], HeaderField::new("cache-control", "no-cache"));

    let third = hex("8287 85bf 4088 25a8 49e9 5ba9 7d7f 8925 a849 e95b b8e8 b4bf");
    let headers = decoder.decode(&third).unwrap();
    assert_eq!(headers[4], HeaderField::new("custom-key", "custom-value"));
    assert_eq!(decoder.table().size(), 164);
}

// RFC 7541 C.5: responses with a 256-byte table, forcing evictions.
#[test]
fn test_rfc_response_sequence_with_eviction() {
    let mut decoder = Decoder::with_max_table_size(256);

    let first = hex(
        "4803 3330 3258 0770 7269 7661 7465 611d \
         4d6f 6e2c 2032 3120 4f63 7420 3230 3133 \
         2032 303a 3133 3a32 3120 474d 546e 1768 \
         7474 7073 3a2f 2f77 7777 2e65 7861 6d70 \
         6c65 2e63 6f6d",
    );
    assert_eq!(
        decoder.decode(&first).unwrap(),
        fields(&[
            (":status", "302"),
            ("cache-control", "private"),
            ("date", "Mon, 21 Oct 2013 20:13:21 GMT"),
            ("location", "https://www.example.com"),
        ])
    );
    assert_eq!(decoder.table().size(), 222);

    let second = hex("4803 3330 37c1 c0bf");
    assert_eq!(
        decoder.decode(&second).unwrap(),
        fields(&[
            (":status", "307"),
            ("cache-control", "private"),
            ("date", "Mon, 21 Oct 2013 20:13:21 GMT"),
            ("location", "https://www.example.com"),
        ])
    );
    assert_eq!(decoder.table().size(), 222);
    let entries = table_entries(&decoder);
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0], (":status".to_owned(), "307".to_owned()));
    assert_eq!(entries[3], ("cache-control".to_owned(), "private".to_owned()));
}

// ============================================================================
// Size updates
// ============================================================================

#[test]
fn test_size_update_evicts() {
    let mut decoder = Decoder::new();
    decoder.decode(&hex("4003 6162 6303 7879 7a")).unwrap(); // abc: xyz
    assert_eq!(decoder.table().len(), 1);

    // Size update to 0, then back to 4096, before any field.
    let mut block = vec![0x20];
    block.extend(hex("3fe1 1f"));
    block.push(0x82);
    assert_eq!(decoder.decode(&block).unwrap(), fields(&[(":method", "GET")]));
    assert!(decoder.table().is_empty());
    assert_eq!(decoder.table().max_size(), 4096);
}

#[test]
fn test_size_update_above_limit() {
    let mut decoder = Decoder::new();
    decoder.set_max_table_size(100);
    // 0x3f 0x46 = 31 + 70 = 101
    assert_eq!(
        decoder.decode(&[0x3f, 0x46]),
        Err(HpackError::TableSizeExceeded {
            requested: 101,
            limit: 100
        })
    );
}

#[test]
fn test_size_update_after_field() {
    let mut decoder = Decoder::new();
    assert_eq!(
        decoder.decode(&[0x82, 0x20]),
        Err(HpackError::MisplacedSizeUpdate)
    );
}

#[test]
fn test_three_size_updates_rejected() {
    let mut decoder = Decoder::new();
    assert_eq!(
        decoder.decode(&[0x20, 0x20, 0x20]),
        Err(HpackError::MisplacedSizeUpdate)
    );
}

// ============================================================================
// Malformed input
// ============================================================================

#[test]
fn test_index_zero() {
    let mut decoder = Decoder::new();
    assert_eq!(decoder.decode(&[0x80]), Err(HpackError::InvalidIndex(0)));
}

#[test]
fn test_index_past_dynamic_table() {
    let mut decoder = Decoder::new();
    assert_eq!(decoder.decode(&[0xbe]), Err(HpackError::InvalidIndex(62)));
    // Literal whose name index points past the table
    assert_eq!(
        decoder.decode(&[0x7f, 0x00, 0x01, b'x']),
        Err(HpackError::InvalidIndex(63))
    );
}

#[test]
fn test_truncated_string() {
    let mut decoder = Decoder::new();
    assert!(matches!(
        decoder.decode(&[0x40, 0x05, b'a', b'b']),
        Err(HpackError::Truncated(_))
    ));
}

#[test]
fn test_bad_huffman_padding() {
    let mut decoder = Decoder::new();
    // Name is a one-byte Huffman string "0" padded with zero bits.
    assert!(matches!(
        decoder.decode(&[0x00, 0x81, 0x00, 0x00]),
        Err(HpackError::InvalidHuffman(_))
    ));
}

#[test]
fn test_oversized_integer() {
    let mut decoder = Decoder::new();
    assert_eq!(
        decoder.decode(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7f]),
        Err(HpackError::IntegerOverflow)
    );
}

#[test]
fn test_header_list_size_limit() {
    let mut decoder = Decoder::new();
    decoder.set_max_header_list_size(Some(70));
    // :method GET is 7 + 3 + 32 = 42 bytes
    assert!(decoder.decode(&[0x82]).is_ok());
    assert_eq!(
        decoder.decode(&[0x82, 0x82]),
        Err(HpackError::HeaderListTooLarge { limit: 70 })
    );
}

#[test]
fn test_table_changes_survive_failed_block() {
    let mut decoder = Decoder::new();
    let mut block = hex("4003 6162 6303 7879 7a"); // abc: xyz, indexed
    block.push(0x80); // invalid index 0
    assert!(decoder.decode(&block).is_err());
    assert_eq!(decoder.table().len(), 1);
}
