//! Cross-checks against an independent HPACK implementation

use h2_server_sans_io::hpack::{Decoder, Encoder, HeaderField};

fn sample_blocks() -> Vec<Vec<(&'static str, &'static str)>> {
    vec![
        vec![
            (":method", "GET"),
            (":scheme", "https"),
            (":path", "/"),
            (":authority", "example.org"),
            ("user-agent", "interop/1.0"),
            ("accept", "*/*"),
        ],
        vec![
            (":method", "POST"),
            (":scheme", "https"),
            (":path", "/upload?name=a%20b"),
            (":authority", "example.org"),
            ("user-agent", "interop/1.0"),
            ("content-type", "application/octet-stream"),
            ("x-empty", ""),
        ],
        vec![
            (":status", "200"),
            ("cache-control", "private, max-age=0"),
            ("set-cookie", "a=1"),
            ("set-cookie", "b=2"),
            ("x-unicode", "caf\u{e9}"),
        ],
    ]
}

fn to_fields(pairs: &[(&'static str, &'static str)]) -> Vec<HeaderField> {
    pairs
        .iter()
        .map(|&(name, value)| HeaderField::new(name, value))
        .collect()
}

fn to_pairs(fields: &[HeaderField]) -> Vec<(Vec<u8>, Vec<u8>)> {
    fields
        .iter()
        .map(|f| (f.name.to_vec(), f.value.to_vec()))
        .collect()
}

#[test]
fn test_decode_reference_encoder_output() {
    let mut reference = fluke_hpack::Encoder::new();
    let mut decoder = Decoder::new();

    for block in sample_blocks() {
        let pairs: Vec<(&[u8], &[u8])> = block
            .iter()
            .map(|(name, value)| (name.as_bytes(), value.as_bytes()))
            .collect();
        let encoded = reference.encode(pairs);
        let decoded = decoder.decode(&encoded).unwrap();
        assert_eq!(decoded, to_fields(&block));
    }
}

#[test]
fn test_reference_decodes_our_output() {
    for use_huffman in [true, false] {
        let mut encoder = Encoder::new();
        encoder.set_use_huffman(use_huffman);
        let mut reference = fluke_hpack::Decoder::new();

        for block in sample_blocks() {
            let fields = to_fields(&block);
            let encoded = encoder.encode(&fields);
            let decoded: Vec<(Vec<u8>, Vec<u8>)> = reference
                .decode(&encoded)
                .unwrap()
                .into_iter()
                .map(|(name, value)| (name[..].to_vec(), value[..].to_vec()))
                .collect();
            assert_eq!(decoded, to_pairs(&fields), "huffman: {use_huffman}");
        }
    }
}

#[test]
fn test_reference_decodes_size_updates() {
    let mut encoder = Encoder::new();
    let mut reference = fluke_hpack::Decoder::new();

    let first = to_fields(&sample_blocks()[0]);
    reference.decode(&encoder.encode(&first)).unwrap();

    encoder.set_max_table_size(0);
    encoder.set_max_table_size(128);
    let second = to_fields(&sample_blocks()[1]);
    let decoded = reference.decode(&encoder.encode(&second)).unwrap();
    assert_eq!(decoded.len(), second.len());

    // Both sides keep agreeing on dynamic indices afterwards.
    let decoded = reference.decode(&encoder.encode(&second)).unwrap();
    let decoded: Vec<_> = decoded
        .into_iter()
        .map(|(name, value)| (name[..].to_vec(), value[..].to_vec()))
        .collect();
    assert_eq!(decoded, to_pairs(&second));
}
