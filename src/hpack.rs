//! HPACK: Header Compression for HTTP/2 (RFC 7541)
//!
//! The combined index address space is laid out as
//!
//! ```text
//! <----------  Index Address Space ---------->
//! <-- Static  Table -->  <-- Dynamic Table -->
//! +---+-----------+---+  +---+-----------+---+
//! | 1 |    ...    | s |  |s+1|    ...    |s+k|
//! +---+-----------+---+  +---+-----------+---+
//!                        ^                   |
//!                        |                   v
//!                 Insertion Point      Eviction Point
//! ```
//!
//! [`Encoder`] and [`Decoder`] each own a [`DynamicTable`]. Every literal with
//! incremental indexing mutates both sides identically, which is what keeps a
//! connection's two tables in sync.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::trace;

use crate::error::HpackError;
use crate::huffman;

/// Initial dynamic table size (SETTINGS_HEADER_TABLE_SIZE default).
pub const DEFAULT_TABLE_SIZE: usize = 4096;

/// Per-entry overhead added to name and value lengths (RFC 7541 Section 4.1).
pub const ENTRY_OVERHEAD: usize = 32;

/// Integers may use at most this many continuation octets.
pub const MAX_INTEGER_CONTINUATION_OCTETS: usize = 5;

/// Largest integer the decoder accepts.
pub const MAX_INTEGER: u64 = u32::MAX as u64;

/// Consecutive size updates allowed at the start of one header block.
const MAX_SIZE_UPDATES_PER_BLOCK: usize = 2;

/// RFC 7541 Appendix A. Index 0 of the address space is invalid, so entry
/// `i` of this array is index `i + 1`.
pub static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// A header field: a (name, value) pair of byte strings.
///
/// `never_indexed` marks a field that was (or must be) sent as a
/// "literal never indexed" representation; no table may store it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
    pub never_indexed: bool,
}

impl HeaderField {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            never_indexed: false,
        }
    }

    /// A field that must never enter a dynamic table (credentials, cookies).
    pub fn sensitive(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            never_indexed: true,
            ..Self::new(name, value)
        }
    }

    /// Table accounting size: name + value + 32.
    #[must_use]
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }

    #[must_use]
    pub fn is_pseudo(&self) -> bool {
        self.name.first() == Some(&b':')
    }

    /// Name as UTF-8, if it is.
    #[must_use]
    pub fn name_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.name).ok()
    }

    /// Value as UTF-8, if it is.
    #[must_use]
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

// ============================================================================
// Integer and string primitives (RFC 7541 Section 5)
// ============================================================================

/// Encode `value` with an N-bit prefix. `flags` supplies the high bits of the
/// first octet that belong to the representation type.
pub fn encode_integer(value: usize, prefix_bits: u8, flags: u8, dst: &mut Vec<u8>) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        dst.push(flags | value as u8);
        return;
    }

    dst.push(flags | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 0x80 {
        dst.push(((rest & 0x7f) as u8) | 0x80);
        rest >>= 7;
    }
    dst.push(rest as u8);
}

/// Decode an N-bit-prefix integer from the start of `src`.
///
/// Returns `(value, bytes_consumed)`. At most
/// [`MAX_INTEGER_CONTINUATION_OCTETS`] continuation octets are read and the
/// value may not exceed [`MAX_INTEGER`].
pub fn decode_integer(src: &[u8], prefix_bits: u8) -> Result<(usize, usize), HpackError> {
    let first = *src.first().ok_or(HpackError::Truncated("integer"))?;
    let max_prefix = (1u64 << prefix_bits) - 1;
    let prefix = u64::from(first) & max_prefix;
    if prefix < max_prefix {
        return Ok((prefix as usize, 1));
    }

    let mut value = prefix;
    for (i, &octet) in src[1..].iter().enumerate() {
        if i == MAX_INTEGER_CONTINUATION_OCTETS {
            return Err(HpackError::IntegerOverflow);
        }
        value += u64::from(octet & 0x7f) << (7 * i);
        if value > MAX_INTEGER {
            return Err(HpackError::IntegerOverflow);
        }
        if octet & 0x80 == 0 {
            return Ok((value as usize, i + 2));
        }
    }
    Err(HpackError::Truncated("integer"))
}

/// Encode a string literal, Huffman-coded when `huffman` is set.
pub fn encode_string(value: &[u8], huffman: bool, dst: &mut Vec<u8>) {
    if huffman {
        encode_integer(huffman::encoded_len(value), 7, 0x80, dst);
        huffman::encode(value, dst);
    } else {
        encode_integer(value.len(), 7, 0x00, dst);
        dst.extend_from_slice(value);
    }
}

/// Decode a string literal from the start of `src`, returning the string and
/// the number of bytes consumed.
pub fn decode_string(src: &[u8]) -> Result<(Bytes, usize), HpackError> {
    let first = *src.first().ok_or(HpackError::Truncated("string length"))?;
    let huffman_coded = first & 0x80 != 0;
    let (len, consumed) = decode_integer(src, 7)?;
    let end = consumed
        .checked_add(len)
        .filter(|&end| end <= src.len())
        .ok_or(HpackError::Truncated("string literal"))?;
    let raw = &src[consumed..end];

    let value = if huffman_coded {
        let mut out = Vec::with_capacity(raw.len() * 8 / 5);
        huffman::decode(raw, &mut out)?;
        Bytes::from(out)
    } else {
        Bytes::copy_from_slice(raw)
    };
    Ok((value, end))
}

// ============================================================================
// Tables
// ============================================================================

/// Result of searching the static table for a header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticMatch {
    /// Name and value both match the entry at this index.
    Full(usize),
    /// Only the name matches; this is the first entry with that name.
    Name(usize),
}

/// Look up a (name, value) pair in the static table.
#[must_use]
pub fn find_static(name: &[u8], value: &[u8]) -> Option<StaticMatch> {
    let mut name_match = None;
    for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
        if n.as_bytes() != name {
            continue;
        }
        if v.as_bytes() == value {
            return Some(StaticMatch::Full(i + 1));
        }
        name_match.get_or_insert(i + 1);
    }
    name_match.map(StaticMatch::Name)
}

/// Static table entry for a 1-based index.
#[must_use]
pub fn static_entry(index: usize) -> Option<HeaderField> {
    let &(name, value) = STATIC_TABLE.get(index.checked_sub(1)?)?;
    Some(HeaderField::new(
        Bytes::from_static(name.as_bytes()),
        Bytes::from_static(value.as_bytes()),
    ))
}

/// Size-bounded table of recently inserted header fields, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicTable {
    entries: VecDeque<HeaderField>,
    size: usize,
    max_size: usize,
}

impl Default for DynamicTable {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE)
    }
}

impl DynamicTable {
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of entry sizes in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Entries from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &HeaderField> {
        self.entries.iter()
    }

    /// Entry at a 1-based position relative to the head of the table.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&HeaderField> {
        self.entries.get(index.checked_sub(1)?)
    }

    /// 1-based position of an entry with this exact name and value.
    #[must_use]
    pub fn find(&self, name: &[u8], value: &[u8]) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name == name && e.value == value)
            .map(|i| i + 1)
    }

    /// Insert at the head, evicting from the tail until the new entry fits.
    /// An entry larger than the whole table empties it and is not stored.
    pub fn insert(&mut self, mut field: HeaderField) {
        let entry_size = field.size();
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }
        self.evict_to(self.max_size - entry_size);
        field.never_indexed = false;
        self.entries.push_front(field);
        self.size += entry_size;
    }

    /// Change the size budget, evicting as needed.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to(max_size);
    }

    fn evict_to(&mut self, budget: usize) {
        while self.size > budget {
            match self.entries.pop_back() {
                Some(evicted) => self.size -= evicted.size(),
                None => break,
            }
        }
    }
}

/// Resolve an index in the combined static + dynamic address space.
fn lookup(table: &DynamicTable, index: usize) -> Result<HeaderField, HpackError> {
    if index == 0 {
        return Err(HpackError::InvalidIndex(0));
    }
    if index <= STATIC_TABLE.len() {
        return static_entry(index).ok_or(HpackError::InvalidIndex(index));
    }
    table
        .get(index - STATIC_TABLE.len())
        .cloned()
        .ok_or(HpackError::InvalidIndex(index))
}

// ============================================================================
// Decoder
// ============================================================================

/// HPACK decoder for HTTP/2 header blocks.
/// Holds the receive-side dynamic table for one connection.
#[derive(Debug, Clone)]
pub struct Decoder {
    table: DynamicTable,
    /// Upper bound on size updates, i.e. the SETTINGS_HEADER_TABLE_SIZE we advertised.
    max_table_size: usize,
    max_header_list_size: Option<usize>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_table_size(DEFAULT_TABLE_SIZE)
    }

    pub fn with_max_table_size(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            max_table_size,
            max_header_list_size: None,
        }
    }

    /// Bound the size a peer may request through a size update.
    pub fn set_max_table_size(&mut self, max_table_size: usize) {
        self.max_table_size = max_table_size;
    }

    /// Reject header lists larger than `limit` bytes (RFC 7540 accounting).
    pub fn set_max_header_list_size(&mut self, limit: Option<usize>) {
        self.max_header_list_size = limit;
    }

    #[must_use]
    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Decode a complete header block into header fields.
    ///
    /// Table mutations happen as instructions are consumed and are kept even
    /// when a later instruction fails.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>, HpackError> {
        let mut headers = Vec::new();
        let mut list_size = 0usize;
        let mut size_updates = 0usize;
        let mut pos = 0;

        while pos < block.len() {
            let rest = &block[pos..];
            let first = rest[0];

            if first & 0x80 != 0 {
                // 1xxxxxxx indexed header field
                let (index, n) = decode_integer(rest, 7)?;
                pos += n;
                headers.push(lookup(&self.table, index)?);
            } else if first & 0x40 != 0 {
                // 01xxxxxx literal with incremental indexing
                let (field, n) = self.decode_literal(rest, 6)?;
                pos += n;
                self.table.insert(field.clone());
                headers.push(field);
            } else if first & 0x20 != 0 {
                // 001xxxxx dynamic table size update
                if !headers.is_empty() || size_updates == MAX_SIZE_UPDATES_PER_BLOCK {
                    return Err(HpackError::MisplacedSizeUpdate);
                }
                let (new_size, n) = decode_integer(rest, 5)?;
                if new_size > self.max_table_size {
                    return Err(HpackError::TableSizeExceeded {
                        requested: new_size,
                        limit: self.max_table_size,
                    });
                }
                pos += n;
                size_updates += 1;
                trace!(new_size, "hpack dynamic table size update");
                self.table.set_max_size(new_size);
                continue;
            } else {
                // 0000xxxx without indexing, 0001xxxx never indexed
                let (mut field, n) = self.decode_literal(rest, 4)?;
                pos += n;
                field.never_indexed = first & 0x10 != 0;
                headers.push(field);
            }

            if let (Some(limit), Some(last)) = (self.max_header_list_size, headers.last()) {
                list_size += last.size();
                if list_size > limit {
                    return Err(HpackError::HeaderListTooLarge { limit });
                }
            }
        }

        trace!(
            fields = headers.len(),
            table_entries = self.table.len(),
            table_size = self.table.size(),
            "hpack block decoded"
        );
        Ok(headers)
    }

    /// Decode a literal representation whose name index uses `prefix_bits`.
    fn decode_literal(
        &self,
        src: &[u8],
        prefix_bits: u8,
    ) -> Result<(HeaderField, usize), HpackError> {
        let (name_index, mut pos) = decode_integer(src, prefix_bits)?;
        let name = if name_index == 0 {
            let (name, n) = decode_string(&src[pos..])?;
            pos += n;
            name
        } else {
            lookup(&self.table, name_index)?.name
        };
        let (value, n) = decode_string(&src[pos..])?;
        pos += n;
        Ok((HeaderField::new(name, value), pos))
    }
}

// ============================================================================
// Encoder
// ============================================================================

/// HPACK encoder for HTTP/2 header blocks.
/// Holds the send-side dynamic table for one connection.
#[derive(Debug, Clone)]
pub struct Encoder {
    table: DynamicTable,
    use_huffman: bool,
    /// Smallest and final sizes set since the last block, to be signalled.
    pending_size_update: Option<(usize, usize)>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            table: DynamicTable::default(),
            use_huffman: true,
            pending_size_update: None,
        }
    }

    /// Choose between Huffman-coded and raw string literals.
    pub fn set_use_huffman(&mut self, use_huffman: bool) {
        self.use_huffman = use_huffman;
    }

    /// Resize the table; the change is announced at the start of the next block.
    pub fn set_max_table_size(&mut self, max_size: usize) {
        if max_size == self.table.max_size() && self.pending_size_update.is_none() {
            return;
        }
        let smallest = match self.pending_size_update {
            Some((smallest, _)) => smallest.min(max_size),
            None => self.table.max_size().min(max_size),
        };
        self.pending_size_update = Some((smallest, max_size));
        self.table.set_max_size(smallest);
        self.table.set_max_size(max_size);
    }

    #[must_use]
    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    /// Encode headers into an HPACK header block.
    pub fn encode(&mut self, headers: &[HeaderField]) -> Vec<u8> {
        let mut dst = Vec::new();
        if let Some((smallest, last)) = self.pending_size_update.take() {
            if smallest < last {
                encode_integer(smallest, 5, 0x20, &mut dst);
            }
            encode_integer(last, 5, 0x20, &mut dst);
        }
        for field in headers {
            self.encode_field(field, &mut dst);
        }
        dst
    }

    fn encode_field(&mut self, field: &HeaderField, dst: &mut Vec<u8>) {
        let static_match = find_static(&field.name, &field.value);

        if field.never_indexed {
            let name_index = match static_match {
                Some(StaticMatch::Full(i) | StaticMatch::Name(i)) => i,
                None => 0,
            };
            self.encode_literal(field, name_index, 4, 0x10, dst);
            return;
        }

        if let Some(StaticMatch::Full(index)) = static_match {
            encode_integer(index, 7, 0x80, dst);
            return;
        }
        if let Some(position) = self.table.find(&field.name, &field.value) {
            encode_integer(STATIC_TABLE.len() + position, 7, 0x80, dst);
            return;
        }

        let name_index = match static_match {
            Some(StaticMatch::Name(index)) => index,
            _ => 0,
        };
        self.encode_literal(field, name_index, 6, 0x40, dst);
        self.table.insert(field.clone());
    }

    fn encode_literal(
        &self,
        field: &HeaderField,
        name_index: usize,
        prefix_bits: u8,
        flags: u8,
        dst: &mut Vec<u8>,
    ) {
        encode_integer(name_index, prefix_bits, flags, dst);
        if name_index == 0 {
            encode_string(&field.name, self.use_huffman, dst);
        }
        encode_string(&field.value, self.use_huffman, dst);
    }
}

// ============================================================================
// Tests
// ============================================================================
