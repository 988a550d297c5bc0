//! SETTINGS parameters (RFC 7540 Section 6.5).

use bytes::{Buf, Bytes};
use tracing::trace;

use crate::error::H2Error;

/// HTTP/2 settings identifiers
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;
/// Chosen locally; the protocol leaves it unlimited.
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 1024;
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

pub const MAX_INITIAL_WINDOW_SIZE: u32 = 0x7fff_ffff;
pub const MIN_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_MAX_FRAME_SIZE: u32 = 0x00ff_ffff;

/// One side's SETTINGS record. Used both for what we advertise and for what
/// the peer has told us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    /// `None` means unbounded.
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            enable_push: true,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one received parameter.
    ///
    /// - `ENABLE_PUSH` other than 0 or 1: PROTOCOL_ERROR
    /// - `INITIAL_WINDOW_SIZE` above 2^31-1: FLOW_CONTROL_ERROR
    /// - `MAX_FRAME_SIZE` outside 16384..=16777215: PROTOCOL_ERROR
    ///
    /// Unknown identifiers are ignored.
    pub fn apply(&mut self, id: u16, value: u32) -> Result<(), H2Error> {
        match id {
            settings_id::HEADER_TABLE_SIZE => self.header_table_size = value,
            settings_id::ENABLE_PUSH => match value {
                0 => self.enable_push = false,
                1 => self.enable_push = true,
                _ => return Err(H2Error::protocol("SETTINGS_ENABLE_PUSH must be 0 or 1")),
            },
            settings_id::MAX_CONCURRENT_STREAMS => self.max_concurrent_streams = value,
            settings_id::INITIAL_WINDOW_SIZE => {
                if value > MAX_INITIAL_WINDOW_SIZE {
                    return Err(H2Error::flow_control(
                        "initial window size exceeds maximum (2^31-1)",
                    ));
                }
                self.initial_window_size = value;
            }
            settings_id::MAX_FRAME_SIZE => {
                if !(MIN_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                    return Err(H2Error::protocol("max frame size out of valid range"));
                }
                self.max_frame_size = value;
            }
            settings_id::MAX_HEADER_LIST_SIZE => self.max_header_list_size = Some(value),
            _ => trace!(id, value, "ignoring unknown setting"),
        }
        Ok(())
    }

    /// Apply every parameter of a non-ACK SETTINGS payload, in order.
    pub fn apply_payload(&mut self, payload: &Bytes) -> Result<(), H2Error> {
        for (id, value) in parse_payload(payload)? {
            self.apply(id, value)?;
        }
        Ok(())
    }

    /// The parameters advertised in our initial SETTINGS frame.
    ///
    /// ENABLE_PUSH is only meaningful from clients and is never sent; the
    /// header list size goes out only when bounded.
    #[must_use]
    pub fn to_entries(&self) -> Vec<(u16, u32)> {
        let mut entries = vec![
            (settings_id::HEADER_TABLE_SIZE, self.header_table_size),
            (settings_id::MAX_CONCURRENT_STREAMS, self.max_concurrent_streams),
            (settings_id::INITIAL_WINDOW_SIZE, self.initial_window_size),
            (settings_id::MAX_FRAME_SIZE, self.max_frame_size),
        ];
        if let Some(limit) = self.max_header_list_size {
            entries.push((settings_id::MAX_HEADER_LIST_SIZE, limit));
        }
        entries
    }
}

/// Split a SETTINGS payload into (identifier, value) pairs.
///
/// A length that is not a multiple of 6 is a FRAME_SIZE_ERROR.
pub fn parse_payload(payload: &Bytes) -> Result<Vec<(u16, u32)>, H2Error> {
    if payload.len() % 6 != 0 {
        return Err(H2Error::frame_size(format!(
            "SETTINGS payload length {} is not a multiple of 6",
            payload.len()
        )));
    }
    let mut buf = payload.clone();
    let mut entries = Vec::with_capacity(payload.len() / 6);
    while buf.has_remaining() {
        entries.push((buf.get_u16(), buf.get_u32()));
    }
    Ok(entries)
}
