//! Per-connection configuration.

use crate::settings::Settings;

/// Maximum accumulated header block size (HEADERS + CONTINUATION), 256KB
pub const DEFAULT_MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// How many closed streams are remembered for STREAM_CLOSED detection.
pub const DEFAULT_MAX_RETAINED_CLOSED_STREAMS: usize = 128;

/// Configuration for one server connection.
///
/// ```
/// use h2_server_sans_io::ConnectionConfig;
///
/// let config = ConnectionConfig::new()
///     .max_concurrent_streams(100)
///     .max_header_list_size(16 * 1024);
/// assert_eq!(config.settings().max_concurrent_streams, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    settings: Settings,
    max_header_block_size: usize,
    max_retained_closed_streams: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            max_header_block_size: DEFAULT_MAX_HEADER_BLOCK_SIZE,
            max_retained_closed_streams: DEFAULT_MAX_RETAINED_CLOSED_STREAMS,
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole local SETTINGS record.
    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn max_concurrent_streams(mut self, value: u32) -> Self {
        self.settings.max_concurrent_streams = value;
        self
    }

    /// Clamped into the legal 16384..=16777215 range.
    #[must_use]
    pub fn max_frame_size(mut self, value: u32) -> Self {
        self.settings.max_frame_size = value.clamp(
            crate::settings::MIN_MAX_FRAME_SIZE,
            crate::settings::MAX_MAX_FRAME_SIZE,
        );
        self
    }

    /// Upper bound for the peer encoder's dynamic table (our decoder).
    #[must_use]
    pub fn header_table_size(mut self, value: u32) -> Self {
        self.settings.header_table_size = value;
        self
    }

    #[must_use]
    pub fn max_header_list_size(mut self, value: u32) -> Self {
        self.settings.max_header_list_size = Some(value);
        self
    }

    #[must_use]
    pub fn max_header_block_size(mut self, value: usize) -> Self {
        self.max_header_block_size = value;
        self
    }

    #[must_use]
    pub fn max_retained_closed_streams(mut self, value: usize) -> Self {
        self.max_retained_closed_streams = value;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn header_block_limit(&self) -> usize {
        self.max_header_block_size
    }

    #[must_use]
    pub fn retained_closed_streams(&self) -> usize {
        self.max_retained_closed_streams
    }
}
