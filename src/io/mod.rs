//! I/O pipeline (C5): write (flatten → encode → compress → offset-assign →
//! fixed-point header sizing → emit) and read (parse framing → validate →
//! per-field seek/decompress/CRC-check → decode → reinsert by dot-path).

mod read;
mod write;

pub use read::{read_file, read_header_only, read_var};
pub use write::write_file;

/// Per-call write configuration, rather than a global config file — the
/// engine has no persisted state and no daemon to configure.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub compression: CompressionMode,
    pub include_crc32: bool,
    pub zlib_level: i32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: CompressionMode::Auto,
            include_crc32: true,
            zlib_level: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    Never,
    Always,
    Auto,
}

/// Per-call read configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub validate: bool,
}
