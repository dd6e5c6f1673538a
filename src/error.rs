//! Closed error taxonomy for the GBF engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GbfError>;

/// All ways a read or write of a GBF container can fail.
///
/// The set is closed by design: callers match on specific variants rather
/// than string-sniffing a message.
#[derive(Error, Debug)]
pub enum GbfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad magic: expected GREDBIN or legacy GRDCBIN, got {0:?}")]
    BadMagic([u8; 8]),

    #[error("truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("header JSON parse error: {0}")]
    HeaderJsonParse(String),

    #[error("header CRC32 mismatch: expected {expected:08X}, computed {computed:08X}")]
    HeaderCrcMismatch { expected: u32, computed: u32 },

    #[error("field '{name}' CRC32 mismatch: expected {expected:08X}, computed {computed:08X}")]
    FieldCrcMismatch {
        name: String,
        expected: u32,
        computed: u32,
    },

    #[error("zlib error: {0}")]
    ZlibError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
