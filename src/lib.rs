//! GBF (GREDBIN): an on-disk container for labelled, heterogeneous,
//! array-oriented scientific data.
//!
//! A file holds the flattened leaves of one record tree, indexed by a
//! self-describing, CRC-protected JSON header. See [`io`] for the four
//! entry points (`read_header_only`, `read_file`, `read_var`, `write_file`),
//! [`value`] for the in-memory value model, and [`header`] for the header
//! entity itself.

pub mod error;
pub mod header;
pub mod io;
pub mod json;
pub mod payload;
pub mod primitives;
pub mod value;

pub use error::{GbfError, Result};
pub use header::{FieldMeta, Header};
pub use io::{read_file, read_header_only, read_var, write_file, CompressionMode, ReadOptions, WriteOptions};
pub use value::{
    CalendarDurationValue, CategoricalValue, CharValue, DateTimeValue, DurationValue,
    LogicalValue, NumericClass, NumericValue, OpaqueValue, Record, StringValue, Value,
};
