use std::io::Write as _;
use std::path::Path;

use tracing::{debug, instrument, warn};

use crate::error::{GbfError, Result};
use crate::header::{self, FieldMeta, Header, MAGIC_CURRENT};
use crate::payload::{self, maybe_compress};
use crate::primitives::{self, checked_add};
use crate::value::Value;

use super::WriteOptions;

const FRAMING_OVERHEAD: u64 = 8 + 4; // magic + header_len
const MAX_FIXED_POINT_ITERATIONS: usize = 8;

struct PendingField {
    meta: FieldMeta,
    stored_bytes: Vec<u8>,
}

/// Flatten a root record into `(dot_path, &Value)` leaves in depth-first,
/// insertion order. An empty record below the root becomes a `"struct"` leaf
/// with a zero-byte payload rather than disappearing.
fn flatten<'a>(prefix: &str, value: &'a Value, out: &mut Vec<(String, &'a Value)>) {
    match value {
        Value::Struct(record) if !record.is_empty() => {
            for (key, child) in record.iter() {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, child, out);
            }
        }
        _ => out.push((prefix.to_string(), value)),
    }
}

#[instrument(skip(root))]
pub fn write_file(path: &Path, root: &Value, options: WriteOptions) -> Result<()> {
    if root.as_struct().is_none() {
        return Err(GbfError::Unsupported(
            "write_file root value must be a record (struct)".into(),
        ));
    }

    let mut leaves = Vec::new();
    flatten("", root, &mut leaves);
    debug!(field_count = leaves.len(), "flattened record tree");

    let mut pending: Vec<PendingField> = Vec::with_capacity(leaves.len());
    for (name, value) in &leaves {
        let encoded = payload::encode(value).map_err(|e| {
            warn!(field = %name, error = %e, "leaf encode failed");
            e
        })?;
        let usize_ = encoded.bytes.len() as u64;
        let crc32 = if options.include_crc32 && usize_ > 0 {
            primitives::crc32(&encoded.bytes)
        } else {
            0
        };
        let (compression, stored_bytes) =
            maybe_compress(&encoded.bytes, options.compression, options.zlib_level)?;
        let csize = stored_bytes.len() as u64;

        pending.push(PendingField {
            meta: FieldMeta {
                name: name.clone(),
                kind: encoded.kind,
                class: encoded.class,
                shape: encoded.shape,
                complex: encoded.complex,
                encoding: encoded.encoding,
                compression,
                offset: 0, // assigned below
                csize,
                usize_,
                crc32,
            },
            stored_bytes,
        });
    }

    // Offset assignment.
    let mut payload = Vec::new();
    for field in &mut pending {
        field.meta.offset = payload.len() as u64;
        payload.extend_from_slice(&field.stored_bytes);
    }
    let total_payload_len = payload.len() as u64;

    let fields: Vec<FieldMeta> = pending.into_iter().map(|p| p.meta).collect();

    let mut header = Header {
        format: "GBF".to_string(),
        magic: "GREDBIN".to_string(),
        version: 1,
        endianness: "little".to_string(),
        order: "column-major".to_string(),
        root: "struct".to_string(),
        fields,
        payload_start: 0,
        file_size: 0,
        header_crc32_hex: "00000000".to_string(),
    };

    // Fixed-point header sizing: header_len <-> payload_start <-> file_size.
    let mut header_bytes;
    let mut payload_start;
    let mut file_size;
    let mut iterations = 0;
    loop {
        header_bytes = header::build(&header, true);
        payload_start = checked_add(FRAMING_OVERHEAD as usize, header_bytes.len())? as u64;
        file_size = payload_start + total_payload_len;
        iterations += 1;
        if header.payload_start == payload_start && header.file_size == file_size {
            break;
        }
        header.payload_start = payload_start;
        header.file_size = file_size;
        if iterations >= MAX_FIXED_POINT_ITERATIONS {
            return Err(GbfError::InvalidData(
                "header size did not converge within the iteration budget".into(),
            ));
        }
    }
    debug!(iterations, payload_start, file_size, "header sizing converged");

    let crc = header::compute_header_crc(&header_bytes);
    header::patch_header_crc(&mut header_bytes, crc)?;
    header.header_crc32_hex = format!("{:08X}", crc);

    if header_bytes.len() as u64 > header::MAX_HEADER_LEN {
        return Err(GbfError::InvalidData(format!(
            "header length {} exceeds the 64 MiB cap",
            header_bytes.len()
        )));
    }

    // Emit to a temporary sibling file, then rename into place, so a
    // crash or an error never leaves a half-written file at `path`.
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(GbfError::Io)?;
    let write_result = (|| -> Result<()> {
        tmp.write_all(MAGIC_CURRENT).map_err(GbfError::Io)?;
        tmp.write_all(&(header_bytes.len() as u32).to_le_bytes())
            .map_err(GbfError::Io)?;
        tmp.write_all(&header_bytes).map_err(GbfError::Io)?;
        tmp.write_all(&payload).map_err(GbfError::Io)?;
        tmp.flush().map_err(GbfError::Io)?;
        Ok(())
    })();

    match write_result {
        Ok(()) => {
            tmp.persist(path).map_err(|e| GbfError::Io(e.error))?;
            debug!(path = %path.display(), file_size, "wrote file");
            Ok(())
        }
        Err(e) => {
            // NamedTempFile removes itself on drop; nothing further to clean up.
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Compression as Comp;
    use crate::value::{LogicalValue, NumericClass, NumericValue, Record};
    use tempfile::tempdir;

    #[test]
    fn test_flatten_nested_and_empty_record() {
        let mut inner = Record::new();
        inner.insert("y", Value::Struct(Record::new()));
        let mut root = Record::new();
        root.insert(
            "x",
            Value::Logical(LogicalValue {
                shape: vec![1],
                data: vec![1],
            }),
        );
        root.insert("nested", Value::Struct(inner));

        let root_value = Value::Struct(root);
        let mut leaves = Vec::new();
        flatten("", &root_value, &mut leaves);
        let names: Vec<&str> = leaves.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["x", "nested.y"]);
    }

    #[test]
    fn test_write_file_tiny_numeric() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.gbf");

        let mut root = Record::new();
        root.insert(
            "A",
            Value::Numeric(NumericValue {
                class: NumericClass::Double,
                shape: vec![2, 3],
                real_le: (1..=6u64).flat_map(|x| (x as f64).to_le_bytes()).collect(),
                imag_le: None,
            }),
        );
        write_file(&path, &Value::Struct(root), WriteOptions::default()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..7], b"GREDBIN");
        assert_eq!(bytes[7], 0);
    }

    #[test]
    fn test_write_file_rejects_non_struct_root() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.gbf");
        let value = Value::Logical(LogicalValue {
            shape: vec![],
            data: vec![],
        });
        assert!(write_file(&path, &value, WriteOptions::default()).is_err());
    }

    #[test]
    fn test_never_mode_stores_none_compression() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.gbf");
        let mut root = Record::new();
        root.insert(
            "A",
            Value::Logical(LogicalValue {
                shape: vec![4],
                data: vec![1, 1, 1, 1],
            }),
        );
        let options = WriteOptions {
            compression: super::super::CompressionMode::Never,
            ..WriteOptions::default()
        };
        write_file(&path, &Value::Struct(root), options).unwrap();

        let (header, _, _) = super::super::read_header_only(&path, Default::default()).unwrap();
        assert_eq!(header.fields[0].compression, Comp::None);
        assert_eq!(header.fields[0].csize, header.fields[0].usize_);
    }
}
