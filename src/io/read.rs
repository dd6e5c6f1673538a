use std::fs::File;
use std::io::{Read as _, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, instrument, warn};

use crate::error::{GbfError, Result};
use crate::header::{self, Header, MAGIC_LEN};
use crate::payload;
use crate::primitives;
use crate::value::{Record, Value};

use super::ReadOptions;

const FRAMING_OVERHEAD: u64 = 8 + 4;

/// Open `path` and parse framing + header, without touching any payload
/// bytes. Returns the typed header, the raw `header_len`, and the raw header
/// JSON bytes (useful for `gbin header --raw`).
#[instrument(skip(options))]
pub fn read_header_only(path: &Path, options: ReadOptions) -> Result<(Header, u32, Vec<u8>)> {
    let mut file = File::open(path).map_err(GbfError::Io)?;
    let file_len = file.metadata().map_err(GbfError::Io)?.len();

    let mut magic = [0u8; MAGIC_LEN];
    file.read_exact(&mut magic).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            GbfError::Truncated {
                expected: MAGIC_LEN,
                got: 0,
            }
        } else {
            GbfError::Io(e)
        }
    })?;
    header::check_magic(&magic)?;

    let mut len_bytes = [0u8; 4];
    file.read_exact(&mut len_bytes).map_err(GbfError::Io)?;
    let header_len = u32::from_le_bytes(len_bytes);
    if header_len as u64 > header::MAX_HEADER_LEN {
        return Err(GbfError::InvalidData(format!(
            "header length {} exceeds the 64 MiB cap",
            header_len
        )));
    }

    let mut header_bytes = vec![0u8; header_len as usize];
    file.read_exact(&mut header_bytes).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            GbfError::Truncated {
                expected: header_len as usize,
                got: 0,
            }
        } else {
            GbfError::Io(e)
        }
    })?;

    if options.validate {
        let expected_hex = header::extract_header_crc(&header_bytes)?;
        let zeroed = header::zero_header_crc_copy(&header_bytes)?;
        let computed = primitives::crc32(&zeroed);
        if !expected_hex.eq_ignore_ascii_case(&format!("{:08X}", computed)) {
            return Err(GbfError::HeaderCrcMismatch {
                expected: u32::from_str_radix(&expected_hex, 16).unwrap_or(0),
                computed,
            });
        }
    }

    let mut header = header::parse(&header_bytes)?;

    let computed_payload_start = FRAMING_OVERHEAD + header_len as u64;
    if header.payload_start == 0 {
        header.payload_start = computed_payload_start;
    } else if options.validate && header.payload_start != computed_payload_start {
        return Err(GbfError::InvalidData(format!(
            "declared payload_start {} does not match computed {}",
            header.payload_start, computed_payload_start
        )));
    }

    if header.file_size == 0 {
        header.file_size = file_len;
    } else if options.validate && header.file_size != file_len {
        return Err(GbfError::InvalidData(format!(
            "declared file_size {} does not match on-disk size {}",
            header.file_size, file_len
        )));
    }

    debug!(fields = header.fields.len(), header_len, "parsed header");
    Ok((header, header_len, header_bytes))
}

fn read_field_raw(file: &mut File, header: &Header, field: &crate::header::FieldMeta) -> Result<Vec<u8>> {
    let abs = header.payload_start + field.offset;
    file.seek(SeekFrom::Start(abs)).map_err(GbfError::Io)?;
    let mut chunk = vec![0u8; field.csize as usize];
    file.read_exact(&mut chunk).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            GbfError::Truncated {
                expected: field.csize as usize,
                got: 0,
            }
        } else {
            GbfError::Io(e)
        }
    })?;

    let raw = match field.compression {
        crate::header::Compression::Zlib => {
            primitives::zlib_decompress(&chunk, field.usize_ as usize)?
        }
        crate::header::Compression::None => {
            if chunk.len() < field.usize_ as usize {
                return Err(GbfError::Truncated {
                    expected: field.usize_ as usize,
                    got: chunk.len(),
                });
            }
            chunk[..field.usize_ as usize].to_vec()
        }
    };

    Ok(raw)
}

fn check_field_crc(options: ReadOptions, field: &crate::header::FieldMeta, raw: &[u8]) -> Result<()> {
    if options.validate && field.usize_ > 0 {
        let computed = primitives::crc32(raw);
        if computed != field.crc32 {
            warn!(field = %field.name, expected = field.crc32, computed, "field CRC mismatch");
            return Err(GbfError::FieldCrcMismatch {
                name: field.name.clone(),
                expected: field.crc32,
                computed,
            });
        }
    }
    Ok(())
}

/// Insert `value` at `dot_path` in `root`, auto-creating intermediate
/// records. A collision between an existing non-record and a path that
/// needs to descend through it is an `InvalidData` error.
fn insert_at_path(root: &mut Record, dot_path: &str, value: Value) -> Result<()> {
    let segments: Vec<&str> = dot_path.split('.').collect();
    insert_segments(root, &segments, value)
}

fn insert_segments(record: &mut Record, segments: &[&str], value: Value) -> Result<()> {
    let (head, rest) = segments
        .split_first()
        .ok_or_else(|| GbfError::InvalidData("empty dot-path".into()))?;
    if rest.is_empty() {
        record.insert(*head, value);
        return Ok(());
    }
    match record.get_mut(*head) {
        Some(Value::Struct(child)) => insert_segments(child, rest, value),
        Some(_) => Err(GbfError::InvalidData(format!(
            "path collision: '{}' is already a non-record leaf",
            head
        ))),
        None => {
            let mut child = Record::new();
            insert_segments(&mut child, rest, value)?;
            record.insert(*head, Value::Struct(child));
            Ok(())
        }
    }
}

#[instrument(skip(options))]
pub fn read_file(path: &Path, options: ReadOptions) -> Result<Value> {
    let (header, _header_len, _header_bytes) = read_header_only(path, options)?;
    let mut file = File::open(path).map_err(GbfError::Io)?;

    let mut root = Record::new();
    for field in &header.fields {
        let raw = read_field_raw(&mut file, &header, field)?;
        check_field_crc(options, field, &raw)?;
        let value = payload::decode(field, &raw)?;
        insert_at_path(&mut root, &field.name, value)?;
    }
    Ok(Value::Struct(root))
}

/// Partial read of one variable. Exact-leaf/descendants collision resolves
/// by storing the exact-leaf value under the canonical key `"<value>"`
/// inside the resulting sub-record.
#[instrument(skip(options))]
pub fn read_var(path: &Path, var: &str, options: ReadOptions) -> Result<Value> {
    if var.is_empty() || var == "<root>" {
        return read_file(path, options);
    }

    let (header, _header_len, _header_bytes) = read_header_only(path, options)?;
    let mut file = File::open(path).map_err(GbfError::Io)?;

    let exact = header.fields.iter().find(|f| f.name == var);
    let prefix = format!("{}.", var);
    let children: Vec<&crate::header::FieldMeta> = header
        .fields
        .iter()
        .filter(|f| f.name.starts_with(&prefix))
        .collect();

    if let Some(field) = exact {
        if children.is_empty() {
            let raw = read_field_raw(&mut file, &header, field)?;
            check_field_crc(options, field, &raw)?;
            return payload::decode(field, &raw);
        }
        let mut root = Record::new();
        let raw = read_field_raw(&mut file, &header, field)?;
        check_field_crc(options, field, &raw)?;
        let value = payload::decode(field, &raw)?;
        root.insert("<value>", value);
        for child in &children {
            let raw = read_field_raw(&mut file, &header, child)?;
            check_field_crc(options, child, &raw)?;
            let value = payload::decode(child, &raw)?;
            let remainder = &child.name[prefix.len()..];
            insert_at_path(&mut root, remainder, value)?;
        }
        return Ok(Value::Struct(root));
    }

    if children.is_empty() {
        return Err(GbfError::NotFound(var.to_string()));
    }

    let mut root = Record::new();
    for child in &children {
        let raw = read_field_raw(&mut file, &header, child)?;
        check_field_crc(options, child, &raw)?;
        let value = payload::decode(child, &raw)?;
        let remainder = &child.name[prefix.len()..];
        insert_at_path(&mut root, remainder, value)?;
    }
    Ok(Value::Struct(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::write_file;
    use crate::io::WriteOptions;
    use crate::value::{LogicalValue, NumericClass, NumericValue};
    use tempfile::tempdir;

    fn sample_root() -> Value {
        let mut nested = Record::new();
        nested.insert(
            "b",
            Value::Logical(LogicalValue {
                shape: vec![2],
                data: vec![0, 1],
            }),
        );
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
        root.insert("nested", Value::Struct(nested));
        root.insert("empty", Value::Struct(Record::new()));
        Value::Struct(root)
    }

    #[test]
    fn test_roundtrip_read_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.gbf");
        let root = sample_root();
        write_file(&path, &root, WriteOptions::default()).unwrap();
        let read_back = read_file(&path, ReadOptions { validate: true }).unwrap();
        assert_eq!(read_back, root);
    }

    #[test]
    fn test_read_var_single_field() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.gbf");
        write_file(&path, &sample_root(), WriteOptions::default()).unwrap();
        let v = read_var(&path, "A", ReadOptions::default()).unwrap();
        match v {
            Value::Numeric(n) => assert_eq!(n.shape, vec![2, 3]),
            _ => panic!("expected numeric"),
        }
    }

    #[test]
    fn test_read_var_subtree() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.gbf");
        write_file(&path, &sample_root(), WriteOptions::default()).unwrap();
        let v = read_var(&path, "nested", ReadOptions::default()).unwrap();
        let record = v.as_struct().unwrap();
        assert!(record.get("b").is_some());
    }

    #[test]
    fn test_read_var_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.gbf");
        write_file(&path, &sample_root(), WriteOptions::default()).unwrap();
        assert!(matches!(
            read_var(&path, "nope", ReadOptions::default()),
            Err(GbfError::NotFound(_))
        ));
    }

    #[test]
    fn test_field_crc_corruption_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.gbf");
        write_file(&path, &sample_root(), WriteOptions::default()).unwrap();

        let (header, _, _) = read_header_only(&path, ReadOptions::default()).unwrap();
        let field = header.find("A").unwrap();
        let abs = header.payload_start + field.offset;

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[abs as usize] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let err = read_file(&path, ReadOptions { validate: true }).unwrap_err();
        assert!(matches!(err, GbfError::FieldCrcMismatch { .. }));
    }

    #[test]
    fn test_header_crc_corruption_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.gbf");
        write_file(&path, &sample_root(), WriteOptions::default()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        // Flip a byte inside the header JSON region, away from the CRC field.
        let flip_at = 8 + 4 + 2;
        bytes[flip_at] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let err = read_file(&path, ReadOptions { validate: true }).unwrap_err();
        assert!(matches!(
            err,
            GbfError::HeaderCrcMismatch { .. } | GbfError::HeaderJsonParse(_)
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.gbf");
        std::fs::write(&path, b"NOTAGBF\0\0\0\0\0").unwrap();
        assert!(matches!(
            read_header_only(&path, ReadOptions::default()),
            Err(GbfError::BadMagic(_))
        ));
    }

    #[test]
    fn test_legacy_magic_accepted_on_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.gbf");
        write_file(&path, &sample_root(), WriteOptions::default()).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[..7].copy_from_slice(b"GRDCBIN");
        std::fs::write(&path, &bytes).unwrap();
        read_header_only(&path, ReadOptions::default()).unwrap();
    }

    #[test]
    fn test_large_matrix_roundtrip_stable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.gbf");
        let n: usize = 1024 * 1024;
        let mut root = Record::new();
        root.insert(
            "M",
            Value::Numeric(NumericValue {
                class: NumericClass::Double,
                shape: vec![1024, 1024],
                real_le: vec![0u8; n * 8],
                imag_le: None,
            }),
        );
        write_file(&path, &Value::Struct(root), WriteOptions::default()).unwrap();

        let (header, _, _) = read_header_only(&path, ReadOptions::default()).unwrap();
        assert_eq!(header.fields[0].compression, crate::header::Compression::None);

        let mut first = None;
        for _ in 0..3 {
            let v = read_file(&path, ReadOptions::default()).unwrap();
            let record = v.as_struct().unwrap();
            let m = record.get("M").unwrap();
            if let Value::Numeric(num) = m {
                match &first {
                    None => first = Some(num.real_le.clone()),
                    Some(prev) => assert_eq!(prev, &num.real_le),
                }
            } else {
                panic!("expected numeric");
            }
        }
    }
}
