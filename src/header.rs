//! Typed representation of the GBF header JSON, with parse/build functions
//! and the two-pass CRC finalisation helper used by the write pipeline.
//!
//! ## Binary format
//! ```text
//! +----------+------------------+----------------------+------------------+
//! | magic[8] | header_len: u32  | header json (UTF-8)  | payload chunks.. |
//! +----------+------------------+----------------------+------------------+
//! ```
//! `payload_start == 8 + 4 + header_len`. The header JSON's `header_crc32_hex`
//! field is always an 8-character string (placeholder `"00000000"` during
//! sizing, the real CRC afterwards), so patching it never changes the
//! header's length.

use crate::error::{GbfError, Result};
use crate::json::{self, JsonNumber, JsonValue};
use crate::primitives;

pub const MAGIC_CURRENT: &[u8; 8] = b"GREDBIN\0";
pub const MAGIC_LEGACY: &[u8; 7] = b"GRDCBIN";
pub const MAGIC_LEN: usize = 8;
pub const HEADER_LEN_FIELD_LEN: usize = 4;
pub const MAX_HEADER_LEN: u64 = 64 * 1024 * 1024;
const CRC_PLACEHOLDER: &str = "00000000";

/// One leaf's on-disk presence, as recorded in `fields[]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMeta {
    pub name: String,
    pub kind: String,
    pub class: String,
    pub shape: Vec<u64>,
    pub complex: bool,
    pub encoding: String,
    pub compression: Compression,
    pub offset: u64,
    pub csize: u64,
    pub usize_: u64,
    pub crc32: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zlib,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Zlib => "zlib",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Compression::None),
            "zlib" => Ok(Compression::Zlib),
            other => Err(GbfError::InvalidData(format!(
                "unknown compression '{}'",
                other
            ))),
        }
    }
}

/// The fully parsed header.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub format: String,
    pub magic: String,
    pub version: u32,
    pub endianness: String,
    pub order: String,
    pub root: String,
    pub fields: Vec<FieldMeta>,
    pub payload_start: u64,
    pub file_size: u64,
    pub header_crc32_hex: String,
}

impl Header {
    pub fn find(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Parse the header JSON object into the typed model. Optional keys fall
/// back to tolerant defaults; `fields` entries missing a key error instead,
/// since a field with no name/kind/etc. cannot be acted on.
pub fn parse(raw_json: &[u8]) -> Result<Header> {
    let root = json::parse(raw_json)?;
    if root.as_object().is_none() {
        return Err(GbfError::HeaderJsonParse("header root is not an object".into()));
    }

    let format = root
        .get("format")
        .and_then(JsonValue::as_str)
        .unwrap_or("GBF")
        .to_string();
    let magic = root
        .get("magic")
        .and_then(JsonValue::as_str)
        .unwrap_or("GREDBIN")
        .to_string();
    let version = root
        .get("version")
        .and_then(JsonValue::as_number)
        .and_then(|n| n.as_u64())
        .unwrap_or(1) as u32;
    let endianness = root
        .get("endianness")
        .and_then(JsonValue::as_str)
        .unwrap_or("little")
        .to_string();
    let order = root
        .get("order")
        .and_then(JsonValue::as_str)
        .unwrap_or("column-major")
        .to_string();
    let root_kind = root
        .get("root")
        .and_then(JsonValue::as_str)
        .unwrap_or("struct")
        .to_string();

    let fields_json = root
        .get("fields")
        .and_then(JsonValue::as_array)
        .unwrap_or(&[]);
    let mut fields = Vec::with_capacity(fields_json.len());
    for entry in fields_json {
        fields.push(parse_field(entry)?);
    }

    let payload_start = root
        .get("payload_start")
        .and_then(JsonValue::as_number)
        .and_then(|n| n.as_u64())
        .unwrap_or(0);
    let file_size = root
        .get("file_size")
        .and_then(JsonValue::as_number)
        .and_then(|n| n.as_u64())
        .unwrap_or(0);
    let header_crc32_hex = root
        .get("header_crc32_hex")
        .and_then(JsonValue::as_str)
        .unwrap_or(CRC_PLACEHOLDER)
        .to_string();

    Ok(Header {
        format,
        magic,
        version,
        endianness,
        order,
        root: root_kind,
        fields,
        payload_start,
        file_size,
        header_crc32_hex,
    })
}

fn parse_field(entry: &JsonValue) -> Result<FieldMeta> {
    let name = entry
        .get("name")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| GbfError::HeaderJsonParse("field missing 'name'".into()))?
        .to_string();
    let kind = entry
        .get("kind")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| GbfError::HeaderJsonParse(format!("field '{}' missing 'kind'", name)))?
        .to_string();
    let class = entry
        .get("class")
        .and_then(JsonValue::as_str)
        .unwrap_or(&kind)
        .to_string();
    let shape = entry
        .get("shape")
        .and_then(JsonValue::as_array)
        .unwrap_or(&[])
        .iter()
        .map(|v| {
            v.as_number()
                .and_then(|n| n.as_u64())
                .ok_or_else(|| GbfError::HeaderJsonParse(format!("field '{}' shape entry not a non-negative integer", name)))
        })
        .collect::<Result<Vec<u64>>>()?;
    let complex = entry.get("complex").and_then(JsonValue::as_bool).unwrap_or(false);
    let encoding = entry
        .get("encoding")
        .and_then(JsonValue::as_str)
        .unwrap_or("")
        .to_string();
    let compression = Compression::parse(
        entry
            .get("compression")
            .and_then(JsonValue::as_str)
            .unwrap_or("none"),
    )?;
    let offset = number_field(entry, "offset", &name)?;
    let csize = number_field(entry, "csize", &name)?;
    let usize_ = number_field(entry, "usize", &name)?;
    let crc32 = entry
        .get("crc32")
        .and_then(JsonValue::as_number)
        .and_then(|n| n.as_u64())
        .unwrap_or(0) as u32;

    Ok(FieldMeta {
        name,
        kind,
        class,
        shape,
        complex,
        encoding,
        compression,
        offset,
        csize,
        usize_,
        crc32,
    })
}

fn number_field(entry: &JsonValue, key: &str, field_name: &str) -> Result<u64> {
    entry
        .get(key)
        .and_then(JsonValue::as_number)
        .and_then(|n: JsonNumber| n.as_u64())
        .ok_or_else(|| GbfError::HeaderJsonParse(format!("field '{}' missing or invalid '{}'", field_name, key)))
}

/// Serialise `header` in canonical key order. `crc_zeroed` selects whether
/// `header_crc32_hex` is written as the 8-character placeholder (used during
/// fixed-point sizing) or the header's real value.
pub fn build(header: &Header, crc_zeroed: bool) -> Vec<u8> {
    let crc_value = if crc_zeroed {
        CRC_PLACEHOLDER.to_string()
    } else {
        header.header_crc32_hex.clone()
    };

    let fields: Vec<JsonValue> = header.fields.iter().map(field_to_json).collect();

    let obj = JsonValue::Object(vec![
        ("format".to_string(), JsonValue::from(header.format.as_str())),
        ("magic".to_string(), JsonValue::from(header.magic.as_str())),
        ("version".to_string(), JsonValue::from(header.version)),
        ("endianness".to_string(), JsonValue::from(header.endianness.as_str())),
        ("order".to_string(), JsonValue::from(header.order.as_str())),
        ("root".to_string(), JsonValue::from(header.root.as_str())),
        ("fields".to_string(), JsonValue::Array(fields)),
        ("payload_start".to_string(), JsonValue::from(header.payload_start)),
        ("file_size".to_string(), JsonValue::from(header.file_size)),
        ("header_crc32_hex".to_string(), JsonValue::from(crc_value)),
    ]);

    json::to_string(&obj).into_bytes()
}

fn field_to_json(f: &FieldMeta) -> JsonValue {
    JsonValue::Object(vec![
        ("name".to_string(), JsonValue::from(f.name.as_str())),
        ("kind".to_string(), JsonValue::from(f.kind.as_str())),
        ("class".to_string(), JsonValue::from(f.class.as_str())),
        (
            "shape".to_string(),
            JsonValue::Array(f.shape.iter().map(|&d| JsonValue::from(d)).collect()),
        ),
        ("complex".to_string(), JsonValue::from(f.complex)),
        ("encoding".to_string(), JsonValue::from(f.encoding.as_str())),
        ("compression".to_string(), JsonValue::from(f.compression.as_str())),
        ("offset".to_string(), JsonValue::from(f.offset)),
        ("csize".to_string(), JsonValue::from(f.csize)),
        ("usize".to_string(), JsonValue::from(f.usize_)),
        ("crc32".to_string(), JsonValue::from(f.crc32 as u64)),
    ])
}

/// Locate `header_crc32_hex`'s 8 hex characters in an already-serialised
/// header buffer and overwrite them in place, without changing length.
///
/// Works by substring search for the field's JSON fragment rather than
/// re-parsing, matching the on-disk-CRC-patch step described for the write
/// pipeline's fixed-point finalisation.
pub fn patch_header_crc(buf: &mut [u8], crc: u32) -> Result<()> {
    let needle = b"\"header_crc32_hex\":\"";
    let pos = find_subslice(buf, needle)
        .ok_or_else(|| GbfError::InvalidData("header_crc32_hex field not found in header buffer".into()))?;
    let start = pos + needle.len();
    let end = start + 8;
    if end > buf.len() || buf[end] != b'"' {
        return Err(GbfError::InvalidData(
            "header_crc32_hex value is not an 8-character string".into(),
        ));
    }
    let hex = format!("{:08X}", crc);
    buf[start..end].copy_from_slice(hex.as_bytes());
    Ok(())
}

/// Extract `header_crc32_hex`'s current 8 hex characters from a header
/// buffer, without re-parsing the whole document.
pub fn extract_header_crc(buf: &[u8]) -> Result<String> {
    let needle = b"\"header_crc32_hex\":\"";
    let pos = find_subslice(buf, needle)
        .ok_or_else(|| GbfError::InvalidData("header_crc32_hex field not found in header buffer".into()))?;
    let start = pos + needle.len();
    let end = start + 8;
    let slice = buf
        .get(start..end)
        .ok_or_else(|| GbfError::InvalidData("header_crc32_hex value truncated".into()))?;
    Ok(String::from_utf8_lossy(slice).to_string())
}

/// Zero out `header_crc32_hex`'s 8 hex characters in a copy of `buf`, for
/// recomputing the CRC the same way the writer computed it.
pub fn zero_header_crc_copy(buf: &[u8]) -> Result<Vec<u8>> {
    let mut copy = buf.to_vec();
    patch_header_crc(&mut copy, 0)?;
    Ok(copy)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Validate the magic bytes, accepting the legacy `GRDCBIN` alias (its first
/// 7 bytes, with no terminating NUL required in the 8th byte).
pub fn check_magic(bytes: &[u8; 8]) -> Result<()> {
    if bytes == MAGIC_CURRENT {
        return Ok(());
    }
    if &bytes[..MAGIC_LEGACY.len()] == MAGIC_LEGACY {
        return Ok(());
    }
    Err(GbfError::BadMagic(*bytes))
}

/// CRC-32 over `header_json_with_placeholder`, matching the value the
/// writer embeds in `header_crc32_hex`.
pub fn compute_header_crc(header_json_with_placeholder: &[u8]) -> u32 {
    primitives::crc32(header_json_with_placeholder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_field() -> FieldMeta {
        FieldMeta {
            name: "A".to_string(),
            kind: "numeric".to_string(),
            class: "double".to_string(),
            shape: vec![2, 3],
            complex: false,
            encoding: String::new(),
            compression: Compression::None,
            offset: 0,
            csize: 48,
            usize_: 48,
            crc32: 0xDEAD_BEEF,
        }
    }

    fn sample_header() -> Header {
        Header {
            format: "GBF".to_string(),
            magic: "GREDBIN".to_string(),
            version: 1,
            endianness: "little".to_string(),
            order: "column-major".to_string(),
            root: "struct".to_string(),
            fields: vec![sample_field()],
            payload_start: 100,
            file_size: 148,
            header_crc32_hex: "00000000".to_string(),
        }
    }

    #[test]
    fn test_build_then_parse_roundtrip() {
        let header = sample_header();
        let bytes = build(&header, false);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.fields.len(), 1);
        assert_eq!(parsed.fields[0].name, "A");
        assert_eq!(parsed.fields[0].shape, vec![2, 3]);
        assert_eq!(parsed.payload_start, 100);
        assert_eq!(parsed.file_size, 148);
    }

    #[test]
    fn test_canonical_key_order() {
        let header = sample_header();
        let bytes = build(&header, true);
        let s = String::from_utf8(bytes).unwrap();
        assert!(s.starts_with(r#"{"format":"GBF","magic":"GREDBIN","version":1"#));
        assert!(s.contains(r#""header_crc32_hex":"00000000""#));
    }

    #[test]
    fn test_patch_header_crc_preserves_length() {
        let header = sample_header();
        let mut bytes = build(&header, true);
        let before_len = bytes.len();
        patch_header_crc(&mut bytes, 0xCAFEBABE).unwrap();
        assert_eq!(bytes.len(), before_len);
        assert_eq!(extract_header_crc(&bytes).unwrap(), "CAFEBABE");
    }

    #[test]
    fn test_check_magic_accepts_legacy() {
        check_magic(MAGIC_CURRENT).unwrap();
        let mut legacy = [0u8; 8];
        legacy[..7].copy_from_slice(b"GRDCBIN");
        check_magic(&legacy).unwrap();
        check_magic(b"BADMAGIC").unwrap_err();
    }

    #[test]
    fn test_missing_field_key_errors() {
        let bad = br#"{"fields":[{"name":"A"}]}"#;
        assert!(parse(bad).is_err());
    }

    #[test]
    fn test_compression_parse() {
        assert_eq!(Compression::parse("none").unwrap(), Compression::None);
        assert_eq!(Compression::parse("zlib").unwrap(), Compression::Zlib);
        assert!(Compression::parse("gzip").is_err());
    }
}
