//! Per-kind payload codec (C4). Each `encode_*` turns a [`Value`] leaf into
//! raw, uncompressed bytes plus the field metadata needed to describe it;
//! each `decode_*` is the exact inverse, given the metadata and those bytes.
//!
//! ## Binary format (per kind, `n = ∏ shape`)
//! ```text
//! numeric:           n*bpe real bytes [ , n*bpe imag bytes if complex ]
//! logical:           n bytes (0/1)
//! char:              2*n bytes (UTF-16 code units, LE)
//! string:            u32 count=n, then n * (u32 len, len bytes); len=0 => missing
//! datetime:          u32 count, u32 tz_len+tz, u32 loc_len+loc, u32 fmt_len+fmt,
//!                    n NaT-mask bytes, n*i64 unix-ms
//! duration:          u32 count, n NaN-mask bytes, n*i64 ms
//! calendarduration:  u32 count, n mask bytes, n*i32 months, n*i32 days, n*i64 time-ms
//! categorical:       u32 ncat, ncat * (u32 len, len bytes), n*u32 codes
//! struct (empty):    zero bytes, encoding="empty-scalar-struct"
//! opaque:            verbatim bytes
//! ```
//! Readers additionally accept datetime/duration/calendarduration without the
//! leading `u32 count` (inferring it from `shape`); writers always emit the
//! explicit count form.

use crate::error::{GbfError, Result};
use crate::header::{Compression, FieldMeta};
use crate::primitives::{
    checked_numel, read_i32_le, read_i64_le, read_u16_le, read_u32_le, write_i32_le, write_i64_le,
    write_u16_le, write_u32_le,
};
use crate::value::{
    CalendarDurationValue, CategoricalValue, CharValue, DateTimeValue, DurationValue,
    LogicalValue, NumericClass, NumericValue, OpaqueValue, StringValue, Value,
};

/// Result of encoding one leaf: raw uncompressed bytes plus the metadata
/// fields the header model needs (everything except offset/csize/crc32,
/// which the write pipeline fills in once offsets are known).
pub struct EncodedLeaf {
    pub bytes: Vec<u8>,
    pub kind: String,
    pub class: String,
    pub shape: Vec<u64>,
    pub complex: bool,
    pub encoding: String,
}

fn swap_le_buf(buf: &mut [u8], elem_size: usize) {
    if cfg!(target_endian = "big") && elem_size > 1 {
        for chunk in buf.chunks_mut(elem_size) {
            chunk.reverse();
        }
    }
}

pub fn encode(value: &Value) -> Result<EncodedLeaf> {
    match value {
        Value::Numeric(v) => encode_numeric(v),
        Value::Logical(v) => encode_logical(v),
        Value::String(v) => encode_string(v),
        Value::Char(v) => encode_char(v),
        Value::DateTime(v) => encode_datetime(v),
        Value::Duration(v) => encode_duration(v),
        Value::CalendarDuration(v) => encode_calendarduration(v),
        Value::Categorical(v) => encode_categorical(v),
        Value::Opaque(v) => encode_opaque(v),
        Value::Struct(r) if r.is_empty() => Ok(EncodedLeaf {
            bytes: Vec::new(),
            kind: "struct".to_string(),
            class: "struct".to_string(),
            shape: Vec::new(),
            complex: false,
            encoding: "empty-scalar-struct".to_string(),
        }),
        Value::Struct(_) => Err(GbfError::InvalidData(
            "non-empty struct is not a payload leaf; flatten before encoding".into(),
        )),
    }
}

fn encode_numeric(v: &NumericValue) -> Result<EncodedLeaf> {
    let n = checked_numel(&v.shape)?;
    let bpe = v.class.bpe();
    let expected = n
        .checked_mul(bpe)
        .ok_or_else(|| GbfError::InvalidData("numeric payload size overflows usize".into()))?;
    if v.real_le.len() != expected {
        return Err(GbfError::InvalidData(format!(
            "numeric real_le length {} does not match n*bpe {}",
            v.real_le.len(),
            expected
        )));
    }
    let mut bytes = v.real_le.clone();
    swap_le_buf(&mut bytes, bpe);
    let complex = if let Some(imag) = &v.imag_le {
        if imag.len() != expected {
            return Err(GbfError::InvalidData(format!(
                "numeric imag_le length {} does not match n*bpe {}",
                imag.len(),
                expected
            )));
        }
        let mut imag_bytes = imag.clone();
        swap_le_buf(&mut imag_bytes, bpe);
        bytes.extend_from_slice(&imag_bytes);
        true
    } else {
        false
    };
    Ok(EncodedLeaf {
        bytes,
        kind: "numeric".to_string(),
        class: v.class.name().to_string(),
        shape: v.shape.clone(),
        complex,
        encoding: String::new(),
    })
}

fn encode_logical(v: &LogicalValue) -> Result<EncodedLeaf> {
    let n = checked_numel(&v.shape)?;
    if v.data.len() != n {
        return Err(GbfError::InvalidData(format!(
            "logical data length {} does not match shape product {}",
            v.data.len(),
            n
        )));
    }
    Ok(EncodedLeaf {
        bytes: v.data.clone(),
        kind: "logical".to_string(),
        class: "logical".to_string(),
        shape: v.shape.clone(),
        complex: false,
        encoding: String::new(),
    })
}

fn encode_char(v: &CharValue) -> Result<EncodedLeaf> {
    let n = checked_numel(&v.shape)?;
    if v.code_units.len() != n {
        return Err(GbfError::InvalidData(format!(
            "char code_units length {} does not match shape product {}",
            v.code_units.len(),
            n
        )));
    }
    let mut bytes = Vec::with_capacity(n * 2);
    for &cu in &v.code_units {
        write_u16_le(&mut bytes, cu);
    }
    Ok(EncodedLeaf {
        bytes,
        kind: "char".to_string(),
        class: "char".to_string(),
        shape: v.shape.clone(),
        complex: false,
        encoding: "utf-16-codeunits".to_string(),
    })
}

fn encode_string(v: &StringValue) -> Result<EncodedLeaf> {
    let n = checked_numel(&v.shape)?;
    if v.data.len() != n {
        return Err(GbfError::InvalidData(format!(
            "string data length {} does not match shape product {}",
            v.data.len(),
            n
        )));
    }
    let mut bytes = Vec::new();
    write_u32_le(&mut bytes, n as u32);
    for item in &v.data {
        match item {
            None => write_u32_le(&mut bytes, 0),
            Some(s) => {
                write_u32_le(&mut bytes, s.len() as u32);
                bytes.extend_from_slice(s.as_bytes());
            }
        }
    }
    Ok(EncodedLeaf {
        bytes,
        kind: "string".to_string(),
        class: "string".to_string(),
        shape: v.shape.clone(),
        complex: false,
        encoding: "utf-8".to_string(),
    })
}

fn encode_datetime(v: &DateTimeValue) -> Result<EncodedLeaf> {
    let n = checked_numel(&v.shape)?;
    if v.nat_mask.len() != n || v.unix_ms.len() != n {
        return Err(GbfError::InvalidData(
            "datetime mask/value arrays do not match shape product".into(),
        ));
    }
    let mut bytes = Vec::new();
    write_u32_le(&mut bytes, n as u32);
    write_u32_le(&mut bytes, v.timezone.len() as u32);
    bytes.extend_from_slice(v.timezone.as_bytes());
    write_u32_le(&mut bytes, v.locale.len() as u32);
    bytes.extend_from_slice(v.locale.as_bytes());
    write_u32_le(&mut bytes, v.format.len() as u32);
    bytes.extend_from_slice(v.format.as_bytes());
    bytes.extend_from_slice(&v.nat_mask);
    for &ms in &v.unix_ms {
        write_i64_le(&mut bytes, ms);
    }
    Ok(EncodedLeaf {
        bytes,
        kind: "datetime".to_string(),
        class: "datetime".to_string(),
        shape: v.shape.clone(),
        complex: false,
        encoding: "unix-ms".to_string(),
    })
}

fn encode_duration(v: &DurationValue) -> Result<EncodedLeaf> {
    let n = checked_numel(&v.shape)?;
    if v.nan_mask.len() != n || v.ms.len() != n {
        return Err(GbfError::InvalidData(
            "duration mask/value arrays do not match shape product".into(),
        ));
    }
    let mut bytes = Vec::new();
    write_u32_le(&mut bytes, n as u32);
    bytes.extend_from_slice(&v.nan_mask);
    for &ms in &v.ms {
        write_i64_le(&mut bytes, ms);
    }
    Ok(EncodedLeaf {
        bytes,
        kind: "duration".to_string(),
        class: "duration".to_string(),
        shape: v.shape.clone(),
        complex: false,
        encoding: "ms".to_string(),
    })
}

fn encode_calendarduration(v: &CalendarDurationValue) -> Result<EncodedLeaf> {
    let n = checked_numel(&v.shape)?;
    if v.mask.len() != n || v.months.len() != n || v.days.len() != n || v.time_ms.len() != n {
        return Err(GbfError::InvalidData(
            "calendarduration parallel arrays do not match shape product".into(),
        ));
    }
    let mut bytes = Vec::new();
    write_u32_le(&mut bytes, n as u32);
    bytes.extend_from_slice(&v.mask);
    for &m in &v.months {
        write_i32_le(&mut bytes, m);
    }
    for &d in &v.days {
        write_i32_le(&mut bytes, d);
    }
    for &t in &v.time_ms {
        write_i64_le(&mut bytes, t);
    }
    Ok(EncodedLeaf {
        bytes,
        kind: "calendarduration".to_string(),
        class: "calendarduration".to_string(),
        shape: v.shape.clone(),
        complex: false,
        encoding: "months-days-ms".to_string(),
    })
}

fn encode_categorical(v: &CategoricalValue) -> Result<EncodedLeaf> {
    let n = checked_numel(&v.shape)?;
    if v.codes.len() != n {
        return Err(GbfError::InvalidData(format!(
            "categorical codes length {} does not match shape product {}",
            v.codes.len(),
            n
        )));
    }
    let mut bytes = Vec::new();
    write_u32_le(&mut bytes, v.categories.len() as u32);
    for cat in &v.categories {
        write_u32_le(&mut bytes, cat.len() as u32);
        bytes.extend_from_slice(cat.as_bytes());
    }
    for &code in &v.codes {
        write_u32_le(&mut bytes, code);
    }
    Ok(EncodedLeaf {
        bytes,
        kind: "categorical".to_string(),
        class: "categorical".to_string(),
        shape: v.shape.clone(),
        complex: false,
        encoding: String::new(),
    })
}

fn encode_opaque(v: &OpaqueValue) -> Result<EncodedLeaf> {
    Ok(EncodedLeaf {
        bytes: v.bytes.clone(),
        kind: v.kind.clone(),
        class: v.class.clone(),
        shape: v.shape.clone(),
        complex: v.complex,
        encoding: v.encoding.clone(),
    })
}

/// Decode `raw` (already decompressed) according to `field`'s metadata.
/// Any kind this decoder does not recognise degrades to `Opaque`, carrying
/// the raw bytes and the field's own metadata so it can still be
/// re-encoded verbatim.
pub fn decode(field: &FieldMeta, raw: &[u8]) -> Result<Value> {
    match field.kind.as_str() {
        "numeric" => decode_numeric(field, raw),
        "logical" => decode_logical(field, raw),
        "char" => decode_char(field, raw),
        "string" => decode_string(field, raw),
        "datetime" => decode_datetime(field, raw),
        "duration" => decode_duration(field, raw),
        "calendarduration" => decode_calendarduration(field, raw),
        "categorical" => decode_categorical(field, raw),
        "struct" => Ok(Value::Struct(crate::value::Record::new())),
        _ => Ok(Value::Opaque(OpaqueValue {
            kind: field.kind.clone(),
            class: field.class.clone(),
            shape: field.shape.clone(),
            complex: field.complex,
            encoding: field.encoding.clone(),
            bytes: raw.to_vec(),
        })),
    }
}

fn need(raw: &[u8], n: usize) -> Result<()> {
    if raw.len() < n {
        Err(GbfError::Truncated {
            expected: n,
            got: raw.len(),
        })
    } else {
        Ok(())
    }
}

fn decode_numeric(field: &FieldMeta, raw: &[u8]) -> Result<Value> {
    let class = NumericClass::parse(&field.class)
        .ok_or_else(|| GbfError::InvalidData(format!("unknown numeric class '{}'", field.class)))?;
    let n = checked_numel(&field.shape)?;
    let bpe = class.bpe();
    let chunk = n
        .checked_mul(bpe)
        .ok_or_else(|| GbfError::InvalidData("numeric payload size overflows usize".into()))?;
    let total = if field.complex { chunk * 2 } else { chunk };
    need(raw, total)?;
    let mut real_le = raw[..chunk].to_vec();
    swap_le_buf(&mut real_le, bpe);
    let imag_le = if field.complex {
        let mut imag = raw[chunk..chunk * 2].to_vec();
        swap_le_buf(&mut imag, bpe);
        Some(imag)
    } else {
        None
    };
    Ok(Value::Numeric(NumericValue {
        class,
        shape: field.shape.clone(),
        real_le,
        imag_le,
    }))
}

fn decode_logical(field: &FieldMeta, raw: &[u8]) -> Result<Value> {
    let n = checked_numel(&field.shape)?;
    need(raw, n)?;
    Ok(Value::Logical(LogicalValue {
        shape: field.shape.clone(),
        data: raw[..n].to_vec(),
    }))
}

fn decode_char(field: &FieldMeta, raw: &[u8]) -> Result<Value> {
    let n = checked_numel(&field.shape)?;
    need(raw, n * 2)?;
    let mut code_units = Vec::with_capacity(n);
    for i in 0..n {
        code_units.push(read_u16_le(raw, i * 2)?);
    }
    Ok(Value::Char(CharValue {
        shape: field.shape.clone(),
        code_units,
    }))
}

fn decode_string(field: &FieldMeta, raw: &[u8]) -> Result<Value> {
    need(raw, 4)?;
    let count = read_u32_le(raw, 0)? as usize;
    let mut pos = 4;
    let mut data = Vec::with_capacity(count);
    for _ in 0..count {
        need(raw, pos + 4)?;
        let len = read_u32_le(raw, pos)? as usize;
        pos += 4;
        if len == 0 {
            data.push(None);
            continue;
        }
        need(raw, pos + len)?;
        let s = std::str::from_utf8(&raw[pos..pos + len])
            .map_err(|_| GbfError::InvalidData("string payload is not valid UTF-8".into()))?
            .to_string();
        data.push(Some(s));
        pos += len;
    }
    Ok(Value::String(StringValue {
        shape: field.shape.clone(),
        data,
    }))
}

fn read_len_prefixed_string(raw: &[u8], pos: &mut usize) -> Result<String> {
    need(raw, *pos + 4)?;
    let len = read_u32_le(raw, *pos)? as usize;
    *pos += 4;
    need(raw, *pos + len)?;
    let s = std::str::from_utf8(&raw[*pos..*pos + len])
        .map_err(|_| GbfError::InvalidData("length-prefixed string is not valid UTF-8".into()))?
        .to_string();
    *pos += len;
    Ok(s)
}

/// Read the leading `u32 count`, accepting the minor reader-only variant
/// that omits it entirely (count inferred from `shape`). Writers always
/// emit the explicit count form; this fallback only matters for files
/// produced by another implementation.
fn read_leading_count(raw: &[u8], shape_n: usize) -> (usize, usize) {
    if raw.len() >= 4 {
        if let Ok(n) = read_u32_le(raw, 0) {
            if n as usize == shape_n {
                return (shape_n, 4);
            }
        }
    }
    (shape_n, 0)
}

fn decode_datetime(field: &FieldMeta, raw: &[u8]) -> Result<Value> {
    let shape_n = checked_numel(&field.shape)?;
    let (n, mut pos) = read_leading_count(raw, shape_n);
    let timezone = read_len_prefixed_string(raw, &mut pos)?;
    let locale = read_len_prefixed_string(raw, &mut pos)?;
    let format = read_len_prefixed_string(raw, &mut pos)?;
    need(raw, pos + n)?;
    let nat_mask = raw[pos..pos + n].to_vec();
    pos += n;
    need(raw, pos + n * 8)?;
    let mut unix_ms = Vec::with_capacity(n);
    for i in 0..n {
        unix_ms.push(read_i64_le(raw, pos + i * 8)?);
    }
    Ok(Value::DateTime(DateTimeValue {
        shape: field.shape.clone(),
        timezone,
        locale,
        format,
        nat_mask,
        unix_ms,
    }))
}

fn decode_duration(field: &FieldMeta, raw: &[u8]) -> Result<Value> {
    let shape_n = checked_numel(&field.shape)?;
    let (n, mut pos) = read_leading_count(raw, shape_n);
    need(raw, pos + n)?;
    let nan_mask = raw[pos..pos + n].to_vec();
    pos += n;
    need(raw, pos + n * 8)?;
    let mut ms = Vec::with_capacity(n);
    for i in 0..n {
        ms.push(read_i64_le(raw, pos + i * 8)?);
    }
    Ok(Value::Duration(DurationValue {
        shape: field.shape.clone(),
        nan_mask,
        ms,
    }))
}

fn decode_calendarduration(field: &FieldMeta, raw: &[u8]) -> Result<Value> {
    let shape_n = checked_numel(&field.shape)?;
    let (n, mut pos) = read_leading_count(raw, shape_n);
    need(raw, pos + n)?;
    let mask = raw[pos..pos + n].to_vec();
    pos += n;
    need(raw, pos + n * 4)?;
    let mut months = Vec::with_capacity(n);
    for i in 0..n {
        months.push(read_i32_le(raw, pos + i * 4)?);
    }
    pos += n * 4;
    need(raw, pos + n * 4)?;
    let mut days = Vec::with_capacity(n);
    for i in 0..n {
        days.push(read_i32_le(raw, pos + i * 4)?);
    }
    pos += n * 4;
    need(raw, pos + n * 8)?;
    let mut time_ms = Vec::with_capacity(n);
    for i in 0..n {
        time_ms.push(read_i64_le(raw, pos + i * 8)?);
    }
    Ok(Value::CalendarDuration(CalendarDurationValue {
        shape: field.shape.clone(),
        mask,
        months,
        days,
        time_ms,
    }))
}

fn decode_categorical(field: &FieldMeta, raw: &[u8]) -> Result<Value> {
    need(raw, 4)?;
    let ncat = read_u32_le(raw, 0)? as usize;
    let mut pos = 4;
    let mut categories = Vec::with_capacity(ncat);
    for _ in 0..ncat {
        categories.push(read_len_prefixed_string(raw, &mut pos)?);
    }
    let n = checked_numel(&field.shape)?;
    need(raw, pos + n * 4)?;
    let mut codes = Vec::with_capacity(n);
    for i in 0..n {
        codes.push(read_u32_le(raw, pos + i * 4)?);
    }
    Ok(Value::Categorical(CategoricalValue {
        shape: field.shape.clone(),
        categories,
        codes,
    }))
}

/// Compress or store raw bytes per `mode`, returning the chosen
/// [`Compression`] tag alongside the bytes actually written to the payload.
pub fn maybe_compress(
    raw: &[u8],
    mode: crate::io::CompressionMode,
    zlib_level: i32,
) -> Result<(Compression, Vec<u8>)> {
    use crate::io::CompressionMode as M;
    match mode {
        M::Never => Ok((Compression::None, raw.to_vec())),
        M::Always => {
            let compressed = crate::primitives::zlib_compress(raw, zlib_level)?;
            Ok((Compression::Zlib, compressed))
        }
        M::Auto => {
            if raw.is_empty() {
                return Ok((Compression::None, raw.to_vec()));
            }
            let compressed = crate::primitives::zlib_compress(raw, zlib_level)?;
            if compressed.len() < raw.len() {
                Ok((Compression::Zlib, compressed))
            } else {
                Ok((Compression::None, raw.to_vec()))
            }
        }
    }
}
