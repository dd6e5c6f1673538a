//! Little-endian pack/unpack, CRC-32, zlib framing, and checked arithmetic.
//!
//! Everything here is a pure function over byte slices; no state is kept
//! between calls. The rest of the engine builds on top of these instead of
//! reaching for `byteorder`-style traits, since the set of widths needed is
//! small and fixed.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{GbfError, Result};

// ── LE pack/unpack ─────────────────────────────────────────────────

#[inline]
pub fn write_u16_le(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

#[inline]
pub fn write_u32_le(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

#[inline]
pub fn write_u64_le(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

#[inline]
pub fn write_i32_le(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

#[inline]
pub fn write_i64_le(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Read a u16 LE at `offset`. Caller must have checked bounds.
#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> Result<u16> {
    let slice = data.get(offset..offset + 2).ok_or(GbfError::Truncated {
        expected: offset + 2,
        got: data.len(),
    })?;
    Ok(u16::from_le_bytes(slice.try_into().unwrap()))
}

#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    let slice = data.get(offset..offset + 4).ok_or(GbfError::Truncated {
        expected: offset + 4,
        got: data.len(),
    })?;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

#[inline]
pub fn read_u64_le(data: &[u8], offset: usize) -> Result<u64> {
    let slice = data.get(offset..offset + 8).ok_or(GbfError::Truncated {
        expected: offset + 8,
        got: data.len(),
    })?;
    Ok(u64::from_le_bytes(slice.try_into().unwrap()))
}

#[inline]
pub fn read_i32_le(data: &[u8], offset: usize) -> Result<i32> {
    let slice = data.get(offset..offset + 4).ok_or(GbfError::Truncated {
        expected: offset + 4,
        got: data.len(),
    })?;
    Ok(i32::from_le_bytes(slice.try_into().unwrap()))
}

#[inline]
pub fn read_i64_le(data: &[u8], offset: usize) -> Result<i64> {
    let slice = data.get(offset..offset + 8).ok_or(GbfError::Truncated {
        expected: offset + 8,
        got: data.len(),
    })?;
    Ok(i64::from_le_bytes(slice.try_into().unwrap()))
}

// ── CRC-32 (ISO/IEC 3309) ──────────────────────────────────────────

/// CRC-32 over an arbitrary buffer, using the same polynomial as zlib/PNG/zip.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

// ── zlib ────────────────────────────────────────────────────────────

/// Compress `data` at `level` (0-9). `level < 0` selects the zlib default (6).
pub fn zlib_compress(data: &[u8], level: i32) -> Result<Vec<u8>> {
    let level = if level < 0 { 6 } else { level.min(9) } as u32;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| GbfError::ZlibError(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| GbfError::ZlibError(e.to_string()))
}

/// Decompress `data`, failing if the result is not exactly `exact_usize` bytes.
pub fn zlib_decompress(data: &[u8], exact_usize: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(exact_usize);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| GbfError::ZlibError(e.to_string()))?;
    if out.len() != exact_usize {
        return Err(GbfError::ZlibError(format!(
            "decompressed size {} does not match declared usize {}",
            out.len(),
            exact_usize
        )));
    }
    Ok(out)
}

// ── Checked arithmetic ─────────────────────────────────────────────

/// Checked product of a shape's dimensions. Empty shape yields `0` per spec
/// (a scalar/empty leaf has no elements unless shape is non-empty).
pub fn checked_numel(shape: &[u64]) -> Result<usize> {
    if shape.is_empty() {
        return Ok(0);
    }
    let mut n: usize = 1;
    for &dim in shape {
        let dim: usize = dim
            .try_into()
            .map_err(|_| GbfError::InvalidData("shape dimension too large for platform".into()))?;
        n = n
            .checked_mul(dim)
            .ok_or_else(|| GbfError::InvalidData("shape product overflows usize".into()))?;
    }
    Ok(n)
}

pub fn checked_mul(a: usize, b: usize) -> Result<usize> {
    a.checked_mul(b)
        .ok_or_else(|| GbfError::InvalidData("multiplication overflow".into()))
}

pub fn checked_add(a: usize, b: usize) -> Result<usize> {
    a.checked_add(b)
        .ok_or_else(|| GbfError::InvalidData("addition overflow".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_le_roundtrip() {
        let mut buf = Vec::new();
        write_u32_le(&mut buf, 0xDEAD_BEEF);
        write_u64_le(&mut buf, 0x0102_0304_0506_0708);
        assert_eq!(read_u32_le(&buf, 0).unwrap(), 0xDEAD_BEEF);
        assert_eq!(read_u64_le(&buf, 4).unwrap(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn test_read_out_of_bounds() {
        let buf = vec![0u8; 2];
        assert!(read_u32_le(&buf, 0).is_err());
    }

    #[test]
    fn test_crc32_known_vector() {
        // CRC-32 of "123456789" is the standard check value 0xCBF43926.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_zlib_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = zlib_compress(&data, 6).unwrap();
        assert!(compressed.len() < data.len());
        let decompressed = zlib_decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_zlib_decompress_size_mismatch() {
        let data = b"hello world".repeat(10);
        let compressed = zlib_compress(&data, 6).unwrap();
        assert!(zlib_decompress(&compressed, data.len() - 1).is_err());
    }

    #[test]
    fn test_checked_numel() {
        assert_eq!(checked_numel(&[2, 3]).unwrap(), 6);
        assert_eq!(checked_numel(&[]).unwrap(), 0);
        assert!(checked_numel(&[u64::MAX, 2]).is_err());
    }
}
