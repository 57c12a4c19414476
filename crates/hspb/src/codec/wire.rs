// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounds-checked protobuf wire primitives.
//!
//! [`WireWriter`] appends to a growable buffer (writes are infallible);
//! [`WireReader`] walks a borrowed slice and reports truncation with the
//! exact offset and missing byte count. Only the four wire types the
//! payload schema uses are supported: varint (0), fixed64 (1),
//! length-delimited (2) and fixed32 (5). Group delimiters are rejected.

use crate::error::DecodeError;

/// Varint wire type.
pub const WIRE_VARINT: u32 = 0;
/// Eight-byte little-endian wire type.
pub const WIRE_FIXED64: u32 = 1;
/// Length-delimited wire type (strings, bytes, nested messages).
pub const WIRE_LEN: u32 = 2;
/// Four-byte little-endian wire type.
pub const WIRE_FIXED32: u32 = 5;

// =======================================================================
// Writer
// =======================================================================

/// Append-only protobuf writer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Base-128 varint, least-significant group first.
    pub fn write_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Field tag: `(field_number << 3) | wire_type`.
    pub fn write_tag(&mut self, field: u32, wire_type: u32) {
        self.write_varint(u64::from(field) << 3 | u64::from(wire_type));
    }

    pub fn write_uint_field(&mut self, field: u32, value: u64) {
        self.write_tag(field, WIRE_VARINT);
        self.write_varint(value);
    }

    pub fn write_bool_field(&mut self, field: u32, value: bool) {
        self.write_uint_field(field, u64::from(value));
    }

    pub fn write_fixed32_field(&mut self, field: u32, value: u32) {
        self.write_tag(field, WIRE_FIXED32);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_fixed64_field(&mut self, field: u32, value: u64) {
        self.write_tag(field, WIRE_FIXED64);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_float_field(&mut self, field: u32, value: f32) {
        self.write_fixed32_field(field, value.to_bits());
    }

    pub fn write_double_field(&mut self, field: u32, value: f64) {
        self.write_fixed64_field(field, value.to_bits());
    }

    pub fn write_bytes_field(&mut self, field: u32, bytes: &[u8]) {
        self.write_tag(field, WIRE_LEN);
        self.write_varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_string_field(&mut self, field: u32, value: &str) {
        self.write_bytes_field(field, value.as_bytes());
    }

    /// Nested message: the inner writer's bytes, length-prefixed.
    pub fn write_message_field(&mut self, field: u32, inner: &WireWriter) {
        self.write_bytes_field(field, inner.as_slice());
    }
}

// =======================================================================
// Reader
// =======================================================================

/// Bounds-checked protobuf reader over a borrowed slice.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.offset)
    }

    pub fn is_eof(&self) -> bool {
        self.offset >= self.buf.len()
    }

    /// Base-128 varint. At most ten bytes; an eleventh continuation byte
    /// is a schema violation, a missing byte is truncation.
    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            if self.offset >= self.buf.len() {
                return Err(DecodeError::truncated(self.offset, 1));
            }
            if shift >= 64 {
                return Err(DecodeError::schema("varint exceeds 10 bytes"));
            }
            let byte = self.buf[self.offset];
            self.offset += 1;
            result |= u64::from(byte & 0x7F) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
    }

    /// Field tag. Field number zero is reserved by protobuf.
    pub fn read_tag(&mut self) -> Result<(u32, u32), DecodeError> {
        let raw = self.read_varint()?;
        let field = (raw >> 3) as u32;
        let wire_type = (raw & 0x7) as u32;
        if field == 0 {
            return Err(DecodeError::schema("field number 0"));
        }
        Ok((field, wire_type))
    }

    pub fn read_fixed32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_exact(4)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(arr))
    }

    pub fn read_fixed64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.read_exact(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    }

    /// Length-prefixed slice (string, bytes or nested message body).
    pub fn read_len_prefixed(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| DecodeError::schema(format!("length {len} overflows usize")))?;
        self.read_exact(len)
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let bytes = self.read_len_prefixed()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| DecodeError::schema(format!("invalid UTF-8 in string field: {e}")))
    }

    /// Skip one field of the given wire type (unknown-field tolerance).
    pub fn skip(&mut self, wire_type: u32) -> Result<(), DecodeError> {
        match wire_type {
            WIRE_VARINT => self.read_varint().map(|_| ()),
            WIRE_FIXED64 => self.read_fixed64().map(|_| ()),
            WIRE_LEN => self.read_len_prefixed().map(|_| ()),
            WIRE_FIXED32 => self.read_fixed32().map(|_| ()),
            other => Err(DecodeError::schema(format!("unsupported wire type {other}"))),
        }
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        // len comes off the wire; compare against remaining() so a hostile
        // length prefix cannot overflow the bounds check.
        let remaining = self.remaining();
        if len > remaining {
            return Err(DecodeError::truncated(self.offset, len - remaining));
        }
        let slice = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_varint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut writer = WireWriter::new();
            writer.write_varint(value);
            let bytes = writer.into_bytes();
            let mut reader = WireReader::new(&bytes);
            assert_eq!(
                reader.read_varint().expect("varint should decode"),
                value,
                "varint roundtrip for {value}"
            );
            assert!(reader.is_eof(), "no trailing bytes for {value}");
        }
    }

    #[test]
    fn test_wire_varint_known_encodings() {
        let mut writer = WireWriter::new();
        writer.write_varint(300);
        assert_eq!(writer.as_slice(), &[0xAC, 0x02], "protobuf reference encoding of 300");

        let mut writer = WireWriter::new();
        writer.write_varint(1);
        assert_eq!(writer.as_slice(), &[0x01]);
    }

    #[test]
    fn test_wire_varint_truncated() {
        // Continuation bit set on the final byte: reader wants one more.
        let bytes = [0x80u8];
        let mut reader = WireReader::new(&bytes);
        match reader.read_varint() {
            Err(DecodeError::Truncated { offset, need }) => {
                assert_eq!(offset, 1);
                assert_eq!(need, 1);
            }
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn test_wire_varint_overlong_rejected() {
        // Eleven continuation bytes never terminate a u64 varint.
        let bytes = [0xFFu8; 11];
        let mut reader = WireReader::new(&bytes);
        assert!(
            matches!(reader.read_varint(), Err(DecodeError::SchemaViolation(_))),
            "overlong varint should be a schema violation"
        );
    }

    #[test]
    fn test_wire_tag_roundtrip() {
        let mut writer = WireWriter::new();
        writer.write_tag(2, WIRE_LEN);
        writer.write_tag(13, WIRE_FIXED64);
        let bytes = writer.into_bytes();
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_tag().expect("tag"), (2, WIRE_LEN));
        assert_eq!(reader.read_tag().expect("tag"), (13, WIRE_FIXED64));
    }

    #[test]
    fn test_wire_tag_field_zero_rejected() {
        let bytes = [0x00u8]; // field 0, wire type 0
        let mut reader = WireReader::new(&bytes);
        assert!(matches!(reader.read_tag(), Err(DecodeError::SchemaViolation(_))));
    }

    #[test]
    fn test_wire_fixed_fields_roundtrip() {
        let mut writer = WireWriter::new();
        writer.write_float_field(12, 1.5f32);
        writer.write_double_field(13, -0.25f64);
        let bytes = writer.into_bytes();

        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_tag().expect("tag"), (12, WIRE_FIXED32));
        assert_eq!(f32::from_bits(reader.read_fixed32().expect("fixed32")), 1.5);
        assert_eq!(reader.read_tag().expect("tag"), (13, WIRE_FIXED64));
        assert_eq!(f64::from_bits(reader.read_fixed64().expect("fixed64")), -0.25);
    }

    #[test]
    fn test_wire_len_prefixed_truncation_reports_need() {
        let mut writer = WireWriter::new();
        writer.write_bytes_field(5, &[1, 2, 3, 4, 5, 6]);
        let mut bytes = writer.into_bytes();
        bytes.truncate(bytes.len() - 2); // drop two payload bytes

        let mut reader = WireReader::new(&bytes);
        let (field, wire_type) = reader.read_tag().expect("tag survives");
        assert_eq!((field, wire_type), (5, WIRE_LEN));
        match reader.read_len_prefixed() {
            Err(DecodeError::Truncated { need, .. }) => {
                assert_eq!(need, 2, "reader should know exactly how many bytes are missing")
            }
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn test_wire_skip_all_wire_types() {
        let mut writer = WireWriter::new();
        writer.write_uint_field(1, 999);
        writer.write_fixed64_field(2, 7);
        writer.write_bytes_field(3, b"skip me");
        writer.write_fixed32_field(4, 42);
        writer.write_uint_field(5, 1); // the field we actually want
        let bytes = writer.into_bytes();

        let mut reader = WireReader::new(&bytes);
        loop {
            let (field, wire_type) = reader.read_tag().expect("tag");
            if field == 5 {
                assert_eq!(reader.read_varint().expect("varint"), 1);
                break;
            }
            reader.skip(wire_type).expect("skip should handle every wire type");
        }
        assert!(reader.is_eof());
    }

    #[test]
    fn test_wire_skip_rejects_group_wire_types() {
        let mut reader = WireReader::new(&[]);
        assert!(matches!(reader.skip(3), Err(DecodeError::SchemaViolation(_))));
        assert!(matches!(reader.skip(4), Err(DecodeError::SchemaViolation(_))));
    }

    #[test]
    fn test_wire_string_invalid_utf8() {
        let mut writer = WireWriter::new();
        writer.write_bytes_field(1, &[0xFF, 0xFE]);
        let bytes = writer.into_bytes();
        let mut reader = WireReader::new(&bytes);
        let _ = reader.read_tag().expect("tag");
        assert!(matches!(reader.read_string(), Err(DecodeError::SchemaViolation(_))));
    }

    #[test]
    fn test_wire_nested_message_field() {
        let mut inner = WireWriter::new();
        inner.write_uint_field(1, 77);

        let mut outer = WireWriter::new();
        outer.write_message_field(2, &inner);
        let bytes = outer.into_bytes();

        let mut reader = WireReader::new(&bytes);
        let (field, wire_type) = reader.read_tag().expect("tag");
        assert_eq!((field, wire_type), (2, WIRE_LEN));
        let body = reader.read_len_prefixed().expect("nested body");
        let mut nested = WireReader::new(body);
        assert_eq!(nested.read_tag().expect("inner tag"), (1, WIRE_VARINT));
        assert_eq!(nested.read_varint().expect("inner value"), 77);
    }
}
