// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload codecs.
//!
//! Two encoding schemes carry the same logical model:
//!
//! - [`EncodingScheme::Binary`]: hand-rolled protobuf wire format,
//!   interoperable with other protocol stacks ([`protobuf`])
//! - [`EncodingScheme::Json`]: structured text for taps and tooling
//!   ([`json`])
//!
//! STATE documents are JSON regardless of scheme; their helpers are
//! re-exported here. Encoding is infallible, decoding returns
//! [`DecodeError`](crate::error::DecodeError) with byte offsets on
//! truncation.

pub mod json;
pub mod protobuf;
pub mod wire;

pub use json::{decode_state, encode_state};

use crate::error::DecodeError;
use crate::model::{DataType, MetricValue, Payload};

/// Payload encoding scheme, fixed per node/host for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingScheme {
    /// Protobuf wire format. The interoperable default.
    Binary,
    /// JSON. Human-readable, no NaN/Inf support.
    Json,
}

impl EncodingScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodingScheme::Binary => "binary",
            EncodingScheme::Json => "json",
        }
    }
}

impl std::fmt::Display for EncodingScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a payload under the given scheme.
pub fn encode(payload: &Payload, scheme: EncodingScheme) -> Vec<u8> {
    match scheme {
        EncodingScheme::Binary => protobuf::encode_payload(payload),
        EncodingScheme::Json => json::encode_payload(payload),
    }
}

/// Decode a payload under the given scheme.
pub fn decode(bytes: &[u8], scheme: EncodingScheme) -> Result<Payload, DecodeError> {
    match scheme {
        EncodingScheme::Binary => protobuf::decode_payload(bytes),
        EncodingScheme::Json => json::decode_payload(bytes),
    }
}

/// Re-type a provisionally decoded value against a declared datatype.
///
/// Alias-only DATA metrics arrive without a datatype; the decoders keep
/// whatever the wire shape was (raw varint bits as `UInt64`, JSON
/// negatives as `Int64`, blobs as `Bytes`). Once the session has looked
/// the alias up in the birth scope, this pins the value to the declared
/// type, with the same width checks the typed decode paths apply.
pub(crate) fn retype_value(
    value: MetricValue,
    datatype: DataType,
    what: &str,
) -> Result<MetricValue, DecodeError> {
    if value.matches(datatype) {
        return Ok(value);
    }

    fn unsigned_fit(raw: u64, max: u64, datatype: DataType, what: &str) -> Result<u64, DecodeError> {
        if raw > max {
            return Err(DecodeError::schema(format!(
                "{what}: value {raw} exceeds {datatype} width"
            )));
        }
        Ok(raw)
    }
    fn signed_fit(v: i64, min: i64, max: i64, datatype: DataType, what: &str) -> Result<i64, DecodeError> {
        if v < min || v > max {
            return Err(DecodeError::schema(format!(
                "{what}: value {v} exceeds {datatype} width"
            )));
        }
        Ok(v)
    }

    match (value, datatype) {
        // Raw varint bits (binary provisional): reinterpret at the
        // declared width, two's complement for signed targets.
        (MetricValue::UInt64(raw), DataType::Int8) => {
            unsigned_fit(raw, 0xFF, datatype, what).map(|v| MetricValue::Int8(v as u8 as i8))
        }
        (MetricValue::UInt64(raw), DataType::Int16) => {
            unsigned_fit(raw, 0xFFFF, datatype, what).map(|v| MetricValue::Int16(v as u16 as i16))
        }
        (MetricValue::UInt64(raw), DataType::Int32) => unsigned_fit(raw, 0xFFFF_FFFF, datatype, what)
            .map(|v| MetricValue::Int32(v as u32 as i32)),
        (MetricValue::UInt64(raw), DataType::Int64) => Ok(MetricValue::Int64(raw as i64)),
        (MetricValue::UInt64(raw), DataType::UInt8) => {
            unsigned_fit(raw, u64::from(u8::MAX), datatype, what).map(|v| MetricValue::UInt8(v as u8))
        }
        (MetricValue::UInt64(raw), DataType::UInt16) => {
            unsigned_fit(raw, u64::from(u16::MAX), datatype, what)
                .map(|v| MetricValue::UInt16(v as u16))
        }
        (MetricValue::UInt64(raw), DataType::UInt32) => {
            unsigned_fit(raw, u64::from(u32::MAX), datatype, what)
                .map(|v| MetricValue::UInt32(v as u32))
        }
        (MetricValue::UInt64(raw), DataType::DateTime) => Ok(MetricValue::DateTime(raw)),
        (MetricValue::UInt64(raw), DataType::Float) => Ok(MetricValue::Float(raw as f32)),
        (MetricValue::UInt64(raw), DataType::Double) => Ok(MetricValue::Double(raw as f64)),

        // Arithmetic negatives (JSON provisional).
        (MetricValue::Int64(v), DataType::Int8) => {
            signed_fit(v, i64::from(i8::MIN), i64::from(i8::MAX), datatype, what)
                .map(|v| MetricValue::Int8(v as i8))
        }
        (MetricValue::Int64(v), DataType::Int16) => {
            signed_fit(v, i64::from(i16::MIN), i64::from(i16::MAX), datatype, what)
                .map(|v| MetricValue::Int16(v as i16))
        }
        (MetricValue::Int64(v), DataType::Int32) => {
            signed_fit(v, i64::from(i32::MIN), i64::from(i32::MAX), datatype, what)
                .map(|v| MetricValue::Int32(v as i32))
        }
        (MetricValue::Int64(v), DataType::Float) => Ok(MetricValue::Float(v as f32)),
        (MetricValue::Int64(v), DataType::Double) => Ok(MetricValue::Double(v as f64)),
        (MetricValue::Int64(v), dt) if dt.is_scalar() => Err(DecodeError::schema(format!(
            "{what}: negative value {v} for {dt}"
        ))),

        (MetricValue::Double(d), DataType::Float) => Ok(MetricValue::Float(d as f32)),
        (MetricValue::Float(f), DataType::Double) => Ok(MetricValue::Double(f64::from(f))),

        // Packed blobs (binary provisional) unpack once the element
        // type is known.
        (MetricValue::Bytes(blob), dt) if dt.is_array() => protobuf::unpack_array(dt, &blob),

        (other, dt) => Err(DecodeError::schema(format!(
            "{what}: cannot re-type {} as {dt}",
            other.kind_name()
        ))),
    }
}
