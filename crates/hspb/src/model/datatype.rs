// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sparkplug B datatype codes.
//!
//! The numeric codes travel on the wire (`Metric.datatype`, dataset column
//! types, property value types) and are fixed by the Sparkplug B
//! specification. Unknown inbound codes are rejected at decode time, never
//! mapped to a fallback.

use crate::error::DecodeError;

/// Declared type of a metric value.
///
/// Codes 0-21 cover scalars and composites, 22-34 the homogeneous array
/// types introduced in Sparkplug B v3.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataType {
    Unknown = 0,
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    UInt64 = 8,
    Float = 9,
    Double = 10,
    Boolean = 11,
    String = 12,
    /// Milliseconds since the UNIX epoch, carried as u64.
    DateTime = 13,
    Text = 14,
    Uuid = 15,
    DataSet = 16,
    Bytes = 17,
    File = 18,
    Template = 19,
    PropertySet = 20,
    PropertySetList = 21,
    Int8Array = 22,
    Int16Array = 23,
    Int32Array = 24,
    Int64Array = 25,
    UInt8Array = 26,
    UInt16Array = 27,
    UInt32Array = 28,
    UInt64Array = 29,
    FloatArray = 30,
    DoubleArray = 31,
    BooleanArray = 32,
    StringArray = 33,
    DateTimeArray = 34,
}

impl DataType {
    /// Wire code for this datatype.
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Decode a wire code.
    ///
    /// Returns [`DecodeError::UnknownDatatype`] for any code outside the
    /// published set; forward-compatibility is handled above this layer.
    pub fn from_code(code: u32) -> Result<Self, DecodeError> {
        Ok(match code {
            0 => DataType::Unknown,
            1 => DataType::Int8,
            2 => DataType::Int16,
            3 => DataType::Int32,
            4 => DataType::Int64,
            5 => DataType::UInt8,
            6 => DataType::UInt16,
            7 => DataType::UInt32,
            8 => DataType::UInt64,
            9 => DataType::Float,
            10 => DataType::Double,
            11 => DataType::Boolean,
            12 => DataType::String,
            13 => DataType::DateTime,
            14 => DataType::Text,
            15 => DataType::Uuid,
            16 => DataType::DataSet,
            17 => DataType::Bytes,
            18 => DataType::File,
            19 => DataType::Template,
            20 => DataType::PropertySet,
            21 => DataType::PropertySetList,
            22 => DataType::Int8Array,
            23 => DataType::Int16Array,
            24 => DataType::Int32Array,
            25 => DataType::Int64Array,
            26 => DataType::UInt8Array,
            27 => DataType::UInt16Array,
            28 => DataType::UInt32Array,
            29 => DataType::UInt64Array,
            30 => DataType::FloatArray,
            31 => DataType::DoubleArray,
            32 => DataType::BooleanArray,
            33 => DataType::StringArray,
            34 => DataType::DateTimeArray,
            other => return Err(DecodeError::UnknownDatatype(other)),
        })
    }

    /// Canonical name, for logs and diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Unknown => "Unknown",
            DataType::Int8 => "Int8",
            DataType::Int16 => "Int16",
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::UInt8 => "UInt8",
            DataType::UInt16 => "UInt16",
            DataType::UInt32 => "UInt32",
            DataType::UInt64 => "UInt64",
            DataType::Float => "Float",
            DataType::Double => "Double",
            DataType::Boolean => "Boolean",
            DataType::String => "String",
            DataType::DateTime => "DateTime",
            DataType::Text => "Text",
            DataType::Uuid => "Uuid",
            DataType::DataSet => "DataSet",
            DataType::Bytes => "Bytes",
            DataType::File => "File",
            DataType::Template => "Template",
            DataType::PropertySet => "PropertySet",
            DataType::PropertySetList => "PropertySetList",
            DataType::Int8Array => "Int8Array",
            DataType::Int16Array => "Int16Array",
            DataType::Int32Array => "Int32Array",
            DataType::Int64Array => "Int64Array",
            DataType::UInt8Array => "UInt8Array",
            DataType::UInt16Array => "UInt16Array",
            DataType::UInt32Array => "UInt32Array",
            DataType::UInt64Array => "UInt64Array",
            DataType::FloatArray => "FloatArray",
            DataType::DoubleArray => "DoubleArray",
            DataType::BooleanArray => "BooleanArray",
            DataType::StringArray => "StringArray",
            DataType::DateTimeArray => "DateTimeArray",
        }
    }

    /// True for the array family (codes 22-34).
    #[inline]
    pub fn is_array(self) -> bool {
        self.code() >= 22
    }

    /// True for types legal as dataset cells and property values.
    ///
    /// Composites (DataSet, Template, PropertySet*) and arrays do not nest.
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
                | DataType::Float
                | DataType::Double
                | DataType::Boolean
                | DataType::String
                | DataType::DateTime
                | DataType::Text
                | DataType::Uuid
        )
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datatype_code_roundtrip_full_range() {
        for code in 0u32..=34 {
            let dt = DataType::from_code(code).expect("codes 0..=34 are all defined");
            assert_eq!(dt.code(), code, "code() should invert from_code() for {code}");
        }
    }

    #[test]
    fn test_datatype_unknown_code_rejected() {
        for code in [35u32, 100, u32::MAX] {
            match DataType::from_code(code) {
                Err(DecodeError::UnknownDatatype(c)) => {
                    assert_eq!(c, code, "error should carry the offending code")
                }
                other => panic!("code {code} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_datatype_array_classification() {
        assert!(DataType::Int8Array.is_array());
        assert!(DataType::DateTimeArray.is_array());
        assert!(!DataType::Bytes.is_array(), "Bytes is a scalar blob, not an array type");
        assert!(!DataType::Int64.is_array());
    }

    #[test]
    fn test_datatype_scalar_classification() {
        assert!(DataType::Uuid.is_scalar());
        assert!(DataType::DateTime.is_scalar());
        assert!(!DataType::DataSet.is_scalar(), "composites do not nest");
        assert!(!DataType::Int32Array.is_scalar(), "arrays do not nest");
        assert!(!DataType::Unknown.is_scalar());
    }
}
