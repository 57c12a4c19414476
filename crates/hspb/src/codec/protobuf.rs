// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Binary payload scheme: hand-rolled protobuf wire format.
//!
//! Field numbers and value layout follow the published Sparkplug B
//! `Payload` schema, so third-party consumers decode these bytes and
//! vice versa. Decoding is tolerant of unknown fields and of any legal
//! field ordering, strict about value width: an `int_value` that does not
//! fit the declared 8/16/32-bit width is a schema violation, never
//! silently widened.
//!
//! Metrics without a `datatype` field (alias-only DATA traffic from
//! writers that rely on the birth scope) decode provisionally: datatype
//! `Unknown` and the raw wire shape as value. The session layer re-types
//! them against the registered scope via [`super::retype_value`].

use super::wire::{WireReader, WireWriter, WIRE_FIXED32, WIRE_FIXED64, WIRE_LEN, WIRE_VARINT};
use crate::error::DecodeError;
use crate::model::{
    DataSet, DataType, MetaData, Metric, MetricValue, Payload, PropertySet, PropertyValue,
    Template, TemplateParameter,
};

// =======================================================================
// Field numbers (Sparkplug B Payload schema)
// =======================================================================

const PAYLOAD_TIMESTAMP: u32 = 1;
const PAYLOAD_METRICS: u32 = 2;
const PAYLOAD_SEQ: u32 = 3;
const PAYLOAD_UUID: u32 = 4;
const PAYLOAD_BODY: u32 = 5;

const METRIC_NAME: u32 = 1;
const METRIC_ALIAS: u32 = 2;
const METRIC_TIMESTAMP: u32 = 3;
const METRIC_DATATYPE: u32 = 4;
const METRIC_IS_HISTORICAL: u32 = 5;
const METRIC_IS_TRANSIENT: u32 = 6;
const METRIC_IS_NULL: u32 = 7;
const METRIC_METADATA: u32 = 8;
const METRIC_PROPERTIES: u32 = 9;

const METADATA_IS_MULTI_PART: u32 = 1;
const METADATA_CONTENT_TYPE: u32 = 2;
const METADATA_SIZE: u32 = 3;
const METADATA_SEQ: u32 = 4;
const METADATA_FILE_NAME: u32 = 5;
const METADATA_FILE_TYPE: u32 = 6;
const METADATA_MD5: u32 = 7;
const METADATA_DESCRIPTION: u32 = 8;

const PROPERTYSET_KEYS: u32 = 1;
const PROPERTYSET_VALUES: u32 = 2;

const PROPERTYVALUE_TYPE: u32 = 1;
const PROPERTYVALUE_IS_NULL: u32 = 2;

const DATASET_NUM_COLUMNS: u32 = 1;
const DATASET_COLUMNS: u32 = 2;
const DATASET_TYPES: u32 = 3;
const DATASET_ROWS: u32 = 4;
const ROW_ELEMENTS: u32 = 1;

const TEMPLATE_VERSION: u32 = 1;
const TEMPLATE_METRICS: u32 = 2;
const TEMPLATE_PARAMETERS: u32 = 3;
const TEMPLATE_REF: u32 = 4;
const TEMPLATE_IS_DEFINITION: u32 = 5;
const PARAMETER_NAME: u32 = 1;
const PARAMETER_TYPE: u32 = 2;

/// Scalar oneof field numbers, per enclosing message.
struct ScalarFields {
    int: u32,
    long: u32,
    float: u32,
    double: u32,
    boolean: u32,
    string: u32,
}

/// Metric value oneof: 10..=15 scalars, 16 bytes, 17 dataset, 18 template.
const METRIC_SCALARS: ScalarFields = ScalarFields {
    int: 10,
    long: 11,
    float: 12,
    double: 13,
    boolean: 14,
    string: 15,
};
const METRIC_BYTES_VALUE: u32 = 16;
const METRIC_DATASET_VALUE: u32 = 17;
const METRIC_TEMPLATE_VALUE: u32 = 18;

const CELL_SCALARS: ScalarFields = ScalarFields {
    int: 1,
    long: 2,
    float: 3,
    double: 4,
    boolean: 5,
    string: 6,
};

/// Shared by PropertyValue and Template.Parameter.
const EXT_SCALARS: ScalarFields = ScalarFields {
    int: 3,
    long: 4,
    float: 5,
    double: 6,
    boolean: 7,
    string: 8,
};

/// Template members may themselves carry templates; cap the recursion.
const MAX_NESTING: usize = 8;

// =======================================================================
// Encode
// =======================================================================

/// Encode a payload. Infallible: the model admits no unencodable state.
pub fn encode_payload(payload: &Payload) -> Vec<u8> {
    let mut w = WireWriter::with_capacity(64 + payload.metrics.len() * 32);
    if let Some(ts) = payload.timestamp {
        w.write_uint_field(PAYLOAD_TIMESTAMP, ts);
    }
    for metric in &payload.metrics {
        let mut mw = WireWriter::new();
        encode_metric(&mut mw, metric);
        w.write_message_field(PAYLOAD_METRICS, &mw);
    }
    if let Some(seq) = payload.seq {
        w.write_uint_field(PAYLOAD_SEQ, u64::from(seq));
    }
    if let Some(ref uuid) = payload.uuid {
        w.write_string_field(PAYLOAD_UUID, uuid);
    }
    if let Some(ref body) = payload.body {
        w.write_bytes_field(PAYLOAD_BODY, body);
    }
    w.into_bytes()
}

fn encode_metric(w: &mut WireWriter, metric: &Metric) {
    if let Some(ref name) = metric.name {
        w.write_string_field(METRIC_NAME, name);
    }
    if let Some(alias) = metric.alias {
        w.write_uint_field(METRIC_ALIAS, alias);
    }
    if let Some(ts) = metric.timestamp {
        w.write_uint_field(METRIC_TIMESTAMP, ts);
    }
    if metric.datatype != DataType::Unknown {
        w.write_uint_field(METRIC_DATATYPE, u64::from(metric.datatype.code()));
    }
    if metric.is_historical {
        w.write_bool_field(METRIC_IS_HISTORICAL, true);
    }
    if metric.is_transient {
        w.write_bool_field(METRIC_IS_TRANSIENT, true);
    }
    if metric.value.is_none() {
        w.write_bool_field(METRIC_IS_NULL, true);
    }
    if let Some(ref metadata) = metric.metadata {
        let mut inner = WireWriter::new();
        encode_metadata(&mut inner, metadata);
        w.write_message_field(METRIC_METADATA, &inner);
    }
    if let Some(ref properties) = metric.properties {
        let mut inner = WireWriter::new();
        encode_propertyset(&mut inner, properties);
        w.write_message_field(METRIC_PROPERTIES, &inner);
    }
    if let Some(ref value) = metric.value {
        encode_metric_value(w, value);
    }
}

fn encode_metric_value(w: &mut WireWriter, value: &MetricValue) {
    match value {
        MetricValue::Bytes(bytes) => w.write_bytes_field(METRIC_BYTES_VALUE, bytes),
        MetricValue::DataSet(ds) => {
            let mut inner = WireWriter::new();
            encode_dataset(&mut inner, ds);
            w.write_message_field(METRIC_DATASET_VALUE, &inner);
        }
        MetricValue::Template(template) => {
            let mut inner = WireWriter::new();
            encode_template(&mut inner, template);
            w.write_message_field(METRIC_TEMPLATE_VALUE, &inner);
        }
        other if other.infer_datatype().is_array() => {
            w.write_bytes_field(METRIC_BYTES_VALUE, &pack_array(other));
        }
        scalar => encode_scalar(w, &METRIC_SCALARS, scalar),
    }
}

/// Scalar oneof encoding, shared by metrics, dataset cells, properties
/// and template parameters.
///
/// Signed 8/16/32-bit values go out as two's complement at their exact
/// width (`Int8(-1)` is `0xFF` on the wire, not a 10-byte varint).
fn encode_scalar(w: &mut WireWriter, fields: &ScalarFields, value: &MetricValue) {
    match value {
        MetricValue::Int8(v) => w.write_uint_field(fields.int, u64::from(*v as u8)),
        MetricValue::Int16(v) => w.write_uint_field(fields.int, u64::from(*v as u16)),
        MetricValue::Int32(v) => w.write_uint_field(fields.int, u64::from(*v as u32)),
        MetricValue::UInt8(v) => w.write_uint_field(fields.int, u64::from(*v)),
        MetricValue::UInt16(v) => w.write_uint_field(fields.int, u64::from(*v)),
        MetricValue::UInt32(v) => w.write_uint_field(fields.int, u64::from(*v)),
        MetricValue::Int64(v) => w.write_uint_field(fields.long, *v as u64),
        MetricValue::UInt64(v) => w.write_uint_field(fields.long, *v),
        MetricValue::DateTime(v) => w.write_uint_field(fields.long, *v),
        MetricValue::Float(v) => w.write_float_field(fields.float, *v),
        MetricValue::Double(v) => w.write_double_field(fields.double, *v),
        MetricValue::Boolean(v) => w.write_bool_field(fields.boolean, *v),
        MetricValue::String(s) => w.write_string_field(fields.string, s),
        // Composites and arrays never reach scalar positions: the model
        // validates cells/properties/parameters at construction.
        _ => {}
    }
}

fn encode_metadata(w: &mut WireWriter, metadata: &MetaData) {
    if metadata.is_multi_part {
        w.write_bool_field(METADATA_IS_MULTI_PART, true);
    }
    if let Some(ref v) = metadata.content_type {
        w.write_string_field(METADATA_CONTENT_TYPE, v);
    }
    if let Some(v) = metadata.size {
        w.write_uint_field(METADATA_SIZE, v);
    }
    if let Some(v) = metadata.seq {
        w.write_uint_field(METADATA_SEQ, v);
    }
    if let Some(ref v) = metadata.file_name {
        w.write_string_field(METADATA_FILE_NAME, v);
    }
    if let Some(ref v) = metadata.file_type {
        w.write_string_field(METADATA_FILE_TYPE, v);
    }
    if let Some(ref v) = metadata.md5 {
        w.write_string_field(METADATA_MD5, v);
    }
    if let Some(ref v) = metadata.description {
        w.write_string_field(METADATA_DESCRIPTION, v);
    }
}

fn encode_propertyset(w: &mut WireWriter, properties: &PropertySet) {
    for (key, _) in properties.iter() {
        w.write_string_field(PROPERTYSET_KEYS, key);
    }
    for (_, value) in properties.iter() {
        let mut inner = WireWriter::new();
        inner.write_uint_field(PROPERTYVALUE_TYPE, u64::from(value.datatype.code()));
        match value.value {
            None => inner.write_bool_field(PROPERTYVALUE_IS_NULL, true),
            Some(ref v) => encode_scalar(&mut inner, &EXT_SCALARS, v),
        }
        w.write_message_field(PROPERTYSET_VALUES, &inner);
    }
}

fn encode_dataset(w: &mut WireWriter, ds: &DataSet) {
    w.write_uint_field(DATASET_NUM_COLUMNS, ds.columns.len() as u64);
    for column in &ds.columns {
        w.write_string_field(DATASET_COLUMNS, column);
    }
    for dt in &ds.types {
        w.write_uint_field(DATASET_TYPES, u64::from(dt.code()));
    }
    for row in &ds.rows {
        let mut rw = WireWriter::new();
        for cell in row {
            let mut cw = WireWriter::new();
            encode_scalar(&mut cw, &CELL_SCALARS, cell);
            rw.write_message_field(ROW_ELEMENTS, &cw);
        }
        w.write_message_field(DATASET_ROWS, &rw);
    }
}

fn encode_template(w: &mut WireWriter, template: &Template) {
    if let Some(ref version) = template.version {
        w.write_string_field(TEMPLATE_VERSION, version);
    }
    for metric in &template.metrics {
        let mut mw = WireWriter::new();
        encode_metric(&mut mw, metric);
        w.write_message_field(TEMPLATE_METRICS, &mw);
    }
    for parameter in &template.parameters {
        let mut pw = WireWriter::new();
        pw.write_string_field(PARAMETER_NAME, &parameter.name);
        pw.write_uint_field(PARAMETER_TYPE, u64::from(parameter.datatype.code()));
        if let Some(ref value) = parameter.value {
            encode_scalar(&mut pw, &EXT_SCALARS, value);
        }
        w.write_message_field(TEMPLATE_PARAMETERS, &pw);
    }
    if let Some(ref reference) = template.template_ref {
        w.write_string_field(TEMPLATE_REF, reference);
    }
    if template.is_definition {
        w.write_bool_field(TEMPLATE_IS_DEFINITION, true);
    }
}

// =======================================================================
// Array packing (arrays travel as little-endian blobs in bytes_value)
// =======================================================================

macro_rules! pack_le {
    ($items:expr, $width:expr) => {{
        let mut out = Vec::with_capacity($items.len() * $width);
        for item in $items {
            out.extend_from_slice(&item.to_le_bytes());
        }
        out
    }};
}

fn pack_array(value: &MetricValue) -> Vec<u8> {
    match value {
        MetricValue::Int8Array(items) => pack_le!(items, 1),
        MetricValue::Int16Array(items) => pack_le!(items, 2),
        MetricValue::Int32Array(items) => pack_le!(items, 4),
        MetricValue::Int64Array(items) => pack_le!(items, 8),
        MetricValue::UInt8Array(items) => items.clone(),
        MetricValue::UInt16Array(items) => pack_le!(items, 2),
        MetricValue::UInt32Array(items) => pack_le!(items, 4),
        MetricValue::UInt64Array(items) => pack_le!(items, 8),
        MetricValue::FloatArray(items) => pack_le!(items, 4),
        MetricValue::DoubleArray(items) => pack_le!(items, 8),
        MetricValue::DateTimeArray(items) => pack_le!(items, 8),
        MetricValue::BooleanArray(items) => pack_bool_array(items),
        MetricValue::StringArray(items) => pack_string_array(items),
        _ => Vec::new(),
    }
}

/// Boolean arrays: u32 LE element count, then MSB-first packed bits.
fn pack_bool_array(items: &[bool]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + items.len().div_ceil(8));
    out.extend_from_slice(&(items.len() as u32).to_le_bytes());
    let mut byte = 0u8;
    for (i, &bit) in items.iter().enumerate() {
        if bit {
            byte |= 0x80 >> (i % 8);
        }
        if i % 8 == 7 {
            out.push(byte);
            byte = 0;
        }
    }
    if items.len() % 8 != 0 {
        out.push(byte);
    }
    out
}

/// String arrays: NUL-terminated UTF-8, concatenated.
fn pack_string_array(items: &[String]) -> Vec<u8> {
    let mut out = Vec::with_capacity(items.iter().map(|s| s.len() + 1).sum());
    for s in items {
        out.extend_from_slice(s.as_bytes());
        out.push(0);
    }
    out
}

pub(super) fn unpack_array(datatype: DataType, bytes: &[u8]) -> Result<MetricValue, DecodeError> {
    macro_rules! unpack_le {
        ($ty:ty, $width:expr, $variant:ident) => {{
            if bytes.len() % $width != 0 {
                return Err(DecodeError::schema(format!(
                    "{datatype} blob length {} is not a multiple of {}",
                    bytes.len(),
                    $width
                )));
            }
            let items = bytes
                .chunks_exact($width)
                .map(|chunk| {
                    let mut arr = [0u8; $width];
                    arr.copy_from_slice(chunk);
                    <$ty>::from_le_bytes(arr)
                })
                .collect();
            MetricValue::$variant(items)
        }};
    }

    Ok(match datatype {
        DataType::Int8Array => unpack_le!(i8, 1, Int8Array),
        DataType::Int16Array => unpack_le!(i16, 2, Int16Array),
        DataType::Int32Array => unpack_le!(i32, 4, Int32Array),
        DataType::Int64Array => unpack_le!(i64, 8, Int64Array),
        DataType::UInt8Array => MetricValue::UInt8Array(bytes.to_vec()),
        DataType::UInt16Array => unpack_le!(u16, 2, UInt16Array),
        DataType::UInt32Array => unpack_le!(u32, 4, UInt32Array),
        DataType::UInt64Array => unpack_le!(u64, 8, UInt64Array),
        DataType::FloatArray => unpack_le!(f32, 4, FloatArray),
        DataType::DoubleArray => unpack_le!(f64, 8, DoubleArray),
        DataType::DateTimeArray => unpack_le!(u64, 8, DateTimeArray),
        DataType::BooleanArray => unpack_bool_array(bytes)?,
        DataType::StringArray => unpack_string_array(bytes)?,
        other => {
            return Err(DecodeError::schema(format!(
                "{other} is not an array datatype"
            )))
        }
    })
}

fn unpack_bool_array(bytes: &[u8]) -> Result<MetricValue, DecodeError> {
    if bytes.len() < 4 {
        return Err(DecodeError::schema(
            "boolean array blob shorter than its 4-byte count",
        ));
    }
    let mut count_bytes = [0u8; 4];
    count_bytes.copy_from_slice(&bytes[..4]);
    let count = u32::from_le_bytes(count_bytes) as usize;
    let expected = count.div_ceil(8);
    if bytes.len() - 4 != expected {
        return Err(DecodeError::schema(format!(
            "boolean array declares {count} bits but carries {} packed byte(s), expected {expected}",
            bytes.len() - 4
        )));
    }
    let mut items = Vec::with_capacity(count);
    for i in 0..count {
        let byte = bytes[4 + i / 8];
        items.push(byte & (0x80 >> (i % 8)) != 0);
    }
    Ok(MetricValue::BooleanArray(items))
}

fn unpack_string_array(bytes: &[u8]) -> Result<MetricValue, DecodeError> {
    if bytes.is_empty() {
        return Ok(MetricValue::StringArray(Vec::new()));
    }
    if bytes[bytes.len() - 1] != 0 {
        return Err(DecodeError::schema("string array blob is not NUL-terminated"));
    }
    let mut items = Vec::new();
    for chunk in bytes[..bytes.len() - 1].split(|&b| b == 0) {
        let s = std::str::from_utf8(chunk)
            .map_err(|e| DecodeError::schema(format!("invalid UTF-8 in string array: {e}")))?;
        items.push(s.to_owned());
    }
    Ok(MetricValue::StringArray(items))
}

// =======================================================================
// Decode
// =======================================================================

/// Raw scalar as it sits on the wire, before datatype interpretation.
enum RawScalar {
    Uint(u64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    String(String),
}

impl RawScalar {
    fn wire_kind(&self) -> &'static str {
        match self {
            RawScalar::Uint(_) => "integer",
            RawScalar::Float(_) => "float",
            RawScalar::Double(_) => "double",
            RawScalar::Boolean(_) => "boolean",
            RawScalar::String(_) => "string",
        }
    }
}

/// Raw metric value, one case per oneof branch.
enum RawValue {
    Scalar(RawScalar),
    Bytes(Vec<u8>),
    DataSet(DataSet),
    Template(Template),
}

/// Interpret a raw scalar under its declared datatype.
///
/// Integers are range-checked against the declared width and
/// reinterpreted as two's complement; a wire shape that cannot carry the
/// datatype is a schema violation.
fn scalar_from_raw(raw: RawScalar, datatype: DataType, what: &str) -> Result<MetricValue, DecodeError> {
    fn width_check(raw: u64, max: u64, datatype: DataType, what: &str) -> Result<u64, DecodeError> {
        if raw > max {
            return Err(DecodeError::schema(format!(
                "{what}: value {raw} exceeds {datatype} width"
            )));
        }
        Ok(raw)
    }

    match (raw, datatype) {
        (RawScalar::Uint(v), DataType::Int8) => {
            Ok(MetricValue::Int8(width_check(v, 0xFF, datatype, what)? as u8 as i8))
        }
        (RawScalar::Uint(v), DataType::Int16) => {
            Ok(MetricValue::Int16(width_check(v, 0xFFFF, datatype, what)? as u16 as i16))
        }
        (RawScalar::Uint(v), DataType::Int32) => Ok(MetricValue::Int32(
            width_check(v, 0xFFFF_FFFF, datatype, what)? as u32 as i32,
        )),
        (RawScalar::Uint(v), DataType::Int64) => Ok(MetricValue::Int64(v as i64)),
        (RawScalar::Uint(v), DataType::UInt8) => {
            Ok(MetricValue::UInt8(width_check(v, 0xFF, datatype, what)? as u8))
        }
        (RawScalar::Uint(v), DataType::UInt16) => {
            Ok(MetricValue::UInt16(width_check(v, 0xFFFF, datatype, what)? as u16))
        }
        (RawScalar::Uint(v), DataType::UInt32) => Ok(MetricValue::UInt32(
            width_check(v, 0xFFFF_FFFF, datatype, what)? as u32,
        )),
        (RawScalar::Uint(v), DataType::UInt64) => Ok(MetricValue::UInt64(v)),
        (RawScalar::Uint(v), DataType::DateTime) => Ok(MetricValue::DateTime(v)),
        (RawScalar::Float(v), DataType::Float) => Ok(MetricValue::Float(v)),
        (RawScalar::Double(v), DataType::Double) => Ok(MetricValue::Double(v)),
        (RawScalar::Boolean(v), DataType::Boolean) => Ok(MetricValue::Boolean(v)),
        (RawScalar::String(v), DataType::String | DataType::Text | DataType::Uuid) => {
            Ok(MetricValue::String(v))
        }
        (raw, datatype) => Err(DecodeError::schema(format!(
            "{what}: {} wire value cannot carry datatype {datatype}",
            raw.wire_kind()
        ))),
    }
}

/// Provisional value for a metric that carried no datatype: keep the raw
/// wire shape so a later re-typing pass can interpret the exact bits.
fn provisional_value(raw: RawValue) -> MetricValue {
    match raw {
        RawValue::Scalar(RawScalar::Uint(v)) => MetricValue::UInt64(v),
        RawValue::Scalar(RawScalar::Float(v)) => MetricValue::Float(v),
        RawValue::Scalar(RawScalar::Double(v)) => MetricValue::Double(v),
        RawValue::Scalar(RawScalar::Boolean(v)) => MetricValue::Boolean(v),
        RawValue::Scalar(RawScalar::String(v)) => MetricValue::String(v),
        RawValue::Bytes(v) => MetricValue::Bytes(v),
        RawValue::DataSet(v) => MetricValue::DataSet(v),
        RawValue::Template(v) => MetricValue::Template(v),
    }
}

/// Decode a payload from protobuf bytes.
pub fn decode_payload(bytes: &[u8]) -> Result<Payload, DecodeError> {
    let mut reader = WireReader::new(bytes);
    let mut payload = Payload::default();

    while !reader.is_eof() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (PAYLOAD_TIMESTAMP, WIRE_VARINT) => payload.timestamp = Some(reader.read_varint()?),
            (PAYLOAD_METRICS, WIRE_LEN) => {
                let body = reader.read_len_prefixed()?;
                payload.metrics.push(decode_metric(body, MAX_NESTING)?);
            }
            (PAYLOAD_SEQ, WIRE_VARINT) => {
                let raw = reader.read_varint()?;
                if raw > 255 {
                    return Err(DecodeError::schema(format!("seq {raw} outside 0-255")));
                }
                payload.seq = Some(raw as u8);
            }
            (PAYLOAD_UUID, WIRE_LEN) => payload.uuid = Some(reader.read_string()?),
            (PAYLOAD_BODY, WIRE_LEN) => payload.body = Some(reader.read_len_prefixed()?.to_vec()),
            (_, wt) => reader.skip(wt)?,
        }
    }
    Ok(payload)
}

fn decode_metric(bytes: &[u8], depth: usize) -> Result<Metric, DecodeError> {
    let mut reader = WireReader::new(bytes);
    let mut name = None;
    let mut alias = None;
    let mut timestamp = None;
    let mut datatype_code: Option<u64> = None;
    let mut is_historical = false;
    let mut is_transient = false;
    let mut is_null = false;
    let mut metadata = None;
    let mut properties = None;
    let mut raw_value: Option<RawValue> = None;

    while !reader.is_eof() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (METRIC_NAME, WIRE_LEN) => name = Some(reader.read_string()?),
            (METRIC_ALIAS, WIRE_VARINT) => alias = Some(reader.read_varint()?),
            (METRIC_TIMESTAMP, WIRE_VARINT) => timestamp = Some(reader.read_varint()?),
            (METRIC_DATATYPE, WIRE_VARINT) => datatype_code = Some(reader.read_varint()?),
            (METRIC_IS_HISTORICAL, WIRE_VARINT) => is_historical = reader.read_varint()? != 0,
            (METRIC_IS_TRANSIENT, WIRE_VARINT) => is_transient = reader.read_varint()? != 0,
            (METRIC_IS_NULL, WIRE_VARINT) => is_null = reader.read_varint()? != 0,
            (METRIC_METADATA, WIRE_LEN) => {
                metadata = Some(decode_metadata(reader.read_len_prefixed()?)?);
            }
            (METRIC_PROPERTIES, WIRE_LEN) => {
                properties = Some(decode_propertyset(reader.read_len_prefixed()?)?);
            }
            (f, WIRE_VARINT) if f == METRIC_SCALARS.int || f == METRIC_SCALARS.long => {
                raw_value = Some(RawValue::Scalar(RawScalar::Uint(reader.read_varint()?)));
            }
            (f, WIRE_FIXED32) if f == METRIC_SCALARS.float => {
                raw_value = Some(RawValue::Scalar(RawScalar::Float(f32::from_bits(
                    reader.read_fixed32()?,
                ))));
            }
            (f, WIRE_FIXED64) if f == METRIC_SCALARS.double => {
                raw_value = Some(RawValue::Scalar(RawScalar::Double(f64::from_bits(
                    reader.read_fixed64()?,
                ))));
            }
            (f, WIRE_VARINT) if f == METRIC_SCALARS.boolean => {
                raw_value = Some(RawValue::Scalar(RawScalar::Boolean(reader.read_varint()? != 0)));
            }
            (f, WIRE_LEN) if f == METRIC_SCALARS.string => {
                raw_value = Some(RawValue::Scalar(RawScalar::String(reader.read_string()?)));
            }
            (METRIC_BYTES_VALUE, WIRE_LEN) => {
                raw_value = Some(RawValue::Bytes(reader.read_len_prefixed()?.to_vec()));
            }
            (METRIC_DATASET_VALUE, WIRE_LEN) => {
                raw_value = Some(RawValue::DataSet(decode_dataset(reader.read_len_prefixed()?)?));
            }
            (METRIC_TEMPLATE_VALUE, WIRE_LEN) => {
                if depth == 0 {
                    return Err(DecodeError::schema(format!(
                        "template nesting exceeds {MAX_NESTING} levels"
                    )));
                }
                raw_value = Some(RawValue::Template(decode_template(
                    reader.read_len_prefixed()?,
                    depth - 1,
                )?));
            }
            (_, wt) => reader.skip(wt)?,
        }
    }

    let datatype = match datatype_code {
        Some(code) => {
            let code = u32::try_from(code)
                .map_err(|_| DecodeError::UnknownDatatype(u32::MAX))?;
            DataType::from_code(code)?
        }
        None => DataType::Unknown,
    };

    let value = if is_null {
        None
    } else {
        match raw_value {
            None => None,
            Some(raw) => Some(typed_value(raw, datatype, name.as_deref())?),
        }
    };

    Ok(Metric {
        name,
        alias,
        datatype,
        value,
        timestamp,
        is_historical,
        is_transient,
        properties,
        metadata,
    })
}

/// Interpret a raw value under the metric's declared datatype, or keep it
/// provisional when no datatype was carried.
fn typed_value(
    raw: RawValue,
    datatype: DataType,
    name: Option<&str>,
) -> Result<MetricValue, DecodeError> {
    let what = name.unwrap_or("<unnamed metric>");
    match datatype {
        DataType::Unknown => Ok(provisional_value(raw)),
        dt if dt.is_array() => match raw {
            RawValue::Bytes(bytes) => unpack_array(dt, &bytes),
            other => Err(DecodeError::schema(format!(
                "{what}: {dt} expects a packed bytes value, got {}",
                raw_kind(&other)
            ))),
        },
        DataType::Bytes | DataType::File => match raw {
            RawValue::Bytes(bytes) => Ok(MetricValue::Bytes(bytes)),
            other => Err(DecodeError::schema(format!(
                "{what}: {datatype} expects a bytes value, got {}",
                raw_kind(&other)
            ))),
        },
        DataType::DataSet => match raw {
            RawValue::DataSet(ds) => Ok(MetricValue::DataSet(ds)),
            other => Err(DecodeError::schema(format!(
                "{what}: DataSet expects a dataset value, got {}",
                raw_kind(&other)
            ))),
        },
        DataType::Template => match raw {
            RawValue::Template(t) => Ok(MetricValue::Template(t)),
            other => Err(DecodeError::schema(format!(
                "{what}: Template expects a template value, got {}",
                raw_kind(&other)
            ))),
        },
        DataType::PropertySet | DataType::PropertySetList => Err(DecodeError::schema(format!(
            "{what}: datatype {datatype} admits no metric value"
        ))),
        scalar_dt => match raw {
            RawValue::Scalar(raw) => scalar_from_raw(raw, scalar_dt, what),
            other => Err(DecodeError::schema(format!(
                "{what}: {scalar_dt} expects a scalar value, got {}",
                raw_kind(&other)
            ))),
        },
    }
}

fn raw_kind(raw: &RawValue) -> &'static str {
    match raw {
        RawValue::Scalar(s) => s.wire_kind(),
        RawValue::Bytes(_) => "bytes",
        RawValue::DataSet(_) => "dataset",
        RawValue::Template(_) => "template",
    }
}

fn decode_metadata(bytes: &[u8]) -> Result<MetaData, DecodeError> {
    let mut reader = WireReader::new(bytes);
    let mut metadata = MetaData::default();
    while !reader.is_eof() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (METADATA_IS_MULTI_PART, WIRE_VARINT) => {
                metadata.is_multi_part = reader.read_varint()? != 0;
            }
            (METADATA_CONTENT_TYPE, WIRE_LEN) => metadata.content_type = Some(reader.read_string()?),
            (METADATA_SIZE, WIRE_VARINT) => metadata.size = Some(reader.read_varint()?),
            (METADATA_SEQ, WIRE_VARINT) => metadata.seq = Some(reader.read_varint()?),
            (METADATA_FILE_NAME, WIRE_LEN) => metadata.file_name = Some(reader.read_string()?),
            (METADATA_FILE_TYPE, WIRE_LEN) => metadata.file_type = Some(reader.read_string()?),
            (METADATA_MD5, WIRE_LEN) => metadata.md5 = Some(reader.read_string()?),
            (METADATA_DESCRIPTION, WIRE_LEN) => metadata.description = Some(reader.read_string()?),
            (_, wt) => reader.skip(wt)?,
        }
    }
    Ok(metadata)
}

fn decode_propertyset(bytes: &[u8]) -> Result<PropertySet, DecodeError> {
    let mut reader = WireReader::new(bytes);
    let mut keys: Vec<String> = Vec::new();
    let mut values: Vec<PropertyValue> = Vec::new();
    while !reader.is_eof() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (PROPERTYSET_KEYS, WIRE_LEN) => keys.push(reader.read_string()?),
            (PROPERTYSET_VALUES, WIRE_LEN) => {
                values.push(decode_propertyvalue(reader.read_len_prefixed()?)?);
            }
            (_, wt) => reader.skip(wt)?,
        }
    }
    if keys.len() != values.len() {
        return Err(DecodeError::schema(format!(
            "property set has {} key(s) but {} value(s)",
            keys.len(),
            values.len()
        )));
    }
    let mut set = PropertySet::new();
    for (key, value) in keys.into_iter().zip(values) {
        set.insert(key, value);
    }
    Ok(set)
}

fn decode_propertyvalue(bytes: &[u8]) -> Result<PropertyValue, DecodeError> {
    let mut reader = WireReader::new(bytes);
    let mut datatype_code = None;
    let mut is_null = false;
    let mut raw: Option<RawScalar> = None;
    while !reader.is_eof() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (PROPERTYVALUE_TYPE, WIRE_VARINT) => datatype_code = Some(reader.read_varint()?),
            (PROPERTYVALUE_IS_NULL, WIRE_VARINT) => is_null = reader.read_varint()? != 0,
            (f, WIRE_VARINT) if f == EXT_SCALARS.int || f == EXT_SCALARS.long => {
                raw = Some(RawScalar::Uint(reader.read_varint()?));
            }
            (f, WIRE_FIXED32) if f == EXT_SCALARS.float => {
                raw = Some(RawScalar::Float(f32::from_bits(reader.read_fixed32()?)));
            }
            (f, WIRE_FIXED64) if f == EXT_SCALARS.double => {
                raw = Some(RawScalar::Double(f64::from_bits(reader.read_fixed64()?)));
            }
            (f, WIRE_VARINT) if f == EXT_SCALARS.boolean => {
                raw = Some(RawScalar::Boolean(reader.read_varint()? != 0));
            }
            (f, WIRE_LEN) if f == EXT_SCALARS.string => {
                raw = Some(RawScalar::String(reader.read_string()?));
            }
            (_, wt) => reader.skip(wt)?,
        }
    }
    let code = datatype_code.ok_or_else(|| DecodeError::schema("property value without type"))?;
    let code =
        u32::try_from(code).map_err(|_| DecodeError::UnknownDatatype(u32::MAX))?;
    let datatype = DataType::from_code(code)?;
    if !datatype.is_scalar() {
        return Err(DecodeError::schema(format!(
            "property value has non-scalar type {datatype}"
        )));
    }
    let value = if is_null {
        None
    } else {
        match raw {
            None => None,
            Some(raw) => Some(scalar_from_raw(raw, datatype, "<property>")?),
        }
    };
    Ok(PropertyValue { datatype, value })
}

fn decode_dataset(bytes: &[u8]) -> Result<DataSet, DecodeError> {
    let mut reader = WireReader::new(bytes);
    let mut num_columns: Option<u64> = None;
    let mut columns: Vec<String> = Vec::new();
    let mut type_codes: Vec<u64> = Vec::new();
    let mut raw_rows: Vec<Vec<RawScalar>> = Vec::new();

    while !reader.is_eof() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (DATASET_NUM_COLUMNS, WIRE_VARINT) => num_columns = Some(reader.read_varint()?),
            (DATASET_COLUMNS, WIRE_LEN) => columns.push(reader.read_string()?),
            (DATASET_TYPES, WIRE_VARINT) => type_codes.push(reader.read_varint()?),
            (DATASET_TYPES, WIRE_LEN) => {
                // Packed repeated encoding, inner varints back to back.
                let body = reader.read_len_prefixed()?;
                let mut packed = WireReader::new(body);
                while !packed.is_eof() {
                    type_codes.push(packed.read_varint()?);
                }
            }
            (DATASET_ROWS, WIRE_LEN) => {
                raw_rows.push(decode_row(reader.read_len_prefixed()?)?);
            }
            (_, wt) => reader.skip(wt)?,
        }
    }

    if let Some(n) = num_columns {
        if n as usize != columns.len() {
            return Err(DecodeError::schema(format!(
                "dataset declares {n} columns but names {}",
                columns.len()
            )));
        }
    }
    if type_codes.len() != columns.len() {
        return Err(DecodeError::schema(format!(
            "dataset has {} column(s) but {} type(s)",
            columns.len(),
            type_codes.len()
        )));
    }
    let mut types = Vec::with_capacity(type_codes.len());
    for code in type_codes {
        let code = u32::try_from(code).map_err(|_| DecodeError::UnknownDatatype(u32::MAX))?;
        let dt = DataType::from_code(code)?;
        if !dt.is_scalar() {
            return Err(DecodeError::schema(format!(
                "dataset column type {dt} is not scalar"
            )));
        }
        types.push(dt);
    }

    // Cells are re-typed once the column types are known; protobuf field
    // order is not guaranteed, so rows may have arrived first.
    let mut rows = Vec::with_capacity(raw_rows.len());
    for (row_idx, raw_row) in raw_rows.into_iter().enumerate() {
        if raw_row.len() != columns.len() {
            return Err(DecodeError::schema(format!(
                "dataset row {row_idx} has {} cell(s), expected {}",
                raw_row.len(),
                columns.len()
            )));
        }
        let mut row = Vec::with_capacity(raw_row.len());
        for (cell, (dt, column)) in raw_row.into_iter().zip(types.iter().zip(&columns)) {
            row.push(scalar_from_raw(cell, *dt, column)?);
        }
        rows.push(row);
    }

    Ok(DataSet { columns, types, rows })
}

fn decode_row(bytes: &[u8]) -> Result<Vec<RawScalar>, DecodeError> {
    let mut reader = WireReader::new(bytes);
    let mut cells = Vec::new();
    while !reader.is_eof() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (ROW_ELEMENTS, WIRE_LEN) => cells.push(decode_cell(reader.read_len_prefixed()?)?),
            (_, wt) => reader.skip(wt)?,
        }
    }
    Ok(cells)
}

fn decode_cell(bytes: &[u8]) -> Result<RawScalar, DecodeError> {
    let mut reader = WireReader::new(bytes);
    let mut raw = None;
    while !reader.is_eof() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (f, WIRE_VARINT) if f == CELL_SCALARS.int || f == CELL_SCALARS.long => {
                raw = Some(RawScalar::Uint(reader.read_varint()?));
            }
            (f, WIRE_FIXED32) if f == CELL_SCALARS.float => {
                raw = Some(RawScalar::Float(f32::from_bits(reader.read_fixed32()?)));
            }
            (f, WIRE_FIXED64) if f == CELL_SCALARS.double => {
                raw = Some(RawScalar::Double(f64::from_bits(reader.read_fixed64()?)));
            }
            (f, WIRE_VARINT) if f == CELL_SCALARS.boolean => {
                raw = Some(RawScalar::Boolean(reader.read_varint()? != 0));
            }
            (f, WIRE_LEN) if f == CELL_SCALARS.string => {
                raw = Some(RawScalar::String(reader.read_string()?));
            }
            (_, wt) => reader.skip(wt)?,
        }
    }
    raw.ok_or_else(|| DecodeError::schema("dataset cell without a value"))
}

fn decode_template(bytes: &[u8], depth: usize) -> Result<Template, DecodeError> {
    let mut reader = WireReader::new(bytes);
    let mut template = Template {
        version: None,
        template_ref: None,
        is_definition: false,
        metrics: Vec::new(),
        parameters: Vec::new(),
    };
    while !reader.is_eof() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (TEMPLATE_VERSION, WIRE_LEN) => template.version = Some(reader.read_string()?),
            (TEMPLATE_METRICS, WIRE_LEN) => {
                template
                    .metrics
                    .push(decode_metric(reader.read_len_prefixed()?, depth)?);
            }
            (TEMPLATE_PARAMETERS, WIRE_LEN) => {
                template
                    .parameters
                    .push(decode_parameter(reader.read_len_prefixed()?)?);
            }
            (TEMPLATE_REF, WIRE_LEN) => template.template_ref = Some(reader.read_string()?),
            (TEMPLATE_IS_DEFINITION, WIRE_VARINT) => {
                template.is_definition = reader.read_varint()? != 0;
            }
            (_, wt) => reader.skip(wt)?,
        }
    }
    Ok(template)
}

fn decode_parameter(bytes: &[u8]) -> Result<TemplateParameter, DecodeError> {
    let mut reader = WireReader::new(bytes);
    let mut name = None;
    let mut datatype_code = None;
    let mut raw = None;
    while !reader.is_eof() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (PARAMETER_NAME, WIRE_LEN) => name = Some(reader.read_string()?),
            (PARAMETER_TYPE, WIRE_VARINT) => datatype_code = Some(reader.read_varint()?),
            (f, WIRE_VARINT) if f == EXT_SCALARS.int || f == EXT_SCALARS.long => {
                raw = Some(RawScalar::Uint(reader.read_varint()?));
            }
            (f, WIRE_FIXED32) if f == EXT_SCALARS.float => {
                raw = Some(RawScalar::Float(f32::from_bits(reader.read_fixed32()?)));
            }
            (f, WIRE_FIXED64) if f == EXT_SCALARS.double => {
                raw = Some(RawScalar::Double(f64::from_bits(reader.read_fixed64()?)));
            }
            (f, WIRE_VARINT) if f == EXT_SCALARS.boolean => {
                raw = Some(RawScalar::Boolean(reader.read_varint()? != 0));
            }
            (f, WIRE_LEN) if f == EXT_SCALARS.string => {
                raw = Some(RawScalar::String(reader.read_string()?));
            }
            (_, wt) => reader.skip(wt)?,
        }
    }
    let name = name.ok_or_else(|| DecodeError::schema("template parameter without a name"))?;
    let code = datatype_code
        .ok_or_else(|| DecodeError::schema(format!("template parameter '{name}' without type")))?;
    let code = u32::try_from(code).map_err(|_| DecodeError::UnknownDatatype(u32::MAX))?;
    let datatype = DataType::from_code(code)?;
    if !datatype.is_scalar() {
        return Err(DecodeError::schema(format!(
            "template parameter '{name}' has non-scalar type {datatype}"
        )));
    }
    let value = match raw {
        None => None,
        Some(raw) => Some(scalar_from_raw(raw, datatype, &name)?),
    };
    Ok(TemplateParameter { name, datatype, value })
}
