// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Structured-text payload scheme (JSON).
//!
//! Same logical model as the binary scheme, readable on a wire tap. Keys
//! are emitted only when meaningful, integers as JSON numbers at their
//! true value (no two's complement masking), bytes as arrays of numbers,
//! arrays as JSON arrays of natives. Property map key order is preserved
//! (`serde_json` with `preserve_order`).
//!
//! Non-finite floats are the scheme's one gap: JSON has no NaN/Inf
//! literal, so they serialize as `null` and read back as a null metric.
//! Deployments that need NaN use the binary scheme.
//!
//! STATE documents ([`encode_state`] / [`decode_state`]) are JSON under
//! BOTH schemes; they live here because this is the JSON corner.

use crate::error::DecodeError;
use crate::model::{
    DataSet, DataType, MetaData, Metric, MetricValue, Payload, PropertySet, PropertyValue,
    StatePayload, Template, TemplateParameter,
};
use serde_json::{Map, Number, Value};

// =======================================================================
// Encode
// =======================================================================

/// Encode a payload as JSON bytes.
pub fn encode_payload(payload: &Payload) -> Vec<u8> {
    payload_to_value(payload).to_string().into_bytes()
}

fn payload_to_value(payload: &Payload) -> Value {
    let mut obj = Map::new();
    if let Some(ts) = payload.timestamp {
        obj.insert("timestamp".into(), ts.into());
    }
    if let Some(seq) = payload.seq {
        obj.insert("seq".into(), seq.into());
    }
    if let Some(ref uuid) = payload.uuid {
        obj.insert("uuid".into(), uuid.clone().into());
    }
    if let Some(ref body) = payload.body {
        obj.insert("body".into(), byte_array(body));
    }
    obj.insert(
        "metrics".into(),
        Value::Array(payload.metrics.iter().map(metric_to_value).collect()),
    );
    Value::Object(obj)
}

fn metric_to_value(metric: &Metric) -> Value {
    let mut obj = Map::new();
    if let Some(ref name) = metric.name {
        obj.insert("name".into(), name.clone().into());
    }
    if let Some(alias) = metric.alias {
        obj.insert("alias".into(), alias.into());
    }
    if let Some(ts) = metric.timestamp {
        obj.insert("timestamp".into(), ts.into());
    }
    if metric.datatype != DataType::Unknown {
        obj.insert("datatype".into(), metric.datatype.code().into());
    }
    if metric.is_historical {
        obj.insert("is_historical".into(), true.into());
    }
    if metric.is_transient {
        obj.insert("is_transient".into(), true.into());
    }
    if let Some(ref metadata) = metric.metadata {
        obj.insert("metadata".into(), metadata_to_value(metadata));
    }
    if let Some(ref properties) = metric.properties {
        obj.insert("properties".into(), propertyset_to_value(properties));
    }
    match metric.value {
        None => {
            obj.insert("is_null".into(), true.into());
        }
        Some(ref value) => {
            obj.insert("value".into(), value_to_json(value));
        }
    }
    Value::Object(obj)
}

fn float_json(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn byte_array(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().map(|&b| b.into()).collect())
}

fn value_to_json(value: &MetricValue) -> Value {
    match value {
        MetricValue::Int8(v) => (*v).into(),
        MetricValue::Int16(v) => (*v).into(),
        MetricValue::Int32(v) => (*v).into(),
        MetricValue::Int64(v) => (*v).into(),
        MetricValue::UInt8(v) => (*v).into(),
        MetricValue::UInt16(v) => (*v).into(),
        MetricValue::UInt32(v) => (*v).into(),
        MetricValue::UInt64(v) => (*v).into(),
        MetricValue::Float(v) => float_json(f64::from(*v)),
        MetricValue::Double(v) => float_json(*v),
        MetricValue::Boolean(v) => (*v).into(),
        MetricValue::String(s) => s.clone().into(),
        MetricValue::DateTime(v) => (*v).into(),
        MetricValue::Bytes(b) => byte_array(b),
        MetricValue::DataSet(ds) => dataset_to_value(ds),
        MetricValue::Template(t) => template_to_value(t),
        MetricValue::Int8Array(items) => items.iter().map(|&v| Value::from(v)).collect(),
        MetricValue::Int16Array(items) => items.iter().map(|&v| Value::from(v)).collect(),
        MetricValue::Int32Array(items) => items.iter().map(|&v| Value::from(v)).collect(),
        MetricValue::Int64Array(items) => items.iter().map(|&v| Value::from(v)).collect(),
        MetricValue::UInt8Array(items) => items.iter().map(|&v| Value::from(v)).collect(),
        MetricValue::UInt16Array(items) => items.iter().map(|&v| Value::from(v)).collect(),
        MetricValue::UInt32Array(items) => items.iter().map(|&v| Value::from(v)).collect(),
        MetricValue::UInt64Array(items) => items.iter().map(|&v| Value::from(v)).collect(),
        MetricValue::FloatArray(items) => {
            items.iter().map(|&v| float_json(f64::from(v))).collect()
        }
        MetricValue::DoubleArray(items) => items.iter().map(|&v| float_json(v)).collect(),
        MetricValue::BooleanArray(items) => items.iter().map(|&v| Value::from(v)).collect(),
        MetricValue::StringArray(items) => {
            items.iter().map(|s| Value::from(s.clone())).collect()
        }
        MetricValue::DateTimeArray(items) => items.iter().map(|&v| Value::from(v)).collect(),
    }
}

fn dataset_to_value(ds: &DataSet) -> Value {
    let mut obj = Map::new();
    obj.insert("num_of_columns".into(), ds.columns.len().into());
    obj.insert(
        "columns".into(),
        ds.columns.iter().map(|c| Value::from(c.clone())).collect(),
    );
    obj.insert(
        "types".into(),
        ds.types.iter().map(|t| Value::from(t.code())).collect(),
    );
    obj.insert(
        "rows".into(),
        Value::Array(
            ds.rows
                .iter()
                .map(|row| Value::Array(row.iter().map(value_to_json).collect()))
                .collect(),
        ),
    );
    Value::Object(obj)
}

fn template_to_value(template: &Template) -> Value {
    let mut obj = Map::new();
    if let Some(ref version) = template.version {
        obj.insert("version".into(), version.clone().into());
    }
    if let Some(ref reference) = template.template_ref {
        obj.insert("template_ref".into(), reference.clone().into());
    }
    obj.insert("is_definition".into(), template.is_definition.into());
    obj.insert(
        "metrics".into(),
        Value::Array(template.metrics.iter().map(metric_to_value).collect()),
    );
    obj.insert(
        "parameters".into(),
        Value::Array(template.parameters.iter().map(parameter_to_value).collect()),
    );
    Value::Object(obj)
}

fn parameter_to_value(parameter: &TemplateParameter) -> Value {
    let mut obj = Map::new();
    obj.insert("name".into(), parameter.name.clone().into());
    obj.insert("type".into(), parameter.datatype.code().into());
    if let Some(ref value) = parameter.value {
        obj.insert("value".into(), value_to_json(value));
    }
    Value::Object(obj)
}

fn propertyset_to_value(properties: &PropertySet) -> Value {
    let mut obj = Map::new();
    for (key, property) in properties.iter() {
        let mut inner = Map::new();
        inner.insert("type".into(), property.datatype.code().into());
        match property.value {
            None => {
                inner.insert("is_null".into(), true.into());
            }
            Some(ref value) => {
                inner.insert("value".into(), value_to_json(value));
            }
        }
        obj.insert(key.into(), Value::Object(inner));
    }
    Value::Object(obj)
}

fn metadata_to_value(metadata: &MetaData) -> Value {
    let mut obj = Map::new();
    if metadata.is_multi_part {
        obj.insert("is_multi_part".into(), true.into());
    }
    if let Some(ref v) = metadata.content_type {
        obj.insert("content_type".into(), v.clone().into());
    }
    if let Some(v) = metadata.size {
        obj.insert("size".into(), v.into());
    }
    if let Some(v) = metadata.seq {
        obj.insert("seq".into(), v.into());
    }
    if let Some(ref v) = metadata.file_name {
        obj.insert("file_name".into(), v.clone().into());
    }
    if let Some(ref v) = metadata.file_type {
        obj.insert("file_type".into(), v.clone().into());
    }
    if let Some(ref v) = metadata.md5 {
        obj.insert("md5".into(), v.clone().into());
    }
    if let Some(ref v) = metadata.description {
        obj.insert("description".into(), v.clone().into());
    }
    Value::Object(obj)
}

// =======================================================================
// Decode
// =======================================================================

/// Decode a payload from JSON bytes.
pub fn decode_payload(bytes: &[u8]) -> Result<Payload, DecodeError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| {
        if e.is_eof() {
            DecodeError::truncated(bytes.len(), 1)
        } else {
            DecodeError::schema(format!("invalid JSON: {e}"))
        }
    })?;
    let obj = as_object(&value, "payload")?;

    let mut payload = Payload {
        timestamp: opt_u64(obj, "timestamp")?,
        seq: None,
        metrics: Vec::new(),
        uuid: opt_string(obj, "uuid")?,
        body: None,
    };
    if let Some(raw) = opt_u64(obj, "seq")? {
        if raw > 255 {
            return Err(DecodeError::schema(format!("seq {raw} outside 0-255")));
        }
        payload.seq = Some(raw as u8);
    }
    if let Some(body) = obj.get("body") {
        payload.body = Some(bytes_from_value(body)?);
    }
    if let Some(metrics) = obj.get("metrics") {
        let arr = metrics
            .as_array()
            .ok_or_else(|| DecodeError::schema("'metrics' is not an array"))?;
        payload.metrics = arr.iter().map(metric_from_value).collect::<Result<_, _>>()?;
    }
    Ok(payload)
}

fn metric_from_value(value: &Value) -> Result<Metric, DecodeError> {
    let obj = as_object(value, "metric")?;
    let name = opt_string(obj, "name")?;
    let datatype = match opt_u64(obj, "datatype")? {
        Some(code) => {
            let code =
                u32::try_from(code).map_err(|_| DecodeError::UnknownDatatype(u32::MAX))?;
            DataType::from_code(code)?
        }
        None => DataType::Unknown,
    };
    let is_null = opt_bool(obj, "is_null")?.unwrap_or(false);

    let metric_value = if is_null {
        None
    } else {
        match obj.get("value") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(json_value_to_metric(raw, datatype, name.as_deref())?),
        }
    };

    Ok(Metric {
        name,
        alias: opt_u64(obj, "alias")?,
        datatype,
        value: metric_value,
        timestamp: opt_u64(obj, "timestamp")?,
        is_historical: opt_bool(obj, "is_historical")?.unwrap_or(false),
        is_transient: opt_bool(obj, "is_transient")?.unwrap_or(false),
        properties: match obj.get("properties") {
            Some(v) => Some(propertyset_from_value(v)?),
            None => None,
        },
        metadata: match obj.get("metadata") {
            Some(v) => Some(metadata_from_value(v)?),
            None => None,
        },
    })
}

/// Type-directed JSON value decoding; `Unknown` keeps a provisional
/// scalar for later re-typing against the birth scope.
fn json_value_to_metric(
    value: &Value,
    datatype: DataType,
    name: Option<&str>,
) -> Result<MetricValue, DecodeError> {
    let what = name.unwrap_or("<unnamed metric>");
    match datatype {
        DataType::Unknown => provisional_from_json(value, what),
        DataType::Int8 => signed_from_json(value, i64::from(i8::MIN), i64::from(i8::MAX), what, datatype)
            .map(|v| MetricValue::Int8(v as i8)),
        DataType::Int16 => {
            signed_from_json(value, i64::from(i16::MIN), i64::from(i16::MAX), what, datatype)
                .map(|v| MetricValue::Int16(v as i16))
        }
        DataType::Int32 => {
            signed_from_json(value, i64::from(i32::MIN), i64::from(i32::MAX), what, datatype)
                .map(|v| MetricValue::Int32(v as i32))
        }
        DataType::Int64 => {
            signed_from_json(value, i64::MIN, i64::MAX, what, datatype).map(MetricValue::Int64)
        }
        DataType::UInt8 => unsigned_from_json(value, u64::from(u8::MAX), what, datatype)
            .map(|v| MetricValue::UInt8(v as u8)),
        DataType::UInt16 => unsigned_from_json(value, u64::from(u16::MAX), what, datatype)
            .map(|v| MetricValue::UInt16(v as u16)),
        DataType::UInt32 => unsigned_from_json(value, u64::from(u32::MAX), what, datatype)
            .map(|v| MetricValue::UInt32(v as u32)),
        DataType::UInt64 => {
            unsigned_from_json(value, u64::MAX, what, datatype).map(MetricValue::UInt64)
        }
        DataType::DateTime => {
            unsigned_from_json(value, u64::MAX, what, datatype).map(MetricValue::DateTime)
        }
        DataType::Float => value
            .as_f64()
            .map(|v| MetricValue::Float(v as f32))
            .ok_or_else(|| DecodeError::schema(format!("{what}: Float value is not a number"))),
        DataType::Double => value
            .as_f64()
            .map(MetricValue::Double)
            .ok_or_else(|| DecodeError::schema(format!("{what}: Double value is not a number"))),
        DataType::Boolean => value
            .as_bool()
            .map(MetricValue::Boolean)
            .ok_or_else(|| DecodeError::schema(format!("{what}: Boolean value is not a bool"))),
        DataType::String | DataType::Text | DataType::Uuid => value
            .as_str()
            .map(|s| MetricValue::String(s.to_owned()))
            .ok_or_else(|| DecodeError::schema(format!("{what}: {datatype} value is not a string"))),
        DataType::Bytes | DataType::File => bytes_from_value(value).map(MetricValue::Bytes),
        DataType::DataSet => dataset_from_value(value).map(MetricValue::DataSet),
        DataType::Template => template_from_value(value).map(MetricValue::Template),
        DataType::PropertySet | DataType::PropertySetList => Err(DecodeError::schema(format!(
            "{what}: datatype {datatype} admits no metric value"
        ))),
        array_dt => array_from_value(value, array_dt, what),
    }
}

fn provisional_from_json(value: &Value, what: &str) -> Result<MetricValue, DecodeError> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                Ok(MetricValue::UInt64(v))
            } else if let Some(v) = n.as_i64() {
                Ok(MetricValue::Int64(v))
            } else if let Some(v) = n.as_f64() {
                Ok(MetricValue::Double(v))
            } else {
                Err(DecodeError::schema(format!("{what}: unrepresentable number")))
            }
        }
        Value::Bool(b) => Ok(MetricValue::Boolean(*b)),
        Value::String(s) => Ok(MetricValue::String(s.clone())),
        _ => Err(DecodeError::schema(format!(
            "{what}: structured value requires an explicit datatype"
        ))),
    }
}

fn signed_from_json(
    value: &Value,
    min: i64,
    max: i64,
    what: &str,
    datatype: DataType,
) -> Result<i64, DecodeError> {
    let v = value
        .as_i64()
        .ok_or_else(|| DecodeError::schema(format!("{what}: {datatype} value is not an integer")))?;
    if v < min || v > max {
        return Err(DecodeError::schema(format!(
            "{what}: value {v} exceeds {datatype} width"
        )));
    }
    Ok(v)
}

fn unsigned_from_json(
    value: &Value,
    max: u64,
    what: &str,
    datatype: DataType,
) -> Result<u64, DecodeError> {
    let v = value.as_u64().ok_or_else(|| {
        DecodeError::schema(format!("{what}: {datatype} value is not an unsigned integer"))
    })?;
    if v > max {
        return Err(DecodeError::schema(format!(
            "{what}: value {v} exceeds {datatype} width"
        )));
    }
    Ok(v)
}

fn array_from_value(
    value: &Value,
    datatype: DataType,
    what: &str,
) -> Result<MetricValue, DecodeError> {
    let arr = value
        .as_array()
        .ok_or_else(|| DecodeError::schema(format!("{what}: {datatype} value is not an array")))?;

    macro_rules! collect_signed {
        ($min:expr, $max:expr, $cast:ty, $variant:ident) => {{
            let mut items = Vec::with_capacity(arr.len());
            for item in arr {
                items.push(signed_from_json(item, $min, $max, what, datatype)? as $cast);
            }
            Ok(MetricValue::$variant(items))
        }};
    }
    macro_rules! collect_unsigned {
        ($max:expr, $cast:ty, $variant:ident) => {{
            let mut items = Vec::with_capacity(arr.len());
            for item in arr {
                items.push(unsigned_from_json(item, $max, what, datatype)? as $cast);
            }
            Ok(MetricValue::$variant(items))
        }};
    }

    match datatype {
        DataType::Int8Array => collect_signed!(i64::from(i8::MIN), i64::from(i8::MAX), i8, Int8Array),
        DataType::Int16Array => {
            collect_signed!(i64::from(i16::MIN), i64::from(i16::MAX), i16, Int16Array)
        }
        DataType::Int32Array => {
            collect_signed!(i64::from(i32::MIN), i64::from(i32::MAX), i32, Int32Array)
        }
        DataType::Int64Array => collect_signed!(i64::MIN, i64::MAX, i64, Int64Array),
        DataType::UInt8Array => collect_unsigned!(u64::from(u8::MAX), u8, UInt8Array),
        DataType::UInt16Array => collect_unsigned!(u64::from(u16::MAX), u16, UInt16Array),
        DataType::UInt32Array => collect_unsigned!(u64::from(u32::MAX), u32, UInt32Array),
        DataType::UInt64Array => collect_unsigned!(u64::MAX, u64, UInt64Array),
        DataType::DateTimeArray => collect_unsigned!(u64::MAX, u64, DateTimeArray),
        DataType::FloatArray => {
            let mut items = Vec::with_capacity(arr.len());
            for item in arr {
                let v = item.as_f64().ok_or_else(|| {
                    DecodeError::schema(format!("{what}: FloatArray element is not a number"))
                })?;
                items.push(v as f32);
            }
            Ok(MetricValue::FloatArray(items))
        }
        DataType::DoubleArray => {
            let mut items = Vec::with_capacity(arr.len());
            for item in arr {
                let v = item.as_f64().ok_or_else(|| {
                    DecodeError::schema(format!("{what}: DoubleArray element is not a number"))
                })?;
                items.push(v);
            }
            Ok(MetricValue::DoubleArray(items))
        }
        DataType::BooleanArray => {
            let mut items = Vec::with_capacity(arr.len());
            for item in arr {
                items.push(item.as_bool().ok_or_else(|| {
                    DecodeError::schema(format!("{what}: BooleanArray element is not a bool"))
                })?);
            }
            Ok(MetricValue::BooleanArray(items))
        }
        DataType::StringArray => {
            let mut items = Vec::with_capacity(arr.len());
            for item in arr {
                items.push(
                    item.as_str()
                        .ok_or_else(|| {
                            DecodeError::schema(format!(
                                "{what}: StringArray element is not a string"
                            ))
                        })?
                        .to_owned(),
                );
            }
            Ok(MetricValue::StringArray(items))
        }
        other => Err(DecodeError::schema(format!("{other} is not an array datatype"))),
    }
}

fn bytes_from_value(value: &Value) -> Result<Vec<u8>, DecodeError> {
    let arr = value
        .as_array()
        .ok_or_else(|| DecodeError::schema("bytes value is not an array of numbers"))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let v = item
            .as_u64()
            .filter(|&v| v <= 255)
            .ok_or_else(|| DecodeError::schema("byte outside 0-255"))?;
        out.push(v as u8);
    }
    Ok(out)
}

fn dataset_from_value(value: &Value) -> Result<DataSet, DecodeError> {
    let obj = as_object(value, "dataset")?;
    let columns: Vec<String> = match obj.get("columns") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| DecodeError::schema("dataset column name is not a string"))
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(DecodeError::schema("dataset without 'columns' array")),
    };
    if let Some(n) = opt_u64(obj, "num_of_columns")? {
        if n as usize != columns.len() {
            return Err(DecodeError::schema(format!(
                "dataset declares {n} columns but names {}",
                columns.len()
            )));
        }
    }
    let types: Vec<DataType> = match obj.get("types") {
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let code = item
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| DecodeError::schema("dataset type code is not an integer"))?;
                let dt = DataType::from_code(code)?;
                if !dt.is_scalar() {
                    return Err(DecodeError::schema(format!(
                        "dataset column type {dt} is not scalar"
                    )));
                }
                out.push(dt);
            }
            out
        }
        _ => return Err(DecodeError::schema("dataset without 'types' array")),
    };
    if types.len() != columns.len() {
        return Err(DecodeError::schema(format!(
            "dataset has {} column(s) but {} type(s)",
            columns.len(),
            types.len()
        )));
    }

    let mut rows = Vec::new();
    if let Some(Value::Array(raw_rows)) = obj.get("rows") {
        for (row_idx, raw_row) in raw_rows.iter().enumerate() {
            let cells = raw_row
                .as_array()
                .ok_or_else(|| DecodeError::schema("dataset row is not an array"))?;
            if cells.len() != columns.len() {
                return Err(DecodeError::schema(format!(
                    "dataset row {row_idx} has {} cell(s), expected {}",
                    cells.len(),
                    columns.len()
                )));
            }
            let mut row = Vec::with_capacity(cells.len());
            for (cell, (dt, column)) in cells.iter().zip(types.iter().zip(&columns)) {
                row.push(json_value_to_metric(cell, *dt, Some(column.as_str()))?);
            }
            rows.push(row);
        }
    }
    Ok(DataSet { columns, types, rows })
}

fn template_from_value(value: &Value) -> Result<Template, DecodeError> {
    let obj = as_object(value, "template")?;
    let mut template = Template {
        version: opt_string(obj, "version")?,
        template_ref: opt_string(obj, "template_ref")?,
        is_definition: opt_bool(obj, "is_definition")?.unwrap_or(false),
        metrics: Vec::new(),
        parameters: Vec::new(),
    };
    if let Some(Value::Array(metrics)) = obj.get("metrics") {
        template.metrics = metrics.iter().map(metric_from_value).collect::<Result<_, _>>()?;
    }
    if let Some(Value::Array(parameters)) = obj.get("parameters") {
        for parameter in parameters {
            template.parameters.push(parameter_from_value(parameter)?);
        }
    }
    Ok(template)
}

fn parameter_from_value(value: &Value) -> Result<TemplateParameter, DecodeError> {
    let obj = as_object(value, "template parameter")?;
    let name = opt_string(obj, "name")?
        .ok_or_else(|| DecodeError::schema("template parameter without a name"))?;
    let code = opt_u64(obj, "type")?
        .ok_or_else(|| DecodeError::schema(format!("template parameter '{name}' without type")))?;
    let code = u32::try_from(code).map_err(|_| DecodeError::UnknownDatatype(u32::MAX))?;
    let datatype = DataType::from_code(code)?;
    if !datatype.is_scalar() {
        return Err(DecodeError::schema(format!(
            "template parameter '{name}' has non-scalar type {datatype}"
        )));
    }
    let parameter_value = match obj.get("value") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(json_value_to_metric(raw, datatype, Some(name.as_str()))?),
    };
    Ok(TemplateParameter {
        name,
        datatype,
        value: parameter_value,
    })
}

fn propertyset_from_value(value: &Value) -> Result<PropertySet, DecodeError> {
    let obj = as_object(value, "property set")?;
    let mut set = PropertySet::new();
    for (key, raw) in obj {
        let inner = as_object(raw, "property value")?;
        let code = opt_u64(inner, "type")?
            .ok_or_else(|| DecodeError::schema(format!("property '{key}' without type")))?;
        let code = u32::try_from(code).map_err(|_| DecodeError::UnknownDatatype(u32::MAX))?;
        let datatype = DataType::from_code(code)?;
        if !datatype.is_scalar() {
            return Err(DecodeError::schema(format!(
                "property '{key}' has non-scalar type {datatype}"
            )));
        }
        let prop_value = if opt_bool(inner, "is_null")?.unwrap_or(false) {
            None
        } else {
            match inner.get("value") {
                None | Some(Value::Null) => None,
                Some(raw) => Some(json_value_to_metric(raw, datatype, Some(key.as_str()))?),
            }
        };
        set.insert(
            key.clone(),
            PropertyValue {
                datatype,
                value: prop_value,
            },
        );
    }
    Ok(set)
}

fn metadata_from_value(value: &Value) -> Result<MetaData, DecodeError> {
    let obj = as_object(value, "metadata")?;
    Ok(MetaData {
        is_multi_part: opt_bool(obj, "is_multi_part")?.unwrap_or(false),
        content_type: opt_string(obj, "content_type")?,
        size: opt_u64(obj, "size")?,
        seq: opt_u64(obj, "seq")?,
        file_name: opt_string(obj, "file_name")?,
        file_type: opt_string(obj, "file_type")?,
        md5: opt_string(obj, "md5")?,
        description: opt_string(obj, "description")?,
    })
}

// =======================================================================
// STATE documents (JSON under both schemes)
// =======================================================================

/// Encode a Host Application STATE document.
pub fn encode_state(state: &StatePayload) -> Vec<u8> {
    let mut obj = Map::new();
    obj.insert("online".into(), state.online.into());
    obj.insert("timestamp".into(), state.timestamp.into());
    Value::Object(obj).to_string().into_bytes()
}

/// Decode a Host Application STATE document. Unknown keys are tolerated.
pub fn decode_state(bytes: &[u8]) -> Result<StatePayload, DecodeError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| {
        if e.is_eof() {
            DecodeError::truncated(bytes.len(), 1)
        } else {
            DecodeError::schema(format!("invalid STATE JSON: {e}"))
        }
    })?;
    let obj = as_object(&value, "STATE document")?;
    let online = opt_bool(obj, "online")?
        .ok_or_else(|| DecodeError::schema("STATE document without 'online'"))?;
    let timestamp = opt_u64(obj, "timestamp")?
        .ok_or_else(|| DecodeError::schema("STATE document without 'timestamp'"))?;
    Ok(StatePayload { timestamp, online })
}

// =======================================================================
// JSON access helpers
// =======================================================================

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, DecodeError> {
    value
        .as_object()
        .ok_or_else(|| DecodeError::schema(format!("{what} is not a JSON object")))
}

fn opt_u64(obj: &Map<String, Value>, key: &str) -> Result<Option<u64>, DecodeError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| DecodeError::schema(format!("'{key}' is not an unsigned integer"))),
    }
}

fn opt_bool(obj: &Map<String, Value>, key: &str) -> Result<Option<bool>, DecodeError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| DecodeError::schema(format!("'{key}' is not a boolean"))),
    }
}

fn opt_string(obj: &Map<String, Value>, key: &str) -> Result<Option<String>, DecodeError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_owned()))
            .ok_or_else(|| DecodeError::schema(format!("'{key}' is not a string"))),
    }
}
