// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metric value union and the composite value types.
//!
//! [`MetricValue`] is a closed tagged union with one case per value shape.
//! Every encode/decode site matches exhaustively, so adding a datatype is a
//! compile-guided change. Null is NOT a case here: a null metric is a
//! `Metric` whose `value` is `None` while its datatype stays declared.

use crate::error::{Error, Result};
use crate::model::datatype::DataType;
use crate::model::metric::Metric;
use std::collections::HashMap;

// =======================================================================
// MetricValue
// =======================================================================

/// A concrete metric value.
///
/// `String` backs the String/Text/Uuid datatypes and `Bytes` backs
/// Bytes/File; the declared [`DataType`] on the owning metric keeps them
/// apart on the wire. `DateTime` is milliseconds since the UNIX epoch.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    String(String),
    DateTime(u64),
    Bytes(Vec<u8>),
    DataSet(DataSet),
    Template(Template),
    Int8Array(Vec<i8>),
    Int16Array(Vec<i16>),
    Int32Array(Vec<i32>),
    Int64Array(Vec<i64>),
    UInt8Array(Vec<u8>),
    UInt16Array(Vec<u16>),
    UInt32Array(Vec<u32>),
    UInt64Array(Vec<u64>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
    BooleanArray(Vec<bool>),
    StringArray(Vec<String>),
    DateTimeArray(Vec<u64>),
}

impl MetricValue {
    /// True when this value shape is legal for the declared datatype.
    ///
    /// PropertySet/PropertySetList/Unknown datatypes admit no value shape
    /// at all (they may only appear as null metrics).
    pub fn matches(&self, datatype: DataType) -> bool {
        match self {
            MetricValue::Int8(_) => datatype == DataType::Int8,
            MetricValue::Int16(_) => datatype == DataType::Int16,
            MetricValue::Int32(_) => datatype == DataType::Int32,
            MetricValue::Int64(_) => datatype == DataType::Int64,
            MetricValue::UInt8(_) => datatype == DataType::UInt8,
            MetricValue::UInt16(_) => datatype == DataType::UInt16,
            MetricValue::UInt32(_) => datatype == DataType::UInt32,
            MetricValue::UInt64(_) => datatype == DataType::UInt64,
            MetricValue::Float(_) => datatype == DataType::Float,
            MetricValue::Double(_) => datatype == DataType::Double,
            MetricValue::Boolean(_) => datatype == DataType::Boolean,
            MetricValue::String(_) => matches!(
                datatype,
                DataType::String | DataType::Text | DataType::Uuid
            ),
            MetricValue::DateTime(_) => datatype == DataType::DateTime,
            MetricValue::Bytes(_) => matches!(datatype, DataType::Bytes | DataType::File),
            MetricValue::DataSet(_) => datatype == DataType::DataSet,
            MetricValue::Template(_) => datatype == DataType::Template,
            MetricValue::Int8Array(_) => datatype == DataType::Int8Array,
            MetricValue::Int16Array(_) => datatype == DataType::Int16Array,
            MetricValue::Int32Array(_) => datatype == DataType::Int32Array,
            MetricValue::Int64Array(_) => datatype == DataType::Int64Array,
            MetricValue::UInt8Array(_) => datatype == DataType::UInt8Array,
            MetricValue::UInt16Array(_) => datatype == DataType::UInt16Array,
            MetricValue::UInt32Array(_) => datatype == DataType::UInt32Array,
            MetricValue::UInt64Array(_) => datatype == DataType::UInt64Array,
            MetricValue::FloatArray(_) => datatype == DataType::FloatArray,
            MetricValue::DoubleArray(_) => datatype == DataType::DoubleArray,
            MetricValue::BooleanArray(_) => datatype == DataType::BooleanArray,
            MetricValue::StringArray(_) => datatype == DataType::StringArray,
            MetricValue::DateTimeArray(_) => datatype == DataType::DateTimeArray,
        }
    }

    /// Name of the value shape, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            MetricValue::Int8(_) => "Int8",
            MetricValue::Int16(_) => "Int16",
            MetricValue::Int32(_) => "Int32",
            MetricValue::Int64(_) => "Int64",
            MetricValue::UInt8(_) => "UInt8",
            MetricValue::UInt16(_) => "UInt16",
            MetricValue::UInt32(_) => "UInt32",
            MetricValue::UInt64(_) => "UInt64",
            MetricValue::Float(_) => "Float",
            MetricValue::Double(_) => "Double",
            MetricValue::Boolean(_) => "Boolean",
            MetricValue::String(_) => "String",
            MetricValue::DateTime(_) => "DateTime",
            MetricValue::Bytes(_) => "Bytes",
            MetricValue::DataSet(_) => "DataSet",
            MetricValue::Template(_) => "Template",
            MetricValue::Int8Array(_) => "Int8Array",
            MetricValue::Int16Array(_) => "Int16Array",
            MetricValue::Int32Array(_) => "Int32Array",
            MetricValue::Int64Array(_) => "Int64Array",
            MetricValue::UInt8Array(_) => "UInt8Array",
            MetricValue::UInt16Array(_) => "UInt16Array",
            MetricValue::UInt32Array(_) => "UInt32Array",
            MetricValue::UInt64Array(_) => "UInt64Array",
            MetricValue::FloatArray(_) => "FloatArray",
            MetricValue::DoubleArray(_) => "DoubleArray",
            MetricValue::BooleanArray(_) => "BooleanArray",
            MetricValue::StringArray(_) => "StringArray",
            MetricValue::DateTimeArray(_) => "DateTimeArray",
        }
    }

    /// Natural datatype for a value built without an explicit declaration.
    ///
    /// String maps to `String` (not Text/Uuid) and Bytes to `Bytes` (not
    /// File); callers needing the narrower declaration pass it explicitly.
    pub fn infer_datatype(&self) -> DataType {
        match self {
            MetricValue::Int8(_) => DataType::Int8,
            MetricValue::Int16(_) => DataType::Int16,
            MetricValue::Int32(_) => DataType::Int32,
            MetricValue::Int64(_) => DataType::Int64,
            MetricValue::UInt8(_) => DataType::UInt8,
            MetricValue::UInt16(_) => DataType::UInt16,
            MetricValue::UInt32(_) => DataType::UInt32,
            MetricValue::UInt64(_) => DataType::UInt64,
            MetricValue::Float(_) => DataType::Float,
            MetricValue::Double(_) => DataType::Double,
            MetricValue::Boolean(_) => DataType::Boolean,
            MetricValue::String(_) => DataType::String,
            MetricValue::DateTime(_) => DataType::DateTime,
            MetricValue::Bytes(_) => DataType::Bytes,
            MetricValue::DataSet(_) => DataType::DataSet,
            MetricValue::Template(_) => DataType::Template,
            MetricValue::Int8Array(_) => DataType::Int8Array,
            MetricValue::Int16Array(_) => DataType::Int16Array,
            MetricValue::Int32Array(_) => DataType::Int32Array,
            MetricValue::Int64Array(_) => DataType::Int64Array,
            MetricValue::UInt8Array(_) => DataType::UInt8Array,
            MetricValue::UInt16Array(_) => DataType::UInt16Array,
            MetricValue::UInt32Array(_) => DataType::UInt32Array,
            MetricValue::UInt64Array(_) => DataType::UInt64Array,
            MetricValue::FloatArray(_) => DataType::FloatArray,
            MetricValue::DoubleArray(_) => DataType::DoubleArray,
            MetricValue::BooleanArray(_) => DataType::BooleanArray,
            MetricValue::StringArray(_) => DataType::StringArray,
            MetricValue::DateTimeArray(_) => DataType::DateTimeArray,
        }
    }
}

macro_rules! impl_value_from {
    ($($from:ty => $variant:ident),* $(,)?) => {
        $(impl From<$from> for MetricValue {
            fn from(v: $from) -> Self {
                MetricValue::$variant(v)
            }
        })*
    };
}

impl_value_from! {
    i8 => Int8, i16 => Int16, i32 => Int32, i64 => Int64,
    u8 => UInt8, u16 => UInt16, u32 => UInt32, u64 => UInt64,
    f32 => Float, f64 => Double, bool => Boolean,
    String => String, Vec<u8> => Bytes,
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::String(v.to_owned())
    }
}

// =======================================================================
// DataSet
// =======================================================================

/// Tabular value: named columns, per-column scalar types, rows of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    pub columns: Vec<String>,
    pub types: Vec<DataType>,
    pub rows: Vec<Vec<MetricValue>>,
}

impl DataSet {
    /// Build a dataset, validating shape and cell types.
    ///
    /// Column count must equal type count, every row must have one cell
    /// per column, every declared type must be scalar, and every cell must
    /// match its column's type.
    pub fn new(
        columns: Vec<String>,
        types: Vec<DataType>,
        rows: Vec<Vec<MetricValue>>,
    ) -> Result<Self> {
        if columns.len() != types.len() {
            return Err(Error::InvalidPayload(format!(
                "dataset declares {} columns but {} types",
                columns.len(),
                types.len()
            )));
        }
        for (column, dt) in columns.iter().zip(&types) {
            if !dt.is_scalar() {
                return Err(Error::InvalidPayload(format!(
                    "dataset column '{column}' has non-scalar type {dt}"
                )));
            }
        }
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(Error::InvalidPayload(format!(
                    "dataset row {row_idx} has {} cells, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
            for ((cell, dt), column) in row.iter().zip(&types).zip(&columns) {
                if !cell.matches(*dt) {
                    return Err(Error::TypeMismatch {
                        metric: column.clone(),
                        declared: *dt,
                        value_kind: cell.kind_name(),
                    });
                }
            }
        }
        Ok(Self { columns, types, rows })
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

// =======================================================================
// Template
// =======================================================================

/// User-defined structured type: a definition (published at birth) or an
/// instance referencing one by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub version: Option<String>,
    /// Name of the definition this instance conforms to. `None` on
    /// definitions themselves.
    pub template_ref: Option<String>,
    pub is_definition: bool,
    pub metrics: Vec<Metric>,
    pub parameters: Vec<TemplateParameter>,
}

impl Template {
    /// A definition template (no `template_ref`).
    pub fn definition(metrics: Vec<Metric>, parameters: Vec<TemplateParameter>) -> Self {
        Self {
            version: None,
            template_ref: None,
            is_definition: true,
            metrics,
            parameters,
        }
    }

    /// An instance of the named definition.
    pub fn instance(
        template_ref: impl Into<String>,
        metrics: Vec<Metric>,
        parameters: Vec<TemplateParameter>,
    ) -> Self {
        Self {
            version: None,
            template_ref: Some(template_ref.into()),
            is_definition: false,
            metrics,
            parameters,
        }
    }
}

/// Named, typed parameter of a template.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateParameter {
    pub name: String,
    pub datatype: DataType,
    pub value: Option<MetricValue>,
}

impl TemplateParameter {
    /// Validating constructor: scalar datatype, value matches or is null.
    pub fn new(
        name: impl Into<String>,
        datatype: DataType,
        value: Option<MetricValue>,
    ) -> Result<Self> {
        let name = name.into();
        if !datatype.is_scalar() {
            return Err(Error::InvalidPayload(format!(
                "template parameter '{name}' has non-scalar type {datatype}"
            )));
        }
        if let Some(ref v) = value {
            if !v.matches(datatype) {
                return Err(Error::TypeMismatch {
                    metric: name,
                    declared: datatype,
                    value_kind: v.kind_name(),
                });
            }
        }
        Ok(Self { name, datatype, value })
    }
}

/// Birth-scoped store of template definitions.
///
/// Births register definitions; instances arriving later are checked
/// against them. Always an explicit value owned by a session, never
/// global state.
#[derive(Debug, Default, Clone)]
pub struct TemplateRegistry {
    definitions: HashMap<String, Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under the metric name that carried it.
    pub fn register(&mut self, name: impl Into<String>, template: &Template) -> Result<()> {
        let name = name.into();
        if !template.is_definition {
            return Err(Error::InvalidPayload(format!(
                "template '{name}' is an instance, only definitions register"
            )));
        }
        self.definitions.insert(name, template.clone());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.definitions.get(name)
    }

    /// Validate an instance against its referenced definition.
    ///
    /// The reference must resolve and every member metric name must exist
    /// in the definition.
    pub fn check_instance(&self, instance: &Template) -> Result<()> {
        let reference = match instance.template_ref {
            Some(ref r) => r,
            None => {
                return Err(Error::InvalidPayload(
                    "template instance has no template_ref".into(),
                ))
            }
        };
        let definition = self.definitions.get(reference).ok_or_else(|| {
            Error::InvalidPayload(format!("template_ref '{reference}' is not a known definition"))
        })?;
        for member in &instance.metrics {
            let member_name = member.name.as_deref().unwrap_or("");
            if !definition
                .metrics
                .iter()
                .any(|m| m.name.as_deref() == Some(member_name))
            {
                return Err(Error::InvalidPayload(format!(
                    "template instance of '{reference}' carries undeclared member '{member_name}'"
                )));
            }
        }
        Ok(())
    }

    /// Drop all definitions (death of the owning scope).
    pub fn clear(&mut self) {
        self.definitions.clear();
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

// =======================================================================
// PropertySet
// =======================================================================

/// Ordered name/value property map attached to a metric.
///
/// Insertion order is preserved through both encoding schemes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertySet {
    entries: Vec<(String, PropertyValue)>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Replacement keeps the key's original position.
    pub fn insert(&mut self, key: impl Into<String>, value: PropertyValue) {
        let key = key.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Typed property value: scalar or explicit null.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValue {
    pub datatype: DataType,
    pub value: Option<MetricValue>,
}

impl PropertyValue {
    /// Validating constructor: scalar datatype, value matches or is null.
    pub fn new(datatype: DataType, value: Option<MetricValue>) -> Result<Self> {
        if !datatype.is_scalar() {
            return Err(Error::InvalidPayload(format!(
                "property values are scalar-or-null, got type {datatype}"
            )));
        }
        if let Some(ref v) = value {
            if !v.matches(datatype) {
                return Err(Error::TypeMismatch {
                    metric: "<property>".into(),
                    declared: datatype,
                    value_kind: v.kind_name(),
                });
            }
        }
        Ok(Self { datatype, value })
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }
}

// =======================================================================
// MetaData
// =======================================================================

/// Out-of-band descriptor for file/blob metrics, carried opaquely.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetaData {
    pub is_multi_part: bool,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub seq: Option<u64>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub md5: Option<String>,
    pub description: Option<String>,
}

impl MetaData {
    /// True when every field is at its default (nothing to encode).
    pub fn is_empty(&self) -> bool {
        *self == MetaData::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_matches_declared_datatype() {
        assert!(MetricValue::Int8(-3).matches(DataType::Int8));
        assert!(!MetricValue::Int8(-3).matches(DataType::Int16), "no implicit widening");
        assert!(MetricValue::String("u".into()).matches(DataType::Uuid));
        assert!(MetricValue::String("t".into()).matches(DataType::Text));
        assert!(MetricValue::Bytes(vec![1]).matches(DataType::File));
        assert!(!MetricValue::Boolean(true).matches(DataType::Int8));
        assert!(MetricValue::DateTimeArray(vec![1]).matches(DataType::DateTimeArray));
    }

    #[test]
    fn test_value_infer_datatype_prefers_wide_names() {
        assert_eq!(MetricValue::from("hello").infer_datatype(), DataType::String);
        assert_eq!(MetricValue::Bytes(vec![0]).infer_datatype(), DataType::Bytes);
        assert_eq!(MetricValue::from(1.5f64).infer_datatype(), DataType::Double);
    }

    #[test]
    fn test_float_nan_is_never_equal() {
        let a = MetricValue::Double(f64::NAN);
        let b = MetricValue::Double(f64::NAN);
        assert_ne!(a, b, "NaN values always compare unequal, so NaN always reads as changed");
    }

    #[test]
    fn test_dataset_new_validates_shape() {
        let ok = DataSet::new(
            vec!["a".into(), "b".into()],
            vec![DataType::Int32, DataType::String],
            vec![vec![MetricValue::Int32(1), MetricValue::from("x")]],
        );
        assert!(ok.is_ok(), "well-formed dataset should construct");

        let arity = DataSet::new(
            vec!["a".into()],
            vec![DataType::Int32, DataType::String],
            vec![],
        );
        assert!(
            matches!(arity, Err(Error::InvalidPayload(_))),
            "column/type arity mismatch should be rejected"
        );

        let row = DataSet::new(
            vec!["a".into(), "b".into()],
            vec![DataType::Int32, DataType::String],
            vec![vec![MetricValue::Int32(1)]],
        );
        assert!(matches!(row, Err(Error::InvalidPayload(_))), "short row should be rejected");

        let cell = DataSet::new(
            vec!["a".into()],
            vec![DataType::Int32],
            vec![vec![MetricValue::Boolean(true)]],
        );
        match cell {
            Err(Error::TypeMismatch { metric, declared, value_kind }) => {
                assert_eq!(metric, "a");
                assert_eq!(declared, DataType::Int32);
                assert_eq!(value_kind, "Boolean");
            }
            other => panic!("cell type violation should be TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_dataset_rejects_composite_column_type() {
        let ds = DataSet::new(vec!["a".into()], vec![DataType::DataSet], vec![]);
        assert!(
            matches!(ds, Err(Error::InvalidPayload(_))),
            "dataset columns must be scalar types"
        );
    }

    #[test]
    fn test_property_value_scalar_or_null() {
        let ok = PropertyValue::new(DataType::String, Some(MetricValue::from("v")));
        assert!(ok.is_ok());

        let null = PropertyValue::new(DataType::Int64, None).expect("null property is legal");
        assert!(null.is_null());

        let bad = PropertyValue::new(DataType::Int64, Some(MetricValue::Boolean(false)));
        assert!(matches!(bad, Err(Error::TypeMismatch { .. })));

        let composite = PropertyValue::new(DataType::DataSet, None);
        assert!(
            matches!(composite, Err(Error::InvalidPayload(_))),
            "composite property types are rejected"
        );
    }

    #[test]
    fn test_property_set_preserves_insertion_order() {
        let mut props = PropertySet::new();
        let v = |s: &str| PropertyValue::new(DataType::String, Some(MetricValue::from(s)));
        props.insert("engUnit", v("degC").expect("valid property"));
        props.insert("engHigh", v("100").expect("valid property"));
        props.insert("engLow", v("0").expect("valid property"));
        // Replacing must not move the key.
        props.insert("engHigh", v("120").expect("valid property"));

        let keys: Vec<&str> = props.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec!["engUnit", "engHigh", "engLow"],
            "iteration order should be first-insertion order"
        );
        assert_eq!(
            props.get("engHigh").and_then(|p| p.value.clone()),
            Some(MetricValue::from("120")),
            "replacement should update the value in place"
        );
    }

    #[test]
    fn test_template_registry_checks_instances() {
        let member = Metric::null("Setpoint", DataType::Double);
        let definition = Template::definition(vec![member], vec![]);

        let mut registry = TemplateRegistry::new();
        registry
            .register("Motor", &definition)
            .expect("definition should register");

        let good = Template::instance(
            "Motor",
            vec![Metric::new("Setpoint", DataType::Double, MetricValue::Double(42.0))
                .expect("valid metric")],
            vec![],
        );
        assert!(registry.check_instance(&good).is_ok());

        let unknown_ref = Template::instance("Pump", vec![], vec![]);
        assert!(
            registry.check_instance(&unknown_ref).is_err(),
            "instance of unregistered definition should fail"
        );

        let bad_member = Template::instance(
            "Motor",
            vec![Metric::new("Rpm", DataType::Double, MetricValue::Double(1.0))
                .expect("valid metric")],
            vec![],
        );
        assert!(
            registry.check_instance(&bad_member).is_err(),
            "undeclared member should fail the instance check"
        );

        let instance_register = registry.register("Motor2", &good);
        assert!(
            instance_register.is_err(),
            "only definitions may be registered"
        );
    }

    #[test]
    fn test_template_parameter_validation() {
        assert!(TemplateParameter::new("p", DataType::Int32, Some(MetricValue::Int32(5))).is_ok());
        assert!(TemplateParameter::new("p", DataType::Int32, None).is_ok());
        assert!(
            TemplateParameter::new("p", DataType::Template, None).is_err(),
            "parameter types must be scalar"
        );
        assert!(
            TemplateParameter::new("p", DataType::Int32, Some(MetricValue::from("x"))).is_err(),
            "parameter value must match its type"
        );
    }

    #[test]
    fn test_metadata_empty_detection() {
        assert!(MetaData::default().is_empty());
        let md = MetaData {
            file_name: Some("fw.bin".into()),
            ..MetaData::default()
        };
        assert!(!md.is_empty());
    }
}
