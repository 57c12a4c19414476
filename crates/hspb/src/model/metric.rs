// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The metric: named, typed, timestamped value plus quality flags.

use crate::error::{Error, Result};
use crate::model::datatype::DataType;
use crate::model::value::{MetaData, MetricValue, PropertySet};

/// One metric inside a payload.
///
/// `name` is `None` on alias-only DATA metrics (the alias was bound at
/// birth); `value` is `None` for an explicit null while `datatype` stays
/// declared. Fields are public so the codec and session layers can build
/// wire forms directly; [`Metric::new`] is the validating entry point for
/// application code.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: Option<String>,
    pub alias: Option<u64>,
    pub datatype: DataType,
    pub value: Option<MetricValue>,
    /// Sample time, milliseconds since the UNIX epoch.
    pub timestamp: Option<u64>,
    pub is_historical: bool,
    pub is_transient: bool,
    pub properties: Option<PropertySet>,
    pub metadata: Option<MetaData>,
}

impl Metric {
    /// Build a named metric, checking the value against the declared type.
    pub fn new(
        name: impl Into<String>,
        datatype: DataType,
        value: impl Into<MetricValue>,
    ) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        if !value.matches(datatype) {
            return Err(Error::TypeMismatch {
                metric: name,
                declared: datatype,
                value_kind: value.kind_name(),
            });
        }
        Ok(Self {
            name: Some(name),
            alias: None,
            datatype,
            value: Some(value),
            timestamp: None,
            is_historical: false,
            is_transient: false,
            properties: None,
            metadata: None,
        })
    }

    /// Build an explicit-null metric. The datatype stays declared so
    /// receivers keep the type binding.
    pub fn null(name: impl Into<String>, datatype: DataType) -> Self {
        Self {
            name: Some(name.into()),
            alias: None,
            datatype,
            value: None,
            timestamp: None,
            is_historical: false,
            is_transient: false,
            properties: None,
            metadata: None,
        }
    }

    pub fn with_alias(mut self, alias: u64) -> Self {
        self.alias = Some(alias);
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_properties(mut self, properties: PropertySet) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn with_metadata(mut self, metadata: MetaData) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_historical(mut self, is_historical: bool) -> Self {
        self.is_historical = is_historical;
        self
    }

    pub fn with_transient(mut self, is_transient: bool) -> Self {
        self.is_transient = is_transient;
        self
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Report-by-exception check: has the value changed since `previous`?
    ///
    /// Structural comparison; NaN is never equal to itself, so NaN samples
    /// always read as changed.
    pub fn changed_from(&self, previous: &Metric) -> bool {
        self.value != previous.value
    }

    /// Name for diagnostics: the metric name, or the alias when unnamed.
    pub fn display_name(&self) -> String {
        match (&self.name, self.alias) {
            (Some(name), _) => name.clone(),
            (None, Some(alias)) => format!("alias {alias}"),
            (None, None) => "<unnamed>".into(),
        }
    }

    /// Replace the value, keeping the declared datatype binding.
    pub fn set_value(&mut self, value: MetricValue) -> Result<()> {
        if !value.matches(self.datatype) {
            return Err(Error::TypeMismatch {
                metric: self.display_name(),
                declared: self.datatype,
                value_kind: value.kind_name(),
            });
        }
        self.value = Some(value);
        Ok(())
    }
}
