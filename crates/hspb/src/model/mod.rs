// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metric value model: datatypes, values, metrics, payloads.
//!
//! Everything here is plain data. Wire formats live in `codec`, sequencing
//! rules in `session`. The split keeps the model testable without bytes.

pub mod datatype;
pub mod metric;
pub mod payload;
pub mod value;

pub use datatype::DataType;
pub use metric::Metric;
pub use payload::{now_millis, Payload, StatePayload};
pub use value::{
    DataSet, MetaData, MetricValue, PropertySet, PropertyValue, Template, TemplateParameter,
    TemplateRegistry,
};
