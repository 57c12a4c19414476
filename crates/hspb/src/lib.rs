// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # hspb - Sparkplug B protocol engine
//!
//! A pure Rust implementation of the Eclipse Sparkplug B specification:
//! payload codecs (binary protobuf and structured text), the topic
//! namespace, birth/death/data session semantics, and the three entity
//! roles (Edge Node, Host Application, Data Ops relay) that industrial
//! deployments are built from.
//!
//! ## Quick Start
//!
//! ```rust
//! use hspb::model::{DataType, Metric, MetricValue};
//! use hspb::{
//!     Credentials, EdgeNode, HostApplication, HostConfig, InMemoryBroker, InMemoryTransport,
//!     NodeConfig,
//! };
//!
//! fn main() -> hspb::Result<()> {
//!     let broker = InMemoryBroker::new();
//!
//!     // Consuming side: a host application watching one group.
//!     let mut host = HostApplication::new(
//!         "scada-primary",
//!         HostConfig::default(),
//!         InMemoryTransport::new(&broker),
//!     )?;
//!     host.connect("inmem://local", &Credentials::new("scada-primary"), &["FactoryA"])?;
//!
//!     // Publishing side: an edge node with a two-metric scope.
//!     let scope = vec![
//!         Metric::new("Temperature", DataType::Double, 21.5)?,
//!         Metric::new("Running", DataType::Boolean, true)?,
//!     ];
//!     let mut node = EdgeNode::new(
//!         "FactoryA",
//!         "Line1",
//!         scope,
//!         NodeConfig::default(),
//!         InMemoryTransport::new(&broker),
//!     )?;
//!     node.connect("inmem://local", &Credentials::new("line1"))?;
//!     node.update(vec![Metric::new("Temperature", DataType::Double, 22.0)?])?;
//!
//!     // The host mirrors the birth and the update.
//!     host.pump()?;
//!     let temp = host.view().metric("FactoryA", "Line1", "Temperature");
//!     assert_eq!(temp.and_then(|m| m.value), Some(MetricValue::Double(22.0)));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                           Entity Layer                             |
//! |      EdgeNode / Device  |  HostApplication  |  DataOpsNode         |
//! +--------------------------------------------------------------------+
//! |                          Session Layer                             |
//! |   seq / bdSeq counters | metric registry | per-node mirrors        |
//! +--------------------------------------------------------------------+
//! |                           Codec Layer                              |
//! |   binary protobuf | structured text (JSON) | STATE documents       |
//! +--------------------------------------------------------------------+
//! |                         Transport Layer                            |
//! |   Transport trait | retained store + last-will (in-memory broker)  |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`EdgeNode`] | Publishing entity: owns a metric scope, drives births, data and deaths |
//! | [`HostApplication`] | Consuming entity: mirrors every node of the watched groups |
//! | [`DataOpsNode`] | Relay entity: consumes, transforms and republishes under its own identity |
//! | [`Payload`] | Timestamp, sequence number and metric list of one message |
//! | [`Metric`] | Named, typed value with alias, properties and flags |
//! | [`Topic`] | Parsed, validated `spBv1.0` topic |
//!
//! ## Protocol Notes
//!
//! - Sequence numbers run 0-255 and wrap; every birth restarts the run at 0.
//! - `bdSeq` pairs an NDEATH to the NBIRTH it certifies; mismatched deaths
//!   are stale and ignored.
//! - Births are published retained by default (a documented deviation from
//!   base Sparkplug) so late-joining hosts recover scope without a rebirth
//!   round-trip.
//!
//! ## Modules Overview
//!
//! - [`entity`] - Edge Node, Host Application, Data Ops relay (start here)
//! - [`model`] - Datatypes, values, metrics, payloads
//! - [`codec`] - Wire formats (binary protobuf, structured text)
//! - [`session`] - Sequence tracking and consuming-side mirrors
//! - [`topic`] - Topic grammar, parsing, subscription filters
//! - [`transport`] - Broker boundary and the in-memory implementation
//! - [`config`] - Protocol constants and per-entity configuration
//!
//! ## See Also
//!
//! - [Sparkplug Specification](https://sparkplug.eclipse.org/specification/)
//! - [Eclipse Tahu](https://github.com/eclipse-tahu/tahu)

/// Payload wire formats: binary protobuf, structured text, STATE documents.
pub mod codec;
/// Protocol constants and per-entity configuration.
pub mod config;
/// Protocol entities: Edge Node, Host Application, Data Ops relay.
pub mod entity;
/// Error and result types for the whole crate.
pub mod error;
/// Metric value model: datatypes, values, metrics, payloads.
pub mod model;
/// Session state: sequence counters and consuming-side mirrors.
pub mod session;
/// Sparkplug B topic grammar.
pub mod topic;
/// Transport boundary and the in-memory broker.
pub mod transport;

pub use codec::EncodingScheme;
pub use config::{HostConfig, NodeConfig};
pub use entity::{
    CommandHook, DataOpsNode, Device, EdgeNode, EntityState, FaultReason, HostApplication,
    HostView, TransformHook,
};
pub use error::{DecodeError, Error, Result};
pub use model::{DataType, Metric, MetricValue, Payload, StatePayload};
pub use session::EdgeNodeSession;
pub use topic::{MessageType, Topic};
pub use transport::{
    Credentials, InMemoryBroker, InMemoryTransport, InboundMessage, LastWill, QoS, Transport,
};

/// Crate version string.
pub const VERSION: &str = "0.2.0";
