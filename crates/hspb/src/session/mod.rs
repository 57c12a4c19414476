// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session state for the consuming side.
//!
//! An [`EdgeNodeSession`] mirrors one remote edge node: the metric scope
//! its birth declared ([`MetricRegistry`]), the sequence run
//! ([`SeqTracker`]), the bdSeq pairing births to deaths, and one
//! [`DeviceSession`] per attached device. All `apply_*` operations are
//! strict: anything that violates the declared scope or the sequence
//! run comes back as an error, and the caller decides between faulting
//! and ignoring. A faulted mirror resynchronizes on the next birth.

pub mod seq;

pub use seq::{BdSeqCounter, SeqCounter, SeqTracker};

use crate::codec;
use crate::entity::{EntityState, FaultReason};
use crate::error::{DecodeError, Error, Result};
use crate::model::{now_millis, DataType, Metric, MetricValue, Payload, TemplateRegistry};
use std::collections::HashMap;

// =======================================================================
// MetricRegistry
// =======================================================================

/// The metric scope a birth declared, plus the latest value per metric.
///
/// Keeps birth insertion order for snapshots. Historical samples
/// (`is_historical`) resolve and validate like any update but do not
/// overwrite the current value.
#[derive(Debug, Default, Clone)]
pub struct MetricRegistry {
    by_name: HashMap<String, Metric>,
    aliases: HashMap<u64, String>,
    order: Vec<String>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the scope with a birth's metric list.
    pub fn register_birth(&mut self, metrics: &[Metric]) -> Result<()> {
        self.clear();
        for metric in metrics {
            let name = metric.name.clone().ok_or_else(|| {
                Error::InvalidPayload("birth metric without a name".to_string())
            })?;
            if metric.datatype == DataType::Unknown {
                return Err(DecodeError::schema(format!(
                    "birth metric '{name}' declares no datatype"
                ))
                .into());
            }
            if let Some(alias) = metric.alias {
                if let Some(bound) = self.aliases.get(&alias) {
                    if bound != &name {
                        return Err(Error::DuplicateAlias {
                            alias,
                            bound_to: bound.clone(),
                        });
                    }
                }
                self.aliases.insert(alias, name.clone());
            }
            if self.by_name.insert(name.clone(), metric.clone()).is_some() {
                log::warn!("[MetricRegistry::register_birth] duplicate metric '{name}', last wins");
            } else {
                self.order.push(name);
            }
        }
        Ok(())
    }

    /// Resolve an update against the scope and fold it in.
    ///
    /// Returns the fully resolved metric (name filled in, value pinned
    /// to the declared datatype).
    pub fn apply_update(&mut self, incoming: &Metric) -> Result<Metric> {
        let name = match (&incoming.name, incoming.alias) {
            (Some(name), _) => {
                if !self.by_name.contains_key(name) {
                    return Err(Error::UnknownMetric(name.clone()));
                }
                name.clone()
            }
            (None, Some(alias)) => self
                .aliases
                .get(&alias)
                .cloned()
                .ok_or_else(|| {
                    Error::from(DecodeError::schema(format!("alias {alias} not in birth scope")))
                })?,
            (None, None) => {
                return Err(Error::InvalidPayload(
                    "metric carries neither name nor alias".to_string(),
                ))
            }
        };

        // Registered entry exists, resolution above guarantees it.
        let declared = self.by_name[&name].datatype;
        if incoming.datatype != DataType::Unknown && incoming.datatype != declared {
            return Err(DecodeError::schema(format!(
                "'{name}' changed datatype from {declared} to {}",
                incoming.datatype
            ))
            .into());
        }
        let value = match incoming.value.clone() {
            None => None,
            Some(v) => Some(codec::retype_value(v, declared, &name)?),
        };

        let resolved = Metric {
            name: Some(name.clone()),
            alias: self.by_name[&name].alias,
            datatype: declared,
            value,
            timestamp: incoming.timestamp,
            is_historical: incoming.is_historical,
            is_transient: incoming.is_transient,
            properties: incoming.properties.clone(),
            metadata: incoming.metadata.clone(),
        };

        if !resolved.is_historical {
            let stored = self.by_name.get_mut(&name).ok_or_else(|| {
                Error::InvalidState(format!("metric '{name}' vanished from scope"))
            })?;
            stored.value = resolved.value.clone();
            if resolved.timestamp.is_some() {
                stored.timestamp = resolved.timestamp;
            }
            if resolved.properties.is_some() {
                stored.properties = resolved.properties.clone();
            }
        }
        Ok(resolved)
    }

    pub fn get(&self, name: &str) -> Option<&Metric> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Metric names in birth order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Current state of every metric, in birth order.
    pub fn snapshot(&self) -> Vec<Metric> {
        self.order
            .iter()
            .filter_map(|name| self.by_name.get(name).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
        self.aliases.clear();
        self.order.clear();
    }
}

// =======================================================================
// DeviceSession
// =======================================================================

/// Mirror of one device attached to a remote edge node.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    device_id: String,
    online: bool,
    metrics: MetricRegistry,
    last_update: u64,
}

impl DeviceSession {
    fn new(device_id: String) -> Self {
        Self {
            device_id,
            online: false,
            metrics: MetricRegistry::new(),
            last_update: 0,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn metrics(&self) -> &MetricRegistry {
        &self.metrics
    }

    pub fn last_update(&self) -> u64 {
        self.last_update
    }
}

// =======================================================================
// EdgeNodeSession
// =======================================================================

/// Mirror of one remote edge node, as seen by a consumer.
#[derive(Debug, Clone)]
pub struct EdgeNodeSession {
    group_id: String,
    edge_node_id: String,
    state: EntityState,
    bd_seq: Option<u8>,
    tracker: SeqTracker,
    metrics: MetricRegistry,
    templates: TemplateRegistry,
    devices: HashMap<String, DeviceSession>,
    birth_retained: bool,
    last_update: u64,
}

impl EdgeNodeSession {
    pub fn new(group_id: impl Into<String>, edge_node_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            edge_node_id: edge_node_id.into(),
            state: EntityState::Offline,
            bd_seq: None,
            tracker: SeqTracker::new(),
            metrics: MetricRegistry::new(),
            templates: TemplateRegistry::new(),
            devices: HashMap::new(),
            birth_retained: false,
            last_update: 0,
        }
    }

    fn context(&self) -> String {
        format!("{}/{}", self.group_id, self.edge_node_id)
    }

    /// Apply an NBIRTH. Resynchronizes sequence tracking, replaces the
    /// metric scope and drops stale device mirrors (their DBIRTHs
    /// follow the node birth).
    pub fn apply_node_birth(&mut self, payload: &Payload, retained: bool) -> Result<()> {
        let seq = payload
            .seq
            .ok_or_else(|| Error::InvalidPayload("NBIRTH has no seq".to_string()))?;
        let bd_seq = payload.bd_seq()?;
        self.metrics.register_birth(&payload.metrics)?;
        self.register_templates(&payload.metrics)?;

        self.tracker.birth(seq);
        self.bd_seq = Some(bd_seq);
        self.devices.clear();
        self.birth_retained = retained;
        self.last_update = now_millis();
        self.state = self.state.advance(EntityState::Online, &self.context());
        log::info!(
            "[EdgeNodeSession::apply_node_birth] {} online, bdSeq {bd_seq}, {} metric(s)",
            self.context(),
            self.metrics.len()
        );
        Ok(())
    }

    /// Apply an NDATA. Returns the resolved metrics.
    pub fn apply_node_data(&mut self, payload: &Payload) -> Result<Vec<Metric>> {
        self.check_online("NDATA")?;
        self.check_seq(payload)?;
        let resolved = self.resolve_all(None, &payload.metrics)?;
        self.last_update = now_millis();
        Ok(resolved)
    }

    /// Apply an NDEATH, pairing it to the current birth by bdSeq.
    ///
    /// Returns `false` (and leaves the mirror alone) when the death is
    /// stale, i.e. names a bdSeq other than the one the current birth
    /// carried. Stale deaths are a normal artifact of rebirth cycles:
    /// the will registered at connect time outlives an in-session
    /// rebirth.
    pub fn apply_node_death(&mut self, payload: &Payload) -> Result<bool> {
        let death_bd = payload.bd_seq()?;
        if self.bd_seq != Some(death_bd) {
            log::info!(
                "[EdgeNodeSession::apply_node_death] {} stale death (bdSeq {death_bd}, session {:?})",
                self.context(),
                self.bd_seq
            );
            return Ok(false);
        }
        for device in self.devices.values_mut() {
            device.online = false;
        }
        self.metrics.clear();
        self.templates.clear();
        self.last_update = now_millis();
        self.state = self.state.advance(EntityState::Offline, &self.context());
        log::info!(
            "[EdgeNodeSession::apply_node_death] {} offline, bdSeq {death_bd}",
            self.context()
        );
        Ok(true)
    }

    /// Apply a DBIRTH. Consumes the node's sequence run.
    pub fn apply_device_birth(&mut self, device_id: &str, payload: &Payload) -> Result<()> {
        self.check_online("DBIRTH")?;
        self.check_seq(payload)?;
        let mut device = DeviceSession::new(device_id.to_string());
        device.metrics.register_birth(&payload.metrics)?;
        self.register_templates(&payload.metrics)?;
        device.online = true;
        device.last_update = now_millis();
        self.devices.insert(device_id.to_string(), device);
        self.last_update = now_millis();
        log::info!(
            "[EdgeNodeSession::apply_device_birth] {}/{device_id} online",
            self.context()
        );
        Ok(())
    }

    /// Apply a DDATA. Returns the resolved metrics.
    pub fn apply_device_data(&mut self, device_id: &str, payload: &Payload) -> Result<Vec<Metric>> {
        self.check_online("DDATA")?;
        if !matches!(self.devices.get(device_id), Some(d) if d.online) {
            return Err(Error::InvalidState(format!(
                "DDATA for {}/{device_id} without a device birth",
                self.context()
            )));
        }
        self.check_seq(payload)?;
        let resolved = self.resolve_all(Some(device_id), &payload.metrics)?;
        if let Some(device) = self.devices.get_mut(device_id) {
            device.last_update = now_millis();
        }
        self.last_update = now_millis();
        Ok(resolved)
    }

    /// Apply a DDEATH. Consumes the node's sequence run.
    pub fn apply_device_death(&mut self, device_id: &str, payload: &Payload) -> Result<()> {
        self.check_online("DDEATH")?;
        self.check_seq(payload)?;
        match self.devices.get_mut(device_id) {
            Some(device) => {
                device.online = false;
                device.metrics.clear();
                device.last_update = now_millis();
            }
            None => {
                log::warn!(
                    "[EdgeNodeSession::apply_device_death] {}/{device_id} was never born",
                    self.context()
                );
            }
        }
        self.last_update = now_millis();
        log::info!(
            "[EdgeNodeSession::apply_device_death] {}/{device_id} offline",
            self.context()
        );
        Ok(())
    }

    /// Mark the mirror faulted; data is rejected until the next birth.
    pub fn fault(&mut self, reason: FaultReason) {
        log::warn!(
            "[EdgeNodeSession::fault] {} faulted: {reason}",
            self.context()
        );
        self.state = self.state.advance(EntityState::Faulted, &self.context());
    }

    fn check_online(&self, kind: &str) -> Result<()> {
        if self.state != EntityState::Online {
            return Err(Error::InvalidState(format!(
                "{kind} for {} while {}",
                self.context(),
                self.state
            )));
        }
        Ok(())
    }

    fn check_seq(&mut self, payload: &Payload) -> Result<()> {
        let seq = payload
            .seq
            .ok_or_else(|| Error::InvalidPayload("sequenced payload has no seq".to_string()))?;
        self.tracker.check(seq)
    }

    fn resolve_all(&mut self, device_id: Option<&str>, metrics: &[Metric]) -> Result<Vec<Metric>> {
        let registry = match device_id {
            None => &mut self.metrics,
            Some(id) => {
                &mut self
                    .devices
                    .get_mut(id)
                    .ok_or_else(|| Error::InvalidState(format!("unknown device '{id}'")))?
                    .metrics
            }
        };
        let mut resolved = Vec::with_capacity(metrics.len());
        for metric in metrics {
            resolved.push(registry.apply_update(metric)?);
        }
        Ok(resolved)
    }

    /// Record template definitions and check instances against them.
    fn register_templates(&mut self, metrics: &[Metric]) -> Result<()> {
        for metric in metrics {
            if let (Some(name), Some(MetricValue::Template(template))) =
                (&metric.name, &metric.value)
            {
                if template.is_definition {
                    self.templates.register(name.clone(), template)?;
                } else {
                    self.templates.check_instance(template)?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn edge_node_id(&self) -> &str {
        &self.edge_node_id
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn is_online(&self) -> bool {
        self.state == EntityState::Online
    }

    pub fn bd_seq(&self) -> Option<u8> {
        self.bd_seq
    }

    pub fn expected_seq(&self) -> u8 {
        self.tracker.expected()
    }

    pub fn metrics(&self) -> &MetricRegistry {
        &self.metrics
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceSession> {
        self.devices.get(device_id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceSession> {
        self.devices.values()
    }

    /// Whether the birth this mirror is built on arrived as a retained
    /// message, i.e. may predate the consumer's subscription.
    pub fn birth_retained(&self) -> bool {
        self.birth_retained
    }

    /// Receipt time (epoch millis) of the last applied message.
    pub fn last_update(&self) -> u64 {
        self.last_update
    }
}
