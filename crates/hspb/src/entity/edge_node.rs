// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Edge node publisher.
//!
//! An [`EdgeNode`] owns its metric scope (and one scope per attached
//! [`Device`]), drives the birth/data/death lifecycle over a
//! [`Transport`], and services inbound commands. All device traffic
//! draws from the node's single sequence counter.
//!
//! The metric scope is fixed by the birth: updates naming a metric
//! outside it either force a fresh birth (the default) or fail,
//! depending on [`NodeConfig::rebirth_on_new_metric`].

use crate::codec;
use crate::config::{self, NodeConfig, QOS_COMMAND, QOS_DATA};
use crate::entity::EntityState;
use crate::error::{Error, Result};
use crate::model::{now_millis, DataType, Metric, MetricValue, Payload};
use crate::session::{BdSeqCounter, SeqCounter};
use crate::topic::{MessageType, Topic};
use crate::transport::{Credentials, InboundMessage, LastWill, Transport};
use crossbeam::channel::Receiver;
use std::collections::HashSet;

/// Command callback: `(device_id, metric)`; `None` means the command
/// addressed the node itself.
pub type CommandHook = Box<dyn FnMut(Option<&str>, &Metric)>;

const RESERVED_NAMES: [&str; 2] = [config::BDSEQ_METRIC, config::REBIRTH_METRIC];

fn check_scope_metric(metric: &Metric) -> Result<&str> {
    let name = metric
        .name
        .as_deref()
        .ok_or_else(|| Error::InvalidPayload("scope metric without a name".to_string()))?;
    if RESERVED_NAMES.contains(&name) {
        return Err(Error::InvalidPayload(format!("metric name '{name}' is reserved")));
    }
    if metric.datatype == DataType::Unknown {
        return Err(Error::InvalidPayload(format!(
            "scope metric '{name}' declares no datatype"
        )));
    }
    if let Some(ref value) = metric.value {
        if !value.matches(metric.datatype) {
            return Err(Error::TypeMismatch {
                metric: name.to_string(),
                declared: metric.datatype,
                value_kind: value.kind_name(),
            });
        }
    }
    Ok(name)
}

// =======================================================================
// Device
// =======================================================================

/// A device scope awaiting registration with an [`EdgeNode`].
#[derive(Debug, Clone)]
pub struct Device {
    device_id: String,
    metrics: Vec<Metric>,
}

impl Device {
    pub fn new(device_id: impl Into<String>, metrics: Vec<Metric>) -> Result<Self> {
        let device_id = device_id.into();
        let mut seen = HashSet::new();
        for metric in &metrics {
            let name = check_scope_metric(metric)?;
            if !seen.insert(name.to_string()) {
                return Err(Error::InvalidPayload(format!(
                    "device '{device_id}' declares metric '{name}' twice"
                )));
            }
        }
        Ok(Self { device_id, metrics })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name.as_deref() == Some(name))
    }
}

// =======================================================================
// EdgeNode
// =======================================================================

/// The publishing half of a deployment: one edge node, its devices, and
/// the transport session they share.
pub struct EdgeNode<T: Transport> {
    group_id: String,
    edge_node_id: String,
    config: NodeConfig,
    transport: T,
    state: EntityState,
    seq: SeqCounter,
    bd_seq: BdSeqCounter,
    metrics: Vec<Metric>,
    devices: Vec<Device>,
    used_aliases: HashSet<u64>,
    next_alias: u64,
    command_rx: Vec<Receiver<InboundMessage>>,
    on_command: Option<CommandHook>,
}

impl<T: Transport> EdgeNode<T> {
    /// Build a node around its birth scope. Missing aliases are
    /// assigned here, starting at 1; explicit aliases are kept and
    /// collision-checked.
    pub fn new(
        group_id: impl Into<String>,
        edge_node_id: impl Into<String>,
        metrics: Vec<Metric>,
        config: NodeConfig,
        transport: T,
    ) -> Result<Self> {
        let group_id = group_id.into();
        let edge_node_id = edge_node_id.into();
        // Validates both ids against the topic grammar.
        Topic::node(group_id.clone(), MessageType::NBirth, edge_node_id.clone())?;

        let mut node = Self {
            group_id,
            edge_node_id,
            config,
            transport,
            state: EntityState::Offline,
            seq: SeqCounter::new(),
            bd_seq: BdSeqCounter::new(),
            metrics: Vec::new(),
            devices: Vec::new(),
            used_aliases: HashSet::new(),
            next_alias: 1,
            command_rx: Vec::new(),
            on_command: None,
        };
        let metrics = node.adopt_scope(metrics, None)?;
        node.metrics = metrics;
        Ok(node)
    }

    /// Route non-rebirth commands to `hook`.
    pub fn set_command_hook(&mut self, hook: CommandHook) {
        self.on_command = Some(hook);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Connect and run the birth sequence: will registration (NDEATH
    /// with the fresh bdSeq), command subscriptions, NBIRTH, one DBIRTH
    /// per registered device.
    pub fn connect(&mut self, endpoint: &str, credentials: &Credentials) -> Result<()> {
        if self.state != EntityState::Offline {
            return Err(Error::InvalidState(format!(
                "connect while {}",
                self.state
            )));
        }
        let bd = self.bd_seq.advance();
        let will_topic = Topic::node(
            self.group_id.clone(),
            MessageType::NDeath,
            self.edge_node_id.clone(),
        )?;
        let will = LastWill {
            topic: will_topic.to_topic_string(),
            payload: codec::encode(
                &Payload::node_death(Some(now_millis()), bd),
                self.config.encoding,
            ),
            qos: QOS_DATA,
            retain: false,
        };
        self.transport.connect(endpoint, credentials, Some(will))?;
        self.state = self.state.advance(EntityState::Birthing, &self.context());

        let ncmd = Topic::node_command_filter(&self.group_id, &self.edge_node_id);
        let dcmd = Topic::device_command_filter(&self.group_id, &self.edge_node_id);
        self.command_rx.push(self.transport.subscribe(&ncmd, QOS_COMMAND)?);
        self.command_rx.push(self.transport.subscribe(&dcmd, QOS_COMMAND)?);

        self.publish_births()?;
        Ok(())
    }

    /// Re-run the birth sequence in-session. Advances bdSeq; the
    /// broker-held will keeps the old value until the next connect,
    /// which observers tolerate as a stale death.
    pub fn rebirth(&mut self) -> Result<()> {
        if self.state == EntityState::Offline {
            return Err(Error::InvalidState("rebirth while offline".to_string()));
        }
        self.bd_seq.advance();
        self.publish_births()
    }

    /// Clean shutdown: NDEATH for the current birth, then disconnect
    /// (which discards the will).
    pub fn offline(&mut self) -> Result<()> {
        if self.state == EntityState::Offline {
            return Ok(());
        }
        let death = Payload::node_death(Some(now_millis()), self.bd_seq.current());
        let topic = Topic::node(
            self.group_id.clone(),
            MessageType::NDeath,
            self.edge_node_id.clone(),
        )?;
        self.publish(&topic, &codec::encode(&death, self.config.encoding), false)?;
        self.transport.disconnect()?;
        self.command_rx.clear();
        self.state = self.state.advance(EntityState::Offline, &self.context());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    /// Attach a device. Online nodes announce it with an immediate
    /// DBIRTH; offline nodes fold it into the next birth sequence.
    pub fn register_device(&mut self, device: Device) -> Result<()> {
        if self.devices.iter().any(|d| d.device_id == device.device_id) {
            return Err(Error::InvalidState(format!(
                "device '{}' is already registered",
                device.device_id
            )));
        }
        Topic::device(
            self.group_id.clone(),
            MessageType::DBirth,
            self.edge_node_id.clone(),
            device.device_id.clone(),
        )?;
        let metrics = self.adopt_scope(device.metrics, Some(device.device_id.as_str()))?;
        let device = Device {
            device_id: device.device_id,
            metrics,
        };
        self.devices.push(device);
        if self.state == EntityState::Online {
            let device_id = self.devices.last().map(|d| d.device_id.clone());
            if let Some(device_id) = device_id {
                self.publish_device_birth(&device_id)?;
            }
        }
        Ok(())
    }

    /// Detach a device. Online nodes say goodbye with a DDEATH.
    pub fn deregister_device(&mut self, device_id: &str) -> Result<()> {
        let idx = self
            .devices
            .iter()
            .position(|d| d.device_id == device_id)
            .ok_or_else(|| Error::InvalidState(format!("device '{device_id}' is not registered")))?;
        if self.state == EntityState::Online {
            let death = Payload::device_death(Some(now_millis()), self.seq.next());
            let topic = Topic::device(
                self.group_id.clone(),
                MessageType::DDeath,
                self.edge_node_id.clone(),
                device_id.to_string(),
            )?;
            self.publish(&topic, &codec::encode(&death, self.config.encoding), false)?;
        }
        let device = self.devices.remove(idx);
        for metric in &device.metrics {
            if let Some(alias) = metric.alias {
                self.used_aliases.remove(&alias);
            }
        }
        log::info!(
            "[EdgeNode::deregister_device] {}: '{device_id}' detached",
            self.context()
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------

    /// Publish an NDATA carrying `updates`, each naming a metric of the
    /// node's scope. Updates naming unknown metrics extend the scope
    /// through a full rebirth when [`NodeConfig::rebirth_on_new_metric`]
    /// is set, and fail otherwise.
    pub fn update(&mut self, updates: Vec<Metric>) -> Result<()> {
        self.check_online("update")?;
        let new_names = self.unknown_names(&updates, None)?;
        if !new_names.is_empty() {
            if !self.config.rebirth_on_new_metric {
                return Err(Error::UnknownMetric(new_names[0].clone()));
            }
            log::info!(
                "[EdgeNode::update] {}: {} new metric(s), rebirthing",
                self.context(),
                new_names.len()
            );
            return self.extend_and_rebirth(updates, None);
        }
        let wire = self.fold_updates(updates, None)?;
        let payload = Payload::data(Some(now_millis()), self.seq.next(), wire)?;
        let topic = Topic::node(
            self.group_id.clone(),
            MessageType::NData,
            self.edge_node_id.clone(),
        )?;
        self.publish(&topic, &codec::encode(&payload, self.config.encoding), false)
    }

    /// Publish a DDATA for one attached device. Scope rules match
    /// [`EdgeNode::update`], except that a new metric re-births only
    /// the device.
    pub fn update_device(&mut self, device_id: &str, updates: Vec<Metric>) -> Result<()> {
        self.check_online("update_device")?;
        if !self.devices.iter().any(|d| d.device_id == device_id) {
            return Err(Error::InvalidState(format!(
                "device '{device_id}' is not registered"
            )));
        }
        let new_names = self.unknown_names(&updates, Some(device_id))?;
        if !new_names.is_empty() {
            if !self.config.rebirth_on_new_metric {
                return Err(Error::UnknownMetric(new_names[0].clone()));
            }
            log::info!(
                "[EdgeNode::update_device] {}/{device_id}: {} new metric(s), rebirthing device",
                self.context(),
                new_names.len()
            );
            return self.extend_and_rebirth(updates, Some(device_id));
        }
        let wire = self.fold_updates(updates, Some(device_id))?;
        let payload = Payload::data(Some(now_millis()), self.seq.next(), wire)?;
        let topic = Topic::device(
            self.group_id.clone(),
            MessageType::DData,
            self.edge_node_id.clone(),
            device_id.to_string(),
        )?;
        self.publish(&topic, &codec::encode(&payload, self.config.encoding), false)
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Drain pending NCMD/DCMD traffic. `Node Control/Rebirth` = true
    /// triggers the rebirth cycle unconditionally; everything else goes
    /// to the command hook. Returns the number of command metrics
    /// handled.
    pub fn pump_commands(&mut self) -> Result<usize> {
        let receivers = std::mem::take(&mut self.command_rx);
        let mut inbound = Vec::new();
        for rx in &receivers {
            while let Ok(msg) = rx.try_recv() {
                inbound.push(msg);
            }
        }
        self.command_rx = receivers;

        let mut handled = 0;
        let mut rebirth = false;
        for msg in inbound {
            match self.handle_command(&msg, &mut rebirth) {
                Ok(n) => handled += n,
                Err(e) => {
                    log::warn!(
                        "[EdgeNode::pump_commands] {}: dropping command on {}: {e}",
                        self.context(),
                        msg.topic
                    );
                }
            }
        }
        if rebirth {
            self.rebirth()?;
        }
        Ok(handled)
    }

    fn handle_command(&mut self, msg: &InboundMessage, rebirth: &mut bool) -> Result<usize> {
        let topic = Topic::parse(&msg.topic)?;
        let device_id = match &topic {
            Topic::Message {
                message_type: MessageType::NCmd,
                ..
            } => None,
            Topic::Message {
                message_type: MessageType::DCmd,
                device_id: Some(device_id),
                ..
            } => Some(device_id.clone()),
            _ => return Ok(0),
        };
        let payload = codec::decode(&msg.payload, self.config.encoding)?;
        let mut handled = 0;
        for metric in &payload.metrics {
            if device_id.is_none() && metric.name.as_deref() == Some(config::REBIRTH_METRIC) {
                if matches!(metric.value, Some(MetricValue::Boolean(true))) {
                    *rebirth = true;
                }
                handled += 1;
                continue;
            }
            if let Some(hook) = self.on_command.as_mut() {
                hook(device_id.as_deref(), metric);
            }
            handled += 1;
        }
        Ok(handled)
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

    /// bdSeq of the current (or most recent) birth.
    pub fn bd_seq(&self) -> u8 {
        self.bd_seq.current()
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name.as_deref() == Some(name))
    }

    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Shared transport session, for composing entities that subscribe
    /// alongside the node's own traffic.
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn context(&self) -> String {
        format!("{}/{}", self.group_id, self.edge_node_id)
    }

    fn check_online(&self, what: &str) -> Result<()> {
        if self.state != EntityState::Online {
            return Err(Error::InvalidState(format!("{what} while {}", self.state)));
        }
        Ok(())
    }

    /// Validate a scope and assign aliases out of the node-wide space.
    fn adopt_scope(&mut self, metrics: Vec<Metric>, device_id: Option<&str>) -> Result<Vec<Metric>> {
        let mut seen = HashSet::new();
        let mut adopted = Vec::with_capacity(metrics.len());
        for mut metric in metrics {
            let name = check_scope_metric(&metric)?.to_string();
            if !seen.insert(name.clone()) {
                return Err(Error::InvalidPayload(format!(
                    "metric '{name}' declared twice in one scope"
                )));
            }
            match metric.alias {
                Some(alias) => {
                    if !self.used_aliases.insert(alias) {
                        return Err(Error::DuplicateAlias {
                            alias,
                            bound_to: name,
                        });
                    }
                }
                None => {
                    while !self.used_aliases.insert(self.next_alias) {
                        self.next_alias += 1;
                    }
                    metric.alias = Some(self.next_alias);
                    self.next_alias += 1;
                }
            }
            adopted.push(metric);
        }
        if let Some(device_id) = device_id {
            log::debug!(
                "[EdgeNode::adopt_scope] {}/{device_id}: {} metric(s)",
                self.context(),
                adopted.len()
            );
        }
        Ok(adopted)
    }

    fn publish(&mut self, topic: &Topic, bytes: &[u8], retain: bool) -> Result<()> {
        self.transport
            .publish(&topic.to_topic_string(), bytes, QOS_DATA, retain)
    }

    /// NBIRTH plus one DBIRTH per device, seq 0 upward.
    fn publish_births(&mut self) -> Result<()> {
        let bd = self.bd_seq.current();
        let mut birth_metrics = Vec::with_capacity(self.metrics.len() + 2);
        birth_metrics.push(
            Metric::new(config::BDSEQ_METRIC, DataType::Int64, MetricValue::Int64(i64::from(bd)))
                .map_err(|e| Error::InvalidState(format!("bdSeq metric: {e}")))?,
        );
        birth_metrics.push(
            Metric::new(config::REBIRTH_METRIC, DataType::Boolean, MetricValue::Boolean(false))
                .map_err(|e| Error::InvalidState(format!("rebirth metric: {e}")))?,
        );
        birth_metrics.extend(self.metrics.iter().cloned());

        let payload = Payload::birth(Some(now_millis()), self.seq.birth(), birth_metrics)?;
        let topic = Topic::node(
            self.group_id.clone(),
            MessageType::NBirth,
            self.edge_node_id.clone(),
        )?;
        let retain = self.config.retain_births;
        self.publish(&topic, &codec::encode(&payload, self.config.encoding), retain)?;
        log::info!(
            "[EdgeNode::publish_births] {} NBIRTH bdSeq {bd}, {} metric(s), {} device(s)",
            self.context(),
            payload.metrics.len(),
            self.devices.len()
        );

        let device_ids: Vec<String> = self.devices.iter().map(|d| d.device_id.clone()).collect();
        for device_id in device_ids {
            self.publish_device_birth(&device_id)?;
        }
        self.state = self.state.advance(EntityState::Online, &self.context());
        Ok(())
    }

    fn publish_device_birth(&mut self, device_id: &str) -> Result<()> {
        let metrics = self
            .devices
            .iter()
            .find(|d| d.device_id == device_id)
            .map(|d| d.metrics.clone())
            .ok_or_else(|| Error::InvalidState(format!("device '{device_id}' vanished")))?;
        let payload = Payload::birth(Some(now_millis()), self.seq.next(), metrics)?;
        let topic = Topic::device(
            self.group_id.clone(),
            MessageType::DBirth,
            self.edge_node_id.clone(),
            device_id.to_string(),
        )?;
        let retain = self.config.retain_births;
        self.publish(&topic, &codec::encode(&payload, self.config.encoding), retain)
    }

    /// Names in `updates` that the scope does not know yet.
    fn unknown_names(&self, updates: &[Metric], device_id: Option<&str>) -> Result<Vec<String>> {
        let scope: &[Metric] = match device_id {
            None => &self.metrics,
            Some(id) => {
                &self
                    .devices
                    .iter()
                    .find(|d| d.device_id == id)
                    .ok_or_else(|| Error::InvalidState(format!("device '{id}' is not registered")))?
                    .metrics
            }
        };
        let mut unknown = Vec::new();
        for update in updates {
            let name = update
                .name
                .as_deref()
                .ok_or_else(|| Error::InvalidPayload("update metric without a name".to_string()))?;
            if RESERVED_NAMES.contains(&name) {
                return Err(Error::InvalidPayload(format!(
                    "metric name '{name}' is reserved"
                )));
            }
            if !scope.iter().any(|m| m.name.as_deref() == Some(name)) {
                unknown.push(name.to_string());
            }
        }
        Ok(unknown)
    }

    /// Validate updates against the scope, fold the new values in, and
    /// return the alias-keyed wire form.
    fn fold_updates(&mut self, updates: Vec<Metric>, device_id: Option<&str>) -> Result<Vec<Metric>> {
        let scope: &mut Vec<Metric> = match device_id {
            None => &mut self.metrics,
            Some(id) => {
                &mut self
                    .devices
                    .iter_mut()
                    .find(|d| d.device_id == id)
                    .ok_or_else(|| Error::InvalidState(format!("device '{id}' is not registered")))?
                    .metrics
            }
        };
        let mut wire = Vec::with_capacity(updates.len());
        for update in updates {
            let name = update
                .name
                .clone()
                .ok_or_else(|| Error::InvalidPayload("update metric without a name".to_string()))?;
            let stored = scope
                .iter_mut()
                .find(|m| m.name.as_deref() == Some(name.as_str()))
                .ok_or_else(|| Error::UnknownMetric(name.clone()))?;
            if update.datatype != DataType::Unknown && update.datatype != stored.datatype {
                return Err(Error::TypeMismatch {
                    metric: name,
                    declared: stored.datatype,
                    value_kind: update.datatype.as_str(),
                });
            }
            if let Some(ref value) = update.value {
                if !value.matches(stored.datatype) {
                    return Err(Error::TypeMismatch {
                        metric: name,
                        declared: stored.datatype,
                        value_kind: value.kind_name(),
                    });
                }
            }
            stored.value = update.value.clone();
            if update.timestamp.is_some() {
                stored.timestamp = update.timestamp;
            }
            // Aliases shrink the wire form; the name stays home.
            wire.push(Metric {
                name: None,
                alias: stored.alias,
                datatype: stored.datatype,
                value: update.value,
                timestamp: update.timestamp,
                is_historical: update.is_historical,
                is_transient: update.is_transient,
                properties: update.properties,
                metadata: update.metadata,
            });
        }
        Ok(wire)
    }

    /// Extend the scope with the update's new metrics, then re-birth
    /// the node or the one device.
    fn extend_and_rebirth(&mut self, updates: Vec<Metric>, device_id: Option<&str>) -> Result<()> {
        let mut known = Vec::new();
        let mut fresh = Vec::new();
        {
            let scope: &[Metric] = match device_id {
                None => &self.metrics,
                Some(id) => {
                    &self
                        .devices
                        .iter()
                        .find(|d| d.device_id == id)
                        .ok_or_else(|| {
                            Error::InvalidState(format!("device '{id}' is not registered"))
                        })?
                        .metrics
                }
            };
            for update in updates {
                let is_known = update
                    .name
                    .as_deref()
                    .is_some_and(|n| scope.iter().any(|m| m.name.as_deref() == Some(n)));
                if is_known {
                    known.push(update);
                } else {
                    fresh.push(update);
                }
            }
        }
        // Fold known values first so the birth carries them.
        if !known.is_empty() {
            self.fold_updates(known, device_id)?;
        }
        let fresh = self.adopt_scope(fresh, device_id)?;
        match device_id {
            None => {
                self.metrics.extend(fresh);
                self.rebirth()
            }
            Some(id) => {
                let device = self
                    .devices
                    .iter_mut()
                    .find(|d| d.device_id == id)
                    .ok_or_else(|| Error::InvalidState(format!("device '{id}' vanished")))?;
                device.metrics.extend(fresh);
                let id = id.to_string();
                self.publish_device_birth(&id)
            }
        }
    }
}
