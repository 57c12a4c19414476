// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data-operations relay.
//!
//! A [`DataOpsNode`] watches other nodes' traffic and republishes it
//! under its own edge node identity, running every inbound metric
//! through an injectable transform first. It is a consumer and a
//! publisher at once: inbound traffic is mirrored with the same
//! strictness a host applies, outbound traffic follows the full
//! birth/data/death contract of [`EdgeNode`], so downstream consumers
//! cannot tell the relay from a first-class node.
//!
//! The relay's own metric scope grows organically: the first
//! observation of a name widens the scope through a rebirth, later
//! observations ride on NDATA.

use crate::codec;
use crate::config::{self, NodeConfig, QOS_DATA};
use crate::entity::{EdgeNode, EntityState};
use crate::error::Result;
use crate::model::Metric;
use crate::session::EdgeNodeSession;
use crate::topic::{MessageType, Topic};
use crate::transport::{Credentials, InboundMessage, Transport};
use crossbeam::channel::Receiver;
use std::collections::HashMap;

/// Per-metric transform: return `None` to drop the metric, or a
/// (possibly renamed, possibly rescaled) metric to republish.
pub type TransformHook = Box<dyn FnMut(&Topic, &Metric) -> Option<Metric>>;

pub struct DataOpsNode<T: Transport> {
    node: EdgeNode<T>,
    config: NodeConfig,
    sources: HashMap<(String, String), EdgeNodeSession>,
    source_rx: Vec<Receiver<InboundMessage>>,
    transform: Option<TransformHook>,
}

impl<T: Transport> DataOpsNode<T> {
    /// A relay starts with an empty scope; observed metrics extend it.
    /// The new-metric rebirth path is what makes the relay work, so it
    /// is forced on regardless of `config`.
    pub fn new(
        group_id: impl Into<String>,
        edge_node_id: impl Into<String>,
        mut config: NodeConfig,
        transport: T,
    ) -> Result<Self> {
        config.rebirth_on_new_metric = true;
        let node = EdgeNode::new(group_id, edge_node_id, Vec::new(), config.clone(), transport)?;
        Ok(Self {
            node,
            config,
            sources: HashMap::new(),
            source_rx: Vec::new(),
            transform: None,
        })
    }

    pub fn set_transform(&mut self, hook: TransformHook) {
        self.transform = Some(hook);
    }

    /// Connect, publish the (initially empty) birth, and subscribe to
    /// every watched group.
    pub fn connect(
        &mut self,
        endpoint: &str,
        credentials: &Credentials,
        watch_groups: &[&str],
    ) -> Result<()> {
        self.node.connect(endpoint, credentials)?;
        for group in watch_groups {
            let rx = self
                .node
                .transport_mut()
                .subscribe(&Topic::group_filter(group), QOS_DATA)?;
            self.source_rx.push(rx);
        }
        Ok(())
    }

    pub fn offline(&mut self) -> Result<()> {
        self.source_rx.clear();
        self.sources.clear();
        self.node.offline()
    }

    /// Force a fresh birth of the relay identity.
    pub fn rebirth(&mut self) -> Result<()> {
        self.node.rebirth()
    }

    /// Service inbound command and source traffic. Returns the number
    /// of metrics republished.
    pub fn pump(&mut self) -> Result<usize> {
        self.node.pump_commands()?;

        let receivers = std::mem::take(&mut self.source_rx);
        let mut inbound = Vec::new();
        for rx in &receivers {
            while let Ok(msg) = rx.try_recv() {
                inbound.push(msg);
            }
        }
        self.source_rx = receivers;

        let mut relayed = 0;
        for msg in inbound {
            match self.relay_one(&msg) {
                Ok(n) => relayed += n,
                Err(e) => {
                    log::warn!("[DataOpsNode::pump] dropping '{}': {e}", msg.topic);
                }
            }
        }
        Ok(relayed)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn group_id(&self) -> &str {
        self.node.group_id()
    }

    pub fn edge_node_id(&self) -> &str {
        self.node.edge_node_id()
    }

    pub fn state(&self) -> EntityState {
        self.node.state()
    }

    pub fn is_online(&self) -> bool {
        self.node.is_online()
    }

    /// The relay's own (grown) metric scope.
    pub fn metrics(&self) -> &[Metric] {
        self.node.metrics()
    }

    /// Mirror of one watched source, if any traffic was seen.
    pub fn source(&self, group_id: &str, edge_node_id: &str) -> Option<&EdgeNodeSession> {
        self.sources
            .get(&(group_id.to_string(), edge_node_id.to_string()))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn relay_one(&mut self, msg: &InboundMessage) -> Result<usize> {
        let topic = Topic::parse(&msg.topic)?;
        let (group_id, message_type, edge_node_id, device_id) = match &topic {
            Topic::Message {
                group_id,
                message_type,
                edge_node_id,
                device_id,
            } => (
                group_id.clone(),
                *message_type,
                edge_node_id.clone(),
                device_id.clone(),
            ),
            Topic::State { .. } => return Ok(0),
        };
        // Never relay the relay: its own group subscription loops its
        // publishes back.
        if group_id == self.node.group_id() && edge_node_id == self.node.edge_node_id() {
            return Ok(0);
        }
        if message_type.is_command() {
            return Ok(0);
        }

        let payload = codec::decode(&msg.payload, self.config.encoding)?;
        let key = (group_id.clone(), edge_node_id.clone());
        let applied = {
            let session = self
                .sources
                .entry(key.clone())
                .or_insert_with(|| EdgeNodeSession::new(group_id, edge_node_id));
            match (message_type, device_id.as_deref()) {
                (MessageType::NBirth, _) => session
                    .apply_node_birth(&payload, msg.retain)
                    .map(|()| session.metrics().snapshot()),
                (MessageType::NData, _) => session.apply_node_data(&payload),
                (MessageType::DBirth, Some(device)) => session
                    .apply_device_birth(device, &payload)
                    .map(|()| {
                        session
                            .device(device)
                            .map(|d| d.metrics().snapshot())
                            .unwrap_or_default()
                    }),
                (MessageType::DData, Some(device)) => session.apply_device_data(device, &payload),
                (MessageType::NDeath, _) => {
                    session.apply_node_death(&payload).map(|_| Vec::new())
                }
                (MessageType::DDeath, Some(device)) => {
                    session.apply_device_death(device, &payload).map(|()| Vec::new())
                }
                _ => Ok(Vec::new()),
            }
        };
        let resolved = match applied {
            Ok(resolved) => resolved,
            Err(e) => {
                // A broken mirror is useless; rebuild it from the
                // source's next birth.
                self.sources.remove(&key);
                return Err(e);
            }
        };

        let mut outgoing = Vec::new();
        for metric in &resolved {
            // Protocol plumbing stays with its node.
            if matches!(
                metric.name.as_deref(),
                Some(config::BDSEQ_METRIC) | Some(config::REBIRTH_METRIC)
            ) {
                continue;
            }
            let transformed = match self.transform.as_mut() {
                Some(hook) => hook(&topic, metric),
                None => Some(metric.clone()),
            };
            if let Some(mut out) = transformed {
                // The relay assigns its own aliases.
                out.alias = None;
                outgoing.push(out);
            }
        }
        if outgoing.is_empty() {
            return Ok(0);
        }
        let count = outgoing.len();
        self.node.update(outgoing)?;
        Ok(count)
    }
}
