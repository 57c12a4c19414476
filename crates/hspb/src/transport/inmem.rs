// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process broker.
//!
//! A [`InMemoryBroker`] plus any number of [`InMemoryTransport`] clients
//! stand in for a real MQTT broker: retained messages, last-wills on
//! abnormal drop, client-id takeover and `+`/`#` filter matching all
//! behave as a broker would, so integration tests can run complete
//! birth/data/death cycles without a network. Delivery is in-process
//! and exact; QoS is accepted and ignored.

use super::{topic_matches, Credentials, InboundMessage, LastWill, QoS, Transport};
use crate::error::{Error, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared in-process broker. Clone hands out another handle to the
/// same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    next_handle: u64,
    clients: HashMap<u64, ClientRecord>,
    subscriptions: Vec<Subscription>,
    // BTreeMap so retained replay order is deterministic.
    retained: BTreeMap<String, Vec<u8>>,
}

struct ClientRecord {
    client_id: String,
    will: Option<LastWill>,
}

struct Subscription {
    handle: u64,
    filter: String,
    sender: Sender<InboundMessage>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retained payload currently stored for `topic`, if any.
    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.state.lock().retained.get(topic).cloned()
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    fn connect(&self, client_id: &str, will: Option<LastWill>) -> u64 {
        let mut state = self.state.lock();
        // An MQTT broker kicks the previous session holding the same
        // client id and fires its will.
        let stale: Vec<u64> = state
            .clients
            .iter()
            .filter(|(_, c)| c.client_id == client_id)
            .map(|(&h, _)| h)
            .collect();
        for handle in stale {
            log::warn!("[InMemoryBroker::connect] client '{client_id}' takeover");
            drop_client(&mut state, handle, true);
        }
        state.next_handle += 1;
        let handle = state.next_handle;
        state.clients.insert(
            handle,
            ClientRecord {
                client_id: client_id.to_string(),
                will,
            },
        );
        handle
    }

    fn publish(&self, topic: &str, payload: &[u8], retain: bool) {
        let mut state = self.state.lock();
        store_and_deliver(&mut state, topic, payload, retain);
    }

    fn subscribe(&self, handle: u64, filter: &str) -> Receiver<InboundMessage> {
        let mut state = self.state.lock();
        let (sender, receiver) = unbounded();
        for (topic, payload) in &state.retained {
            if topic_matches(filter, topic) {
                // Replayed from the store: the retain flag is set.
                let _ = sender.send(InboundMessage {
                    topic: topic.clone(),
                    payload: payload.clone(),
                    retain: true,
                });
            }
        }
        state.subscriptions.push(Subscription {
            handle,
            filter: filter.to_string(),
            sender,
        });
        receiver
    }

    fn drop_client(&self, handle: u64, fire_will: bool) {
        let mut state = self.state.lock();
        drop_client(&mut state, handle, fire_will);
    }
}

fn drop_client(state: &mut BrokerState, handle: u64, fire_will: bool) {
    state.subscriptions.retain(|s| s.handle != handle);
    let Some(client) = state.clients.remove(&handle) else {
        return;
    };
    if fire_will {
        if let Some(will) = client.will {
            log::info!(
                "[InMemoryBroker::drop_client] firing will of '{}' on {}",
                client.client_id,
                will.topic
            );
            store_and_deliver(&mut *state, &will.topic, &will.payload, will.retain);
        }
    }
}

fn store_and_deliver(state: &mut BrokerState, topic: &str, payload: &[u8], retain: bool) {
    if retain {
        if payload.is_empty() {
            // Retained publish with an empty payload clears the slot.
            state.retained.remove(topic);
        } else {
            state.retained.insert(topic.to_string(), payload.to_vec());
        }
    }
    // Live delivery never sets the retain flag. Dead receivers are
    // pruned as they surface.
    state.subscriptions.retain(|sub| {
        if !topic_matches(&sub.filter, topic) {
            return true;
        }
        sub.sender
            .send(InboundMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                retain: false,
            })
            .is_ok()
    });
}

/// One client session against an [`InMemoryBroker`].
pub struct InMemoryTransport {
    broker: InMemoryBroker,
    handle: Option<u64>,
    client_id: String,
}

impl InMemoryTransport {
    pub fn new(broker: &InMemoryBroker) -> Self {
        Self {
            broker: broker.clone(),
            handle: None,
            client_id: String::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Sever the connection without a DISCONNECT. The broker fires the
    /// registered will, exactly as after a network loss.
    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            log::info!("[InMemoryTransport::abort] '{}' dropped abnormally", self.client_id);
            self.broker.drop_client(handle, true);
        }
    }

    fn require_handle(&self) -> Result<u64> {
        self.handle
            .ok_or_else(|| Error::Transport(format!("'{}' is not connected", self.client_id)))
    }
}

impl Transport for InMemoryTransport {
    fn connect(
        &mut self,
        endpoint: &str,
        credentials: &Credentials,
        will: Option<LastWill>,
    ) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::Transport(format!(
                "'{}' is already connected",
                self.client_id
            )));
        }
        self.client_id = credentials.client_id.clone();
        self.handle = Some(self.broker.connect(&credentials.client_id, will));
        log::debug!(
            "[InMemoryTransport::connect] '{}' -> {endpoint}",
            self.client_id
        );
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<()> {
        self.require_handle()?;
        log::trace!(
            "[InMemoryTransport::publish] '{}' {topic} ({} bytes, {qos}, retain {retain})",
            self.client_id,
            payload.len()
        );
        self.broker.publish(topic, payload, retain);
        Ok(())
    }

    fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<Receiver<InboundMessage>> {
        let handle = self.require_handle()?;
        log::debug!(
            "[InMemoryTransport::subscribe] '{}' {filter} ({qos})",
            self.client_id
        );
        Ok(self.broker.subscribe(handle, filter))
    }

    fn disconnect(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            // Clean shutdown discards the will.
            self.broker.drop_client(handle, false);
            log::debug!("[InMemoryTransport::disconnect] '{}'", self.client_id);
        }
        Ok(())
    }
}

impl Drop for InMemoryTransport {
    fn drop(&mut self) {
        // A vanished client is an abnormal drop as far as the broker
        // can tell.
        self.abort();
    }
}
