// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host application.
//!
//! A [`HostApplication`] consumes everything its groups publish and
//! keeps one [`EdgeNodeSession`] mirror per edge node, shared through a
//! [`HostView`]. Its own liveness is a retained STATE document, with
//! the offline form registered as the will.
//!
//! Inbound handling is a strict ladder: unparseable topics are dropped
//! with a log line; payloads that fail to decode are dropped unless the
//! node is known, in which case the mirror faults; scope and sequence
//! violations fault the mirror. A faulted mirror recovers through a
//! fresh birth, which the host requests itself when
//! [`HostConfig::auto_rebirth`] is set.

use crate::codec::{self, encode_state};
use crate::config::{self, HostConfig, QOS_COMMAND, QOS_DATA, QOS_STATE};
use crate::entity::{EntityState, FaultReason};
use crate::error::{DecodeError, Error, Result};
use crate::model::{now_millis, DataType, Metric, MetricValue, Payload, StatePayload};
use crate::session::EdgeNodeSession;
use crate::topic::{MessageType, Topic};
use crate::transport::{Credentials, InboundMessage, LastWill, Transport};
use crossbeam::channel::Receiver;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared, concurrently readable map of edge node mirrors.
#[derive(Clone, Default)]
pub struct HostView {
    sessions: Arc<DashMap<(String, String), Arc<Mutex<EdgeNodeSession>>>>,
}

impl HostView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, group_id: &str, edge_node_id: &str) -> Option<Arc<Mutex<EdgeNodeSession>>> {
        self.sessions
            .get(&(group_id.to_string(), edge_node_id.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Clone of the whole mirror, for callers that want a consistent
    /// read without holding the lock.
    pub fn snapshot(&self, group_id: &str, edge_node_id: &str) -> Option<EdgeNodeSession> {
        self.session(group_id, edge_node_id).map(|s| s.lock().clone())
    }

    /// Latest state of one node metric.
    pub fn metric(&self, group_id: &str, edge_node_id: &str, name: &str) -> Option<Metric> {
        self.session(group_id, edge_node_id)
            .and_then(|s| s.lock().metrics().get(name).cloned())
    }

    pub fn nodes(&self) -> Vec<(String, String)> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn contains(&self, group_id: &str, edge_node_id: &str) -> bool {
        self.sessions
            .contains_key(&(group_id.to_string(), edge_node_id.to_string()))
    }

    fn get_or_insert(&self, group_id: &str, edge_node_id: &str) -> Arc<Mutex<EdgeNodeSession>> {
        self.sessions
            .entry((group_id.to_string(), edge_node_id.to_string()))
            .or_insert_with(|| {
                Arc::new(Mutex::new(EdgeNodeSession::new(group_id, edge_node_id)))
            })
            .value()
            .clone()
    }
}

/// The consuming half of a deployment.
pub struct HostApplication<T: Transport> {
    host_id: String,
    config: HostConfig,
    transport: T,
    state: EntityState,
    view: HostView,
    groups: Vec<String>,
    inbound: Vec<Receiver<InboundMessage>>,
    offline_since: Option<u64>,
    pending_resync: Option<u64>,
}

impl<T: Transport> HostApplication<T> {
    pub fn new(host_id: impl Into<String>, config: HostConfig, transport: T) -> Result<Self> {
        let host_id = host_id.into();
        // Validates the id against the topic grammar.
        Topic::state(host_id.clone())?;
        Ok(Self {
            host_id,
            config,
            transport,
            state: EntityState::Offline,
            view: HostView::new(),
            groups: Vec::new(),
            inbound: Vec::new(),
            offline_since: None,
            pending_resync: None,
        })
    }

    /// Handle on the mirror map; clones share the underlying sessions.
    pub fn view(&self) -> HostView {
        self.view.clone()
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn is_online(&self) -> bool {
        self.state == EntityState::Online
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Connect, subscribe to every group, and declare this host online.
    ///
    /// The offline STATE document is registered as the will before the
    /// online one is published, so observers always converge on the
    /// truth. On a reconnect with
    /// [`HostConfig::rebirth_on_reconnect`] set, the next [`pump`]
    /// closes coverage gaps by requesting rebirths from every node not
    /// heard from since the host went offline.
    ///
    /// [`pump`]: HostApplication::pump
    pub fn connect(
        &mut self,
        endpoint: &str,
        credentials: &Credentials,
        groups: &[&str],
    ) -> Result<()> {
        if self.state != EntityState::Offline {
            return Err(Error::InvalidState(format!("connect while {}", self.state)));
        }
        let state_topic = Topic::state(self.host_id.clone())?.to_topic_string();
        let will = LastWill {
            topic: state_topic.clone(),
            payload: encode_state(&StatePayload::offline(now_millis())),
            qos: QOS_STATE,
            retain: true,
        };
        self.transport.connect(endpoint, credentials, Some(will))?;
        self.state = self.state.advance(EntityState::Birthing, &self.host_id);

        self.groups = groups.iter().map(|g| g.to_string()).collect();
        for group in &self.groups {
            let rx = self
                .transport
                .subscribe(&Topic::group_filter(group), QOS_DATA)?;
            self.inbound.push(rx);
        }

        self.transport.publish(
            &state_topic,
            &encode_state(&StatePayload::online(now_millis())),
            QOS_STATE,
            true,
        )?;
        self.state = self.state.advance(EntityState::Online, &self.host_id);
        log::info!(
            "[HostApplication::connect] '{}' online, watching {} group(s)",
            self.host_id,
            self.groups.len()
        );

        if self.config.rebirth_on_reconnect {
            self.pending_resync = self.offline_since.take();
        } else {
            self.offline_since = None;
        }
        Ok(())
    }

    /// Declare offline (retained STATE) and disconnect cleanly.
    pub fn offline(&mut self) -> Result<()> {
        if self.state == EntityState::Offline {
            return Ok(());
        }
        let state_topic = Topic::state(self.host_id.clone())?.to_topic_string();
        self.transport.publish(
            &state_topic,
            &encode_state(&StatePayload::offline(now_millis())),
            QOS_STATE,
            true,
        )?;
        self.transport.disconnect()?;
        self.inbound.clear();
        self.offline_since = Some(now_millis());
        self.state = self.state.advance(EntityState::Offline, &self.host_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Drain and apply everything queued on the group subscriptions.
    /// Returns the number of messages consumed.
    pub fn pump(&mut self) -> Result<usize> {
        let receivers = std::mem::take(&mut self.inbound);
        let mut drained = Vec::new();
        for rx in &receivers {
            while let Ok(msg) = rx.try_recv() {
                drained.push(msg);
            }
        }
        self.inbound = receivers;

        let count = drained.len();
        for msg in drained {
            self.dispatch(msg)?;
        }
        if let Some(cutoff) = self.pending_resync.take() {
            self.resync_sweep(cutoff)?;
        }
        Ok(count)
    }

    /// Ask one node for a fresh birth.
    pub fn request_rebirth(&mut self, group_id: &str, edge_node_id: &str) -> Result<()> {
        let metric = Metric::new(
            config::REBIRTH_METRIC,
            DataType::Boolean,
            MetricValue::Boolean(true),
        )?;
        let payload = Payload::command(Some(now_millis()), vec![metric])?;
        let topic = Topic::node(
            group_id.to_string(),
            MessageType::NCmd,
            edge_node_id.to_string(),
        )?;
        log::info!("[HostApplication::request_rebirth] {group_id}/{edge_node_id}");
        self.transport.publish(
            &topic.to_topic_string(),
            &codec::encode(&payload, self.config.encoding),
            QOS_COMMAND,
            false,
        )
    }

    /// Write metrics to a node (NCMD).
    pub fn send_node_command(
        &mut self,
        group_id: &str,
        edge_node_id: &str,
        metrics: Vec<Metric>,
    ) -> Result<()> {
        let payload = Payload::command(Some(now_millis()), metrics)?;
        let topic = Topic::node(
            group_id.to_string(),
            MessageType::NCmd,
            edge_node_id.to_string(),
        )?;
        self.transport.publish(
            &topic.to_topic_string(),
            &codec::encode(&payload, self.config.encoding),
            QOS_COMMAND,
            false,
        )
    }

    /// Write metrics to a device (DCMD).
    pub fn send_device_command(
        &mut self,
        group_id: &str,
        edge_node_id: &str,
        device_id: &str,
        metrics: Vec<Metric>,
    ) -> Result<()> {
        let payload = Payload::command(Some(now_millis()), metrics)?;
        let topic = Topic::device(
            group_id.to_string(),
            MessageType::DCmd,
            edge_node_id.to_string(),
            device_id.to_string(),
        )?;
        self.transport.publish(
            &topic.to_topic_string(),
            &codec::encode(&payload, self.config.encoding),
            QOS_COMMAND,
            false,
        )
    }

    // ------------------------------------------------------------------
    // Dispatch ladder
    // ------------------------------------------------------------------

    fn dispatch(&mut self, msg: InboundMessage) -> Result<()> {
        let topic = match Topic::parse(&msg.topic) {
            Ok(topic) => topic,
            Err(e) => {
                log::warn!("[HostApplication::dispatch] dropping '{}': {e}", msg.topic);
                return Ok(());
            }
        };
        let (group_id, message_type, edge_node_id, device_id) = match topic {
            Topic::Message {
                group_id,
                message_type,
                edge_node_id,
                device_id,
            } => (group_id, message_type, edge_node_id, device_id),
            Topic::State { host_id } => {
                log::debug!("[HostApplication::dispatch] STATE of '{host_id}' ignored");
                return Ok(());
            }
        };
        // The group filter loops our own commands back; they are
        // host-to-node traffic and carry no sequence.
        if message_type.is_command() {
            return Ok(());
        }

        let known = self.view.contains(&group_id, &edge_node_id);
        let payload = match codec::decode(&msg.payload, self.config.encoding) {
            Ok(payload) => payload,
            Err(e) => {
                if known {
                    log::warn!(
                        "[HostApplication::dispatch] undecodable {message_type} from known {group_id}/{edge_node_id}: {e}"
                    );
                    return self.escalate(&group_id, &edge_node_id, FaultReason::Decode);
                }
                log::warn!(
                    "[HostApplication::dispatch] dropping undecodable {message_type} from unknown {group_id}/{edge_node_id}: {e}"
                );
                return Ok(());
            }
        };
        if let Err(e) = payload.validate(message_type) {
            if known {
                log::warn!(
                    "[HostApplication::dispatch] malformed {message_type} from known {group_id}/{edge_node_id}: {e}"
                );
                return self.escalate(&group_id, &edge_node_id, FaultReason::Schema);
            }
            log::warn!(
                "[HostApplication::dispatch] dropping malformed {message_type} from unknown {group_id}/{edge_node_id}: {e}"
            );
            return Ok(());
        }

        let session = self.view.get_or_insert(&group_id, &edge_node_id);
        let outcome = {
            let mut session = session.lock();
            match (message_type, device_id.as_deref()) {
                (MessageType::NBirth, _) => session.apply_node_birth(&payload, msg.retain),
                (MessageType::NData, _) => session.apply_node_data(&payload).map(drop),
                (MessageType::NDeath, _) => session.apply_node_death(&payload).map(drop),
                (MessageType::DBirth, Some(device)) => session.apply_device_birth(device, &payload),
                (MessageType::DData, Some(device)) => {
                    session.apply_device_data(device, &payload).map(drop)
                }
                (MessageType::DDeath, Some(device)) => session.apply_device_death(device, &payload),
                // Device kinds without a device id cannot parse, and
                // commands returned above.
                _ => Ok(()),
            }
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                let reason = match e {
                    Error::SequenceFault { .. } => FaultReason::Sequence,
                    Error::InvalidState(_) => FaultReason::NoBirth,
                    Error::Decode(DecodeError::SchemaViolation(_))
                    | Error::UnknownMetric(_)
                    | Error::DuplicateAlias { .. }
                    | Error::TypeMismatch { .. }
                    | Error::InvalidPayload(_) => FaultReason::Schema,
                    other => {
                        log::warn!(
                            "[HostApplication::dispatch] {message_type} from {group_id}/{edge_node_id}: {other}"
                        );
                        return Ok(());
                    }
                };
                log::warn!(
                    "[HostApplication::dispatch] {message_type} from {group_id}/{edge_node_id} faulted ({reason}): {e}"
                );
                self.escalate(&group_id, &edge_node_id, reason)
            }
        }
    }

    /// Fault the mirror and, when configured, request a rebirth to
    /// resynchronize.
    fn escalate(&mut self, group_id: &str, edge_node_id: &str, reason: FaultReason) -> Result<()> {
        let session = self.view.get_or_insert(group_id, edge_node_id);
        session.lock().fault(reason);
        if self.config.auto_rebirth {
            self.request_rebirth(group_id, edge_node_id)?;
        }
        Ok(())
    }

    /// Request rebirths from every node not heard from since `cutoff`.
    fn resync_sweep(&mut self, cutoff: u64) -> Result<()> {
        // <=: the millisecond clock cannot order a message against a
        // shutdown in the same tick.
        let stale: Vec<(String, String)> = self
            .view
            .sessions
            .iter()
            .filter(|entry| entry.value().lock().last_update() <= cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        if !stale.is_empty() {
            log::info!(
                "[HostApplication::resync_sweep] {} node(s) silent across the offline window",
                stale.len()
            );
        }
        for (group_id, edge_node_id) in stale {
            self.request_rebirth(&group_id, &edge_node_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncodingScheme;
    use crate::transport::{InMemoryBroker, InMemoryTransport, QoS};

    fn host_on(broker: &InMemoryBroker) -> HostApplication<InMemoryTransport> {
        let mut host = HostApplication::new(
            "scada01",
            HostConfig::default(),
            InMemoryTransport::new(broker),
        )
        .expect("valid host");
        host.connect("inmem://broker", &Credentials::new("scada01"), &["plant"])
            .expect("connect succeeds");
        host
    }

    struct RawNode {
        transport: InMemoryTransport,
    }

    // Hand-driven publisher, for exercising the ladder with exact wire
    // traffic.
    impl RawNode {
        fn connect(broker: &InMemoryBroker, id: &str) -> Self {
            let mut transport = InMemoryTransport::new(broker);
            transport
                .connect("inmem://broker", &Credentials::new(id), None)
                .expect("connect succeeds");
            Self { transport }
        }

        fn publish(&mut self, topic: &str, payload: &Payload) {
            self.transport
                .publish(
                    topic,
                    &codec::encode(payload, EncodingScheme::Binary),
                    QoS::AtMostOnce,
                    false,
                )
                .expect("publish succeeds");
        }

        fn publish_raw(&mut self, topic: &str, bytes: &[u8]) {
            self.transport
                .publish(topic, bytes, QoS::AtMostOnce, false)
                .expect("publish succeeds");
        }

        fn birth(&mut self) {
            let payload = Payload::birth(
                Some(now_millis()),
                0,
                vec![
                    Metric::new("bdSeq", DataType::Int64, MetricValue::Int64(1)).expect("valid"),
                    Metric::new("Temp", DataType::Double, MetricValue::Double(20.0))
                        .expect("valid")
                        .with_alias(1),
                ],
            )
            .expect("valid birth");
            self.publish("spBv1.0/plant/NBIRTH/press01", &payload);
        }

        fn data(&mut self, seq: u8, value: f64) {
            let payload = Payload {
                timestamp: Some(now_millis()),
                seq: Some(seq),
                metrics: vec![Metric {
                    name: None,
                    alias: Some(1),
                    datatype: DataType::Unknown,
                    value: Some(MetricValue::Double(value)),
                    timestamp: None,
                    is_historical: false,
                    is_transient: false,
                    properties: None,
                    metadata: None,
                }],
                uuid: None,
                body: None,
            };
            self.publish("spBv1.0/plant/NDATA/press01", &payload);
        }
    }

    #[test]
    fn test_host_publishes_retained_state_and_will() {
        let broker = InMemoryBroker::new();
        let mut host = host_on(&broker);
        let retained = broker.retained("spBv1.0/STATE/scada01").expect("STATE retained");
        assert!(
            codec::decode_state(&retained).expect("STATE decodes").online,
            "online STATE is retained"
        );

        host.offline().expect("clean offline");
        let retained = broker.retained("spBv1.0/STATE/scada01").expect("STATE retained");
        assert!(!codec::decode_state(&retained).expect("STATE decodes").online);
    }

    #[test]
    fn test_host_will_fires_offline_state() {
        let broker = InMemoryBroker::new();
        let host = host_on(&broker);
        drop(host); // transport aborts, broker fires the will
        let retained = broker.retained("spBv1.0/STATE/scada01").expect("STATE retained");
        assert!(
            !codec::decode_state(&retained).expect("STATE decodes").online,
            "abnormal drop flips the retained STATE to offline"
        );
    }

    #[test]
    fn test_host_mirrors_birth_and_data() {
        let broker = InMemoryBroker::new();
        let mut host = host_on(&broker);
        let mut node = RawNode::connect(&broker, "press01");

        node.birth();
        node.data(1, 21.0);
        assert_eq!(host.pump().expect("pump"), 2);

        let view = host.view();
        let snapshot = view.snapshot("plant", "press01").expect("session exists");
        assert!(snapshot.is_online());
        assert_eq!(snapshot.bd_seq(), Some(1));
        assert_eq!(
            view.metric("plant", "press01", "Temp").and_then(|m| m.value),
            Some(MetricValue::Double(21.0)),
            "alias-only update resolved against the birth scope"
        );
    }

    #[test]
    fn test_host_sequence_gap_faults_and_requests_rebirth() {
        let broker = InMemoryBroker::new();
        let mut host = host_on(&broker);
        let mut node = RawNode::connect(&broker, "press01");
        let ncmd = node
            .transport
            .subscribe("spBv1.0/plant/NCMD/press01", QoS::AtLeastOnce)
            .expect("subscribe");

        node.birth();
        node.data(4, 21.0); // expected 1
        host.pump().expect("pump");

        let view = host.view();
        assert_eq!(
            view.snapshot("plant", "press01").expect("session").state(),
            EntityState::Faulted
        );
        let cmd = ncmd.try_recv().expect("rebirth request sent");
        let payload = codec::decode(&cmd.payload, EncodingScheme::Binary).expect("decodes");
        assert_eq!(
            payload
                .metric(config::REBIRTH_METRIC)
                .and_then(|m| m.value.clone()),
            Some(MetricValue::Boolean(true))
        );

        // The node answers with a fresh birth; the mirror recovers.
        node.birth();
        node.data(1, 22.0);
        host.pump().expect("pump");
        assert!(view.snapshot("plant", "press01").expect("session").is_online());
    }

    #[test]
    fn test_host_drops_garbage_from_unknown_keeps_known_faulting() {
        let broker = InMemoryBroker::new();
        let mut host = host_on(&broker);
        let mut node = RawNode::connect(&broker, "press01");

        // Garbage from a node never seen: dropped, no session created.
        node.publish_raw("spBv1.0/plant/NDATA/ghost", &[0xFF, 0xFF, 0xFF]);
        host.pump().expect("pump");
        assert!(host.view().snapshot("plant", "ghost").is_none());

        // Same garbage from a known node: fault.
        node.birth();
        host.pump().expect("pump");
        node.publish_raw("spBv1.0/plant/NDATA/press01", &[0xFF, 0xFF, 0xFF]);
        host.pump().expect("pump");
        assert_eq!(
            host.view().snapshot("plant", "press01").expect("session").state(),
            EntityState::Faulted
        );
    }

    #[test]
    fn test_host_ignores_unparseable_topics_and_stale_deaths() {
        let broker = InMemoryBroker::new();
        let mut host = host_on(&broker);
        let mut node = RawNode::connect(&broker, "press01");

        node.publish_raw("spBv1.0/plant/SHRUG/press01", b"whatever");
        node.birth();
        // bdSeq 7 never matched a birth: stale, ignored.
        node.publish(
            "spBv1.0/plant/NDEATH/press01",
            &Payload::node_death(Some(now_millis()), 7),
        );
        host.pump().expect("pump");

        let snapshot = host.view().snapshot("plant", "press01").expect("session");
        assert!(snapshot.is_online(), "stale death left the mirror online");

        // The paired death lands.
        node.publish(
            "spBv1.0/plant/NDEATH/press01",
            &Payload::node_death(Some(now_millis()), 1),
        );
        host.pump().expect("pump");
        assert!(!host.view().snapshot("plant", "press01").expect("session").is_online());
    }

    #[test]
    fn test_host_data_before_birth_faults() {
        let broker = InMemoryBroker::new();
        let mut host = host_on(&broker);
        let mut node = RawNode::connect(&broker, "press01");
        node.data(1, 21.0);
        host.pump().expect("pump");
        assert_eq!(
            host.view().snapshot("plant", "press01").expect("session").state(),
            EntityState::Faulted,
            "data with no birth on record is out-of-sync"
        );
    }

    #[test]
    fn test_host_reconnect_sweep_requests_rebirth_from_silent_nodes() {
        let broker = InMemoryBroker::new();
        let mut host = host_on(&broker);
        let mut node = RawNode::connect(&broker, "press01");
        let ncmd = node
            .transport
            .subscribe("spBv1.0/plant/NCMD/press01", QoS::AtLeastOnce)
            .expect("subscribe");

        node.birth();
        host.pump().expect("pump");
        assert!(ncmd.try_recv().is_err(), "no rebirth needed while in sync");

        host.offline().expect("offline");
        host.connect("inmem://broker", &Credentials::new("scada01"), &["plant"])
            .expect("reconnect");
        host.pump().expect("pump");

        let cmd = ncmd.try_recv().expect("sweep requested a rebirth");
        let payload = codec::decode(&cmd.payload, EncodingScheme::Binary).expect("decodes");
        assert!(payload.metric(config::REBIRTH_METRIC).is_some());
    }
}
