// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload data model and per-kind shape rules.
//!
//! One [`Payload`] struct serves every metric-bearing message kind; the
//! kind-specific rules (birth metrics are fully named, data may be
//! alias-only, commands carry no `seq`, deaths pair by `bdSeq`) live in
//! [`Payload::validate`] and the kind constructors. STATE is deliberately
//! a separate type ([`StatePayload`]): it is a JSON state document, not a
//! metric payload.

use crate::config;
use crate::error::{Error, Result};
use crate::model::datatype::DataType;
use crate::model::metric::Metric;
use crate::model::value::MetricValue;
use crate::topic::MessageType;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the UNIX epoch, the protocol's timestamp unit.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A metric-bearing Sparkplug B payload.
///
/// `seq` is modeled as `u8` because the protocol constrains it to 0-255
/// with wraparound; the codec range-checks the wire's wider field. `uuid`
/// and `body` are pass-through wire fields kept for compatibility.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Payload {
    pub timestamp: Option<u64>,
    pub seq: Option<u8>,
    pub metrics: Vec<Metric>,
    pub uuid: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl Payload {
    /// Birth payload (NBIRTH/DBIRTH): fully named metrics, seq required.
    ///
    /// Checks the birth shape eagerly so a malformed set never reaches the
    /// wire: every metric named, no Unknown datatypes.
    pub fn birth(timestamp: Option<u64>, seq: u8, metrics: Vec<Metric>) -> Result<Self> {
        let payload = Self {
            timestamp,
            seq: Some(seq),
            metrics,
            uuid: None,
            body: None,
        };
        payload.check_birth_metrics()?;
        Ok(payload)
    }

    /// Data payload (NDATA/DDATA): metrics may be alias-only.
    pub fn data(timestamp: Option<u64>, seq: u8, metrics: Vec<Metric>) -> Result<Self> {
        for metric in &metrics {
            if metric.name.is_none() && metric.alias.is_none() {
                return Err(Error::InvalidPayload(
                    "data metric carries neither name nor alias".into(),
                ));
            }
        }
        Ok(Self {
            timestamp,
            seq: Some(seq),
            metrics,
            uuid: None,
            body: None,
        })
    }

    /// Command payload (NCMD/DCMD): never sequenced.
    pub fn command(timestamp: Option<u64>, metrics: Vec<Metric>) -> Result<Self> {
        for metric in &metrics {
            if metric.name.is_none() && metric.alias.is_none() {
                return Err(Error::InvalidPayload(
                    "command metric carries neither name nor alias".into(),
                ));
            }
        }
        Ok(Self {
            timestamp,
            seq: None,
            metrics,
            uuid: None,
            body: None,
        })
    }

    /// NDEATH payload: the `bdSeq` metric pairing it to its birth.
    ///
    /// Registered as the transport last-will, so `timestamp` is optional
    /// (the broker delivers it at an unknowable later time).
    pub fn node_death(timestamp: Option<u64>, bd_seq: u8) -> Self {
        let bd_seq_metric = Metric {
            name: Some(config::BDSEQ_METRIC.into()),
            alias: None,
            datatype: DataType::Int64,
            value: Some(MetricValue::Int64(i64::from(bd_seq))),
            timestamp,
            is_historical: false,
            is_transient: false,
            properties: None,
            metadata: None,
        };
        Self {
            timestamp,
            seq: None,
            metrics: vec![bd_seq_metric],
            uuid: None,
            body: None,
        }
    }

    /// DDEATH payload: sequenced, no metrics.
    pub fn device_death(timestamp: Option<u64>, seq: u8) -> Self {
        Self {
            timestamp,
            seq: Some(seq),
            metrics: Vec::new(),
            uuid: None,
            body: None,
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// First metric with the given name.
    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics
            .iter()
            .find(|m| m.name.as_deref() == Some(name))
    }

    /// Extract the `bdSeq` metric value.
    ///
    /// Accepts Int64/UInt64 carriers (both appear in the wild) but the
    /// value itself must sit in 0-255, like every Sparkplug counter.
    pub fn bd_seq(&self) -> Result<u8> {
        let metric = self.metric(config::BDSEQ_METRIC).ok_or_else(|| {
            Error::InvalidPayload(format!("payload carries no {} metric", config::BDSEQ_METRIC))
        })?;
        let raw = match metric.value {
            Some(MetricValue::Int64(v)) => v,
            Some(MetricValue::UInt64(v)) if v <= i64::MAX as u64 => v as i64,
            Some(ref other) => {
                return Err(Error::InvalidPayload(format!(
                    "{} metric has kind {}, expected Int64",
                    config::BDSEQ_METRIC,
                    other.kind_name()
                )))
            }
            None => {
                return Err(Error::InvalidPayload(format!(
                    "{} metric is null",
                    config::BDSEQ_METRIC
                )))
            }
        };
        if !(0..=255).contains(&raw) {
            return Err(Error::InvalidPayload(format!(
                "{} value {raw} outside 0-255",
                config::BDSEQ_METRIC
            )));
        }
        Ok(raw as u8)
    }

    /// Check this payload against the shape rules of a message kind.
    ///
    /// Host-side dispatch runs this before applying inbound payloads;
    /// violations escalate like any schema fault.
    pub fn validate(&self, kind: MessageType) -> Result<()> {
        match kind {
            MessageType::NBirth | MessageType::DBirth => {
                if self.seq.is_none() {
                    return Err(Error::InvalidPayload(format!("{kind} payload has no seq")));
                }
                self.check_birth_metrics()
            }
            MessageType::NData | MessageType::DData => {
                if self.seq.is_none() {
                    return Err(Error::InvalidPayload(format!("{kind} payload has no seq")));
                }
                for metric in &self.metrics {
                    if metric.name.is_none() && metric.alias.is_none() {
                        return Err(Error::InvalidPayload(
                            "data metric carries neither name nor alias".into(),
                        ));
                    }
                }
                Ok(())
            }
            MessageType::NCmd | MessageType::DCmd => {
                if self.seq.is_some() {
                    return Err(Error::InvalidPayload(format!(
                        "{kind} payload must not carry seq"
                    )));
                }
                Ok(())
            }
            MessageType::NDeath => self.bd_seq().map(|_| ()),
            MessageType::DDeath => {
                if self.seq.is_none() {
                    return Err(Error::InvalidPayload("DDEATH payload has no seq".into()));
                }
                Ok(())
            }
            MessageType::State => Err(Error::InvalidPayload(
                "STATE messages use StatePayload, not a metric payload".into(),
            )),
        }
    }

    fn check_birth_metrics(&self) -> Result<()> {
        for metric in &self.metrics {
            let name = match metric.name {
                Some(ref n) if !n.is_empty() => n,
                _ => {
                    return Err(Error::InvalidPayload(
                        "birth metric without a name".into(),
                    ))
                }
            };
            if metric.datatype == DataType::Unknown {
                return Err(Error::InvalidPayload(format!(
                    "birth metric '{name}' has datatype Unknown"
                )));
            }
        }
        Ok(())
    }
}

/// The Host Application STATE document.
///
/// Always encoded as JSON (`{"online": ..., "timestamp": ...}`) regardless
/// of the engine's configured metric encoding scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatePayload {
    pub timestamp: u64,
    pub online: bool,
}

impl StatePayload {
    pub fn online(timestamp: u64) -> Self {
        Self { timestamp, online: true }
    }

    pub fn offline(timestamp: u64) -> Self {
        Self { timestamp, online: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str, v: i32) -> Metric {
        Metric::new(name, DataType::Int32, v).expect("valid metric")
    }

    #[test]
    fn test_birth_requires_named_typed_metrics() {
        let ok = Payload::birth(Some(10), 0, vec![named("a", 1), named("b", 2)]);
        assert!(ok.is_ok());

        let unnamed = Payload::birth(
            Some(10),
            0,
            vec![Metric {
                name: None,
                ..named("a", 1)
            }],
        );
        assert!(matches!(unnamed, Err(Error::InvalidPayload(_))), "birth metrics must be named");

        let untyped = Payload::birth(Some(10), 0, vec![Metric::null("a", DataType::Unknown)]);
        assert!(
            matches!(untyped, Err(Error::InvalidPayload(_))),
            "birth metrics must declare a datatype"
        );
    }

    #[test]
    fn test_data_accepts_alias_only_metrics() {
        let alias_only = Metric {
            name: None,
            ..named("a", 1).with_alias(4)
        };
        let p = Payload::data(Some(10), 1, vec![alias_only]).expect("alias-only data is legal");
        assert!(p.validate(MessageType::NData).is_ok());

        let orphan = Metric {
            name: None,
            alias: None,
            ..named("a", 1)
        };
        assert!(
            Payload::data(Some(10), 1, vec![orphan]).is_err(),
            "a data metric needs a name or an alias"
        );
    }

    #[test]
    fn test_command_never_carries_seq() {
        let cmd = Payload::command(Some(10), vec![named("Node Control/Rebirth", 0)])
            .expect("valid command");
        assert_eq!(cmd.seq, None);
        assert!(cmd.validate(MessageType::NCmd).is_ok());

        let mut sequenced = cmd.clone();
        sequenced.seq = Some(3);
        assert!(
            sequenced.validate(MessageType::NCmd).is_err(),
            "commands must not be sequenced"
        );
    }

    #[test]
    fn test_node_death_carries_bdseq() {
        let death = Payload::node_death(None, 7);
        assert_eq!(death.bd_seq().expect("death carries bdSeq"), 7);
        assert!(death.validate(MessageType::NDeath).is_ok());
        assert_eq!(death.seq, None, "NDEATH pairs by bdSeq, not seq");

        let empty = Payload::default();
        assert!(empty.bd_seq().is_err(), "missing bdSeq metric should error");
    }

    #[test]
    fn test_bd_seq_range_checked() {
        let mut death = Payload::node_death(Some(1), 0);
        death.metrics[0].value = Some(MetricValue::Int64(300));
        assert!(
            matches!(death.bd_seq(), Err(Error::InvalidPayload(_))),
            "bdSeq outside 0-255 should be rejected"
        );

        death.metrics[0].value = Some(MetricValue::Int64(-1));
        assert!(death.bd_seq().is_err());

        death.metrics[0].value = Some(MetricValue::UInt64(255));
        assert_eq!(death.bd_seq().expect("UInt64 carrier accepted"), 255);
    }

    #[test]
    fn test_device_death_is_sequenced() {
        let death = Payload::device_death(Some(10), 42);
        assert!(death.validate(MessageType::DDeath).is_ok());

        let mut unsequenced = death.clone();
        unsequenced.seq = None;
        assert!(unsequenced.validate(MessageType::DDeath).is_err());
    }

    #[test]
    fn test_validate_rejects_state_kind() {
        let p = Payload::default();
        assert!(
            p.validate(MessageType::State).is_err(),
            "STATE is a JSON document, not a metric payload"
        );
    }

    #[test]
    fn test_metric_lookup_by_name() {
        let p = Payload::data(Some(10), 1, vec![named("a", 1), named("b", 2)]).expect("valid data");
        assert_eq!(
            p.metric("b").and_then(|m| m.value.clone()),
            Some(MetricValue::Int32(2))
        );
        assert!(p.metric("missing").is_none());
    }
}
