// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sparkplug B topic model.
//!
//! Three topic forms share the `spBv1.0` namespace:
//!
//! ```text
//! spBv1.0/<group_id>/<message_type>/<edge_node_id>             (node, 4 segments)
//! spBv1.0/<group_id>/<message_type>/<edge_node_id>/<device_id> (device, 5 segments)
//! spBv1.0/STATE/<host_id>                                      (host state, 3 segments)
//! ```
//!
//! Parsing and building are inverse bijections over valid topics: ids are
//! validated on both paths (non-empty, no `/` `+` `#`, group never the
//! reserved `STATE` token), and the segment count must match the message
//! type's node/device class.

use crate::config;
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// The nine Sparkplug B message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Edge Node birth certificate
    NBirth,
    /// Edge Node death certificate
    NDeath,
    /// Device birth certificate
    DBirth,
    /// Device death certificate
    DDeath,
    /// Edge Node data
    NData,
    /// Device data
    DData,
    /// Command to an Edge Node
    NCmd,
    /// Command to a Device
    DCmd,
    /// Host Application state
    State,
}

impl MessageType {
    /// Topic segment spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::NBirth => "NBIRTH",
            MessageType::NDeath => "NDEATH",
            MessageType::DBirth => "DBIRTH",
            MessageType::DDeath => "DDEATH",
            MessageType::NData => "NDATA",
            MessageType::DData => "DDATA",
            MessageType::NCmd => "NCMD",
            MessageType::DCmd => "DCMD",
            MessageType::State => "STATE",
        }
    }

    /// True for the 4-segment (node-level) message types.
    pub fn is_node_message(self) -> bool {
        matches!(
            self,
            MessageType::NBirth | MessageType::NDeath | MessageType::NData | MessageType::NCmd
        )
    }

    /// True for the 5-segment (device-level) message types.
    pub fn is_device_message(self) -> bool {
        matches!(
            self,
            MessageType::DBirth | MessageType::DDeath | MessageType::DData | MessageType::DCmd
        )
    }

    pub fn is_birth(self) -> bool {
        matches!(self, MessageType::NBirth | MessageType::DBirth)
    }

    pub fn is_death(self) -> bool {
        matches!(self, MessageType::NDeath | MessageType::DDeath)
    }

    pub fn is_data(self) -> bool {
        matches!(self, MessageType::NData | MessageType::DData)
    }

    pub fn is_command(self) -> bool {
        matches!(self, MessageType::NCmd | MessageType::DCmd)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "NBIRTH" => MessageType::NBirth,
            "NDEATH" => MessageType::NDeath,
            "DBIRTH" => MessageType::DBirth,
            "DDEATH" => MessageType::DDeath,
            "NDATA" => MessageType::NData,
            "DDATA" => MessageType::DData,
            "NCMD" => MessageType::NCmd,
            "DCMD" => MessageType::DCmd,
            "STATE" => MessageType::State,
            other => return Err(Error::InvalidTopic(format!("unknown message type '{other}'"))),
        })
    }
}

/// A parsed, validated Sparkplug B topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Node or device message topic.
    Message {
        group_id: String,
        message_type: MessageType,
        edge_node_id: String,
        /// Present exactly when `message_type` is a device message.
        device_id: Option<String>,
    },
    /// Host Application state topic.
    State { host_id: String },
}

impl Topic {
    /// Node-level topic (`NBIRTH`/`NDEATH`/`NDATA`/`NCMD`).
    pub fn node(
        group_id: impl Into<String>,
        message_type: MessageType,
        edge_node_id: impl Into<String>,
    ) -> Result<Self> {
        let group_id = group_id.into();
        let edge_node_id = edge_node_id.into();
        if !message_type.is_node_message() {
            return Err(Error::InvalidTopic(format!(
                "{message_type} is not a node-level message type"
            )));
        }
        validate_group(&group_id)?;
        validate_id(&edge_node_id, "edge_node_id")?;
        Ok(Topic::Message {
            group_id,
            message_type,
            edge_node_id,
            device_id: None,
        })
    }

    /// Device-level topic (`DBIRTH`/`DDEATH`/`DDATA`/`DCMD`).
    pub fn device(
        group_id: impl Into<String>,
        message_type: MessageType,
        edge_node_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Result<Self> {
        let group_id = group_id.into();
        let edge_node_id = edge_node_id.into();
        let device_id = device_id.into();
        if !message_type.is_device_message() {
            return Err(Error::InvalidTopic(format!(
                "{message_type} is not a device-level message type"
            )));
        }
        validate_group(&group_id)?;
        validate_id(&edge_node_id, "edge_node_id")?;
        validate_id(&device_id, "device_id")?;
        Ok(Topic::Message {
            group_id,
            message_type,
            edge_node_id,
            device_id: Some(device_id),
        })
    }

    /// Host state topic (`spBv1.0/STATE/<host_id>`).
    pub fn state(host_id: impl Into<String>) -> Result<Self> {
        let host_id = host_id.into();
        validate_id(&host_id, "host_id")?;
        Ok(Topic::State { host_id })
    }

    /// Parse a topic string into its validated form.
    pub fn parse(s: &str) -> Result<Self> {
        let segments: Vec<&str> = s.split('/').collect();
        match segments.as_slice() {
            [ns, state, host_id] if *state == config::STATE_TOKEN => {
                check_namespace(ns, s)?;
                Topic::state(*host_id)
            }
            [ns, group_id, message_type, edge_node_id] => {
                check_namespace(ns, s)?;
                let message_type = MessageType::from_str(message_type)?;
                Topic::node(*group_id, message_type, *edge_node_id)
            }
            [ns, group_id, message_type, edge_node_id, device_id] => {
                check_namespace(ns, s)?;
                let message_type = MessageType::from_str(message_type)?;
                Topic::device(*group_id, message_type, *edge_node_id, *device_id)
            }
            _ => Err(Error::InvalidTopic(format!(
                "'{s}' has {} segment(s), expected 3, 4 or 5",
                segments.len()
            ))),
        }
    }

    /// Render the topic string. Inverse of [`Topic::parse`].
    pub fn to_topic_string(&self) -> String {
        match self {
            Topic::Message {
                group_id,
                message_type,
                edge_node_id,
                device_id: None,
            } => format!("{}/{group_id}/{message_type}/{edge_node_id}", config::NAMESPACE),
            Topic::Message {
                group_id,
                message_type,
                edge_node_id,
                device_id: Some(device_id),
            } => format!(
                "{}/{group_id}/{message_type}/{edge_node_id}/{device_id}",
                config::NAMESPACE
            ),
            Topic::State { host_id } => {
                format!("{}/{}/{host_id}", config::NAMESPACE, config::STATE_TOKEN)
            }
        }
    }

    /// Message type of this topic (STATE topics report [`MessageType::State`]).
    pub fn message_type(&self) -> MessageType {
        match self {
            Topic::Message { message_type, .. } => *message_type,
            Topic::State { .. } => MessageType::State,
        }
    }

    // ===================================================================
    // Subscription filters (MQTT wildcard syntax)
    // ===================================================================

    /// Everything published inside one group.
    pub fn group_filter(group_id: &str) -> String {
        format!("{}/{group_id}/#", config::NAMESPACE)
    }

    /// Commands addressed to one Edge Node.
    pub fn node_command_filter(group_id: &str, edge_node_id: &str) -> String {
        format!("{}/{group_id}/NCMD/{edge_node_id}", config::NAMESPACE)
    }

    /// Commands addressed to any device of one Edge Node.
    pub fn device_command_filter(group_id: &str, edge_node_id: &str) -> String {
        format!("{}/{group_id}/DCMD/{edge_node_id}/+", config::NAMESPACE)
    }

    /// State documents: one host, or all hosts with `None`.
    pub fn state_filter(host_id: Option<&str>) -> String {
        match host_id {
            Some(host) => format!("{}/{}/{host}", config::NAMESPACE, config::STATE_TOKEN),
            None => format!("{}/{}/+", config::NAMESPACE, config::STATE_TOKEN),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_topic_string())
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Topic::parse(s)
    }
}

fn check_namespace(ns: &str, full: &str) -> Result<()> {
    if ns != config::NAMESPACE {
        return Err(Error::InvalidTopic(format!(
            "'{full}' is not in the {} namespace",
            config::NAMESPACE
        )));
    }
    Ok(())
}

fn validate_id(id: &str, what: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidTopic(format!("{what} is empty")));
    }
    if id.contains(['/', '+', '#']) {
        return Err(Error::InvalidTopic(format!(
            "{what} '{id}' contains a reserved character"
        )));
    }
    Ok(())
}

fn validate_group(group_id: &str) -> Result<()> {
    validate_id(group_id, "group_id")?;
    if group_id == config::STATE_TOKEN {
        return Err(Error::InvalidTopic(format!(
            "group_id must not be the reserved token {}",
            config::STATE_TOKEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_parse_node_form() {
        let topic = Topic::parse("spBv1.0/FactoryA/NBIRTH/Line1").expect("valid node topic");
        assert_eq!(
            topic,
            Topic::Message {
                group_id: "FactoryA".into(),
                message_type: MessageType::NBirth,
                edge_node_id: "Line1".into(),
                device_id: None,
            }
        );
    }

    #[test]
    fn test_topic_parse_device_form() {
        let topic = Topic::parse("spBv1.0/FactoryA/DDATA/Line1/Sensor7").expect("valid device topic");
        match topic {
            Topic::Message {
                message_type,
                device_id: Some(device_id),
                ..
            } => {
                assert_eq!(message_type, MessageType::DData);
                assert_eq!(device_id, "Sensor7");
            }
            other => panic!("expected device message, got {other:?}"),
        }
    }

    #[test]
    fn test_topic_parse_state_form() {
        let topic = Topic::parse("spBv1.0/STATE/scada-primary").expect("valid state topic");
        assert_eq!(
            topic,
            Topic::State {
                host_id: "scada-primary".into()
            }
        );
        assert_eq!(topic.message_type(), MessageType::State);
    }

    #[test]
    fn test_topic_roundtrip_all_forms() {
        for s in [
            "spBv1.0/FactoryA/NBIRTH/Line1",
            "spBv1.0/FactoryA/NDEATH/Line1",
            "spBv1.0/FactoryA/NDATA/Line1",
            "spBv1.0/FactoryA/NCMD/Line1",
            "spBv1.0/FactoryA/DBIRTH/Line1/Sensor7",
            "spBv1.0/FactoryA/DDEATH/Line1/Sensor7",
            "spBv1.0/FactoryA/DDATA/Line1/Sensor7",
            "spBv1.0/FactoryA/DCMD/Line1/Sensor7",
            "spBv1.0/STATE/scada-primary",
        ] {
            let topic = Topic::parse(s).expect("valid topic");
            assert_eq!(topic.to_topic_string(), s, "parse/build should round-trip {s}");
            assert_eq!(Topic::parse(&topic.to_topic_string()).expect("reparse"), topic);
        }
    }

    #[test]
    fn test_topic_rejects_malformed_strings() {
        for s in [
            "",
            "spBv1.0",
            "spBv1.0/FactoryA",
            "spBv1.0/FactoryA/NBIRTH",                    // missing node id
            "spBv2.0/FactoryA/NBIRTH/Line1",              // wrong namespace
            "spBv1.0/FactoryA/XBIRTH/Line1",              // unknown message type
            "spBv1.0/FactoryA/NBIRTH/Line1/Sensor7",      // node type with device segment
            "spBv1.0/FactoryA/DBIRTH/Line1",              // device type without device segment
            "spBv1.0/FactoryA/NBIRTH/Line1/Sensor7/more", // 6 segments
            "spBv1.0//NBIRTH/Line1",                      // empty group
            "spBv1.0/Fac+toryA/NBIRTH/Line1",             // wildcard in id
            "spBv1.0/FactoryA/NBIRTH/Line#1",
            "spBv1.0/STATE/NBIRTH/Line1",                 // reserved group token
        ] {
            assert!(
                matches!(Topic::parse(s), Err(Error::InvalidTopic(_))),
                "'{s}' should be rejected"
            );
        }
    }

    #[test]
    fn test_topic_state_token_only_matches_three_segments() {
        // Reserved STATE token: 3 segments is the state form, anything else is invalid.
        assert!(Topic::parse("spBv1.0/STATE/host").is_ok());
        assert!(Topic::parse("spBv1.0/STATE/host/extra").is_err());
    }

    #[test]
    fn test_topic_constructors_enforce_message_class() {
        assert!(
            Topic::node("G", MessageType::DBirth, "N").is_err(),
            "DBIRTH is not a node-level type"
        );
        assert!(
            Topic::device("G", MessageType::NData, "N", "D").is_err(),
            "NDATA is not a device-level type"
        );
        assert!(Topic::node("STATE", MessageType::NBirth, "N").is_err());
    }

    #[test]
    fn test_topic_filters() {
        assert_eq!(Topic::group_filter("G"), "spBv1.0/G/#");
        assert_eq!(Topic::node_command_filter("G", "N"), "spBv1.0/G/NCMD/N");
        assert_eq!(Topic::device_command_filter("G", "N"), "spBv1.0/G/DCMD/N/+");
        assert_eq!(Topic::state_filter(None), "spBv1.0/STATE/+");
        assert_eq!(Topic::state_filter(Some("h")), "spBv1.0/STATE/h");
    }

    #[test]
    fn test_message_type_predicates() {
        assert!(MessageType::NBirth.is_node_message());
        assert!(MessageType::NBirth.is_birth());
        assert!(MessageType::DDeath.is_device_message());
        assert!(MessageType::DDeath.is_death());
        assert!(MessageType::NData.is_data());
        assert!(MessageType::DCmd.is_command());
        assert!(!MessageType::State.is_node_message());
        assert!(!MessageType::State.is_device_message());
    }
}
