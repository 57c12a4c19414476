// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport boundary.
//!
//! Entities speak to an MQTT-shaped broker through the [`Transport`]
//! trait: connect with an optional last-will, publish bytes to a topic,
//! subscribe to a filter and drain a channel. The trait is synchronous;
//! callers that want concurrency put the receiver on their own thread.
//!
//! [`inmem`] provides the in-process broker used by the integration
//! tests. A production adapter wraps an MQTT client crate behind the
//! same four calls.

pub mod inmem;

pub use inmem::{InMemoryBroker, InMemoryTransport};

use crate::error::Result;
use crossbeam::channel::Receiver;

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn code(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl std::fmt::Display for QoS {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "qos{}", self.code())
    }
}

/// Connection identity and login.
#[derive(Clone, Default)]
pub struct Credentials {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Message the broker publishes on the client's behalf when the
/// connection dies without a DISCONNECT.
#[derive(Debug, Clone)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// A message delivered to a subscription.
///
/// `retain` is set only when the message was replayed from the broker's
/// retained store on subscribe, never on live delivery.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Four-call broker boundary.
pub trait Transport {
    /// Establish the session, registering `will` with the broker.
    fn connect(
        &mut self,
        endpoint: &str,
        credentials: &Credentials,
        will: Option<LastWill>,
    ) -> Result<()>;

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<()>;

    /// Subscribe to a topic filter. Matching retained messages are
    /// delivered on the returned channel before any live traffic.
    fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<Receiver<InboundMessage>>;

    /// Clean shutdown. The registered will is discarded, not fired.
    fn disconnect(&mut self) -> Result<()>;
}

/// MQTT topic filter matching (`+` one level, `#` trailing remainder).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut segments = filter.split('/');
    let mut parts = topic.split('/');
    loop {
        match (segments.next(), parts.next()) {
            // '#' swallows the rest of the topic, including nothing.
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(segment), Some(part)) if segment == part => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches_literal_and_plus() {
        assert!(topic_matches("spBv1.0/g/NDATA/n", "spBv1.0/g/NDATA/n"));
        assert!(topic_matches("spBv1.0/g/NCMD/+", "spBv1.0/g/NCMD/n1"));
        assert!(!topic_matches("spBv1.0/g/NCMD/+", "spBv1.0/g/NCMD/n1/d1"), "+ is one level");
        assert!(!topic_matches("spBv1.0/g/NDATA/n", "spBv1.0/g/NDATA/m"));
    }

    #[test]
    fn test_topic_matches_hash() {
        assert!(topic_matches("spBv1.0/g/#", "spBv1.0/g/NDATA/n/d"));
        assert!(topic_matches("spBv1.0/g/#", "spBv1.0/g"), "# also matches the parent level");
        assert!(!topic_matches("spBv1.0/g/#", "spBv1.0/h/NDATA/n"));
        assert!(topic_matches("#", "anything/at/all"));
    }

    #[test]
    fn test_topic_matches_device_command_filter() {
        assert!(topic_matches("spBv1.0/g/DCMD/n/+", "spBv1.0/g/DCMD/n/pump"));
        assert!(!topic_matches("spBv1.0/g/DCMD/n/+", "spBv1.0/g/DCMD/n"));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("c1").with_login("user", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"), "password must not appear in logs");
        assert!(rendered.contains("redacted"));
    }
}
