// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol constants and engine configuration - single source of truth.
//!
//! All Sparkplug B literals (namespace token, reserved metric names, QoS
//! defaults) live here. **Never hardcode them elsewhere.**
//!
//! Two levels:
//! - **Static**: compile-time protocol constants.
//! - **Per-entity**: [`NodeConfig`] / [`HostConfig`] passed at construction.

use crate::codec::EncodingScheme;
use crate::transport::QoS;

// =======================================================================
// Protocol constants (Sparkplug B v3.0)
// =======================================================================

/// Topic namespace token for Sparkplug B payloads.
pub const NAMESPACE: &str = "spBv1.0";

/// Reserved topic token for Host Application state messages.
///
/// Also reserved as a group id: `spBv1.0/STATE/...` must never be
/// ambiguous with a group named `STATE`.
pub const STATE_TOKEN: &str = "STATE";

/// Metric name pairing an NDEATH to its NBIRTH.
pub const BDSEQ_METRIC: &str = "bdSeq";

/// Command metric requesting a full rebirth from an Edge Node.
pub const REBIRTH_METRIC: &str = "Node Control/Rebirth";

// =======================================================================
// QoS defaults (MQTT mapping used by the reference deployments)
// =======================================================================

/// Births, data and deaths ride QoS 0: the sequence counters detect loss.
pub const QOS_DATA: QoS = QoS::AtMostOnce;

/// Commands must not be lost silently.
pub const QOS_COMMAND: QoS = QoS::AtLeastOnce;

/// STATE documents are retained and must survive delivery races.
pub const QOS_STATE: QoS = QoS::AtLeastOnce;

// =======================================================================
// Per-entity configuration
// =======================================================================

/// Configuration for an Edge Node (and its Data Ops variant).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Payload encoding scheme. Fixed per node, never negotiated.
    pub encoding: EncodingScheme,
    /// Publish birth certificates with the retain flag.
    ///
    /// Deviation from base Sparkplug, on by default: late-joining hosts
    /// recover the full metric scope from the broker instead of having to
    /// request a rebirth.
    pub retain_births: bool,
    /// Re-birth automatically when an update introduces metric names
    /// unknown to the current birth scope.
    pub rebirth_on_new_metric: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            encoding: EncodingScheme::Binary,
            retain_births: true,
            rebirth_on_new_metric: true,
        }
    }
}

/// Configuration for a Host Application.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Encoding scheme used for outbound commands.
    pub encoding: EncodingScheme,
    /// Issue a rebirth request (NCMD) automatically when a session faults.
    pub auto_rebirth: bool,
    /// On reconnect, request rebirth from every session whose last update
    /// predates the host's offline window.
    pub rebirth_on_reconnect: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            encoding: EncodingScheme::Binary,
            auto_rebirth: true,
            rebirth_on_reconnect: true,
        }
    }
}
