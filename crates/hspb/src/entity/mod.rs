// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol entities.
//!
//! The publishing side ([`EdgeNode`], [`Device`]) and the consuming
//! side ([`HostApplication`]) of a deployment, plus the relay that is
//! both at once ([`DataOpsNode`]). All of them move through the same
//! four-state lifecycle:
//!
//! ```text
//!   Offline ──connect──> Birthing ──birth published/seen──> Online
//!      ^                                                      │
//!      └──────── death ────────┐            fault             │
//!                              v              v               v
//!                           Offline <──── Faulted <───────────┘
//! ```
//!
//! `Faulted` is a consuming-side verdict about a remote publisher: the
//! mirror stops applying data until a fresh birth resynchronizes it.

pub mod data_ops;
pub mod edge_node;
pub mod host;

pub use data_ops::{DataOpsNode, TransformHook};
pub use edge_node::{CommandHook, Device, EdgeNode};
pub use host::{HostApplication, HostView};

/// Lifecycle state shared by every entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Offline,
    Birthing,
    Online,
    Faulted,
}

impl EntityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityState::Offline => "offline",
            EntityState::Birthing => "birthing",
            EntityState::Online => "online",
            EntityState::Faulted => "faulted",
        }
    }

    /// Move to `to`, logging the transition when it changes anything.
    pub(crate) fn advance(self, to: EntityState, context: &str) -> EntityState {
        if self != to {
            log::info!("[EntityState::advance] {context}: {self} -> {to}");
        }
        to
    }
}

impl std::fmt::Display for EntityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a mirror was marked [`EntityState::Faulted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultReason {
    /// Sequence number gap in the data run.
    Sequence,
    /// Payload violated the declared birth scope.
    Schema,
    /// Payload from a known node failed to decode at all.
    Decode,
    /// Data arrived for a session with no birth on record.
    NoBirth,
}

impl FaultReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultReason::Sequence => "sequence gap",
            FaultReason::Schema => "schema violation",
            FaultReason::Decode => "undecodable payload",
            FaultReason::NoBirth => "data without birth",
        }
    }
}

impl std::fmt::Display for FaultReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_state_advance_returns_target() {
        let state = EntityState::Offline;
        let state = state.advance(EntityState::Birthing, "test");
        assert_eq!(state, EntityState::Birthing);
        assert_eq!(state.advance(state, "test"), state, "self-transition is a no-op");
    }

    #[test]
    fn test_fault_reason_strings() {
        assert_eq!(FaultReason::Sequence.to_string(), "sequence gap");
        assert_eq!(FaultReason::NoBirth.to_string(), "data without birth");
    }
}
