// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sequence numbering.
//!
//! Two counters live on the publishing side: the per-node message
//! sequence ([`SeqCounter`], 0-255 wrapping, shared by the node and all
//! its devices) and the birth/death pairing counter ([`BdSeqCounter`]).
//! The consuming side mirrors the message sequence with a
//! [`SeqTracker`] that flags gaps without advancing past them.

use crate::error::Error;

// =======================================================================
// Publisher side
// =======================================================================

/// Per-node message sequence counter.
///
/// One counter per edge node; device payloads draw from their parent's
/// counter. A birth always carries seq 0 and restarts the run.
#[derive(Debug, Default, Clone)]
pub struct SeqCounter {
    next: u8,
}

impl SeqCounter {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Sequence number for a birth. Always 0; the next data message
    /// gets 1.
    pub fn birth(&mut self) -> u8 {
        self.next = 1;
        0
    }

    /// Sequence number for a data or device-death message. Wraps
    /// 255 -> 0 without any birth involvement.
    pub fn next(&mut self) -> u8 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }
}

/// Birth/death pairing counter.
///
/// Advanced once per connection attempt, BEFORE the will is registered,
/// so the NDEATH sitting at the broker always names the bdSeq of the
/// birth it guards. A fresh node therefore births with bdSeq 1, not 0.
#[derive(Debug, Default, Clone)]
pub struct BdSeqCounter {
    value: u8,
}

impl BdSeqCounter {
    pub fn new() -> Self {
        Self { value: 0 }
    }

    /// The bdSeq of the current (or most recent) session.
    pub fn current(&self) -> u8 {
        self.value
    }

    /// Advance for a new connection attempt and return the new value.
    pub fn advance(&mut self) -> u8 {
        self.value = self.value.wrapping_add(1);
        self.value
    }
}

// =======================================================================
// Consumer side
// =======================================================================

/// Mirrors a remote node's message sequence.
///
/// On a fault the tracker stays where it was; the caller decides
/// whether to request a rebirth, and the next birth resynchronizes.
#[derive(Debug, Default, Clone)]
pub struct SeqTracker {
    expected: u8,
}

impl SeqTracker {
    pub fn new() -> Self {
        Self { expected: 0 }
    }

    /// Resynchronize from a birth. Births are expected to carry seq 0;
    /// anything else is tolerated with a warning since the birth is
    /// authoritative either way.
    pub fn birth(&mut self, seq: u8) {
        if seq != 0 {
            log::warn!("[SeqTracker::birth] birth carried seq {seq}, expected 0");
        }
        self.expected = seq.wrapping_add(1);
    }

    /// Check a data message's sequence number.
    pub fn check(&mut self, actual: u8) -> Result<(), Error> {
        if actual != self.expected {
            return Err(Error::SequenceFault {
                expected: self.expected,
                actual,
            });
        }
        self.expected = actual.wrapping_add(1);
        Ok(())
    }

    pub fn expected(&self) -> u8 {
        self.expected
    }
}
