// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for the Sparkplug B engine.
//!
//! Two layers:
//! - [`DecodeError`]: wire-level failures raised by the payload codec.
//! - [`Error`]: everything the engine surfaces, including topic parsing,
//!   sequence tracking, metric validation and the transport boundary.
//!
//! No error here is fatal. Inbound failures are either dropped with a log
//! line or recovered through a rebirth cycle (see `entity`).

use thiserror::Error;

use crate::model::DataType;

/// Result type alias for Sparkplug operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the Sparkplug B engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Topic string does not match any Sparkplug B topic form.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// Payload bytes could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Inbound message broke sequence continuity.
    ///
    /// `expected` is the next-in-order value the tracker was waiting for,
    /// `actual` is what arrived. Recovery is a rebirth, never a skip.
    #[error("sequence fault: expected seq {expected}, got {actual}")]
    SequenceFault {
        /// Next sequence number the tracker expected
        expected: u8,
        /// Sequence number actually carried by the message
        actual: u8,
    },

    /// Metric value shape disagrees with its declared datatype.
    #[error("type mismatch for metric '{metric}': declared {declared:?}, value is {value_kind}")]
    TypeMismatch {
        /// Metric name (or alias rendering when the name is absent)
        metric: String,
        /// Datatype declared for the metric
        declared: DataType,
        /// Kind of the value actually supplied
        value_kind: &'static str,
    },

    /// Update names a metric that was never part of the birth scope.
    #[error("unknown metric '{0}': not declared at birth")]
    UnknownMetric(String),

    /// Alias already bound to a different metric within one birth scope.
    #[error("duplicate alias {alias}: already bound to '{bound_to}'")]
    DuplicateAlias {
        alias: u64,
        /// Name the alias was first bound to
        bound_to: String,
    },

    /// Operation is not legal in the entity's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Payload violates the rules of its message kind.
    ///
    /// Examples: a birth without `seq`, a command carrying one.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Failure reported by the transport adapter.
    #[error("transport: {0}")]
    Transport(String),
}

/// Wire-level decode failures.
///
/// Raised by both encoding schemes; the engine escalates these to a
/// rebirth when the bytes came from a known Edge Node.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Input ended before a declared length was satisfied.
    #[error("truncated payload: offset {offset}, need {need} more byte(s)")]
    Truncated {
        /// Byte offset at which the read was attempted
        offset: usize,
        /// Bytes still required to satisfy the read
        need: usize,
    },

    /// Datatype code is outside the known Sparkplug B set.
    #[error("unknown datatype code {0}")]
    UnknownDatatype(u32),

    /// Bytes decoded but violate a structural rule of the data model.
    ///
    /// Unknown alias, dataset arity mismatch, integer out of declared
    /// width, malformed array blob.
    #[error("schema violation: {0}")]
    SchemaViolation(String),
}

impl DecodeError {
    /// Shorthand for the truncation case, used throughout the codec.
    pub(crate) fn truncated(offset: usize, need: usize) -> Self {
        DecodeError::Truncated { offset, need }
    }

    /// Shorthand for schema violations built from format args.
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        DecodeError::SchemaViolation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_sequence_fault() {
        let err = Error::SequenceFault {
            expected: 7,
            actual: 9,
        };
        assert_eq!(
            err.to_string(),
            "sequence fault: expected seq 7, got 9",
            "SequenceFault should render both counters"
        );
    }

    #[test]
    fn test_decode_error_converts_into_error() {
        let decode = DecodeError::Truncated { offset: 12, need: 4 };
        let err: Error = decode.clone().into();
        assert_eq!(
            err,
            Error::Decode(decode),
            "DecodeError should convert via From without losing detail"
        );
    }

    #[test]
    fn test_decode_error_display_truncated() {
        let err = DecodeError::truncated(3, 8);
        assert_eq!(err.to_string(), "truncated payload: offset 3, need 8 more byte(s)");
    }

    #[test]
    fn test_type_mismatch_display_names_metric() {
        let err = Error::TypeMismatch {
            metric: "Temperature".into(),
            declared: DataType::Double,
            value_kind: "Boolean",
        };
        let rendered = err.to_string();
        assert!(
            rendered.contains("Temperature") && rendered.contains("Boolean"),
            "TypeMismatch should name the metric and the offending kind: {rendered}"
        );
    }
}
