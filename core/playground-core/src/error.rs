//! Error types for playground-core operations.
//!
//! Global failures ([`TransportError`], [`ProtocolError`], host-reported
//! errors) move the decoder into its `Error` state and are wrapped in
//! [`BridgeError`]. Per-test execution failures travel as
//! [`playground_protocol::RuntimeError`] inside results and never reach this
//! module. Discarded stale results are not errors at all; see [`DiscardReason`].

use std::path::PathBuf;

use playground_protocol::ErrorInfo;
use serde::Serialize;

/// An inbound message could not be turned into a well-formed envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("message of {size} bytes exceeds limit of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("message is not valid JSON: {details}")]
    InvalidJson { details: String },

    #[error("envelope failed schema validation: {0}")]
    Schema(ErrorInfo),

    #[error("host channel closed: {details}")]
    ChannelClosed { details: String },

    #[error("failed to serialize command: {details}")]
    Serialize { details: String },
}

/// A well-formed envelope that the bridge cannot act on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unrecognized event kind: {0}")]
    UnknownKind(String),

    #[error("sequence {incoming} regresses below current sequence {current}")]
    SequenceRegression { incoming: u64, current: u64 },
}

/// A failure that takes the whole panel into its error state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("host reported a failure: {message}")]
    Host { message: String },
}

impl BridgeError {
    /// Machine-readable code for the render layer.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Transport(TransportError::MessageTooLarge { .. }) => "message_too_large",
            BridgeError::Transport(TransportError::InvalidJson { .. }) => "invalid_json",
            BridgeError::Transport(TransportError::Schema(_)) => "schema_violation",
            BridgeError::Transport(TransportError::ChannelClosed { .. }) => "channel_closed",
            BridgeError::Transport(TransportError::Serialize { .. }) => "serialize_failed",
            BridgeError::Protocol(ProtocolError::UnknownKind(_)) => "unknown_kind",
            BridgeError::Protocol(ProtocolError::SequenceRegression { .. }) => {
                "sequence_regression"
            }
            BridgeError::Host { .. } => "host_error",
        }
    }
}

/// Why an accepted inbound event never reached the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DiscardReason {
    /// Result for a run the user cancelled.
    Cancelled { correlation_id: String },
    /// Result for a run replaced by a newer run of the same test case.
    Superseded { correlation_id: String },
    /// Result for a correlation id this panel has no record of.
    UnknownCorrelation { correlation_id: String },
    SequenceRegression { incoming: u64, current: u64 },
    /// Incremental update or diagnostics with no snapshot to merge into.
    NoBaseSnapshot {
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
    },
    /// Event arrived before the panel was mounted.
    NotMounted,
}

impl DiscardReason {
    pub fn code(&self) -> &'static str {
        match self {
            DiscardReason::Cancelled { .. } => "cancelled",
            DiscardReason::Superseded { .. } => "superseded",
            DiscardReason::UnknownCorrelation { .. } => "unknown_correlation",
            DiscardReason::SequenceRegression { .. } => "sequence_regression",
            DiscardReason::NoBaseSnapshot { .. } => "no_base_snapshot",
            DiscardReason::NotMounted => "not_mounted",
        }
    }

    /// True for the expected outcome of cancellation or supersession.
    pub fn is_stale_result(&self) -> bool {
        matches!(
            self,
            DiscardReason::Cancelled { .. } | DiscardReason::Superseded { .. }
        )
    }
}

/// A user intent that cannot be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    #[error("panel is not ready")]
    NotReady,

    #[error("no test case {test_case} on function {function}")]
    UnknownTarget { function: String, test_case: String },

    #[error("no function {0} in the current snapshot")]
    UnknownFunction(String),

    #[error("run {0} is not in flight")]
    NotLive(String),

    #[error("reload is only available from the error state")]
    ReloadUnavailable,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    HomeNotFound,

    #[error("Failed to read panel config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Panel config malformed: {path}: {details}")]
    Malformed { path: PathBuf, details: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_error_codes_follow_variant() {
        let err = BridgeError::from(ProtocolError::UnknownKind("nope".to_string()));
        assert_eq!(err.code(), "unknown_kind");
        assert_eq!(err.to_string(), "unrecognized event kind: nope");

        let err = BridgeError::from(TransportError::Schema(ErrorInfo::new(
            "missing_field",
            "sequence is required for ready",
        )));
        assert_eq!(err.code(), "schema_violation");
    }

    #[test]
    fn only_cancel_and_supersede_are_stale_results() {
        let cancelled = DiscardReason::Cancelled {
            correlation_id: "corr-1".to_string(),
        };
        assert!(cancelled.is_stale_result());
        assert!(!DiscardReason::NotMounted.is_stale_result());
        assert!(!DiscardReason::UnknownCorrelation {
            correlation_id: "corr-9".to_string()
        }
        .is_stale_result());
    }

    #[test]
    fn discard_reason_serializes_with_tag() {
        let value = serde_json::to_value(DiscardReason::SequenceRegression {
            incoming: 5,
            current: 7,
        })
        .expect("json");
        assert_eq!(value["reason"], "sequence_regression");
        assert_eq!(value["incoming"], 5);
    }
}
