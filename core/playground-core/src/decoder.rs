//! Envelope decoding and the readiness state machine.
//!
//! Decoding runs size check → JSON → envelope schema → kind → payload, and
//! each step fails with a typed error instead of panicking. Unknown kinds are
//! protocol faults; everything else that fails is a transport fault.

use playground_protocol::{parse_envelope, parse_inbound, InboundEvent, InboundKind};
use serde_json::Value;

use crate::error::{BridgeError, ProtocolError, TransportError};
use crate::transport::RawMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Uninitialized,
    /// Mounted, waiting for the first full snapshot.
    Loading,
    Ready,
    /// Global failure. Only a user reload leaves this state.
    Error(BridgeError),
}

impl Readiness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Readiness::Uninitialized => "uninitialized",
            Readiness::Loading => "loading",
            Readiness::Ready => "ready",
            Readiness::Error(_) => "error",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }

    pub fn error(&self) -> Option<&BridgeError> {
        match self {
            Readiness::Error(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Mount,
    FullSnapshot,
    Fault(BridgeError),
    Reload,
}

/// Returns `None` when the transition leaves the state unchanged.
pub fn next_readiness(current: &Readiness, transition: Transition) -> Option<Readiness> {
    match (current, transition) {
        (Readiness::Uninitialized, Transition::Mount) => Some(Readiness::Loading),
        (Readiness::Loading, Transition::FullSnapshot) => Some(Readiness::Ready),
        (Readiness::Error(_), Transition::Fault(_)) => None,
        (_, Transition::Fault(err)) => Some(Readiness::Error(err)),
        (Readiness::Error(_), Transition::Reload) => Some(Readiness::Loading),
        _ => None,
    }
}

pub fn decode(raw: RawMessage, max_bytes: usize) -> Result<InboundEvent, BridgeError> {
    let size = raw.byte_len();
    if size > max_bytes {
        return Err(TransportError::MessageTooLarge {
            size,
            max: max_bytes,
        }
        .into());
    }

    let value = match raw {
        RawMessage::Json(value) => value,
        RawMessage::Text(text) => serde_json::from_str::<Value>(&text).map_err(|err| {
            TransportError::InvalidJson {
                details: err.to_string(),
            }
        })?,
    };

    let envelope = parse_envelope(value).map_err(TransportError::Schema)?;
    let kind = InboundKind::parse(&envelope.kind)
        .ok_or_else(|| ProtocolError::UnknownKind(envelope.kind.clone()))?;
    let event = parse_inbound(kind, envelope).map_err(TransportError::Schema)?;
    Ok(event)
}
