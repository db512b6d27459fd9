use thiserror::Error;

use crate::negotiation::NegotiationState;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("malformed signaling message: {0}")]
    MalformedMessage(String),
    #[error("unknown signaling method {0:?}")]
    UnknownMethod(String),
    #[error("no pending request with id {0}")]
    UnknownCorrelationId(u64),
    #[error("request id {0} is already pending")]
    DuplicateId(u64),
    #[error("negotiation failed during {operation}: {reason}")]
    NegotiationFailed {
        operation: &'static str,
        reason: String,
    },
    #[error("{event} not accepted while negotiation is {state}")]
    InvalidTransition {
        state: NegotiationState,
        event: &'static str,
    },
    #[error("signaling channel error: {0}")]
    Channel(String),
    #[error("signaling session is no longer running")]
    SessionClosed,
}

impl SignalingError {
    /// Fatal errors end the session; everything else is confined to the frame
    /// or negotiation round that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SignalingError::DuplicateId(_) | SignalingError::Channel(_))
    }

    pub(crate) fn malformed<E: std::fmt::Display>(err: E) -> Self {
        SignalingError::MalformedMessage(err.to_string())
    }

    pub(crate) fn channel<E: std::fmt::Display>(err: E) -> Self {
        SignalingError::Channel(err.to_string())
    }
}

/// Error reported by a peer-connection collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PeerError(pub String);

impl PeerError {
    pub fn new<E: std::fmt::Display>(err: E) -> Self {
        PeerError(err.to_string())
    }
}
