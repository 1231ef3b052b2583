//! Error types for the local negotiation run

use crate::peer::types::SdpKind;
use std::time::Duration;

/// Engine or endpoint construction failed. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The ICE server list is unusable
    #[error("Invalid ICE server {url}: {reason}")]
    InvalidIceServer { url: String, reason: String },

    /// The engine refused to build a peer connection
    #[error("Failed to create peer connection for {endpoint}: {source}")]
    Endpoint {
        endpoint: String,
        #[source]
        source: EngineError,
    },

    /// The initiating side could not open its data channel
    #[error("Failed to create data channel {label}: {source}")]
    Channel {
        label: String,
        #[source]
        source: EngineError,
    },
}

/// Offer/answer negotiation did not produce a description. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// No description was produced within the phase budget
    #[error("Timed out after {budget:?} waiting for {kind} creation on {endpoint}")]
    Timeout {
        kind: SdpKind,
        endpoint: String,
        budget: Duration,
    },

    /// The engine reported that it could not create the description
    #[error("{kind} creation failed on {endpoint}: {reason}")]
    CreateFailed {
        kind: SdpKind,
        endpoint: String,
        reason: String,
    },
}

impl NegotiationError {
    pub fn kind(&self) -> SdpKind {
        match self {
            NegotiationError::Timeout { kind, .. } | NegotiationError::CreateFailed { kind, .. } => {
                *kind
            }
        }
    }
}

/// A relayed candidate was rejected by the destination engine.
/// The candidate is dropped and the run continues.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Dropping candidate for {media_id}:{media_index}: {reason}")]
pub struct RelayError {
    pub media_id: String,
    pub media_index: u16,
    pub reason: String,
}

/// The greeting could not be sent on an open channel. Logged only.
#[derive(Debug, thiserror::Error)]
#[error("Failed to send on data channel {label}: {source}")]
pub struct SendError {
    pub label: String,
    #[source]
    pub source: EngineError,
}

/// Failure reported by a connection engine call
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("WebRTC error: {0}")]
    Rtc(#[from] webrtc::Error),

    #[error("Data channel is not open (state: {0:?})")]
    ChannelNotOpen(crate::peer::types::ChannelState),

    #[error("{0}")]
    Rejected(String),
}

/// A best-effort phase ran out of budget. Recorded in the summary, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, thiserror::Error)]
pub enum PhaseTimeout {
    #[error("Candidate gathering did not complete on both endpoints within {0:?}")]
    Gathering(Duration),

    #[error("Endpoints did not both reach Connected within {0:?}")]
    Connectivity(Duration),

    #[error("Messages were not received on both endpoints within {0:?}")]
    Messages(Duration),
}

/// Fatal outcome of a full session run
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
}
