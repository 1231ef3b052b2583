use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a session description in the offer/answer handshake
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => f.write_str("offer"),
            SdpKind::Answer => f.write_str("answer"),
        }
    }
}

/// Offer or answer produced by the connection engine.
///
/// Handing a description to the engine consumes it, so any description that
/// has more than one destination is cloned first (one clone per consumer).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    kind: SdpKind,
    body: String,
}

impl SessionDescription {
    pub fn new(kind: SdpKind, body: impl Into<String>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    pub fn offer(body: impl Into<String>) -> Self {
        Self::new(SdpKind::Offer, body)
    }

    pub fn answer(body: impl Into<String>) -> Self {
        Self::new(SdpKind::Answer, body)
    }

    pub fn kind(&self) -> SdpKind {
        self.kind
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }
}

/// One connectivity candidate, tied to the media section it was gathered for
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub media_id: String,
    pub media_index: u16,
    pub body: String,
}

impl CandidateRecord {
    pub fn new(media_id: impl Into<String>, media_index: u16, body: impl Into<String>) -> Self {
        Self {
            media_id: media_id.into(),
            media_index,
            body: body.into(),
        }
    }

    /// Candidate type (`host`, `srflx`, `prflx`, `relay`) read from the `typ` attribute
    pub fn candidate_type(&self) -> Option<&str> {
        let mut parts = self.body.split_whitespace();
        while let Some(part) = parts.next() {
            if part == "typ" {
                return parts.next();
            }
        }
        None
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalingState {
    #[default]
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatheringState {
    #[default]
    New,
    Gathering,
    Complete,
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IceConnectionState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
    Unknown,
}

/// Overall peer connection state
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Options passed to the engine when the initiating side opens a data channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    pub ordered: bool,
    pub max_retransmits: Option<u16>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            ordered: true,
            max_retransmits: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IceServerKind {
    Stun,
    Turn,
}

/// STUN/TURN server handed to the engine at endpoint construction
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceServerConfig {
    pub kind: IceServerKind,
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            kind: IceServerKind::Stun,
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            kind: IceServerKind::Turn,
            url: url.into(),
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloned_description_is_independent() {
        let original = SessionDescription::offer("v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\n");
        let first = original.clone();
        let second = original.clone();

        let consumed = first.into_body();
        assert_eq!(consumed, original.body());
        assert_eq!(second.kind(), SdpKind::Offer);
        assert_eq!(second.body().as_bytes(), original.body().as_bytes());
        assert_eq!(original, second);
    }

    #[test]
    fn candidate_type_is_read_from_typ_attribute() {
        let host = CandidateRecord::new(
            "0",
            0,
            "candidate:1 1 udp 2130706431 192.168.1.4 50000 typ host",
        );
        let srflx = CandidateRecord::new(
            "0",
            0,
            "candidate:2 1 udp 1694498815 1.2.3.4 50001 typ srflx raddr 0.0.0.0 rport 0",
        );
        let garbage = CandidateRecord::new("0", 0, "not a candidate");

        assert_eq!(host.candidate_type(), Some("host"));
        assert_eq!(srflx.candidate_type(), Some("srflx"));
        assert_eq!(garbage.candidate_type(), None);
    }

    #[test]
    fn sdp_kind_serializes_lowercase() {
        let json = serde_json::to_string(&SessionDescription::answer("v=0")).unwrap();
        assert!(json.contains("\"answer\""));
    }
}
