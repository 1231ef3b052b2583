use crate::peer::types::{
    ChannelState, GatheringState, IceConnectionState, PeerConnectionState, SignalingState,
};
use serde::Serialize;

/// Snapshot of the independent signals an endpoint exposes.
///
/// A pair counts as connected only when both endpoints have latched
/// `ever_connected`; the snapshot itself carries no combined flag.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointState {
    pub signaling: SignalingState,
    pub gathering: GatheringState,
    pub gathering_complete: bool,
    pub ice_connection: IceConnectionState,
    pub connection: PeerConnectionState,
    pub ever_connected: bool,
    pub channel: ChannelState,
    pub message_received: bool,
}
