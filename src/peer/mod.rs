pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod negotiation;
pub mod state;
pub mod types;

pub use connection::EndpointCoordinator;
pub use data_channel::ChannelObserver;
pub use ice::ConnectivityObserver;
pub use negotiation::NegotiationObserver;
pub use state::EndpointState;
pub use types::{
    CandidateRecord, ChannelOptions, ChannelState, IceServerConfig, IceServerKind,
    PeerConnectionState, SdpKind, SessionDescription,
};
