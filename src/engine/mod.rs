//! Connection engine interface.
//!
//! The engine owns transport, ICE and DTLS. The negotiation core only issues
//! requests through [`PeerEndpoint`] and receives results on the observers it
//! registered when the endpoint was created.

#[cfg(any(test, feature = "test-util"))]
pub mod loopback;
pub mod rtc;

use crate::error::{EngineError, RelayError, SetupError};
use crate::peer::data_channel::ChannelObserver;
use crate::peer::ice::ConnectivityObserver;
use crate::peer::negotiation::NegotiationObserver;
use crate::peer::types::{
    CandidateRecord, ChannelOptions, ChannelState, IceServerConfig, PeerConnectionState,
    SessionDescription,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

#[cfg(any(test, feature = "test-util"))]
pub use loopback::{LoopbackEngine, LoopbackOptions};
pub use rtc::RtcEngine;

/// Observers an engine reports to for a single endpoint
#[derive(Clone)]
pub struct EndpointObservers {
    pub negotiation: Arc<NegotiationObserver>,
    pub connectivity: Arc<ConnectivityObserver>,
    pub channel: Arc<ChannelObserver>,
}

#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Builds one endpoint and wires its notifications (signaling state,
    /// candidate discovery, gathering state, connection state, incoming
    /// data channels) to `observers`.
    async fn create_endpoint(
        &self,
        name: &str,
        ice_servers: &[IceServerConfig],
        observers: EndpointObservers,
    ) -> Result<Arc<dyn PeerEndpoint>, SetupError>;
}

/// One peer connection inside the engine.
///
/// The create/set calls return immediately; completion is reported on the
/// observer passed in.
#[async_trait]
pub trait PeerEndpoint: Send + Sync {
    fn name(&self) -> &str;

    fn create_offer(&self, observer: Arc<NegotiationObserver>);

    fn create_answer(&self, observer: Arc<NegotiationObserver>);

    fn set_local_description(
        &self,
        observer: Arc<NegotiationObserver>,
        description: SessionDescription,
    );

    fn set_remote_description(
        &self,
        observer: Arc<NegotiationObserver>,
        description: SessionDescription,
    );

    async fn add_remote_candidate(&self, candidate: CandidateRecord) -> Result<(), RelayError>;

    async fn create_channel(
        &self,
        label: &str,
        options: ChannelOptions,
    ) -> Result<Arc<dyn DataChannelHandle>, EngineError>;

    /// The engine's own view of the overall connection state
    fn connection_state(&self) -> PeerConnectionState;

    async fn close(&self);
}

#[async_trait]
pub trait DataChannelHandle: Send + Sync {
    fn label(&self) -> &str;

    fn state(&self) -> ChannelState;

    /// Routes open/close/message events for this channel to `observer`
    fn register_observer(&self, observer: Arc<ChannelObserver>);

    async fn send(&self, payload: Bytes) -> Result<(), EngineError>;
}
