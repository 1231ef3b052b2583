use crate::engine::{EndpointObservers, EngineFactory, PeerEndpoint};
use crate::error::SetupError;
use crate::peer::data_channel::ChannelObserver;
use crate::peer::ice::ConnectivityObserver;
use crate::peer::negotiation::NegotiationObserver;
use crate::peer::state::EndpointState;
use crate::peer::types::{ChannelOptions, IceServerConfig};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// One named endpoint: the engine's peer connection plus the three
/// observers the engine reports to.
///
/// Field order matters: `endpoint` is dropped before the observers, so the
/// engine can never call back into an observer that is already gone.
pub struct EndpointCoordinator {
    endpoint: Arc<dyn PeerEndpoint>,
    name: String,
    negotiation: Arc<NegotiationObserver>,
    connectivity: Arc<ConnectivityObserver>,
    channel: Arc<ChannelObserver>,
}

impl EndpointCoordinator {
    /// Creates the observers, then asks the engine for a peer connection wired to them
    pub async fn new(
        factory: &dyn EngineFactory,
        name: &str,
        ice_servers: &[IceServerConfig],
        progress: Arc<Notify>,
    ) -> Result<Self, SetupError> {
        let observers = EndpointObservers {
            negotiation: Arc::new(NegotiationObserver::new(name, progress.clone())),
            connectivity: Arc::new(ConnectivityObserver::new(name, progress.clone())),
            channel: Arc::new(ChannelObserver::new(name, true, progress)),
        };

        let endpoint = factory
            .create_endpoint(name, ice_servers, observers.clone())
            .await?;
        info!(endpoint = %name, "Peer connection created");

        Ok(Self {
            endpoint,
            name: name.to_string(),
            negotiation: observers.negotiation,
            connectivity: observers.connectivity,
            channel: observers.channel,
        })
    }

    /// Opens a data channel on this (initiating) endpoint and binds it to the channel observer
    pub async fn open_channel(&self, label: &str, options: ChannelOptions) -> Result<(), SetupError> {
        let channel = self
            .endpoint
            .create_channel(label, options)
            .await
            .map_err(|source| SetupError::Channel {
                label: label.to_string(),
                source,
            })?;
        info!(endpoint = %self.name, label = %channel.label(), "Data channel created");
        self.channel.bind(channel).await;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &Arc<dyn PeerEndpoint> {
        &self.endpoint
    }

    pub fn negotiation(&self) -> &Arc<NegotiationObserver> {
        &self.negotiation
    }

    pub fn connectivity(&self) -> &ConnectivityObserver {
        &self.connectivity
    }

    pub fn channel(&self) -> &ChannelObserver {
        &self.channel
    }

    pub fn channel_has_message(&self) -> bool {
        self.channel.has_received_message()
    }

    pub fn ice_gathering_complete(&self) -> bool {
        self.connectivity.gathering_complete()
    }

    /// Sticky: stays true after the first transition to Connected
    pub fn is_connected(&self) -> bool {
        self.connectivity.ever_connected()
    }

    pub fn state(&self) -> EndpointState {
        EndpointState {
            signaling: self.connectivity.signaling_state(),
            gathering: self.connectivity.gathering_state(),
            gathering_complete: self.connectivity.gathering_complete(),
            ice_connection: self.connectivity.ice_connection_state(),
            connection: self.connectivity.connection_state(),
            ever_connected: self.connectivity.ever_connected(),
            channel: self.channel.state(),
            message_received: self.channel.has_received_message(),
        }
    }

    pub async fn close(&self) {
        info!(endpoint = %self.name, "Closing peer connection");
        self.endpoint.close().await;
    }
}
