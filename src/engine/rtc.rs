//! Connection engine backed by the `webrtc` crate

use crate::engine::{DataChannelHandle, EndpointObservers, EngineFactory, PeerEndpoint};
use crate::error::{EngineError, RelayError, SetupError};
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::data_channel::ChannelObserver;
use crate::peer::negotiation::NegotiationObserver;
use crate::peer::types::{
    CandidateRecord, ChannelOptions, ChannelState, GatheringState, IceConnectionState,
    IceServerConfig, PeerConnectionState, SdpKind, SessionDescription, SignalingState,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

/// Process-wide engine. Built once at start-up and released when dropped,
/// on every exit path.
pub struct RtcEngine {
    api: API,
}

impl RtcEngine {
    pub fn initialize() -> Self {
        info!("Connection engine initialized");
        Self {
            api: APIBuilder::new().build(),
        }
    }
}

impl Drop for RtcEngine {
    fn drop(&mut self) {
        info!("Connection engine released");
    }
}

#[async_trait]
impl EngineFactory for RtcEngine {
    async fn create_endpoint(
        &self,
        name: &str,
        ice_servers: &[IceServerConfig],
        observers: EndpointObservers,
    ) -> Result<Arc<dyn PeerEndpoint>, SetupError> {
        let pc = self
            .api
            .new_peer_connection(rtc_config(ice_servers))
            .await
            .map_err(|e| SetupError::Endpoint {
                endpoint: name.to_string(),
                source: e.into(),
            })?;
        let pc = Arc::new(pc);

        register_handlers(name, &pc, &observers);

        let endpoint: Arc<dyn PeerEndpoint> = Arc::new(RtcEndpoint {
            name: name.to_string(),
            pc,
            remote: Arc::new(Mutex::new(RemoteCandidates::default())),
        });
        Ok(endpoint)
    }
}

fn rtc_config(ice_servers: &[IceServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: vec![server.url.clone()],
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
            })
            .collect(),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn register_handlers(name: &str, pc: &Arc<RTCPeerConnection>, observers: &EndpointObservers) {
    let connectivity = observers.connectivity.clone();
    pc.on_signaling_state_change(Box::new(move |st: RTCSignalingState| {
        connectivity.on_signaling_state_changed(signaling_state(st));
        Box::pin(async {})
    }));

    let connectivity = observers.connectivity.clone();
    let endpoint = name.to_string();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => match c.to_json() {
                Ok(init) => {
                    let record = CandidateRecord::new(
                        init.sdp_mid.unwrap_or_default(),
                        init.sdp_mline_index.unwrap_or(0),
                        init.candidate,
                    );
                    dump_candidate("LOCAL", &endpoint, &record);
                    connectivity.on_candidate_discovered(record);
                }
                Err(e) => warn!(endpoint = %endpoint, "Failed to serialize ICE candidate: {}", e),
            },
            // None marks the end of gathering
            None => connectivity.on_gathering_complete(),
        }
        Box::pin(async {})
    }));

    let connectivity = observers.connectivity.clone();
    pc.on_ice_gathering_state_change(Box::new(move |st: RTCIceGathererState| {
        connectivity.on_gathering_state_changed(gathering_state(st));
        Box::pin(async {})
    }));

    let connectivity = observers.connectivity.clone();
    pc.on_ice_connection_state_change(Box::new(move |st: RTCIceConnectionState| {
        connectivity.on_ice_connection_state_changed(ice_connection_state(st));
        Box::pin(async {})
    }));

    let connectivity = observers.connectivity.clone();
    let endpoint = name.to_string();
    let pc_stats: Weak<RTCPeerConnection> = Arc::downgrade(pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        connectivity.on_connection_state_changed(peer_connection_state(st));

        let moment = match st {
            RTCPeerConnectionState::Connected => Some("CONNECTED"),
            RTCPeerConnectionState::Failed => Some("BEFORE-FAIL"),
            _ => None,
        };
        if let (Some(moment), Some(pc)) = (moment, pc_stats.upgrade()) {
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                dump_selected_pair(&endpoint, &pc, moment).await;
            });
        }
        Box::pin(async {})
    }));

    let channel_observer = observers.channel.clone();
    let endpoint = name.to_string();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        info!(endpoint = %endpoint, label = %dc.label(), "Data channel received");
        let observer = channel_observer.clone();
        Box::pin(async move {
            observer.bind(Arc::new(RtcChannel { dc })).await;
        })
    }));
}

/// Remote candidates that arrived before the remote description was applied
#[derive(Default)]
struct RemoteCandidates {
    description_applied: bool,
    pending: Vec<CandidateRecord>,
}

struct RtcEndpoint {
    name: String,
    pc: Arc<RTCPeerConnection>,
    remote: Arc<Mutex<RemoteCandidates>>,
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription, webrtc::Error> {
    let kind = description.kind();
    let sdp = description.into_body();
    match kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp),
        SdpKind::Answer => RTCSessionDescription::answer(sdp),
    }
}

fn candidate_init(candidate: &CandidateRecord) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.body.clone(),
        sdp_mid: Some(candidate.media_id.clone()),
        sdp_mline_index: Some(candidate.media_index),
        username_fragment: None,
    }
}

async fn add_candidate(pc: &RTCPeerConnection, candidate: CandidateRecord) -> Result<(), RelayError> {
    pc.add_ice_candidate(candidate_init(&candidate))
        .await
        .map_err(|e| RelayError {
            media_id: candidate.media_id,
            media_index: candidate.media_index,
            reason: e.to_string(),
        })
}

/// Applies every queued remote candidate once the remote description is set
async fn apply_pending_candidates(
    endpoint: &str,
    pc: &RTCPeerConnection,
    remote: &Mutex<RemoteCandidates>,
) {
    let candidates = {
        let mut remote = remote.lock();
        remote.description_applied = true;
        std::mem::take(&mut remote.pending)
    };

    for candidate in candidates {
        debug!(endpoint, "Applying pending candidate");
        if let Err(e) = add_candidate(pc, candidate).await {
            warn!(endpoint, error = %e, "Failed to apply pending candidate");
        }
    }
}

#[async_trait]
impl PeerEndpoint for RtcEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_offer(&self, observer: Arc<NegotiationObserver>) {
        let pc = self.pc.clone();
        tokio::spawn(async move {
            match pc.create_offer(None).await {
                Ok(offer) => observer.notify_description_created(SessionDescription::offer(offer.sdp)),
                Err(e) => observer.notify_description_create_failed(e.to_string()),
            }
        });
    }

    fn create_answer(&self, observer: Arc<NegotiationObserver>) {
        let pc = self.pc.clone();
        tokio::spawn(async move {
            match pc.create_answer(None).await {
                Ok(answer) => {
                    observer.notify_description_created(SessionDescription::answer(answer.sdp))
                }
                Err(e) => observer.notify_description_create_failed(e.to_string()),
            }
        });
    }

    fn set_local_description(
        &self,
        observer: Arc<NegotiationObserver>,
        description: SessionDescription,
    ) {
        let pc = self.pc.clone();
        tokio::spawn(async move {
            let result = match to_rtc_description(description) {
                Ok(desc) => pc.set_local_description(desc).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => observer.notify_set_succeeded(),
                Err(e) => observer.notify_set_failed(e.to_string()),
            }
        });
    }

    fn set_remote_description(
        &self,
        observer: Arc<NegotiationObserver>,
        description: SessionDescription,
    ) {
        let pc = self.pc.clone();
        let remote = self.remote.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            let result = match to_rtc_description(description) {
                Ok(desc) => pc.set_remote_description(desc).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {
                    apply_pending_candidates(&name, &pc, &remote).await;
                    observer.notify_set_succeeded();
                }
                Err(e) => observer.notify_set_failed(e.to_string()),
            }
        });
    }

    async fn add_remote_candidate(&self, candidate: CandidateRecord) -> Result<(), RelayError> {
        dump_candidate("REMOTE", &self.name, &candidate);
        {
            let mut remote = self.remote.lock();
            if !remote.description_applied {
                debug!(endpoint = %self.name, "Remote description not set yet, queuing candidate");
                remote.pending.push(candidate);
                return Ok(());
            }
        }
        add_candidate(&self.pc, candidate).await
    }

    async fn create_channel(
        &self,
        label: &str,
        options: ChannelOptions,
    ) -> Result<Arc<dyn DataChannelHandle>, EngineError> {
        let init = RTCDataChannelInit {
            ordered: Some(options.ordered),
            max_retransmits: options.max_retransmits,
            ..Default::default()
        };
        let dc = self.pc.create_data_channel(label, Some(init)).await?;
        let channel: Arc<dyn DataChannelHandle> = Arc::new(RtcChannel { dc });
        Ok(channel)
    }

    fn connection_state(&self) -> PeerConnectionState {
        peer_connection_state(self.pc.connection_state())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(endpoint = %self.name, "Failed to close peer connection: {}", e);
        }
    }
}

struct RtcChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannelHandle for RtcChannel {
    fn label(&self) -> &str {
        self.dc.label()
    }

    fn state(&self) -> ChannelState {
        channel_state(self.dc.ready_state())
    }

    fn register_observer(&self, observer: Arc<ChannelObserver>) {
        let on_open = observer.clone();
        self.dc.on_open(Box::new(move || {
            let observer = on_open.clone();
            Box::pin(async move {
                observer.on_state_change(ChannelState::Open).await;
            })
        }));

        let on_close = observer.clone();
        self.dc.on_close(Box::new(move || {
            let observer = on_close.clone();
            Box::pin(async move {
                observer.on_state_change(ChannelState::Closed).await;
            })
        }));

        let label = self.dc.label().to_string();
        self.dc.on_error(Box::new(move |e| {
            warn!(label = %label, "Data channel error: {}", e);
            Box::pin(async {})
        }));

        self.dc.on_message(Box::new(move |msg: DataChannelMessage| {
            observer.on_message(&msg.data);
            Box::pin(async {})
        }));
    }

    async fn send(&self, payload: Bytes) -> Result<(), EngineError> {
        self.dc.send(&payload).await?;
        Ok(())
    }
}

fn signaling_state(st: RTCSignalingState) -> SignalingState {
    match st {
        RTCSignalingState::Stable => SignalingState::Stable,
        RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
        RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
        RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
        RTCSignalingState::Closed => SignalingState::Closed,
        _ => SignalingState::Unknown,
    }
}

fn gathering_state(st: RTCIceGathererState) -> GatheringState {
    match st {
        RTCIceGathererState::New => GatheringState::New,
        RTCIceGathererState::Gathering => GatheringState::Gathering,
        RTCIceGathererState::Complete => GatheringState::Complete,
        _ => GatheringState::Unknown,
    }
}

fn ice_connection_state(st: RTCIceConnectionState) -> IceConnectionState {
    match st {
        RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => IceConnectionState::Unknown,
    }
}

fn peer_connection_state(st: RTCPeerConnectionState) -> PeerConnectionState {
    match st {
        RTCPeerConnectionState::New => PeerConnectionState::New,
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => PeerConnectionState::Unknown,
    }
}

fn channel_state(st: RTCDataChannelState) -> ChannelState {
    match st {
        RTCDataChannelState::Open => ChannelState::Open,
        RTCDataChannelState::Closing => ChannelState::Closing,
        RTCDataChannelState::Closed => ChannelState::Closed,
        _ => ChannelState::Connecting,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_servers_map_to_rtc_config() {
        let config = rtc_config(&[
            IceServerConfig::stun("stun:stun.l.google.com:19302"),
            IceServerConfig::turn("turn:relay.example.org:3478", "user", "secret"),
        ]);

        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert!(config.ice_servers[0].username.is_empty());
        assert_eq!(config.ice_servers[1].username, "user");
        assert_eq!(config.ice_servers[1].credential, "secret");
    }

    #[test]
    fn candidate_init_carries_media_section() {
        let record = CandidateRecord::new("0", 0, "candidate:1 1 udp 1 127.0.0.1 4000 typ host");
        let init = candidate_init(&record);
        assert_eq!(init.sdp_mid.as_deref(), Some("0"));
        assert_eq!(init.sdp_mline_index, Some(0));
        assert_eq!(init.candidate, record.body);
    }

    #[test]
    fn engine_states_map_onto_core_states() {
        assert_eq!(
            peer_connection_state(RTCPeerConnectionState::Connected),
            PeerConnectionState::Connected
        );
        assert_eq!(
            gathering_state(RTCIceGathererState::Complete),
            GatheringState::Complete
        );
        assert_eq!(channel_state(RTCDataChannelState::Open), ChannelState::Open);
        assert_eq!(
            channel_state(RTCDataChannelState::Connecting),
            ChannelState::Connecting
        );
    }
}
