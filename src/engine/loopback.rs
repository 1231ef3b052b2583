//! In-process connection engine.
//!
//! Pairs the first two endpoints it creates and simulates the handshake
//! between them: synthetic SDP, host candidates on 127.0.0.1, a connection
//! that comes up once both sides hold local and remote descriptions and at
//! least one relayed candidate was accepted, and data channels that deliver
//! straight into the peer's observer. Faults can be injected through
//! [`LoopbackOptions`].

use crate::engine::{DataChannelHandle, EndpointObservers, EngineFactory, PeerEndpoint};
use crate::error::{EngineError, RelayError, SetupError};
use crate::peer::data_channel::ChannelObserver;
use crate::peer::negotiation::NegotiationObserver;
use crate::peer::types::{
    CandidateRecord, ChannelOptions, ChannelState, GatheringState, IceConnectionState,
    IceServerConfig, PeerConnectionState, SdpKind, SessionDescription, SignalingState,
};
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Delay before every simulated engine callback
    pub latency: Duration,
    pub candidates_per_endpoint: usize,
    /// Offer creation never reports back
    pub stall_offer: bool,
    /// Answer creation never reports back
    pub stall_answer: bool,
    /// Offer creation reports failure
    pub fail_offer: bool,
    /// Index (creation order) of the endpoint whose candidates are unparsable
    pub corrupt_candidates_from: Option<usize>,
    /// Every relayed remote candidate is refused, so the pair never connects
    pub reject_remote_candidates: bool,
    /// Candidates are still discovered but gathering never reports Complete
    pub stall_gathering: bool,
    /// The answering side is never told about the incoming data channel
    pub suppress_incoming_channel: bool,
    pub fail_channel_sends: bool,
    /// Both endpoints report Disconnected shortly after connecting
    pub drop_after_connect: bool,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(10),
            candidates_per_endpoint: 2,
            stall_offer: false,
            stall_answer: false,
            fail_offer: false,
            corrupt_candidates_from: None,
            reject_remote_candidates: false,
            stall_gathering: false,
            suppress_incoming_channel: false,
            fail_channel_sends: false,
            drop_after_connect: false,
        }
    }
}

pub struct LoopbackEngine {
    options: LoopbackOptions,
    network: Arc<Network>,
}

impl LoopbackEngine {
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            options,
            network: Arc::new(Network::default()),
        }
    }

    /// How many times a remote candidate was handed to any endpoint, accepted or not
    pub fn remote_candidate_calls(&self) -> usize {
        self.network.remote_candidate_calls.load(Ordering::Acquire)
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new(LoopbackOptions::default())
    }
}

#[async_trait]
impl EngineFactory for LoopbackEngine {
    async fn create_endpoint(
        &self,
        name: &str,
        ice_servers: &[IceServerConfig],
        observers: EndpointObservers,
    ) -> Result<Arc<dyn PeerEndpoint>, SetupError> {
        let mut endpoints = self.network.endpoints.lock();
        let index = endpoints.len();
        debug!(endpoint = %name, index, servers = ice_servers.len(), "Loopback endpoint created");

        let endpoint = Arc::new_cyclic(|me| LoopbackEndpoint {
            me: me.clone(),
            index,
            name: name.to_string(),
            options: self.options.clone(),
            observers,
            network: self.network.clone(),
            inner: Mutex::new(EndpointInner::default()),
        });
        endpoints.push(Arc::downgrade(&endpoint));
        Ok(endpoint as Arc<dyn PeerEndpoint>)
    }
}

#[derive(Default)]
struct Network {
    endpoints: Mutex<Vec<Weak<LoopbackEndpoint>>>,
    connected: AtomicBool,
    remote_candidate_calls: AtomicUsize,
}

impl Network {
    fn pair(&self) -> Option<(Arc<LoopbackEndpoint>, Arc<LoopbackEndpoint>)> {
        let endpoints = self.endpoints.lock();
        Some((endpoints.first()?.upgrade()?, endpoints.get(1)?.upgrade()?))
    }
}

#[derive(Default)]
struct EndpointInner {
    local: Option<SdpKind>,
    remote: Option<SdpKind>,
    gathering_started: bool,
    accepted_remote_candidates: usize,
    connection_state: PeerConnectionState,
    channel: Option<Arc<LoopbackChannel>>,
    closed: bool,
}

struct LoopbackEndpoint {
    me: Weak<LoopbackEndpoint>,
    index: usize,
    name: String,
    options: LoopbackOptions,
    observers: EndpointObservers,
    network: Arc<Network>,
    inner: Mutex<EndpointInner>,
}

fn synthetic_sdp(kind: SdpKind) -> String {
    let setup = match kind {
        SdpKind::Offer => "actpass",
        SdpKind::Answer => "active",
    };
    format!(
        "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=group:BUNDLE 0\r\n\
         m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\nc=IN IP4 0.0.0.0\r\n\
         a=mid:0\r\na=setup:{}\r\na=sctp-port:5000\r\n",
        random_id(),
        setup
    )
}

impl LoopbackEndpoint {
    fn is_ready(&self) -> bool {
        let inner = self.inner.lock();
        !inner.closed && inner.local.is_some() && inner.remote.is_some()
    }

    fn accepted_remote_candidates(&self) -> usize {
        self.inner.lock().accepted_remote_candidates
    }

    fn local_channel(&self) -> Option<Arc<LoopbackChannel>> {
        self.inner.lock().channel.clone()
    }

    fn set_connection_state(&self, state: PeerConnectionState) {
        self.inner.lock().connection_state = state;
        self.observers.connectivity.on_connection_state_changed(state);
    }

    fn update_signaling(&self) {
        let state = {
            let inner = self.inner.lock();
            match (inner.local, inner.remote) {
                (Some(SdpKind::Offer), None) => SignalingState::HaveLocalOffer,
                (None, Some(SdpKind::Offer)) => SignalingState::HaveRemoteOffer,
                _ => SignalingState::Stable,
            }
        };
        self.observers.connectivity.on_signaling_state_changed(state);
    }

    fn candidate_body(&self, n: usize) -> String {
        if self.options.corrupt_candidates_from == Some(self.index) {
            format!("garbled-{}-{}", self.index, n)
        } else {
            format!(
                "candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host",
                n + 1,
                50000 + self.index * 100 + n
            )
        }
    }

    fn start_gathering(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            if inner.gathering_started {
                return;
            }
            inner.gathering_started = true;
        }
        self.observers
            .connectivity
            .on_gathering_state_changed(GatheringState::Gathering);

        let endpoint = self.clone();
        tokio::spawn(async move {
            for n in 0..endpoint.options.candidates_per_endpoint {
                sleep(endpoint.options.latency).await;
                let candidate = CandidateRecord::new("0", 0, endpoint.candidate_body(n));
                endpoint.observers.connectivity.on_candidate_discovered(candidate);
            }
            if endpoint.options.stall_gathering {
                debug!(endpoint = %endpoint.name, "Gathering stalled");
                return;
            }
            sleep(endpoint.options.latency).await;
            endpoint
                .observers
                .connectivity
                .on_gathering_state_changed(GatheringState::Complete);
        });
    }
}

/// Brings the pair up once both sides are negotiated and a candidate got through
async fn try_connect(network: Arc<Network>) {
    let Some((first, second)) = network.pair() else {
        return;
    };
    if !first.is_ready() || !second.is_ready() {
        return;
    }
    if first.accepted_remote_candidates() + second.accepted_remote_candidates() == 0 {
        return;
    }
    if network.connected.swap(true, Ordering::AcqRel) {
        return;
    }

    let latency = first.options.latency;
    for endpoint in [&first, &second] {
        endpoint
            .observers
            .connectivity
            .on_ice_connection_state_changed(IceConnectionState::Checking);
        endpoint.set_connection_state(PeerConnectionState::Connecting);
    }
    sleep(latency).await;
    for endpoint in [&first, &second] {
        endpoint
            .observers
            .connectivity
            .on_ice_connection_state_changed(IceConnectionState::Connected);
        endpoint.set_connection_state(PeerConnectionState::Connected);
    }

    open_channels(&first, &second).await;

    if first.options.drop_after_connect {
        sleep(latency).await;
        for endpoint in [&first, &second] {
            endpoint
                .observers
                .connectivity
                .on_ice_connection_state_changed(IceConnectionState::Disconnected);
            endpoint.set_connection_state(PeerConnectionState::Disconnected);
        }
    }
}

async fn open_channels(first: &Arc<LoopbackEndpoint>, second: &Arc<LoopbackEndpoint>) {
    let (initiator, responder) = if first.local_channel().is_some() {
        (first, second)
    } else if second.local_channel().is_some() {
        (second, first)
    } else {
        return;
    };
    let Some(local) = initiator.local_channel() else {
        return;
    };

    let remote = LoopbackChannel::new(&local.label, initiator.options.fail_channel_sends);
    *local.peer.lock() = Arc::downgrade(&remote);
    *remote.peer.lock() = Arc::downgrade(&local);
    local.set_state(ChannelState::Open);
    remote.set_state(ChannelState::Open);

    let observer = local.observer.lock().clone();
    if let Some(observer) = observer {
        observer.on_state_change(ChannelState::Open).await;
    }

    responder.inner.lock().channel = Some(remote.clone());
    if responder.options.suppress_incoming_channel {
        debug!(endpoint = %responder.name, "Incoming data channel suppressed");
        return;
    }
    responder.observers.channel.bind(remote).await;
}

#[async_trait]
impl PeerEndpoint for LoopbackEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_offer(&self, observer: Arc<NegotiationObserver>) {
        if self.options.stall_offer {
            debug!(endpoint = %self.name, "Offer creation stalled");
            return;
        }
        let latency = self.options.latency;
        let fail = self.options.fail_offer;
        tokio::spawn(async move {
            sleep(latency).await;
            if fail {
                observer.notify_description_create_failed("offer creation rejected by engine");
            } else {
                observer.notify_description_created(SessionDescription::offer(synthetic_sdp(
                    SdpKind::Offer,
                )));
            }
        });
    }

    fn create_answer(&self, observer: Arc<NegotiationObserver>) {
        if self.options.stall_answer {
            debug!(endpoint = %self.name, "Answer creation stalled");
            return;
        }
        let has_remote_offer = self.inner.lock().remote == Some(SdpKind::Offer);
        let latency = self.options.latency;
        tokio::spawn(async move {
            sleep(latency).await;
            if has_remote_offer {
                observer.notify_description_created(SessionDescription::answer(synthetic_sdp(
                    SdpKind::Answer,
                )));
            } else {
                observer.notify_description_create_failed("no remote offer to answer");
            }
        });
    }

    fn set_local_description(
        &self,
        observer: Arc<NegotiationObserver>,
        description: SessionDescription,
    ) {
        let Some(endpoint) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            sleep(endpoint.options.latency).await;
            endpoint.inner.lock().local = Some(description.kind());
            endpoint.update_signaling();
            observer.notify_set_succeeded();
            endpoint.start_gathering();
            try_connect(endpoint.network.clone()).await;
        });
    }

    fn set_remote_description(
        &self,
        observer: Arc<NegotiationObserver>,
        description: SessionDescription,
    ) {
        let Some(endpoint) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            sleep(endpoint.options.latency).await;
            if !description.body().starts_with("v=0") {
                observer.notify_set_failed("failed to parse session description");
                return;
            }
            endpoint.inner.lock().remote = Some(description.kind());
            endpoint.update_signaling();
            observer.notify_set_succeeded();
            try_connect(endpoint.network.clone()).await;
        });
    }

    async fn add_remote_candidate(&self, candidate: CandidateRecord) -> Result<(), RelayError> {
        self.network
            .remote_candidate_calls
            .fetch_add(1, Ordering::AcqRel);
        if self.options.reject_remote_candidates {
            return Err(RelayError {
                media_id: candidate.media_id,
                media_index: candidate.media_index,
                reason: "remote candidate refused".into(),
            });
        }
        if !candidate.body.starts_with("candidate:") || candidate.candidate_type().is_none() {
            return Err(RelayError {
                media_id: candidate.media_id,
                media_index: candidate.media_index,
                reason: format!("failed to parse candidate '{}'", candidate.body),
            });
        }

        self.inner.lock().accepted_remote_candidates += 1;
        tokio::spawn(try_connect(self.network.clone()));
        Ok(())
    }

    async fn create_channel(
        &self,
        label: &str,
        options: ChannelOptions,
    ) -> Result<Arc<dyn DataChannelHandle>, EngineError> {
        debug!(endpoint = %self.name, label, ordered = options.ordered, "Loopback channel created");
        let channel = LoopbackChannel::new(label, self.options.fail_channel_sends);
        self.inner.lock().channel = Some(channel.clone());
        Ok(channel as Arc<dyn DataChannelHandle>)
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.inner.lock().connection_state
    }

    async fn close(&self) {
        let channel = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.channel.clone()
        };
        self.set_connection_state(PeerConnectionState::Closed);

        if let Some(channel) = channel {
            channel.set_state(ChannelState::Closed);
            let observer = channel.observer.lock().clone();
            if let Some(observer) = observer {
                observer.on_state_change(ChannelState::Closed).await;
            }
        }
    }
}

struct LoopbackChannel {
    label: String,
    state: Mutex<ChannelState>,
    observer: Mutex<Option<Arc<ChannelObserver>>>,
    peer: Mutex<Weak<LoopbackChannel>>,
    // messages delivered before an observer was registered
    inbox: Mutex<Vec<Bytes>>,
    fail_sends: bool,
}

impl LoopbackChannel {
    fn new(label: &str, fail_sends: bool) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            state: Mutex::new(ChannelState::Connecting),
            observer: Mutex::new(None),
            peer: Mutex::new(Weak::new()),
            inbox: Mutex::new(Vec::new()),
            fail_sends,
        })
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }

    fn deliver(&self, payload: Bytes) {
        let observer = self.observer.lock().clone();
        match observer {
            Some(observer) => observer.on_message(&payload),
            None => self.inbox.lock().push(payload),
        }
    }
}

#[async_trait]
impl DataChannelHandle for LoopbackChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn register_observer(&self, observer: Arc<ChannelObserver>) {
        *self.observer.lock() = Some(observer.clone());
        let queued = std::mem::take(&mut *self.inbox.lock());
        for payload in queued {
            observer.on_message(&payload);
        }
    }

    async fn send(&self, payload: Bytes) -> Result<(), EngineError> {
        let state = self.state();
        if state != ChannelState::Open {
            return Err(EngineError::ChannelNotOpen(state));
        }
        if self.fail_sends {
            return Err(EngineError::Rejected("loopback transport refused the send".into()));
        }
        let peer = self.peer.lock().upgrade();
        if let Some(peer) = peer {
            peer.deliver(payload);
        }
        Ok(())
    }
}
