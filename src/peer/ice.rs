use crate::peer::types::{
    CandidateRecord, GatheringState, IceConnectionState, PeerConnectionState, SignalingState,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Collects what an endpoint learns about its own connectivity: discovered
/// candidates waiting to be relayed, gathering completion and connection state.
pub struct ConnectivityObserver {
    name: String,
    candidates: Mutex<Vec<CandidateRecord>>,
    gathering_complete: AtomicBool,
    ever_connected: AtomicBool,
    connection_state: Mutex<PeerConnectionState>,
    ice_connection_state: Mutex<IceConnectionState>,
    gathering_state: Mutex<GatheringState>,
    signaling_state: Mutex<SignalingState>,
    progress: Arc<Notify>,
}

impl ConnectivityObserver {
    pub fn new(name: impl Into<String>, progress: Arc<Notify>) -> Self {
        Self {
            name: name.into(),
            candidates: Mutex::new(Vec::new()),
            gathering_complete: AtomicBool::new(false),
            ever_connected: AtomicBool::new(false),
            connection_state: Mutex::new(PeerConnectionState::New),
            ice_connection_state: Mutex::new(IceConnectionState::New),
            gathering_state: Mutex::new(GatheringState::New),
            signaling_state: Mutex::new(SignalingState::Stable),
            progress,
        }
    }

    pub fn on_candidate_discovered(&self, candidate: CandidateRecord) {
        debug!(
            endpoint = %self.name,
            media_id = %candidate.media_id,
            media_index = candidate.media_index,
            "ICE candidate discovered"
        );
        let mut candidates = self.candidates.lock();
        candidates.push(candidate);
        debug!(endpoint = %self.name, pending = candidates.len(), "Candidate queued for relay");
    }

    pub fn on_gathering_complete(&self) {
        if !self.gathering_complete.swap(true, Ordering::AcqRel) {
            info!(endpoint = %self.name, "ICE gathering complete");
        }
        self.progress.notify_waiters();
    }

    pub fn on_gathering_state_changed(&self, state: GatheringState) {
        debug!(endpoint = %self.name, ?state, "ICE gathering state changed");
        *self.gathering_state.lock() = state;
        if state == GatheringState::Complete {
            self.on_gathering_complete();
        }
    }

    /// The "ever connected" latch is sticky: leaving Connected later does not clear it.
    pub fn on_connection_state_changed(&self, state: PeerConnectionState) {
        info!(endpoint = %self.name, ?state, "Connection state changed");
        *self.connection_state.lock() = state;
        match state {
            PeerConnectionState::Connected => {
                self.ever_connected.store(true, Ordering::Release);
            }
            PeerConnectionState::Disconnected | PeerConnectionState::Failed => {
                warn!(endpoint = %self.name, ?state, "Connection lost");
            }
            _ => {}
        }
        self.progress.notify_waiters();
    }

    pub fn on_ice_connection_state_changed(&self, state: IceConnectionState) {
        debug!(endpoint = %self.name, ?state, "ICE connection state changed");
        *self.ice_connection_state.lock() = state;
    }

    pub fn on_signaling_state_changed(&self, state: SignalingState) {
        debug!(endpoint = %self.name, ?state, "Signaling state changed");
        *self.signaling_state.lock() = state;
    }

    /// Takes every candidate discovered so far, in discovery order
    pub fn drain_candidates(&self) -> Vec<CandidateRecord> {
        std::mem::take(&mut *self.candidates.lock())
    }

    pub fn pending_candidates(&self) -> usize {
        self.candidates.lock().len()
    }

    pub fn gathering_complete(&self) -> bool {
        self.gathering_complete.load(Ordering::Acquire)
    }

    pub fn ever_connected(&self) -> bool {
        self.ever_connected.load(Ordering::Acquire)
    }

    pub fn connection_state(&self) -> PeerConnectionState {
        *self.connection_state.lock()
    }

    pub fn ice_connection_state(&self) -> IceConnectionState {
        *self.ice_connection_state.lock()
    }

    pub fn gathering_state(&self) -> GatheringState {
        *self.gathering_state.lock()
    }

    pub fn signaling_state(&self) -> SignalingState {
        *self.signaling_state.lock()
    }
}

/// Counts relayed candidates by type and warns when no relay candidate was seen
pub fn analyze_candidates(endpoint: &str, candidates: &[CandidateRecord]) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        match candidate.candidate_type() {
            Some("host") => host_count += 1,
            Some("srflx") => srflx_count += 1,
            Some("relay") => relay_count += 1,
            _ => {}
        }
    }

    info!(
        endpoint,
        host = host_count,
        srflx = srflx_count,
        relay = relay_count,
        "Candidate analysis"
    );

    if relay_count == 0 {
        debug!(endpoint, "No TURN relay candidates found");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn observer() -> ConnectivityObserver {
        ConnectivityObserver::new("Peer1", Arc::new(Notify::new()))
    }

    fn candidate(n: usize) -> CandidateRecord {
        CandidateRecord::new(
            "0",
            0,
            format!("candidate:{n} 1 udp 2130706431 127.0.0.1 {} typ host", 40000 + n),
        )
    }

    #[test]
    fn drain_returns_insertion_order_and_clears() {
        let observer = observer();
        for n in 0..3 {
            observer.on_candidate_discovered(candidate(n));
        }

        let drained = observer.drain_candidates();
        assert_eq!(drained, vec![candidate(0), candidate(1), candidate(2)]);
        assert!(observer.drain_candidates().is_empty());
        assert_eq!(observer.pending_candidates(), 0);
    }

    #[test]
    fn concurrent_discovery_during_drain_loses_nothing() {
        let observer = Arc::new(observer());
        const TOTAL: usize = 2_000;

        let producer = {
            let observer = observer.clone();
            thread::spawn(move || {
                for n in 0..TOTAL {
                    observer.on_candidate_discovered(candidate(n));
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < TOTAL {
            seen.extend(observer.drain_candidates());
            thread::yield_now();
        }
        producer.join().unwrap();
        seen.extend(observer.drain_candidates());

        assert_eq!(seen.len(), TOTAL);
        for (n, record) in seen.iter().enumerate() {
            assert_eq!(record, &candidate(n));
        }
    }

    #[test]
    fn ever_connected_latch_is_monotonic() {
        let observer = observer();
        assert!(!observer.ever_connected());

        observer.on_connection_state_changed(PeerConnectionState::Connecting);
        assert!(!observer.ever_connected());

        observer.on_connection_state_changed(PeerConnectionState::Connected);
        for state in [
            PeerConnectionState::Disconnected,
            PeerConnectionState::Failed,
            PeerConnectionState::Closed,
            PeerConnectionState::New,
        ] {
            observer.on_connection_state_changed(state);
            assert!(observer.ever_connected());
        }
        assert_eq!(observer.connection_state(), PeerConnectionState::New);
    }

    #[test]
    fn gathering_complete_latches_from_state_change() {
        let observer = observer();
        observer.on_gathering_state_changed(GatheringState::Gathering);
        assert!(!observer.gathering_complete());

        observer.on_gathering_state_changed(GatheringState::Complete);
        assert!(observer.gathering_complete());
        assert_eq!(observer.gathering_state(), GatheringState::Complete);

        observer.on_gathering_state_changed(GatheringState::New);
        assert!(observer.gathering_complete());
    }
}
