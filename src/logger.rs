use crate::config::LOG_LEVEL;
use crate::peer::types::CandidateRecord;
use tracing::{debug, info};
use webrtc::peer_connection::RTCPeerConnection;

/// Installs the fmt subscriber. The level is fixed at compile time.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LOG_LEVEL)
        .with_target(false)
        .try_init();
}

/// Trace one candidate as it is discovered or relayed
pub fn dump_candidate(label: &str, endpoint: &str, candidate: &CandidateRecord) {
    debug!(
        endpoint,
        "Trickle {label}: candidate={} sdp_mid={} sdp_mline_index={}",
        candidate.body,
        candidate.media_id,
        candidate.media_index
    );
}

/// Snapshot of getStats: the nominated candidate pair
pub async fn dump_selected_pair(endpoint: &str, pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, report) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = report {
            if pair.nominated {
                info!(
                    endpoint,
                    "STATS {moment}: {}:{} bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}
