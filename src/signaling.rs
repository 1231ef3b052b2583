//! Local signaling: moves descriptions and candidates between the two
//! endpoints in-process, standing in for a signaling server.

use crate::peer::connection::EndpointCoordinator;
use crate::peer::ice::analyze_candidates;
use crate::peer::types::SessionDescription;
use serde::Serialize;
use std::ops::AddAssign;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Outcome of one or more relay batches
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub forwarded: usize,
    pub dropped: usize,
}

impl AddAssign for RelayStats {
    fn add_assign(&mut self, other: Self) {
        self.forwarded += other.forwarded;
        self.dropped += other.dropped;
    }
}

/// Sets the offer as the answerer's remote description, lets it settle,
/// then asks the answerer for an answer.
pub async fn exchange_offer(
    answerer: &EndpointCoordinator,
    offer: SessionDescription,
    settle_delay: Duration,
) {
    answerer
        .endpoint()
        .set_remote_description(answerer.negotiation().clone(), offer);

    sleep(settle_delay).await;

    answerer
        .endpoint()
        .create_answer(answerer.negotiation().clone());
}

/// Drains `from`'s discovered candidates and feeds them to `to`, in discovery order.
/// Candidates the destination rejects are logged and dropped.
pub async fn relay_candidates(from: &EndpointCoordinator, to: &EndpointCoordinator) -> RelayStats {
    let batch = from.connectivity().drain_candidates();
    let mut stats = RelayStats::default();
    if batch.is_empty() {
        return stats;
    }

    analyze_candidates(from.name(), &batch);
    for candidate in batch {
        match to.endpoint().add_remote_candidate(candidate).await {
            Ok(()) => stats.forwarded += 1,
            Err(error) => {
                warn!(from = %from.name(), to = %to.name(), %error, "Relay error");
                stats.dropped += 1;
            }
        }
    }

    debug!(
        from = %from.name(),
        to = %to.name(),
        forwarded = stats.forwarded,
        dropped = stats.dropped,
        "Relayed candidate batch"
    );
    stats
}

/// One relay round in both directions
pub async fn exchange_candidates(a: &EndpointCoordinator, b: &EndpointCoordinator) -> RelayStats {
    let mut stats = relay_candidates(a, b).await;
    stats += relay_candidates(b, a).await;
    stats
}
