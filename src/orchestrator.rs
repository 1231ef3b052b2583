//! Offer/answer handshake and connectivity establishment between two
//! local endpoints.
//!
//! Phases run strictly in order. Offer and answer creation are hard
//! prerequisites: running out of budget there aborts the run. Candidate
//! exchange, connection establishment and message exchange are best-effort:
//! a timeout is recorded in the report and the run carries on.

use crate::config::NegotiationConfig;
use crate::error::{NegotiationError, PhaseTimeout};
use crate::peer::connection::EndpointCoordinator;
use crate::peer::types::{SdpKind, SessionDescription};
use crate::signaling::{self, RelayStats};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// What a run achieved
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NegotiationReport {
    pub offerer_connected: bool,
    pub answerer_connected: bool,
    pub messages_exchanged: bool,
    pub relay: RelayStats,
    pub set_failures: usize,
    pub send_failures: usize,
    pub timeouts: Vec<PhaseTimeout>,
}

impl NegotiationReport {
    pub fn connected(&self) -> bool {
        self.offerer_connected && self.answerer_connected
    }

    pub fn is_full_success(&self) -> bool {
        self.connected() && self.messages_exchanged
    }
}

pub struct NegotiationOrchestrator {
    config: NegotiationConfig,
    progress: Arc<Notify>,
}

impl NegotiationOrchestrator {
    pub fn new(config: NegotiationConfig) -> Self {
        Self {
            config,
            progress: Arc::new(Notify::new()),
        }
    }

    /// Signal every observer of this run must pulse when its state changes
    pub fn progress(&self) -> Arc<Notify> {
        self.progress.clone()
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    pub async fn run(
        &self,
        offerer: &EndpointCoordinator,
        answerer: &EndpointCoordinator,
    ) -> Result<NegotiationReport, NegotiationError> {
        let mut timeouts = Vec::new();

        info!(endpoint = %offerer.name(), "Creating offer...");
        offerer
            .endpoint()
            .create_offer(offerer.negotiation().clone());
        let offer = self
            .await_description(offerer, SdpKind::Offer, self.config.offer_timeout)
            .await?;

        // one copy per consumer: the engine takes ownership of each
        let offer_for_offerer = offer.clone();
        let offer_for_answerer = offer;
        offerer
            .endpoint()
            .set_local_description(offerer.negotiation().clone(), offer_for_offerer);

        info!(endpoint = %answerer.name(), "Exchanging offer and creating answer...");
        signaling::exchange_offer(answerer, offer_for_answerer, self.config.settle_delay).await;
        let answer = self
            .await_description(answerer, SdpKind::Answer, self.config.answer_timeout)
            .await?;

        let answer_for_answerer = answer.clone();
        let answer_for_offerer = answer;
        answerer
            .endpoint()
            .set_local_description(answerer.negotiation().clone(), answer_for_answerer);
        offerer
            .endpoint()
            .set_remote_description(offerer.negotiation().clone(), answer_for_offerer);
        info!("SDP exchange completed");

        let relay = self.exchange_candidates(offerer, answerer, &mut timeouts).await;

        info!("Waiting for connection establishment...");
        let connected = self
            .wait_until(self.config.connect_timeout, || {
                offerer.is_connected() && answerer.is_connected()
            })
            .await;

        let messages_exchanged = if connected {
            info!("WebRTC connection established successfully");
            info!("Waiting for data channel messages...");
            let exchanged = self
                .wait_until(self.config.message_timeout, || {
                    offerer.channel_has_message() && answerer.channel_has_message()
                })
                .await;
            if exchanged {
                info!("Data channel communication successful");
            } else {
                warn!(
                    offerer_received = offerer.channel_has_message(),
                    answerer_received = answerer.channel_has_message(),
                    "Data channel communication partially successful"
                );
                timeouts.push(PhaseTimeout::Messages(self.config.message_timeout));
            }
            exchanged
        } else {
            warn!(
                offerer_state = ?offerer.endpoint().connection_state(),
                answerer_state = ?answerer.endpoint().connection_state(),
                "Failed to establish WebRTC connection"
            );
            timeouts.push(PhaseTimeout::Connectivity(self.config.connect_timeout));
            false
        };

        Ok(NegotiationReport {
            offerer_connected: offerer.is_connected(),
            answerer_connected: answerer.is_connected(),
            messages_exchanged,
            relay,
            set_failures: offerer.negotiation().set_failures().len()
                + answerer.negotiation().set_failures().len(),
            send_failures: offerer.channel().send_failures() + answerer.channel().send_failures(),
            timeouts,
        })
    }

    /// Waits for the create request on `coordinator` to report, then takes the description
    async fn await_description(
        &self,
        coordinator: &EndpointCoordinator,
        kind: SdpKind,
        budget: Duration,
    ) -> Result<SessionDescription, NegotiationError> {
        let observer = coordinator.negotiation();
        let settled = self
            .wait_until(budget, || {
                observer.is_complete() || observer.creation_error().is_some()
            })
            .await;

        if let Some(reason) = observer.creation_error() {
            return Err(NegotiationError::CreateFailed {
                kind,
                endpoint: coordinator.name().to_string(),
                reason,
            });
        }
        if !settled {
            return Err(NegotiationError::Timeout {
                kind,
                endpoint: coordinator.name().to_string(),
                budget,
            });
        }

        observer
            .take_description()
            .ok_or_else(|| NegotiationError::CreateFailed {
                kind,
                endpoint: coordinator.name().to_string(),
                reason: "description was already taken".into(),
            })
    }

    /// Relays candidates every `relay_interval` until both sides finish
    /// gathering or `gathering_timeout` passes, then relays once more.
    async fn exchange_candidates(
        &self,
        offerer: &EndpointCoordinator,
        answerer: &EndpointCoordinator,
        timeouts: &mut Vec<PhaseTimeout>,
    ) -> RelayStats {
        info!("Waiting for ICE gathering...");
        let deadline = Instant::now() + self.config.gathering_timeout;
        let mut relay_tick = interval(self.config.relay_interval);
        relay_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = RelayStats::default();

        let complete = loop {
            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if offerer.ice_gathering_complete() && answerer.ice_gathering_complete() {
                break true;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = relay_tick.tick() => {
                    stats += signaling::exchange_candidates(offerer, answerer).await;
                }
                _ = sleep_until(deadline) => break false,
            }
        };

        stats += signaling::exchange_candidates(offerer, answerer).await;

        if complete {
            info!(
                forwarded = stats.forwarded,
                dropped = stats.dropped,
                "ICE gathering complete on both endpoints"
            );
        } else {
            warn!(
                offerer_complete = offerer.ice_gathering_complete(),
                answerer_complete = answerer.ice_gathering_complete(),
                "ICE gathering did not complete in time"
            );
            timeouts.push(PhaseTimeout::Gathering(self.config.gathering_timeout));
        }
        stats
    }

    /// Waits until `ready` holds or `budget` runs out. Woken by observer
    /// progress, re-checked at least every poll interval.
    async fn wait_until(&self, budget: Duration, mut ready: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + budget;
        loop {
            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if ready() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = sleep(self.config.poll_interval) => {}
                _ = sleep_until(deadline) => {}
            }
        }
    }
}
