use crate::config::NegotiationConfig;
use crate::engine::EngineFactory;
use crate::error::SessionError;
use crate::orchestrator::{NegotiationOrchestrator, NegotiationReport};
use crate::peer::connection::EndpointCoordinator;
use crate::peer::state::EndpointState;
use crate::utils::random_id;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{error, info};

/// Final outcome of one local negotiation run
#[derive(Serialize, Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub offerer: String,
    pub answerer: String,
    #[serde(flatten)]
    pub report: NegotiationReport,
    pub offerer_state: EndpointState,
    pub answerer_state: EndpointState,
}

impl SessionSummary {
    pub fn is_full_success(&self) -> bool {
        self.report.is_full_success()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = &self.report;
        writeln!(f, "=== Test Summary ({}) ===", self.session_id)?;
        writeln!(f, "{} connected: {}", self.offerer, yes_no(report.offerer_connected))?;
        writeln!(f, "{} connected: {}", self.answerer, yes_no(report.answerer_connected))?;
        writeln!(
            f,
            "Messages exchanged: {}",
            if report.messages_exchanged {
                "Yes"
            } else {
                "Partial/No"
            }
        )?;
        writeln!(
            f,
            "Candidates relayed: {} forwarded, {} dropped",
            report.relay.forwarded, report.relay.dropped
        )?;
        if report.set_failures > 0 {
            writeln!(f, "Description set failures: {}", report.set_failures)?;
        }
        if report.send_failures > 0 {
            writeln!(f, "Greeting send failures: {}", report.send_failures)?;
        }
        for timeout in &report.timeouts {
            writeln!(f, "Timed out: {}", timeout)?;
        }
        write!(
            f,
            "Duration: {} ms",
            (self.finished_at - self.started_at).num_milliseconds()
        )
    }
}

/// Runs the whole handshake between two endpoints built by `factory`.
///
/// Both endpoints are closed before returning, whatever the outcome once
/// they exist.
pub async fn run_session(
    factory: &dyn EngineFactory,
    config: NegotiationConfig,
) -> Result<SessionSummary, SessionError> {
    let session_id = random_id();
    let started_at = Utc::now();
    info!(session = %session_id, "Starting local negotiation");

    let config = config.validate()?;
    let orchestrator = NegotiationOrchestrator::new(config);
    let config = orchestrator.config();

    let offerer = EndpointCoordinator::new(
        factory,
        &config.offerer_name,
        &config.ice_servers,
        orchestrator.progress(),
    )
    .await?;

    let answerer = match EndpointCoordinator::new(
        factory,
        &config.answerer_name,
        &config.ice_servers,
        orchestrator.progress(),
    )
    .await
    {
        Ok(answerer) => answerer,
        Err(e) => {
            offerer.close().await;
            return Err(e.into());
        }
    };

    let outcome = match offerer
        .open_channel(&config.channel_label, config.channel_options.clone())
        .await
    {
        Ok(()) => orchestrator
            .run(&offerer, &answerer)
            .await
            .map_err(SessionError::from),
        Err(e) => Err(e.into()),
    };

    let offerer_state = offerer.state();
    let answerer_state = answerer.state();

    offerer.close().await;
    answerer.close().await;

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            error!(session = %session_id, error = %e, "Negotiation aborted");
            return Err(e);
        }
    };

    Ok(SessionSummary {
        session_id,
        started_at,
        finished_at: Utc::now(),
        offerer: offerer.name().to_string(),
        answerer: answerer.name().to_string(),
        report,
        offerer_state,
        answerer_state,
    })
}
