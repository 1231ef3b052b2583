use anyhow::Context;
use loopback_rtc::{logger, run_session, NegotiationConfig, RtcEngine, SessionSummary};
use std::process::ExitCode;
use tracing::{error, info, warn};

// -1 as an 8-bit exit status
const FATAL_EXIT: u8 = 255;

#[tokio::main]
async fn main() -> ExitCode {
    logger::init();

    match run().await {
        Ok(summary) => {
            println!("{}", summary);
            match summary.to_json() {
                Ok(json) => info!(summary = %json, "Session finished"),
                Err(e) => warn!("Failed to serialize summary: {}", e),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(FATAL_EXIT)
        }
    }
}

async fn run() -> anyhow::Result<SessionSummary> {
    // released when this scope ends, on every path
    let engine = RtcEngine::initialize();
    run_session(&engine, NegotiationConfig::default())
        .await
        .context("local negotiation failed")
}
