pub mod config;
pub mod engine;
pub mod error;
pub mod logger;
pub mod orchestrator;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::NegotiationConfig;
pub use engine::{EngineFactory, RtcEngine};
#[cfg(any(test, feature = "test-util"))]
pub use engine::{LoopbackEngine, LoopbackOptions};
pub use error::{NegotiationError, PhaseTimeout, SessionError, SetupError};
pub use orchestrator::{NegotiationOrchestrator, NegotiationReport};
pub use session::{run_session, SessionSummary};
