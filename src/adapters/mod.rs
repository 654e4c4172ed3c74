pub mod orchestrator_rest;
pub mod postgres;
pub mod resilient_killswitch;

pub use orchestrator_rest::OrchestratorClient;
pub use postgres::{PostgresFallbackStore, KILLSWITCH_STATE_KEY, REGIME_EVENT_TYPE};
pub use resilient_killswitch::ResilientKillswitch;
