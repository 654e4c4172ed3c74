//! Coordination layer
//!
//! - Aggregator actor owning the published dashboard snapshot
//! - Interval refresh scheduler
//! - Killswitch confirmation state machine

pub mod aggregator;
pub mod killswitch;
pub mod scheduler;

pub use aggregator::{
    AggregatorCommand, AggregatorSettings, DashboardAggregator, DashboardHandle,
};
pub use killswitch::{KillswitchController, KillswitchPhase};
pub use scheduler::RefreshScheduler;
