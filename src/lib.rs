pub mod adapters;
pub mod api;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod realtime;
pub mod services;

pub use adapters::{OrchestratorClient, PostgresFallbackStore, ResilientKillswitch};
pub use config::SentinelConfig;
pub use coordination::{
    AggregatorCommand, AggregatorSettings, DashboardAggregator, DashboardHandle,
    KillswitchController, KillswitchPhase, RefreshScheduler,
};
pub use domain::{
    ConnectionState, ConnectionStatusEvent, DashboardSnapshot, InboundEvent,
    KillswitchActivation, RefreshCause, SystemHealth,
};
pub use error::{Result, SentinelError};
pub use realtime::RealtimeConnectionManager;
pub use services::EndpointHealthVerifier;
