//! Probing and derivation services: endpoint verification, secondary
//! service health, agent liveness.

pub mod endpoint_verifier;
pub mod liveness;
pub mod service_health;

pub use endpoint_verifier::EndpointHealthVerifier;
pub use liveness::{assess, effective_threshold, is_alive, DEFAULT_LIVENESS_THRESHOLD_SECS};
pub use service_health::ServiceHealthChecker;
