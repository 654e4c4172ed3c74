//! Live event stream: connection lifecycle and typed fan-out.

pub mod connection;
pub mod subscribers;

pub use connection::RealtimeConnectionManager;
pub use subscribers::{Subscribers, Subscription, SubscriptionId};
