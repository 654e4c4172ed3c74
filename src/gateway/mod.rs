mod traits;

pub use traits::{
    DashboardData, DashboardSource, FallbackStore, HealthProbe, KillswitchGateway,
    RefreshRequester,
};

#[cfg(test)]
pub use traits::{MockDashboardSource, MockFallbackStore, MockKillswitchGateway, MockRefreshRequester};
