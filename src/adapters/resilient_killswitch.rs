use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, warn};

use crate::domain::{ActivationPath, KillswitchResponse, KillswitchState};
use crate::error::Result;
use crate::gateway::{FallbackStore, KillswitchGateway};

/// Recorded as `triggered_by` when the store path is used
pub const TRIGGERED_BY: &str = "dashboard";

/// Killswitch gateway that records the activation in the record store when
/// the orchestrator cannot be reached.
///
/// The store write is an alternate path for the same attempt. An explicit
/// rejection from the orchestrator is returned as-is and never bypassed.
pub struct ResilientKillswitch {
    api: Arc<dyn KillswitchGateway>,
    store: Option<Arc<dyn FallbackStore>>,
}

impl ResilientKillswitch {
    pub fn new(api: Arc<dyn KillswitchGateway>, store: Option<Arc<dyn FallbackStore>>) -> Self {
        Self { api, store }
    }
}

#[async_trait]
impl KillswitchGateway for ResilientKillswitch {
    async fn activate(&self, reason: &str) -> Result<KillswitchResponse> {
        let api_error = match self.api.activate(reason).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        let store = match &self.store {
            Some(store) => store,
            None => return Err(api_error),
        };

        warn!("Killswitch API failed, recording in record store: {}", api_error);
        let state = KillswitchState {
            enabled: true,
            reason: Some(reason.to_string()),
            timestamp: Some(Utc::now()),
            triggered_by: Some(TRIGGERED_BY.to_string()),
        };

        match store.record_killswitch(&state).await {
            Ok(()) => Ok(KillswitchResponse::ok(ActivationPath::StoreFallback)),
            Err(store_error) => {
                error!("Killswitch store fallback failed: {}", store_error);
                Ok(KillswitchResponse::failed(format!(
                    "api: {}; store: {}",
                    api_error, store_error
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use crate::coordination::KillswitchController;
    use crate::domain::{ActivationOutcome, AgentRecord, InboundEvent, RefreshCause, RegimeSnapshot};
    use crate::error::SentinelError;
    use crate::gateway::{MockFallbackStore, MockKillswitchGateway, MockRefreshRequester};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Orchestrator that hangs until its own request timeout fires
    struct HungApi {
        timeout: Duration,
    }

    #[async_trait]
    impl KillswitchGateway for HungApi {
        async fn activate(&self, _reason: &str) -> Result<KillswitchResponse> {
            tokio::time::sleep(self.timeout).await;
            Err(SentinelError::timeout("killswitch", self.timeout.as_millis() as u64))
        }
    }

    struct SlowStore {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl FallbackStore for SlowStore {
        async fn load_agents(&self) -> Result<Vec<AgentRecord>> {
            Ok(Vec::new())
        }

        async fn load_recent_events(&self, _limit: usize) -> Result<Vec<InboundEvent>> {
            Ok(Vec::new())
        }

        async fn load_regime(&self) -> Result<Option<RegimeSnapshot>> {
            Ok(None)
        }

        async fn load_killswitch_state(&self) -> Result<Option<KillswitchState>> {
            Ok(None)
        }

        async fn record_killswitch(&self, _state: &KillswitchState) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn failing_api() -> MockKillswitchGateway {
        let mut api = MockKillswitchGateway::new();
        api.expect_activate()
            .times(1)
            .returning(|_| Err(SentinelError::Unavailable("connection refused".to_string())));
        api
    }

    #[tokio::test]
    async fn test_api_success_skips_store() {
        let mut api = MockKillswitchGateway::new();
        api.expect_activate()
            .returning(|_| Ok(KillswitchResponse::ok(ActivationPath::Api)));
        let mut store = MockFallbackStore::new();
        store.expect_record_killswitch().times(0);

        let gateway = ResilientKillswitch::new(Arc::new(api), Some(Arc::new(store)));
        let response = gateway.activate("halt").await.unwrap();
        assert_eq!(response.path, Some(ActivationPath::Api));
    }

    #[tokio::test]
    async fn test_api_failure_records_in_store() {
        let mut store = MockFallbackStore::new();
        store
            .expect_record_killswitch()
            .withf(|state| {
                state.enabled
                    && state.reason.as_deref() == Some("halt")
                    && state.triggered_by.as_deref() == Some(TRIGGERED_BY)
            })
            .times(1)
            .returning(|_| Ok(()));

        let gateway = ResilientKillswitch::new(Arc::new(failing_api()), Some(Arc::new(store)));
        let response = gateway.activate("halt").await.unwrap();
        assert!(response.success);
        assert_eq!(response.path, Some(ActivationPath::StoreFallback));
    }

    #[tokio::test]
    async fn test_both_paths_failing_is_reported() {
        let mut store = MockFallbackStore::new();
        store
            .expect_record_killswitch()
            .returning(|_| Err(SentinelError::Unavailable("pool closed".to_string())));

        let gateway = ResilientKillswitch::new(Arc::new(failing_api()), Some(Arc::new(store)));
        let response = gateway.activate("halt").await.unwrap();
        assert!(!response.success);
        let error = response.error.unwrap();
        assert!(error.contains("connection refused") && error.contains("pool closed"));
    }

    #[tokio::test]
    async fn test_without_store_api_error_propagates() {
        let gateway = ResilientKillswitch::new(Arc::new(failing_api()), None);
        assert!(gateway.activate("halt").await.is_err());
    }

    #[tokio::test]
    async fn test_hung_api_still_reaches_the_store_within_budget() {
        let api_config = ApiConfig {
            timeout_ms: 150,
            ..ApiConfig::default()
        };
        let store = Arc::new(SlowStore {
            writes: AtomicUsize::new(0),
        });
        let gateway = ResilientKillswitch::new(
            Arc::new(HungApi {
                timeout: api_config.timeout(),
            }),
            Some(store.clone()),
        );
        let mut refresher = MockRefreshRequester::new();
        refresher
            .expect_request_refresh()
            .withf(|cause| *cause == RefreshCause::Killswitch)
            .times(1)
            .return_const(true);

        let ks = KillswitchController::new(
            Arc::new(gateway),
            Arc::new(refresher),
            api_config.killswitch_timeout(),
        );
        ks.request().unwrap();
        let activation = ks.confirm(Some("halt")).await.unwrap();

        assert_eq!(
            activation.outcome,
            ActivationOutcome::Success {
                path: Some(ActivationPath::StoreFallback)
            }
        );
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }
}
