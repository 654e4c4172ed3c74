//! Guarded two-step emergency stop.
//!
//! `Idle -> AwaitingConfirmation -> Activating -> Idle`. Activation needs a
//! non-blank operator reason; a blank reason is rejected before any call
//! leaves the process.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::domain::{ActivationOutcome, KillswitchActivation, RefreshCause};
use crate::error::{Result, SentinelError};
use crate::gateway::{KillswitchGateway, RefreshRequester};

/// Activation records kept in memory
const MAX_HISTORY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum KillswitchPhase {
    Idle,
    AwaitingConfirmation { draft: String },
    Activating { reason: String },
}

impl KillswitchPhase {
    fn name(&self) -> &'static str {
        match self {
            KillswitchPhase::Idle => "idle",
            KillswitchPhase::AwaitingConfirmation { .. } => "awaiting_confirmation",
            KillswitchPhase::Activating { .. } => "activating",
        }
    }
}

#[derive(Debug)]
struct Ledger {
    phase: KillswitchPhase,
    history: VecDeque<KillswitchActivation>,
}

impl Ledger {
    fn invalid(&self, to: &str) -> SentinelError {
        SentinelError::InvalidStateTransition {
            from: self.phase.name().to_string(),
            to: to.to_string(),
        }
    }

    fn settle(&mut self, activation: &KillswitchActivation) {
        self.phase = KillswitchPhase::Idle;
        self.history.push_front(activation.clone());
        self.history.truncate(MAX_HISTORY);
    }
}

/// The phase lock is never held across an await, so status reads stay
/// answerable while an activation is in flight.
pub struct KillswitchController {
    gateway: Arc<dyn KillswitchGateway>,
    refresher: Arc<dyn RefreshRequester>,
    timeout: Duration,
    ledger: Arc<Mutex<Ledger>>,
}

impl KillswitchController {
    pub fn new(
        gateway: Arc<dyn KillswitchGateway>,
        refresher: Arc<dyn RefreshRequester>,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            refresher,
            timeout,
            ledger: Arc::new(Mutex::new(Ledger {
                phase: KillswitchPhase::Idle,
                history: VecDeque::new(),
            })),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn phase(&self) -> KillswitchPhase {
        self.ledger().phase.clone()
    }

    /// Newest first
    pub fn history(&self) -> Vec<KillswitchActivation> {
        self.ledger().history.iter().cloned().collect()
    }

    pub fn last_activation(&self) -> Option<KillswitchActivation> {
        self.ledger().history.front().cloned()
    }

    /// Enter awaiting-confirmation. Re-arming keeps the current draft.
    pub fn request(&self) -> Result<()> {
        let mut ledger = self.ledger();
        match &ledger.phase {
            KillswitchPhase::Idle => {
                info!("Killswitch armed, awaiting confirmation");
                ledger.phase = KillswitchPhase::AwaitingConfirmation { draft: String::new() };
                Ok(())
            }
            KillswitchPhase::AwaitingConfirmation { .. } => Ok(()),
            KillswitchPhase::Activating { .. } => Err(ledger.invalid("awaiting_confirmation")),
        }
    }

    pub fn set_reason(&self, reason: impl Into<String>) -> Result<()> {
        let mut ledger = self.ledger();
        if let KillswitchPhase::AwaitingConfirmation { draft } = &mut ledger.phase {
            *draft = reason.into();
            return Ok(());
        }
        Err(ledger.invalid("awaiting_confirmation"))
    }

    /// Discard the draft and return to idle. A no-op when already idle.
    pub fn cancel(&self) -> Result<()> {
        let mut ledger = self.ledger();
        match &ledger.phase {
            KillswitchPhase::AwaitingConfirmation { .. } => {
                info!("Killswitch confirmation cancelled");
                ledger.phase = KillswitchPhase::Idle;
                Ok(())
            }
            KillswitchPhase::Idle => Ok(()),
            KillswitchPhase::Activating { .. } => Err(ledger.invalid("idle")),
        }
    }

    /// Confirm with `reason`, or with the stored draft when `reason` is `None`.
    ///
    /// Returns the activation record for both outcomes; a failed external
    /// call is recorded, reported and not retried. The call runs on its own
    /// task: dropping this future does not abandon it, the record is still
    /// written and the phase still returns to idle.
    pub async fn confirm(&self, reason: Option<&str>) -> Result<KillswitchActivation> {
        let reason = {
            let mut ledger = self.ledger();
            let draft = match &ledger.phase {
                KillswitchPhase::AwaitingConfirmation { draft } => draft.clone(),
                _ => return Err(ledger.invalid("activating")),
            };

            let reason = reason.unwrap_or(draft.as_str()).trim().to_string();
            if reason.is_empty() {
                return Err(SentinelError::Validation(
                    "killswitch reason must not be empty".to_string(),
                ));
            }

            warn!(reason = %reason, "Activating killswitch");
            ledger.phase = KillswitchPhase::Activating { reason: reason.clone() };
            reason
        };

        let activation = tokio::spawn(run_activation(
            self.gateway.clone(),
            self.refresher.clone(),
            self.ledger.clone(),
            self.timeout,
            reason.clone(),
        ));

        match activation.await {
            Ok(activation) => Ok(activation),
            Err(e) => {
                // Only reachable if the gateway panicked
                let activation = KillswitchActivation::new(
                    reason,
                    ActivationOutcome::Failure {
                        error: format!("activation task failed: {}", e),
                    },
                );
                self.ledger().settle(&activation);
                error!(id = %activation.id, "Killswitch activation task failed: {}", e);
                Ok(activation)
            }
        }
    }
}

async fn run_activation(
    gateway: Arc<dyn KillswitchGateway>,
    refresher: Arc<dyn RefreshRequester>,
    ledger: Arc<Mutex<Ledger>>,
    timeout: Duration,
    reason: String,
) -> KillswitchActivation {
    let outcome = match tokio::time::timeout(timeout, gateway.activate(&reason)).await {
        Ok(Ok(response)) if response.success => ActivationOutcome::Success { path: response.path },
        Ok(Ok(response)) => ActivationOutcome::Failure {
            error: response
                .error
                .unwrap_or_else(|| "activation rejected without detail".to_string()),
        },
        Ok(Err(e)) => ActivationOutcome::Failure { error: e.to_string() },
        Err(_) => ActivationOutcome::Failure {
            error: format!("activation timed out after {}ms", timeout.as_millis()),
        },
    };

    let activation = KillswitchActivation::new(reason, outcome);
    ledger
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .settle(&activation);

    match activation.error() {
        None => {
            info!(id = %activation.id, "Killswitch activated");
            if !refresher.request_refresh(RefreshCause::Killswitch) {
                warn!("Refresh after killswitch activation could not be delivered");
            }
        }
        Some(err) => error!(id = %activation.id, "Killswitch activation failed: {}", err),
    }

    activation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActivationPath, KillswitchResponse};
    use crate::gateway::{MockKillswitchGateway, MockRefreshRequester};
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn controller(gateway: MockKillswitchGateway, refresher: MockRefreshRequester) -> KillswitchController {
        KillswitchController::new(Arc::new(gateway), Arc::new(refresher), Duration::from_secs(1))
    }

    struct SlowGateway {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KillswitchGateway for SlowGateway {
        async fn activate(&self, _reason: &str) -> Result<KillswitchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(KillswitchResponse::ok(ActivationPath::Api))
        }
    }

    #[tokio::test]
    async fn test_blank_reason_never_reaches_gateway() {
        let mut gateway = MockKillswitchGateway::new();
        gateway.expect_activate().times(0);
        let mut refresher = MockRefreshRequester::new();
        refresher.expect_request_refresh().times(0);

        let ks = controller(gateway, refresher);
        ks.request().unwrap();

        for reason in ["", "   ", "\t\n"] {
            let err = ks.confirm(Some(reason)).await.unwrap_err();
            assert!(matches!(err, SentinelError::Validation(_)));
            assert!(matches!(ks.phase(), KillswitchPhase::AwaitingConfirmation { .. }));
        }
        assert!(ks.last_activation().is_none());
    }

    #[tokio::test]
    async fn test_success_records_and_refreshes_once() {
        let mut gateway = MockKillswitchGateway::new();
        gateway
            .expect_activate()
            .withf(|reason| reason == "Emergency Market Conditions")
            .times(1)
            .returning(|_| Ok(KillswitchResponse::ok(ActivationPath::Api)));
        let mut refresher = MockRefreshRequester::new();
        refresher
            .expect_request_refresh()
            .with(eq(RefreshCause::Killswitch))
            .times(1)
            .return_const(true);

        let ks = controller(gateway, refresher);
        ks.request().unwrap();
        ks.set_reason("  Emergency Market Conditions ").unwrap();
        let activation = ks.confirm(None).await.unwrap();

        assert!(activation.succeeded());
        assert_eq!(activation.reason, "Emergency Market Conditions");
        assert_eq!(ks.phase(), KillswitchPhase::Idle);
        assert_eq!(ks.history().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_without_retry() {
        let mut gateway = MockKillswitchGateway::new();
        gateway
            .expect_activate()
            .times(1)
            .returning(|_| Err(SentinelError::Unavailable("orchestrator down".to_string())));
        let mut refresher = MockRefreshRequester::new();
        refresher.expect_request_refresh().times(0);

        let ks = controller(gateway, refresher);
        ks.request().unwrap();
        let activation = ks.confirm(Some("halt")).await.unwrap();

        assert!(!activation.succeeded());
        assert!(activation.error().unwrap().contains("orchestrator down"));
        assert_eq!(ks.phase(), KillswitchPhase::Idle);
    }

    #[tokio::test]
    async fn test_rejected_response_is_a_failure() {
        let mut gateway = MockKillswitchGateway::new();
        gateway
            .expect_activate()
            .returning(|_| Ok(KillswitchResponse::failed("reason too short")));
        let mut refresher = MockRefreshRequester::new();
        refresher.expect_request_refresh().times(0);

        let ks = controller(gateway, refresher);
        ks.request().unwrap();
        let activation = ks.confirm(Some("x")).await.unwrap();
        assert_eq!(activation.error(), Some("reason too short"));
    }

    #[tokio::test]
    async fn test_cancel_discards_draft() {
        let mut gateway = MockKillswitchGateway::new();
        gateway.expect_activate().times(0);
        let ks = controller(gateway, MockRefreshRequester::new());

        ks.request().unwrap();
        ks.set_reason("maybe").unwrap();
        ks.cancel().unwrap();
        assert_eq!(ks.phase(), KillswitchPhase::Idle);

        ks.request().unwrap();
        assert_eq!(
            ks.phase(),
            KillswitchPhase::AwaitingConfirmation { draft: String::new() }
        );
    }

    #[tokio::test]
    async fn test_confirm_from_idle_is_rejected() {
        let mut gateway = MockKillswitchGateway::new();
        gateway.expect_activate().times(0);
        let ks = controller(gateway, MockRefreshRequester::new());

        let err = ks.confirm(Some("halt")).await.unwrap_err();
        assert!(matches!(err, SentinelError::InvalidStateTransition { .. }));
        assert!(ks.set_reason("x").is_err());
        assert!(ks.cancel().is_ok());
    }

    #[tokio::test]
    async fn test_timeout_is_recorded_as_failure() {
        let gateway = Arc::new(SlowGateway {
            delay: Duration::from_secs(5),
            calls: AtomicUsize::new(0),
        });
        let mut refresher = MockRefreshRequester::new();
        refresher.expect_request_refresh().times(0);
        let ks = KillswitchController::new(gateway.clone(), Arc::new(refresher), Duration::from_millis(50));

        ks.request().unwrap();
        let activation = ks.confirm(Some("halt")).await.unwrap();

        assert_eq!(activation.error(), Some("activation timed out after 50ms"));
        assert_eq!(ks.phase(), KillswitchPhase::Idle);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_confirm_still_completes_activation() {
        let gateway = Arc::new(SlowGateway {
            delay: Duration::from_millis(200),
            calls: AtomicUsize::new(0),
        });
        let mut refresher = MockRefreshRequester::new();
        refresher
            .expect_request_refresh()
            .with(eq(RefreshCause::Killswitch))
            .times(1)
            .return_const(true);
        let ks = KillswitchController::new(gateway.clone(), Arc::new(refresher), Duration::from_secs(2));

        ks.request().unwrap();
        let abandoned = tokio::time::timeout(Duration::from_millis(20), ks.confirm(Some("halt"))).await;
        assert!(abandoned.is_err());

        // The call is still in flight and the phase is readable meanwhile
        assert_eq!(ks.phase(), KillswitchPhase::Activating { reason: "halt".to_string() });
        assert!(matches!(
            ks.request(),
            Err(SentinelError::InvalidStateTransition { .. })
        ));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while ks.phase() != KillswitchPhase::Idle {
            assert!(tokio::time::Instant::now() < deadline, "activation never settled");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let last = ks.last_activation().unwrap();
        assert!(last.succeeded());
        assert_eq!(last.reason, "halt");
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);

        // Usable again
        ks.request().unwrap();
        assert!(matches!(ks.phase(), KillswitchPhase::AwaitingConfirmation { .. }));
    }
}
