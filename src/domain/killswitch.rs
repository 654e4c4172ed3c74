use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which path carried an activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationPath {
    Api,
    StoreFallback,
}

/// Reply of the external activation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillswitchResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<ActivationPath>,
}

impl KillswitchResponse {
    pub fn ok(path: ActivationPath) -> Self {
        Self {
            success: true,
            error: None,
            path: Some(path),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActivationOutcome {
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<ActivationPath>,
    },
    Failure {
        error: String,
    },
}

/// Record of one confirmed activation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillswitchActivation {
    pub id: Uuid,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: ActivationOutcome,
}

impl KillswitchActivation {
    pub(crate) fn new(reason: String, outcome: ActivationOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            reason,
            timestamp: Utc::now(),
            outcome,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, ActivationOutcome::Success { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ActivationOutcome::Failure { error } => Some(error),
            ActivationOutcome::Success { .. } => None,
        }
    }
}

/// Killswitch status persisted in the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillswitchState {
    pub enabled: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub triggered_by: Option<String>,
}
