pub mod dashboard;
pub mod killswitch;

pub use dashboard::*;
pub use killswitch::*;

use axum::http::StatusCode;

use crate::error::SentinelError;

pub(crate) fn error_response(err: SentinelError) -> (StatusCode, String) {
    let status = match &err {
        SentinelError::Validation(_) => StatusCode::BAD_REQUEST,
        SentinelError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
        SentinelError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}
