use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Capability;

/// Storage-layer failures shared by every `IdentityStore` backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::Conflict(
                    db_err.constraint().unwrap_or("unique constraint").to_string(),
                );
            }
        }
        if let sqlx::Error::RowNotFound = err {
            return StoreError::NotFound("row".to_string());
        }
        StoreError::Backend(anyhow::Error::new(err))
    }
}

/// Domain errors raised by the identity core.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Missing capabilities: {missing:?}")]
    Forbidden { missing: Vec<Capability> },

    #[error("Challenge expired or already consumed")]
    ChallengeExpiredOrConsumed,

    #[error("Verification {record_id} failed: {failed_checks:?}")]
    VerificationStepFailed {
        record_id: Uuid,
        failed_checks: Vec<String>,
    },

    #[error("Authenticator counter did not advance")]
    ReplayDetected,

    #[error("Verification attempt {record_id} is still active")]
    ConflictingAttempt { record_id: Uuid },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Unauthenticated => {
                AppError::Unauthorized(anyhow::anyhow!("Authentication required"))
            }
            CoreError::ReplayDetected | CoreError::ChallengeExpiredOrConsumed => {
                AppError::Unauthorized(anyhow::anyhow!("Authentication failed"))
            }
            CoreError::Forbidden { .. } => AppError::Forbidden(anyhow::anyhow!("Access denied")),
            CoreError::VerificationStepFailed { failed_checks, .. } => AppError::Unprocessable(
                anyhow::anyhow!("Verification was not approved"),
                failed_checks,
            ),
            CoreError::ConflictingAttempt { record_id } => AppError::Conflict(anyhow::anyhow!(
                "A verification attempt is already active; wait for or cancel attempt {}",
                record_id
            )),
            CoreError::InvalidRequest(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            CoreError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            CoreError::Store(StoreError::NotFound(what)) => {
                AppError::NotFound(anyhow::anyhow!("{} not found", what))
            }
            CoreError::Store(StoreError::Conflict(what)) => {
                AppError::Conflict(anyhow::anyhow!("Conflicting write: {}", what))
            }
            CoreError::Store(StoreError::Backend(e)) => AppError::DatabaseError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn forbidden_does_not_name_missing_capabilities() {
        let app: AppError = CoreError::Forbidden {
            missing: vec![Capability::RxSign],
        }
        .into();
        assert!(!app.to_string().contains("rx:sign"));
        assert_eq!(app.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn replay_and_challenge_failures_look_identical() {
        let a: AppError = CoreError::ReplayDetected.into();
        let b: AppError = CoreError::ChallengeExpiredOrConsumed.into();
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn conflicting_attempt_maps_to_409() {
        let app: AppError = CoreError::ConflictingAttempt {
            record_id: Uuid::nil(),
        }
        .into();
        assert_eq!(app.into_response().status(), StatusCode::CONFLICT);
    }
}
