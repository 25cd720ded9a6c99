//! Application-wide error types and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use crowdtank_escrow::EscrowError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("missing or empty x-caller-id header")]
    MissingCaller,

    #[error(transparent)]
    Escrow(#[from] EscrowError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl GatewayError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Database(_) | Self::Migrate(_) | Self::Config(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
            Self::MissingCaller => (StatusCode::UNAUTHORIZED, "MISSING_CALLER"),
            Self::Escrow(e) => escrow_status_and_code(e),
        }
    }
}

fn escrow_status_and_code(err: &EscrowError) -> (StatusCode, &'static str) {
    match err {
        EscrowError::InvalidGoal => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_GOAL"),
        EscrowError::InvalidDuration => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_DURATION"),
        EscrowError::InvalidAmount => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_AMOUNT"),
        EscrowError::DuplicateId(_) => (StatusCode::CONFLICT, "DUPLICATE_ID"),
        EscrowError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        EscrowError::CampaignClosed(_) => (StatusCode::CONFLICT, "CAMPAIGN_CLOSED"),
        EscrowError::CampaignNotFinalized(_) => (StatusCode::CONFLICT, "CAMPAIGN_NOT_FINALIZED"),
        EscrowError::NotFunded(_) => (StatusCode::CONFLICT, "NOT_FUNDED"),
        EscrowError::AlreadyWithdrawn(_) => (StatusCode::CONFLICT, "ALREADY_WITHDRAWN"),
        EscrowError::NothingToWithdraw(_) => (StatusCode::CONFLICT, "NOTHING_TO_WITHDRAW"),
        EscrowError::NotEligible(_) => (StatusCode::FORBIDDEN, "NOT_ELIGIBLE"),
        EscrowError::TransferFailed { .. } => (StatusCode::BAD_GATEWAY, "TRANSFER_FAILED"),
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Storage failures are logged in full but reported generically.
        let message = if status.is_server_error() && !matches!(self, Self::Escrow(_)) {
            error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(ErrorBody {
                error: ErrorDetail { code, message },
            }),
        )
            .into_response()
    }
}
