use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the settlement engine
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed input, rejected before the store is touched
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Business rule violation: {0}")]
    BusinessRule(#[from] BusinessRuleViolation),

    /// A declared ledger invariant would have been broken
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Connection loss, lock wait timeout, serialization failure or unit timeout
    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Settlement of campaign {campaign_id} failed: {source}")]
    SettlementProcessing {
        campaign_id: Uuid,
        #[source]
        source: Box<AppError>,
    },

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Rejections raised inside a unit of work; never retried
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusinessRuleViolation {
    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Campaign {0} is not active")]
    CampaignNotActive(Uuid),

    #[error("Deadline of campaign {0} has passed")]
    DeadlinePassed(Uuid),

    #[error("Deadline of campaign {0} has not been reached")]
    DeadlineNotReached(Uuid),

    #[error("Creators cannot pledge to their own campaign")]
    SelfPledge,

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },
}

impl AppError {
    /// Whether the whole unit of work may be attempted again
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientStore(_))
    }

    pub fn settlement(campaign_id: Uuid, source: AppError) -> Self {
        AppError::SettlementProcessing {
            campaign_id,
            source: Box::new(source),
        }
    }
}

/// SQLSTATE codes that abort a unit of work without being a defect
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "57014", // query_canceled (statement/lock timeout)
    "08000", "08003", "08006", // connection exceptions
];

const CONSTRAINT_SQLSTATES: &[&str] = &[
    "23502", // not_null_violation
    "23503", // foreign_key_violation
    "23505", // unique_violation
    "23514", // check_violation
    "22003", // numeric_value_out_of_range
];

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        let classified = match &error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Some(AppError::TransientStore(error.to_string()))
            }
            sqlx::Error::Database(db) => match db.code().map(|c| c.into_owned()) {
                Some(ref code) if TRANSIENT_SQLSTATES.contains(&code.as_str()) => {
                    Some(AppError::TransientStore(db.message().to_string()))
                }
                Some(ref code) if CONSTRAINT_SQLSTATES.contains(&code.as_str()) => {
                    Some(AppError::ConstraintViolation(format!(
                        "{} ({})",
                        db.message(),
                        db.constraint().unwrap_or("unnamed")
                    )))
                }
                _ => None,
            },
            _ => None,
        };

        classified.unwrap_or(AppError::Database(error))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::Internal(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let messages: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                format!("{}: {}", field, messages.join(", "))
            })
            .collect::<Vec<String>>()
            .join("; ");

        AppError::Validation(message)
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                message,
                None,
            ),
            AppError::BusinessRule(rule) => {
                let (status, code) = match &rule {
                    BusinessRuleViolation::CampaignNotFound(_) => {
                        (StatusCode::NOT_FOUND, "CAMPAIGN_NOT_FOUND")
                    }
                    BusinessRuleViolation::AccountNotFound(_) => {
                        (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND")
                    }
                    BusinessRuleViolation::CampaignNotActive(_) => {
                        (StatusCode::CONFLICT, "CAMPAIGN_NOT_ACTIVE")
                    }
                    BusinessRuleViolation::DeadlinePassed(_) => {
                        (StatusCode::CONFLICT, "DEADLINE_PASSED")
                    }
                    BusinessRuleViolation::DeadlineNotReached(_) => {
                        (StatusCode::CONFLICT, "DEADLINE_NOT_REACHED")
                    }
                    BusinessRuleViolation::SelfPledge => (StatusCode::FORBIDDEN, "SELF_PLEDGE"),
                    BusinessRuleViolation::InsufficientFunds { .. } => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_FUNDS")
                    }
                };
                let details = match &rule {
                    BusinessRuleViolation::InsufficientFunds { required, available } => {
                        Some(serde_json::json!({
                            "required": required,
                            "available": available,
                        }))
                    }
                    _ => None,
                };
                (status, code, rule.to_string(), details)
            }
            AppError::TransientStore(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
                "The ledger store is temporarily unavailable".to_string(),
                None,
            ),
            AppError::SettlementProcessing { campaign_id, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SETTLEMENT_FAILED",
                format!("Settlement of campaign {} failed", campaign_id),
                Some(serde_json::json!({"campaign_id": campaign_id})),
            ),
            AppError::ConstraintViolation(_) | AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "LEDGER_ERROR",
                "A ledger error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_errors_are_transient() {
        assert!(AppError::TransientStore("lock wait".into()).is_transient());
        assert!(AppError::from(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!AppError::ConstraintViolation("balance".into()).is_transient());
        assert!(!AppError::from(BusinessRuleViolation::SelfPledge).is_transient());
    }

    #[test]
    fn test_business_rule_status_codes() {
        let response = AppError::from(BusinessRuleViolation::InsufficientFunds {
            required: "80".into(),
            available: "20".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response =
            AppError::from(BusinessRuleViolation::CampaignNotFound(Uuid::new_v4())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::Validation("amount".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
