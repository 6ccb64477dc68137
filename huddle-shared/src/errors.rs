use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use diesel::result::DatabaseErrorKind;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Coarse failure classes surfaced to callers.
///
/// Every [`ErrorCode`] belongs to exactly one category, and the category alone
/// decides the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Unauthorized,
    Forbidden,
    Conflict,
    InvalidState,
    NotFound,
    Internal,
}

impl ErrorCategory {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation | Self::Conflict | Self::InvalidState => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Application error codes following the pattern E{area}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Room and membership errors
/// - E2xxx: Message errors
/// - E3xxx: Moderation errors
/// - E4xxx: User errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    Conflict,
    InvalidState,
    TokenExpired,
    TokenInvalid,

    // Rooms (E1xxx)
    RoomNotFound,
    NotRoomParticipant,
    RoomAdminRequired,
    RoomOwnerRequired,
    AlreadyParticipant,
    ParticipantNotFound,
    OwnerMustTransfer,
    ParticipantMuted,

    // Messages (E2xxx)
    MessageNotFound,
    EmptyMessage,
    NotMessageAuthor,
    MessageDeleted,
    InvalidReplyTarget,
    MediaNotAllowed,

    // Moderation (E3xxx)
    ReportNotFound,
    DuplicateReport,
    ModeratorRequired,
    BlockedIpNotFound,
    IpBlocked,

    // Users (E4xxx)
    UserNotFound,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::Forbidden => "E0005",
            Self::Conflict => "E0006",
            Self::InvalidState => "E0007",
            Self::TokenExpired => "E0008",
            Self::TokenInvalid => "E0009",

            // Rooms
            Self::RoomNotFound => "E1001",
            Self::NotRoomParticipant => "E1002",
            Self::RoomAdminRequired => "E1003",
            Self::RoomOwnerRequired => "E1004",
            Self::AlreadyParticipant => "E1005",
            Self::ParticipantNotFound => "E1006",
            Self::OwnerMustTransfer => "E1007",
            Self::ParticipantMuted => "E1008",

            // Messages
            Self::MessageNotFound => "E2001",
            Self::EmptyMessage => "E2002",
            Self::NotMessageAuthor => "E2003",
            Self::MessageDeleted => "E2004",
            Self::InvalidReplyTarget => "E2005",
            Self::MediaNotAllowed => "E2006",

            // Moderation
            Self::ReportNotFound => "E3001",
            Self::DuplicateReport => "E3002",
            Self::ModeratorRequired => "E3003",
            Self::BlockedIpNotFound => "E3004",
            Self::IpBlocked => "E3005",

            // Users
            Self::UserNotFound => "E4001",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InternalError => ErrorCategory::Internal,
            Self::ValidationError | Self::EmptyMessage | Self::InvalidReplyTarget => ErrorCategory::Validation,
            Self::Unauthorized | Self::TokenExpired | Self::TokenInvalid => ErrorCategory::Unauthorized,
            Self::Forbidden | Self::NotRoomParticipant | Self::RoomAdminRequired
            | Self::RoomOwnerRequired | Self::ParticipantMuted | Self::NotMessageAuthor
            | Self::MediaNotAllowed | Self::ModeratorRequired | Self::IpBlocked => ErrorCategory::Forbidden,
            Self::Conflict | Self::AlreadyParticipant | Self::DuplicateReport => ErrorCategory::Conflict,
            Self::InvalidState | Self::OwnerMustTransfer | Self::MessageDeleted => ErrorCategory::InvalidState,
            Self::NotFound | Self::RoomNotFound | Self::ParticipantNotFound | Self::MessageNotFound
            | Self::ReportNotFound | Self::BlockedIpNotFound | Self::UserNotFound => ErrorCategory::NotFound,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.category().status_code()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    /// Validation failure pinned to a single request field.
    pub fn field(code: ErrorCode, field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut errors = serde_json::Map::new();
        errors.insert(field.to_string(), serde_json::json!([message.clone()]));
        Self::with_details(code, message, serde_json::Value::Object(errors))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// The specific code, when one is known.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            AppError::Known { code, .. } => Some(*code),
            AppError::Validation(_) => Some(ErrorCode::ValidationError),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Known { code, .. } => code.category(),
            AppError::Validation(_) => ErrorCategory::Validation,
            AppError::Internal(_) => ErrorCategory::Internal,
            AppError::Database(err) => match err {
                diesel::result::Error::NotFound => ErrorCategory::NotFound,
                diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    ErrorCategory::Conflict
                }
                _ => ErrorCategory::Internal,
            },
        }
    }
}

fn field_error_map(errors: &validator::ValidationErrors) -> serde_json::Value {
    let map: BTreeMap<&str, Vec<String>> = errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let messages = errs
                .iter()
                .map(|e| match &e.message {
                    Some(m) => m.to_string(),
                    None => format!("{field} is invalid ({})", e.code),
                })
                .collect();
            (field, messages)
        })
        .collect();
    serde_json::json!(map)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => {
                let status = code.status_code();
                let mut resp = ApiErrorResponse::new(code.code(), message);
                if let Some(d) = details {
                    resp = resp.with_errors(d.clone());
                }
                (status, resp)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("E0001", "internal server error"),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                match self.category() {
                    ErrorCategory::NotFound => (
                        StatusCode::NOT_FOUND,
                        ApiErrorResponse::new("E0003", "resource not found"),
                    ),
                    ErrorCategory::Conflict => (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        ApiErrorResponse::new("E0006", "resource already exists"),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ApiErrorResponse::new("E0001", "database error"),
                    ),
                }
            }
            AppError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiErrorResponse::new("E0002", "the given data was invalid")
                    .with_errors(field_error_map(errors)),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
