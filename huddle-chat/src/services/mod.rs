pub mod membership;
pub mod messages;
pub mod moderation;
pub mod presence;

use huddle_shared::{AppError, ErrorCategory, ErrorCode};

/// Turn a unique violation from the store into a domain-specific conflict.
pub(crate) fn on_conflict(code: ErrorCode, message: &'static str) -> impl Fn(AppError) -> AppError {
    move |err| {
        if err.category() == ErrorCategory::Conflict {
            AppError::new(code, message)
        } else {
            err
        }
    }
}
