use chrono::{DateTime, Utc};
use thiserror::Error;

/// Outcome taxonomy shared by every service. Handlers branch on the
/// variant to render a user-facing message; storage failures carry the
/// underlying sqlx error for the logs.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("already used")]
    AlreadyUsed,

    #[error("{resource} limit reached: {limit} per {resets}, {remaining} remaining")]
    Exhausted {
        resource: &'static str,
        limit: i64,
        remaining: i64,
        resets: &'static str,
    },

    #[error("self-referral is not allowed")]
    SelfReferral,

    #[error("{0}")]
    InvalidInput(String),

    #[error("rate limited until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("provider error: {0}")]
    Provider(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
