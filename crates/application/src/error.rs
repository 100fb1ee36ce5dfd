use domain::{RateLimitDecision, ValidationResult};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("message rejected: {}", .0.errors.join("; "))]
    Rejected(Box<ValidationResult>),
    #[error("rate limited: {}", .0.reason.as_deref().unwrap_or("limit reached"))]
    RateLimited(Box<RateLimitDecision>),
}

impl ApplicationError {
    pub fn rejected(result: ValidationResult) -> Self {
        ApplicationError::Rejected(Box::new(result))
    }

    pub fn rate_limited(decision: RateLimitDecision) -> Self {
        ApplicationError::RateLimited(Box::new(decision))
    }
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;
