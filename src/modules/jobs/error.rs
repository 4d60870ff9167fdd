use axum::http::StatusCode;
use thiserror::Error;

use crate::common::response::ApiError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    InvalidInput(String),
    #[error("Monthly quota exceeded for {plan} plan. Please upgrade!")]
    QuotaExceeded { plan: &'static str },
    #[error("{0}")]
    InvalidState(&'static str),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl JobError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::InvalidInput(_) | JobError::InvalidState(_) => StatusCode::BAD_REQUEST,
            JobError::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
            JobError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        let status = err.status_code();
        let message = match &err {
            // Storage and broker details stay in the logs.
            JobError::Internal(e) => {
                tracing::error!("Job request failed: {:#}", e);
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };
        ApiError(message, status)
    }
}
