use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::error;

use leadpilot_common::LeadPilotError;
use leadpilot_scout::ReplyError;
use leadpilot_store::StoreError;
use reddit_client::RedditError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("not signed in")]
    Unauthorized,

    #[error("{0}")]
    PaymentRequired(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    TooManyRequests(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Internal(ref e) => {
                error!(error = %e, "Request failed");
                "internal error".to_string()
            }
            ref other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.into())
    }
}

impl From<LeadPilotError> for ApiError {
    fn from(err: LeadPilotError) -> Self {
        match err {
            LeadPilotError::Validation(msg) => ApiError::BadRequest(msg),
            LeadPilotError::PlanLimit(msg) => ApiError::PaymentRequired(msg),
            LeadPilotError::NotFound(_) => ApiError::NotFound("resource"),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<ReplyError> for ApiError {
    fn from(err: ReplyError) -> Self {
        match err {
            ReplyError::NotLinked => {
                ApiError::BadRequest("no Reddit account linked, sign in again".to_string())
            }
            ReplyError::Reddit(RedditError::RateLimited { .. }) => {
                ApiError::TooManyRequests("Reddit is rate limiting this account, try again later".to_string())
            }
            ReplyError::Reddit(RedditError::Auth(_)) => ApiError::Unauthorized,
            ReplyError::Reddit(e @ RedditError::Rejected(_)) => ApiError::BadRequest(e.to_string()),
            ReplyError::Reddit(e) => ApiError::Internal(e.into()),
            ReplyError::Store(e) => ApiError::Internal(e),
        }
    }
}
