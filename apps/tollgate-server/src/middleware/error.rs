//! Error handling middleware - RFC 7807 compliant responses.

use std::fmt;
use std::time::Duration;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use tollgate_core::TollgateError;
use tollgate_shared::ErrorResponse;

/// Application-level error type that converts to RFC 7807 responses.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    TooManyRequests { detail: String, retry_after: Duration },
    Unavailable(String),
    Upstream(String),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::TooManyRequests { detail, .. } => write!(f, "Too many requests: {}", detail),
            AppError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Whole seconds for a `Retry-After` header, never rounding a wait down to 0.
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs();
    if wait.subsec_nanos() > 0 { secs + 1 } else { secs }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error = match self {
            AppError::BadRequest(detail) => ErrorResponse::bad_request(detail),
            AppError::TooManyRequests { detail, .. } => ErrorResponse::too_many_requests(detail),
            AppError::Unavailable(detail) => {
                tracing::warn!("Service unavailable: {}", detail);
                ErrorResponse::service_unavailable(detail)
            }
            AppError::Upstream(detail) => ErrorResponse::bad_gateway(detail),
            AppError::Internal(detail) => {
                // Log internal errors
                tracing::error!("Internal error: {}", detail);
                ErrorResponse::internal_error()
            }
        };

        let mut response = HttpResponse::build(self.status_code());
        if let AppError::TooManyRequests { retry_after, .. } = self {
            response.insert_header(("Retry-After", retry_after_secs(*retry_after).to_string()));
        }
        response.json(error)
    }
}

// Conversion from the crate-level taxonomy
impl From<TollgateError> for AppError {
    fn from(err: TollgateError) -> Self {
        match err {
            TollgateError::TransientBackingStore(msg) => AppError::Unavailable(msg),
            TollgateError::SubscriptionExhausted { .. } => AppError::Unavailable(err.to_string()),
            TollgateError::Loader(e) => AppError::Upstream(e.to_string()),
            TollgateError::Configuration(msg) => AppError::Internal(msg),
        }
    }
}

/// Result type alias for handlers.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use tollgate_core::LoaderError;

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
        assert_eq!(retry_after_secs(Duration::from_millis(3_001)), 4);
        assert_eq!(retry_after_secs(Duration::from_millis(200)), 1);
    }

    #[test]
    fn test_taxonomy_maps_to_status() {
        let cases = [
            (
                TollgateError::TransientBackingStore("db down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                TollgateError::SubscriptionExhausted { attempts: 10 },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                TollgateError::Loader(LoaderError::msg("boom")),
                StatusCode::BAD_GATEWAY,
            ),
            (
                TollgateError::config("bad"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }

    #[actix_web::test]
    async fn test_too_many_requests_sets_retry_after() {
        let err = AppError::TooManyRequests {
            detail: "slow down".into(),
            retry_after: Duration::from_millis(1_500),
        };
        let response = err.error_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "2");

        let body = to_bytes(response.into_body()).await.unwrap();
        let problem: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(problem["status"], 429);
        assert_eq!(problem["detail"], "slow down");
    }
}
