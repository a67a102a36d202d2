use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use objectql_core::{Error, ErrorCode};

/// Wraps the workspace error for axum handlers: every failure becomes
/// `{ "error": { code, message, details? } }` with the matching HTTP
/// status. Stack traces never reach the wire.
pub struct ApiError(pub Error);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation
        | ErrorCode::InvalidRegex
        | ErrorCode::InvalidStateTransition
        | ErrorCode::InvalidDateRange => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::DriverUnsupportedOperation => StatusCode::NOT_IMPLEMENTED,
        ErrorCode::DriverConnectionFailed => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::DriverQueryFailed | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (status_for(self.0.code), Json(self.0.to_body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn error_body_and_status() {
        let resp = ApiError(Error::not_found("object 'x' not found")).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["message"], "object 'x' not found");
    }

    #[test]
    fn taxonomy_maps_to_http_statuses() {
        assert_eq!(status_for(ErrorCode::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCode::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorCode::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorCode::Conflict), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorCode::RateLimitExceeded), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(ErrorCode::DriverConnectionFailed), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorCode::Internal), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
