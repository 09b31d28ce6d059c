//! Rejection responses for the session middleware.
//!
//! Bodies are deliberately generic: the reason a request was refused is only
//! recorded in the security audit trail, never returned to the client.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::authority::Admission;

/// Why the middleware refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityRejection {
    Unauthorized,
    Throttled { retry_after: Duration },
    Unavailable,
}

impl AuthorityRejection {
    /// `None` for [`Admission::Granted`].
    pub fn from_admission(admission: Admission) -> Option<Self> {
        match admission {
            Admission::Granted(_) => None,
            Admission::Throttled { retry_after } => Some(Self::Throttled { retry_after }),
            Admission::Unauthorized => Some(Self::Unauthorized),
            Admission::Unavailable => Some(Self::Unavailable),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Throttled { .. } => "too many requests",
            Self::Unavailable => "internal server error",
        }
    }
}

impl IntoResponse for AuthorityRejection {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        match self {
            Self::Unauthorized => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer realm=\"gatehouse\""),
                );
            }
            Self::Throttled { retry_after } => {
                let secs = retry_after.as_secs().max(1);
                headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
            }
            Self::Unavailable => {}
        }

        let body = json!({ "error": self.message() });
        (self.status(), headers, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_unauthorized_response() {
        let response = AuthorityRejection::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let www_auth = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(www_auth.starts_with("Bearer"));
        assert_eq!(body_json(response).await, json!({ "error": "unauthorized" }));
    }

    #[tokio::test]
    async fn test_throttled_response_has_retry_after() {
        let response = AuthorityRejection::Throttled {
            retry_after: Duration::from_secs(60),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "60");
        assert_eq!(
            body_json(response).await,
            json!({ "error": "too many requests" })
        );
    }

    #[tokio::test]
    async fn test_sub_second_retry_after_rounds_up() {
        let response = AuthorityRejection::Throttled {
            retry_after: Duration::from_millis(200),
        }
        .into_response();
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    }

    #[tokio::test]
    async fn test_unavailable_response_is_generic() {
        let response = AuthorityRejection::Unavailable.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.headers().contains_key(header::WWW_AUTHENTICATE));
        assert_eq!(
            body_json(response).await,
            json!({ "error": "internal server error" })
        );
    }

    #[test]
    fn test_from_admission() {
        assert_eq!(AuthorityRejection::from_admission(Admission::Granted(None)), None);
        assert_eq!(
            AuthorityRejection::from_admission(Admission::Unauthorized),
            Some(AuthorityRejection::Unauthorized)
        );
    }
}
