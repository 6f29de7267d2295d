//! HTTP-level errors.
//!
//! Logical operation failures travel inside a 200 response as
//! `{"success": false, ...}`. Only the cases below change the status code;
//! each renders as `{"error": "<message>"}`.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found")]
    NotFound,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::NotFound => StatusCode::NOT_FOUND,
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn test_error_body_shape() {
        let cases = [
            (ProxyError::Unauthorized, 401, "Unauthorized"),
            (ProxyError::NotFound, 404, "Not found"),
            (ProxyError::MethodNotAllowed, 405, "Method not allowed"),
            (ProxyError::Internal("boom".to_string()), 500, "boom"),
        ];

        for (err, status, message) in cases {
            let response = err.error_response();
            assert_eq!(response.status().as_u16(), status);
            let body = to_bytes(response.into_body()).await.unwrap();
            let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(value, json!({ "error": message }));
        }
    }
}
