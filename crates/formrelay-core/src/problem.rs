//! RFC 7807 problem-details responses for the HTTP intake.

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;

/// Problem body returned to intake callers
#[derive(Debug, Clone, Serialize)]
pub struct ProblemDetails {
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

/// A problem response: status code plus body
#[derive(Debug, Clone)]
pub struct Problem {
    pub status_code: StatusCode,
    pub body: ProblemDetails,
}

impl Problem {
    pub fn new(status_code: StatusCode, title: impl Into<String>) -> Self {
        Self {
            status_code,
            body: ProblemDetails {
                title: title.into(),
                status: status_code.as_u16(),
                detail: None,
                extensions: BTreeMap::new(),
            },
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.body.detail = Some(detail.into());
        self
    }

    /// Attach an extra member; values that fail to serialize are dropped
    pub fn with_value<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.body.extensions.insert(key.to_string(), value);
        }
        self
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let mut response = (self.status_code, Json(self.body)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}
