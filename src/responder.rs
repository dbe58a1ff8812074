//! Translation of cache results into transport responses
//!
//! Route handlers hand the result of [`Cacher::fetch`](crate::cache::Cacher::fetch)
//! to [`respond`], which produces a status, content type and body. Errors are
//! rendered as a JSON object with a `message` field.

use serde::{Deserialize, Serialize};

use crate::cache::CacheError;

/// Content type used for JSON bodies, including error bodies
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A cached upstream payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured data sent as JSON
    Json(serde_json::Value),
    /// Feeds and sitemaps
    Xml(String),
    /// Scripts served to the browser
    Script(String),
    /// Anything else
    Text(String),
}

impl Payload {
    /// The content type the payload should be sent with
    pub fn content_type(&self) -> &'static str {
        match self {
            Payload::Json(_) => JSON_CONTENT_TYPE,
            Payload::Xml(_) => "application/xml",
            Payload::Script(_) => "text/javascript",
            Payload::Text(_) => "text/plain; charset=utf-8",
        }
    }

    /// Serializes the payload into a response body
    pub fn into_body(self) -> String {
        match self {
            Payload::Json(value) => value.to_string(),
            Payload::Xml(body) | Payload::Script(body) | Payload::Text(body) => body,
        }
    }

    /// Body size in bytes once serialized
    pub fn len(&self) -> usize {
        match self {
            Payload::Json(value) => value.to_string().len(),
            Payload::Xml(body) | Payload::Script(body) | Payload::Text(body) => body.len(),
        }
    }

    /// Whether the serialized body is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Body sent for failed requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable description of the failure
    pub message: String,
}

/// A transport-neutral response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Value of the Content-Type header
    pub content_type: &'static str,
    /// Serialized body
    pub body: String,
}

impl Response {
    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Status code an error is reported with
pub fn error_status(err: &CacheError) -> u16 {
    match err {
        CacheError::InvalidKey(_) | CacheError::InvalidPolicy(_) => 400,
        CacheError::UpstreamFetch { .. } => 502,
        CacheError::Timeout { .. } => 504,
        CacheError::Config(_) => 500,
    }
}

/// Builds an error response with a JSON `message` body
pub fn error_response(status: u16, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        message: message.into(),
    };
    Response {
        status,
        content_type: JSON_CONTENT_TYPE,
        // a struct with a single string field always serializes
        body: serde_json::to_string(&body).unwrap_or_else(|_| String::from("{}")),
    }
}

/// Converts the result of a cache lookup into a response
pub fn respond(result: Result<Payload, CacheError>) -> Response {
    match result {
        Ok(payload) => Response {
            status: 200,
            content_type: payload.content_type(),
            body: payload.into_body(),
        },
        Err(err) => error_response(error_status(&err), err.to_string()),
    }
}
