//! Generic HTTP getter
//!
//! Fetches a configured source URL and turns the body into a [`Payload`],
//! so URL-backed sources can be cached without a dedicated client.

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use thiserror::Error;

use crate::responder::Payload;
use crate::sources::{SourceConfig, SourceFormat};

/// User agent sent with every upstream request
const USER_AGENT: &str = concat!("bffcache/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur when fetching a source over HTTP
#[derive(Debug, Error)]
pub enum HttpError {
    /// The source has no URL configured
    #[error("Source '{0}' has no url")]
    MissingUrl(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Upstream answered with a non-success status
    #[error("Upstream returned HTTP {0}")]
    Status(u16),

    /// Failed to parse JSON response
    #[error("Failed to parse JSON response: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Client for fetching configured sources
#[derive(Debug, Clone)]
pub struct HttpGetter {
    client: Client,
}

impl Default for HttpGetter {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpGetter {
    /// Create a new HttpGetter with default settings
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    /// Create an HttpGetter around an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Fetches `source.url` and interprets the body per `source.format`
    pub async fn fetch(&self, source: &SourceConfig) -> Result<Payload, HttpError> {
        let url = source
            .url
            .as_deref()
            .ok_or_else(|| HttpError::MissingUrl(source.key.clone()))?;

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        into_payload(source.format, content_type.as_deref(), body)
    }

    /// A `'static` getter closure for use with [`Cacher::fetch`](crate::cache::Cacher::fetch)
    pub fn getter(
        &self,
        source: &SourceConfig,
    ) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<Payload, HttpError>> + Send + 'static
    {
        let this = self.clone();
        let source = source.clone();
        move || Box::pin(async move { this.fetch(&source).await })
    }
}

/// Resolves `Auto` from the Content-Type header
fn resolve_format(format: SourceFormat, content_type: Option<&str>) -> SourceFormat {
    if format != SourceFormat::Auto {
        return format;
    }
    let Some(content_type) = content_type.map(str::to_ascii_lowercase) else {
        return SourceFormat::Text;
    };
    if content_type.contains("json") {
        SourceFormat::Json
    } else if content_type.contains("xml") {
        SourceFormat::Xml
    } else if content_type.contains("javascript") {
        SourceFormat::Script
    } else {
        SourceFormat::Text
    }
}

/// Converts a response body into a payload
fn into_payload(
    format: SourceFormat,
    content_type: Option<&str>,
    body: String,
) -> Result<Payload, HttpError> {
    Ok(match resolve_format(format, content_type) {
        SourceFormat::Json => Payload::Json(serde_json::from_str(&body)?),
        SourceFormat::Xml => Payload::Xml(body),
        SourceFormat::Script => Payload::Script(body),
        SourceFormat::Text | SourceFormat::Auto => Payload::Text(body),
    })
}
