use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-05-20";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("request to Gemini failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Gemini returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("unexpected response structure: {0}")]
    UnexpectedShape(Value),

    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),
}

impl GeminiError {
    /// True when the service answered successfully but the body had no reply text in it.
    pub fn is_parse_failure(&self) -> bool {
        matches!(self, GeminiError::UnexpectedShape(_))
    }
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl GeminiConfig {
    /// Defaults with the API key taken from `GEMINI_API_KEY`.
    ///
    /// A missing key is left empty so the hosting environment can inject it
    /// further down the line.
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn endpoint(&self) -> Result<Url, GeminiError> {
        let mut url = Url::parse(&format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        ))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: String,
}

/// The single outbound call the client makes. Swapped for a mock in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, url: &Url, body: &Value) -> Result<TransportResponse, reqwest::Error>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn post_json(&self, url: &Url, body: &Value) -> Result<TransportResponse, reqwest::Error> {
        (**self).post_json(url, body).await
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, GeminiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, url: &Url, body: &Value) -> Result<TransportResponse, reqwest::Error> {
        let response = self.client.post(url.clone()).json(body).send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(TransportResponse { status, body })
    }
}

pub struct GeminiClient {
    model: String,
    endpoint: Url,
    transport: Box<dyn Transport>,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, GeminiError> {
        let transport = HttpTransport::new(config.timeout)?;
        Self::with_transport(config, Box::new(transport))
    }

    pub fn with_transport(config: GeminiConfig, transport: Box<dyn Transport>) -> Result<Self, GeminiError> {
        let endpoint = config.endpoint()?;
        Ok(Self {
            model: config.model,
            endpoint,
            transport,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends `prompt` as a single user turn and returns the text of the first
    /// part of the first candidate.
    pub async fn generate_content(&self, prompt: &str) -> Result<String, GeminiError> {
        let request_body = serde_json::to_value(GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
        })?;

        // The endpoint carries the key, so only the model is logged.
        debug!(model = %self.model, "Sending request to Gemini API: {}", request_body);

        let response = self.transport.post_json(&self.endpoint, &request_body).await?;

        if !response.status.is_success() {
            return Err(GeminiError::Status {
                status: response.status,
                body: response.body,
            });
        }

        let response_json: Value = serde_json::from_str(&response.body)?;
        debug!("Received response from Gemini API: {}", response_json);

        extract_text(&response_json).ok_or(GeminiError::UnexpectedShape(response_json))
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

/// Text of the first part of the first candidate. Later candidates are never inspected.
fn extract_text(response: &Value) -> Option<String> {
    response
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .map(str::to_owned)
}
