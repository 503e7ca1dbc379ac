//! HTTP client for the proctoring backend
//!
//! | Method | Path (relative to `api_base`) | Operation |
//! |--------|-------------------------------|-----------|
//! | GET    | `config/lock`                 | Lock policy document |
//! | GET    | `exams/{exam_id}`             | Exam document (per-exam allow list) |
//! | POST   | `alerts`                      | Report a violation |

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::constants::{ALERTS_PATH, EXAMS_PATH, LOCK_CONFIG_PATH};
use crate::models::AlertRecord;

/// Maximum number of response body bytes kept in error messages
const MAX_ERROR_BODY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("invalid API base URL {url}: {reason}")]
    BaseUrl { url: String, reason: String },
    #[error("cannot build endpoint {path}: {source}")]
    Endpoint {
        path: String,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP client initialization failed: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("invalid response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
}

/// Remote source of the lock policy and per-exam allow lists
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Fetch the raw lock configuration document
    async fn fetch_lock_config(&self, token: Option<&str>) -> Result<Value, RemoteError>;

    /// Fetch the exam document (or bare allow list) for an exam id
    async fn fetch_exam(&self, exam_id: i64, token: Option<&str>) -> Result<Value, RemoteError>;
}

/// Remote collector for violation alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_alert(&self, alert: &AlertRecord, token: Option<&str>) -> Result<(), RemoteError>;
}

/// reqwest-backed client for the backend API
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    /// Create a client for `api_base` with a per-request timeout
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self, RemoteError> {
        // Url::join replaces the last segment unless the base ends with '/'
        let normalized = if api_base.ends_with('/') {
            api_base.to_string()
        } else {
            format!("{}/", api_base)
        };
        let base = Url::parse(&normalized).map_err(|e| RemoteError::BaseUrl {
            url: api_base.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::BaseUrl {
                url: api_base.to_string(),
                reason: "URL cannot be used as a base".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("examlock/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(RemoteError::Client)?;

        Ok(Self { http, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base.join(path).map_err(|source| RemoteError::Endpoint {
            path: path.to_string(),
            source,
        })
    }

    fn with_token(request: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check_status(endpoint: &Url, response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(RemoteError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json(&self, url: Url, token: Option<&str>) -> Result<Value, RemoteError> {
        let response = Self::with_token(self.http.get(url.clone()), token)
            .send()
            .await
            .map_err(|source| RemoteError::Http {
                endpoint: url.to_string(),
                source,
            })?;
        let response = Self::check_status(&url, response).await?;
        response.json::<Value>().await.map_err(|e| RemoteError::Decode {
            endpoint: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl PolicySource for ApiClient {
    async fn fetch_lock_config(&self, token: Option<&str>) -> Result<Value, RemoteError> {
        let url = self.endpoint(LOCK_CONFIG_PATH)?;
        self.get_json(url, token).await
    }

    async fn fetch_exam(&self, exam_id: i64, token: Option<&str>) -> Result<Value, RemoteError> {
        let url = self.endpoint(&format!("{}/{}", EXAMS_PATH, exam_id))?;
        self.get_json(url, token).await
    }
}

#[async_trait]
impl AlertSink for ApiClient {
    async fn send_alert(&self, alert: &AlertRecord, token: Option<&str>) -> Result<(), RemoteError> {
        let url = self.endpoint(ALERTS_PATH)?;
        let response = Self::with_token(self.http.post(url.clone()), token)
            .json(alert)
            .send()
            .await
            .map_err(|source| RemoteError::Http {
                endpoint: url.to_string(),
                source,
            })?;
        Self::check_status(&url, response).await?;
        Ok(())
    }
}
