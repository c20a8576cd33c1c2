//! JSON over HTTPS
//!
//! One GET, one decoded body. Transport failures and payload failures are
//! kept apart so callers can tell "the network is down" from "the server sent
//! garbage".

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::HttpConfig;

#[cfg(test)]
use mockall::automock;

/// HTTP fetch errors
#[derive(Debug, Error)]
pub enum HttpError {
    /// Connection-level failure; carries the transport message verbatim
    #[error("{0}")]
    Transport(String),
    /// The server answered with a non-success status
    #[error("Request to {url} failed with status {status}")]
    Status { url: String, status: u16 },
    /// The body was not valid JSON
    #[error("Failed to parse JSON response: {0}")]
    MalformedJson(String),
    /// The client itself could not be built
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl HttpError {
    /// True for errors that happened before a usable response arrived
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Status { .. })
    }
}

/// Fetches a URL and decodes the body as JSON
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JsonFetcher: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value, HttpError>;
}

/// [`JsonFetcher`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HttpError::Client(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl JsonFetcher for HttpClient {
    async fn get_json(&self, url: &str) -> Result<Value, HttpError> {
        log::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status { url: url.to_owned(), status: status.as_u16() });
        }

        let body = response
            .text()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| HttpError::MalformedJson(e.to_string()))
    }
}
