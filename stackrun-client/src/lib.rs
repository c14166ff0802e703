//! stackrun HTTP Client
//!
//! A small, typed HTTP client for the stackrun orchestrator API, shared by the
//! CLI and anything else that wants to drive deployments.
//!
//! # Example
//!
//! ```no_run
//! use stackrun_client::OrchestratorClient;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let run = client.deploy(Uuid::new_v4()).await?;
//!     let mut frames = client.follow_run(run.id, None);
//!     while let Some(frame) = frames.next().await? {
//!         println!("{}", frame.content);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod credentials;
mod resources;
mod runs;
mod sse;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use runs::FrameStream;

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the stackrun orchestrator API
///
/// Methods are grouped by endpoint family:
/// - Cloud resources (store, get)
/// - Credentials (store, list)
/// - Runs (deploy, get, list, delete logs)
/// - Run output streaming with resume
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the orchestrator API (e.g., "http://localhost:8080")
    ///
    /// # Example
    /// ```
    /// use stackrun_client::OrchestratorClient;
    ///
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the orchestrator API
    /// * `client` - A configured reqwest Client
    ///
    /// # Example
    /// ```
    /// use stackrun_client::OrchestratorClient;
    /// use reqwest::Client;
    /// use std::time::Duration;
    ///
    /// let http_client = Client::builder()
    ///     .timeout(Duration::from_secs(30))
    ///     .build()
    ///     .unwrap();
    ///
    /// let client = OrchestratorClient::with_client("http://localhost:8080", http_client);
    /// ```
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL of an API path
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    ///
    /// This method checks the status code and returns an appropriate error if
    /// the request failed, or deserializes the response body if successful.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Turn a non-success response into an [`ClientError::ApiError`]
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(response)
    }
}
