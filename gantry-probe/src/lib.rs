//! Gantry Readiness Probe
//!
//! A small HTTP client that asks a component's health endpoint whether it is
//! alive. Long-running services are only considered passing once this probe
//! gets a successful answer, which separates "still starting or hung" from
//! "running and serving".
//!
//! # Example
//!
//! ```no_run
//! use gantry_probe::HealthProbe;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> gantry_probe::Result<()> {
//!     let probe = HealthProbe::new(Duration::from_secs(2))?;
//!     let status = probe.check("http://127.0.0.1:4000/health").await?;
//!     println!("healthy: {}", status.healthy);
//!     Ok(())
//! }
//! ```

pub mod error;

pub use error::{ProbeError, Result};

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Answer from a health endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    /// HTTP status code returned
    pub status_code: u16,
    /// Whether the status code was 2xx
    pub healthy: bool,
    /// `status` field of a JSON body, when the endpoint returns one
    pub reported: Option<String>,
    /// Raw response body
    pub body: String,
}

#[derive(Deserialize)]
struct HealthBody {
    status: String,
}

/// HTTP readiness probe
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: Client,
}

impl HealthProbe {
    /// Create a probe whose individual requests give up after `request_timeout`
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Build the URL for a health endpoint on `host:port`
    pub fn endpoint_url(host: &str, port: u16, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://{}:{}/{}", host, port, path)
    }

    /// Issue a single GET against `url`
    ///
    /// Any HTTP answer is returned as a `HealthStatus`; transport errors
    /// (refused, reset, timed out) are returned as `ProbeError`.
    pub async fn check(&self, url: &str) -> Result<HealthStatus> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ProbeError::InvalidEndpoint(url.to_string()));
        }

        let response = self.client.get(url).send().await?;
        self.handle_response(response).await
    }

    async fn handle_response(&self, response: reqwest::Response) -> Result<HealthStatus> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let reported = serde_json::from_str::<HealthBody>(&body)
            .ok()
            .map(|b| b.status);

        debug!(
            "Health endpoint answered {} (reported: {:?})",
            status.as_u16(),
            reported
        );

        Ok(HealthStatus {
            status_code: status.as_u16(),
            healthy: status.is_success(),
            reported,
            body,
        })
    }
}
