//! Upstream facility list sources.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::FetchError;

const USER_AGENT: &str = "noswim/0.1 (no-swim zone pipeline)";

/// Yields the raw facility payload for one run.
#[async_trait]
pub trait FacilitySource: Send + Sync {
    /// Where the payload comes from, for logs and reports.
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<Value, FetchError>;
}

/// Fetches the facility list over HTTP.
pub struct HttpFacilitySource {
    client: Client,
    url: String,
}

impl HttpFacilitySource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let url = url.into();
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|source| FetchError::Request {
                url: url.clone(),
                source,
            })?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl FacilitySource for HttpFacilitySource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> Result<Value, FetchError> {
        info!("Fetching facility data from {}", self.url);

        let request_err = |source| FetchError::Request {
            url: self.url.clone(),
            source,
        };

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(request_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(request_err)?;
        debug!("Received {} bytes", bytes.len());
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Reads the facility list from a local JSON file.
pub struct FileFacilitySource {
    path: PathBuf,
}

impl FileFacilitySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FacilitySource for FileFacilitySource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<Value, FetchError> {
        info!("Reading facility data from {}", self.path.display());
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Serves a fixed payload. Useful for replays.
pub struct StaticFacilitySource {
    payload: Value,
}

impl StaticFacilitySource {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }
}

#[async_trait]
impl FacilitySource for StaticFacilitySource {
    fn describe(&self) -> String {
        "static payload".to_string()
    }

    async fn fetch(&self) -> Result<Value, FetchError> {
        Ok(self.payload.clone())
    }
}
