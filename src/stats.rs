//! Companion read endpoint: class-wide attention percentage.

use std::time::Duration;

use reqwest::{header, Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::report::ATTENTION_PATH;
use crate::session::AuthContext;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttentionStats {
    /// Percentage of attentive reports for the class.
    pub attention: f64,
}

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("attention service returned {0}")]
    Status(reqwest::StatusCode),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid API base URL {0}")]
    BaseUrl(String),
}

pub struct StatsClient {
    http: Client,
    /// `{base}/api/v1/conference/attention`; the class id is appended per request.
    endpoint: Url,
}

impl StatsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StatsError> {
        let invalid = || StatsError::BaseUrl(base_url.to_string());
        let mut endpoint = Url::parse(base_url).map_err(|_| invalid())?;
        endpoint
            .path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(ATTENTION_PATH.split('/').filter(|s| !s.is_empty()));

        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, endpoint })
    }

    pub async fn fetch(&self, auth: &AuthContext) -> Result<AttentionStats, StatsError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StatsError::BaseUrl(self.endpoint.to_string()))?
            .push(&auth.class_id.to_string());
        log::debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .bearer_auth(&auth.token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StatsError::Status(status));
        }
        Ok(response.json().await?)
    }
}
