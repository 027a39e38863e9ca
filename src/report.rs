//! Outbound attention reports.

use std::time::Duration;

use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use attentrs_vision::Verdict;

use crate::session::{AuthContext, ClassId};

pub const ATTENTION_PATH: &str = "/api/v1/conference/attention";

/// Body of `POST /api/v1/conference/attention`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionReport {
    pub class_id: ClassId,
    pub attention: bool,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("attention service returned {0}")]
    Status(reqwest::StatusCode),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Which verdicts get sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportPolicy {
    /// Every processed frame produces one report.
    #[default]
    EveryFrame,
    /// Only frames whose head pose was solved are reported.
    SolvedOnly,
}

impl ReportPolicy {
    pub fn should_report(self, verdict: &Verdict) -> bool {
        match self {
            ReportPolicy::EveryFrame => true,
            ReportPolicy::SolvedOnly => verdict.is_solved(),
        }
    }
}

/// Destination for per-frame verdicts.
#[allow(async_fn_in_trait)]
pub trait ReportSink {
    async fn report(&self, auth: &AuthContext, report: &AttentionReport) -> Result<(), ReportError>;
}

/// Join the API origin and an endpoint path.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Posts reports to the conference API.
pub struct HttpReporter {
    http: Client,
    url: String,
}

impl HttpReporter {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ReportError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: endpoint(base_url, ATTENTION_PATH),
        })
    }
}

impl ReportSink for HttpReporter {
    async fn report(&self, auth: &AuthContext, report: &AttentionReport) -> Result<(), ReportError> {
        log::debug!("POST {} attention={}", self.url, report.attention);
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&auth.token)
            .header(header::ACCEPT, "application/json")
            .json(report)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::Status(status));
        }
        Ok(())
    }
}
