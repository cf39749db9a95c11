//! HTTP client for the build executor v1 API.

use color_eyre::{Result, eyre::Context};
use reqwest::StatusCode;
use tracing::instrument;
use url::Url;

use super::{BuildReport, BuildRequest};

/// Client for the build executor API.
///
/// The executor exposes a single long-running call: submit a build and
/// block until it completes. The HTTP client deliberately sets no request
/// timeout of its own; callers bound the build with
/// [`BuildRequest::timeout_seconds`] instead.
#[derive(Clone, Debug)]
pub struct Client {
    base: Url,
    http: reqwest::Client,
}

impl Client {
    /// Create a new client with the given base URL.
    pub fn new(base: impl Into<Url>) -> Self {
        Self {
            base: base.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Check if the executor is reachable.
    #[instrument(skip(self))]
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}api/v1/health", self.base);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("send GET request")?;
        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(color_eyre::eyre::eyre!(
                "unexpected status code from ping: {status}"
            )),
        }
    }

    /// Submit a build and block until the executor reports a result.
    #[instrument(skip(self, request), fields(build_id = %request.build_id))]
    pub async fn run_build(&self, request: &BuildRequest) -> Result<BuildReport> {
        let url = format!("{}api/v1/builds", self.base);
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .context("send POST request")?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                let report = response
                    .json::<BuildReport>()
                    .await
                    .context("parse JSON response")?;
                Ok(report)
            }
            status => {
                let error_body = response.text().await.unwrap_or_default();
                Err(color_eyre::eyre::eyre!(
                    "unexpected status code from run_build: {status}\n{error_body}"
                ))
            }
        }
    }
}
