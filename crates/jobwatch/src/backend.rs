//! HTTP client for the download service.
//!
//! One-shot requests (submit, poll, cancel) are bounded by the configured
//! request timeout.  Streams are opened without one; their end is detected
//! by the reader.

use jobwatch_proto::config::BackendConfig;
use jobwatch_proto::protocol::{CancelReply, JobRequest, PollStatus, SubmitReply};
use reqwest::{header, Client, Response, Url};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base: Url,
    timeout: Duration,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| Error::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(config.base_url.clone()));
        }
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            base,
            timeout: config.request_timeout(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Submit a job; returns the id the backend assigned to it.
    pub async fn submit(&self, request: &JobRequest) -> Result<String> {
        let url = self.endpoint(&["api", "jobs"]);
        debug!(%url, service = %request.service, kind = %request.kind, "submitting job");
        let response = self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await?;

        // A refusal comes back as `{error}`, often with a 4xx status.
        let status = response.status();
        let body = response.bytes().await?;
        match serde_json::from_slice::<SubmitReply>(&body) {
            Ok(reply) => reply.into_result().map_err(Error::Rejected),
            Err(_) if !status.is_success() => Err(Error::Status(status)),
            Err(e) => Err(Error::Malformed(e)),
        }
    }

    pub async fn poll(&self, job_id: &str) -> Result<PollStatus> {
        let url = self.endpoint(&["api", "jobs", job_id]);
        let response = self.http.get(url).timeout(self.timeout).send().await?;
        let response = check(response)?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn cancel_all(&self) -> Result<CancelReply> {
        let url = self.endpoint(&["api", "cancel-downloads"]);
        let response = self.http.post(url).timeout(self.timeout).send().await?;
        let response = check(response)?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// The global status stream.
    pub async fn open_status_stream(&self) -> Result<Response> {
        self.open_stream(self.endpoint(&["api", "status"])).await
    }

    /// The push stream of one job.
    pub async fn open_job_stream(&self, job_id: &str) -> Result<Response> {
        self.open_stream(self.endpoint(&["api", "jobs", job_id, "events"]))
            .await
    }

    /// Where the artifact stored as `filename` can be fetched.
    pub fn artifact_url(&self, filename: &str) -> String {
        self.endpoint(&["api", "download", filename]).to_string()
    }

    async fn open_stream(&self, url: Url) -> Result<Response> {
        debug!(%url, "opening event stream");
        let response = self
            .http
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        check(response)
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::Status(status))
    }
}
