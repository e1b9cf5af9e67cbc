//! HTTP client for the ship wire protocol.
//!
//! Speaks to the service running inside a ship container: readiness probe,
//! exec dispatch, file transfer, and log tailing. Every forwarded call
//! carries the session correlation (`X-SESSION-ID`) and the shared bearer
//! token; ships sit on the same trust boundary as Bay's own surface.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::error::{BayError, BayResult};

use super::models::{ExecRequest, UploadFileResponse};

const SESSION_HEADER: &str = "X-SESSION-ID";
const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_LOG_TAIL: u32 = 10_000;

/// Raw result from a ship's `/exec` endpoint.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ShipExecResult {
    pub success: bool,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ShipClient {
    http: reqwest::Client,
    bearer: String,
    probe_timeout: Duration,
    probe_interval: Duration,
    exec_timeout: Duration,
}

impl ShipClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            bearer: format!("Bearer {}", settings.access_token),
            probe_timeout: Duration::from_secs(settings.ship_health_check_timeout),
            probe_interval: Duration::from_secs(settings.ship_health_check_interval),
            exec_timeout: settings.exec_timeout(),
        }
    }

    /// Poll `GET /health` until a 2xx or the probe deadline.
    ///
    /// Transport errors and non-2xx statuses are treated the same way and
    /// retried at a fixed interval; a ship that cannot answer in time is
    /// not ready.
    pub async fn wait_for_ready(&self, endpoint: &str) -> bool {
        let url = format!("http://{endpoint}/health");
        let deadline = tokio::time::Instant::now() + self.probe_timeout;

        debug!(endpoint, "starting readiness probe");
        loop {
            match self
                .http
                .get(&url)
                .timeout(PROBE_REQUEST_TIMEOUT)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    info!(endpoint, "ship is ready");
                    return true;
                }
                Ok(resp) => debug!(endpoint, status = %resp.status(), "ship not ready yet"),
                Err(e) => debug!(endpoint, error = %e, "readiness probe failed"),
            }

            if tokio::time::Instant::now() + self.probe_interval > deadline {
                error!(
                    endpoint,
                    timeout = self.probe_timeout.as_secs(),
                    "ship failed to become ready"
                );
                return false;
            }
            tokio::time::sleep(self.probe_interval).await;
        }
    }

    /// Forward a tagged exec operation.
    pub async fn exec(
        &self,
        endpoint: &str,
        request: &ExecRequest,
        session_id: &str,
    ) -> ShipExecResult {
        let url = format!("http://{endpoint}/exec");
        let result = self
            .http
            .post(&url)
            .timeout(self.exec_timeout)
            .header(AUTHORIZATION, self.bearer.as_str())
            .header(SESSION_HEADER, session_id)
            .json(request)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<ShipExecResult>().await {
                Ok(result) => result,
                Err(e) => ShipExecResult {
                    success: false,
                    data: None,
                    error: Some(format!("invalid ship response: {e}")),
                },
            },
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                ShipExecResult {
                    success: false,
                    data: None,
                    error: Some(format!("ship returned {status}: {body}")),
                }
            }
            Err(e) if e.is_timeout() => ShipExecResult {
                success: false,
                data: None,
                error: Some("request timeout".to_string()),
            },
            Err(e) => ShipExecResult {
                success: false,
                data: None,
                error: Some(format!("connection error: {e}")),
            },
        }
    }

    /// Multipart upload to a destination path inside the ship.
    pub async fn upload(
        &self,
        endpoint: &str,
        content: Vec<u8>,
        file_path: &str,
        session_id: &str,
    ) -> UploadFileResponse {
        let url = format!("http://{endpoint}/upload");
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(content)
                    .file_name("upload")
                    .mime_str("application/octet-stream")
                    .expect("static mime type is valid"),
            )
            .text("file_path", file_path.to_string());

        let result = self
            .http
            .post(&url)
            .timeout(TRANSFER_TIMEOUT)
            .header(AUTHORIZATION, self.bearer.as_str())
            .header(SESSION_HEADER, session_id)
            .multipart(form)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                let file_path = resp
                    .json::<serde_json::Value>()
                    .await
                    .ok()
                    .and_then(|v| v.get("file_path").and_then(|p| p.as_str()).map(String::from));
                UploadFileResponse {
                    success: true,
                    message: "File uploaded successfully".to_string(),
                    file_path,
                    error: None,
                }
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                UploadFileResponse {
                    success: false,
                    message: "File upload failed".to_string(),
                    file_path: None,
                    error: Some(format!("ship returned {status}: {body}")),
                }
            }
            Err(e) => UploadFileResponse {
                success: false,
                message: "File upload failed".to_string(),
                file_path: None,
                error: Some(format!("connection error: {e}")),
            },
        }
    }

    /// Download a file; propagates the ship's HTTP status.
    pub async fn download(
        &self,
        endpoint: &str,
        file_path: &str,
        session_id: &str,
    ) -> BayResult<Vec<u8>> {
        let url = format!("http://{endpoint}/download");
        let resp = self
            .http
            .get(&url)
            .timeout(TRANSFER_TIMEOUT)
            .header(AUTHORIZATION, self.bearer.as_str())
            .header(SESSION_HEADER, session_id)
            .query(&[("file_path", file_path)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BayError::BackendTimeout("file download timeout".to_string())
                } else {
                    BayError::unready(format!("connection error: {e}"))
                }
            })?;

        match resp.status() {
            status if status.is_success() => {
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| BayError::unready(format!("reading download body: {e}")))?;
                Ok(bytes.to_vec())
            }
            StatusCode::NOT_FOUND => Err(BayError::not_found(format!(
                "file not found: {file_path}"
            ))),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(BayError::invalid(format!("ship returned {status}: {body}")))
            }
        }
    }

    /// Bounded tail of the ship service's own logs.
    pub async fn logs(&self, endpoint: &str, tail: Option<u32>) -> BayResult<String> {
        let tail = tail.unwrap_or(MAX_LOG_TAIL).min(MAX_LOG_TAIL);
        let url = format!("http://{endpoint}/logs");
        let resp = self
            .http
            .get(&url)
            .timeout(PROBE_REQUEST_TIMEOUT)
            .header(AUTHORIZATION, self.bearer.as_str())
            .query(&[("tail", tail)])
            .send()
            .await
            .map_err(|e| BayError::unready(format!("connection error: {e}")))?;

        if !resp.status().is_success() {
            return Err(BayError::unready(format!(
                "ship returned {}",
                resp.status()
            )));
        }
        resp.text()
            .await
            .map_err(|e| BayError::unready(format!("reading logs body: {e}")))
    }
}
