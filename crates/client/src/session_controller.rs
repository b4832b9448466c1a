//! HTTP session lifecycle client (§4.1): POST/GET/PUT/DELETE against the GFN
//! session API. Grounded on `casterplay-BassAES67`'s `whep_client.rs` HTTP
//! plumbing (hyper-util legacy client + hyper-rustls connector), adapted to
//! `anyhow`/`thiserror` instead of `Result<_, String>`.

use bytes::Bytes;
use gfn_protocol::{
    ConnectionInfo, CoreError, Session, SessionStatus, StreamingOptions,
};
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

type HttpClient = Client<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>, Full<Bytes>>;

/// Observer for queue position/ETA updates during `wait_ready`.
pub trait QueueObserver: Send + Sync {
    fn on_queue_update(&self, position: Option<u32>, eta_ms: Option<u64>);
}

/// Drives the session lifecycle (§4.1) against the GFN REST API (§6).
pub struct SessionController {
    base_url: String,
    token: String,
    client: HttpClient,
    request_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct StartRequestBody<'a> {
    app_id: u32,
    store_type: &'a str,
    store_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    preferred_server: Option<&'a str>,
    resolution: ResolutionBody,
    fps: u32,
    codec: &'static str,
    max_bitrate_mbps: u32,
    reflex: bool,
}

#[derive(Debug, Serialize)]
struct ResolutionBody {
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct ServerInfoBody {
    ip: Option<String>,
    #[allow(dead_code)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartResponseBody {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "signalingUrl")]
    signaling_url: Option<String>,
    server: Option<ServerInfoBody>,
}

#[derive(Debug, Deserialize)]
struct StatusResponseBody {
    status: u32,
    queue_position: Option<u32>,
    eta_ms: Option<u64>,
    signaling_url: Option<String>,
    connection_info: Option<Vec<ConnectionInfoBody>>,
    gpu_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectionInfoBody {
    ip: String,
    port: u16,
    usage: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
}

impl SessionController {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, request_timeout: Duration) -> Self {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .expect("native root store")
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(https);

        Self { base_url: base_url.into(), token: token.into(), client, request_timeout }
    }

    fn auth_header(&self) -> String {
        format!("GFNJWT {}", self.token)
    }

    /// `start(request)` → `Session` with status Queued or Ready (§4.1).
    /// Retries transient failures with exponential backoff up to 3 attempts;
    /// maps documented server errors to typed failures without retry.
    pub async fn start(&self, options: &StreamingOptions) -> Result<Session, CoreError> {
        let body = StartRequestBody {
            app_id: options.app_id,
            store_type: &options.store_type,
            store_id: &options.store_id,
            preferred_server: options.preferred_server.as_deref(),
            resolution: ResolutionBody { width: options.width, height: options.height },
            fps: options.fps,
            codec: options.codec.sdp_encoding_name(),
            max_bitrate_mbps: options.max_bitrate_mbps,
            reflex: options.reflex,
        };
        let payload = serde_json::to_vec(&body).map_err(|e| CoreError::Transient(e.to_string()))?;

        let mut backoff = Duration::from_millis(500);
        let mut last_err = None;
        for attempt in 1..=3 {
            match self.post_session(&payload, options.app_id).await {
                Ok(session) => return Ok(session),
                Err(TryRequest::Fatal(e)) => return Err(e),
                Err(TryRequest::Transient(e)) => {
                    warn!(attempt, "session start attempt failed: {e:#}");
                    last_err = Some(e);
                    if attempt < 3 {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(CoreError::Transient(
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "session start failed".into()),
        ))
    }

    async fn post_session(&self, payload: &[u8], app_id: u32) -> Result<Session, TryRequest> {
        let uri = format!("{}/session", self.base_url);
        let request = Request::builder()
            .method(Method::POST)
            .uri(&uri)
            .header("Content-Type", "application/json")
            .header("Authorization", self.auth_header())
            .body(Full::new(Bytes::copy_from_slice(payload)))
            .map_err(|e| TryRequest::Transient(anyhow::anyhow!(e)))?;

        let response = tokio::time::timeout(self.request_timeout, self.client.request(request))
            .await
            .map_err(|_| TryRequest::Transient(anyhow::anyhow!("request timed out")))?
            .map_err(|e| TryRequest::Transient(anyhow::anyhow!(e)))?;

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TryRequest::Transient(anyhow::anyhow!(e)))?
            .to_bytes();

        if status.is_server_error() {
            return Err(TryRequest::Transient(anyhow::anyhow!("server error {status}")));
        }
        if !status.is_success() {
            if let Ok(err_body) = serde_json::from_slice::<ApiErrorBody>(&body_bytes)
                && let Some(code) = err_body.code
            {
                if code.starts_with("REGION_NOT_SUPPORTED") {
                    return Err(TryRequest::Fatal(CoreError::RegionUnsupported { detail: code }));
                }
                if code == "SESSION_LIMIT_EXCEEDED" {
                    return Err(TryRequest::Fatal(CoreError::SessionLimitExceeded));
                }
            }
            return Err(TryRequest::Fatal(CoreError::Transient(format!(
                "session start rejected: {status}"
            ))));
        }

        let parsed: StartResponseBody = serde_json::from_slice(&body_bytes)
            .map_err(|e| TryRequest::Transient(anyhow::anyhow!(e)))?;

        info!(session_id = %parsed.session_id, "session started");
        Ok(Session {
            session_id: parsed.session_id,
            app_id,
            status: SessionStatus::Queued,
            gpu_type: None,
            server_host: parsed.server.and_then(|s| s.ip),
            signaling_url: parsed.signaling_url,
            connection_info: Vec::new(),
            queue_position: None,
            eta_ms: None,
        })
    }

    /// `wait_ready(session_id)` → `Session` with status Ready. Polls on a 1s
    /// cadence with a 5-minute ceiling, reporting queue position/ETA.
    pub async fn wait_ready(
        &self,
        session_id: &str,
        app_id: u32,
        observer: &dyn QueueObserver,
    ) -> Result<Session, CoreError> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5 * 60);
        loop {
            let session = self.get_status(session_id, app_id).await?;
            observer.on_queue_update(session.queue_position, session.eta_ms);

            if session.status == SessionStatus::Ready || session.status == SessionStatus::Active {
                return Ok(session);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CoreError::QueueTimeout);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn get_status(&self, session_id: &str, app_id: u32) -> Result<Session, CoreError> {
        let uri = format!("{}/session/{}", self.base_url, session_id);
        let request = Request::builder()
            .method(Method::GET)
            .uri(&uri)
            .header("Authorization", self.auth_header())
            .body(Full::new(Bytes::new()))
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        let response = tokio::time::timeout(self.request_timeout, self.client.request(request))
            .await
            .map_err(|_| CoreError::Transient("status poll timed out".into()))?
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        if response.status().is_server_error() {
            return Err(CoreError::Transient(format!("status poll server error {}", response.status())));
        }

        let body_bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?
            .to_bytes();

        let parsed: StatusResponseBody =
            serde_json::from_slice(&body_bytes).map_err(|e| CoreError::Transient(e.to_string()))?;

        let status = SessionStatus::try_from(parsed.status)
            .map_err(CoreError::Transient)?;

        let connection_info = parsed
            .connection_info
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| {
                gfn_protocol::ConnectionUsage::try_from(c.usage)
                    .ok()
                    .map(|usage| ConnectionInfo { ip: c.ip, port: c.port, usage })
            })
            .collect();

        Ok(Session {
            session_id: session_id.to_string(),
            app_id,
            status,
            gpu_type: parsed.gpu_type,
            server_host: parsed.signaling_url.as_deref().and_then(extract_host),
            signaling_url: parsed.signaling_url,
            connection_info,
            queue_position: parsed.queue_position,
            eta_ms: parsed.eta_ms,
        })
    }

    /// `claim(session_id, resolution, fps, app_id)`: PUT to bind the GPU,
    /// then re-poll status until it observes 6→2/3 (§4.1's invariant).
    pub async fn claim(
        &self,
        session_id: &str,
        app_id: u32,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Session, CoreError> {
        let body = serde_json::json!({
            "resolution": { "width": width, "height": height },
            "fps": fps,
        });
        let payload = serde_json::to_vec(&body).map_err(|e| CoreError::Transient(e.to_string()))?;

        let uri = format!("{}/session/{}", self.base_url, session_id);
        let request = Request::builder()
            .method(Method::PUT)
            .uri(&uri)
            .header("Content-Type", "application/json")
            .header("Authorization", self.auth_header())
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        let response = tokio::time::timeout(self.request_timeout, self.client.request(request))
            .await
            .map_err(|_| CoreError::Transient("claim timed out".into()))?
            .map_err(|e| CoreError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::Transient(format!("claim rejected: {}", response.status())));
        }
        let _ = response.into_body().collect().await;

        debug!(session_id, "claim issued, polling for 6->2/3 transition");
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5 * 60);
        loop {
            let session = self.get_status(session_id, app_id).await?;
            if session.status == SessionStatus::Ready || session.status == SessionStatus::Active {
                return Ok(session);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CoreError::QueueTimeout);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Best-effort DELETE; failures are logged, never propagated.
    pub async fn terminate(&self, session_id: &str) {
        let uri = format!("{}/session/{}", self.base_url, session_id);
        let request = match Request::builder()
            .method(Method::DELETE)
            .uri(&uri)
            .header("Authorization", self.auth_header())
            .body(Full::new(Bytes::new()))
        {
            Ok(r) => r,
            Err(e) => {
                warn!("failed to build terminate request: {e}");
                return;
            }
        };

        if let Err(e) = self.client.request(request).await {
            warn!("terminate request failed (non-fatal): {e}");
        }
    }
}

enum TryRequest {
    Fatal(CoreError),
    Transient(anyhow::Error),
}

fn extract_host(signaling_url: &str) -> Option<String> {
    url::Url::parse(signaling_url).ok().and_then(|u| u.host_str().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_host_parses_wss_url() {
        assert_eq!(
            extract_host("wss://1-2-3-4.host/nvst/sign_in"),
            Some("1-2-3-4.host".to_string())
        );
    }

    #[test]
    fn extract_host_returns_none_for_garbage() {
        assert_eq!(extract_host("not a url"), None);
    }
}
