//! Client for the agents' local HTTP API, spoken over their Unix sockets.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::{header, Method, Request};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::net::UnixStream;

use crate::agent::{StatusConnector, StatusSnapshot, StatusSource};
use crate::error::AdmissionError;
use crate::identity::NodeIdentity;

const STATUS_PATH: &str = "/localapi/v0/status";
const LOCAL_API_HOST: &str = "local-tailscaled.sock";

/// Subset of the agent's status document this service reads.
#[derive(Debug, Deserialize)]
struct LocalStatus {
    #[serde(rename = "Self", default)]
    self_status: Option<PeerStatus>,
    #[serde(rename = "Peer", default)]
    peer: Option<HashMap<String, PeerStatus>>,
}

#[derive(Debug, Deserialize)]
struct PeerStatus {
    #[serde(rename = "PublicKey")]
    public_key: NodeIdentity,
}

impl From<LocalStatus> for StatusSnapshot {
    fn from(status: LocalStatus) -> Self {
        Self {
            self_identity: status.self_status.map(|s| s.public_key),
            peer_identities: status
                .peer
                .unwrap_or_default()
                .into_values()
                .map(|p| p.public_key)
                .collect(),
        }
    }
}

/// Queries one agent's status endpoint over its control socket.
#[derive(Debug, Clone)]
pub struct LocalApiClient {
    socket: PathBuf,
}

impl LocalApiClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    async fn fetch_status(&self) -> Result<(hyper::StatusCode, Bytes), AdmissionError> {
        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            AdmissionError::Transport(format!("connect {}: {}", self.socket.display(), e))
        })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| AdmissionError::Transport(format!("handshake failed: {}", e)))?;

        // Finishes once `sender` is dropped.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "local api connection closed with error");
            }
        });

        let request = Request::builder()
            .method(Method::GET)
            .uri(STATUS_PATH)
            .header(header::HOST, LOCAL_API_HOST)
            .body(Empty::<Bytes>::new())
            .map_err(|e| AdmissionError::Protocol(format!("building request: {}", e)))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| AdmissionError::Transport(format!("status request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| AdmissionError::Transport(format!("reading status body: {}", e)))?
            .to_bytes();

        Ok((status, body))
    }
}

#[async_trait]
impl StatusSource for LocalApiClient {
    async fn status(&self) -> Result<StatusSnapshot, AdmissionError> {
        let (status, body) = self.fetch_status().await?;

        if !status.is_success() {
            return Err(AdmissionError::Protocol(format!(
                "status endpoint returned {}: {}",
                status,
                String::from_utf8_lossy(&body).trim()
            )));
        }

        let parsed: LocalStatus = serde_json::from_slice(&body)
            .map_err(|e| AdmissionError::Protocol(format!("decoding status: {}", e)))?;
        Ok(parsed.into())
    }
}

/// Connects discovered sockets to [`LocalApiClient`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalApiConnector;

impl StatusConnector for LocalApiConnector {
    fn connect(&self, socket: &Path) -> Arc<dyn StatusSource> {
        Arc::new(LocalApiClient::new(socket))
    }
}
