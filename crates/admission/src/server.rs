//! HTTP admission endpoint.
//!
//! The relay posts each connecting client's node key to `/validate` and
//! admits the client only if the answer is `{"Allow": true}`. A deny is a
//! normal answer and is returned with `200 OK`.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;

use crate::error::AdmissionError;
use crate::types::{AdmitRequest, AdmitResponse};
use crate::verifier::Verifier;

struct ServerState {
    verifier: Arc<Verifier>,
}

pub struct AdmissionServer {
    state: Arc<ServerState>,
}

impl AdmissionServer {
    pub fn new(verifier: Arc<Verifier>) -> Self {
        Self {
            state: Arc::new(ServerState { verifier }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/validate", post(validate_handler))
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves, then stop accepting connections and
    /// wait for in-flight requests.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), AdmissionError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener
            .local_addr()
            .map_err(|e| AdmissionError::Server(format!("listener has no address: {}", e)))?;
        tracing::info!(addr = %addr, "HTTP server started");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| AdmissionError::Server(e.to_string()))?;

        tracing::info!("HTTP server closed");
        Ok(())
    }
}

fn status_response(status: StatusCode) -> Response {
    (status, status.canonical_reason().unwrap_or_default().to_string()).into_response()
}

async fn validate_handler(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    let request: AdmitRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::error!(error = %e, "error parsing JSON");
            return status_response(StatusCode::BAD_REQUEST);
        }
    };

    let result = state.verifier.resolve(&request.node_public).await;
    let socket = match &result {
        Ok(Some(socket)) => Some(socket.display().to_string()),
        _ => None,
    };

    tracing::info!(
        admitted = socket.is_some(),
        nodekey = %request.node_public,
        source = request.source.as_deref().unwrap_or(""),
        socket = socket.as_deref().unwrap_or(""),
        "client verified"
    );
    if let Err(e) = &result {
        tracing::error!(nodekey = %request.node_public, error = %e, "error verifying client");
    }

    let response = AdmitResponse {
        allow: socket.is_some(),
    };
    match serde_json::to_vec(&response) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "error writing JSON");
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
