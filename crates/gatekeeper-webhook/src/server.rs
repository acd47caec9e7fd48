//! HTTP surface of the webhook.
//!
//! - `POST /validate` and `POST /webhook` - AdmissionReview in, AdmissionReview out
//! - `GET /healthz` - liveness, always `ok`
//! - `GET /metrics` - Prometheus text exposition
//!
//! Malformed admission requests get a 400 with no review; every decided
//! request gets a 200 carrying the verdict, including denials.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tower::limit::ConcurrencyLimitLayer;
use tracing::{debug, error, info, warn};

use crate::admission::{into_review, AdmissionHandler, DecodedRequest};
use crate::error::{Result, WebhookError};
use crate::metrics::{self, DECISION_INVALID};

/// Time in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Builds the router.
///
/// At most `max_concurrent_requests` admission requests are processed at a
/// time; health and metrics requests are not limited.
pub fn router(handler: AdmissionHandler, max_concurrent_requests: usize) -> Router {
    let admission = Router::new()
        .route("/validate", post(validate))
        .route("/webhook", post(validate))
        .layer(ConcurrencyLimitLayer::new(max_concurrent_requests.max(1)))
        .with_state(handler);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_text))
        .merge(admission)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_text() -> Response {
    match metrics::render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn bad_request(message: String) -> Response {
    metrics::record_admission(DECISION_INVALID);
    warn!(reason = %message, "Rejecting malformed admission request");
    (StatusCode::BAD_REQUEST, message).into_response()
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|media_type| media_type.trim().eq_ignore_ascii_case("application/json"))
}

async fn validate(
    State(handler): State<AdmissionHandler>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        return bad_request("empty request body".to_string());
    }

    let decoded = match DecodedRequest::from_slice(&body) {
        Ok(decoded) => decoded,
        Err(e) => return bad_request(format!("invalid AdmissionReview: {e}")),
    };
    let request = &decoded.request;

    if !is_json(&headers) {
        return bad_request("Content-Type must be application/json".to_string());
    }

    debug!(
        uid = %request.uid,
        operation = ?request.operation,
        namespace = ?request.namespace,
        kind = %request.kind.kind,
        "Processing admission request"
    );

    let verdict = handler.review(&decoded).await;
    match serde_json::to_vec(&into_review(request, &verdict)) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(uid = %request.uid, error = %e, "Failed to encode admission response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Address to bind.
    pub addr: SocketAddr,
    /// PEM certificate and key; `None` serves plain HTTP.
    pub tls: Option<(PathBuf, PathBuf)>,
}

/// Serves `app` until `shutdown` resolves, then drains in-flight requests.
///
/// # Errors
///
/// Returns an error if the TLS material cannot be loaded or the listener
/// fails.
pub async fn serve<F>(app: Router, options: ServerOptions, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = Handle::new();
    let drain = handle.clone();
    tokio::spawn(async move {
        shutdown.await;
        info!("Shutdown signal received; draining requests");
        drain.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    let addr = options.addr;
    let served = match options.tls {
        Some((cert, key)) => {
            let tls = RustlsConfig::from_pem_file(&cert, &key)
                .await
                .map_err(|e| WebhookError::Tls {
                    cert: cert.display().to_string(),
                    key: key.display().to_string(),
                    reason: e.to_string(),
                })?;
            info!(%addr, "Webhook server listening with TLS");
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        None => {
            warn!(%addr, "Webhook server listening without TLS");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
    };

    served.map_err(|source| WebhookError::Server {
        addr: addr.to_string(),
        source,
    })?;
    info!("Webhook server stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers
    }

    #[test]
    fn test_content_type_parameters_tolerated() {
        assert!(is_json(&headers("application/json")));
        assert!(is_json(&headers("application/json; charset=utf-8")));
        assert!(is_json(&headers("Application/JSON")));
    }

    #[test]
    fn test_content_type_rejected() {
        assert!(!is_json(&headers("text/plain")));
        assert!(!is_json(&headers("application/jsonl")));
        assert!(!is_json(&HeaderMap::new()));
    }
}
