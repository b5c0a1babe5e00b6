// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{header, http, http::HeaderMap, Method, Request, Response, StatusCode};
use serde_json::json;
use tokio::time;
use tracing::{debug, error, warn};

use crate::auth;
use crate::config::Config;
use crate::decoder::{self, LogRecord};
use crate::forwarder::{ForwardError, LogForwarder};
use crate::http_utils::{
    log_and_create_http_response, verify_request_content_length, HttpResponse,
};

const HEALTH_ENDPOINT_PATH: &str = "/health";
const TEST_ENDPOINT_PATH: &str = "/test";
/// Logpush jobs are commonly pointed at any of these paths; all three feed
/// the same ingestion pipeline.
const LOGS_ENDPOINT_PATHS: [&str; 3] = ["/logs", "/", "/api/logs"];

/// One message for every denial, whether the header was missing, used the
/// wrong scheme, or carried the wrong token.
const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";

pub struct LogpushReceiver {
    pub config: Arc<Config>,
    pub forwarder: Arc<dyn LogForwarder + Send + Sync>,
}

impl LogpushReceiver {
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        let endpoint_config = self.config.clone();
        let endpoint_forwarder = self.forwarder.clone();

        let service = service_fn(move |req| {
            // called for each http request
            let config = endpoint_config.clone();
            let forwarder = endpoint_forwarder.clone();
            LogpushReceiver::endpoint_handler(config, forwarder, req)
        });

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.receiver_port));
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        debug!(
            "Logpush receiver started: listening on port {}",
            self.config.receiver_port
        );

        Self::serve_tcp(listener, service).await
    }

    async fn serve_tcp<S>(
        listener: tokio::net::TcpListener,
        service: S,
    ) -> Result<(), Box<dyn std::error::Error>>
    where
        S: hyper::service::Service<Request<Incoming>, Response = HttpResponse>
            + Clone
            + Send
            + 'static,
        S::Future: Send,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill server on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }

    async fn endpoint_handler(
        config: Arc<Config>,
        forwarder: Arc<dyn LogForwarder + Send + Sync>,
        req: Request<Incoming>,
    ) -> http::Result<HttpResponse> {
        match (req.method(), req.uri().path()) {
            (&Method::POST, path) if is_logs_path(path) => {
                Self::logs_endpoint_handler(config, forwarder, req).await
            }
            // Logpush probes a candidate destination with a GET before the
            // job goes active; answer positively without touching Loki.
            (&Method::GET, path) if is_logs_path(path) => log_and_create_http_response(
                "Cloudflare Logpush receiver ready",
                StatusCode::OK,
            ),
            (&Method::POST, TEST_ENDPOINT_PATH) => {
                Self::test_endpoint_handler(config, forwarder, req).await
            }
            (&Method::GET, HEALTH_ENDPOINT_PATH) => Self::health_handler(),
            _ => {
                let mut not_found = Response::default();
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                Ok(not_found)
            }
        }
    }

    async fn logs_endpoint_handler(
        config: Arc<Config>,
        forwarder: Arc<dyn LogForwarder + Send + Sync>,
        req: Request<Incoming>,
    ) -> http::Result<HttpResponse> {
        // Deny before any body work so abusive traffic costs no decode cycles.
        if !auth::authorize(req.headers(), config.auth_token.as_deref()) {
            return log_and_create_http_response(UNAUTHORIZED_MESSAGE, StatusCode::UNAUTHORIZED);
        }

        let (parts, body) = req.into_parts();
        if let Some(response) = verify_request_content_length(
            &parts.headers,
            config.max_request_content_length,
            "Error processing log delivery",
        ) {
            return response;
        }

        let deadline = Duration::from_secs(config.request_timeout_secs);
        match time::timeout(
            deadline,
            Self::ingest(config, forwarder, &parts.headers, body),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => log_and_create_http_response(
                "Log delivery timed out before Loki accepted the batch",
                StatusCode::GATEWAY_TIMEOUT,
            ),
        }
    }

    /// Runs the decode and forward stages for one delivery and maps the
    /// outcome to the status code Logpush expects.
    async fn ingest(
        config: Arc<Config>,
        forwarder: Arc<dyn LogForwarder + Send + Sync>,
        headers: &HeaderMap,
        body: Incoming,
    ) -> http::Result<HttpResponse> {
        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error reading log delivery body: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        let content_encoding = headers
            .get(header::CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok());
        let payload = match decoder::decode_payload(&body_bytes, content_encoding) {
            Ok(payload) => payload,
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Undecodable log delivery: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        if payload.validation_ping {
            return log_and_create_http_response(
                "Acknowledged Logpush destination validation request",
                StatusCode::OK,
            );
        }
        if payload.skipped_lines > 0 {
            warn!(
                "Skipped {} malformed lines in one delivery",
                payload.skipped_lines
            );
        }
        if payload.records.is_empty() {
            return log_and_create_http_response("No log records to forward", StatusCode::OK);
        }

        let result = forwarder.forward(payload.records).await;
        Self::forward_result_response(result)
    }

    async fn test_endpoint_handler(
        config: Arc<Config>,
        forwarder: Arc<dyn LogForwarder + Send + Sync>,
        req: Request<Incoming>,
    ) -> http::Result<HttpResponse> {
        // Same access policy as the ingestion path.
        if !auth::authorize(req.headers(), config.auth_token.as_deref()) {
            return log_and_create_http_response(UNAUTHORIZED_MESSAGE, StatusCode::UNAUTHORIZED);
        }

        debug!("Pushing one synthetic log record through the forward pipeline");
        let deadline = Duration::from_secs(config.request_timeout_secs);
        match time::timeout(
            deadline,
            forwarder.forward(vec![Self::synthetic_test_record()]),
        )
        .await
        {
            Ok(result) => Self::forward_result_response(result),
            Err(_) => log_and_create_http_response(
                "Test push timed out before Loki accepted the record",
                StatusCode::GATEWAY_TIMEOUT,
            ),
        }
    }

    fn forward_result_response(result: Result<usize, ForwardError>) -> http::Result<HttpResponse> {
        match result {
            Ok(count) => log_and_create_http_response(
                &format!("Forwarded {count} log records"),
                StatusCode::OK,
            ),
            Err(err @ ForwardError::Transient(_)) => log_and_create_http_response(
                &format!("Error forwarding log records: {err}"),
                StatusCode::BAD_GATEWAY,
            ),
            Err(err @ ForwardError::Permanent(_)) => log_and_create_http_response(
                &format!("Error forwarding log records: {err}"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        }
    }

    /// Liveness only: reports that the process is serving, never Loki health.
    fn health_handler() -> http::Result<HttpResponse> {
        Response::builder()
            .status(StatusCode::OK)
            .body(Full::from(r#"{"status":"healthy"}"#))
    }

    fn synthetic_test_record() -> LogRecord {
        let record = json!({
            "ClientIP": "1.2.3.4",
            "ClientRequestHost": "test.example.com",
            "ClientRequestMethod": "GET",
            "ClientRequestURI": "/test",
            "EdgeResponseStatus": 200,
            "EdgeStartTimestamp": "2024-01-01T00:00:00Z",
            "RayID": "test-ray-id",
        });
        record.as_object().cloned().unwrap_or_default()
    }
}

fn is_logs_path(path: &str) -> bool {
    LOGS_ENDPOINT_PATHS.contains(&path)
}
