// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The relay server: method-based request classification, body validation,
//! and forwarding of accepted payloads to the configured sink.

use std::io;
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::service::service_fn;
use hyper::{http, Method, Request, StatusCode};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::http_utils::{cors_response, log_and_create_response, EmptyResponse};
use crate::payload;
use crate::sink::{PayloadSink, POST_BODY_TOKEN};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("unsupported listener network '{0}'")]
    UnsupportedNetwork(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One relay per process: immutable configuration plus the write-only payload
/// sink. The request handler is stateless; every request task reads the same
/// two Arcs.
pub struct MetricsRelay {
    config: Arc<Config>,
    sink: Arc<dyn PayloadSink>,
}

impl MetricsRelay {
    pub fn new(config: Arc<Config>, sink: Arc<dyn PayloadSink>) -> Self {
        MetricsRelay { config, sink }
    }

    /// Opens the listener on the configured address. Bind failures and
    /// non-TCP network kinds are startup-fatal and surface to the
    /// composition root.
    pub async fn bind(&self) -> Result<TcpListener, RelayError> {
        match self.config.metrics_network.as_str() {
            "tcp" | "tcp4" | "tcp6" => {}
            other => return Err(RelayError::UnsupportedNetwork(other.to_string())),
        }
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        info!("Now listening on '{}'", self.config.metrics_address);
        Ok(listener)
    }

    /// Accept loop: one hyper http1 connection task per accepted socket.
    /// Transient accept errors are skipped; a panicking handler is logged
    /// without killing the server.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        let config = Arc::clone(&self.config);
        let sink = Arc::clone(&self.sink);
        let service = service_fn(move |req| {
            // called for each http request
            let config = Arc::clone(&config);
            let sink = Arc::clone(&sink);
            async move { Self::handle(config, sink, req).await }
        });

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

    /// Per-request classification. OPTIONS is the CORS pre-flight and never
    /// reads the body; POST runs the validation-and-forward path; everything
    /// else is rejected. CORS headers are set on every outcome.
    pub async fn handle<B>(
        config: Arc<Config>,
        sink: Arc<dyn PayloadSink>,
        req: Request<B>,
    ) -> http::Result<EmptyResponse>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        if req.method() == Method::OPTIONS {
            cors_response(StatusCode::NO_CONTENT, &config.cors_origin)
        } else if req.method() == Method::POST {
            Self::accept_post(config, sink, req).await
        } else {
            log_and_create_response(
                &format!("Rejected '{}' request", req.method()),
                StatusCode::BAD_REQUEST,
                &config.cors_origin,
            )
        }
    }

    /// Accepts iff the body read succeeded, the body is non-empty, strictly
    /// under the configured maximum, and matches the payload schema. All
    /// failing conditions fold into the same undifferentiated 400. The size
    /// check runs after the full body is collected, so the limit does not
    /// bound memory during the read itself; this preserves the observable
    /// behavior of checking the exact byte count rather than Content-Length.
    async fn accept_post<B>(
        config: Arc<Config>,
        sink: Arc<dyn PayloadSink>,
        req: Request<B>,
    ) -> http::Result<EmptyResponse>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return log_and_create_response(
                    &format!("Error reading request body: {e}"),
                    StatusCode::BAD_REQUEST,
                    &config.cors_origin,
                );
            }
        };

        if body.is_empty() {
            return log_and_create_response(
                "Rejected empty request body",
                StatusCode::BAD_REQUEST,
                &config.cors_origin,
            );
        }
        if body.len() >= config.max_post_size {
            return log_and_create_response(
                &format!(
                    "Rejected request body of {} bytes (limit {})",
                    body.len(),
                    config.max_post_size
                ),
                StatusCode::BAD_REQUEST,
                &config.cors_origin,
            );
        }
        if !payload::is_valid(&body) {
            return log_and_create_response(
                "Rejected request body that does not match the metric payload schema",
                StatusCode::BAD_REQUEST,
                &config.cors_origin,
            );
        }

        // Forward the raw bytes, not a re-serialized payload. Sink errors are
        // logged and do not fail the request; there is no retry.
        let line = format!("{} {}", POST_BODY_TOKEN, String::from_utf8_lossy(&body));
        if let Err(e) = sink.emit(&line).await {
            error!("Failed to forward payload line: {e}");
        }

        cors_response(StatusCode::NO_CONTENT, &config.cors_origin)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::{header, Method, Request, StatusCode};
    use tokio::sync::Mutex;

    use super::{MetricsRelay, RelayError};
    use crate::config::Config;
    use crate::sink::{PayloadSink, SinkError};

    struct RecordingSink {
        lines: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(RecordingSink {
                lines: Mutex::new(Vec::new()),
            })
        }

        async fn lines(&self) -> Vec<String> {
            self.lines.lock().await.clone()
        }
    }

    #[async_trait]
    impl PayloadSink for RecordingSink {
        async fn emit(&self, line: &str) -> Result<(), SinkError> {
            self.lines.lock().await.push(line.to_string());
            Ok(())
        }
    }

    fn test_config(max_post_size: usize) -> Arc<Config> {
        Arc::new(Config {
            metrics_network: "tcp".to_string(),
            metrics_address: "127.0.0.1:0".to_string(),
            syslog_network: "udp".to_string(),
            syslog_address: "127.0.0.1:514".to_string(),
            syslog_tag: "test:".to_string(),
            cors_origin: "*".to_string(),
            max_post_size,
        })
    }

    fn request(method: Method, body: &[u8]) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri("/")
            .body(Full::new(Bytes::copy_from_slice(body)))
            .unwrap()
    }

    const VALID_BODY: &[u8] =
        br#"{"techIDs":["AB1234"],"itemIDs":[],"ignoredItemIDs":[],"format":"csv"}"#;

    #[tokio::test]
    async fn test_options_is_no_content_and_logs_nothing() {
        let sink = RecordingSink::new();
        let response = MetricsRelay::handle(
            test_config(42_500),
            sink.clone(),
            request(Method::OPTIONS, b"ignored"),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(sink.lines().await.is_empty());
    }

    #[tokio::test]
    async fn test_valid_post_forwards_exact_bytes() {
        let sink = RecordingSink::new();
        let response =
            MetricsRelay::handle(test_config(42_500), sink.clone(), request(Method::POST, VALID_BODY))
                .await
                .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            sink.lines().await,
            [format!("POSTBODY {}", String::from_utf8_lossy(VALID_BODY))]
        );
    }

    #[tokio::test]
    async fn test_unknown_field_is_rejected_and_not_forwarded() {
        let sink = RecordingSink::new();
        let response = MetricsRelay::handle(
            test_config(42_500),
            sink.clone(),
            request(Method::POST, br#"{"techIDs":["AB1234"],"extra":"x"}"#),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(sink.lines().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_body_is_rejected() {
        let sink = RecordingSink::new();
        let response =
            MetricsRelay::handle(test_config(42_500), sink.clone(), request(Method::POST, b""))
                .await
                .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(sink.lines().await.is_empty());
    }

    #[tokio::test]
    async fn test_body_at_limit_is_rejected() {
        let sink = RecordingSink::new();
        // the accept condition is strict: len < max
        let config = test_config(VALID_BODY.len());
        let response = MetricsRelay::handle(config, sink.clone(), request(Method::POST, VALID_BODY))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(sink.lines().await.is_empty());
    }

    #[tokio::test]
    async fn test_body_under_limit_is_accepted() {
        let sink = RecordingSink::new();
        let config = test_config(VALID_BODY.len() + 1);
        let response = MetricsRelay::handle(config, sink.clone(), request(Method::POST, VALID_BODY))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(sink.lines().await.len(), 1);
    }

    #[tokio::test]
    async fn test_oversize_body_is_rejected() {
        let sink = RecordingSink::new();
        let config = test_config(8);
        let response = MetricsRelay::handle(config, sink.clone(), request(Method::POST, VALID_BODY))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(sink.lines().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected() {
        let sink = RecordingSink::new();
        let response = MetricsRelay::handle(
            test_config(42_500),
            sink.clone(),
            request(Method::POST, b"not json at all"),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(sink.lines().await.is_empty());
    }

    #[tokio::test]
    async fn test_other_methods_are_rejected() {
        for method in [Method::GET, Method::PUT, Method::DELETE, Method::PATCH] {
            let sink = RecordingSink::new();
            let response = MetricsRelay::handle(
                test_config(42_500),
                sink.clone(),
                request(method.clone(), VALID_BODY),
            )
            .await
            .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "method {method}");
            assert!(sink.lines().await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_cors_headers_on_every_outcome() {
        for (method, body) in [
            (Method::OPTIONS, &b"x"[..]),
            (Method::POST, VALID_BODY),
            (Method::POST, b"not json"),
            (Method::GET, b""),
        ] {
            let response = MetricsRelay::handle(
                test_config(42_500),
                RecordingSink::new(),
                request(method, body),
            )
            .await
            .unwrap();
            let headers = response.headers();
            assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
            assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST");
            assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "*");
            assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "600");
        }
    }

    #[tokio::test]
    async fn test_bind_rejects_unsupported_network() {
        let mut config = (*test_config(42_500)).clone();
        config.metrics_network = "unix".to_string();
        let relay = MetricsRelay::new(Arc::new(config), RecordingSink::new());
        match relay.bind().await {
            Err(RelayError::UnsupportedNetwork(net)) => assert_eq!(net, "unix"),
            other => panic!("expected UnsupportedNetwork, got {:?}", other.map(|_| ())),
        }
    }
}
