// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::{header, http, Response, StatusCode};
use tracing::{debug, warn};

/// Every relay response is empty-bodied; outcome is conveyed solely by the
/// status code.
pub type EmptyResponse = Response<Empty<Bytes>>;

/// Builds an empty response carrying the CORS headers every reply must have,
/// success or failure: allow the configured origin, POST only, any request
/// header, pre-flight cacheable for 10 minutes.
pub fn cors_response(status: StatusCode, allow_origin: &str) -> http::Result<EmptyResponse> {
    Response::builder()
        .status(status)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin)
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, "POST")
        .header(header::ACCESS_CONTROL_ALLOW_HEADERS, "*")
        .header(header::ACCESS_CONTROL_MAX_AGE, "600")
        .body(Empty::new())
}

/// Logs the given message (debug for accepted requests, warn for rejections)
/// and returns an empty CORS response with the given status. Rejections carry
/// no detail back to the client; the reason lives in the server log only.
pub fn log_and_create_response(
    message: &str,
    status: StatusCode,
    allow_origin: &str,
) -> http::Result<EmptyResponse> {
    if status.is_success() {
        debug!("{message}");
    } else {
        warn!("{message}");
    }
    cors_response(status, allow_origin)
}
