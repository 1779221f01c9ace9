//! Layers wrapped around the routes
//!
//! Request ids come from `tower-http`: a UUID is assigned when the caller did
//! not send `x-request-id`, and the header is echoed on the response. The
//! trace layer opens one span per request carrying that id and logs the
//! outcome at a level matching the status class.

use crate::{error::ApiError, state::AppState};
use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnRequest, MakeSpan, OnResponse, TraceLayer},
};
use tracing::{debug, error, info, info_span, warn, Span};
use will_iam_authz::{Credentials, IamError};

/// Request ID header name
pub const X_REQUEST_ID: &str = "x-request-id";

/// Caller-facing access token, echoed on bearer-authenticated responses
pub const X_ACCESS_TOKEN: &str = "x-access-token";

fn x_request_id() -> HeaderName {
    HeaderName::from_static(X_REQUEST_ID)
}

/// Browsers may send `Authorization` and read back the request id and the
/// refreshed access token
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, x_request_id()])
        .expose_headers([x_request_id(), HeaderName::from_static(X_ACCESS_TOKEN)])
}

/// Assigns a UUID request id unless the caller sent one
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(x_request_id(), MakeRequestUuid)
}

/// Copies the request id onto the response
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(x_request_id())
}

/// Span named `request` with method, path and request id
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> Span {
        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
        )
    }
}

/// 5xx at error, 4xx at warn, the rest at info
#[derive(Debug, Clone, Copy, Default)]
pub struct LogResponse;

impl<B> OnResponse<B> for LogResponse {
    fn on_response(self, response: &axum::http::Response<B>, latency: Duration, _span: &Span) {
        let status = response.status().as_u16();
        let latency_ms = latency.as_millis() as u64;
        match status {
            500..=599 => error!(status, latency_ms, "Request failed"),
            400..=499 => warn!(status, latency_ms, "Request rejected"),
            _ => info!(status, latency_ms, "Request completed"),
        }
    }
}

pub type HttpTraceLayer =
    TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RequestSpan, DefaultOnRequest, LogResponse>;

pub fn trace_layer() -> HttpTraceLayer {
    TraceLayer::new_for_http()
        .make_span_with(RequestSpan)
        .on_response(LogResponse)
}

/// Credential middleware
///
/// Resolves `Authorization: KeyPair <keyID>:<keySecret>` or
/// `Authorization: Bearer <accessToken>` to a [`Principal`](will_iam_authz::Principal)
/// stored in the request extensions. Bearer responses carry the caller's
/// access token in `x-access-token`.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let credentials = match request.headers().get(header::AUTHORIZATION) {
        Some(value) => {
            let value = value.to_str().map_err(|_| {
                IamError::Unauthenticated("authorization header is not valid ASCII".to_string())
            })?;
            Credentials::from_header(value)?
        }
        None => {
            warn!(path = %request.uri().path(), "Missing authorization header");
            return Err(IamError::Unauthenticated("missing authorization header".to_string()).into());
        }
    };

    let principal = state.authenticator.authenticate(&credentials).await?;
    debug!(service_account_id = %principal.service_account_id, "Authenticated request");

    let access_token = principal.access_token.clone();
    request.extensions_mut().insert(principal);

    let mut response = next.run(request).await;
    if let Some(value) = access_token.and_then(|t| HeaderValue::from_str(&t).ok()) {
        response.headers_mut().insert(X_ACCESS_TOKEN, value);
    }

    Ok(response)
}
