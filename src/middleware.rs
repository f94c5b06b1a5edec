use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::info;

use crate::client_ip::{ClientIp, ClientIpResolver};
use crate::error::ApiError;
use crate::rate_limiter::RateLimiter;

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        target: "burnnote::middleware",
        method = %method,
        uri = %uri,
        status = %response.status(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}

/// Admission control for one request class.
#[derive(Clone)]
pub struct AdmissionGate {
    pub limiter: RateLimiter,
    pub resolver: Arc<ClientIpResolver>,
}

/// Resolve the client identity, charge it against the gate's limiter, and
/// reject with 429 before any handler (or the store) runs.
pub async fn admission(State(gate): State<AdmissionGate>, mut request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = gate.resolver.resolve(peer, request.headers());

    let decision = gate.limiter.check(&identity);
    if !decision.allowed {
        info!(
            target: "burnnote::middleware",
            limiter = gate.limiter.settings().name,
            client_ip = %identity,
            uri = %request.uri(),
            "Rate limit exceeded"
        );
        return ApiError::RateLimited {
            retry_after: decision.retry_after,
        }
        .into_response();
    }

    request.extensions_mut().insert(ClientIp(identity));
    next.run(request).await
}

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
    script-src 'self' https://cdn.jsdelivr.net; \
    style-src 'self' https://cdn.jsdelivr.net; \
    img-src 'self'; \
    connect-src 'self'; \
    frame-ancestors 'none'";

const SECURITY_HEADERS: [(&str, &str); 7] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "0"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("content-security-policy", CONTENT_SECURITY_POLICY),
    (
        "strict-transport-security",
        "max-age=63072000; includeSubDomains; preload",
    ),
    ("permissions-policy", "camera=(), microphone=(), geolocation=()"),
];

pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    for (name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }

    response
}
