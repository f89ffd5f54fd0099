//! Per-IP rate limiting middleware using governor.

use axum::{
    extract::{ConnectInfo, Extension, Request},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::{net::IpAddr, net::SocketAddr, num::NonZeroU32, sync::Arc, time::Duration};
use tracing::warn;

use crate::response::ApiResponse;

pub type KeyedRateLimiter =
    RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock, NoOpMiddleware>;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window_secs: u64,
    pub enabled: bool,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 60,
            window_secs: 60,
            enabled: true,
            burst_size: 30,
        }
    }
}

impl RateLimitConfig {
    pub fn new(requests_per_window: u32, window_secs: u64) -> Self {
        Self {
            requests_per_window,
            window_secs,
            enabled: true,
            burst_size: requests_per_window / 2,
        }
    }

    /// Budget for credential endpoints (login, register, password reset).
    pub fn strict() -> Self {
        Self {
            requests_per_window: 20,
            window_secs: 60,
            enabled: true,
            burst_size: 10,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn create_limiter(&self) -> Option<Arc<KeyedRateLimiter>> {
        if !self.enabled || self.requests_per_window == 0 {
            return None;
        }

        let replenish_interval_ns =
            (self.window_secs.max(1) as u128 * 1_000_000_000) / self.requests_per_window as u128;
        let replenish_interval = Duration::from_nanos(replenish_interval_ns.max(1) as u64);

        let burst = NonZeroU32::new(self.burst_size.max(1))?;
        let quota = Quota::with_period(replenish_interval)?.allow_burst(burst);

        Some(Arc::new(RateLimiter::dashmap(quota)))
    }
}

#[derive(Clone)]
pub struct RateLimitState {
    pub global_limiter: Option<Arc<KeyedRateLimiter>>,
    pub auth_limiter: Option<Arc<KeyedRateLimiter>>,
    pub global_config: RateLimitConfig,
    pub auth_config: RateLimitConfig,
}

impl RateLimitState {
    pub fn with_config(global_config: RateLimitConfig, auth_config: RateLimitConfig) -> Self {
        Self {
            global_limiter: global_config.create_limiter(),
            auth_limiter: auth_config.create_limiter(),
            global_config,
            auth_config,
        }
    }

    pub fn disabled() -> Self {
        Self {
            global_limiter: None,
            auth_limiter: None,
            global_config: RateLimitConfig::disabled(),
            auth_config: RateLimitConfig::disabled(),
        }
    }
}

#[derive(Debug)]
pub struct RateLimitExceeded {
    pub message: &'static str,
    pub retry_after_secs: u64,
}

impl IntoResponse for RateLimitExceeded {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()>::failure(self.message, Vec::new(), None);
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();

        if let Ok(value) = HeaderValue::from_str(&self.retry_after_secs.to_string()) {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, value.clone());
            response.headers_mut().insert("X-RateLimit-Reset", value);
        }

        response
    }
}

fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED))
}

async fn check(
    limiter: Option<&Arc<KeyedRateLimiter>>,
    config: &RateLimitConfig,
    message: &'static str,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitExceeded> {
    let Some(limiter) = limiter else {
        return Ok(next.run(request).await);
    };

    let ip = client_ip(&request);

    match limiter.check_key(&ip) {
        Ok(_) => {
            let mut response = next.run(request).await;
            // An inner, route-specific limiter has already reported its limit.
            if let Ok(value) = HeaderValue::from_str(&config.requests_per_window.to_string()) {
                response
                    .headers_mut()
                    .entry("X-RateLimit-Limit")
                    .or_insert(value);
            }
            Ok(response)
        }
        Err(not_until) => {
            let wait_duration = not_until.wait_time_from(DefaultClock::default().now());
            let retry_after = wait_duration.as_secs().max(1);

            warn!(ip = %ip, retry_after_secs = retry_after, reason = message, "Rate limit exceeded");

            Err(RateLimitExceeded {
                message,
                retry_after_secs: retry_after,
            })
        }
    }
}

pub async fn rate_limit_middleware(
    rate_limit_state: Option<Extension<RateLimitState>>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitExceeded> {
    match rate_limit_state {
        Some(Extension(state)) => {
            check(
                state.global_limiter.as_ref(),
                &state.global_config,
                "Too many requests",
                request,
                next,
            )
            .await
        }
        None => Ok(next.run(request).await),
    }
}

pub async fn auth_rate_limit_middleware(
    rate_limit_state: Option<Extension<RateLimitState>>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitExceeded> {
    match rate_limit_state {
        Some(Extension(state)) => {
            check(
                state.auth_limiter.as_ref(),
                &state.auth_config,
                "Too many authentication attempts",
                request,
                next,
            )
            .await
        }
        None => Ok(next.run(request).await),
    }
}
