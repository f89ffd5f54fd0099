//! KadaCare Auth - authentication and role-based access control for the
//! hospital administration backend.

pub mod auth;
pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod openapi;
pub mod pagination;
pub mod response;
pub mod schema;
pub mod store;
pub mod telemetry;

use axum::{
    handler::Handler,
    http::StatusCode,
    middleware as axum_middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;

use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use auth::{PasswordPolicy, TokenError, TokenService};
use email::{EmailSender, LogEmailSender};
use middleware::{
    auth_middleware, auth_rate_limit_middleware, metrics_middleware, rate_limit_middleware,
    request_id_middleware, require_permission, PermissionRequirement, RateLimitConfig,
    RateLimitState,
};
use response::ApiResponse;
use telemetry::MetricsState;

pub use config::Config;
pub use db::{create_db_pool, create_db_pool_with_url, DbPool};
pub use telemetry::tracing::shutdown_telemetry;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub tokens: Arc<TokenService>,
    pub mailer: Arc<dyn EmailSender>,
    pub rate_limit: RateLimitState,
    pub password_policy: PasswordPolicy,
    pub password_hash_cost: u32,
    pub default_role: String,
    pub password_reset_expiry_secs: i64,
    pub metrics: MetricsState,
}

impl AppState {
    /// Builds the shared state. Emails go to the log until a sender is
    /// supplied with [`AppState::with_mailer`].
    pub fn new(db_pool: DbPool, config: &Config) -> Result<Self, TokenError> {
        let rate_limit = if config.security.rate_limiting_enabled {
            RateLimitState::with_config(
                RateLimitConfig::new(config.security.rate_limit_requests_per_minute, 60),
                RateLimitConfig::strict(),
            )
        } else {
            RateLimitState::disabled()
        };

        let tokens = TokenService::from_config(&config.jwt, &config.server.environment)?;

        let password_policy = if config.security.require_password_complexity {
            PasswordPolicy::complex(config.security.min_password_length)
        } else {
            PasswordPolicy {
                min_length: config.security.min_password_length,
                ..Default::default()
            }
        };

        Ok(Self {
            db_pool,
            tokens: Arc::new(tokens),
            mailer: Arc::new(LogEmailSender::new(&config.email, &config.server.environment)),
            rate_limit,
            password_policy,
            password_hash_cost: config.security.password_hash_cost,
            default_role: config.security.default_role.clone(),
            password_reset_expiry_secs: config.security.password_reset_expiry_secs,
            metrics: MetricsState::new(config.telemetry.metrics_enabled),
        })
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn EmailSender>) -> Self {
        self.mailer = mailer;
        self
    }
}

/// Per-handler `require_permission` layer.
macro_rules! needs {
    ($resource:literal, $action:literal) => {
        axum_middleware::from_fn_with_state(
            PermissionRequirement::new($resource, $action),
            require_permission,
        )
    };
}

fn api_routes(state: &AppState) -> Router<AppState> {
    use handlers::{auth, permissions, roles, users};

    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh-token", post(auth::refresh_token))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/auth/verify-email", post(auth::verify_email))
        .route("/auth/resend-verification", post(auth::resend_verification))
        .layer(axum_middleware::from_fn(auth_rate_limit_middleware));

    let authenticated = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/profile", get(auth::profile))
        .route("/users/profile", get(users::get_profile))
        .route("/users/password", patch(users::change_password))
        .route(
            "/users",
            get(users::list_users.layer(needs!("user", "view")))
                .post(users::create_user.layer(needs!("user", "create"))),
        )
        .route(
            "/users/{id}",
            get(users::get_user.layer(needs!("user", "view")))
                .put(users::update_user.layer(needs!("user", "update")))
                .delete(users::delete_user.layer(needs!("user", "delete"))),
        )
        .route(
            "/roles",
            get(roles::list_roles.layer(needs!("role", "view")))
                .post(roles::create_role.layer(needs!("role", "create"))),
        )
        .route(
            "/roles/{id}",
            get(roles::get_role.layer(needs!("role", "view")))
                .put(roles::update_role.layer(needs!("role", "update")))
                .delete(roles::delete_role.layer(needs!("role", "delete"))),
        )
        .route(
            "/permissions",
            get(permissions::list_permissions.layer(needs!("permission", "view")))
                .post(permissions::create_permission.layer(needs!("permission", "create"))),
        )
        .route(
            "/permissions/batch",
            post(permissions::batch_create_permissions.layer(needs!("permission", "create"))),
        )
        .route(
            "/permissions/{id}",
            get(permissions::get_permission.layer(needs!("permission", "view")))
                .put(permissions::update_permission.layer(needs!("permission", "update")))
                .delete(permissions::delete_permission.layer(needs!("permission", "delete"))),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    public.merge(authenticated)
}

pub fn create_router(state: AppState, config: &Config) -> Router {
    let cors = build_cors_layer(config);
    let body_limit = RequestBodyLimitLayer::new(config.server.max_body_size);

    #[allow(deprecated)]
    let timeout = TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let rate_limit_state = state.rate_limit.clone();

    let metrics_state = state.metrics.clone();
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check_simple))
        .route("/health/status", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::ready_check))
        .route("/health/live", get(handlers::health::live_check))
        .route(
            "/metrics",
            get(telemetry::metrics::metrics_handler).with_state(metrics_state),
        )
        .with_state(state.clone());

    let api = api_routes(&state).with_state(state);
    let prefix = config.server.api_prefix.trim_end_matches('/');

    let router = Router::new()
        .merge(openapi::swagger_router())
        .merge(public_routes);

    let router = if prefix.is_empty() {
        router.merge(api)
    } else {
        router.nest(prefix, api)
    };

    let router = router
        .fallback(fallback_handler)
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(axum_middleware::from_fn(rate_limit_middleware))
        .layer(axum::Extension(rate_limit_state));

    let router = if config.server.environment.is_production() {
        router.layer(axum_middleware::from_fn(error::mask_internal_errors))
    } else {
        router
    };

    router
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(trace_layer)
        .layer(timeout)
        .layer(body_limit)
        .layer(cors)
}

async fn fallback_handler() -> (StatusCode, ApiResponse<()>) {
    (
        StatusCode::NOT_FOUND,
        ApiResponse::failure("Route not found", Vec::new(), None),
    )
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    use axum::http::header::HeaderName;
    use axum::http::Method;

    let is_wildcard_origin = config.cors.allowed_origins.iter().any(|o| o == "*")
        || config.cors.allowed_origins.is_empty();

    let methods: Vec<Method> = config
        .cors
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();

    let headers: Vec<HeaderName> = config
        .cors
        .allowed_headers
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect();

    let origins = || -> Vec<_> {
        config
            .cors
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect()
    };

    let cors = match (config.cors.allow_credentials, is_wildcard_origin) {
        (true, true) => CorsLayer::new()
            .allow_origin(tower_http::cors::AllowOrigin::mirror_request())
            .allow_credentials(true),
        (true, false) => CorsLayer::new()
            .allow_origin(origins())
            .allow_credentials(true),
        (false, true) => CorsLayer::new().allow_origin(Any),
        (false, false) => CorsLayer::new().allow_origin(origins()),
    };

    cors.allow_methods(methods)
        .allow_headers(headers)
        .max_age(Duration::from_secs(config.cors.max_age_secs))
}

pub fn init_tracing(config: &Config) {
    telemetry::init_telemetry(config);
}
