//! Request middleware.

pub mod auth;
pub mod metrics;
pub mod rate_limit;
pub mod rbac;
pub mod request_id;

pub use auth::{auth_middleware, optional_auth_middleware};
pub use metrics::metrics_middleware;
pub use rate_limit::{
    auth_rate_limit_middleware, rate_limit_middleware, RateLimitConfig, RateLimitState,
};
pub use rbac::{
    require_any_permission, require_permission, require_role, AnyPermissionRequirement,
    PermissionRequirement, RoleRequirement,
};
pub use request_id::{request_id_middleware, RequestId, REQUEST_ID_HEADER};
