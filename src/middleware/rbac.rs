//! Role and permission guards.
//!
//! Guards run after [`super::auth::auth_middleware`] and read the principal it
//! attached. Attach them with `from_fn_with_state(requirement, guard)`.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::{auth::AuthenticatedUser, error::ApiError, telemetry::record_permission_check};

const FORBIDDEN_MESSAGE: &str = "Insufficient permissions";

#[derive(Debug, Clone)]
pub struct RoleRequirement(Arc<[&'static str]>);

impl RoleRequirement {
    pub fn any_of(roles: &[&'static str]) -> Self {
        Self(Arc::from(roles))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PermissionRequirement {
    pub resource: &'static str,
    pub action: &'static str,
}

impl PermissionRequirement {
    pub const fn new(resource: &'static str, action: &'static str) -> Self {
        Self { resource, action }
    }
}

#[derive(Debug, Clone)]
pub struct AnyPermissionRequirement(Arc<[(&'static str, &'static str)]>);

impl AnyPermissionRequirement {
    pub fn any_of(pairs: &[(&'static str, &'static str)]) -> Self {
        Self(Arc::from(pairs))
    }
}

fn principal(req: &Request) -> Result<&AuthenticatedUser, ApiError> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))
}

fn decide(
    guard: &'static str,
    user: &AuthenticatedUser,
    started: Instant,
    granted: bool,
    required: &str,
) -> Result<(), ApiError> {
    record_permission_check(guard, granted, started.elapsed());
    if granted {
        Ok(())
    } else {
        warn!(user_id = %user.id, guard, required, "Access denied");
        Err(ApiError::forbidden(FORBIDDEN_MESSAGE))
    }
}

pub async fn require_role(
    State(requirement): State<RoleRequirement>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let user = principal(&req)?;
    let granted = user.has_role(&requirement.0);
    decide("role", user, started, granted, &requirement.0.join(","))?;
    Ok(next.run(req).await)
}

pub async fn require_permission(
    State(requirement): State<PermissionRequirement>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let user = principal(&req)?;
    let granted = user.has_permission(requirement.resource, requirement.action);
    let required = format!("{}:{}", requirement.resource, requirement.action);
    decide("permission", user, started, granted, &required)?;
    Ok(next.run(req).await)
}

pub async fn require_any_permission(
    State(requirement): State<AnyPermissionRequirement>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let user = principal(&req)?;
    let granted = user.has_any_permission(&requirement.0);
    let required = requirement
        .0
        .iter()
        .map(|(r, a)| format!("{r}:{a}"))
        .collect::<Vec<_>>()
        .join(",");
    decide("any_permission", user, started, granted, &required)?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{PrincipalPermission, PrincipalRole};
    use axum::{
        body::Body, http::StatusCode, middleware::from_fn_with_state, routing::get, Router,
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    fn nurse() -> AuthenticatedUser {
        AuthenticatedUser {
            id: Uuid::new_v4(),
            email: "nurse@example.com".to_string(),
            first_name: "Florence".to_string(),
            last_name: "Ward".to_string(),
            roles: vec![PrincipalRole {
                id: Uuid::new_v4(),
                name: "NURSE".to_string(),
                permissions: vec![PrincipalPermission {
                    id: Uuid::new_v4(),
                    name: "Read patients".to_string(),
                    resource: "patient".to_string(),
                    action: "read".to_string(),
                }],
            }],
            is_active: true,
        }
    }

    async fn status_for(router: Router, user: Option<AuthenticatedUser>) -> StatusCode {
        let mut request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        if let Some(user) = user {
            request.extensions_mut().insert(user);
        }
        router.oneshot(request).await.unwrap().status()
    }

    fn guarded_by_permission(resource: &'static str, action: &'static str) -> Router {
        Router::new().route("/", get(|| async { "ok" })).layer(from_fn_with_state(
            PermissionRequirement::new(resource, action),
            require_permission,
        ))
    }

    #[tokio::test]
    async fn test_permission_guard() {
        assert_eq!(
            status_for(guarded_by_permission("patient", "read"), Some(nurse())).await,
            StatusCode::OK
        );
        assert_eq!(
            status_for(guarded_by_permission("patient", "write"), Some(nurse())).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(guarded_by_permission("patient", "read"), None).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_role_guard() {
        let router = |roles: &[&'static str]| {
            Router::new().route("/", get(|| async { "ok" })).layer(from_fn_with_state(
                RoleRequirement::any_of(roles),
                require_role,
            ))
        };

        assert_eq!(
            status_for(router(&["DOCTOR", "NURSE"]), Some(nurse())).await,
            StatusCode::OK
        );
        assert_eq!(
            status_for(router(&["SUPER_ADMIN"]), Some(nurse())).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(status_for(router(&["NURSE"]), None).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_any_permission_guard() {
        let router = |pairs: &[(&'static str, &'static str)]| {
            Router::new().route("/", get(|| async { "ok" })).layer(from_fn_with_state(
                AnyPermissionRequirement::any_of(pairs),
                require_any_permission,
            ))
        };

        assert_eq!(
            status_for(
                router(&[("billing", "view"), ("patient", "read")]),
                Some(nurse())
            )
            .await,
            StatusCode::OK
        );
        assert_eq!(
            status_for(router(&[("billing", "view")]), Some(nurse())).await,
            StatusCode::FORBIDDEN
        );
    }
}
