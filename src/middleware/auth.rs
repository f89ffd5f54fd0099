//! Authentication middleware.
//!
//! The token only proves identity. Roles and permissions attached to the
//! request are reloaded from the database on every call.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::{
    auth::AuthenticatedUser,
    db::with_conn,
    error::{ApiError, ApiResult},
    store::users as user_store,
    telemetry::{record_auth_attempt, AuthOutcome},
    AppState,
};

fn bearer_token(headers: &HeaderMap) -> ApiResult<String> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Access token is required"))?;

    match value.strip_prefix("Bearer ").map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(ApiError::unauthorized("Invalid authorization header format")),
    }
}

/// Verifies the token and loads the current principal.
pub async fn authenticate(state: &AppState, token: &str) -> ApiResult<AuthenticatedUser> {
    let claims = state.tokens.verify_access_token(token).map_err(|e| {
        debug!(error = %e, "Access token rejected");
        record_auth_attempt("access_token", AuthOutcome::InvalidToken);
        ApiError::unauthorized("Invalid or expired token")
    })?;

    let user_id = claims.sub;
    let loaded = with_conn(&state.db_pool, move |conn| {
        user_store::load_principal(conn, user_id)
    })
    .await?;

    match loaded {
        Some((user, principal)) if user.is_active => Ok(principal),
        Some(_) => {
            warn!(user_id = %user_id, "Token presented for inactive user");
            record_auth_attempt("access_token", AuthOutcome::AccountInactive);
            Err(ApiError::unauthorized("User account is inactive"))
        }
        None => {
            warn!(user_id = %user_id, "Token presented for unknown user");
            record_auth_attempt("access_token", AuthOutcome::InvalidToken);
            Err(ApiError::unauthorized("User not found"))
        }
    }
}

/// Requires a valid bearer token and stores the principal in request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())?;
    let principal = authenticate(&state, &token).await?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Like [`auth_middleware`] but lets the request through unauthenticated
/// when the token is missing or invalid.
pub async fn optional_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Ok(token) = bearer_token(req.headers()) {
        match authenticate(&state, &token).await {
            Ok(principal) => {
                req.extensions_mut().insert(principal);
            }
            Err(e) => debug!(error = %e, "Optional authentication skipped"),
        }
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def");
    }
}
