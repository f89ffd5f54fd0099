//! Authentication handlers.

use axum::{extract::State, http::StatusCode, Extension};
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{secure_token, AuthenticatedUser, PasswordService},
    db::with_conn,
    email,
    error::{ApiError, ApiResult},
    extract::ValidatedJson,
    models::{NewUser, User},
    response::{ApiResponse, MessageResponse},
    store::users::{self as user_store, normalize_email, InitialRoles},
    telemetry::{record_auth_attempt, AuthOutcome},
    AppState,
};

pub const INVALID_CREDENTIALS: &str = "Invalid credentials";
pub const EMAIL_NOT_VERIFIED: &str = "Please verify your email before logging in";
const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent.";

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(
        length(min = 1, message = "Email is required"),
        email(message = "Please provide a valid email address")
    )]
    #[schema(example = "alice@example.com")]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "Passw0rd!")]
    pub password: String,
    #[validate(length(
        min = 1,
        max = 50,
        message = "First name must be between 1 and 50 characters"
    ))]
    #[schema(example = "Alice")]
    pub first_name: String,
    #[validate(length(
        min = 1,
        max = 50,
        message = "Last name must be between 1 and 50 characters"
    ))]
    #[schema(example = "Nightingale")]
    pub last_name: String,
    #[validate(length(max = 20, message = "Phone number must not exceed 20 characters"))]
    #[schema(example = "+2348012345678")]
    pub phone: Option<String>,
    #[schema(example = "1990-05-12")]
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(
        length(min = 1, message = "Email is required"),
        email(message = "Please provide a valid email address")
    )]
    #[schema(example = "alice@example.com")]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters long"))]
    #[schema(example = "Passw0rd!")]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ForgotPasswordRequest {
    #[validate(
        length(min = 1, message = "Email is required"),
        email(message = "Please provide a valid email address")
    )]
    #[schema(example = "alice@example.com")]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "Reset token is required"))]
    pub token: String,
    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "N3wPassw0rd!")]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyEmailRequest {
    #[validate(length(min = 1, message = "Verification token is required"))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResendVerificationRequest {
    #[validate(
        length(min = 1, message = "Email is required"),
        email(message = "Please provide a valid email address")
    )]
    #[schema(example = "alice@example.com")]
    pub email: String,
}

/// Public view of a user row. Never carries hashes or tokens.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    #[schema(example = "alice@example.com")]
    pub email: String,
    #[schema(example = "Alice")]
    pub first_name: String,
    #[schema(example = "Nightingale")]
    pub last_name: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub is_active: bool,
    pub email_verified: bool,
    pub last_login_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            email_verified: user.is_email_verified(),
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            phone: user.phone,
            date_of_birth: user.date_of_birth,
            is_active: user.is_active,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginData {
    pub user: AuthenticatedUser,
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    #[schema(example = 3600)]
    pub expires_in: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshData {
    pub access_token: String,
    #[schema(example = 3600)]
    pub expires_in: i64,
}

fn issue_access_token(state: &AppState, principal: &AuthenticatedUser) -> ApiResult<String> {
    Ok(state.tokens.issue_access_token(
        principal.id,
        &principal.email,
        principal.role_names(),
        principal.permission_keys(),
    )?)
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Authentication",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registration successful", body = ApiResponse<UserResponse>),
        (status = 400, description = "Validation error", body = MessageResponse),
        (status = 409, description = "User already exists", body = MessageResponse),
        (status = 500, description = "Internal server error", body = MessageResponse)
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RegisterRequest>,
) -> ApiResult<(StatusCode, ApiResponse<UserResponse>)> {
    state
        .password_policy
        .check_field("password", &payload.password)?;

    let password_hash = PasswordService::hash(payload.password, state.password_hash_cost).await?;
    let (verification_token, verification_digest) = secure_token::generate_pair();

    let new_user = NewUser {
        email: normalize_email(&payload.email),
        password_hash,
        first_name: payload.first_name.trim().to_string(),
        last_name: payload.last_name.trim().to_string(),
        phone: payload.phone,
        date_of_birth: payload.date_of_birth,
        email_verified_at: None,
        email_verification_token: Some(verification_digest),
    };

    let default_role = state.default_role.clone();
    let user = with_conn(&state.db_pool, move |conn| {
        user_store::create(conn, &new_user, InitialRoles::Default(&default_role))
    })
    .await?;

    info!(user_id = %user.id, email = %user.email, "User registered");
    record_auth_attempt("register", AuthOutcome::Success);

    email::log_failure(
        "verification",
        &user.email,
        state
            .mailer
            .send_verification_email(&user.email, &verification_token, &user.first_name)
            .await,
    );

    Ok(ApiResponse::created(
        "Registration successful. Please check your email to verify your account.",
        user.into(),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Authentication",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = ApiResponse<LoginData>),
        (status = 400, description = "Validation error", body = MessageResponse),
        (status = 401, description = "Invalid credentials or unverified email", body = MessageResponse),
        (status = 500, description = "Internal server error", body = MessageResponse)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<LoginRequest>,
) -> ApiResult<ApiResponse<LoginData>> {
    let email = normalize_email(&payload.email);
    let found = with_conn(&state.db_pool, move |conn| {
        match user_store::find_by_email(conn, &email)? {
            Some(user) => {
                let principal = user_store::principal_for(conn, &user)?;
                Ok(Some((user, principal)))
            }
            None => Ok(None),
        }
    })
    .await?;

    let stored_hash = found.as_ref().map(|(user, _)| user.password_hash.clone());
    let password_matches = PasswordService::verify(payload.password, stored_hash).await?;

    let (user, principal) = match found {
        Some((user, principal)) if password_matches && user.is_active => (user, principal),
        Some((user, _)) if password_matches => {
            warn!(user_id = %user.id, "Login attempt for inactive user");
            record_auth_attempt("login", AuthOutcome::AccountInactive);
            return Err(ApiError::unauthorized(INVALID_CREDENTIALS));
        }
        Some((user, _)) => {
            warn!(user_id = %user.id, "Failed login attempt - invalid password");
            record_auth_attempt("login", AuthOutcome::InvalidCredentials);
            return Err(ApiError::unauthorized(INVALID_CREDENTIALS));
        }
        None => {
            warn!(email = %normalize_email(&payload.email), "Login attempt for unknown email");
            record_auth_attempt("login", AuthOutcome::InvalidCredentials);
            return Err(ApiError::unauthorized(INVALID_CREDENTIALS));
        }
    };

    if !user.is_email_verified() {
        warn!(user_id = %user.id, "Login attempt before email verification");
        record_auth_attempt("login", AuthOutcome::EmailUnverified);
        return Err(ApiError::unauthorized(EMAIL_NOT_VERIFIED));
    }

    let user_id = user.id;
    with_conn(&state.db_pool, move |conn| user_store::record_login(conn, user_id)).await?;

    let access_token = issue_access_token(&state, &principal)?;
    let refresh_token = state.tokens.issue_refresh_token(user_id)?;

    info!(user_id = %user_id, roles = ?principal.role_names(), "User logged in");
    record_auth_attempt("login", AuthOutcome::Success);

    Ok(ApiResponse::success(
        "Login successful",
        LoginData {
            user: principal,
            access_token,
            refresh_token,
            expires_in: state.tokens.access_token_expiry,
        },
    ))
}

#[utoipa::path(
    post,
    path = "/auth/refresh-token",
    tag = "Authentication",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "Token refreshed", body = ApiResponse<RefreshData>),
        (status = 400, description = "Validation error", body = MessageResponse),
        (status = 401, description = "Invalid refresh token", body = MessageResponse)
    )
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RefreshTokenRequest>,
) -> ApiResult<ApiResponse<RefreshData>> {
    let claims = state
        .tokens
        .verify_refresh_token(&payload.refresh_token)
        .map_err(|e| {
            warn!(error = %e, "Refresh token rejected");
            record_auth_attempt("refresh", AuthOutcome::InvalidToken);
            ApiError::unauthorized("Invalid refresh token")
        })?;

    let user_id = claims.sub;
    let loaded = with_conn(&state.db_pool, move |conn| {
        user_store::load_principal(conn, user_id)
    })
    .await?;

    let principal = match loaded {
        Some((user, principal)) if user.is_active => principal,
        _ => {
            warn!(user_id = %user_id, "Refresh for missing or inactive user");
            record_auth_attempt("refresh", AuthOutcome::AccountInactive);
            return Err(ApiError::unauthorized("User not found or inactive"));
        }
    };

    let access_token = issue_access_token(&state, &principal)?;
    record_auth_attempt("refresh", AuthOutcome::Success);

    Ok(ApiResponse::success(
        "Token refreshed successfully",
        RefreshData {
            access_token,
            expires_in: state.tokens.access_token_expiry,
        },
    ))
}

#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    tag = "Authentication",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset requested. Identical whether or not the account exists", body = MessageResponse),
        (status = 400, description = "Validation error", body = MessageResponse)
    )
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<ForgotPasswordRequest>,
) -> ApiResult<ApiResponse<()>> {
    let email = normalize_email(&payload.email);
    let lookup = email.clone();
    let Some(user) = with_conn(&state.db_pool, move |conn| {
        user_store::find_active_by_email(conn, &lookup)
    })
    .await?
    else {
        warn!(email = %email, "Password reset requested for unknown email");
        return Ok(ApiResponse::message(FORGOT_PASSWORD_MESSAGE));
    };

    let (reset_token, reset_digest) = secure_token::generate_pair();
    let expires_at = (Utc::now() + Duration::seconds(state.password_reset_expiry_secs)).naive_utc();

    let user_id = user.id;
    with_conn(&state.db_pool, move |conn| {
        user_store::set_reset_token(conn, user_id, &reset_digest, expires_at)
    })
    .await?;

    info!(user_id = %user.id, "Password reset requested");

    email::log_failure(
        "password_reset",
        &user.email,
        state
            .mailer
            .send_password_reset_email(&user.email, &reset_token, &user.first_name)
            .await,
    );

    Ok(ApiResponse::message(FORGOT_PASSWORD_MESSAGE))
}

#[utoipa::path(
    post,
    path = "/auth/reset-password",
    tag = "Authentication",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "Invalid or expired token, or weak password", body = MessageResponse)
    )
)]
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<ResetPasswordRequest>,
) -> ApiResult<ApiResponse<()>> {
    state
        .password_policy
        .check_field("password", &payload.password)?;

    let digest = secure_token::hash_token(&payload.token);
    let lookup = digest.clone();
    let user = with_conn(&state.db_pool, move |conn| {
        user_store::find_active_by_reset_token(conn, &lookup)
    })
    .await?
    .ok_or_else(|| ApiError::validation("Invalid or expired reset token"))?;

    let now = Utc::now().naive_utc();
    if !matches!(user.password_reset_expires_at, Some(expires) if expires >= now) {
        warn!(user_id = %user.id, "Expired password reset token used");
        return Err(ApiError::validation("Reset token has expired"));
    }

    let password_hash = PasswordService::hash(payload.password, state.password_hash_cost).await?;
    let user_id = with_conn(&state.db_pool, move |conn| {
        user_store::complete_password_reset(conn, &digest, &password_hash)
    })
    .await?
    .ok_or_else(|| {
        warn!(user_id = %user.id, "Password reset token consumed by a concurrent request");
        ApiError::validation("Invalid or expired reset token")
    })?;

    info!(user_id = %user_id, "Password reset completed");

    Ok(ApiResponse::message("Password reset successful"))
}

#[utoipa::path(
    post,
    path = "/auth/verify-email",
    tag = "Authentication",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = ApiResponse<UserResponse>),
        (status = 400, description = "Invalid token or already verified", body = MessageResponse)
    )
)]
pub async fn verify_email(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<VerifyEmailRequest>,
) -> ApiResult<ApiResponse<UserResponse>> {
    let digest = secure_token::hash_token(&payload.token);
    let lookup = digest.clone();
    let user = with_conn(&state.db_pool, move |conn| {
        user_store::find_active_by_verification_token(conn, &lookup)
    })
    .await?
    .ok_or_else(|| ApiError::validation("Invalid verification token"))?;

    if user.is_email_verified() {
        return Err(ApiError::validation("Email is already verified"));
    }

    let user = with_conn(&state.db_pool, move |conn| {
        user_store::mark_email_verified(conn, &digest)
    })
    .await?
    .ok_or_else(|| ApiError::validation("Invalid verification token"))?;

    info!(user_id = %user.id, "Email verified");

    email::log_failure(
        "welcome",
        &user.email,
        state
            .mailer
            .send_welcome_email(&user.email, &user.first_name)
            .await,
    );

    Ok(ApiResponse::success("Email verified successfully", user.into()))
}

#[utoipa::path(
    post,
    path = "/auth/resend-verification",
    tag = "Authentication",
    request_body = ResendVerificationRequest,
    responses(
        (status = 200, description = "Verification email sent", body = MessageResponse),
        (status = 400, description = "Already verified", body = MessageResponse),
        (status = 404, description = "User not found", body = MessageResponse)
    )
)]
pub async fn resend_verification(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<ResendVerificationRequest>,
) -> ApiResult<ApiResponse<()>> {
    let email = normalize_email(&payload.email);
    let user = with_conn(&state.db_pool, move |conn| {
        user_store::find_active_by_email(conn, &email)
    })
    .await?
    .ok_or_else(|| ApiError::not_found(user_store::NOT_FOUND_MESSAGE))?;

    if user.is_email_verified() {
        return Err(ApiError::validation("Email is already verified"));
    }

    let (verification_token, verification_digest) = secure_token::generate_pair();
    let user_id = user.id;
    with_conn(&state.db_pool, move |conn| {
        user_store::set_verification_token(conn, user_id, &verification_digest)
    })
    .await?;

    email::log_failure(
        "verification",
        &user.email,
        state
            .mailer
            .send_verification_email(&user.email, &verification_token, &user.first_name)
            .await,
    );

    Ok(ApiResponse::message("Verification email sent successfully"))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Authentication",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout(Extension(user): Extension<AuthenticatedUser>) -> ApiResponse<()> {
    info!(user_id = %user.id, "User logged out");
    ApiResponse::message("Logged out successfully")
}

#[utoipa::path(
    get,
    path = "/auth/profile",
    tag = "Authentication",
    responses(
        (status = 200, description = "Current principal", body = ApiResponse<AuthenticatedUser>),
        (status = 401, description = "Unauthorized", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn profile(
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResponse<AuthenticatedUser> {
    ApiResponse::success("Profile retrieved successfully", user)
}
