//! User self-service and user administration handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{AuthenticatedUser, PasswordService, PrincipalRole},
    db::with_conn,
    error::{ApiError, ApiResult},
    extract::ValidatedJson,
    handlers::auth::UserResponse,
    models::{NewUser, UserChanges},
    pagination::{PaginatedResponse, PaginationParams, SortOrder},
    response::{ApiResponse, MessageResponse},
    store::users::{self as user_store, normalize_email, InitialRoles, UserFilter},
    AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    #[validate(length(min = 1, message = "New password is required"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateUserRequest {
    #[validate(
        length(min = 1, message = "Email is required"),
        email(message = "Please provide a valid email address")
    )]
    #[schema(example = "dr.okafor@kadacare.example")]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    #[validate(length(min = 1, max = 50, message = "First name must be between 1 and 50 characters"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 50, message = "Last name must be between 1 and 50 characters"))]
    pub last_name: String,
    #[validate(length(max = 20, message = "Phone number must not exceed 20 characters"))]
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    /// Roles to assign. The default role is used when omitted.
    pub role_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 50, message = "First name must be between 1 and 50 characters"))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 50, message = "Last name must be between 1 and 50 characters"))]
    pub last_name: Option<String>,
    #[validate(length(max = 20, message = "Phone number must not exceed 20 characters"))]
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub is_active: Option<bool>,
    /// Replaces the user's roles when present.
    pub role_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserListQuery {
    /// Case-insensitive match on names or email.
    pub search: Option<String>,
    pub is_active: Option<bool>,
    /// Only users holding this role name.
    pub role: Option<String>,
    #[serde(default)]
    #[param(inline)]
    pub sort_order: SortOrder,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserDetailResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub roles: Vec<PrincipalRole>,
}

#[utoipa::path(
    get,
    path = "/users/profile",
    tag = "Users",
    responses(
        (status = 200, description = "Current user with roles", body = ApiResponse<UserDetailResponse>),
        (status = 401, description = "Unauthorized", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(current): Extension<AuthenticatedUser>,
) -> ApiResult<ApiResponse<UserDetailResponse>> {
    let detail = load_detail(&state, current.id).await?;
    Ok(ApiResponse::success("Profile retrieved successfully", detail))
}

#[utoipa::path(
    patch,
    path = "/users/password",
    tag = "Users",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "New password violates the policy", body = MessageResponse),
        (status = 401, description = "Current password is incorrect", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    Extension(current): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<ChangePasswordRequest>,
) -> ApiResult<ApiResponse<()>> {
    state
        .password_policy
        .check_field("new_password", &payload.new_password)?;

    let user_id = current.id;
    let user = with_conn(&state.db_pool, move |conn| user_store::find_by_id(conn, user_id))
        .await?
        .ok_or_else(|| ApiError::not_found(user_store::NOT_FOUND_MESSAGE))?;

    if !PasswordService::verify(payload.current_password, Some(user.password_hash)).await? {
        warn!(user_id = %user_id, "Password change with wrong current password");
        return Err(ApiError::unauthorized("Current password is incorrect"));
    }

    let password_hash =
        PasswordService::hash(payload.new_password, state.password_hash_cost).await?;
    with_conn(&state.db_pool, move |conn| {
        user_store::set_password(conn, user_id, &password_hash)
    })
    .await?;

    info!(user_id = %user_id, "Password changed");

    Ok(ApiResponse::message("Password changed successfully"))
}

#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    params(PaginationParams, UserListQuery),
    responses(
        (status = 200, description = "Paginated list of users", body = ApiResponse<PaginatedResponse<UserResponse>>),
        (status = 403, description = "Missing user:view", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(query): Query<UserListQuery>,
) -> ApiResult<ApiResponse<PaginatedResponse<UserResponse>>> {
    let filter = UserFilter {
        search: query.search,
        is_active: query.is_active,
        role: query.role,
        sort_order: query.sort_order,
    };

    let params = pagination.clone();
    let (users, total) =
        with_conn(&state.db_pool, move |conn| user_store::list(conn, &filter, &params)).await?;

    let items = users.into_iter().map(UserResponse::from).collect();

    Ok(ApiResponse::success(
        "Users retrieved successfully",
        PaginatedResponse::from_params(items, &pagination, total),
    ))
}

#[utoipa::path(
    post,
    path = "/users",
    tag = "Users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created with a verified email", body = ApiResponse<UserDetailResponse>),
        (status = 400, description = "Validation error or unknown role ids", body = MessageResponse),
        (status = 409, description = "User already exists", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_user(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<CreateUserRequest>,
) -> ApiResult<(StatusCode, ApiResponse<UserDetailResponse>)> {
    state
        .password_policy
        .check_field("password", &payload.password)?;

    let password_hash = PasswordService::hash(payload.password, state.password_hash_cost).await?;

    let new_user = NewUser {
        email: normalize_email(&payload.email),
        password_hash,
        first_name: payload.first_name.trim().to_string(),
        last_name: payload.last_name.trim().to_string(),
        phone: payload.phone,
        date_of_birth: payload.date_of_birth,
        email_verified_at: Some(Utc::now().naive_utc()),
        email_verification_token: None,
    };
    let role_ids = payload.role_ids;
    let default_role = state.default_role.clone();

    let (user, principal) = with_conn(&state.db_pool, move |conn| {
        let initial = match role_ids.as_deref() {
            Some(ids) => InitialRoles::Explicit(ids),
            None => InitialRoles::Default(&default_role),
        };
        let user = user_store::create(conn, &new_user, initial)?;
        let principal = user_store::principal_for(conn, &user)?;
        Ok((user, principal))
    })
    .await?;

    info!(actor_id = %actor.id, user_id = %user.id, roles = ?principal.role_names(), "User created");

    Ok(ApiResponse::created(
        "User created successfully",
        UserDetailResponse {
            user: user.into(),
            roles: principal.roles,
        },
    ))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User with roles", body = ApiResponse<UserDetailResponse>),
        (status = 404, description = "User not found", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApiResponse<UserDetailResponse>> {
    let detail = load_detail(&state, id).await?;
    Ok(ApiResponse::success("User retrieved successfully", detail))
}

#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = ApiResponse<UserDetailResponse>),
        (status = 400, description = "Validation error or unknown role ids", body = MessageResponse),
        (status = 404, description = "User not found", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_user(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<UpdateUserRequest>,
) -> ApiResult<ApiResponse<UserDetailResponse>> {
    let changes = UserChanges {
        first_name: payload.first_name.map(|n| n.trim().to_string()),
        last_name: payload.last_name.map(|n| n.trim().to_string()),
        phone: payload.phone,
        date_of_birth: payload.date_of_birth,
        is_active: payload.is_active,
        updated_at: None,
    };
    let role_ids = payload.role_ids;

    let (user, principal) = with_conn(&state.db_pool, move |conn| {
        let user = user_store::update(conn, id, changes, role_ids.as_deref())?;
        let principal = user_store::principal_for(conn, &user)?;
        Ok((user, principal))
    })
    .await?;

    info!(actor_id = %actor.id, user_id = %user.id, "User updated");

    Ok(ApiResponse::success(
        "User updated successfully",
        UserDetailResponse {
            user: user.into(),
            roles: principal.roles,
        },
    ))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deactivated", body = MessageResponse),
        (status = 400, description = "Cannot deactivate own account", body = MessageResponse),
        (status = 404, description = "User not found", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApiResponse<()>> {
    if actor.id == id {
        return Err(ApiError::validation("You cannot delete your own account"));
    }

    let user = with_conn(&state.db_pool, move |conn| user_store::soft_delete(conn, id)).await?;

    info!(actor_id = %actor.id, user_id = %user.id, "User deactivated");

    Ok(ApiResponse::message("User deleted successfully"))
}

async fn load_detail(state: &AppState, id: Uuid) -> ApiResult<UserDetailResponse> {
    let (user, principal) = with_conn(&state.db_pool, move |conn| {
        user_store::load_principal(conn, id)
    })
    .await?
    .ok_or_else(|| ApiError::not_found(user_store::NOT_FOUND_MESSAGE))?;

    Ok(UserDetailResponse {
        user: user.into(),
        roles: principal.roles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_user_request_validation() {
        let request = UpdateUserRequest {
            first_name: Some(String::new()),
            last_name: None,
            phone: Some("1".repeat(21)),
            date_of_birth: None,
            is_active: None,
            role_ids: None,
        };
        let errors = crate::error::flatten_validation_errors(&request.validate().unwrap_err());
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["first_name", "phone"]);
    }

    #[test]
    fn test_change_password_requires_both_fields() {
        let request = ChangePasswordRequest {
            current_password: String::new(),
            new_password: String::new(),
        };
        let errors = crate::error::flatten_validation_errors(&request.validate().unwrap_err());
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "Current password is required");
    }
}
