//! Role administration handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthenticatedUser,
    db::with_conn,
    error::ApiResult,
    extract::ValidatedJson,
    models::{NewRole, Permission, Role, RoleChanges},
    pagination::{PaginatedResponse, PaginationParams, SortOrder},
    response::{ApiResponse, MessageResponse},
    store::roles::{self as role_store, RoleFilter},
    AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 100, message = "Role name must be between 1 and 100 characters"))]
    #[schema(example = "NURSE")]
    pub name: String,
    #[validate(length(max = 255, message = "Description cannot exceed 255 characters"))]
    #[schema(example = "Ward nursing staff")]
    pub description: Option<String>,
    pub permission_ids: Option<Vec<Uuid>>,
    pub is_system_role: Option<bool>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateRoleRequest {
    #[validate(length(min = 1, max = 100, message = "Role name must be between 1 and 100 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 255, message = "Description cannot exceed 255 characters"))]
    pub description: Option<String>,
    /// Replaces the role's permission set when present.
    pub permission_ids: Option<Vec<Uuid>>,
    pub is_system_role: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RoleListQuery {
    /// Case-insensitive match on name or description.
    pub search: Option<String>,
    pub is_active: Option<bool>,
    #[serde(default)]
    #[param(inline)]
    pub sort_order: SortOrder,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoleResponse {
    pub id: Uuid,
    #[schema(example = "NURSE")]
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub is_system_role: bool,
    pub permissions: Vec<Permission>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl RoleResponse {
    fn new(role: Role, permissions: Vec<Permission>) -> Self {
        Self {
            id: role.id,
            name: role.name,
            description: role.description,
            is_active: role.is_active,
            is_system_role: role.is_system_role,
            permissions,
            created_at: role.created_at,
            updated_at: role.updated_at,
        }
    }
}

impl From<(Role, Vec<Permission>)> for RoleResponse {
    fn from((role, permissions): (Role, Vec<Permission>)) -> Self {
        Self::new(role, permissions)
    }
}

#[utoipa::path(
    get,
    path = "/roles",
    tag = "Roles",
    params(PaginationParams, RoleListQuery),
    responses(
        (status = 200, description = "Paginated list of roles", body = ApiResponse<PaginatedResponse<RoleResponse>>),
        (status = 401, description = "Unauthorized", body = MessageResponse),
        (status = 403, description = "Missing role:view", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(query): Query<RoleListQuery>,
) -> ApiResult<ApiResponse<PaginatedResponse<RoleResponse>>> {
    let filter = RoleFilter {
        search: query.search,
        is_active: query.is_active,
        sort_order: query.sort_order,
    };

    let params = pagination.clone();
    let (rows, total) =
        with_conn(&state.db_pool, move |conn| role_store::list(conn, &filter, &params)).await?;

    let items = rows.into_iter().map(RoleResponse::from).collect();

    Ok(ApiResponse::success(
        "Roles retrieved successfully",
        PaginatedResponse::from_params(items, &pagination, total),
    ))
}

#[utoipa::path(
    get,
    path = "/roles/{id}",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role with its active permissions", body = ApiResponse<RoleResponse>),
        (status = 404, description = "Role not found", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApiResponse<RoleResponse>> {
    let found = with_conn(&state.db_pool, move |conn| {
        role_store::find_with_permissions(conn, id)
    })
    .await?;

    Ok(ApiResponse::success(
        "Role retrieved successfully",
        found.into(),
    ))
}

#[utoipa::path(
    post,
    path = "/roles",
    tag = "Roles",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = ApiResponse<RoleResponse>),
        (status = 400, description = "Validation error or unknown permission ids", body = MessageResponse),
        (status = 409, description = "Role already exists", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<CreateRoleRequest>,
) -> ApiResult<(StatusCode, ApiResponse<RoleResponse>)> {
    let new_role = NewRole {
        name: payload.name.trim().to_string(),
        description: payload.description,
        is_system_role: payload.is_system_role.unwrap_or(false),
    };
    let permission_ids = payload.permission_ids;

    let (role, permissions) = with_conn(&state.db_pool, move |conn| {
        role_store::create(conn, &new_role, permission_ids.as_deref())
    })
    .await?;

    info!(actor_id = %actor.id, role_id = %role.id, name = %role.name, "Role created");

    Ok(ApiResponse::created(
        "Role created successfully",
        RoleResponse::new(role, permissions),
    ))
}

#[utoipa::path(
    put,
    path = "/roles/{id}",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role ID")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = ApiResponse<RoleResponse>),
        (status = 400, description = "Validation error or unknown permission ids", body = MessageResponse),
        (status = 404, description = "Role not found", body = MessageResponse),
        (status = 409, description = "Role name taken", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<UpdateRoleRequest>,
) -> ApiResult<ApiResponse<RoleResponse>> {
    let changes = RoleChanges {
        name: payload.name.map(|n| n.trim().to_string()),
        description: payload.description,
        is_active: payload.is_active,
        is_system_role: payload.is_system_role,
        updated_at: None,
    };
    let permission_ids = payload.permission_ids;

    let (role, permissions) = with_conn(&state.db_pool, move |conn| {
        role_store::update(conn, id, changes, permission_ids.as_deref())
    })
    .await?;

    info!(actor_id = %actor.id, role_id = %role.id, "Role updated");

    Ok(ApiResponse::success(
        "Role updated successfully",
        RoleResponse::new(role, permissions),
    ))
}

#[utoipa::path(
    delete,
    path = "/roles/{id}",
    tag = "Roles",
    params(("id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role deactivated", body = MessageResponse),
        (status = 400, description = "System roles cannot be deleted", body = MessageResponse),
        (status = 404, description = "Role not found", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApiResponse<()>> {
    let role = with_conn(&state.db_pool, move |conn| role_store::soft_delete(conn, id)).await?;

    info!(actor_id = %actor.id, role_id = %role.id, name = %role.name, "Role deactivated");

    Ok(ApiResponse::message("Role deleted successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_role_request_validation() {
        let request = CreateRoleRequest {
            name: "R".repeat(101),
            description: Some("d".repeat(256)),
            permission_ids: None,
            is_system_role: None,
        };
        let errors = crate::error::flatten_validation_errors(&request.validate().unwrap_err());
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["description", "name"]);
        assert_eq!(errors[1].message, "Role name must be between 1 and 100 characters");
    }

    #[test]
    fn test_role_response_nests_permissions() {
        let now = chrono::Utc::now().naive_utc();
        let role = Role {
            id: Uuid::new_v4(),
            name: "NURSE".to_string(),
            description: None,
            is_active: true,
            is_system_role: false,
            created_at: now,
            updated_at: now,
        };
        let permission = Permission {
            id: Uuid::new_v4(),
            name: "Read patients".to_string(),
            description: None,
            resource: "patient".to_string(),
            action: "read".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let value = serde_json::to_value(RoleResponse::new(role, vec![permission])).unwrap();
        assert_eq!(value["name"], "NURSE");
        assert_eq!(value["permissions"][0]["resource"], "patient");
    }
}
