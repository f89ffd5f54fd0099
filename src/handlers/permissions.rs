//! Permission catalogue handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthenticatedUser,
    db::with_conn,
    error::{ApiError, ApiResult, FieldError, MASKED_INTERNAL_MESSAGE},
    extract::ValidatedJson,
    models::{NewPermission, Permission, PermissionChanges},
    pagination::{PaginatedResponse, PaginationParams, SortOrder},
    response::{ApiResponse, MessageResponse},
    store::permissions::{self as permission_store, PermissionFilter, PermissionSort},
    AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePermissionRequest {
    #[validate(length(min = 1, max = 100, message = "Permission name must be between 1 and 100 characters"))]
    #[schema(example = "Read patient records")]
    pub name: String,
    #[validate(length(max = 255, message = "Description cannot exceed 255 characters"))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Resource must be between 1 and 100 characters"))]
    #[schema(example = "patient")]
    pub resource: String,
    #[validate(length(min = 1, max = 50, message = "Action must be between 1 and 50 characters"))]
    #[schema(example = "read")]
    pub action: String,
}

impl CreatePermissionRequest {
    fn into_new(self) -> NewPermission {
        NewPermission {
            name: self.name.trim().to_string(),
            description: self.description,
            resource: normalize_key_part(&self.resource),
            action: normalize_key_part(&self.action),
        }
    }
}

/// The batch body is a bare JSON array of permissions.
#[derive(Debug, Deserialize, Validate)]
#[serde(transparent)]
pub struct BatchCreatePermissionRequest {
    #[validate(length(min = 1, message = "At least one permission is required"), nested)]
    pub permissions: Vec<CreatePermissionRequest>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdatePermissionRequest {
    #[validate(length(min = 1, max = 100, message = "Permission name must be between 1 and 100 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 255, message = "Description cannot exceed 255 characters"))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Resource must be between 1 and 100 characters"))]
    pub resource: Option<String>,
    #[validate(length(min = 1, max = 50, message = "Action must be between 1 and 50 characters"))]
    pub action: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PermissionListQuery {
    /// Case-insensitive match on name or description.
    pub search: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub is_active: Option<bool>,
    #[serde(default)]
    #[param(inline)]
    pub sort_by: PermissionSort,
    #[serde(default)]
    #[param(inline)]
    pub sort_order: SortOrder,
}

/// Resources and actions keep the caller's case; guards match them exactly.
fn normalize_key_part(value: &str) -> String {
    value.trim().to_string()
}

/// One error per later occurrence of a `resource:action` pair already seen
/// earlier in the batch.
fn find_batch_duplicates(items: &[CreatePermissionRequest]) -> Vec<FieldError> {
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    let mut errors = Vec::new();

    for (i, item) in items.iter().enumerate() {
        let key = format!(
            "{}:{}",
            normalize_key_part(&item.resource),
            normalize_key_part(&item.action)
        );
        match first_seen.get(&key) {
            Some(&j) => errors.push(FieldError::new(
                format!("permissions[{i}]"),
                format!("Duplicate resource:action combination \"{key}\" with permissions[{j}]"),
            )),
            None => {
                first_seen.insert(key, i);
            }
        }
    }

    errors
}

fn failure_reason(e: &ApiError) -> String {
    if e.is_internal() {
        error!(error = %e, "Batch permission insert failed");
        MASKED_INTERNAL_MESSAGE.to_string()
    } else {
        e.to_string()
    }
}

#[utoipa::path(
    get,
    path = "/permissions",
    tag = "Permissions",
    params(PaginationParams, PermissionListQuery),
    responses(
        (status = 200, description = "Paginated list of permissions", body = ApiResponse<PaginatedResponse<Permission>>),
        (status = 401, description = "Unauthorized", body = MessageResponse),
        (status = 403, description = "Missing permission:view", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
    Query(query): Query<PermissionListQuery>,
) -> ApiResult<ApiResponse<PaginatedResponse<Permission>>> {
    let filter = PermissionFilter {
        search: query.search,
        resource: query.resource.as_deref().map(normalize_key_part),
        action: query.action.as_deref().map(normalize_key_part),
        is_active: query.is_active,
        sort_by: query.sort_by,
        sort_order: query.sort_order,
    };

    let params = pagination.clone();
    let (items, total) = with_conn(&state.db_pool, move |conn| {
        permission_store::list(conn, &filter, &params)
    })
    .await?;

    Ok(ApiResponse::success(
        "Permissions retrieved successfully",
        PaginatedResponse::from_params(items, &pagination, total),
    ))
}

#[utoipa::path(
    get,
    path = "/permissions/{id}",
    tag = "Permissions",
    params(("id" = Uuid, Path, description = "Permission ID")),
    responses(
        (status = 200, description = "Permission", body = ApiResponse<Permission>),
        (status = 404, description = "Permission not found", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_permission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApiResponse<Permission>> {
    let permission =
        with_conn(&state.db_pool, move |conn| permission_store::find_active(conn, id)).await?;

    Ok(ApiResponse::success(
        "Permission retrieved successfully",
        permission,
    ))
}

#[utoipa::path(
    post,
    path = "/permissions",
    tag = "Permissions",
    request_body = CreatePermissionRequest,
    responses(
        (status = 201, description = "Permission created", body = ApiResponse<Permission>),
        (status = 400, description = "Validation error", body = MessageResponse),
        (status = 409, description = "Resource and action already exist", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<CreatePermissionRequest>,
) -> ApiResult<(StatusCode, ApiResponse<Permission>)> {
    let new_permission = payload.into_new();
    let permission = with_conn(&state.db_pool, move |conn| {
        permission_store::create(conn, &new_permission)
    })
    .await?;

    info!(
        actor_id = %actor.id,
        permission_id = %permission.id,
        key = %permission.key(),
        "Permission created"
    );

    Ok(ApiResponse::created(
        "Permission created successfully",
        permission,
    ))
}

#[utoipa::path(
    post,
    path = "/permissions/batch",
    tag = "Permissions",
    request_body = Vec<CreatePermissionRequest>,
    responses(
        (status = 201, description = "All permissions created", body = ApiResponse<Vec<Permission>>),
        (status = 400, description = "Duplicates within the batch, or some items failed; created items are returned in data", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn batch_create_permissions(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<BatchCreatePermissionRequest>,
) -> ApiResult<(StatusCode, ApiResponse<Vec<Permission>>)> {
    let duplicates = find_batch_duplicates(&payload.permissions);
    if !duplicates.is_empty() {
        warn!(
            actor_id = %actor.id,
            duplicates = duplicates.len(),
            "Batch permission create rejected"
        );
        return Err(ApiError::validation_with(
            "Duplicate resource:action combinations found in batch",
            duplicates,
        ));
    }

    let total = payload.permissions.len();
    let items = payload.permissions;
    let outcomes = with_conn(&state.db_pool, move |conn| {
        Ok(items
            .into_iter()
            .map(|item| {
                let new_permission = item.into_new();
                let result = permission_store::create(conn, &new_permission);
                (new_permission, result)
            })
            .collect::<Vec<_>>())
    })
    .await?;

    let mut created = Vec::new();
    let mut errors = Vec::new();
    for (i, (requested, result)) in outcomes.into_iter().enumerate() {
        match result {
            Ok(permission) => created.push(permission),
            Err(e) => errors.push(FieldError::new(
                format!("permissions[{i}]"),
                format!(
                    "{} ({}:{}): {}",
                    requested.name,
                    requested.resource,
                    requested.action,
                    failure_reason(&e)
                ),
            )),
        }
    }

    info!(
        actor_id = %actor.id,
        requested = total,
        created = created.len(),
        "Batch permission create"
    );

    if !errors.is_empty() {
        let message = format!(
            "Failed to create {} out of {} permissions. {} were created successfully.",
            errors.len(),
            total,
            created.len()
        );
        let data = serde_json::to_value(&created)
            .map_err(|e| ApiError::internal(format!("Failed to encode created permissions: {e}")))?;
        return Err(ApiError::Validation {
            message,
            errors,
            data: Some(data),
        });
    }

    Ok(ApiResponse::created(
        "Permissions batch created successfully",
        created,
    ))
}

#[utoipa::path(
    put,
    path = "/permissions/{id}",
    tag = "Permissions",
    params(("id" = Uuid, Path, description = "Permission ID")),
    request_body = UpdatePermissionRequest,
    responses(
        (status = 200, description = "Permission updated", body = ApiResponse<Permission>),
        (status = 404, description = "Permission not found", body = MessageResponse),
        (status = 409, description = "Resource and action already exist", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_permission(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<UpdatePermissionRequest>,
) -> ApiResult<ApiResponse<Permission>> {
    let changes = PermissionChanges {
        name: payload.name.map(|n| n.trim().to_string()),
        description: payload.description,
        resource: payload.resource.as_deref().map(normalize_key_part),
        action: payload.action.as_deref().map(normalize_key_part),
        updated_at: None,
    };

    let permission = with_conn(&state.db_pool, move |conn| {
        permission_store::update(conn, id, changes)
    })
    .await?;

    info!(actor_id = %actor.id, permission_id = %permission.id, "Permission updated");

    Ok(ApiResponse::success(
        "Permission updated successfully",
        permission,
    ))
}

#[utoipa::path(
    delete,
    path = "/permissions/{id}",
    tag = "Permissions",
    params(("id" = Uuid, Path, description = "Permission ID")),
    responses(
        (status = 200, description = "Permission deactivated", body = MessageResponse),
        (status = 404, description = "Permission not found", body = MessageResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_permission(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApiResponse<()>> {
    let permission =
        with_conn(&state.db_pool, move |conn| permission_store::soft_delete(conn, id)).await?;

    info!(actor_id = %actor.id, permission_id = %permission.id, "Permission deactivated");

    Ok(ApiResponse::message("Permission deleted successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(resource: &str, action: &str) -> CreatePermissionRequest {
        CreatePermissionRequest {
            name: format!("{resource} {action}"),
            description: None,
            resource: resource.to_string(),
            action: action.to_string(),
        }
    }

    #[test]
    fn test_batch_duplicates_name_both_indices() {
        let items = vec![
            item("patient", "read"),
            item("patient", "write"),
            item(" patient", "read "),
        ];

        let errors = find_batch_duplicates(&items);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "permissions[2]");
        assert_eq!(
            errors[0].message,
            "Duplicate resource:action combination \"patient:read\" with permissions[0]"
        );
    }

    #[test]
    fn test_batch_without_duplicates() {
        let items = vec![item("patient", "read"), item("billing", "read")];
        assert!(find_batch_duplicates(&items).is_empty());
    }

    #[test]
    fn test_empty_batch_is_invalid() {
        let request = BatchCreatePermissionRequest {
            permissions: Vec::new(),
        };
        let errors = crate::error::flatten_validation_errors(&request.validate().unwrap_err());
        assert_eq!(errors[0].field, "permissions");
        assert_eq!(errors[0].message, "At least one permission is required");
    }

    #[test]
    fn test_nested_item_errors_are_indexed() {
        let request = BatchCreatePermissionRequest {
            permissions: vec![item("patient", "read"), item("", "read")],
        };
        let errors = crate::error::flatten_validation_errors(&request.validate().unwrap_err());
        assert_eq!(errors[0].field, "permissions[1].resource");
    }

    #[test]
    fn test_key_parts_are_trimmed_but_keep_case() {
        let new_permission = item(" PATIENT", "READ ").into_new();
        assert_eq!(new_permission.resource, "PATIENT");
        assert_eq!(new_permission.action, "READ");
    }

    #[test]
    fn test_batch_keys_differing_only_in_case_are_distinct() {
        let items = vec![item("patient", "read"), item("PATIENT", "READ")];
        assert!(find_batch_duplicates(&items).is_empty());
    }

    #[test]
    fn test_batch_body_is_a_bare_array() {
        let body = serde_json::json!([
            { "name": "Read", "resource": "PATIENT", "action": "READ" },
            { "name": "Write", "resource": "PATIENT", "action": "WRITE" }
        ]);

        let request: BatchCreatePermissionRequest = serde_json::from_value(body).unwrap();

        assert_eq!(request.permissions.len(), 2);
        assert_eq!(request.permissions[1].action, "WRITE");
    }

    #[test]
    fn test_batch_body_rejects_wrapped_object() {
        let body = serde_json::json!({ "permissions": [] });
        assert!(serde_json::from_value::<BatchCreatePermissionRequest>(body).is_err());
    }

    #[test]
    fn test_internal_failures_are_masked_in_batch_reasons() {
        assert_eq!(
            failure_reason(&ApiError::internal("connection reset")),
            MASKED_INTERNAL_MESSAGE
        );
        assert_eq!(
            failure_reason(&ApiError::conflict(permission_store::DUPLICATE_MESSAGE)),
            permission_store::DUPLICATE_MESSAGE
        );
    }
}
