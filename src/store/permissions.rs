//! Permission rows: the `(resource, action)` capability catalogue.

use chrono::Utc;
use diesel::pg::Pg;
use diesel::prelude::*;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::models::{NewPermission, Permission, PermissionChanges};
use crate::pagination::{PaginationParams, SortOrder};
use crate::schema::permissions;

pub const DUPLICATE_MESSAGE: &str = "Permission with this resource and action already exists";
pub const NOT_FOUND_MESSAGE: &str = "Permission not found";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PermissionSort {
    Name,
    Resource,
    Action,
    #[default]
    CreatedAt,
}

#[derive(Debug, Clone, Default)]
pub struct PermissionFilter {
    pub search: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub is_active: Option<bool>,
    pub sort_by: PermissionSort,
    pub sort_order: SortOrder,
}

fn filtered(filter: &PermissionFilter) -> permissions::BoxedQuery<'_, Pg> {
    let mut query = permissions::table.into_boxed();

    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        query = query.filter(
            permissions::name
                .ilike(pattern.clone())
                .or(permissions::description.ilike(pattern)),
        );
    }
    if let Some(resource) = &filter.resource {
        query = query.filter(permissions::resource.eq(resource));
    }
    if let Some(action) = &filter.action {
        query = query.filter(permissions::action.eq(action));
    }
    if let Some(is_active) = filter.is_active {
        query = query.filter(permissions::is_active.eq(is_active));
    }

    query
}

pub fn list(
    conn: &mut PgConnection,
    filter: &PermissionFilter,
    pagination: &PaginationParams,
) -> ApiResult<(Vec<Permission>, i64)> {
    let total: i64 = filtered(filter).count().get_result(conn)?;

    let (limit, offset) = pagination.limit_offset();
    let query = filtered(filter);
    let query = match (filter.sort_by, filter.sort_order) {
        (PermissionSort::Name, SortOrder::Asc) => query.order(permissions::name.asc()),
        (PermissionSort::Name, SortOrder::Desc) => query.order(permissions::name.desc()),
        (PermissionSort::Resource, SortOrder::Asc) => query.order(permissions::resource.asc()),
        (PermissionSort::Resource, SortOrder::Desc) => query.order(permissions::resource.desc()),
        (PermissionSort::Action, SortOrder::Asc) => query.order(permissions::action.asc()),
        (PermissionSort::Action, SortOrder::Desc) => query.order(permissions::action.desc()),
        (PermissionSort::CreatedAt, SortOrder::Asc) => query.order(permissions::created_at.asc()),
        (PermissionSort::CreatedAt, SortOrder::Desc) => {
            query.order(permissions::created_at.desc())
        }
    };

    let items = query
        .then_order_by(permissions::id.asc())
        .limit(limit)
        .offset(offset)
        .select(Permission::as_select())
        .load(conn)?;

    Ok((items, total))
}

pub fn find_active(conn: &mut PgConnection, id: Uuid) -> ApiResult<Permission> {
    permissions::table
        .filter(permissions::id.eq(id))
        .filter(permissions::is_active.eq(true))
        .select(Permission::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND_MESSAGE))
}

fn active_pair_exists(
    conn: &mut PgConnection,
    resource: &str,
    action: &str,
    excluding: Option<Uuid>,
) -> ApiResult<bool> {
    let mut query = permissions::table
        .filter(permissions::resource.eq(resource))
        .filter(permissions::action.eq(action))
        .filter(permissions::is_active.eq(true))
        .into_boxed();

    if let Some(id) = excluding {
        query = query.filter(permissions::id.ne(id));
    }

    Ok(diesel::select(diesel::dsl::exists(query)).get_result(conn)?)
}

fn map_unique(e: diesel::result::Error) -> ApiError {
    if is_unique_violation(&e) {
        ApiError::conflict(DUPLICATE_MESSAGE)
    } else {
        ApiError::from(e)
    }
}

/// Inserts a permission. The partial unique index settles concurrent duplicates.
pub fn create(conn: &mut PgConnection, new_permission: &NewPermission) -> ApiResult<Permission> {
    if active_pair_exists(conn, &new_permission.resource, &new_permission.action, None)? {
        return Err(ApiError::conflict(DUPLICATE_MESSAGE));
    }

    diesel::insert_into(permissions::table)
        .values(new_permission)
        .returning(Permission::as_returning())
        .get_result(conn)
        .map_err(map_unique)
}

pub fn update(
    conn: &mut PgConnection,
    id: Uuid,
    mut changes: PermissionChanges,
) -> ApiResult<Permission> {
    let current = find_active(conn, id)?;

    let resource = changes.resource.as_deref().unwrap_or(&current.resource);
    let action = changes.action.as_deref().unwrap_or(&current.action);
    let pair_changed = resource != current.resource || action != current.action;

    if pair_changed && active_pair_exists(conn, resource, action, Some(id))? {
        return Err(ApiError::conflict(DUPLICATE_MESSAGE));
    }

    changes.updated_at = Some(Utc::now().naive_utc());

    diesel::update(permissions::table.find(id))
        .set(&changes)
        .returning(Permission::as_returning())
        .get_result(conn)
        .map_err(map_unique)
}

pub fn soft_delete(conn: &mut PgConnection, id: Uuid) -> ApiResult<Permission> {
    let updated = diesel::update(
        permissions::table
            .filter(permissions::id.eq(id))
            .filter(permissions::is_active.eq(true)),
    )
    .set((
        permissions::is_active.eq(false),
        permissions::updated_at.eq(Utc::now().naive_utc()),
    ))
    .returning(Permission::as_returning())
    .get_result(conn)
    .optional()?;

    updated.ok_or_else(|| ApiError::not_found(NOT_FOUND_MESSAGE))
}

/// Loads the active permissions among `ids`. Missing or inactive ids are
/// simply absent from the result.
pub fn find_active_by_ids(conn: &mut PgConnection, ids: &[Uuid]) -> ApiResult<Vec<Permission>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    Ok(permissions::table
        .filter(permissions::id.eq_any(ids))
        .filter(permissions::is_active.eq(true))
        .select(Permission::as_select())
        .load(conn)?)
}
