//! Roles and the role to permission association.

use chrono::Utc;
use diesel::pg::Pg;
use diesel::prelude::*;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::models::{NewRole, NewRolePermission, Permission, Role, RoleChanges};
use crate::pagination::{PaginationParams, SortOrder};
use crate::schema::{permissions, role_permissions, roles};
use crate::store::permissions as permission_store;
use crate::store::{dedupe_ids, missing_id_errors};

pub const DUPLICATE_MESSAGE: &str = "Role with this name already exists";
pub const NOT_FOUND_MESSAGE: &str = "Role not found";
pub const SYSTEM_ROLE_MESSAGE: &str = "System roles cannot be deleted";

#[derive(Debug, Clone, Default)]
pub struct RoleFilter {
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub sort_order: SortOrder,
}

fn filtered(filter: &RoleFilter) -> roles::BoxedQuery<'_, Pg> {
    let mut query = roles::table.into_boxed();

    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        query = query.filter(
            roles::name
                .ilike(pattern.clone())
                .or(roles::description.ilike(pattern)),
        );
    }
    if let Some(is_active) = filter.is_active {
        query = query.filter(roles::is_active.eq(is_active));
    }

    query
}

pub fn list(
    conn: &mut PgConnection,
    filter: &RoleFilter,
    pagination: &PaginationParams,
) -> ApiResult<(Vec<(Role, Vec<Permission>)>, i64)> {
    let total: i64 = filtered(filter).count().get_result(conn)?;

    let (limit, offset) = pagination.limit_offset();
    let query = match filter.sort_order {
        SortOrder::Asc => filtered(filter).order(roles::created_at.asc()),
        SortOrder::Desc => filtered(filter).order(roles::created_at.desc()),
    };

    let items: Vec<Role> = query
        .then_order_by(roles::name.asc())
        .limit(limit)
        .offset(offset)
        .select(Role::as_select())
        .load(conn)?;

    let ids: Vec<Uuid> = items.iter().map(|r| r.id).collect();
    let mut grouped = active_permissions_by_role(conn, &ids)?;

    let items = items
        .into_iter()
        .map(|role| {
            let perms = grouped.remove(&role.id).unwrap_or_default();
            (role, perms)
        })
        .collect();

    Ok((items, total))
}

pub fn find_active(conn: &mut PgConnection, id: Uuid) -> ApiResult<Role> {
    roles::table
        .filter(roles::id.eq(id))
        .filter(roles::is_active.eq(true))
        .select(Role::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND_MESSAGE))
}

pub fn find_with_permissions(
    conn: &mut PgConnection,
    id: Uuid,
) -> ApiResult<(Role, Vec<Permission>)> {
    let role = find_active(conn, id)?;
    let mut grouped = active_permissions_by_role(conn, &[role.id])?;
    let perms = grouped.remove(&role.id).unwrap_or_default();
    Ok((role, perms))
}

/// Active role looked up by exact name, e.g. the default registration role.
pub fn find_active_by_name(conn: &mut PgConnection, name: &str) -> ApiResult<Option<Role>> {
    Ok(roles::table
        .filter(roles::name.eq(name))
        .filter(roles::is_active.eq(true))
        .select(Role::as_select())
        .first(conn)
        .optional()?)
}

pub fn find_active_by_ids(conn: &mut PgConnection, ids: &[Uuid]) -> ApiResult<Vec<Role>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    Ok(roles::table
        .filter(roles::id.eq_any(ids))
        .filter(roles::is_active.eq(true))
        .select(Role::as_select())
        .load(conn)?)
}

/// Active permissions of each role in `role_ids`, keyed by role id.
pub fn active_permissions_by_role(
    conn: &mut PgConnection,
    role_ids: &[Uuid],
) -> ApiResult<HashMap<Uuid, Vec<Permission>>> {
    if role_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(Uuid, Permission)> = role_permissions::table
        .inner_join(permissions::table)
        .filter(role_permissions::role_id.eq_any(role_ids))
        .filter(permissions::is_active.eq(true))
        .order((permissions::resource.asc(), permissions::action.asc()))
        .select((role_permissions::role_id, Permission::as_select()))
        .load(conn)?;

    let mut grouped: HashMap<Uuid, Vec<Permission>> = HashMap::new();
    for (role_id, permission) in rows {
        grouped.entry(role_id).or_default().push(permission);
    }
    Ok(grouped)
}

fn name_taken(conn: &mut PgConnection, name: &str, excluding: Option<Uuid>) -> ApiResult<bool> {
    let mut query = roles::table.filter(roles::name.eq(name)).into_boxed();
    if let Some(id) = excluding {
        query = query.filter(roles::id.ne(id));
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

/// Replaces the role's permission set. Unknown or inactive ids fail the
/// whole call, so run it inside the caller's transaction.
pub fn replace_permissions(
    conn: &mut PgConnection,
    role_id: Uuid,
    permission_ids: &[Uuid],
) -> ApiResult<()> {
    let wanted = dedupe_ids(permission_ids);

    let found: HashSet<Uuid> = permission_store::find_active_by_ids(conn, &wanted)?
        .into_iter()
        .map(|p| p.id)
        .collect();

    let unknown = missing_id_errors("permission_ids", "Permission", permission_ids, &found);

    if !unknown.is_empty() {
        return Err(ApiError::validation_with(
            "One or more permissions were not found",
            unknown,
        ));
    }

    diesel::delete(role_permissions::table.filter(role_permissions::role_id.eq(role_id)))
        .execute(conn)?;

    let rows: Vec<NewRolePermission> = wanted
        .into_iter()
        .map(|permission_id| NewRolePermission {
            role_id,
            permission_id,
        })
        .collect();

    if !rows.is_empty() {
        diesel::insert_into(role_permissions::table)
            .values(&rows)
            .execute(conn)?;
    }

    Ok(())
}

pub fn create(
    conn: &mut PgConnection,
    new_role: &NewRole,
    permission_ids: Option<&[Uuid]>,
) -> ApiResult<(Role, Vec<Permission>)> {
    conn.transaction::<_, ApiError, _>(|conn| {
        if name_taken(conn, &new_role.name, None)? {
            return Err(ApiError::conflict(DUPLICATE_MESSAGE));
        }

        let role: Role = diesel::insert_into(roles::table)
            .values(new_role)
            .returning(Role::as_returning())
            .get_result(conn)
            .map_err(map_unique)?;

        if let Some(ids) = permission_ids.filter(|ids| !ids.is_empty()) {
            replace_permissions(conn, role.id, ids)?;
        }

        let mut grouped = active_permissions_by_role(conn, &[role.id])?;
        let perms = grouped.remove(&role.id).unwrap_or_default();
        Ok((role, perms))
    })
}

pub fn update(
    conn: &mut PgConnection,
    id: Uuid,
    mut changes: RoleChanges,
    permission_ids: Option<&[Uuid]>,
) -> ApiResult<(Role, Vec<Permission>)> {
    conn.transaction::<_, ApiError, _>(|conn| {
        let current = find_active(conn, id)?;

        if let Some(name) = changes.name.as_deref() {
            if name != current.name && name_taken(conn, name, Some(id))? {
                return Err(ApiError::conflict(DUPLICATE_MESSAGE));
            }
        }

        changes.updated_at = Some(Utc::now().naive_utc());
        let role: Role = diesel::update(roles::table.find(id))
            .set(&changes)
            .returning(Role::as_returning())
            .get_result(conn)
            .map_err(map_unique)?;

        if let Some(ids) = permission_ids {
            replace_permissions(conn, id, ids)?;
        }

        let mut grouped = active_permissions_by_role(conn, &[id])?;
        let perms = grouped.remove(&id).unwrap_or_default();
        Ok((role, perms))
    })
}

/// Deactivates a role. System roles are refused and left untouched.
pub fn soft_delete(conn: &mut PgConnection, id: Uuid) -> ApiResult<Role> {
    let role = find_active(conn, id)?;

    if role.is_system_role {
        return Err(ApiError::validation(SYSTEM_ROLE_MESSAGE));
    }

    Ok(diesel::update(roles::table.find(id))
        .set((
            roles::is_active.eq(false),
            roles::updated_at.eq(Utc::now().naive_utc()),
        ))
        .returning(Role::as_returning())
        .get_result(conn)?)
}
