//! Credential records and role assignments.

use chrono::{NaiveDateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use std::collections::HashSet;
use uuid::Uuid;

use crate::auth::principal::{AuthenticatedUser, PrincipalRole};
use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::models::{NewUser, NewUserRole, Role, User, UserChanges};
use crate::pagination::{PaginationParams, SortOrder};
use crate::schema::{roles, user_roles, users};
use crate::store::roles as role_store;
use crate::store::{dedupe_ids, missing_id_errors};

pub const DUPLICATE_MESSAGE: &str = "User with this email already exists";
pub const NOT_FOUND_MESSAGE: &str = "User not found";

/// Emails are compared and stored lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub role: Option<String>,
    pub sort_order: SortOrder,
}

fn filtered(filter: &UserFilter) -> users::BoxedQuery<'_, Pg> {
    let mut query = users::table.into_boxed();

    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        query = query.filter(
            users::first_name
                .ilike(pattern.clone())
                .or(users::last_name.ilike(pattern.clone()))
                .or(users::email.ilike(pattern)),
        );
    }
    if let Some(is_active) = filter.is_active {
        query = query.filter(users::is_active.eq(is_active));
    }
    if let Some(role) = &filter.role {
        let holders = user_roles::table
            .inner_join(roles::table)
            .filter(roles::name.eq(role))
            .select(user_roles::user_id);
        query = query.filter(users::id.eq_any(holders));
    }

    query
}

pub fn list(
    conn: &mut PgConnection,
    filter: &UserFilter,
    pagination: &PaginationParams,
) -> ApiResult<(Vec<User>, i64)> {
    let total: i64 = filtered(filter).count().get_result(conn)?;

    let (limit, offset) = pagination.limit_offset();
    let query = match filter.sort_order {
        SortOrder::Asc => filtered(filter).order(users::created_at.asc()),
        SortOrder::Desc => filtered(filter).order(users::created_at.desc()),
    };

    let items = query
        .then_order_by(users::email.asc())
        .limit(limit)
        .offset(offset)
        .select(User::as_select())
        .load(conn)?;

    Ok((items, total))
}

pub fn find_by_id(conn: &mut PgConnection, id: Uuid) -> ApiResult<Option<User>> {
    Ok(users::table
        .find(id)
        .select(User::as_select())
        .first(conn)
        .optional()?)
}

pub fn find_by_email(conn: &mut PgConnection, email: &str) -> ApiResult<Option<User>> {
    Ok(users::table
        .filter(users::email.eq(normalize_email(email)))
        .select(User::as_select())
        .first(conn)
        .optional()?)
}

pub fn find_active_by_email(conn: &mut PgConnection, email: &str) -> ApiResult<Option<User>> {
    Ok(find_by_email(conn, email)?.filter(|u| u.is_active))
}

pub fn find_active_by_verification_token(
    conn: &mut PgConnection,
    token_hash: &str,
) -> ApiResult<Option<User>> {
    Ok(users::table
        .filter(users::email_verification_token.eq(token_hash))
        .filter(users::is_active.eq(true))
        .select(User::as_select())
        .first(conn)
        .optional()?)
}

pub fn find_active_by_reset_token(
    conn: &mut PgConnection,
    token_hash: &str,
) -> ApiResult<Option<User>> {
    Ok(users::table
        .filter(users::password_reset_token.eq(token_hash))
        .filter(users::is_active.eq(true))
        .select(User::as_select())
        .first(conn)
        .optional()?)
}

fn map_unique(e: diesel::result::Error) -> ApiError {
    if is_unique_violation(&e) {
        ApiError::conflict(DUPLICATE_MESSAGE)
    } else {
        ApiError::from(e)
    }
}

fn assign_roles(conn: &mut PgConnection, user_id: Uuid, role_ids: &[Uuid]) -> ApiResult<()> {
    let wanted = dedupe_ids(role_ids);

    let found: HashSet<Uuid> = role_store::find_active_by_ids(conn, &wanted)?
        .into_iter()
        .map(|r| r.id)
        .collect();

    let unknown = missing_id_errors("role_ids", "Role", role_ids, &found);

    if !unknown.is_empty() {
        return Err(ApiError::validation_with(
            "One or more roles were not found",
            unknown,
        ));
    }

    diesel::delete(user_roles::table.filter(user_roles::user_id.eq(user_id))).execute(conn)?;

    let rows: Vec<NewUserRole> = wanted
        .into_iter()
        .map(|role_id| NewUserRole { user_id, role_id })
        .collect();

    if !rows.is_empty() {
        diesel::insert_into(user_roles::table)
            .values(&rows)
            .execute(conn)?;
    }

    Ok(())
}

/// Roles to give a new account.
pub enum InitialRoles<'a> {
    /// The named role, when it exists and is active.
    Default(&'a str),
    Explicit(&'a [Uuid]),
}

/// Inserts the user and its role assignments in one transaction.
pub fn create(
    conn: &mut PgConnection,
    new_user: &NewUser,
    initial_roles: InitialRoles<'_>,
) -> ApiResult<User> {
    conn.transaction::<_, ApiError, _>(|conn| {
        if find_by_email(conn, &new_user.email)?.is_some() {
            return Err(ApiError::conflict(DUPLICATE_MESSAGE));
        }

        let user: User = diesel::insert_into(users::table)
            .values(new_user)
            .returning(User::as_returning())
            .get_result(conn)
            .map_err(map_unique)?;

        match initial_roles {
            InitialRoles::Default(name) => {
                if let Some(role) = role_store::find_active_by_name(conn, name)? {
                    diesel::insert_into(user_roles::table)
                        .values(&NewUserRole {
                            user_id: user.id,
                            role_id: role.id,
                        })
                        .execute(conn)?;
                }
            }
            InitialRoles::Explicit(ids) => assign_roles(conn, user.id, ids)?,
        }

        Ok(user)
    })
}

pub fn update(
    conn: &mut PgConnection,
    id: Uuid,
    mut changes: UserChanges,
    role_ids: Option<&[Uuid]>,
) -> ApiResult<User> {
    conn.transaction::<_, ApiError, _>(|conn| {
        if find_by_id(conn, id)?.is_none() {
            return Err(ApiError::not_found(NOT_FOUND_MESSAGE));
        }

        changes.updated_at = Some(Utc::now().naive_utc());
        let user: User = diesel::update(users::table.find(id))
            .set(&changes)
            .returning(User::as_returning())
            .get_result(conn)?;

        if let Some(ids) = role_ids {
            assign_roles(conn, id, ids)?;
        }

        Ok(user)
    })
}

pub fn soft_delete(conn: &mut PgConnection, id: Uuid) -> ApiResult<User> {
    diesel::update(users::table.find(id))
        .set((
            users::is_active.eq(false),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .returning(User::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found(NOT_FOUND_MESSAGE))
}

pub fn record_login(conn: &mut PgConnection, id: Uuid) -> ApiResult<()> {
    let now = Utc::now().naive_utc();
    diesel::update(users::table.find(id))
        .set((users::last_login_at.eq(now), users::updated_at.eq(now)))
        .execute(conn)?;
    Ok(())
}

pub fn set_password(conn: &mut PgConnection, id: Uuid, password_hash: &str) -> ApiResult<()> {
    diesel::update(users::table.find(id))
        .set((
            users::password_hash.eq(password_hash),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn set_reset_token(
    conn: &mut PgConnection,
    id: Uuid,
    token_hash: &str,
    expires_at: NaiveDateTime,
) -> ApiResult<()> {
    diesel::update(users::table.find(id))
        .set((
            users::password_reset_token.eq(token_hash),
            users::password_reset_expires_at.eq(expires_at),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

/// Stores the new hash and consumes the reset token in one statement.
///
/// Returns `None` when the token no longer matches an active user with an
/// unexpired reset, so only one of several concurrent resets can win.
pub fn complete_password_reset(
    conn: &mut PgConnection,
    token_hash: &str,
    password_hash: &str,
) -> ApiResult<Option<Uuid>> {
    let now = Utc::now().naive_utc();
    Ok(diesel::update(
        users::table
            .filter(users::password_reset_token.eq(token_hash))
            .filter(users::password_reset_expires_at.ge(now))
            .filter(users::is_active.eq(true)),
    )
    .set((
        users::password_hash.eq(password_hash),
        users::password_reset_token.eq(None::<String>),
        users::password_reset_expires_at.eq(None::<NaiveDateTime>),
        users::updated_at.eq(now),
    ))
    .returning(users::id)
    .get_result(conn)
    .optional()?)
}

pub fn set_verification_token(conn: &mut PgConnection, id: Uuid, token_hash: &str) -> ApiResult<()> {
    diesel::update(users::table.find(id))
        .set((
            users::email_verification_token.eq(token_hash),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

/// Marks the email verified and consumes the verification token in one
/// statement. `None` when the token was already used or never matched.
pub fn mark_email_verified(conn: &mut PgConnection, token_hash: &str) -> ApiResult<Option<User>> {
    let now = Utc::now().naive_utc();
    Ok(diesel::update(
        users::table
            .filter(users::email_verification_token.eq(token_hash))
            .filter(users::email_verified_at.is_null())
            .filter(users::is_active.eq(true)),
    )
    .set((
        users::email_verified_at.eq(now),
        users::email_verification_token.eq(None::<String>),
        users::updated_at.eq(now),
    ))
    .returning(User::as_returning())
    .get_result(conn)
    .optional()?)
}

pub fn active_roles(conn: &mut PgConnection, user_id: Uuid) -> ApiResult<Vec<Role>> {
    Ok(user_roles::table
        .inner_join(roles::table)
        .filter(user_roles::user_id.eq(user_id))
        .filter(roles::is_active.eq(true))
        .order(roles::name.asc())
        .select(Role::as_select())
        .load(conn)?)
}

/// Builds the principal from the user's active roles and their active
/// permissions. A user without roles yields an empty role list.
pub fn principal_for(conn: &mut PgConnection, user: &User) -> ApiResult<AuthenticatedUser> {
    let roles = active_roles(conn, user.id)?;
    let role_ids: Vec<Uuid> = roles.iter().map(|r| r.id).collect();
    let mut grouped = role_store::active_permissions_by_role(conn, &role_ids)?;

    let roles = roles
        .into_iter()
        .map(|role| {
            let perms = grouped.remove(&role.id).unwrap_or_default();
            PrincipalRole::from_role(role, perms)
        })
        .collect();

    Ok(AuthenticatedUser::new(user, roles))
}

/// Loads the user and its current role graph. `None` when the user is gone.
pub fn load_principal(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> ApiResult<Option<(User, AuthenticatedUser)>> {
    let Some(user) = find_by_id(conn, user_id)? else {
        return Ok(None);
    };
    let principal = principal_for(conn, &user)?;
    Ok(Some((user, principal)))
}
