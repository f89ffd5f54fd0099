//! The authenticated principal attached to requests and its capability checks.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Permission, Role, User};

/// Matches any resource or any action.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PrincipalPermission {
    pub id: Uuid,
    #[schema(example = "Read patient records")]
    pub name: String,
    #[schema(example = "patient")]
    pub resource: String,
    #[schema(example = "read")]
    pub action: String,
}

impl PrincipalPermission {
    pub fn key(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }

    pub fn grants(&self, resource: &str, action: &str) -> bool {
        (self.resource == resource || self.resource == WILDCARD)
            && (self.action == action || self.action == WILDCARD)
    }
}

impl From<Permission> for PrincipalPermission {
    fn from(p: Permission) -> Self {
        Self {
            id: p.id,
            name: p.name,
            resource: p.resource,
            action: p.action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PrincipalRole {
    pub id: Uuid,
    #[schema(example = "NURSE")]
    pub name: String,
    pub permissions: Vec<PrincipalPermission>,
}

impl PrincipalRole {
    pub fn from_role(role: Role, permissions: Vec<Permission>) -> Self {
        Self {
            id: role.id,
            name: role.name,
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }
}

/// A user with its active roles and each role's active permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    #[schema(example = "alice@example.com")]
    pub email: String,
    #[schema(example = "Alice")]
    pub first_name: String,
    #[schema(example = "Nightingale")]
    pub last_name: String,
    pub roles: Vec<PrincipalRole>,
    pub is_active: bool,
}

impl AuthenticatedUser {
    pub fn new(user: &User, roles: Vec<PrincipalRole>) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            roles,
            is_active: user.is_active,
        }
    }

    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.name.clone()).collect()
    }

    /// Flattened, deduplicated `resource:action` keys across all roles.
    pub fn permission_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.permissions().map(PrincipalPermission::key).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn permissions(&self) -> impl Iterator<Item = &PrincipalPermission> {
        self.roles.iter().flat_map(|r| r.permissions.iter())
    }

    pub fn has_role(&self, allowed: &[&str]) -> bool {
        self.roles.iter().any(|r| allowed.contains(&r.name.as_str()))
    }

    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        self.permissions().any(|p| p.grants(resource, action))
    }

    pub fn has_any_permission(&self, required: &[(&str, &str)]) -> bool {
        required
            .iter()
            .any(|(resource, action)| self.has_permission(resource, action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perm(resource: &str, action: &str) -> PrincipalPermission {
        PrincipalPermission {
            id: Uuid::new_v4(),
            name: format!("{resource} {action}"),
            resource: resource.to_string(),
            action: action.to_string(),
        }
    }

    fn principal(roles: Vec<(&str, Vec<PrincipalPermission>)>) -> AuthenticatedUser {
        AuthenticatedUser {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            first_name: "Alice".to_string(),
            last_name: "Nightingale".to_string(),
            roles: roles
                .into_iter()
                .map(|(name, permissions)| PrincipalRole {
                    id: Uuid::new_v4(),
                    name: name.to_string(),
                    permissions,
                })
                .collect(),
            is_active: true,
        }
    }

    #[test]
    fn test_wildcard_resource_matches_any_resource_for_that_action() {
        let user = principal(vec![("AUDITOR", vec![perm("*", "read")])]);

        assert!(user.has_permission("anything", "read"));
        assert!(user.has_permission("patient", "read"));
        assert!(!user.has_permission("anything", "write"));
    }

    #[test]
    fn test_wildcard_action_is_scoped_to_resource() {
        let user = principal(vec![("USER_ADMIN", vec![perm("user", "*")])]);

        assert!(user.has_permission("user", "delete"));
        assert!(user.has_permission("user", "create"));
        assert!(!user.has_permission("role", "delete"));
    }

    #[test]
    fn test_full_wildcard_grants_everything() {
        let user = principal(vec![("SUPER_ADMIN", vec![perm("*", "*")])]);
        assert!(user.has_permission("pharmacy", "dispense"));
    }

    #[test]
    fn test_matching_is_exact_and_case_sensitive() {
        let user = principal(vec![("NURSE", vec![perm("patient", "read")])]);

        assert!(user.has_permission("patient", "read"));
        assert!(!user.has_permission("patient", "write"));
        assert!(!user.has_permission("Patient", "read"));
        assert!(!user.has_permission("patients", "read"));
    }

    #[test]
    fn test_permissions_are_unioned_across_roles() {
        let user = principal(vec![
            ("NURSE", vec![perm("patient", "read")]),
            ("PHARMACIST", vec![perm("medication", "dispense")]),
        ]);

        assert!(user.has_permission("medication", "dispense"));
        assert!(user.has_any_permission(&[("billing", "view"), ("patient", "read")]));
        assert!(!user.has_any_permission(&[("billing", "view"), ("patient", "write")]));
        assert!(!user.has_any_permission(&[]));
    }

    #[test]
    fn test_has_role() {
        let user = principal(vec![("NURSE", vec![])]);
        assert!(user.has_role(&["DOCTOR", "NURSE"]));
        assert!(!user.has_role(&["DOCTOR"]));
        assert!(!user.has_role(&["nurse"]));
    }

    #[test]
    fn test_no_roles_grants_nothing() {
        let user = principal(vec![]);
        assert!(!user.has_permission("patient", "read"));
        assert!(!user.has_role(&["PATIENT"]));
        assert!(user.permission_keys().is_empty());
    }

    #[test]
    fn test_permission_keys_are_deduplicated() {
        let user = principal(vec![
            ("A", vec![perm("patient", "read"), perm("role", "view")]),
            ("B", vec![perm("patient", "read")]),
        ]);

        assert_eq!(user.permission_keys(), vec!["patient:read", "role:view"]);
        assert_eq!(user.role_names(), vec!["A", "B"]);
    }
}
