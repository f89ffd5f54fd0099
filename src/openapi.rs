//! OpenAPI documentation served through Swagger UI.

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{AuthenticatedUser, PrincipalPermission, PrincipalRole};
use crate::error::FieldError;
use crate::handlers::{auth, health, permissions, roles, users};
use crate::pagination::{PaginationMeta, SortOrder};
use crate::response::MessageResponse;

/// Prefix the documented API routes are served under by default.
const DOCUMENTED_API_PREFIX: &str = "/api/v1";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "KadaCare Auth API",
        version = "1.0.0",
        description = "Authentication and role-based access control for KadaCare hospital administration.\n\n\
        ## Authentication\n\
        1. Register, then verify the email with the emailed token\n\
        2. Login to receive an access token and a refresh token\n\
        3. Send `Authorization: Bearer <access_token>` on protected routes\n\n\
        ## Authorization\n\
        Permissions are `resource:action` pairs granted through roles. \
        `*` matches any resource or any action. Roles and permissions are \
        re-read on every request, so changes apply without a new token.\n\n\
        ## Responses\n\
        Every JSON body is `{success, message, data?, errors?, timestamp}`.",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "/", description = "Current server")
    ),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Authentication", description = "Registration, login, tokens, email verification and password reset"),
        (name = "Users", description = "Profile, password change and user administration"),
        (name = "Roles", description = "Role administration"),
        (name = "Permissions", description = "Permission catalogue administration")
    ),
    paths(
        health::health_check_simple,
        health::health_check,
        health::ready_check,
        health::live_check,

        auth::register,
        auth::login,
        auth::refresh_token,
        auth::forgot_password,
        auth::reset_password,
        auth::verify_email,
        auth::resend_verification,
        auth::logout,
        auth::profile,

        users::get_profile,
        users::change_password,
        users::list_users,
        users::create_user,
        users::get_user,
        users::update_user,
        users::delete_user,

        roles::list_roles,
        roles::get_role,
        roles::create_role,
        roles::update_role,
        roles::delete_role,

        permissions::list_permissions,
        permissions::get_permission,
        permissions::create_permission,
        permissions::batch_create_permissions,
        permissions::update_permission,
        permissions::delete_permission,
    ),
    components(
        schemas(
            MessageResponse,
            FieldError,
            PaginationMeta,
            SortOrder,

            AuthenticatedUser,
            PrincipalRole,
            PrincipalPermission,

            auth::RegisterRequest,
            auth::LoginRequest,
            auth::RefreshTokenRequest,
            auth::ForgotPasswordRequest,
            auth::ResetPasswordRequest,
            auth::VerifyEmailRequest,
            auth::ResendVerificationRequest,
            auth::UserResponse,
            auth::LoginData,
            auth::RefreshData,

            users::ChangePasswordRequest,
            users::CreateUserRequest,
            users::UpdateUserRequest,
            users::UserDetailResponse,

            crate::models::Role,
            roles::CreateRoleRequest,
            roles::UpdateRoleRequest,
            roles::RoleResponse,

            crate::models::Permission,
            crate::store::permissions::PermissionSort,
            permissions::CreatePermissionRequest,
            permissions::UpdatePermissionRequest,

            health::HealthResponse,
            health::ReadinessResponse,
            health::DatabaseStatus,
        )
    ),
    modifiers(&SecurityAddon, &ApiPrefixAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "EdDSA access token from /auth/login.\n\
                            Include in requests as: `Authorization: Bearer <token>`",
                        ))
                        .build(),
                ),
            );
        }

        openapi.security = Some(vec![]);
    }
}

/// Health probes live at the root; everything else is nested under the API prefix.
struct ApiPrefixAddon;

impl Modify for ApiPrefixAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let paths = std::mem::take(&mut openapi.paths.paths);
        openapi.paths.paths = paths
            .into_iter()
            .map(|(path, item)| {
                if path.starts_with("/health") {
                    (path, item)
                } else {
                    (format!("{DOCUMENTED_API_PREFIX}{path}"), item)
                }
            })
            .collect();
    }
}

pub fn swagger_router() -> Router {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .into()
}
