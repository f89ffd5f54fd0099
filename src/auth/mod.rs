//! Credentials, tokens and the authenticated principal.

pub mod jwt;
pub mod password;
pub mod principal;
pub mod secure_token;

pub use jwt::{AccessClaims, RefreshClaims, TokenError, TokenKind, TokenService};
pub use password::{PasswordPolicy, PasswordService};
pub use principal::{AuthenticatedUser, PrincipalPermission, PrincipalRole};
