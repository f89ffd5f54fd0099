//! Outbound email collaborator.
//!
//! Delivery is best effort: callers log failures and carry on.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{EmailConfig, Environment};

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Email delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_verification_email(
        &self,
        to: &str,
        token: &str,
        first_name: &str,
    ) -> Result<(), EmailError>;

    async fn send_password_reset_email(
        &self,
        to: &str,
        token: &str,
        first_name: &str,
    ) -> Result<(), EmailError>;

    async fn send_welcome_email(&self, to: &str, first_name: &str) -> Result<(), EmailError>;
}

/// Writes emails to the log instead of delivering them.
///
/// Links carry live tokens, so they are only logged at debug level and never
/// in production.
pub struct LogEmailSender {
    from_address: String,
    frontend_url: String,
    log_links: bool,
}

impl LogEmailSender {
    pub fn new(config: &EmailConfig, environment: &Environment) -> Self {
        Self {
            from_address: config.from_address.clone(),
            frontend_url: config.frontend_url.trim_end_matches('/').to_string(),
            log_links: !environment.is_production(),
        }
    }

    fn link(&self, path: &str, token: &str) -> String {
        format!("{}/{}?token={}", self.frontend_url, path, token)
    }

    fn loggable_link(&self, path: &str, token: &str) -> Option<String> {
        self.log_links.then(|| self.link(path, token))
    }
}

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_verification_email(
        &self,
        to: &str,
        token: &str,
        first_name: &str,
    ) -> Result<(), EmailError> {
        info!(
            from = %self.from_address,
            to = %to,
            recipient_name = %first_name,
            "Verification email"
        );
        if let Some(link) = self.loggable_link("verify-email", token) {
            debug!(to = %to, link = %link, "Verification link");
        }
        Ok(())
    }

    async fn send_password_reset_email(
        &self,
        to: &str,
        token: &str,
        first_name: &str,
    ) -> Result<(), EmailError> {
        info!(
            from = %self.from_address,
            to = %to,
            recipient_name = %first_name,
            "Password reset email"
        );
        if let Some(link) = self.loggable_link("reset-password", token) {
            debug!(to = %to, link = %link, "Password reset link");
        }
        Ok(())
    }

    async fn send_welcome_email(&self, to: &str, first_name: &str) -> Result<(), EmailError> {
        info!(from = %self.from_address, to = %to, recipient_name = %first_name, "Welcome email");
        Ok(())
    }
}

/// Logs a failed send. Email errors never reach the client.
pub fn log_failure(kind: &'static str, to: &str, result: Result<(), EmailError>) {
    if let Err(e) = result {
        warn!(email_kind = kind, to = %to, error = %e, "Failed to send email");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email_config() -> EmailConfig {
        EmailConfig {
            from_address: "no-reply@kadacare.test".to_string(),
            frontend_url: "http://localhost:3000/".to_string(),
        }
    }

    #[tokio::test]
    async fn test_log_sender_always_succeeds() {
        let sender = LogEmailSender::new(&email_config(), &Environment::Development);

        assert_eq!(
            sender.link("verify-email", "abc"),
            "http://localhost:3000/verify-email?token=abc"
        );
        assert!(sender
            .send_verification_email("a@example.com", "abc", "Alice")
            .await
            .is_ok());
        assert!(sender.send_welcome_email("a@example.com", "Alice").await.is_ok());
    }

    #[test]
    fn test_links_are_never_logged_in_production() {
        let sender = LogEmailSender::new(&email_config(), &Environment::Production);
        assert_eq!(sender.loggable_link("reset-password", "secret"), None);

        let sender = LogEmailSender::new(&email_config(), &Environment::Staging);
        assert_eq!(
            sender.loggable_link("reset-password", "secret"),
            Some("http://localhost:3000/reset-password?token=secret".to_string())
        );
    }

    #[test]
    fn test_log_failure_swallows_errors() {
        log_failure(
            "welcome",
            "a@example.com",
            Err(EmailError::Delivery("smtp down".to_string())),
        );
    }
}
