//! Password reset and password change integration tests.

mod common;

use common::{EmailKind, TestApp, PASSWORD};
use reqwest::StatusCode;
use serde_json::{json, Value};
use serial_test::serial;

const NEW_PASSWORD: &str = "N3wPassw0rd!";

const FORGOT_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent.";

async fn request_reset(app: &TestApp, email: &str) -> String {
    let response = app
        .post_public("/auth/forgot-password", json!({ "email": email }))
        .await;
    assert_status!(response, StatusCode::OK.as_u16());
    app.mailer
        .last_token(EmailKind::PasswordReset, email)
        .expect("No reset email captured")
}

#[tokio::test]
#[serial]
async fn test_forgot_password_sends_reset_email() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email();
    app.register_verified(&email, PASSWORD).await;

    let response = app
        .post_public("/auth/forgot-password", json!({ "email": email }))
        .await;

    assert_status!(response, StatusCode::OK.as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], FORGOT_MESSAGE);
    assert!(body.get("data").is_none());
    assert_eq!(app.mailer.count(EmailKind::PasswordReset, &email), 1);
}

#[tokio::test]
#[serial]
async fn test_forgot_password_nonexistent_user_still_succeeds() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email();

    let response = app
        .post_public("/auth/forgot-password", json!({ "email": email }))
        .await;

    assert_status!(response, StatusCode::OK.as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], FORGOT_MESSAGE);
    assert_eq!(app.mailer.count(EmailKind::PasswordReset, &email), 0);
}

#[tokio::test]
#[serial]
async fn test_reset_password_with_valid_token() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email();
    app.register_verified(&email, PASSWORD).await;
    let token = request_reset(&app, &email).await;

    let response = app
        .post_public(
            "/auth/reset-password",
            json!({ "token": token, "password": NEW_PASSWORD }),
        )
        .await;

    assert_status!(response, StatusCode::OK.as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Password reset successful");

    let old_login = app
        .post_public("/auth/login", json!({ "email": email, "password": PASSWORD }))
        .await;
    assert_status!(old_login, StatusCode::UNAUTHORIZED.as_u16());

    app.login(&email, NEW_PASSWORD).await;
}

#[tokio::test]
#[serial]
async fn test_reset_password_with_invalid_token() {
    let app = TestApp::spawn().await;

    let response = app
        .post_public(
            "/auth/reset-password",
            json!({ "token": "not-a-real-token", "password": NEW_PASSWORD }),
        )
        .await;

    assert_status!(response, StatusCode::BAD_REQUEST.as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Invalid or expired reset token");
}

#[tokio::test]
#[serial]
async fn test_reset_token_can_only_be_used_once() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email();
    app.register_verified(&email, PASSWORD).await;
    let token = request_reset(&app, &email).await;

    let first = app
        .post_public(
            "/auth/reset-password",
            json!({ "token": token, "password": NEW_PASSWORD }),
        )
        .await;
    assert_status!(first, StatusCode::OK.as_u16());

    let second = app
        .post_public(
            "/auth/reset-password",
            json!({ "token": token, "password": "An0therPass!" }),
        )
        .await;
    assert_status!(second, StatusCode::BAD_REQUEST.as_u16());
}

#[tokio::test]
#[serial]
async fn test_concurrent_resets_with_same_token_succeed_once() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email();
    app.register_verified(&email, PASSWORD).await;
    let token = request_reset(&app, &email).await;

    let (a, b) = tokio::join!(
        app.post_public(
            "/auth/reset-password",
            json!({ "token": token, "password": NEW_PASSWORD }),
        ),
        app.post_public(
            "/auth/reset-password",
            json!({ "token": token, "password": "An0therPass!" }),
        ),
    );

    let mut statuses = vec![a.status().as_u16(), b.status().as_u16()];
    statuses.sort();
    assert_eq!(
        statuses,
        vec![StatusCode::OK.as_u16(), StatusCode::BAD_REQUEST.as_u16()]
    );

    let winner = if a.status() == StatusCode::OK { NEW_PASSWORD } else { "An0therPass!" };
    app.login(&email, winner).await;
}

#[tokio::test]
#[serial]
async fn test_new_reset_request_invalidates_old_token() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email();
    app.register_verified(&email, PASSWORD).await;

    let old_token = request_reset(&app, &email).await;
    let new_token = request_reset(&app, &email).await;
    assert_ne!(old_token, new_token);

    let stale = app
        .post_public(
            "/auth/reset-password",
            json!({ "token": old_token, "password": NEW_PASSWORD }),
        )
        .await;
    assert_status!(stale, StatusCode::BAD_REQUEST.as_u16());

    let fresh = app
        .post_public(
            "/auth/reset-password",
            json!({ "token": new_token, "password": NEW_PASSWORD }),
        )
        .await;
    assert_status!(fresh, StatusCode::OK.as_u16());
}

#[tokio::test]
#[serial]
async fn test_expired_reset_token_is_rejected() {
    let mut config = common::test_config();
    config.security.password_reset_expiry_secs = -60;
    let app = TestApp::spawn_with(config, Default::default()).await;
    let email = TestApp::unique_email();
    app.register_verified(&email, PASSWORD).await;
    let token = request_reset(&app, &email).await;

    let response = app
        .post_public(
            "/auth/reset-password",
            json!({ "token": token, "password": NEW_PASSWORD }),
        )
        .await;

    assert_status!(response, StatusCode::BAD_REQUEST.as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Reset token has expired");
}

#[tokio::test]
#[serial]
async fn test_forgot_password_invalid_email_format() {
    let app = TestApp::spawn().await;

    let response = app
        .post_public("/auth/forgot-password", json!({ "email": "not-an-email" }))
        .await;

    assert_status!(response, StatusCode::BAD_REQUEST.as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["errors"][0]["field"], "email");
}

#[tokio::test]
#[serial]
async fn test_reset_password_weak_password() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email();
    app.register_verified(&email, PASSWORD).await;
    let token = request_reset(&app, &email).await;

    let response = app
        .post_public(
            "/auth/reset-password",
            json!({ "token": token, "password": "short" }),
        )
        .await;

    assert_status!(response, StatusCode::BAD_REQUEST.as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["errors"][0]["field"], "password");
}

#[tokio::test]
#[serial]
async fn test_change_password_requires_current_password() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email();
    app.register_verified(&email, PASSWORD).await;
    let session = app.login(&email, PASSWORD).await;

    let wrong = app
        .patch(
            "/users/password",
            &session.access_token,
            json!({ "current_password": "Wr0ngPass!", "new_password": NEW_PASSWORD }),
        )
        .await;
    assert_status!(wrong, StatusCode::UNAUTHORIZED.as_u16());
    let body: Value = wrong.json().await.unwrap();
    assert_eq!(body["message"], "Current password is incorrect");

    let right = app
        .patch(
            "/users/password",
            &session.access_token,
            json!({ "current_password": PASSWORD, "new_password": NEW_PASSWORD }),
        )
        .await;
    assert_status!(right, StatusCode::OK.as_u16());

    app.login(&email, NEW_PASSWORD).await;
}
