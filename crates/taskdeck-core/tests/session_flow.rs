mod common;

use common::{FakeServer, harness};
use taskdeck_core::error::ApiError;
use taskdeck_core::preferences::PreferenceStore;
use taskdeck_core::reset::{ResetPasswordFlow, TokenValidity};
use taskdeck_core::routes::{RouteDecision, RouteGuard};
use taskdeck_core::session::SessionPhase;
use taskdeck_core::theme::THEME_STORAGE_KEY;
use taskdeck_core::transport::{Method, NavigateMode, Navigator};
use taskdeck_shared::{Credentials, Registration, UserPatch};

fn credentials(email: &str, password: &str) -> Credentials {
    Credentials {
        email: email.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn restore_with_live_cookie_authenticates_once() {
    let server = FakeServer::new();
    let user_id = server.add_user("ada", "ada@example.com", "hunter22");
    server.sign_in(&user_id);
    let h = harness(&server, "/");

    assert_eq!(h.session.phase(), SessionPhase::Restoring);
    assert!(h.session.is_loading());

    assert_eq!(h.session.restore().await, SessionPhase::Authenticated);
    assert_eq!(h.session.restore().await, SessionPhase::Authenticated);

    let user = h.session.user().expect("restored user");
    assert_eq!(user.id, user_id);
    assert_eq!(user.email, "ada@example.com");
    assert!(!h.session.is_loading());
    assert_eq!(server.requests(), vec!["GET /auth/me"]);
}

#[tokio::test]
async fn failed_restore_is_silent_and_anonymous() {
    let server = FakeServer::new();
    server.set_offline(true);
    let h = harness(&server, "/login");

    assert_eq!(h.session.restore().await, SessionPhase::Anonymous);
    assert!(h.session.user().is_none());
    assert!(!h.session.is_loading());
    assert!(h.history.log().is_empty());
}

#[tokio::test]
async fn restoration_barrier_releases_after_restore() {
    let server = FakeServer::new();
    let h = harness(&server, "/login");

    assert_eq!(
        RouteGuard::decide("/dashboard", &h.session),
        RouteDecision::Pending
    );

    let waiter = async {
        h.session.wait_restored().await;
        h.session.phase()
    };
    let (seen, restored) = tokio::join!(waiter, h.session.restore());

    assert_eq!(seen, restored);
    assert_eq!(seen, SessionPhase::Anonymous);
    assert_eq!(
        RouteGuard::decide("/dashboard", &h.session),
        RouteDecision::Redirect("/login".to_string())
    );

    // Already released: returns immediately.
    h.session.wait_restored().await;
}

#[tokio::test]
async fn login_stores_identity_and_returns_server_payload() {
    let server = FakeServer::new();
    server.add_user("ada", "ada@example.com", "hunter22");
    let h = harness(&server, "/login");
    h.session.restore().await;

    let outcome = h
        .session
        .login(&credentials("ada@example.com", "hunter22"))
        .await
        .expect("login");

    assert_eq!(outcome.message.as_deref(), Some("Login successful"));
    assert_eq!(outcome.user.username, "ada");
    assert_eq!(outcome.data["user"]["email"], "ada@example.com");
    assert_eq!(h.session.phase(), SessionPhase::Authenticated);
    assert_eq!(
        RouteGuard::decide("/login", &h.session),
        RouteDecision::Redirect("/dashboard".to_string())
    );
}

#[tokio::test]
async fn rejected_login_propagates_without_redirect() {
    let server = FakeServer::new();
    server.add_user("ada", "ada@example.com", "hunter22");
    let h = harness(&server, "/login");
    h.session.restore().await;
    let before = h.history.reloads();

    let err = h
        .session
        .login(&credentials("ada@example.com", "wrong-pass"))
        .await
        .expect_err("bad password");

    assert_eq!(
        err,
        ApiError::Unauthorized {
            message: Some("Invalid credentials".to_string())
        }
    );
    assert_eq!(err.user_message("Login failed"), "Invalid credentials");
    assert!(h.session.user().is_none());
    assert_eq!(h.history.reloads(), before);
    assert_eq!(h.history.current_path(), "/login");
}

#[tokio::test]
async fn register_signs_the_new_user_in() {
    let server = FakeServer::new();
    let h = harness(&server, "/register");
    h.session.restore().await;

    let outcome = h
        .session
        .register(&Registration {
            username: "grace".to_string(),
            email: "grace@example.com".to_string(),
            password: "compiler1".to_string(),
        })
        .await
        .expect("register");

    assert_eq!(outcome.user.username, "grace");
    assert!(h.session.is_authenticated());
    assert!(server.session_user().is_some());

    let duplicate = h
        .session
        .register(&Registration {
            username: "grace2".to_string(),
            email: "grace@example.com".to_string(),
            password: "compiler1".to_string(),
        })
        .await
        .expect_err("duplicate email");
    assert_eq!(duplicate.server_message(), Some("User already exists"));
}

#[tokio::test]
async fn logout_runs_every_step_in_order_and_keeps_theme() {
    let server = FakeServer::new();
    let user_id = server.add_user("ada", "ada@example.com", "hunter22");
    server.sign_in(&user_id);
    let h = harness(&server, "/dashboard");
    h.preferences
        .set(THEME_STORAGE_KEY, "dark")
        .expect("seed theme");
    h.session.restore().await;
    server.clear_requests();

    assert!(h.session.logout().await);

    assert_eq!(
        server.requests(),
        vec!["POST /auth/logout", "GET /auth/clear-cache"]
    );
    assert!(h.session.user().is_none());
    assert!(server.session_user().is_none());
    assert_eq!(
        h.preferences.get(THEME_STORAGE_KEY).as_deref(),
        Some("dark")
    );
    let last = h.history.log().pop().expect("navigation");
    assert_eq!(last.path, "/login");
    assert_eq!(last.mode, NavigateMode::Replace);
}

#[tokio::test]
async fn logout_clears_locally_even_when_server_fails() {
    let server = FakeServer::new();
    let user_id = server.add_user("ada", "ada@example.com", "hunter22");
    server.sign_in(&user_id);
    let h = harness(&server, "/dashboard");
    h.session.restore().await;
    server.fail_next(Method::Post, "/auth/logout", 500, Some("boom"));
    server.fail_next(Method::Get, "/auth/clear-cache", 500, None);

    assert!(!h.session.logout().await);
    assert!(h.session.user().is_none());
    assert_eq!(h.history.current_path(), "/login");
}

#[tokio::test]
async fn update_user_merges_locally_only_when_signed_in() {
    let server = FakeServer::new();
    let user_id = server.add_user("ada", "ada@example.com", "hunter22");
    let h = harness(&server, "/login");
    h.session.restore().await;

    h.session.update_user(UserPatch {
        username: Some("ghost".to_string()),
        ..UserPatch::default()
    });
    assert!(h.session.user().is_none());

    server.sign_in(&user_id);
    h.session
        .login(&credentials("ada@example.com", "hunter22"))
        .await
        .expect("login");
    server.clear_requests();

    h.session.update_user(UserPatch {
        username: Some("ada.l".to_string()),
        ..UserPatch::default()
    });
    let user = h.session.user().expect("user");
    assert_eq!(user.username, "ada.l");
    assert_eq!(user.email, "ada@example.com");
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn forgot_password_reports_server_message_or_fallback() {
    let server = FakeServer::new();
    server.add_user("ada", "ada@example.com", "hunter22");
    let h = harness(&server, "/forgot-password");
    h.session.restore().await;

    let sent = h.session.forgot_password("ada@example.com").await;
    assert!(sent.success);
    assert_eq!(sent.message, "Password reset link sent to your email");

    let unknown = h.session.forgot_password("nobody@example.com").await;
    assert!(!unknown.success);
    assert_eq!(unknown.message, "There is no user with that email");

    server.set_offline(true);
    let offline = h.session.forgot_password("ada@example.com").await;
    assert!(!offline.success);
    assert_eq!(
        offline.message,
        "Failed to send reset email. Please try again."
    );
}

#[tokio::test]
async fn reset_round_trip_replaces_the_password() {
    let server = FakeServer::new();
    server.add_user("ada", "ada@example.com", "old-password");
    let token = server
        .issue_reset_token("ada@example.com")
        .expect("token");
    let h = harness(&server, &format!("/reset-password/{token}"));
    h.session.restore().await;

    let mut flow = ResetPasswordFlow::new(token.clone());
    assert_eq!(flow.verify(&h.session).await, &TokenValidity::Valid);

    server.clear_requests();
    let mismatch = flow.submit(&h.session, "new-secret", "new-secreT").await;
    assert!(!mismatch.success);
    assert_eq!(mismatch.message, "Passwords do not match");
    let short = flow.submit(&h.session, "abc", "abc").await;
    assert!(!short.success);
    let short_and_mismatched = flow.submit(&h.session, "abc", "abd").await;
    assert_eq!(
        short_and_mismatched.message,
        "Password must be at least 6 characters"
    );
    let unconfirmed = flow.submit(&h.session, "new-secret", "").await;
    assert_eq!(unconfirmed.message, "Please confirm your password");
    assert!(server.requests().is_empty());

    let done = flow.submit(&h.session, "new-secret", "new-secret").await;
    assert!(done.success, "{}", done.message);
    assert_eq!(
        server.requests(),
        vec![format!("PATCH /auth/reset-password/{token}")]
    );

    h.session
        .login(&credentials("ada@example.com", "old-password"))
        .await
        .expect_err("old password no longer works");
    h.session
        .login(&credentials("ada@example.com", "new-secret"))
        .await
        .expect("new password works");

    let check = h.session.check_token_validity(&token).await;
    assert!(!check.valid);
    assert_eq!(
        check.message.as_deref(),
        Some("Token is invalid or has expired")
    );
}

#[tokio::test]
async fn invalid_reset_link_blocks_submission() {
    let server = FakeServer::new();
    let h = harness(&server, "/reset-password/nope");
    h.session.restore().await;

    let mut flow = ResetPasswordFlow::new("nope");
    let untried = flow.submit(&h.session, "whatever", "whatever").await;
    assert!(!untried.success);

    assert!(matches!(
        flow.verify(&h.session).await,
        TokenValidity::Invalid(message) if message == "Token is invalid or has expired"
    ));
    server.clear_requests();
    let refused = flow.submit(&h.session, "whatever", "whatever").await;
    assert!(!refused.success);
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn reset_tokens_are_percent_encoded() {
    let server = FakeServer::new();
    let h = harness(&server, "/reset-password/a");
    h.session.restore().await;
    server.clear_requests();

    h.session.check_token_validity("a/b c").await;
    assert_eq!(server.requests(), vec!["GET /auth/check-token/a%2Fb%20c"]);
}

#[tokio::test]
async fn unauthorized_outside_exempt_pages_forces_login() {
    let server = FakeServer::new();
    let h = harness(&server, "/dashboard");

    assert_eq!(h.session.restore().await, SessionPhase::Anonymous);
    assert_eq!(h.history.reloads(), 1);
    let last = h.history.log().pop().expect("navigation");
    assert_eq!(last.path, "/login");
    assert_eq!(last.mode, NavigateMode::Hard);

    let err = h.tasks.list().await.expect_err("no session");
    assert!(matches!(err.source, ApiError::Unauthorized { .. }));
    // Already on /login, which is exempt.
    assert_eq!(h.history.reloads(), 1);
}

#[tokio::test]
async fn unauthorized_on_reset_page_does_not_redirect() {
    let server = FakeServer::new();
    let h = harness(&server, "/reset-password/xyz");

    assert_eq!(h.session.restore().await, SessionPhase::Anonymous);
    assert_eq!(h.history.reloads(), 0);
    assert_eq!(h.history.current_path(), "/reset-password/xyz");
    assert_eq!(
        RouteGuard::decide("/reset-password/xyz", &h.session),
        RouteDecision::Render
    );
}
