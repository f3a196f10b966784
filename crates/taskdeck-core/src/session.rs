//! Authenticated-identity state machine.
//!
//! `Restoring -> {Anonymous, Authenticated}` once at startup, then
//! `Anonymous <-> Authenticated` through login/register and logout. The
//! session cookie itself never passes through here; it lives in the
//! transport backend and is only observed through response outcomes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde_json::{Value, json};
use taskdeck_shared::{Credentials, Envelope, Registration, User, UserPatch};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::error::ApiError;
use crate::preferences::PreferenceStore;
use crate::theme::THEME_STORAGE_KEY;
use crate::transport::{ApiClient, ApiRequest, LOGIN_PATH, NavigateMode, Navigator, segment};

const FORGOT_PASSWORD_FALLBACK: &str = "Failed to send reset email. Please try again.";
const RESET_PASSWORD_FALLBACK: &str = "Failed to reset password. Please try again.";
const TOKEN_INVALID_FALLBACK: &str = "Token is invalid or has expired";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Restoring,
    Anonymous,
    Authenticated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub is_loading: bool,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn phase(&self) -> SessionPhase {
        if self.is_loading {
            SessionPhase::Restoring
        } else if self.user.is_some() {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Anonymous
        }
    }
}

/// Server response data merged with the identity it carried.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthOutcome {
    pub message: Option<String>,
    pub data: Value,
    pub user: User,
}

/// Uniform result of the password-recovery calls. Both outcomes carry a
/// message meant for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCheck {
    pub valid: bool,
    pub message: Option<String>,
}

pub struct SessionManager {
    client: Arc<ApiClient>,
    navigator: Arc<dyn Navigator>,
    preferences: Arc<dyn PreferenceStore>,
    state: RwLock<SessionSnapshot>,
    restore_started: AtomicBool,
    restored: watch::Sender<bool>,
}

impl SessionManager {
    pub fn new(
        client: Arc<ApiClient>,
        navigator: Arc<dyn Navigator>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        let (restored, _) = watch::channel(false);
        Self {
            client,
            navigator,
            preferences,
            state: RwLock::new(SessionSnapshot {
                user: None,
                is_loading: true,
            }),
            restore_started: AtomicBool::new(false),
            restored,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.read().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.state.read().user.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().is_loading
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().is_authenticated()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.read().phase()
    }

    /// Resolves once [`SessionManager::restore`] has settled.
    pub async fn wait_restored(&self) {
        let mut rx = self.restored.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Asks `/auth/me` once. Any failure means an anonymous visitor and is
    /// not reported. Later calls return the current phase without a request.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> SessionPhase {
        if self.restore_started.swap(true, Ordering::SeqCst) {
            debug!("restore already ran");
            self.wait_restored().await;
            return self.phase();
        }

        let user = match self.client.get("/auth/me").await {
            Ok(envelope) => match user_from(&envelope) {
                Ok(user) => Some(user),
                Err(err) => {
                    debug!(error = %err, "session check returned no usable identity");
                    None
                }
            },
            Err(err) => {
                debug!(error = %err, "session check failed; continuing anonymously");
                None
            }
        };

        let phase = {
            let mut state = self.state.write();
            state.user = user;
            state.is_loading = false;
            state.phase()
        };
        self.restored.send_replace(true);

        info!(?phase, "session restored");
        phase
    }

    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthOutcome, ApiError> {
        let envelope = self
            .client
            .post("/auth/login", json!({
                "email": credentials.email,
                "password": credentials.password,
            }))
            .await
            .inspect_err(|err| warn!(error = %err, "login rejected"))?;

        self.establish(envelope)
    }

    #[instrument(skip(self, registration), fields(username = %registration.username))]
    pub async fn register(&self, registration: &Registration) -> Result<AuthOutcome, ApiError> {
        let envelope = self
            .client
            .post("/auth/register", json!({
                "username": registration.username,
                "email": registration.email,
                "password": registration.password,
            }))
            .await
            .inspect_err(|err| warn!(error = %err, "registration rejected"))?;

        self.establish(envelope)
    }

    fn establish(&self, envelope: Envelope) -> Result<AuthOutcome, ApiError> {
        let user = user_from(&envelope)?;
        self.state.write().user = Some(user.clone());
        info!(user_id = %user.id, "session established");

        Ok(AuthOutcome {
            message: envelope.message,
            data: envelope.data.unwrap_or(Value::Null),
            user,
        })
    }

    /// Always ends anonymous on `/login`. The return value only reports
    /// whether the server accepted the logout call.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> bool {
        let saved_theme = self.preferences.get(THEME_STORAGE_KEY);

        let server_ok = match self.client.post("/auth/logout", json!({})).await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "server logout failed; clearing local session anyway");
                false
            }
        };

        self.state.write().user = None;

        if let Err(err) = self.client.get("/auth/clear-cache").await {
            warn!(error = %err, "cache clear failed");
        }

        if let Some(theme) = saved_theme
            && let Err(err) = self.preferences.set(THEME_STORAGE_KEY, &theme)
        {
            warn!(error = %err, "failed to restore theme preference after logout");
        }

        self.navigator.navigate(LOGIN_PATH, NavigateMode::Replace);
        info!(server_ok, "logged out");
        server_ok
    }

    /// Drops the local identity without contacting the server, as a forced
    /// reload does. The next request decides whether the cookie still works.
    pub fn discard(&self) {
        if self.state.write().user.take().is_some() {
            info!("local session discarded");
        }
    }

    /// Local merge only; ignored while anonymous.
    pub fn update_user(&self, patch: UserPatch) {
        let mut state = self.state.write();
        if let Some(user) = state.user.as_mut() {
            user.merge(patch);
            debug!(user_id = %user.id, "user profile merged");
        }
    }

    #[instrument(skip(self))]
    pub async fn forgot_password(&self, email: &str) -> RecoveryResult {
        let request = ApiRequest::post("/auth/forgot-password").with_body(json!({ "email": email }));
        recovery_result(self.client.send(request).await, FORGOT_PASSWORD_FALLBACK)
    }

    #[instrument(skip(self, token, password))]
    pub async fn reset_password(&self, token: &str, password: &str) -> RecoveryResult {
        let request = ApiRequest::patch(format!("/auth/reset-password/{}", segment(token)))
            .with_body(json!({ "password": password }));
        recovery_result(self.client.send(request).await, RESET_PASSWORD_FALLBACK)
    }

    #[instrument(skip(self, token))]
    pub async fn check_token_validity(&self, token: &str) -> TokenCheck {
        let path = format!("/auth/check-token/{}", segment(token));
        match self.client.get(&path).await {
            Ok(_) => TokenCheck {
                valid: true,
                message: None,
            },
            Err(err) => {
                debug!(error = %err, "reset token rejected");
                TokenCheck {
                    valid: false,
                    message: Some(err.user_message(TOKEN_INVALID_FALLBACK)),
                }
            }
        }
    }
}

fn user_from(envelope: &Envelope) -> Result<User, ApiError> {
    let raw = envelope
        .data
        .as_ref()
        .and_then(|data| data.get("user"))
        .filter(|user| !user.is_null())
        .ok_or_else(|| ApiError::Malformed("response carries no user".to_string()))?;

    serde_json::from_value(raw.clone()).map_err(|err| ApiError::Malformed(err.to_string()))
}

fn recovery_result(outcome: Result<Envelope, ApiError>, fallback: &str) -> RecoveryResult {
    match outcome {
        Ok(envelope) => RecoveryResult {
            success: true,
            message: envelope.message.unwrap_or_default(),
        },
        Err(err) => {
            warn!(error = %err, "password recovery call failed");
            RecoveryResult {
                success: false,
                message: err.user_message(fallback),
            }
        }
    }
}
