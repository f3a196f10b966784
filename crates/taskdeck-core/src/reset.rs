use tracing::{debug, instrument};

use crate::session::{RecoveryResult, SessionManager};
use crate::validate::{RESET_FIELDS, validate_reset};

const INVALID_TOKEN_FALLBACK: &str =
    "Invalid or expired token. Please request a new password reset link.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidity {
    Unknown,
    Valid,
    Invalid(String),
}

/// One visit to the reset-password screen: check the emailed token, then
/// accept a new password only while the token is known to be good.
#[derive(Debug, Clone)]
pub struct ResetPasswordFlow {
    token: String,
    validity: TokenValidity,
}

impl ResetPasswordFlow {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            validity: TokenValidity::Unknown,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn validity(&self) -> &TokenValidity {
        &self.validity
    }

    #[instrument(skip_all)]
    pub async fn verify(&mut self, session: &SessionManager) -> &TokenValidity {
        if self.token.trim().is_empty() {
            self.validity = TokenValidity::Invalid(INVALID_TOKEN_FALLBACK.to_string());
            return &self.validity;
        }

        let check = session.check_token_validity(&self.token).await;
        self.validity = if check.valid {
            TokenValidity::Valid
        } else {
            TokenValidity::Invalid(
                check
                    .message
                    .filter(|message| !message.trim().is_empty())
                    .unwrap_or_else(|| INVALID_TOKEN_FALLBACK.to_string()),
            )
        };
        debug!(valid = matches!(self.validity, TokenValidity::Valid), "reset token checked");
        &self.validity
    }

    /// Form errors come back as a failed result without any request.
    #[instrument(skip_all)]
    pub async fn submit(
        &self,
        session: &SessionManager,
        password: &str,
        confirm: &str,
    ) -> RecoveryResult {
        match &self.validity {
            TokenValidity::Valid => {}
            TokenValidity::Invalid(message) => {
                return RecoveryResult {
                    success: false,
                    message: message.clone(),
                };
            }
            TokenValidity::Unknown => {
                return RecoveryResult {
                    success: false,
                    message: "The reset link has not been verified yet.".to_string(),
                };
            }
        }

        let mut errors = validate_reset(password, confirm);
        if let Some(message) = RESET_FIELDS.iter().find_map(|field| errors.remove(field)) {
            return RecoveryResult {
                success: false,
                message,
            };
        }

        session.reset_password(&self.token, password).await
    }
}
