use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::User;

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body asking for a password-reset mail.
#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

/// Request body carrying the new password on the reset-confirm step.
#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
}

/// Request body asking for an email change. The current password is required
/// again at request time; the confirm step trusts only the token.
#[derive(Debug, Deserialize)]
pub struct ChangeEmailRequest {
    pub new_email: String,
    pub password: String,
}

/// Response returned after login or register.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub session_token: String,
    pub user: PublicUser,
}

/// Outcome of a token-confirmation step.
#[derive(Debug, Serialize)]
pub struct OutcomeResponse {
    pub ok: bool,
    pub message: &'static str,
}

/// Public part of the user returned to clients.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub confirmed: bool,
    pub last_seen: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            confirmed: user.confirmed,
            last_seen: user.last_seen,
        }
    }
}
