use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
};
use tracing::warn;

use crate::auth::repo_types::User;
use crate::auth::tokens::TokenSigner;
use crate::state::AppState;

/// Extracts the acting user from the Bearer session token and loads the row,
/// refreshing last_seen on the way. Any failure is a plain 401.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or((
                StatusCode::UNAUTHORIZED,
                "missing Authorization header".to_string(),
            ))?;

        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or((StatusCode::UNAUTHORIZED, "invalid auth scheme".to_string()))?;

        let signer = TokenSigner::from_ref(state);
        let user_id = signer.verify_session(token).map_err(|_| {
            warn!("invalid or expired session token");
            (
                StatusCode::UNAUTHORIZED,
                "invalid or expired token".to_string(),
            )
        })?;

        let user = User::find_by_id(&state.db, user_id)
            .await
            .ok()
            .flatten()
            .ok_or((StatusCode::UNAUTHORIZED, "user not found".to_string()))?;

        // Best effort; an authenticated request should not fail on this.
        if let Err(e) = User::ping(&state.db, user.id).await {
            warn!(error = %e, user_id = %user.id, "last_seen refresh failed");
        }

        Ok(CurrentUser(user))
    }
}
