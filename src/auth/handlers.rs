use axum::{
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        accounts::Accounts,
        dto::{
            AuthResponse, ChangeEmailRequest, LoginRequest, OutcomeResponse, PublicUser,
            RegisterRequest, ResetPasswordRequest, ResetRequest,
        },
        extractors::CurrentUser,
        password::hash_password,
        permissions::is_administrator,
        repo_types::{Role, User},
        tokens::TokenSigner,
    },
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/confirm", post(resend_confirmation))
        .route("/auth/confirm/:token", get(confirm))
        .route("/auth/reset", post(request_reset))
        .route("/auth/reset/:token", post(reset_password))
        .route("/auth/change-email", post(request_email_change))
        .route("/auth/change-email/:token", get(confirm_email_change))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/admin/users", get(list_users))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    payload.email = payload.email.trim().to_lowercase();
    payload.username = payload.username.trim().to_string();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }
    if payload.username.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Username required".into()));
    }
    if payload.password.len() < 8 {
        warn!("password too short");
        return Err((StatusCode::BAD_REQUEST, "Password too short".into()));
    }

    match User::find_by_email(&state.db, &payload.email).await {
        Ok(Some(_)) => {
            warn!(email = %payload.email, "email already registered");
            return Err((StatusCode::CONFLICT, "Email already registered".into()));
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    }
    match User::find_by_username(&state.db, &payload.username).await {
        Ok(Some(_)) => {
            warn!(username = %payload.username, "username already taken");
            return Err((StatusCode::CONFLICT, "Username already taken".into()));
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "find_by_username failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    }

    // The configured administrator address gets the Administrator role,
    // everyone else the default role.
    let role = if state.config.admin_email.as_deref() == Some(payload.email.as_str()) {
        Role::find_by_name(&state.db, "Administrator").await
    } else {
        Role::find_default(&state.db).await
    };
    let role_id = match role {
        Ok(r) => r.map(|r| r.id),
        Err(e) => {
            error!(error = %e, "role lookup failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    let hash = match hash_password(&payload.password) {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "hash_password failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    let user = match User::create(&state.db, &payload.email, &payload.username, &hash, role_id).await
    {
        Ok(u) => u,
        Err(e) => {
            error!(error = %e, "create user failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    let signer = TokenSigner::from_ref(&state);
    send_confirmation_mail(&state, &signer, &user).await;

    let session_token = match signer.sign_session(user.id) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "sign session failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(Json(AuthResponse {
        session_token,
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    payload.email = payload.email.trim().to_lowercase();

    let user = match User::find_by_email(&state.db, &payload.email).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            warn!(email = %payload.email, "login unknown email");
            return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
        }
        Err(e) => {
            error!(error = %e, "find_by_email failed");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    if !user.verify_password(&payload.password) {
        warn!(email = %payload.email, user_id = %user.id, "login invalid password");
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
    }

    let signer = TokenSigner::from_ref(&state);
    let session_token = signer
        .sign_session(user.id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(AuthResponse {
        session_token,
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip(state, user, token))]
pub async fn confirm(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    Path(token): Path<String>,
) -> Result<Json<OutcomeResponse>, (StatusCode, String)> {
    if user.confirmed {
        return Ok(Json(OutcomeResponse {
            ok: true,
            message: "account already confirmed",
        }));
    }

    let accounts = Accounts::from_ref(&state);
    if accounts.confirm(&mut user, &token).await {
        Ok(Json(OutcomeResponse {
            ok: true,
            message: "account confirmed",
        }))
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            "Invalid or expired confirmation link".into(),
        ))
    }
}

#[instrument(skip(state, user))]
pub async fn resend_confirmation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<OutcomeResponse>, (StatusCode, String)> {
    if user.confirmed {
        return Ok(Json(OutcomeResponse {
            ok: true,
            message: "account already confirmed",
        }));
    }

    let signer = TokenSigner::from_ref(&state);
    send_confirmation_mail(&state, &signer, &user).await;
    Ok(Json(OutcomeResponse {
        ok: true,
        message: "confirmation mail sent",
    }))
}

#[instrument(skip(state, payload))]
pub async fn request_reset(
    State(state): State<AppState>,
    Json(mut payload): Json<ResetRequest>,
) -> (StatusCode, Json<OutcomeResponse>) {
    payload.email = payload.email.trim().to_lowercase();

    // Same answer whether or not the address exists: no enumeration oracle.
    if let Ok(Some(user)) = User::find_by_email(&state.db, &payload.email).await {
        let signer = TokenSigner::from_ref(&state);
        match signer.issue_reset(user.id, None) {
            Ok(token) => {
                let subject = format!("{} Reset Your Password", state.config.mail_subject_prefix);
                if let Err(e) = state
                    .mailer
                    .send(
                        &user.email,
                        &subject,
                        "auth/email/reset_password",
                        json!({ "username": user.username, "token": token }),
                    )
                    .await
                {
                    error!(error = %e, user_id = %user.id, "reset mail failed");
                }
            }
            Err(e) => error!(error = %e, user_id = %user.id, "issue reset token failed"),
        }
    }

    (
        StatusCode::ACCEPTED,
        Json(OutcomeResponse {
            ok: true,
            message: "if the address exists, a reset mail was sent",
        }),
    )
}

#[instrument(skip(state, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<OutcomeResponse>, (StatusCode, String)> {
    if payload.password.len() < 8 {
        return Err((StatusCode::BAD_REQUEST, "Password too short".into()));
    }

    let accounts = Accounts::from_ref(&state);
    if accounts.reset_password(&token, &payload.password).await {
        Ok(Json(OutcomeResponse {
            ok: true,
            message: "password updated",
        }))
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            "Invalid or expired reset link".into(),
        ))
    }
}

#[instrument(skip(state, user, payload))]
pub async fn request_email_change(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(mut payload): Json<ChangeEmailRequest>,
) -> Result<Json<OutcomeResponse>, (StatusCode, String)> {
    // Changing the address requires the password again, here at request
    // time; the confirm step trusts only the token.
    if !user.verify_password(&payload.password) {
        warn!(user_id = %user.id, "email change with wrong password");
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
    }

    payload.new_email = payload.new_email.trim().to_lowercase();
    if !is_valid_email(&payload.new_email) {
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }

    if let Ok(Some(other)) = User::find_by_email(&state.db, &payload.new_email).await {
        if other.id != user.id {
            warn!(user_id = %user.id, "requested email already taken");
            return Err((StatusCode::CONFLICT, "Email already registered".into()));
        }
    }

    let signer = TokenSigner::from_ref(&state);
    let token = signer
        .issue_change_email(user.id, &payload.new_email, None)
        .map_err(|e| {
            error!(error = %e, "issue change-email token failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    // The token goes to the address being claimed, not the current one.
    let subject = format!(
        "{} Confirm Your Email Address",
        state.config.mail_subject_prefix
    );
    if let Err(e) = state
        .mailer
        .send(
            &payload.new_email,
            &subject,
            "auth/email/change_email",
            json!({ "username": user.username, "token": token }),
        )
        .await
    {
        error!(error = %e, user_id = %user.id, "change-email mail failed");
        return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
    }

    info!(user_id = %user.id, "email change requested");
    Ok(Json(OutcomeResponse {
        ok: true,
        message: "confirmation mail sent to the new address",
    }))
}

#[instrument(skip(state, user, token))]
pub async fn confirm_email_change(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    Path(token): Path<String>,
) -> Result<Json<OutcomeResponse>, (StatusCode, String)> {
    let accounts = Accounts::from_ref(&state);
    if accounts.change_email(&mut user, &token).await {
        Ok(Json(OutcomeResponse {
            ok: true,
            message: "email address updated",
        }))
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            "Invalid or expired confirmation link".into(),
        ))
    }
}

#[instrument(skip(user))]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(PublicUser::from(&user))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[instrument(skip(state, user))]
pub async fn list_users(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<PublicUser>>, (StatusCode, String)> {
    if !is_administrator(Some(&user)) {
        warn!(user_id = %user.id, "admin route without ADMINISTER bit");
        return Err((StatusCode::FORBIDDEN, "Forbidden".into()));
    }

    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let offset = params.offset.unwrap_or(0).max(0);
    let users = User::list(&state.db, limit, offset).await.map_err(|e| {
        error!(error = %e, "list users failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(users.iter().map(PublicUser::from).collect()))
}

async fn send_confirmation_mail(state: &AppState, signer: &TokenSigner, user: &User) {
    // Registration should not fail because the mail did; log and move on.
    match signer.issue_confirm(user.id, None) {
        Ok(token) => {
            let subject = format!("{} Confirm Your Account", state.config.mail_subject_prefix);
            if let Err(e) = state
                .mailer
                .send(
                    &user.email,
                    &subject,
                    "auth/email/confirm",
                    json!({ "username": user.username, "token": token }),
                )
                .await
            {
                error!(error = %e, user_id = %user.id, "confirmation mail failed");
            }
        }
        Err(e) => error!(error = %e, user_id = %user.id, "issue confirm token failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("cat@example.com"));
        assert!(is_valid_email("a.b+c@sub.example.org"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("two@at@signs.com"));
        assert!(!is_valid_email("spaces in@example.com"));
    }

    #[tokio::test]
    async fn reset_request_always_answers_accepted() {
        // Unknown address, unreachable store: the answer is 202 either way,
        // so the endpoint is not an account-enumeration oracle.
        let state = crate::state::AppState::fake();
        let (status, Json(body)) = request_reset(
            State(state),
            Json(ResetRequest {
                email: "ghost@example.com".into(),
            }),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body.ok);
    }

    #[tokio::test]
    async fn register_fails_closed_when_lookup_errors() {
        // A failed duplicate lookup must not fall through to the insert.
        let state = crate::state::AppState::fake();
        let result = register(
            State(state),
            Json(RegisterRequest {
                email: "cat@example.com".into(),
                username: "cat".into(),
                password: "longenough".into(),
            }),
        )
        .await;
        match result {
            Err((status, _)) => assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR),
            Ok(_) => panic!("register must not succeed without a reachable store"),
        }
    }

    #[test]
    fn public_user_serialization_hides_credentials() {
        let user = PublicUser {
            id: uuid::Uuid::new_v4(),
            email: "test@example.com".into(),
            username: "test".into(),
            confirmed: false,
            last_seen: time::OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("test@example.com"));
        assert!(!json.contains("password"));
    }
}
