use std::sync::Arc;

use axum::extract::FromRef;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::repo_types::User;
use crate::auth::tokens::TokenSigner;
use crate::state::AppState;
use crate::store::{PgStore, UserStore};

/// Why an account operation was refused. Callers only ever see the boolean
/// outcome; the reason is logged here and the view layer picks the wording.
#[derive(Debug, Error)]
enum AccountError {
    #[error("invalid token")]
    InvalidToken,
    #[error("token subject does not match acting user")]
    IdentityMismatch,
    #[error("token subject no longer exists")]
    NotFound,
    #[error("email already claimed by another user")]
    DuplicateEmail,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Applies decoded claims to user records: account confirmation, password
/// reset and email change. Every mutation is persisted through the store
/// before the operation reports success.
#[derive(Clone)]
pub struct Accounts {
    signer: TokenSigner,
    store: Arc<dyn UserStore>,
}

impl FromRef<AppState> for Accounts {
    fn from_ref(state: &AppState) -> Self {
        Self {
            signer: TokenSigner::from_ref(state),
            store: Arc::new(PgStore::new(state.db.clone())),
        }
    }
}

impl Accounts {
    pub fn new(signer: TokenSigner, store: Arc<dyn UserStore>) -> Self {
        Self { signer, store }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Confirm the acting user's account with a Confirm token. Idempotent:
    /// re-confirming an already confirmed account succeeds.
    pub async fn confirm(&self, user: &mut User, token: &str) -> bool {
        match self.try_confirm(user, token).await {
            Ok(()) => {
                info!(user_id = %user.id, "account confirmed");
                true
            }
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "confirm rejected");
                false
            }
        }
    }

    async fn try_confirm(&self, user: &mut User, token: &str) -> Result<(), AccountError> {
        let claim = self
            .signer
            .decode_confirm(token)
            .map_err(|_| AccountError::InvalidToken)?;
        // A token issued for user A must not confirm user B, even though the
        // caller is already authenticated.
        if claim.confirm != user.id {
            return Err(AccountError::IdentityMismatch);
        }
        user.confirmed = true;
        self.store.save(user).await?;
        Ok(())
    }

    /// Set a new password for the subject of a Reset token. The caller is
    /// anonymous; the token is the whole authorization.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> bool {
        match self.try_reset_password(token, new_password).await {
            Ok(user_id) => {
                info!(user_id = %user_id, "password reset");
                true
            }
            Err(e) => {
                warn!(error = %e, "password reset rejected");
                false
            }
        }
    }

    async fn try_reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<uuid::Uuid, AccountError> {
        let claim = self
            .signer
            .decode_reset(token)
            .map_err(|_| AccountError::InvalidToken)?;
        let mut user = self
            .store
            .find_by_id(claim.reset)
            .await?
            .ok_or(AccountError::NotFound)?;
        user.set_password(new_password)?;
        self.store.save(&user).await?;
        Ok(user.id)
    }

    /// Move the acting user to the address carried by a ChangeEmail token.
    /// Uniqueness of the target address is re-checked here, not only at
    /// request time; a concurrent claim between this check and the save is
    /// tolerated last-write-wins.
    pub async fn change_email(&self, user: &mut User, token: &str) -> bool {
        match self.try_change_email(user, token).await {
            Ok(()) => {
                info!(user_id = %user.id, email = %user.email, "email changed");
                true
            }
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "email change rejected");
                false
            }
        }
    }

    async fn try_change_email(&self, user: &mut User, token: &str) -> Result<(), AccountError> {
        let claim = self
            .signer
            .decode_change_email(token)
            .map_err(|_| AccountError::InvalidToken)?;
        if claim.change_email != user.id {
            return Err(AccountError::IdentityMismatch);
        }
        let new_email = claim.new_email.trim().to_lowercase();
        if let Some(other) = self.store.find_by_email(&new_email).await? {
            if other.id != user.id {
                return Err(AccountError::DuplicateEmail);
            }
        }
        user.email = new_email;
        self.store.save(user).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password;
    use crate::config::TokenConfig;
    use axum::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use time::OffsetDateTime;
    use uuid::Uuid;

    struct MemStore {
        users: Mutex<HashMap<Uuid, User>>,
    }

    impl MemStore {
        fn new(users: Vec<User>) -> Arc<Self> {
            Arc::new(Self {
                users: Mutex::new(users.into_iter().map(|u| (u.id, u)).collect()),
            })
        }

        fn get(&self, id: Uuid) -> User {
            self.users.lock().unwrap().get(&id).cloned().expect("user in store")
        }
    }

    #[async_trait]
    impl UserStore for MemStore {
        async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
            Ok(self.users.lock().unwrap().get(&id).cloned())
        }

        async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .values()
                .find(|u| u.email == email)
                .cloned())
        }

        async fn save(&self, user: &User) -> anyhow::Result<()> {
            self.users.lock().unwrap().insert(user.id, user.clone());
            Ok(())
        }
    }

    fn make_user(email: &str, username: &str, password: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email: email.into(),
            username: username.into(),
            password_hash: hash_password(password).expect("hash"),
            confirmed: false,
            role_id: None,
            permissions: None,
            last_seen: OffsetDateTime::now_utc(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn make_accounts(users: Vec<User>) -> (Accounts, Arc<MemStore>) {
        let signer = TokenSigner::new(&TokenConfig {
            secret_key: "test-secret".into(),
            ttl_secs: 3600,
            session_ttl_secs: 3600,
        });
        let store = MemStore::new(users);
        (Accounts::new(signer, store.clone()), store)
    }

    #[tokio::test]
    async fn confirm_with_valid_token() {
        let mut user = make_user("cat@example.com", "cat", "meow");
        let (accounts, store) = make_accounts(vec![user.clone()]);
        let token = accounts.signer().issue_confirm(user.id, None).expect("issue");

        assert!(accounts.confirm(&mut user, &token).await);
        assert!(user.confirmed);
        assert!(store.get(user.id).confirmed);
    }

    #[tokio::test]
    async fn confirm_rejects_token_for_other_user() {
        let alice = make_user("alice@example.com", "alice", "cat");
        let mut bob = make_user("bob@example.com", "bob", "dog");
        let (accounts, store) = make_accounts(vec![alice.clone(), bob.clone()]);
        let token = accounts.signer().issue_confirm(alice.id, None).expect("issue");

        assert!(!accounts.confirm(&mut bob, &token).await);
        assert!(!bob.confirmed);
        assert!(!store.get(bob.id).confirmed);
    }

    #[tokio::test]
    async fn confirm_is_idempotent() {
        let mut user = make_user("cat@example.com", "cat", "meow");
        let (accounts, _store) = make_accounts(vec![user.clone()]);
        let token = accounts.signer().issue_confirm(user.id, None).expect("issue");

        assert!(accounts.confirm(&mut user, &token).await);
        assert!(accounts.confirm(&mut user, &token).await);
        assert!(user.confirmed);
    }

    #[tokio::test]
    async fn confirm_rejects_garbage_token() {
        let mut user = make_user("cat@example.com", "cat", "meow");
        let (accounts, _store) = make_accounts(vec![user.clone()]);

        assert!(!accounts.confirm(&mut user, "garbage").await);
        assert!(!user.confirmed);
    }

    #[tokio::test]
    async fn reset_changes_the_password() {
        let user = make_user("cat@example.com", "cat", "old-password");
        let (accounts, store) = make_accounts(vec![user.clone()]);
        let token = accounts.signer().issue_reset(user.id, None).expect("issue");

        assert!(accounts.reset_password(&token, "new-password").await);
        let reloaded = store.get(user.id);
        assert!(reloaded.verify_password("new-password"));
        assert!(!reloaded.verify_password("old-password"));
    }

    #[tokio::test]
    async fn reset_rejects_unknown_subject() {
        let (accounts, _store) = make_accounts(vec![]);
        let token = accounts
            .signer()
            .issue_reset(Uuid::new_v4(), None)
            .expect("issue");

        assert!(!accounts.reset_password(&token, "whatever").await);
    }

    #[tokio::test]
    async fn reset_rejects_a_confirm_token() {
        let user = make_user("cat@example.com", "cat", "old-password");
        let (accounts, store) = make_accounts(vec![user.clone()]);
        let token = accounts.signer().issue_confirm(user.id, None).expect("issue");

        assert!(!accounts.reset_password(&token, "new-password").await);
        assert!(store.get(user.id).verify_password("old-password"));
    }

    #[tokio::test]
    async fn change_email_with_valid_token() {
        let mut user = make_user("cat@example.com", "cat", "meow");
        let (accounts, store) = make_accounts(vec![user.clone()]);
        let token = accounts
            .signer()
            .issue_change_email(user.id, "New.Cat@Example.com", None)
            .expect("issue");

        assert!(accounts.change_email(&mut user, &token).await);
        assert_eq!(user.email, "new.cat@example.com");
        assert_eq!(store.get(user.id).email, "new.cat@example.com");
    }

    #[tokio::test]
    async fn change_email_rejects_taken_address() {
        let mut alice = make_user("alice@example.com", "alice", "cat");
        let bob = make_user("bob@example.com", "bob", "dog");
        let (accounts, store) = make_accounts(vec![alice.clone(), bob.clone()]);
        let token = accounts
            .signer()
            .issue_change_email(alice.id, "bob@example.com", None)
            .expect("issue");

        assert!(!accounts.change_email(&mut alice, &token).await);
        assert_eq!(alice.email, "alice@example.com");
        assert_eq!(store.get(alice.id).email, "alice@example.com");
    }

    #[tokio::test]
    async fn change_email_rejects_token_for_other_user() {
        let alice = make_user("alice@example.com", "alice", "cat");
        let mut bob = make_user("bob@example.com", "bob", "dog");
        let (accounts, _store) = make_accounts(vec![alice.clone(), bob.clone()]);
        let token = accounts
            .signer()
            .issue_change_email(alice.id, "fresh@example.com", None)
            .expect("issue");

        assert!(!accounts.change_email(&mut bob, &token).await);
        assert_eq!(bob.email, "bob@example.com");
    }

    #[tokio::test]
    async fn change_email_onto_own_address_succeeds() {
        let mut user = make_user("cat@example.com", "cat", "meow");
        let (accounts, _store) = make_accounts(vec![user.clone()]);
        let token = accounts
            .signer()
            .issue_change_email(user.id, "cat@example.com", None)
            .expect("issue");

        assert!(accounts.change_email(&mut user, &token).await);
        assert_eq!(user.email, "cat@example.com");
    }
}
