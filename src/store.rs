use axum::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::repo_types::User;

/// Lookups and writes the token subsystem needs from persistence. One logical
/// transaction per call; read-your-writes within a request is assumed from
/// the backing store.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn save(&self, user: &User) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        User::find_by_id(&self.db, id).await
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        User::find_by_email(&self.db, email).await
    }

    async fn save(&self, user: &User) -> anyhow::Result<()> {
        user.save(&self.db).await
    }
}
