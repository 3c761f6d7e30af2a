use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::password::{hash_password, verify_password};

/// User record in the database. `permissions` carries the bits of the user's
/// role, joined in at load time, so permission checks stay a pure function of
/// the record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub(crate) password_hash: String, // Argon2 hash, write-only: no getter exists
    pub confirmed: bool,
    pub role_id: Option<Uuid>,
    pub permissions: Option<i32>,
    pub last_seen: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl User {
    /// Replace the stored credential with the hash of `plain`.
    pub fn set_password(&mut self, plain: &str) -> anyhow::Result<()> {
        self.password_hash = hash_password(plain)?;
        Ok(())
    }

    /// Check `plain` against the stored credential. A malformed stored hash
    /// verifies false, same as a wrong password.
    pub fn verify_password(&self, plain: &str) -> bool {
        verify_password(plain, &self.password_hash)
    }
}

/// Role record. `permissions` is a bitmask, one bit per capability; at most
/// one role carries `is_default`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub permissions: i32,
    pub is_default: bool,
}
