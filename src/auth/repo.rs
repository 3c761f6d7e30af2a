use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::repo_types::{Role, User};

const USER_COLUMNS: &str = r#"
    u.id, u.email, u.username, u.password_hash, u.confirmed, u.role_id,
    r.permissions AS permissions, u.last_seen, u.created_at
"#;

impl User {
    /// Find a user by id, with the role bits joined in.
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users u
            LEFT JOIN roles r ON r.id = u.role_id
            WHERE u.id = $1
            "#,
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Find a user by email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users u
            LEFT JOIN roles r ON r.id = u.role_id
            WHERE u.email = $1
            "#,
        ))
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_username(db: &PgPool, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users u
            LEFT JOIN roles r ON r.id = u.role_id
            WHERE u.username = $1
            "#,
        ))
        .bind(username)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Create a new user with a hashed password and an assigned role.
    pub async fn create(
        db: &PgPool,
        email: &str,
        username: &str,
        password_hash: &str,
        role_id: Option<Uuid>,
    ) -> anyhow::Result<User> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO users (email, username, password_hash, role_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(email)
        .bind(username)
        .bind(password_hash)
        .bind(role_id)
        .fetch_one(db)
        .await?;
        User::find_by_id(db, id)
            .await?
            .context("created user not found on reload")
    }

    /// Persist the mutable fields of the record.
    pub async fn save(&self, db: &PgPool) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET email = $2, password_hash = $3, confirmed = $4, role_id = $5, last_seen = $6
            WHERE id = $1
            "#,
        )
        .bind(self.id)
        .bind(&self.email)
        .bind(&self.password_hash)
        .bind(self.confirmed)
        .bind(self.role_id)
        .bind(self.last_seen)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Refresh last_seen for an authenticated request.
    pub async fn ping(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(r#"UPDATE users SET last_seen = now() WHERE id = $1"#)
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn list(db: &PgPool, limit: i64, offset: i64) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users u
            LEFT JOIN roles r ON r.id = u.role_id
            ORDER BY u.created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;
        Ok(users)
    }
}

impl Role {
    /// First role flagged as default. The schema should hold exactly one.
    pub async fn find_default(db: &PgPool) -> anyhow::Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(
            r#"
            SELECT id, name, permissions, is_default
            FROM roles
            WHERE is_default
            ORDER BY name
            LIMIT 1
            "#,
        )
        .fetch_optional(db)
        .await?;
        Ok(role)
    }

    pub async fn find_by_name(db: &PgPool, name: &str) -> anyhow::Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(
            r#"
            SELECT id, name, permissions, is_default
            FROM roles
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(db)
        .await?;
        Ok(role)
    }
}
