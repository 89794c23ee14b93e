use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::auth::repo_types::{NewUser, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    EmailTaken,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence for staff accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>>;
    /// Inserts an active user and returns its id. The unique index on `email`
    /// is what rejects duplicates; callers may pre-check but must not rely on it.
    async fn create(&self, new_user: NewUser) -> Result<i64, StoreError>;
    async fn record_login(&self, id: i64) -> anyhow::Result<()>;
    async fn update_password_hash(&self, id: i64, password_hash: &str) -> anyhow::Result<()>;
    /// Account enable/disable. Not routed; performed by an administrator out of band.
    async fn set_active(&self, id: i64, active: bool) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, role, full_name, is_active, created_at, last_login
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, role, full_name, is_active, created_at, last_login
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn create(&self, new_user: NewUser) -> Result<i64, StoreError> {
        let res = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO users (email, password_hash, full_name, role, is_active)
            VALUES ($1, $2, $3, $4, TRUE)
            RETURNING id
            "#,
        )
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(&new_user.full_name)
        .bind(new_user.role.as_str())
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(id) => Ok(id),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::EmailTaken),
            Err(e) => Err(anyhow::Error::new(e).context("insert user").into()),
        }
    }

    async fn record_login(&self, id: i64) -> anyhow::Result<()> {
        sqlx::query(r#"UPDATE users SET last_login = now() WHERE id = $1"#)
            .bind(id)
            .execute(&self.db)
            .await
            .context("update last_login")?;
        Ok(())
    }

    async fn update_password_hash(&self, id: i64, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query(r#"UPDATE users SET password_hash = $1 WHERE id = $2"#)
            .bind(password_hash)
            .bind(id)
            .execute(&self.db)
            .await
            .context("update password_hash")?;
        Ok(())
    }

    async fn set_active(&self, id: i64, active: bool) -> anyhow::Result<()> {
        sqlx::query(r#"UPDATE users SET is_active = $1 WHERE id = $2"#)
            .bind(active)
            .bind(id)
            .execute(&self.db)
            .await
            .context("update is_active")?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) use memory::MemoryUserStore;
