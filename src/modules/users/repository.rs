use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::model::{QuotaKind, User};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Adds `amount` to the `kind` counter only if the result stays within
    /// `limit`. Returns the new usage, or `None` when the charge was refused.
    async fn increment_usage_bounded(
        &self,
        id: Uuid,
        kind: QuotaKind,
        amount: i32,
        limit: i32,
    ) -> Result<Option<i32>>;
}

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, plan, monthly_quota_used, whisper_quota_used, quota_reset_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn increment_usage_bounded(
        &self,
        id: Uuid,
        kind: QuotaKind,
        amount: i32,
        limit: i32,
    ) -> Result<Option<i32>> {
        // Single conditional UPDATE: concurrent callers serialize on the row lock,
        // and the bound is re-evaluated against the committed value.
        let column = kind.column();
        let sql = format!(
            "UPDATE users SET {column} = {column} + $2, updated_at = NOW() \
             WHERE id = $1 AND {column} + $2 <= $3 \
             RETURNING {column}"
        );

        let used: Option<i32> = sqlx::query_scalar(&sql)
            .bind(id)
            .bind(amount)
            .bind(limit)
            .fetch_optional(&self.pool)
            .await?;

        Ok(used)
    }
}
