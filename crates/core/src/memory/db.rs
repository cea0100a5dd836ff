use serde_json::Value;
use sqlx::PgPool;

use super::scalar::{MemoryStoreError, ScalarKey, ScalarStore};
use crate::types::AgentId;

/// Scalar memory backed by the `soul_memory` table.
/// Each write is a single upsert, so a slot never holds a partial value.
#[derive(Debug, Clone)]
pub struct PgScalarStore {
    pool: PgPool,
}

impl PgScalarStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ScalarStore for PgScalarStore {
    async fn get(&self, agent: &AgentId, key: ScalarKey) -> Result<Option<Value>, MemoryStoreError> {
        let row: Option<(Value,)> = sqlx::query_as(
            "SELECT value FROM soul_memory WHERE agent_id = $1 AND key = $2",
        )
        .bind(agent.as_str())
        .bind(key.as_db_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, agent: &AgentId, key: ScalarKey, value: Value) -> Result<(), MemoryStoreError> {
        sqlx::query(
            "INSERT INTO soul_memory (agent_id, key, value, updated_at) VALUES ($1, $2, $3, now()) \
             ON CONFLICT (agent_id, key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(agent.as_str())
        .bind(key.as_db_str())
        .bind(&value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
