//! Persisted scalar memory: durable, agent-scoped values that survive across
//! handler invocations.
//!
//! Keys are an enumerated set. The controller only ever sees [`SoulMemory`],
//! a view of one agent's slots with defaults applied.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::SoulCfg;
use crate::types::AgentId;

/// Named scalar slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKey {
    /// The soul's current belief about what the room contains.
    RoomDescription,
    /// How many follow-up fragments the last fragmenting flow chose.
    FragmentCount,
    /// Running notes kept by the summarization subprocess.
    ConversationNotes,
}

impl ScalarKey {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::RoomDescription => "room_description",
            Self::FragmentCount => "fragment_count",
            Self::ConversationNotes => "conversation_notes",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryStoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("malformed value in slot {key}: {value}")]
    Malformed { key: &'static str, value: Value },
}

/// Durable key/value storage scoped by agent id.
///
/// A `set` must replace the stored value atomically. Interleaving is prevented
/// by the host's single-flight guarantee, not by the store.
#[async_trait::async_trait]
pub trait ScalarStore: Send + Sync {
    async fn get(&self, agent: &AgentId, key: ScalarKey) -> Result<Option<Value>, MemoryStoreError>;
    async fn set(&self, agent: &AgentId, key: ScalarKey, value: Value) -> Result<(), MemoryStoreError>;
}

/// Ephemeral store used when no database is configured.
#[derive(Debug, Default)]
pub struct InMemoryScalarStore {
    slots: RwLock<HashMap<(AgentId, ScalarKey), Value>>,
}

impl InMemoryScalarStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ScalarStore for InMemoryScalarStore {
    async fn get(&self, agent: &AgentId, key: ScalarKey) -> Result<Option<Value>, MemoryStoreError> {
        Ok(self.slots.read().await.get(&(agent.clone(), key)).cloned())
    }

    async fn set(&self, agent: &AgentId, key: ScalarKey, value: Value) -> Result<(), MemoryStoreError> {
        self.slots.write().await.insert((agent.clone(), key), value);
        Ok(())
    }
}

/// One agent's scalar slots, with typed accessors and defaults.
#[derive(Clone)]
pub struct SoulMemory {
    store: Arc<dyn ScalarStore>,
    agent: AgentId,
    default_room: String,
    default_notes: String,
}

impl SoulMemory {
    pub fn new(store: Arc<dyn ScalarStore>, agent: AgentId, cfg: &SoulCfg) -> Self {
        Self {
            store,
            agent,
            default_room: cfg.initial_room_description.clone(),
            default_notes: format!(
                "{} is experiencing a series of events and is trying to learn as much as possible about them.",
                cfg.soul_name
            ),
        }
    }

    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    pub async fn room_description(&self) -> Result<String, MemoryStoreError> {
        self.get_string(ScalarKey::RoomDescription, &self.default_room).await
    }

    pub async fn set_room_description(&self, description: &str) -> Result<(), MemoryStoreError> {
        self.store
            .set(&self.agent, ScalarKey::RoomDescription, Value::from(description))
            .await
    }

    /// Previous fragment count; 0 until the first fragmenting flow persists one.
    pub async fn fragment_count(&self) -> Result<u8, MemoryStoreError> {
        match self.store.get(&self.agent, ScalarKey::FragmentCount).await? {
            None => Ok(0),
            Some(value) => value
                .as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or(MemoryStoreError::Malformed {
                    key: ScalarKey::FragmentCount.as_db_str(),
                    value,
                }),
        }
    }

    pub async fn set_fragment_count(&self, count: u8) -> Result<(), MemoryStoreError> {
        self.store
            .set(&self.agent, ScalarKey::FragmentCount, Value::from(count))
            .await
    }

    pub async fn conversation_notes(&self) -> Result<String, MemoryStoreError> {
        self.get_string(ScalarKey::ConversationNotes, &self.default_notes).await
    }

    pub async fn set_conversation_notes(&self, notes: &str) -> Result<(), MemoryStoreError> {
        self.store
            .set(&self.agent, ScalarKey::ConversationNotes, Value::from(notes))
            .await
    }

    async fn get_string(&self, key: ScalarKey, default: &str) -> Result<String, MemoryStoreError> {
        match self.store.get(&self.agent, key).await? {
            None => Ok(default.to_owned()),
            Some(Value::String(s)) => Ok(s),
            Some(value) => Err(MemoryStoreError::Malformed { key: key.as_db_str(), value }),
        }
    }
}
