use chrono::{DateTime, Utc};
use milton_llm::provider::{ChatMessage, ContentPart, Role};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::io::render::TileCoord;

/// Free-form metadata attached to perceptions and memory entries.
pub type Metadata = Map<String, Value>;

/// Perception action that carries an image payload.
pub const ADD_OBJECT_ACTION: &str = "addObject";
/// Perception action used for text/description stimuli.
pub const DESCRIBE_OBJECT_ACTION: &str = "describeObject";

/// Identifies one soul instance. Scalar memory and single-flight are scoped by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Perceptions ────────────────────────────────────────────────

/// An external stimulus delivered to the soul. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Perception {
    pub id: Uuid,
    pub action: String,
    pub content: String,
    #[serde(default, rename = "_metadata")]
    pub metadata: Metadata,
    pub received_at: DateTime<Utc>,
}

/// Which path a perception takes through the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerceptionKind {
    /// `addObject`: the scene must be described from an image.
    Image,
    /// Anything else: the description is carried as text.
    Description,
}

impl Perception {
    pub fn new(action: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.into(),
            content: content.into(),
            metadata: Metadata::new(),
            received_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// A text stimulus, e.g. "a chair appeared".
    pub fn describe_object(description: impl Into<String>) -> Self {
        Self::new(DESCRIBE_OBJECT_ACTION, description)
    }

    /// An image stimulus as the game surface emits it after a canvas update.
    pub fn add_object(image_data_uri: impl Into<String>) -> Self {
        let image = image_data_uri.into();
        Self::new(ADD_OBJECT_ACTION, format!("(image - {} bytes)", image.len()))
            .with_metadata("image", image)
    }

    /// As [`Perception::add_object`], placed on a tile of the room grid.
    pub fn add_object_at(image_data_uri: impl Into<String>, tile: TileCoord) -> Self {
        Self::add_object(image_data_uri).with_metadata("tile", serde_json::json!({ "x": tile.x, "y": tile.y }))
    }

    /// The tile an `addObject` perception was placed on, if recorded.
    pub fn tile(&self) -> Option<TileCoord> {
        serde_json::from_value(self.metadata.get("tile")?.clone()).ok()
    }

    /// Classification depends only on the action.
    pub fn kind(&self) -> PerceptionKind {
        if self.action == ADD_OBJECT_ACTION {
            PerceptionKind::Image
        } else {
            PerceptionKind::Description
        }
    }

    /// Non-empty `metadata.image`.
    pub fn image(&self) -> Option<&str> {
        self.metadata_str("image")
    }

    /// Non-empty `metadata.description`, else non-empty `content`.
    pub fn description(&self) -> Option<&str> {
        self.metadata_str("description")
            .or_else(|| Some(self.content.as_str()).filter(|c| !c.trim().is_empty()))
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

// ── Memory entries ─────────────────────────────────────────────

/// Entry content: plain text or structured parts (e.g. an image turn).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemoryContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MemoryContent {
    /// Text view; image parts are omitted.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn has_image(&self) -> bool {
        match self {
            Self::Text(_) => false,
            Self::Parts(parts) => parts.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. })),
        }
    }
}

/// One turn in working memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub role: Role,
    pub content: MemoryContent,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Metadata,
}

impl MemoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MemoryContent::Text(content.into()),
            metadata: Metadata::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// A user turn carrying a single image reference.
    pub fn user_image(url: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MemoryContent::Parts(vec![ContentPart::ImageUrl { url: url.into() }]),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn text(&self) -> String {
        self.content.as_text()
    }

    /// True if `metadata[key]` is present and truthy.
    pub fn is_tagged(&self, key: &str) -> bool {
        match self.metadata.get(key) {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        match &self.content {
            MemoryContent::Text(text) => ChatMessage::text(self.role, text.clone()),
            MemoryContent::Parts(parts) => ChatMessage::from_parts(self.role, parts.clone()),
        }
    }
}
