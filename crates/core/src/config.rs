use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;

/// All soul parameters. Loaded from the `soul_config` table at startup.
/// First boot writes defaults; subsequent boots read existing values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoulCfg {
    // identity
    pub soul_name: String,
    pub agent_id: String,
    pub blueprint: String,

    // scalar memory defaults
    pub initial_room_description: String,

    // fragmenting
    pub first_fragment_wait_ms: u64,

    // summarization
    pub summarize_threshold: usize,
    pub summary_head_len: usize,
    pub summary_tail_len: usize,

    // reasoning requests
    pub step_max_tokens: u32,
    pub vision_max_tokens: u32,
    pub step_temperature: f32,

    // host
    pub db_connect_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for SoulCfg {
    fn default() -> Self {
        Self {
            soul_name: "Milton".into(),
            agent_id: "dev-001".into(),
            blueprint: "You are modeling the mind of Milton. Milton is trapped in an empty room \
                        together with a human. Things appear in the room without explanation. \
                        Milton is wry, easily bewildered, and speaks in short spoken fragments."
                .into(),
            initial_room_description:
                "- The human is positioned in the center of the image, facing downward.".into(),
            first_fragment_wait_ms: 1000,
            summarize_threshold: 15,
            summary_head_len: 2,
            summary_tail_len: 8,
            step_max_tokens: 512,
            vision_max_tokens: 1024,
            step_temperature: 0.8,
            db_connect_timeout_secs: 3,
            shutdown_timeout_secs: 15,
        }
    }
}

impl SoulCfg {
    /// Load config from `soul_config` table. If table is empty, seed with defaults.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM soul_config")
                .fetch_all(pool)
                .await?;

        if rows.is_empty() {
            let cfg = Self::default();
            cfg.seed(pool).await?;
            return Ok(cfg);
        }

        let map: HashMap<String, String> = rows.into_iter().collect();
        Ok(Self::from_map(&map))
    }

    /// Write all default values into `soul_config` table.
    async fn seed(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        for (key, value, desc) in &self.to_entries() {
            sqlx::query(
                "INSERT INTO soul_config (key, value, description) VALUES ($1, $2, $3) \
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value)
            .bind(desc)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();
        Self {
            soul_name: get_or(m, "soul_name", d.soul_name),
            agent_id: get_or(m, "agent_id", d.agent_id),
            blueprint: get_or(m, "blueprint", d.blueprint),
            initial_room_description: get_or(
                m,
                "initial_room_description",
                d.initial_room_description,
            ),
            first_fragment_wait_ms: get_or(m, "first_fragment_wait_ms", d.first_fragment_wait_ms),
            summarize_threshold: get_or(m, "summarize_threshold", d.summarize_threshold),
            summary_head_len: get_or(m, "summary_head_len", d.summary_head_len),
            summary_tail_len: get_or(m, "summary_tail_len", d.summary_tail_len),
            step_max_tokens: get_or(m, "step_max_tokens", d.step_max_tokens),
            vision_max_tokens: get_or(m, "vision_max_tokens", d.vision_max_tokens),
            step_temperature: get_or(m, "step_temperature", d.step_temperature),
            db_connect_timeout_secs: get_or(
                m,
                "db_connect_timeout_secs",
                d.db_connect_timeout_secs,
            ),
            shutdown_timeout_secs: get_or(m, "shutdown_timeout_secs", d.shutdown_timeout_secs),
        }
    }

    fn to_entries(&self) -> Vec<(&str, String, &str)> {
        vec![
            ("soul_name", self.soul_name.clone(), "Name the soul speaks and thinks as"),
            ("agent_id", self.agent_id.clone(), "Default agent id for the CLI"),
            ("blueprint", self.blueprint.clone(), "Persona system prompt (first memory entry)"),
            (
                "initial_room_description",
                self.initial_room_description.clone(),
                "Room description before any change",
            ),
            (
                "first_fragment_wait_ms",
                self.first_fragment_wait_ms.to_string(),
                "Wait before the first follow-up fragment",
            ),
            (
                "summarize_threshold",
                self.summarize_threshold.to_string(),
                "Memory length that triggers summarization",
            ),
            (
                "summary_head_len",
                self.summary_head_len.to_string(),
                "Leading entries kept when a summary exists",
            ),
            (
                "summary_tail_len",
                self.summary_tail_len.to_string(),
                "Trailing entries kept after summarization",
            ),
            ("step_max_tokens", self.step_max_tokens.to_string(), "Max tokens per cognitive step"),
            ("vision_max_tokens", self.vision_max_tokens.to_string(), "Max tokens for image description"),
            (
                "step_temperature",
                self.step_temperature.to_string(),
                "Sampling temperature for cognitive steps",
            ),
            (
                "db_connect_timeout_secs",
                self.db_connect_timeout_secs.to_string(),
                "Database connect timeout seconds",
            ),
            (
                "shutdown_timeout_secs",
                self.shutdown_timeout_secs.to_string(),
                "Graceful shutdown timeout seconds",
            ),
        ]
    }
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
