//! Reasoning-backend transport for the milton soul.
//!
//! `provider` holds the message model and the `LlmProvider` seam; `http`
//! speaks to OpenAI-compatible and Anthropic endpoints.

pub mod http;
pub mod provider;
