//! Perception-driven dialogue controller for the Milton soul.
//!
//! A perception (an image placed in the room, or a text description) enters
//! through [`runtime::SoulHost`]; [`soul::Soul::handle`] describes the scene,
//! notices what changed, and speaks in interruptible fragments via
//! [`dialogue::Fragmenter`].

pub mod cognition;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod io;
pub mod memory;
pub mod runtime;
pub mod sensory;
pub mod soul;
pub mod types;

pub use error::SoulError;
