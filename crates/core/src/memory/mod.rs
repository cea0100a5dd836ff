pub mod db;
pub mod scalar;
pub mod working;

pub use db::PgScalarStore;
pub use scalar::{InMemoryScalarStore, MemoryStoreError, ScalarKey, ScalarStore, SoulMemory};
pub use working::WorkingMemory;
