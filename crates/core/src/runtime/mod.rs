mod host;
mod shutdown;

pub use host::{AgentHandle, AgentStatus, SoulHost};
pub use shutdown::ShutdownGuard;
