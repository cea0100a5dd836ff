pub mod image;
pub mod pending;

pub use image::{ImageArtifact, ImageError};
pub use pending::{PendingPerceptions, PerceptionReceiver, PerceptionSender};
