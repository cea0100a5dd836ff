pub mod output;
pub mod render;

pub use output::{DispatchEvent, DispatchReceiver, Dispatcher};
pub use render::{GridSize, RenderCommand, TileCoord};
