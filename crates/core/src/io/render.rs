//! Commands and coordinates exchanged with the tile-grid game surface.

use serde::{Deserialize, Serialize};

/// Dimensions of the clickable tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub width: u8,
    pub height: u8,
}

impl GridSize {
    /// The reference room is 7×7 tiles.
    pub const REFERENCE: GridSize = GridSize { width: 7, height: 7 };

    /// A coordinate, if it lies inside the grid.
    pub fn tile(self, x: u8, y: u8) -> Option<TileCoord> {
        (x < self.width && y < self.height).then_some(TileCoord { x, y })
    }
}

impl Default for GridSize {
    fn default() -> Self {
        Self::REFERENCE
    }
}

/// A clicked tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: u8,
    pub y: u8,
}

/// Commands sent to the game surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum RenderCommand {
    /// Place an image (PNG data URI) on the selected tile.
    AddBase64Image { base64: String },
    /// Abandon the pending add and clear tile highlights.
    CancelAddObject,
}
