//! Core value types: geographic bounding boxes, tile coordinates, tile
//! grid extents, tile pixel sizes and saved-tile formats.

mod geo_bbox;
mod tile_bbox;
mod tile_coord;
mod tile_format;
mod tile_size;

pub use geo_bbox::GeoBBox;
pub use tile_bbox::TileBBox;
pub use tile_coord::TileCoord;
pub use tile_format::TileFormat;
pub use tile_size::TileSize;
