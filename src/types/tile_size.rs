use std::fmt;

/// Pixel dimensions of one tile.
///
/// Learned from the first successfully fetched tile of a run and treated
/// as a grid-wide invariant afterwards: every tile must have identical
/// dimensions or it is considered corrupt and re-fetched.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TileSize {
	pub width: u32,
	pub height: u32,
}

impl TileSize {
	pub fn new(width: u32, height: u32) -> TileSize {
		TileSize { width, height }
	}
}

impl fmt::Display for TileSize {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}x{}", self.width, self.height)
	}
}

impl fmt::Debug for TileSize {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "TileSize({}x{})", self.width, self.height)
	}
}
