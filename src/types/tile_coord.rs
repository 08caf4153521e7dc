//! A single tile address in the slippy-map scheme.

use crate::geodesy;
use anyhow::{Result, ensure};
use std::fmt;

/// Identifies one source tile by zoom level and column/row index.
///
/// Invariant: `x < 2^level` and `y < 2^level`.
///
/// # Examples
///
/// ```
/// use tilestitch::TileCoord;
///
/// let coord = TileCoord::new(3, 4, 2).unwrap();
/// assert_eq!((coord.level, coord.x, coord.y), (3, 4, 2));
/// assert!(TileCoord::new(2, 4, 0).is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
	pub level: u8,
	pub x: u32,
	pub y: u32,
}

impl TileCoord {
	pub fn new(level: u8, x: u32, y: u32) -> Result<TileCoord> {
		ensure!(level <= 31, "zoom level ({level}) must be <= 31");
		let max = 2u64.pow(level as u32);
		ensure!(
			(x as u64) < max && (y as u64) < max,
			"tile ({x},{y}) is outside the {max}x{max} grid of zoom level {level}"
		);
		Ok(TileCoord { level, x, y })
	}

	/// Geographic coordinate of the north-west corner as `(lat, lon)`.
	pub fn as_geo(&self) -> (f64, f64) {
		geodesy::tile_to_deg(self.x as f64, self.y as f64, self.level)
	}
}

impl fmt::Debug for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "TileCoord({}: {}, {})", self.level, self.x, self.y)
	}
}
