//! A rectangular extent of tiles at one zoom level, derived from a
//! geographic bounding box. Owns the enumeration of all tiles to fetch.

use super::{GeoBBox, TileCoord};
use crate::geodesy;
use anyhow::{Result, ensure};
use std::fmt;

/// Inclusive tile-index rectangle at a fixed zoom level.
///
/// `x` grows eastwards, `y` grows southwards, so `y_min` is the northern
/// tile row.
///
/// # Examples
///
/// ```
/// use tilestitch::{GeoBBox, TileBBox};
///
/// let bbox = GeoBBox::new(10.0, -12.0, 12.0, -10.0).unwrap();
/// let extent = TileBBox::from_geo(&bbox, 2).unwrap();
/// assert_eq!(extent.count(), 1);
/// assert_eq!((extent.x_min, extent.y_min), (2, 2));
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TileBBox {
	pub level: u8,
	pub x_min: u32,
	pub y_min: u32,
	pub x_max: u32,
	pub y_max: u32,
}

impl TileBBox {
	pub fn new(level: u8, x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> Result<TileBBox> {
		ensure!(level <= 31, "zoom level ({level}) must be <= 31");
		ensure!(x_min <= x_max, "x_min ({x_min}) must be <= x_max ({x_max})");
		ensure!(y_min <= y_max, "y_min ({y_min}) must be <= y_max ({y_max})");
		let max = 2u64.pow(level as u32);
		ensure!(
			(x_max as u64) < max && (y_max as u64) < max,
			"tile range exceeds the {max}x{max} grid of zoom level {level}"
		);
		Ok(TileBBox {
			level,
			x_min,
			y_min,
			x_max,
			y_max,
		})
	}

	/// Computes the tile extent covering a geographic bounding box.
	///
	/// The north-west corner of the box selects the minimum tile indices,
	/// the south-east corner the maximum ones.
	pub fn from_geo(bbox: &GeoBBox, level: u8) -> Result<TileBBox> {
		let (x_min, y_min) = geodesy::deg_to_tile(bbox.north, bbox.west, level);
		let (x_max, y_max) = geodesy::deg_to_tile(bbox.south, bbox.east, level);
		TileBBox::new(level, x_min, y_min, x_max, y_max)
	}

	/// Width in tiles.
	pub fn width(&self) -> u32 {
		self.x_max - self.x_min + 1
	}

	/// Height in tiles.
	pub fn height(&self) -> u32 {
		self.y_max - self.y_min + 1
	}

	/// Total number of tiles in the extent.
	pub fn count(&self) -> u64 {
		self.width() as u64 * self.height() as u64
	}

	pub fn contains(&self, coord: &TileCoord) -> bool {
		coord.level == self.level
			&& coord.x >= self.x_min
			&& coord.x <= self.x_max
			&& coord.y >= self.y_min
			&& coord.y <= self.y_max
	}

	/// Iterates over all tiles with `x` as the outer loop and `y` as the
	/// inner loop. Download enumeration depends on this order.
	pub fn iter_coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
		(self.x_min..=self.x_max).flat_map(move |x| {
			(self.y_min..=self.y_max).map(move |y| TileCoord {
				level: self.level,
				x,
				y,
			})
		})
	}

	/// Geographic bounding box covered by the full tile extent (tile
	/// edges, not the original request).
	pub fn as_geo(&self) -> GeoBBox {
		let (north, west) = geodesy::tile_to_deg(self.x_min as f64, self.y_min as f64, self.level);
		let (south, east) = geodesy::tile_to_deg((self.x_max + 1) as f64, (self.y_max + 1) as f64, self.level);
		GeoBBox {
			west,
			south,
			east,
			north,
		}
	}
}

impl fmt::Display for TileBBox {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(
			f,
			"{}: [{},{}] - [{},{}] ({}x{})",
			self.level,
			self.x_min,
			self.y_min,
			self.x_max,
			self.y_max,
			self.width(),
			self.height()
		)
	}
}

impl fmt::Debug for TileBBox {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}
