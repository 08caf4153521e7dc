//! Partition planner: divides the pixel grid of a tile extent into the
//! smallest number of equally sized composite images ("stitches") that
//! respect a maximum pixel dimension per side.
//!
//! Each axis is planned independently. The divisor search prefers
//! divisors that divide the total pixel size evenly; when none fits the
//! bound, the smallest divisor whose rounded-up partition size fits is
//! used and the last partition of that axis simply comes out smaller.
//! Crop offsets are computed so that adjacent partitions abut with zero
//! overlap and zero gap.

use crate::types::{TileBBox, TileSize};
use anyhow::{Result, ensure};
use std::fmt;
use std::path::{Path, PathBuf};

/// The stitch layout for one zoom level.
///
/// # Examples
///
/// ```
/// use tilestitch::plan::StitchPlan;
/// use tilestitch::{TileBBox, TileSize};
///
/// // 4x4 tiles of 256px, capped at 512px per side: 2x2 partitions.
/// let extent = TileBBox::new(5, 8, 8, 11, 11).unwrap();
/// let plan = StitchPlan::new(extent, TileSize::new(256, 256), 512).unwrap();
/// assert_eq!((plan.horizontal_divisions, plan.vertical_divisions), (2, 2));
/// assert_eq!((plan.partition_width, plan.partition_height), (512, 512));
/// ```
#[derive(Clone, Copy, Debug)]
pub struct StitchPlan {
	pub extent: TileBBox,
	pub tile_size: TileSize,
	/// Number of partitions along the x axis.
	pub horizontal_divisions: u32,
	/// Number of partitions along the y axis.
	pub vertical_divisions: u32,
	/// Pixel width of every partition except possibly the last column.
	pub partition_width: u32,
	/// Pixel height of every partition except possibly the last row.
	pub partition_height: u32,
	/// Pixel width of the whole tile grid.
	pub total_width: u64,
	/// Pixel height of the whole tile grid.
	pub total_height: u64,
}

/// One composite image's recipe: its source-tile rectangle, the crop to
/// apply to the raw montage and the expected output size.
///
/// Transient; the durable artifact is the stitched file on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StitchPartition {
	pub row: u32,
	pub col: u32,
	/// Absolute source tile columns, inclusive range.
	pub tile_x_min: u32,
	pub tile_x_max: u32,
	/// Absolute source tile rows, inclusive range.
	pub tile_y_min: u32,
	pub tile_y_max: u32,
	/// Pixels to trim from the left of the raw montage.
	pub crop_left: u32,
	/// Pixels to trim from the top of the raw montage.
	pub crop_top: u32,
	/// Expected output dimensions after cropping.
	pub width: u32,
	pub height: u32,
	/// Origin of this partition in whole-grid pixel space, relative to
	/// the north-west corner of the extent.
	pub pixel_x: u64,
	pub pixel_y: u64,
}

impl StitchPlan {
	pub fn new(extent: TileBBox, tile_size: TileSize, max_dimension: u32) -> Result<StitchPlan> {
		ensure!(max_dimension >= 1, "maximum stitch dimension must be at least 1 pixel");
		ensure!(
			tile_size.width >= 1 && tile_size.height >= 1,
			"tile size {tile_size} is degenerate"
		);
		let total_width = extent.width() as u64 * tile_size.width as u64;
		let total_height = extent.height() as u64 * tile_size.height as u64;
		let horizontal_divisions = axis_divisions(total_width, max_dimension as u64);
		let vertical_divisions = axis_divisions(total_height, max_dimension as u64);
		Ok(StitchPlan {
			extent,
			tile_size,
			horizontal_divisions,
			vertical_divisions,
			partition_width: total_width.div_ceil(horizontal_divisions as u64) as u32,
			partition_height: total_height.div_ceil(vertical_divisions as u64) as u32,
			total_width,
			total_height,
		})
	}

	/// Total number of partitions.
	pub fn count(&self) -> u64 {
		self.horizontal_divisions as u64 * self.vertical_divisions as u64
	}

	/// Iterates over all `(row, col)` partition indices, row by row.
	pub fn iter_partitions(&self) -> impl Iterator<Item = StitchPartition> + '_ {
		(0..self.vertical_divisions)
			.flat_map(move |row| (0..self.horizontal_divisions).map(move |col| self.partition(row, col)))
	}

	/// Computes the recipe for partition `(row, col)`.
	///
	/// The source tile sub-rectangle is derived from the partition's
	/// pixel window, so the first tile is the one containing the first
	/// pixel and the last tile the one containing the last pixel. The
	/// crop offset is the difference between the pixel origin and the
	/// pixel origin of the first source tile; by construction it is
	/// non-negative and smaller than one tile, and the montage always
	/// spans the cropped output.
	pub fn partition(&self, row: u32, col: u32) -> StitchPartition {
		assert!(row < self.vertical_divisions && col < self.horizontal_divisions);

		let (tile_x_min, tile_x_max, crop_left, width, pixel_x) = axis_partition(
			col,
			self.horizontal_divisions,
			self.tile_size.width,
			self.partition_width,
			self.total_width,
		);
		let (tile_y_min, tile_y_max, crop_top, height, pixel_y) = axis_partition(
			row,
			self.vertical_divisions,
			self.tile_size.height,
			self.partition_height,
			self.total_height,
		);

		StitchPartition {
			row,
			col,
			tile_x_min: self.extent.x_min + tile_x_min,
			tile_x_max: self.extent.x_min + tile_x_max,
			tile_y_min: self.extent.y_min + tile_y_min,
			tile_y_max: self.extent.y_min + tile_y_max,
			crop_left,
			crop_top,
			width,
			height,
			pixel_x,
			pixel_y,
		}
	}
}

impl StitchPartition {
	/// Number of source tiles per row of the raw montage.
	pub fn tile_cols(&self) -> u32 {
		self.tile_x_max - self.tile_x_min + 1
	}

	/// Number of source tile rows of the raw montage.
	pub fn tile_rows(&self) -> u32 {
		self.tile_y_max - self.tile_y_min + 1
	}

	/// Source tile files in montage order (rows of columns, matching the
	/// horizontal-then-vertical arrangement).
	pub fn source_tiles(&self, level: u8, root: &Path, extension: &str) -> Vec<PathBuf> {
		let mut paths = Vec::with_capacity((self.tile_cols() * self.tile_rows()) as usize);
		for y in self.tile_y_min..=self.tile_y_max {
			for x in self.tile_x_min..=self.tile_x_max {
				paths.push(crate::storage::tile_path(root, level, x, y, extension));
			}
		}
		paths
	}
}

impl fmt::Display for StitchPartition {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}_{}", self.row, self.col)
	}
}

/// Finds the smallest number of divisions along one axis such that each
/// partition is at most `max` pixels, preferring division counts that
/// divide `total` evenly.
///
/// The search is capped at `total` (one pixel per partition always
/// satisfies any bound), which makes termination explicit.
fn axis_divisions(total: u64, max: u64) -> u32 {
	let mut divisor = 1u64;
	while divisor < total {
		if total % divisor == 0 && total / divisor <= max {
			break;
		}
		if total.div_ceil(divisor) <= max {
			break;
		}
		divisor += 1;
	}
	divisor.min(total).max(1) as u32
}

/// Plans one axis of a partition: source tile range (relative to the
/// extent origin), crop offset, output size and pixel origin.
///
/// The tile range brackets the pixel window `[origin, origin + size)`.
/// With an uneven divisor the rounded-up partition size drifts away
/// from `index * total / divisions`, so the range must follow the
/// pixels, not the nominal tiles-per-partition ratio.
fn axis_partition(index: u32, divisions: u32, tile_px: u32, partition_px: u32, total_px: u64) -> (u32, u32, u32, u32, u64) {
	let pixel_origin = index as u64 * partition_px as u64;
	let size = if index + 1 == divisions {
		(total_px - pixel_origin) as u32
	} else {
		partition_px
	};

	let first_tile = (pixel_origin / tile_px as u64) as u32;
	let last_tile = ((pixel_origin + size as u64 - 1) / tile_px as u64) as u32;
	let crop = (pixel_origin - first_tile as u64 * tile_px as u64) as u32;

	(first_tile, last_tile, crop, size, pixel_origin)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn extent(level: u8, w: u32, h: u32) -> TileBBox {
		TileBBox::new(level, 0, 0, w - 1, h - 1).unwrap()
	}

	#[test]
	fn evenly_divisible_grid() {
		// 4x4 tiles of 256px with a 512px cap: 2x2 partitions of 512px,
		// all crop offsets zero.
		let plan = StitchPlan::new(extent(5, 4, 4), TileSize::new(256, 256), 512).unwrap();
		assert_eq!(plan.horizontal_divisions, 2);
		assert_eq!(plan.vertical_divisions, 2);
		assert_eq!(plan.partition_width, 512);
		assert_eq!(plan.partition_height, 512);
		for p in plan.iter_partitions() {
			assert_eq!((p.crop_left, p.crop_top), (0, 0));
			assert_eq!((p.width, p.height), (512, 512));
			assert_eq!(p.tile_cols(), 2);
			assert_eq!(p.tile_rows(), 2);
		}
	}

	#[test]
	fn single_partition_when_under_the_cap() {
		let plan = StitchPlan::new(extent(5, 4, 4), TileSize::new(256, 256), 10000).unwrap();
		assert_eq!(plan.count(), 1);
		let p = plan.partition(0, 0);
		assert_eq!((p.width, p.height), (1024, 1024));
		assert_eq!((p.crop_left, p.crop_top), (0, 0));
	}

	#[test]
	fn uneven_division_crops_interior_partitions() {
		// 3 tiles of 256px = 768px, capped at 500px: 2 divisions of
		// ceil(768/2) = 384px.
		let plan = StitchPlan::new(extent(5, 3, 1), TileSize::new(256, 256), 500).unwrap();
		assert_eq!(plan.horizontal_divisions, 2);
		assert_eq!(plan.partition_width, 384);

		let p0 = plan.partition(0, 0);
		assert_eq!((p0.tile_x_min, p0.tile_x_max), (0, 1));
		assert_eq!(p0.crop_left, 0);
		assert_eq!(p0.width, 384);

		let p1 = plan.partition(0, 1);
		assert_eq!((p1.tile_x_min, p1.tile_x_max), (1, 2));
		assert_eq!(p1.crop_left, 128);
		assert_eq!(p1.width, 384);
		assert_eq!(p1.pixel_x, 384);
	}

	#[test]
	fn exact_divisor_is_preferred() {
		// 6 tiles of 100px = 600px, cap 299: divisor 3 gives exactly
		// 200px partitions; divisor 2 would give 300 (> cap).
		let plan = StitchPlan::new(extent(6, 6, 1), TileSize::new(100, 100), 299).unwrap();
		assert_eq!(plan.horizontal_divisions, 3);
		assert_eq!(plan.partition_width, 200);
	}

	#[test]
	fn uneven_partitions_follow_their_pixel_window() {
		// 768px in 9 divisions of 86px: partition 2 spans pixels
		// 172..258, crossing from tile 0 into tile 1.
		let plan = StitchPlan::new(extent(5, 3, 1), TileSize::new(256, 256), 90).unwrap();
		assert_eq!(plan.horizontal_divisions, 9);
		let p = plan.partition(0, 2);
		assert_eq!((p.tile_x_min, p.tile_x_max), (0, 1));
		assert_eq!(p.crop_left, 172);
		assert_eq!(p.width, 86);

		// Partitions wider than a tile drift too: 3840px in 9 divisions
		// of 427px puts partition 2 at pixels 854..1281, tiles 3 to 5.
		let plan = StitchPlan::new(extent(6, 15, 1), TileSize::new(256, 256), 450).unwrap();
		assert_eq!(plan.horizontal_divisions, 9);
		let p = plan.partition(0, 2);
		assert_eq!(p.pixel_x, 854);
		assert_eq!((p.tile_x_min, p.tile_x_max), (3, 5));
		assert_eq!(p.crop_left, 854 - 3 * 256);
	}

	#[rstest]
	#[case(1, 1, 256, 256, 1)]
	#[case(7, 3, 256, 700, 3)]
	#[case(16, 9, 256, 2000, 3)]
	#[case(5, 5, 512, 512, 5)]
	#[case(40, 1, 256, 10000, 2)]
	#[case(3, 1, 256, 90, 9)]
	#[case(15, 1, 256, 450, 9)]
	fn partitions_cover_the_grid_exactly(
		#[case] tiles_x: u32,
		#[case] tiles_y: u32,
		#[case] tile_px: u32,
		#[case] max_dim: u32,
		#[case] expected_h_div: u32,
	) {
		let plan = StitchPlan::new(extent(16, tiles_x, tiles_y), TileSize::new(tile_px, tile_px), max_dim).unwrap();
		assert_eq!(plan.horizontal_divisions, expected_h_div);

		// Every partition respects the cap; widths of one row sum to the
		// total; successive partitions abut exactly.
		for row in 0..plan.vertical_divisions {
			let mut covered = 0u64;
			for col in 0..plan.horizontal_divisions {
				let p = plan.partition(row, col);
				assert!(p.width as u64 <= max_dim as u64);
				assert!(p.height as u64 <= max_dim as u64);
				assert_eq!(p.pixel_x, covered, "partition {p} must abut its neighbor");
				assert!((p.crop_left as u64) < tile_px as u64);
				assert!((p.crop_top as u64) < tile_px as u64);
				// The source tiles must span the cropped output.
				let raw_width = p.tile_cols() as u64 * tile_px as u64;
				assert!(p.crop_left as u64 + p.width as u64 <= raw_width);
				covered += p.width as u64;
			}
			assert_eq!(covered, plan.total_width);
		}

		let mut covered = 0u64;
		for row in 0..plan.vertical_divisions {
			let p = plan.partition(row, 0);
			assert_eq!(p.pixel_y, covered);
			covered += p.height as u64;
		}
		assert_eq!(covered, plan.total_height);
	}

	#[test]
	fn divisor_search_terminates_on_tiny_bounds() {
		// A 1px cap forces one partition per pixel.
		assert_eq!(axis_divisions(7, 1), 7);
		assert_eq!(axis_divisions(1, 1), 1);
		// Cap larger than total: single partition.
		assert_eq!(axis_divisions(500, 100000), 1);
	}

	#[test]
	fn source_tiles_are_in_montage_order() {
		let plan = StitchPlan::new(TileBBox::new(3, 2, 4, 3, 5).unwrap(), TileSize::new(256, 256), 10000).unwrap();
		let p = plan.partition(0, 0);
		let paths = p.source_tiles(3, Path::new("/proj"), "png");
		let names: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
		// Rows of columns: y fixed, x varies fastest.
		assert_eq!(
			names,
			vec![
				"/proj/3/2/4.png",
				"/proj/3/3/4.png",
				"/proj/3/2/5.png",
				"/proj/3/3/5.png"
			]
		);
	}
}
