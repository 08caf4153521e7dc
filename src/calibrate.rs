//! OziExplorer calibration (`.map`) files for stitched images.
//!
//! Every partition gets a sidecar file next to its PNG that anchors the
//! four image corners to geographic coordinates, so the composite can be
//! loaded into moving-map software without manual georeferencing. The
//! files are plain text in the OziExplorer "Map Data File Version 2.2"
//! grammar; coordinates are written twice, as calibration points in
//! degrees and decimal minutes and as decimal-degree `MMPLL` lines.

use crate::config::RunConfig;
use crate::geodesy;
use crate::plan::{StitchPartition, StitchPlan};
use crate::storage;
use anyhow::Result;
use std::fmt::Write as _;

pub struct Calibrator<'a> {
	config: &'a RunConfig,
}

impl<'a> Calibrator<'a> {
	pub fn new(config: &'a RunConfig) -> Calibrator<'a> {
		Calibrator { config }
	}

	/// Writes one `.map` file per partition. Returns the number written.
	///
	/// Content is fully determined by the plan, so existing files are
	/// simply overwritten.
	pub fn run(&self, plan: &StitchPlan) -> Result<u64> {
		let mut written = 0u64;
		for partition in plan.iter_partitions() {
			let path = storage::map_path(&self.config.project_root, plan.extent.level, partition.row, partition.col);
			let content = render_map_file(plan, &partition)?;
			storage::write_atomic(&path, content.as_bytes())?;
			written += 1;
		}
		Ok(written)
	}
}

/// The four image corners in clockwise order from the top left, as
/// `(pixel_x, pixel_y, lat, lon)`. Pixel coordinates are local to the
/// partition image; the geographic position is derived from the global
/// pixel grid of the whole zoom level.
fn corners(plan: &StitchPlan, partition: &StitchPartition) -> [(u32, u32, f64, f64); 4] {
	let level = plan.extent.level;
	let origin_x = plan.extent.x_min as u64 * plan.tile_size.width as u64;
	let origin_y = plan.extent.y_min as u64 * plan.tile_size.height as u64;

	let locate = |local_x: u32, local_y: u32| {
		let (lat, lon) = geodesy::pixel_to_deg(
			(origin_x + partition.pixel_x + local_x as u64) as f64,
			(origin_y + partition.pixel_y + local_y as u64) as f64,
			plan.tile_size.width,
			plan.tile_size.height,
			level,
		);
		(local_x, local_y, lat, lon)
	};

	let right = partition.width - 1;
	let bottom = partition.height - 1;
	[locate(0, 0), locate(right, 0), locate(right, bottom), locate(0, bottom)]
}

fn render_map_file(plan: &StitchPlan, partition: &StitchPartition) -> Result<String> {
	let corners = corners(plan, partition);
	let image_name = format!("{}_{}.png", partition.row, partition.col);

	// Ground resolution at the vertical center of this partition.
	let (mid_lat, _) = geodesy::pixel_to_deg(
		(plan.extent.x_min as u64 * plan.tile_size.width as u64 + partition.pixel_x) as f64,
		(plan.extent.y_min as u64 * plan.tile_size.height as u64 + partition.pixel_y) as f64 + partition.height as f64 / 2.0,
		plan.tile_size.width,
		plan.tile_size.height,
		plan.extent.level,
	);
	let meters_per_pixel = geodesy::meters_per_pixel(mid_lat, plan.extent.level, plan.tile_size.width);

	let mut out = String::new();
	writeln!(out, "OziExplorer Map Data File Version 2.2")?;
	writeln!(out, "{image_name}")?;
	writeln!(out, "{image_name}")?;
	writeln!(out, "1 ,Map Code,")?;
	writeln!(out, "WGS 84,WGS 84,   0.0000,   0.0000,WGS 84")?;
	writeln!(out, "Reserved 1")?;
	writeln!(out, "Reserved 2")?;
	writeln!(out, "Magnetic Variation,,,E")?;
	writeln!(out, "Map Projection,Mercator,PolyCal,No,AutoCalOnly,No,BSBUseWPX,No")?;

	for (i, (x, y, lat, lon)) in corners.iter().enumerate() {
		writeln!(out, "{}", point_line(i as u32 + 1, Some((*x, *y, *lat, *lon))))?;
	}
	for i in 5..=30 {
		writeln!(out, "{}", point_line(i, None))?;
	}

	writeln!(out, "Projection Setup,,,,,,,,,,")?;
	writeln!(out, "Map Feature = MF ; Map Comment = MC     These follow if they exist")?;
	writeln!(out, "Track File = TF      These follow if they exist")?;
	writeln!(out, "Moving Map Parameters = MM?    These follow if they exist")?;
	writeln!(out, "MM0,Yes")?;
	writeln!(out, "MMPNUM,4")?;
	for (i, (x, y, _, _)) in corners.iter().enumerate() {
		writeln!(out, "MMPXY,{},{},{}", i + 1, x, y)?;
	}
	for (i, (_, _, lat, lon)) in corners.iter().enumerate() {
		writeln!(out, "MMPLL,{},{:11.6},{:11.6}", i + 1, lon, lat)?;
	}
	writeln!(out, "MM1B,{meters_per_pixel:.6}")?;
	writeln!(out, "MOP,Map Open Position,0,0")?;
	writeln!(out, "IWH,Map Image Width/Height,{},{}", partition.width, partition.height)?;
	Ok(out)
}

/// One `PointNN` calibration line. `None` renders the empty placeholder
/// OziExplorer expects for unused points.
fn point_line(index: u32, point: Option<(u32, u32, f64, f64)>) -> String {
	match point {
		Some((x, y, lat, lon)) => {
			let (lat_deg, lat_min) = degrees_minutes(lat);
			let (lon_deg, lon_min) = degrees_minutes(lon);
			let ns = if lat < 0.0 { 'S' } else { 'N' };
			let ew = if lon < 0.0 { 'W' } else { 'E' };
			format!(
				"Point{index:02},xy,{x:>5},{y:>5},in, deg,{lat_deg:>4},{lat_min:>8.4},{ns},{lon_deg:>4},{lon_min:>8.4},{ew}, grid,   ,           ,           ,N"
			)
		}
		None => format!(
			"Point{index:02},xy,     ,     ,in, deg,    ,        ,N,    ,        ,W, grid,   ,           ,           ,N"
		),
	}
}

/// Splits a decimal-degree value into whole degrees and decimal minutes,
/// both unsigned; the hemisphere carries the sign.
fn degrees_minutes(value: f64) -> (u32, f64) {
	let value = value.abs();
	let degrees = value.trunc();
	(degrees as u32, (value - degrees) * 60.0)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{TileBBox, TileSize};
	use approx::assert_abs_diff_eq;

	#[test]
	fn degrees_minutes_split() {
		let (d, m) = degrees_minutes(13.35);
		assert_eq!(d, 13);
		assert_abs_diff_eq!(m, 21.0, epsilon = 1e-9);

		let (d, m) = degrees_minutes(-0.5);
		assert_eq!(d, 0);
		assert_abs_diff_eq!(m, 30.0, epsilon = 1e-9);
	}

	#[test]
	fn whole_world_corners() {
		// The full zoom-1 grid: corners at the projection limits.
		let extent = TileBBox::new(1, 0, 0, 1, 1).unwrap();
		let plan = StitchPlan::new(extent, TileSize::new(256, 256), 10000).unwrap();
		let p = plan.partition(0, 0);

		let c = corners(&plan, &p);
		assert_eq!((c[0].0, c[0].1), (0, 0));
		assert_eq!((c[2].0, c[2].1), (511, 511));
		assert_abs_diff_eq!(c[0].3, -180.0, epsilon = 1e-9);
		assert_abs_diff_eq!(c[0].2, 85.0511, epsilon = 1e-3);
		assert_abs_diff_eq!(c[2].2, -85.0511, epsilon = 0.01);
	}

	#[test]
	fn map_file_has_the_fixed_grammar() {
		let extent = TileBBox::new(3, 2, 2, 5, 5).unwrap();
		let plan = StitchPlan::new(extent, TileSize::new(256, 256), 10000).unwrap();
		let p = plan.partition(0, 0);

		let text = render_map_file(&plan, &p).unwrap();
		let lines: Vec<&str> = text.lines().collect();

		assert_eq!(lines[0], "OziExplorer Map Data File Version 2.2");
		assert_eq!(lines[1], "0_0.png");
		assert_eq!(lines[8], "Map Projection,Mercator,PolyCal,No,AutoCalOnly,No,BSBUseWPX,No");
		assert!(lines[9].starts_with("Point01,xy,    0,    0,in, deg,"));
		assert!(lines[10].starts_with("Point02,xy, 1023,    0,in, deg,"));
		assert!(lines[12].starts_with("Point04,xy,    0, 1023,in, deg,"));
		// Points 5 through 30 are placeholders.
		assert!(lines[13].starts_with("Point05,xy,     ,     ,"));
		assert!(lines[38].starts_with("Point30,xy,     ,     ,"));
		assert!(lines.contains(&"MMPNUM,4"));
		assert!(lines.contains(&"MMPXY,3,1023,1023"));
		assert!(lines.iter().any(|l| l.starts_with("MM1B,")));
		assert_eq!(*lines.last().unwrap(), "IWH,Map Image Width/Height,1024,1024");

		// Corner geography: tile column 2 at zoom 3 starts at -90 degrees.
		let mmpll: Vec<&&str> = lines.iter().filter(|l| l.starts_with("MMPLL,1,")).collect();
		assert_eq!(mmpll.len(), 1);
		let fields: Vec<&str> = mmpll[0].split(',').collect();
		let lon: f64 = fields[2].trim().parse().unwrap();
		assert_abs_diff_eq!(lon, -90.0, epsilon = 1e-6);
	}

	#[test]
	fn calibrator_writes_one_file_per_partition() {
		let dir = tempfile::tempdir().unwrap();
		let extent = TileBBox::new(5, 4, 4, 7, 7).unwrap();
		let plan = StitchPlan::new(extent, TileSize::new(256, 256), 512).unwrap();
		assert_eq!(plan.count(), 4);

		let config = RunConfig {
			project_root: dir.path().to_path_buf(),
			source: crate::provider::resolve(&crate::provider::builtin_providers(), "OpenStreetMap", None).unwrap(),
			bbox: crate::types::GeoBBox::new(-45.0, 40.0, -40.0, 45.0).unwrap(),
			tile_format: crate::types::TileFormat::Png,
			download_concurrency: 1,
			stitch_concurrency: 1,
			max_dimension: 512,
			timeout_secs: 5,
		};
		let written = Calibrator::new(&config).run(&plan).unwrap();
		assert_eq!(written, 4);
		assert!(storage::map_path(dir.path(), 5, 0, 0).exists());
		assert!(storage::map_path(dir.path(), 5, 1, 1).exists());
	}
}
