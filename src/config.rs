//! Run configuration and the persisted per-zoom run descriptor.
//!
//! The descriptor (`zoom-{z}.conf`) pins a project folder to one
//! provider/layer/bounding-box combination. A re-invocation with
//! conflicting parameters aborts before any work, so a project folder
//! can never silently mix providers or extents.

use crate::provider::TileSource;
use crate::storage;
use crate::types::{GeoBBox, TileBBox, TileFormat, TileSize};
use anyhow::{Context, Result, bail, ensure};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Everything the pipeline components need for one run. Owned by the
/// CLI layer and passed by reference; read-only for the core.
#[derive(Clone, Debug)]
pub struct RunConfig {
	pub project_root: PathBuf,
	pub source: TileSource,
	pub bbox: GeoBBox,
	/// Format tiles are saved in; defaults to the provider's extension.
	pub tile_format: TileFormat,
	pub download_concurrency: usize,
	pub stitch_concurrency: usize,
	/// Maximum pixel dimension per side of a stitched image.
	pub max_dimension: u32,
	/// Per-request download timeout in seconds.
	pub timeout_secs: u64,
}

impl RunConfig {
	/// Extension used for saved tile files.
	pub fn tile_extension(&self) -> &'static str {
		self.tile_format.extension()
	}
}

/// The persisted description of one zoom level of a project.
#[derive(Clone, Debug, PartialEq)]
pub struct ZoomDescriptor {
	pub provider: String,
	pub layer: String,
	pub bbox: GeoBBox,
	pub extent: TileBBox,
	/// Known once the first tile of the run has been decoded.
	pub tile_size: Option<TileSize>,
}

impl ZoomDescriptor {
	pub fn path(root: &Path, level: u8) -> PathBuf {
		storage::conf_path(root, level)
	}

	/// Serializes the descriptor as `key=value` lines and writes it
	/// atomically.
	pub fn write(&self, root: &Path) -> Result<()> {
		let mut out = String::new();
		writeln!(out, "provider={}", self.provider)?;
		writeln!(out, "layer={}", self.layer)?;
		writeln!(
			out,
			"bbox={},{},{},{}",
			self.bbox.west, self.bbox.south, self.bbox.east, self.bbox.north
		)?;
		writeln!(out, "zoom={}", self.extent.level)?;
		writeln!(
			out,
			"tiles={},{},{},{}",
			self.extent.x_min, self.extent.y_min, self.extent.x_max, self.extent.y_max
		)?;
		if let Some(size) = self.tile_size {
			writeln!(out, "tile_size={size}")?;
		}
		storage::write_atomic(&Self::path(root, self.extent.level), out.as_bytes())
	}

	/// Reads the descriptor for `level`, or `None` if no previous run
	/// left one behind.
	pub fn read(root: &Path, level: u8) -> Result<Option<ZoomDescriptor>> {
		let path = Self::path(root, level);
		if !path.exists() {
			return Ok(None);
		}
		let text = fs::read_to_string(&path).with_context(|| format!("reading '{}'", path.display()))?;
		Self::parse(&text).with_context(|| format!("parsing run descriptor '{}'", path.display()))
	}

	fn parse(text: &str) -> Result<Option<ZoomDescriptor>> {
		let mut fields = HashMap::new();
		for line in text.lines() {
			let line = line.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}
			let (key, value) = line.split_once('=').with_context(|| format!("malformed line '{line}'"))?;
			fields.insert(key.trim().to_string(), value.trim().to_string());
		}

		let get = |key: &str| {
			fields
				.get(key)
				.cloned()
				.with_context(|| format!("missing field '{key}'"))
		};

		let bbox = parse_floats(&get("bbox")?, 4)?;
		let tiles = parse_ints(&get("tiles")?, 4)?;
		let level: u8 = get("zoom")?.parse().context("parsing zoom")?;

		let tile_size = match fields.get("tile_size") {
			Some(value) => {
				let (w, h) = value
					.split_once('x')
					.with_context(|| format!("malformed tile_size '{value}'"))?;
				Some(TileSize::new(w.parse()?, h.parse()?))
			}
			None => None,
		};

		Ok(Some(ZoomDescriptor {
			provider: get("provider")?,
			layer: get("layer")?,
			bbox: GeoBBox::new(bbox[0], bbox[1], bbox[2], bbox[3])?,
			extent: TileBBox::new(level, tiles[0], tiles[1], tiles[2], tiles[3])?,
			tile_size,
		}))
	}

	/// Fails if a persisted descriptor conflicts with the parameters of
	/// the current invocation. Tile size is only compared when both
	/// sides know it.
	pub fn ensure_consistent(&self, current: &ZoomDescriptor) -> Result<()> {
		ensure!(
			self.provider == current.provider && self.layer == current.layer,
			"project was created with provider '{}/{}' but this run uses '{}/{}'",
			self.provider,
			self.layer,
			current.provider,
			current.layer
		);
		ensure!(
			self.bbox == current.bbox,
			"project was created for bounding box {} but this run uses {}",
			self.bbox,
			current.bbox
		);
		ensure!(
			self.extent == current.extent,
			"project tile extent {} conflicts with this run's extent {}",
			self.extent,
			current.extent
		);
		if let (Some(a), Some(b)) = (self.tile_size, current.tile_size) {
			ensure!(a == b, "project tile size {a} conflicts with this run's tile size {b}");
		}
		Ok(())
	}
}

fn parse_floats(value: &str, expected: usize) -> Result<Vec<f64>> {
	let values: Vec<f64> = value
		.split(',')
		.map(|v| v.trim().parse().with_context(|| format!("parsing number '{v}'")))
		.collect::<Result<_>>()?;
	if values.len() != expected {
		bail!("expected {expected} comma-separated numbers, got '{value}'");
	}
	Ok(values)
}

fn parse_ints(value: &str, expected: usize) -> Result<Vec<u32>> {
	let values: Vec<u32> = value
		.split(',')
		.map(|v| v.trim().parse().with_context(|| format!("parsing integer '{v}'")))
		.collect::<Result<_>>()?;
	if values.len() != expected {
		bail!("expected {expected} comma-separated integers, got '{value}'");
	}
	Ok(values)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn descriptor() -> ZoomDescriptor {
		ZoomDescriptor {
			provider: "OpenStreetMap".to_string(),
			layer: "standard".to_string(),
			bbox: GeoBBox::new(5.0, 40.0, 6.0, 41.0).unwrap(),
			extent: TileBBox::new(8, 131, 94, 132, 95).unwrap(),
			tile_size: Some(TileSize::new(256, 256)),
		}
	}

	#[test]
	fn descriptor_round_trips_through_the_conf_file() {
		let dir = tempfile::tempdir().unwrap();
		let original = descriptor();
		original.write(dir.path()).unwrap();

		let loaded = ZoomDescriptor::read(dir.path(), 8).unwrap().unwrap();
		assert_eq!(loaded, original);
		assert_eq!(ZoomDescriptor::read(dir.path(), 9).unwrap(), None);
	}

	#[test]
	fn conflicting_runs_are_rejected() {
		let persisted = descriptor();

		let mut other = descriptor();
		other.provider = "Carto".to_string();
		let err = persisted.ensure_consistent(&other).unwrap_err().to_string();
		assert!(err.contains("provider"));

		let mut other = descriptor();
		other.bbox = GeoBBox::new(5.0, 40.0, 6.5, 41.0).unwrap();
		assert!(persisted.ensure_consistent(&other).is_err());

		// Unknown tile size on one side is not a conflict.
		let mut other = descriptor();
		other.tile_size = None;
		persisted.ensure_consistent(&other).unwrap();

		persisted.ensure_consistent(&descriptor()).unwrap();
	}

	#[test]
	fn parse_rejects_malformed_lines() {
		assert!(ZoomDescriptor::parse("provider").is_err());
		assert!(ZoomDescriptor::parse("provider=x\nlayer=y\nzoom=3\nbbox=1,2,3\ntiles=0,0,1,1").is_err());
	}
}
