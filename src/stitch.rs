//! Stitch coordinator: turns the planned partitions into composite
//! images, thumbnails and contact-sheet indexes.
//!
//! Partitions are processed by a fixed pool of blocking workers, bounded
//! by a semaphore of exactly `stitch_concurrency` permits — stricter
//! than the downloader's 2x allowance, since stitching is CPU and
//! memory heavy. A partition whose output already exists with the
//! expected dimensions is skipped (re-runs are idempotent); a failed
//! partition is logged and left absent so a re-run regenerates it,
//! while the rest of the run continues.

use crate::config::RunConfig;
use crate::plan::{StitchPartition, StitchPlan};
use crate::progress::ProgressBar;
use crate::raster::RasterOps;
use crate::storage;
use crate::types::TileSize;
use anyhow::{Context, Result, ensure};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Side length of the square that thumbnails must fit into.
const THUMB_SIDE: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StitchSummary {
	pub built: u64,
	pub skipped: u64,
	pub failed: u64,
}

enum PartitionOutcome {
	Built,
	Skipped,
}

pub struct Stitcher<'a> {
	config: &'a RunConfig,
	raster: Arc<dyn RasterOps>,
}

impl<'a> Stitcher<'a> {
	pub fn new(config: &'a RunConfig, raster: Arc<dyn RasterOps>) -> Stitcher<'a> {
		Stitcher { config, raster }
	}

	pub async fn run(&self, plan: &StitchPlan) -> Result<StitchSummary> {
		let level = plan.extent.level;
		let thumb_dir = storage::thumb_dir(&self.config.project_root, level);
		fs::create_dir_all(&thumb_dir).with_context(|| format!("creating '{}'", thumb_dir.display()))?;

		let progress = ProgressBar::new(&format!("stitching zoom {level}"), plan.count());
		let pool = Arc::new(Semaphore::new(self.config.stitch_concurrency.max(1)));
		let mut handles = Vec::with_capacity(plan.count() as usize);

		for partition in plan.iter_partitions() {
			let permit = Arc::clone(&pool)
				.acquire_owned()
				.await
				.context("stitch pool semaphore closed")?;
			let raster = Arc::clone(&self.raster);
			let root = self.config.project_root.clone();
			let extension = self.config.tile_extension().to_string();
			let tile_size = plan.tile_size;
			let progress = progress.clone();
			handles.push(tokio::task::spawn_blocking(move || {
				let result = stitch_partition(raster.as_ref(), &root, level, &extension, tile_size, &partition);
				progress.inc(1);
				drop(permit);
				(partition, result)
			}));
		}

		let mut summary = StitchSummary {
			built: 0,
			skipped: 0,
			failed: 0,
		};
		for joined in futures::future::join_all(handles).await {
			let (partition, result) = joined.context("stitch worker panicked")?;
			match result {
				Ok(PartitionOutcome::Built) => summary.built += 1,
				Ok(PartitionOutcome::Skipped) => summary.skipped += 1,
				Err(error) => {
					log::error!("stitching partition {partition} failed: {error:#}");
					summary.failed += 1;
				}
			}
		}
		progress.finish();

		if let Err(error) = self.build_indexes(plan) {
			log::error!("building contact sheets failed: {error:#}");
		}
		Ok(summary)
	}

	/// Builds the plain and labeled contact-sheet indexes from the
	/// partition thumbnails, skipping any sheet that already exists.
	fn build_indexes(&self, plan: &StitchPlan) -> Result<()> {
		let root = &self.config.project_root;
		let level = plan.extent.level;
		let cells: Vec<(u32, u32, std::path::PathBuf)> = plan
			.iter_partitions()
			.map(|p| (p.row, p.col, storage::thumb_path(root, level, p.row, p.col)))
			.filter(|(_, _, path)| path.exists())
			.collect();
		if cells.is_empty() {
			return Ok(());
		}

		for labeled in [false, true] {
			let path = storage::index_path(root, level, labeled);
			if path.exists() {
				continue;
			}
			let sheet = self
				.raster
				.contact_sheet(&cells, plan.vertical_divisions, plan.horizontal_divisions, labeled)?;
			self.raster.save_png(&sheet, &path)?;
		}
		Ok(())
	}
}

fn stitch_partition(
	raster: &dyn RasterOps,
	root: &Path,
	level: u8,
	extension: &str,
	tile_size: TileSize,
	partition: &StitchPartition,
) -> Result<PartitionOutcome> {
	let output = storage::stitch_path(root, level, partition.row, partition.col);
	let thumb = storage::thumb_path(root, level, partition.row, partition.col);
	let expected = TileSize::new(partition.width, partition.height);

	if let Ok(size) = raster.load_size(&output) {
		if size == expected {
			if raster.load_size(&thumb).is_err() {
				let image = raster.load(&output)?;
				raster.save_png(&raster.thumbnail(&image, THUMB_SIDE), &thumb)?;
			}
			return Ok(PartitionOutcome::Skipped);
		}
		log::warn!("partition {partition} exists with size {size}, expected {expected}; regenerating");
	}

	let tiles = partition.source_tiles(level, root, extension);
	let montage = raster.montage(&tiles, partition.tile_cols(), partition.tile_rows(), tile_size)?;
	let cropped = raster.crop(
		&montage,
		partition.crop_left,
		partition.crop_top,
		partition.width,
		partition.height,
	)?;
	ensure!(
		cropped.width() == partition.width && cropped.height() == partition.height,
		"stitched partition {partition} is {}x{}, expected {expected}",
		cropped.width(),
		cropped.height()
	);
	raster.save_png(&cropped, &output)?;
	raster.save_png(&raster.thumbnail(&cropped, THUMB_SIDE), &thumb)?;
	Ok(PartitionOutcome::Built)
}
