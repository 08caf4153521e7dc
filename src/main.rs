use anyhow::{Context, Result, ensure};
use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tilestitch::calibrate::Calibrator;
use tilestitch::config::{RunConfig, ZoomDescriptor};
use tilestitch::download::Downloader;
use tilestitch::plan::StitchPlan;
use tilestitch::provider;
use tilestitch::raster::{ImageRaster, RasterOps};
use tilestitch::stitch::Stitcher;
use tilestitch::storage;
use tilestitch::types::{GeoBBox, TileBBox, TileFormat, TileSize};

/// Download, stitch and calibrate map tiles from slippy-map tile servers.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
	/// Project folder where tiles and stitched maps are stored
	#[arg(short = 'p', long, required_unless_present = "list_providers")]
	project_folder: Option<PathBuf>,

	/// Zoom levels to process, e.g. "12", "1-10" or "1,4,7-9"
	#[arg(short = 'z', long, required_unless_present = "list_providers")]
	zoom: Option<String>,

	/// Western boundary of the area, in degrees of longitude
	#[arg(short = 'w', long, allow_hyphen_values = true, required_unless_present = "list_providers")]
	west: Option<f64>,

	/// Eastern boundary of the area, in degrees of longitude
	#[arg(short = 'e', long, allow_hyphen_values = true, required_unless_present = "list_providers")]
	east: Option<f64>,

	/// Northern boundary of the area, in degrees of latitude
	#[arg(short = 'n', long, allow_hyphen_values = true, required_unless_present = "list_providers")]
	north: Option<f64>,

	/// Southern boundary of the area, in degrees of latitude
	#[arg(short = 's', long, allow_hyphen_values = true, required_unless_present = "list_providers")]
	south: Option<f64>,

	/// Tile provider to download from
	#[arg(short = 't', long, default_value = "OpenStreetMap", conflicts_with = "custom_url")]
	provider: String,

	/// Layer of the chosen provider (defaults to its first layer)
	#[arg(short = 'l', long)]
	layer: Option<String>,

	/// Custom tile server URL template, e.g. "http://host/{z}/{x}/{y}.png"
	#[arg(short = 'o', long)]
	custom_url: Option<String>,

	/// Maximum width and height in pixels of each stitched image
	#[arg(short = 'm', long, default_value_t = 10_000)]
	max_dimension: u32,

	/// Number of parallel tile downloads
	#[arg(short = 'd', long, default_value_t = 10)]
	download_threads: usize,

	/// Number of parallel stitching workers
	#[arg(long, default_value_t = num_cpus::get())]
	stitch_threads: usize,

	/// Per-request download timeout in seconds
	#[arg(long, default_value_t = 30)]
	timeout: u64,

	/// Save tiles in this format instead of the provider's native one
	#[arg(long)]
	tile_format: Option<TileFormat>,

	/// Reuse tiles already on disk and do not download anything
	#[arg(long)]
	skip_download: bool,

	/// Do not build stitched images
	#[arg(long)]
	skip_stitching: bool,

	/// Do not write calibration files
	#[arg(long)]
	skip_calibration: bool,

	/// Only write calibration files for an already stitched project
	#[arg(short = 'c', long)]
	only_calibrate: bool,

	/// List the available providers and layers, then exit
	#[arg(long)]
	list_providers: bool,

	#[command(flatten)]
	verbose: Verbosity<WarnLevel>,
}

fn main() {
	let cli = Cli::parse();

	env_logger::Builder::new()
		.filter_level(cli.verbose.log_level_filter())
		.format_timestamp(None)
		.init();

	if let Err(error) = run(cli) {
		eprintln!("ERROR: {error:#}");
		std::process::exit(1);
	}
}

fn run(cli: Cli) -> Result<()> {
	if cli.list_providers {
		print_providers();
		return Ok(());
	}

	let source = match &cli.custom_url {
		Some(url) => provider::custom_source(url)?,
		None => provider::resolve(&provider::builtin_providers(), &cli.provider, cli.layer.as_deref())?,
	};

	// required_unless_present guarantees these are set past this point.
	let (Some(project_folder), Some(zoom), Some(west), Some(east), Some(north), Some(south)) = (
		cli.project_folder.clone(),
		cli.zoom.clone(),
		cli.west,
		cli.east,
		cli.north,
		cli.south,
	) else {
		anyhow::bail!("missing required arguments");
	};

	let zoom_levels = provider::expand_zoom_levels(&zoom).context("parsing the zoom selection")?;
	let bbox = GeoBBox::new(west, south, east, north)?;

	let tile_format = match cli.tile_format {
		Some(format) => format,
		None => TileFormat::from_extension(&source.extension)?,
	};

	let config = RunConfig {
		project_root: project_folder,
		source,
		bbox,
		tile_format,
		download_concurrency: cli.download_threads.max(1),
		stitch_concurrency: cli.stitch_threads.max(1),
		max_dimension: cli.max_dimension,
		timeout_secs: cli.timeout,
	};

	if config.source.attribution.is_empty() {
		println!("map source: {}", config.source);
	} else {
		println!("map source: {} ({})", config.source, config.source.attribution);
	}
	println!("area: {bbox}");

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(execute(&cli, &config, &zoom_levels))
}

async fn execute(cli: &Cli, config: &RunConfig, zoom_levels: &[u8]) -> Result<()> {
	let cancel = Arc::new(AtomicBool::new(false));
	tokio::spawn({
		let cancel = Arc::clone(&cancel);
		async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				log::warn!("interrupt received, finishing requests in flight");
				cancel.store(true, Ordering::Relaxed);
			}
		}
	});

	let raster: Arc<dyn RasterOps> = Arc::new(ImageRaster);
	let skip_download = cli.skip_download || cli.only_calibrate;
	let skip_stitching = cli.skip_stitching || cli.only_calibrate;
	let mut failed_partitions = 0u64;

	for &level in zoom_levels {
		ensure!(
			config.source.supports_zoom(level),
			"{} does not serve zoom level {level}",
			config.source
		);
		let extent = TileBBox::from_geo(&config.bbox, level)?;
		println!(
			"zoom {level}: {} tiles ({} x {})",
			extent.count(),
			extent.width(),
			extent.height()
		);

		let mut descriptor = ZoomDescriptor {
			provider: config.source.provider.clone(),
			layer: config.source.layer.clone(),
			bbox: config.bbox,
			extent,
			tile_size: None,
		};
		if let Some(existing) = ZoomDescriptor::read(&config.project_root, level)? {
			existing
				.ensure_consistent(&descriptor)
				.context("this project folder was created by a different invocation")?;
			descriptor.tile_size = existing.tile_size;
		}

		let mut tile_size = descriptor.tile_size;
		if !skip_download {
			let summary = Downloader::new(config, Arc::clone(&raster), Arc::clone(&cancel))?
				.run(&extent)
				.await?;
			println!(
				"zoom {level}: {} tiles fetched, {} reused, {} failed",
				summary.fetched, summary.reused, summary.failed
			);
			if summary.failed > 0 {
				println!(
					"  failures are recorded in '{}'; re-run to retry them",
					storage::download_log_path(&config.project_root, level).display()
				);
			}
			tile_size = Some(summary.tile_size);
		}
		let tile_size = match tile_size {
			Some(size) => size,
			None => baseline_from_disk(config, &extent)?,
		};
		descriptor.tile_size = Some(tile_size);
		descriptor.write(&config.project_root)?;

		let plan = StitchPlan::new(extent, tile_size, config.max_dimension)?;
		if !skip_stitching {
			println!(
				"zoom {level}: {} stitched images of up to {}x{} pixels",
				plan.count(),
				plan.partition_width,
				plan.partition_height
			);
			let summary = Stitcher::new(config, Arc::clone(&raster)).run(&plan).await?;
			println!(
				"zoom {level}: {} images built, {} reused, {} failed",
				summary.built, summary.skipped, summary.failed
			);
			failed_partitions += summary.failed;
		}
		if !cli.skip_calibration {
			let written = Calibrator::new(config).run(&plan)?;
			println!("zoom {level}: {written} calibration files written");
		}
	}

	// A failed partition only costs that partition; everything else has
	// been produced by now, so the failure surfaces at the very end.
	ensure!(
		failed_partitions == 0,
		"{failed_partitions} stitched images failed; re-run to retry them"
	);
	Ok(())
}

/// Recovers the tile pixel dimensions from a tile already on disk, for
/// runs that skip the download phase.
fn baseline_from_disk(config: &RunConfig, extent: &TileBBox) -> Result<TileSize> {
	let path = storage::tile_path(
		&config.project_root,
		extent.level,
		extent.x_min,
		extent.y_min,
		config.tile_extension(),
	);
	ImageRaster
		.load_size(&path)
		.with_context(|| format!("tile size is unknown and '{}' cannot be read; run a download first", path.display()))
}

fn print_providers() {
	for provider in provider::builtin_providers() {
		println!("{} ({})", provider.name, provider.url);
		println!("  {}", provider.attribution);
		println!("  zoom levels: {}", provider.zoom_levels);
		for layer in provider.layers {
			println!("  layer '{}': {}", layer.name, layer.description);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
		Cli::try_parse_from(args)
	}

	#[test]
	fn requires_the_area_arguments() {
		assert!(parse(&["tilestitch"]).is_err());
		assert!(parse(&["tilestitch", "-p", "x", "-z", "5"]).is_err());
		let cli = parse(&[
			"tilestitch", "-p", "x", "-z", "5", "-w", "-1.5", "-e", "1.5", "-n", "52", "-s", "51",
		])
		.unwrap();
		assert_eq!(cli.west, Some(-1.5));
		assert_eq!(cli.max_dimension, 10_000);
		assert_eq!(cli.download_threads, 10);
		assert!(!cli.skip_download);
	}

	#[test]
	fn list_providers_needs_no_other_arguments() {
		let cli = parse(&["tilestitch", "--list-providers"]).unwrap();
		assert!(cli.list_providers);
		run(cli).unwrap();
	}

	#[test]
	fn custom_url_conflicts_with_provider() {
		assert!(
			parse(&[
				"tilestitch", "-p", "x", "-z", "5", "-w", "0", "-e", "1", "-n", "1", "-s", "0", "-t", "Carto", "-o",
				"http://host/{z}/{x}/{y}.png",
			])
			.is_err()
		);
	}

	#[test]
	fn short_c_means_only_calibrate() {
		let cli = parse(&[
			"tilestitch", "-p", "x", "-z", "5", "-w", "0", "-e", "1", "-n", "1", "-s", "0", "-c",
		])
		.unwrap();
		assert!(cli.only_calibrate);
		assert_eq!(cli.stitch_threads, num_cpus::get());
	}

	#[test]
	fn stitch_failures_do_not_skip_calibration() {
		use image::{DynamicImage, Rgba, RgbaImage};

		let dir = tempfile::tempdir().unwrap();
		let tile = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([3, 3, 3, 255])));
		// The zoom-2 extent of this box is tiles (1,1)-(2,2); tile (2,2)
		// is missing, so one of the four partitions cannot be built.
		for (x, y) in [(1u32, 1u32), (1, 2), (2, 1)] {
			ImageRaster
				.save_png(&tile, &storage::tile_path(dir.path(), 2, x, y, "png"))
				.unwrap();
		}

		let cli = parse(&[
			"tilestitch", "-p", dir.path().to_str().unwrap(), "-z", "2", "-w", "-1", "-e", "1", "-n", "1", "-s", "-1",
			"-m", "8", "--skip-download",
		])
		.unwrap();
		let err = run(cli).unwrap_err().to_string();
		assert!(err.contains("stitched images failed"));

		// The failure cost exactly one partition; the rest of the run,
		// including every calibration file, was still produced.
		assert!(storage::stitch_path(dir.path(), 2, 0, 0).exists());
		assert!(!storage::stitch_path(dir.path(), 2, 1, 1).exists());
		for (row, col) in [(0u32, 0u32), (0, 1), (1, 0), (1, 1)] {
			assert!(storage::map_path(dir.path(), 2, row, col).exists());
		}
	}

	#[test]
	fn tile_format_override_parses() {
		let cli = parse(&[
			"tilestitch", "-p", "x", "-z", "5", "-w", "0", "-e", "1", "-n", "1", "-s", "0", "--tile-format", "jpg",
		])
		.unwrap();
		assert_eq!(cli.tile_format, Some(TileFormat::Jpg));
	}
}
