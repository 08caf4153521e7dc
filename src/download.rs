//! Bounded-concurrency tile acquisition.
//!
//! A supervisor enumerates the tile extent in deterministic order and
//! checks local storage first, so a re-invocation only fetches what is
//! missing or dimensionally inconsistent. Fetch jobs run on a pool of at
//! most `download_concurrency` concurrent workers; admission of new jobs
//! is bounded by a semaphore of `2 x download_concurrency` permits whose
//! permits are released by the single result-processing task, which
//! serializes tile persistence, the failure log and progress updates.
//!
//! The very first tile is awaited synchronously: its decoded dimensions
//! establish the grid-wide tile size baseline every later consistency
//! check (and the partition planner) depends on. Failure of that tile
//! aborts the run; any other tile failure is recorded in the per-zoom
//! failure log and the run continues. There is no in-run retry — a
//! re-invocation re-attempts exactly the missing tiles.

use crate::config::RunConfig;
use crate::progress::ProgressBar;
use crate::raster::RasterOps;
use crate::storage;
use crate::types::{TileBBox, TileCoord, TileFormat, TileSize};
use anyhow::{Context, Result, bail};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{Semaphore, mpsc};

/// Why a tile could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
	Timeout,
	Transport(String),
	Status(u16),
	Decode(String),
}

impl fmt::Display for FetchError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			FetchError::Timeout => write!(f, "timeout"),
			FetchError::Transport(message) => write!(f, "transport error: {message}"),
			FetchError::Status(code) => write!(f, "HTTP status {code}"),
			FetchError::Decode(message) => write!(f, "decode error: {message}"),
		}
	}
}

/// One fetch job: where to get a tile and where to put it.
#[derive(Debug, Clone)]
pub struct DownloadTask {
	pub coord: TileCoord,
	pub url: String,
	pub destination: PathBuf,
}

struct DownloadOutcome {
	task: DownloadTask,
	/// Raw image bytes and their decoded size, or the failure kind.
	payload: Result<(Vec<u8>, TileSize), FetchError>,
}

/// Counters reported after a completed acquisition phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSummary {
	pub fetched: u64,
	pub reused: u64,
	pub failed: u64,
	/// Grid-wide tile dimensions established by the first tile.
	pub tile_size: TileSize,
}

pub struct Downloader<'a> {
	config: &'a RunConfig,
	raster: Arc<dyn RasterOps>,
	client: reqwest::Client,
	cancel: Arc<AtomicBool>,
}

impl<'a> Downloader<'a> {
	pub fn new(config: &'a RunConfig, raster: Arc<dyn RasterOps>, cancel: Arc<AtomicBool>) -> Result<Downloader<'a>> {
		let client = reqwest::Client::builder()
			.timeout(Duration::from_secs(config.timeout_secs))
			.connect_timeout(Duration::from_secs(config.timeout_secs))
			.user_agent(concat!("tilestitch/", env!("CARGO_PKG_VERSION")))
			.build()
			.context("building HTTP client")?;
		Ok(Downloader {
			config,
			raster,
			client,
			cancel,
		})
	}

	/// Downloads every tile of `extent` that is not already saved with
	/// baseline dimensions.
	pub async fn run(&self, extent: &TileBBox) -> Result<DownloadSummary> {
		let progress = ProgressBar::new(&format!("downloading zoom {}", extent.level), extent.count());
		let mut coords = extent.iter_coords();
		let mut server_index = 0usize;
		let mut reused = 0u64;

		// First-tile barrier: establish the tile size baseline before
		// admitting anything else.
		let first = coords.next().context("tile extent is empty")?;
		let (baseline, first_fetched) = self
			.establish_baseline(&first, &mut server_index)
			.await
			.with_context(|| format!("failed to fetch the first tile {first:?}; cannot establish tile dimensions"))?;
		if first_fetched {
			log::debug!("tile size baseline {baseline} established from the network");
		} else {
			reused += 1;
		}
		progress.inc(1);

		// Single result processor; workers hand it bytes + dimensions,
		// it owns persistence, the failure log and the counters.
		let (result_tx, result_rx) = mpsc::unbounded_channel::<(DownloadOutcome, tokio::sync::OwnedSemaphorePermit)>();
		let processor = tokio::spawn(result_processor(
			result_rx,
			Arc::clone(&self.raster),
			self.config.tile_format,
			storage::download_log_path(&self.config.project_root, extent.level),
			baseline,
			progress.clone(),
		));

		let admission = Arc::new(Semaphore::new(self.config.download_concurrency * 2));
		let workers = Arc::new(Semaphore::new(self.config.download_concurrency));

		for coord in coords {
			if self.cancel.load(Ordering::Relaxed) {
				break;
			}

			let destination = self.tile_destination(&coord);
			if let Ok(size) = self.raster.load_size(&destination) {
				if size == baseline {
					reused += 1;
					progress.inc(1);
					continue;
				}
				log::warn!("tile {coord:?} has unexpected size {size}, refetching");
			}

			let task = DownloadTask {
				url: self.config.source.tile_url(server_index, &coord),
				coord,
				destination,
			};
			server_index += 1;

			let permit = Arc::clone(&admission)
				.acquire_owned()
				.await
				.context("admission semaphore closed")?;
			let workers = Arc::clone(&workers);
			let client = self.client.clone();
			let raster = Arc::clone(&self.raster);
			let tx = result_tx.clone();
			tokio::spawn(async move {
				let Ok(_worker) = workers.acquire_owned().await else {
					return;
				};
				let payload = fetch_tile(&client, raster.as_ref(), &task.url).await;
				// The processor may already be gone on cancellation.
				let _ = tx.send((DownloadOutcome { task, payload }, permit));
			});
		}

		// Drain: the processor finishes once every worker has reported.
		drop(result_tx);
		let (fetched, failed) = processor.await.context("result processor panicked")??;

		progress.finish();
		if self.cancel.load(Ordering::Relaxed) {
			bail!("interrupted; {fetched} tiles fetched before cancellation");
		}

		Ok(DownloadSummary {
			fetched: fetched + u64::from(first_fetched),
			reused,
			failed,
			tile_size: baseline,
		})
	}

	fn tile_destination(&self, coord: &TileCoord) -> PathBuf {
		storage::tile_path(
			&self.config.project_root,
			coord.level,
			coord.x,
			coord.y,
			self.config.tile_extension(),
		)
	}

	/// Resolves the first tile synchronously, from disk if possible.
	/// Returns the baseline size and whether a network fetch happened.
	async fn establish_baseline(&self, coord: &TileCoord, server_index: &mut usize) -> Result<(TileSize, bool)> {
		let destination = self.tile_destination(coord);
		if let Ok(size) = self.raster.load_size(&destination) {
			return Ok((size, false));
		}

		let url = self.config.source.tile_url(*server_index, coord);
		*server_index += 1;
		let (bytes, size) = fetch_tile(&self.client, self.raster.as_ref(), &url)
			.await
			.map_err(|e| anyhow::anyhow!("{e}"))?;
		self.raster.save_tile(&bytes, &destination, self.config.tile_format)?;
		Ok((size, true))
	}
}

/// Issues one HTTP GET and classifies any failure.
async fn fetch_tile(client: &reqwest::Client, raster: &dyn RasterOps, url: &str) -> Result<(Vec<u8>, TileSize), FetchError> {
	let response = client.get(url).send().await.map_err(classify_reqwest_error)?;
	let status = response.status();
	if !status.is_success() {
		return Err(FetchError::Status(status.as_u16()));
	}
	let bytes = response.bytes().await.map_err(classify_reqwest_error)?;
	let size = raster
		.decode_size(&bytes)
		.map_err(|e| FetchError::Decode(e.to_string()))?;
	Ok((bytes.to_vec(), size))
}

fn classify_reqwest_error(error: reqwest::Error) -> FetchError {
	if error.is_timeout() {
		FetchError::Timeout
	} else {
		FetchError::Transport(error.to_string())
	}
}

/// The single-threaded result stage: persists successes, records
/// failures, keeps the counters. Releasing each job's admission permit
/// here makes "in flight" mean "not yet fully processed".
async fn result_processor(
	mut rx: mpsc::UnboundedReceiver<(DownloadOutcome, tokio::sync::OwnedSemaphorePermit)>,
	raster: Arc<dyn RasterOps>,
	format: TileFormat,
	log_path: PathBuf,
	baseline: TileSize,
	progress: ProgressBar,
) -> Result<(u64, u64)> {
	let mut fetched = 0u64;
	let mut failed = 0u64;
	let mut failure_log: Option<std::fs::File> = None;

	while let Some((outcome, permit)) = rx.recv().await {
		let task = outcome.task;
		let payload = outcome.payload.and_then(|(bytes, size)| {
			if size == baseline {
				Ok(bytes)
			} else {
				Err(FetchError::Decode(format!(
					"tile is {size}, expected the grid-wide {baseline}"
				)))
			}
		});

		match payload {
			Ok(bytes) => {
				// Storage failures are fatal, unlike fetch failures.
				raster
					.save_tile(&bytes, &task.destination, format)
					.with_context(|| format!("saving tile {:?}", task.coord))?;
				fetched += 1;
			}
			Err(error) => {
				log::warn!("tile {:?} failed: {error} ({})", task.coord, task.url);
				let log_file = match failure_log.as_mut() {
					Some(file) => file,
					None => failure_log.insert(
						OpenOptions::new()
							.create(true)
							.append(true)
							.open(&log_path)
							.with_context(|| format!("opening failure log '{}'", log_path.display()))?,
					),
				};
				let timestamp = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
				writeln!(
					log_file,
					"{timestamp}\t{}\t{}\t{error}",
					task.url,
					task.destination.display()
				)
				.context("writing failure log")?;
				failed += 1;
			}
		}
		progress.inc(1);
		drop(permit);
	}

	Ok((fetched, failed))
}
