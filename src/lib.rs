//! Downloads map tiles from slippy-map tile servers, stitches them into
//! large composite images and writes OziExplorer calibration files for
//! the result.
//!
//! The pipeline for one zoom level is: convert the requested bounding
//! box into a tile extent ([`types::TileBBox::from_geo`]), fetch the
//! tiles with bounded concurrency ([`download::Downloader`]), plan the
//! division of the pixel grid into composites ([`plan::StitchPlan`]),
//! assemble and crop them ([`stitch::Stitcher`]) and georeference the
//! output ([`calibrate::Calibrator`]). Every stage is resumable; re-runs
//! skip work whose artifacts already exist on disk.
//!
//! # Examples
//!
//! ```
//! use tilestitch::{GeoBBox, TileBBox, TileSize};
//! use tilestitch::plan::StitchPlan;
//!
//! let bbox = GeoBBox::new(13.0, 52.3, 13.8, 52.7).unwrap();
//! let extent = TileBBox::from_geo(&bbox, 12).unwrap();
//! let plan = StitchPlan::new(extent, TileSize::new(256, 256), 10_000).unwrap();
//! assert!(plan.partition_width <= 10_000);
//! ```

pub mod calibrate;
pub mod config;
pub mod download;
pub mod geodesy;
pub mod plan;
pub mod progress;
pub mod provider;
pub mod raster;
pub mod stitch;
pub mod storage;
pub mod types;

pub use types::{GeoBBox, TileBBox, TileCoord, TileFormat, TileSize};
