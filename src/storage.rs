//! Project folder layout and atomic file writes.
//!
//! Layout per project root:
//!
//! ```text
//! {root}/{z}/{x}/{y}.{ext}                     raw tiles
//! {root}/stitched_maps/{z}/{row}_{col}.png     composites
//! {root}/stitched_maps/{z}/{row}_{col}.map     calibration files
//! {root}/stitched_maps/{z}/thumbs/{row}_{col}.png
//! {root}/zoom-{z}.conf                         run descriptor
//! {root}/zoom-{z}-download.log                 failed-tile records
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub fn tile_path(root: &Path, level: u8, x: u32, y: u32, extension: &str) -> PathBuf {
	root.join(level.to_string()).join(x.to_string()).join(format!("{y}.{extension}"))
}

pub fn stitch_dir(root: &Path, level: u8) -> PathBuf {
	root.join("stitched_maps").join(level.to_string())
}

pub fn stitch_path(root: &Path, level: u8, row: u32, col: u32) -> PathBuf {
	stitch_dir(root, level).join(format!("{row}_{col}.png"))
}

pub fn thumb_dir(root: &Path, level: u8) -> PathBuf {
	stitch_dir(root, level).join("thumbs")
}

pub fn thumb_path(root: &Path, level: u8, row: u32, col: u32) -> PathBuf {
	thumb_dir(root, level).join(format!("{row}_{col}.png"))
}

pub fn map_path(root: &Path, level: u8, row: u32, col: u32) -> PathBuf {
	stitch_dir(root, level).join(format!("{row}_{col}.map"))
}

pub fn index_path(root: &Path, level: u8, labeled: bool) -> PathBuf {
	let name = if labeled { "index_labeled.png" } else { "index.png" };
	stitch_dir(root, level).join(name)
}

pub fn conf_path(root: &Path, level: u8) -> PathBuf {
	root.join(format!("zoom-{level}.conf"))
}

pub fn download_log_path(root: &Path, level: u8) -> PathBuf {
	root.join(format!("zoom-{level}-download.log"))
}

/// Writes `bytes` to `path` via a temporary sibling file and a rename,
/// so an interrupted run never leaves a partially written file visible.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).with_context(|| format!("creating directory '{}'", parent.display()))?;
	}
	let tmp = tmp_sibling(path);
	fs::write(&tmp, bytes).with_context(|| format!("writing '{}'", tmp.display()))?;
	fs::rename(&tmp, path).with_context(|| format!("renaming '{}' into place", tmp.display()))?;
	Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
	let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
	name.push(".tmp");
	path.with_file_name(name)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::Path;

	#[test]
	fn layout_matches_the_contract() {
		let root = Path::new("/p");
		assert_eq!(tile_path(root, 7, 12, 34, "png"), Path::new("/p/7/12/34.png"));
		assert_eq!(stitch_path(root, 7, 1, 2), Path::new("/p/stitched_maps/7/1_2.png"));
		assert_eq!(thumb_path(root, 7, 1, 2), Path::new("/p/stitched_maps/7/thumbs/1_2.png"));
		assert_eq!(map_path(root, 7, 1, 2), Path::new("/p/stitched_maps/7/1_2.map"));
		assert_eq!(conf_path(root, 7), Path::new("/p/zoom-7.conf"));
		assert_eq!(download_log_path(root, 7), Path::new("/p/zoom-7-download.log"));
	}

	#[test]
	fn atomic_write_creates_parents_and_leaves_no_tmp() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("a/b/c.txt");
		write_atomic(&path, b"hello").unwrap();
		assert_eq!(std::fs::read(&path).unwrap(), b"hello");
		assert!(!path.with_file_name("c.txt.tmp").exists());

		// Overwrites are atomic too.
		write_atomic(&path, b"world").unwrap();
		assert_eq!(std::fs::read(&path).unwrap(), b"world");
	}
}
