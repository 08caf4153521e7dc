//! The raster capability: decode, encode, montage, crop, thumbnail and
//! basic drawing, behind a trait so the stitch coordinator can be tested
//! against a double.
//!
//! The production implementation is in-process on top of the `image`
//! crate. Any failure surfaces as an ordinary error; callers decide
//! whether a failed raster operation is fatal or only costs one
//! partition.

use crate::storage;
use crate::types::{TileFormat, TileSize};
use anyhow::{Context, Result, ensure};
use image::{DynamicImage, GenericImage, ImageFormat, ImageReader, Rgba};
use imageproc::drawing::draw_line_segment_mut;
use std::io::Cursor;
use std::path::{Path, PathBuf};

pub trait RasterOps: Send + Sync {
	/// Decodes an image buffer and reports its pixel dimensions.
	fn decode_size(&self, bytes: &[u8]) -> Result<TileSize>;

	/// Persists a downloaded tile in the requested format, transcoding
	/// when the wire format differs. Returns the decoded dimensions.
	fn save_tile(&self, bytes: &[u8], path: &Path, format: TileFormat) -> Result<TileSize>;

	fn load(&self, path: &Path) -> Result<DynamicImage>;

	/// Reads only the header of an image file.
	fn load_size(&self, path: &Path) -> Result<TileSize>;

	/// Arranges `cols x rows` source images into one composite with zero
	/// gap, in row-major source order.
	fn montage(&self, tiles: &[PathBuf], cols: u32, rows: u32, tile_size: TileSize) -> Result<DynamicImage>;

	fn crop(&self, image: &DynamicImage, left: u32, top: u32, width: u32, height: u32) -> Result<DynamicImage>;

	/// Downsamples preserving aspect ratio so that neither side exceeds
	/// `max_side`.
	fn thumbnail(&self, image: &DynamicImage, max_side: u32) -> DynamicImage;

	/// Encodes as PNG and writes atomically.
	fn save_png(&self, image: &DynamicImage, path: &Path) -> Result<()>;

	/// Builds a contact-sheet index from per-partition thumbnails, laid
	/// out like the partitions themselves. The labeled variant draws
	/// cell borders and `row_col` labels.
	fn contact_sheet(&self, cells: &[(u32, u32, PathBuf)], rows: u32, cols: u32, labeled: bool) -> Result<DynamicImage>;

	/// Draws a connected line strip. Used for print-layout overlays and
	/// contact-sheet borders.
	fn draw_polyline(&self, image: &mut DynamicImage, points: &[(f32, f32)], color: [u8; 4]);

	/// Draws digit/underscore text with a built-in glyph set.
	fn draw_label(&self, image: &mut DynamicImage, x: u32, y: u32, text: &str, scale: u32, color: [u8; 4]);
}

/// Production raster implementation on the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageRaster;

impl RasterOps for ImageRaster {
	fn decode_size(&self, bytes: &[u8]) -> Result<TileSize> {
		let image = image::load_from_memory(bytes).context("decoding tile image")?;
		Ok(TileSize::new(image.width(), image.height()))
	}

	fn save_tile(&self, bytes: &[u8], path: &Path, format: TileFormat) -> Result<TileSize> {
		let image = image::load_from_memory(bytes).context("decoding tile image")?;
		let size = TileSize::new(image.width(), image.height());

		let already_target = image::guess_format(bytes)
			.map(|f| f == format.as_image_format())
			.unwrap_or(false);
		if already_target {
			storage::write_atomic(path, bytes)?;
		} else {
			let mut encoded = Vec::new();
			let image = match format {
				// JPEG has no alpha channel.
				TileFormat::Jpg => DynamicImage::ImageRgb8(image.into_rgb8()),
				TileFormat::Png => image,
			};
			image
				.write_to(&mut Cursor::new(&mut encoded), format.as_image_format())
				.with_context(|| format!("encoding tile as {format}"))?;
			storage::write_atomic(path, &encoded)?;
		}
		Ok(size)
	}

	fn load(&self, path: &Path) -> Result<DynamicImage> {
		ImageReader::open(path)
			.with_context(|| format!("opening '{}'", path.display()))?
			.decode()
			.with_context(|| format!("decoding '{}'", path.display()))
	}

	fn load_size(&self, path: &Path) -> Result<TileSize> {
		let (width, height) = image::image_dimensions(path).with_context(|| format!("probing '{}'", path.display()))?;
		Ok(TileSize::new(width, height))
	}

	fn montage(&self, tiles: &[PathBuf], cols: u32, rows: u32, tile_size: TileSize) -> Result<DynamicImage> {
		ensure!(
			tiles.len() as u64 == cols as u64 * rows as u64,
			"montage of {cols}x{rows} needs {} tiles, got {}",
			cols as u64 * rows as u64,
			tiles.len()
		);
		let mut composite = DynamicImage::new_rgba8(cols * tile_size.width, rows * tile_size.height);
		for (i, path) in tiles.iter().enumerate() {
			let tile = self.load(path)?;
			ensure!(
				tile.width() == tile_size.width && tile.height() == tile_size.height,
				"tile '{}' is {}x{}, expected {tile_size}",
				path.display(),
				tile.width(),
				tile.height()
			);
			let col = i as u32 % cols;
			let row = i as u32 / cols;
			composite
				.copy_from(&tile, col * tile_size.width, row * tile_size.height)
				.with_context(|| format!("placing tile '{}'", path.display()))?;
		}
		Ok(composite)
	}

	fn crop(&self, image: &DynamicImage, left: u32, top: u32, width: u32, height: u32) -> Result<DynamicImage> {
		ensure!(
			left + width <= image.width() && top + height <= image.height(),
			"crop {width}x{height}+{left}+{top} exceeds the {}x{} source",
			image.width(),
			image.height()
		);
		Ok(image.crop_imm(left, top, width, height))
	}

	fn thumbnail(&self, image: &DynamicImage, max_side: u32) -> DynamicImage {
		image.thumbnail(max_side, max_side)
	}

	fn save_png(&self, image: &DynamicImage, path: &Path) -> Result<()> {
		let mut encoded = Vec::new();
		image
			.write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
			.context("encoding PNG")?;
		storage::write_atomic(path, &encoded)
	}

	fn contact_sheet(&self, cells: &[(u32, u32, PathBuf)], rows: u32, cols: u32, labeled: bool) -> Result<DynamicImage> {
		ensure!(!cells.is_empty(), "contact sheet needs at least one thumbnail");

		let mut thumbs = Vec::with_capacity(cells.len());
		let (mut cell_w, mut cell_h) = (1u32, 1u32);
		for (row, col, path) in cells {
			let thumb = self.load(path)?;
			cell_w = cell_w.max(thumb.width());
			cell_h = cell_h.max(thumb.height());
			thumbs.push((*row, *col, thumb));
		}

		let mut sheet = DynamicImage::new_rgba8(cols * cell_w, rows * cell_h);
		for (row, col, thumb) in &thumbs {
			let x = col * cell_w;
			let y = row * cell_h;
			sheet
				.copy_from(thumb, x, y)
				.with_context(|| format!("placing thumbnail {row}_{col}"))?;
			if labeled {
				let border = [
					(x as f32, y as f32),
					((x + cell_w - 1) as f32, y as f32),
					((x + cell_w - 1) as f32, (y + cell_h - 1) as f32),
					(x as f32, (y + cell_h - 1) as f32),
					(x as f32, y as f32),
				];
				self.draw_polyline(&mut sheet, &border, [255, 0, 0, 255]);
				self.draw_label(&mut sheet, x + 4, y + 4, &format!("{row}_{col}"), 2, [255, 0, 0, 255]);
			}
		}
		Ok(sheet)
	}

	fn draw_polyline(&self, image: &mut DynamicImage, points: &[(f32, f32)], color: [u8; 4]) {
		for pair in points.windows(2) {
			draw_line_segment_mut(image, pair[0], pair[1], Rgba(color));
		}
	}

	fn draw_label(&self, image: &mut DynamicImage, x: u32, y: u32, text: &str, scale: u32, color: [u8; 4]) {
		let scale = scale.max(1);
		let mut pen_x = x;
		for ch in text.chars() {
			let Some(glyph) = glyph(ch) else {
				pen_x += 4 * scale;
				continue;
			};
			for (gy, row_bits) in glyph.iter().enumerate() {
				for gx in 0..3u32 {
					if row_bits & (0b100 >> gx) != 0 {
						fill_square(image, pen_x + gx * scale, y + gy as u32 * scale, scale, color);
					}
				}
			}
			pen_x += 4 * scale;
		}
	}
}

/// 3x5 bitmaps for the characters appearing in partition names.
fn glyph(ch: char) -> Option<[u8; 5]> {
	Some(match ch {
		'0' => [0b111, 0b101, 0b101, 0b101, 0b111],
		'1' => [0b010, 0b110, 0b010, 0b010, 0b111],
		'2' => [0b111, 0b001, 0b111, 0b100, 0b111],
		'3' => [0b111, 0b001, 0b011, 0b001, 0b111],
		'4' => [0b101, 0b101, 0b111, 0b001, 0b001],
		'5' => [0b111, 0b100, 0b111, 0b001, 0b111],
		'6' => [0b111, 0b100, 0b111, 0b101, 0b111],
		'7' => [0b111, 0b001, 0b010, 0b010, 0b010],
		'8' => [0b111, 0b101, 0b111, 0b101, 0b111],
		'9' => [0b111, 0b101, 0b111, 0b001, 0b111],
		'_' => [0b000, 0b000, 0b000, 0b000, 0b111],
		_ => return None,
	})
}

fn fill_square(image: &mut DynamicImage, x: u32, y: u32, size: u32, color: [u8; 4]) {
	for dy in 0..size {
		for dx in 0..size {
			let (px, py) = (x + dx, y + dy);
			if px < image.width() && py < image.height() {
				image.put_pixel(px, py, Rgba(color));
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use image::RgbaImage;

	fn solid(width: u32, height: u32, color: [u8; 4]) -> DynamicImage {
		DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(color)))
	}

	fn png_bytes(image: &DynamicImage) -> Vec<u8> {
		let mut bytes = Vec::new();
		image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
		bytes
	}

	#[test]
	fn decode_size_reports_dimensions() {
		let bytes = png_bytes(&solid(7, 5, [1, 2, 3, 255]));
		assert_eq!(ImageRaster.decode_size(&bytes).unwrap(), TileSize::new(7, 5));
		assert!(ImageRaster.decode_size(b"not an image").is_err());
	}

	#[test]
	fn save_tile_keeps_matching_format_bytes() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("t.png");
		let bytes = png_bytes(&solid(4, 4, [9, 9, 9, 255]));
		let size = ImageRaster.save_tile(&bytes, &path, TileFormat::Png).unwrap();
		assert_eq!(size, TileSize::new(4, 4));
		assert_eq!(std::fs::read(&path).unwrap(), bytes);
	}

	#[test]
	fn save_tile_transcodes_to_the_target_format() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("t.jpg");
		let bytes = png_bytes(&solid(4, 4, [9, 9, 9, 255]));
		ImageRaster.save_tile(&bytes, &path, TileFormat::Jpg).unwrap();
		let written = std::fs::read(&path).unwrap();
		assert_eq!(image::guess_format(&written).unwrap(), ImageFormat::Jpeg);
		assert_eq!(ImageRaster.load_size(&path).unwrap(), TileSize::new(4, 4));
	}

	#[test]
	fn montage_arranges_row_major_and_crop_trims() {
		let dir = tempfile::tempdir().unwrap();
		let colors = [
			[255u8, 0, 0, 255],
			[0, 255, 0, 255],
			[0, 0, 255, 255],
			[255, 255, 0, 255],
		];
		let mut paths = Vec::new();
		for (i, color) in colors.iter().enumerate() {
			let path = dir.path().join(format!("{i}.png"));
			ImageRaster.save_png(&solid(8, 8, *color), &path).unwrap();
			paths.push(path);
		}

		let montage = ImageRaster.montage(&paths, 2, 2, TileSize::new(8, 8)).unwrap();
		assert_eq!((montage.width(), montage.height()), (16, 16));
		let rgba = montage.to_rgba8();
		assert_eq!(rgba.get_pixel(0, 0).0, colors[0]);
		assert_eq!(rgba.get_pixel(15, 0).0, colors[1]);
		assert_eq!(rgba.get_pixel(0, 15).0, colors[2]);
		assert_eq!(rgba.get_pixel(15, 15).0, colors[3]);

		let cropped = ImageRaster.crop(&montage, 4, 4, 8, 8).unwrap();
		assert_eq!((cropped.width(), cropped.height()), (8, 8));
		assert_eq!(cropped.to_rgba8().get_pixel(0, 0).0, colors[0]);
		assert_eq!(cropped.to_rgba8().get_pixel(7, 7).0, colors[3]);

		assert!(ImageRaster.crop(&montage, 10, 10, 8, 8).is_err());
	}

	#[test]
	fn montage_rejects_mismatched_tile_dimensions() {
		let dir = tempfile::tempdir().unwrap();
		let good = dir.path().join("good.png");
		let bad = dir.path().join("bad.png");
		ImageRaster.save_png(&solid(8, 8, [1, 1, 1, 255]), &good).unwrap();
		ImageRaster.save_png(&solid(4, 8, [1, 1, 1, 255]), &bad).unwrap();
		let err = ImageRaster
			.montage(&[good, bad], 2, 1, TileSize::new(8, 8))
			.unwrap_err()
			.to_string();
		assert!(err.contains("bad.png"));
	}

	#[test]
	fn thumbnail_preserves_aspect() {
		let thumb = ImageRaster.thumbnail(&solid(400, 100, [5, 5, 5, 255]), 100);
		assert_eq!((thumb.width(), thumb.height()), (100, 25));
	}

	#[test]
	fn contact_sheet_layout_and_labels() {
		let dir = tempfile::tempdir().unwrap();
		let mut cells = Vec::new();
		for (row, col) in [(0u32, 0u32), (0, 1), (1, 0), (1, 1)] {
			let path = dir.path().join(format!("{row}_{col}.png"));
			ImageRaster.save_png(&solid(20, 20, [0, 128, 0, 255]), &path).unwrap();
			cells.push((row, col, path));
		}
		let plain = ImageRaster.contact_sheet(&cells, 2, 2, false).unwrap();
		assert_eq!((plain.width(), plain.height()), (40, 40));

		let labeled = ImageRaster.contact_sheet(&cells, 2, 2, true).unwrap();
		// Border pixels are red in the labeled variant.
		assert_eq!(labeled.to_rgba8().get_pixel(0, 0).0, [255, 0, 0, 255]);
	}

	#[test]
	fn draw_label_marks_pixels() {
		let mut canvas = solid(40, 12, [0, 0, 0, 255]);
		ImageRaster.draw_label(&mut canvas, 1, 1, "1_0", 1, [255, 255, 255, 255]);
		let rgba = canvas.to_rgba8();
		assert!(rgba.pixels().any(|p| p.0 == [255, 255, 255, 255]));
	}
}
