//! Raster format used for saved tiles.

use anyhow::bail;
use image::ImageFormat;
use std::fmt;
use std::str::FromStr;

/// Format in which downloaded tiles are written to disk.
#[derive(Clone, Copy, PartialEq, Eq, Debug, clap::ValueEnum)]
pub enum TileFormat {
	Png,
	Jpg,
}

impl TileFormat {
	/// File extension, without the leading dot.
	pub fn extension(&self) -> &'static str {
		match self {
			TileFormat::Png => "png",
			TileFormat::Jpg => "jpg",
		}
	}

	pub fn as_image_format(&self) -> ImageFormat {
		match self {
			TileFormat::Png => ImageFormat::Png,
			TileFormat::Jpg => ImageFormat::Jpeg,
		}
	}

	/// Maps a provider tile extension to the format it is stored in.
	pub fn from_extension(ext: &str) -> anyhow::Result<TileFormat> {
		TileFormat::from_str(ext)
	}
}

impl FromStr for TileFormat {
	type Err = anyhow::Error;

	fn from_str(value: &str) -> anyhow::Result<TileFormat> {
		Ok(match value.to_ascii_lowercase().as_str() {
			"png" => TileFormat::Png,
			"jpg" | "jpeg" => TileFormat::Jpg,
			_ => bail!("unknown tile format '{value}', expected 'png' or 'jpg'"),
		})
	}
}

impl fmt::Display for TileFormat {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.extension())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_known_extensions() {
		assert_eq!(TileFormat::from_extension("png").unwrap(), TileFormat::Png);
		assert_eq!(TileFormat::from_extension("JPEG").unwrap(), TileFormat::Jpg);
		assert_eq!(TileFormat::from_extension("jpg").unwrap(), TileFormat::Jpg);
		assert!(TileFormat::from_extension("webp").is_err());
	}

	#[test]
	fn extension_round_trip() {
		for format in [TileFormat::Png, TileFormat::Jpg] {
			assert_eq!(TileFormat::from_extension(format.extension()).unwrap(), format);
		}
	}
}
