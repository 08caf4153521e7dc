//! Pure Web Mercator math: conversions between degrees, tile indices and
//! pixel positions at a given zoom level.
//!
//! All functions are total over their documented domain and operate on
//! `f64`. Callers are expected to validate latitudes against
//! [`MAX_MERCATOR_LAT`] before converting; outside that range the
//! projection is undefined.
//!
//! Tile indices are derived by truncation (`floor`), not rounding. This
//! determines grid alignment and must not be changed.

use std::f64::consts::PI;

/// Latitude limit of the Web Mercator projection in degrees.
pub const MAX_MERCATOR_LAT: f64 = 85.05113;

/// Equatorial circumference of the WGS84 ellipsoid in meters.
pub const EQUATOR_CIRCUMFERENCE: f64 = 40_075_016.686;

/// Converts a geographic coordinate to the tile that contains it.
///
/// Uses the standard slippy-map formulas:
/// `x = floor((lon + 180) / 360 * 2^z)` and
/// `y = floor((1 - asinh(tan(lat)) / PI) / 2 * 2^z)`.
///
/// The result is clamped to the valid tile range, so `lon = 180.0` maps
/// to the last column instead of one past it.
pub fn deg_to_tile(lat: f64, lon: f64, level: u8) -> (u32, u32) {
	let n = 2f64.powi(level as i32);
	let x = ((lon + 180.0) / 360.0 * n).floor();
	let y = ((1.0 - lat.to_radians().tan().asinh() / PI) / 2.0 * n).floor();
	let max = n - 1.0;
	(x.clamp(0.0, max) as u32, y.clamp(0.0, max) as u32)
}

/// Converts a (possibly fractional) tile index to degrees.
///
/// Integer indices yield the north-west corner of the tile; `x + 1` /
/// `y + 1` yield the opposite corner, fractional indices yield interior
/// points.
pub fn tile_to_deg(x: f64, y: f64, level: u8) -> (f64, f64) {
	let n = 2f64.powi(level as i32);
	let lon = x / n * 360.0 - 180.0;
	let lat = (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees();
	(lat, lon)
}

/// Converts a pixel position in whole-grid pixel space to degrees.
///
/// Generalizes [`tile_to_deg`] to pixel granularity for arbitrary tile
/// pixel dimensions (not hardcoded to 256).
pub fn pixel_to_deg(pixel_x: f64, pixel_y: f64, tile_width: u32, tile_height: u32, level: u8) -> (f64, f64) {
	tile_to_deg(pixel_x / tile_width as f64, pixel_y / tile_height as f64, level)
}

/// Ground resolution in meters per pixel at the given latitude.
///
/// `EQUATOR_CIRCUMFERENCE * cos(lat) / 2^(z + log2(tile_base_px))`.
/// Informational only; consuming tools recompute it.
pub fn meters_per_pixel(lat: f64, level: u8, tile_base_px: u32) -> f64 {
	EQUATOR_CIRCUMFERENCE * lat.to_radians().cos() / 2f64.powf(level as f64 + (tile_base_px as f64).log2())
}
