//! Geographic bounding box in degrees, validated against the Web
//! Mercator projection limits.

use crate::geodesy::MAX_MERCATOR_LAT;
use anyhow::{Result, ensure};
use std::fmt;

/// A rectangular geographic area defined by its western and eastern
/// longitudes and its northern and southern latitudes, all in degrees.
///
/// Invariants, checked on construction:
/// - `west <= east` (no antimeridian wraparound),
/// - `south <= north`,
/// - longitudes within `[-180, 180]`,
/// - latitudes within the Mercator-valid range `[-85.05113, 85.05113]`.
///
/// # Examples
///
/// ```
/// use tilestitch::GeoBBox;
///
/// let bbox = GeoBBox::new(-10.0, -5.0, 10.0, 5.0).unwrap();
/// assert_eq!(bbox.west, -10.0);
/// assert_eq!(bbox.north, 5.0);
/// assert!(GeoBBox::new(10.0, -5.0, -10.0, 5.0).is_err());
/// ```
#[derive(Clone, Copy, PartialEq)]
pub struct GeoBBox {
	pub west: f64,
	pub south: f64,
	pub east: f64,
	pub north: f64,
}

impl GeoBBox {
	/// Creates a validated bounding box from `west, south, east, north`.
	pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<GeoBBox> {
		ensure!(
			(-180.0..=180.0).contains(&west) && (-180.0..=180.0).contains(&east),
			"longitude must be between -180.0 and 180.0"
		);
		ensure!(
			west <= east,
			"western longitude ({west}) must not be east of the eastern longitude ({east})"
		);
		ensure!(
			south.abs() <= MAX_MERCATOR_LAT && north.abs() <= MAX_MERCATOR_LAT,
			"latitude must be between -{MAX_MERCATOR_LAT} and {MAX_MERCATOR_LAT} in the Mercator projection"
		);
		ensure!(
			south <= north,
			"southern latitude ({south}) must not be north of the northern latitude ({north})"
		);
		Ok(GeoBBox { west, south, east, north })
	}

	/// Latitude of the horizontal center line, used for the
	/// meters-per-pixel scale estimate.
	pub fn mid_latitude(&self) -> f64 {
		(self.north + self.south) / 2.0
	}
}

impl fmt::Display for GeoBBox {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(
			f,
			"W {} / S {} / E {} / N {}",
			self.west, self.south, self.east, self.north
		)
	}
}

impl fmt::Debug for GeoBBox {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(
			f,
			"GeoBBox[{}, {}, {}, {}]",
			self.west, self.south, self.east, self.north
		)
	}
}
