//! Static catalog of tile providers and the URL-template machinery used
//! to turn a provider/layer selection (or a custom server URL) into a
//! list of concrete tile server templates.
//!
//! A template may contain the placeholders `{z}`, `{x}`, `{y}`,
//! `{layer}` and `{ext}`, plus a single mirror group `{alts:a,b,c}`
//! which expands one template line into one URL per alternative. Mirrors
//! are used round-robin by the downloader; this is load spreading, not
//! failover.

use crate::types::TileCoord;
use anyhow::{Context, Result, bail};
use itertools::Itertools;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static ALTS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{alts:([^}]*)\}").unwrap());

/// A named map style offered by a provider. Every field except `name`
/// is optional and falls back to the provider-level value.
#[derive(Clone, Debug)]
pub struct Layer {
	pub name: &'static str,
	pub description: &'static str,
	pub tileservers: Option<&'static [&'static str]>,
	pub extension: Option<&'static str>,
	pub zoom_levels: Option<&'static str>,
}

/// A tile source with one or more server URL templates and a set of
/// layers. Constructed once at startup; immutable afterwards.
#[derive(Clone, Debug)]
pub struct Provider {
	pub name: &'static str,
	pub attribution: &'static str,
	pub url: &'static str,
	pub tileservers: &'static [&'static str],
	pub extension: &'static str,
	pub zoom_levels: &'static str,
	pub layers: &'static [Layer],
}

/// The result of resolving a provider/layer pair or a custom URL:
/// everything the downloader needs to know about the tile source.
#[derive(Clone, Debug)]
pub struct TileSource {
	pub provider: String,
	pub layer: String,
	pub attribution: String,
	/// Expanded server templates (one per mirror), still containing the
	/// `{z}/{x}/{y}` placeholders.
	pub servers: Vec<String>,
	pub extension: String,
	pub zoom_levels: Vec<u8>,
}

impl TileSource {
	/// Fills in the tile placeholders of the `server_index`-th mirror.
	pub fn tile_url(&self, server_index: usize, coord: &TileCoord) -> String {
		self.servers[server_index % self.servers.len()]
			.replace("{z}", &coord.level.to_string())
			.replace("{x}", &coord.x.to_string())
			.replace("{y}", &coord.y.to_string())
	}

	pub fn supports_zoom(&self, level: u8) -> bool {
		self.zoom_levels.contains(&level)
	}
}

impl fmt::Display for TileSource {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{} / {}", self.provider, self.layer)
	}
}

/// The built-in provider catalog.
pub fn builtin_providers() -> Vec<Provider> {
	vec![
		Provider {
			name: "OpenStreetMap",
			attribution: "© OpenStreetMap contributors",
			url: "https://www.openstreetmap.org",
			tileservers: &["https://{alts:a,b,c}.tile.openstreetmap.org/{z}/{x}/{y}.{ext}"],
			extension: "png",
			zoom_levels: "0-19",
			layers: &[Layer {
				name: "standard",
				description: "Default OSM Carto style",
				tileservers: None,
				extension: None,
				zoom_levels: None,
			}],
		},
		Provider {
			name: "OpenTopoMap",
			attribution: "© OpenStreetMap contributors, SRTM | © OpenTopoMap (CC-BY-SA)",
			url: "https://opentopomap.org",
			tileservers: &["https://{alts:a,b,c}.tile.opentopomap.org/{z}/{x}/{y}.{ext}"],
			extension: "png",
			zoom_levels: "0-17",
			layers: &[Layer {
				name: "topo",
				description: "Topographic map with contour lines",
				tileservers: None,
				extension: None,
				zoom_levels: None,
			}],
		},
		Provider {
			name: "Carto",
			attribution: "© OpenStreetMap contributors © CARTO",
			url: "https://carto.com/basemaps",
			tileservers: &["https://{alts:a,b,c,d}.basemaps.cartocdn.com/{layer}/{z}/{x}/{y}.{ext}"],
			extension: "png",
			zoom_levels: "0-20",
			layers: &[
				Layer {
					name: "light_all",
					description: "Positron (light) basemap",
					tileservers: None,
					extension: None,
					zoom_levels: None,
				},
				Layer {
					name: "dark_all",
					description: "Dark Matter basemap",
					tileservers: None,
					extension: None,
					zoom_levels: None,
				},
				Layer {
					name: "rastertiles/voyager",
					description: "Voyager basemap",
					tileservers: None,
					extension: None,
					zoom_levels: Some("0-18"),
				},
			],
		},
	]
}

/// Resolves a provider name (case-insensitive) and an optional layer
/// name against the catalog, applying per-layer overrides field by
/// field.
pub fn resolve(catalog: &[Provider], provider_name: &str, layer_name: Option<&str>) -> Result<TileSource> {
	let provider = catalog
		.iter()
		.find(|p| p.name.eq_ignore_ascii_case(provider_name))
		.with_context(|| {
			format!(
				"provider '{provider_name}' is not defined; available: {}",
				catalog.iter().map(|p| p.name).join(", ")
			)
		})?;

	let layer = match layer_name {
		Some(name) => provider.layers.iter().find(|l| l.name == name).with_context(|| {
			format!(
				"layer '{name}' is not a valid layer for provider '{}'; available: {}",
				provider.name,
				provider.layers.iter().map(|l| l.name).join(", ")
			)
		})?,
		None => provider
			.layers
			.first()
			.with_context(|| format!("provider '{}' has no layers", provider.name))?,
	};

	let templates = layer.tileservers.unwrap_or(provider.tileservers);
	let extension = layer.extension.unwrap_or(provider.extension);
	let zoom_levels = expand_zoom_levels(layer.zoom_levels.unwrap_or(provider.zoom_levels))?;

	let servers = templates
		.iter()
		.flat_map(|t| expand_alts(t))
		.map(|t| t.replace("{layer}", layer.name).replace("{ext}", extension))
		.collect();

	Ok(TileSource {
		provider: provider.name.to_string(),
		layer: layer.name.to_string(),
		attribution: provider.attribution.to_string(),
		servers,
		extension: extension.to_string(),
		zoom_levels,
	})
}

/// Builds a tile source from a user-supplied URL template. If the
/// `{z}`, `{x}` and `{y}` placeholders are not all present,
/// `/{z}/{x}/{y}.png` is appended.
pub fn custom_source(url: &str) -> Result<TileSource> {
	let mut template = url.to_string();
	if !(template.contains("{z}") && template.contains("{x}") && template.contains("{y}")) {
		if !template.ends_with('/') {
			template.push('/');
		}
		template.push_str("{z}/{x}/{y}.png");
	}

	// The saved extension is taken from the path of the template,
	// ignoring any query string.
	let extension = template
		.split('?')
		.next()
		.unwrap_or(&template)
		.rsplit('.')
		.next()
		.filter(|e| matches!(*e, "png" | "jpg" | "jpeg"))
		.unwrap_or("png")
		.to_string();

	Ok(TileSource {
		provider: "custom".to_string(),
		layer: "custom".to_string(),
		attribution: String::new(),
		servers: expand_alts(&template),
		extension,
		zoom_levels: (0..=22).collect(),
	})
}

/// Expands a single `{alts:a,b,c}` mirror group into one template per
/// alternative. Templates without a group pass through unchanged.
fn expand_alts(template: &str) -> Vec<String> {
	match ALTS_RE.captures(template) {
		Some(captures) => {
			let whole = captures.get(0).unwrap();
			captures[1]
				.split(',')
				.map(|alt| {
					let mut url = String::with_capacity(template.len());
					url.push_str(&template[..whole.start()]);
					url.push_str(alt.trim());
					url.push_str(&template[whole.end()..]);
					url
				})
				.collect()
		}
		None => vec![template.to_string()],
	}
}

/// Parses a zoom selection like `"12"`, `"1-10"` or `"1,4,7-9"` into a
/// sorted list of unique levels. Reversed ranges (`"10-1"`) are allowed.
pub fn expand_zoom_levels(selection: &str) -> Result<Vec<u8>> {
	let mut levels = Vec::new();
	for part in selection.split(',').map(str::trim) {
		match part.split('-').map(str::trim).collect::<Vec<_>>().as_slice() {
			[single] => {
				levels.push(parse_level(single)?);
			}
			[a, b] => {
				let (a, b) = (parse_level(a)?, parse_level(b)?);
				let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
				levels.extend(lo..=hi);
			}
			_ => bail!("cannot parse zoom selection '{part}'"),
		}
	}
	Ok(levels.into_iter().sorted().dedup().collect())
}

fn parse_level(value: &str) -> Result<u8> {
	let level: u8 = value
		.parse()
		.with_context(|| format!("zoom level '{value}' is not a valid integer"))?;
	Ok(level)
}
