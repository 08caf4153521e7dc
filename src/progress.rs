//! Minimal terminal progress bar without external dependencies.
//!
//! Renders message, bar, position/length, percentage and rate to stderr
//! on a single line. Handles are cheap to clone and safe to update from
//! multiple tasks. Output is suppressed when the `NO_PROGRESS`
//! environment variable is set (tests, CI logs).

use std::env;
use std::fmt::Write as _;
use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const BAR_WIDTH: usize = 30;
const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

struct Inner {
	message: String,
	len: u64,
	pos: u64,
	start: Instant,
	last_draw: Option<Instant>,
	enabled: bool,
	finished: bool,
}

impl Inner {
	fn redraw(&mut self, force: bool) {
		if !self.enabled || self.finished {
			return;
		}
		if !force {
			if let Some(last) = self.last_draw {
				if last.elapsed() < REDRAW_INTERVAL {
					return;
				}
			}
		}
		self.last_draw = Some(Instant::now());

		let len = self.len.max(1);
		let pos = self.pos.min(len);
		let filled = (pos as usize * BAR_WIDTH) / len as usize;
		let percent = pos * 100 / len;

		let elapsed = self.start.elapsed().as_secs_f64();
		let rate = if elapsed > 0.0 { pos as f64 / elapsed } else { 0.0 };

		let mut line = String::new();
		let _ = write!(
			&mut line,
			"{}: ▕{}{}▏{}/{} ({:>3}%) {:.1}/s",
			self.message,
			"█".repeat(filled),
			" ".repeat(BAR_WIDTH - filled),
			pos,
			self.len,
			percent,
			rate
		);

		let mut stderr = io::stderr();
		let _ = write!(stderr, "\r\x1b[2K{line}");
		let _ = stderr.flush();
	}

	fn finish(&mut self) {
		self.pos = self.len;
		if self.enabled && !self.finished {
			self.redraw(true);
			let _ = writeln!(io::stderr());
		}
		self.finished = true;
	}
}

/// A cloneable, thread-safe progress bar handle.
#[derive(Clone)]
pub struct ProgressBar {
	inner: Arc<Mutex<Inner>>,
}

impl ProgressBar {
	pub fn new(message: &str, len: u64) -> ProgressBar {
		let enabled = env::var_os("NO_PROGRESS").is_none() && io::stderr().is_terminal() && !cfg!(test);
		let bar = ProgressBar {
			inner: Arc::new(Mutex::new(Inner {
				message: message.to_string(),
				len,
				pos: 0,
				start: Instant::now(),
				last_draw: None,
				enabled,
				finished: false,
			})),
		};
		bar.with_inner(|i| i.redraw(true));
		bar
	}

	pub fn inc(&self, delta: u64) {
		self.with_inner(|i| {
			i.pos = i.pos.saturating_add(delta);
			i.redraw(false);
		});
	}

	pub fn set_position(&self, pos: u64) {
		self.with_inner(|i| {
			i.pos = pos;
			i.redraw(false);
		});
	}

	pub fn position(&self) -> u64 {
		self.inner.lock().map(|i| i.pos).unwrap_or(0)
	}

	/// Completes the bar and moves to the next line.
	pub fn finish(&self) {
		self.with_inner(Inner::finish);
	}

	fn with_inner(&self, f: impl FnOnce(&mut Inner)) {
		if let Ok(mut inner) = self.inner.lock() {
			f(&mut inner);
		}
	}
}
