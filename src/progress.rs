use std::fmt::{Display, Formatter};

/// Which way the bytes of a [`Progress`] report are flowing.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Direction {
	/// The request body is being uploaded.
	Sending,

	/// The response body is being downloaded.
	Receiving,
}

/// A snapshot of how far one direction of a transfer has got.
///
/// Progress values are produced by the session as transport events arrive and handed to the
/// exchange’s `on_process` hook. They are never mutated after construction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Progress {
	direction: Direction,
	total: i64,
	completed: i64,
	delta: i64,
}

impl Progress {
	/// Constructs a new `Progress`.
	///
	/// The `total` parameter is the number of bytes expected in this direction, or any negative
	/// number if that is not known. The `completed` parameter is the cumulative number of bytes
	/// moved so far and `delta` is the number moved by the event being reported.
	///
	/// Transports may move more bytes than they announced, for example when a server overruns its
	/// declared length. In that case the total is reported as unknown so that `completed` never
	/// exceeds a known total.
	pub fn new(direction: Direction, total: i64, completed: i64, delta: i64) -> Self {
		let total = if total >= 0 && completed > total {
			-1
		} else {
			total
		};
		Self {
			direction,
			total,
			completed,
			delta,
		}
	}

	/// Returns whether bytes are being sent or received.
	pub fn direction(&self) -> Direction {
		self.direction
	}

	/// Returns the expected number of bytes, negative if unknown.
	pub fn total(&self) -> i64 {
		self.total
	}

	/// Returns the number of bytes moved so far.
	pub fn completed(&self) -> i64 {
		self.completed
	}

	/// Returns the number of bytes moved by the event that produced this report.
	pub fn delta(&self) -> i64 {
		self.delta
	}

	/// Returns whether the total size of the transfer is known.
	pub fn is_total_known(&self) -> bool {
		self.total >= 0
	}

	/// Returns the completed fraction in the range 0 to 1, or -1 if the total is unknown or zero.
	#[allow(clippy::cast_precision_loss)]
	pub fn ratio(&self) -> f64 {
		if self.total > 0 {
			self.completed as f64 / self.total as f64
		} else {
			-1.0
		}
	}
}

impl Display for Progress {
	#[allow(clippy::cast_precision_loss)]
	fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
		const KIB: i64 = 1024;
		const MIB: i64 = KIB * 1024;
		const GIB: i64 = MIB * 1024;
		let (unit, scale, precision) = match self.total {
			t if t < KIB => return write!(f, "{} / {} bytes", self.completed, self.total),
			t if t < MIB => ("KiB", KIB, 1),
			t if t < GIB => ("MiB", MIB, 1),
			_ => ("GiB", GIB, 2),
		};
		let scale = scale as f64;
		write!(
			f,
			"{:.*}/{:.*} {}",
			precision,
			self.completed as f64 / scale,
			precision,
			self.total as f64 / scale,
			unit
		)
	}
}
