//! Errors reported by `huntaway`.
//!
//! `huntaway` reports failures in two places. Problems with the request itself (a bad URL, an
//! unsupported scheme, a missing payload or upload file) are detected before any transport task
//! exists and are returned synchronously as a [`SendError`]. Everything that goes wrong once the
//! transfer has started (network failures, timeouts, cancellation, malformed responses) is
//! delivered asynchronously as a [`TransferError`], through
//! [`Exchange::error`](crate::Exchange::error) and the completion hook.

use crate::request::Method;
use std::path::PathBuf;
use std::sync::Arc;

/// The ways in which a received `Content-Length` header can be invalid.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum BadContentLength {
	/// The header is not valid UTF-8.
	#[error(transparent)]
	NotUtf8(std::str::Utf8Error),

	/// The header is not a nonnegative integer or does not fit into a `u64`.
	#[error(transparent)]
	NotU64(std::num::ParseIntError),
}

/// The ways in which a chunk header can be invalid.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum BadChunkHeader {
	/// A byte in the chunk size is not a hex digit.
	#[error("Chunk size is not a hex number")]
	SizeNotHex,

	/// The size does not fit in a `u64`.
	#[error("Chunk size is too large")]
	SizeNotU64,

	/// A character in the chunk header extensions section was not permitted to appear there.
	#[error("Chunk extensions contains invalid character")]
	ExtChar,

	/// A newline character (CR or LF) was not present where required.
	#[error("Chunk framing contains incorrect newlines")]
	Newline,
}

/// A response that the bundled transport could not make sense of.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum InvalidData {
	/// The status line or headers could not be parsed.
	#[error("Malformed response headers: {0}")]
	ParseHeaders(String),

	/// The response headers are too long.
	#[error("Response headers too long")]
	ResponseHeadersTooLong,

	/// The server decided to switch protocols. This is not supported.
	#[error("Unsupported 101 Switching Protocols received")]
	SwitchingProtocols,

	/// The server sent both a `Content-Length` header and a `Transfer-Encoding` header.
	#[error("Content-Length and Transfer-Encoding both received")]
	ContentLengthAndTransferEncoding,

	/// The server sent multiple `Content-Length` headers.
	#[error("Multiple Content-Length headers received")]
	MultipleContentLengths,

	/// The server sent an invalid `Content-Length` header.
	#[error("Invalid Content-Length header received: {0}")]
	BadContentLength(#[from] BadContentLength),

	/// The server sent multiple `Transfer-Encoding` headers.
	#[error("Multiple Transfer-Encoding headers received")]
	MultipleTransferEncodings,

	/// The server sent a `Transfer-Encoding` header with an encoding other than `chunked`.
	#[error("Unsupported Transfer-Encoding received")]
	NotChunked,

	/// The server sent an invalid chunk header.
	#[error("Invalid chunk header received: {0}")]
	BadChunkHeader(#[from] BadChunkHeader),

	/// A redirect response carried a `Location` that is not a usable URL.
	#[error("Invalid redirect location {0:?}")]
	BadLocation(String),
}

/// A failure detected before a transport task was created.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
	/// The URL could not be parsed.
	#[error("Invalid URL: {0}")]
	InvalidUrl(#[from] url::ParseError),

	/// The URL scheme is neither `http` nor `https`.
	#[error("URL scheme {0:?} is not http or https")]
	UnsupportedScheme(String),

	/// The method carries a body but the request has neither payload nor stream mode.
	#[error("{0} requests need a payload or stream mode")]
	MissingPayload(Method),

	/// The request uploads from a file that does not exist.
	#[error("Upload file {} does not exist", .0.display())]
	MissingFile(PathBuf),

	/// Outlasting transfers must be downloads or `POST` uploads from a file.
	#[error("Outlasting transfers must be downloads or POST file uploads, not {0}")]
	OutlastUnsupported(Method),

	/// The session has been superseded or torn down.
	#[error("Session no longer accepts new exchanges")]
	SessionRetired,

	/// The transport refused to create the task.
	#[error("Transport refused the task: {0}")]
	Transport(#[source] std::io::Error),
}

/// A failure of a started transfer.
///
/// This type is cheap to clone so that every caller blocked on an [`Exchange`](crate::Exchange)
/// observes the same error value.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransferError {
	/// The transfer was cancelled.
	#[error("Transfer cancelled")]
	Cancelled,

	/// The transfer exceeded its timeout interval.
	#[error("Transfer timed out")]
	TimedOut,

	/// The transport cannot speak the URL scheme (e.g. `https` without TLS support).
	#[error("Scheme {0:?} is not supported by this transport")]
	UnsupportedScheme(String),

	/// The server sent a response that could not be decoded.
	#[error("Invalid response: {0}")]
	InvalidData(#[from] InvalidData),

	/// Any other I/O failure (DNS, connection refused or reset, unexpected EOF, …).
	#[error(transparent)]
	Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for TransferError {
	fn from(e: std::io::Error) -> Self {
		use std::io::ErrorKind;
		match e.kind() {
			// Socket read timeouts surface as WouldBlock on Unix and TimedOut on Windows.
			ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::TimedOut,
			_ => Self::Io(Arc::new(e)),
		}
	}
}

impl From<BadChunkHeader> for TransferError {
	fn from(e: BadChunkHeader) -> Self {
		InvalidData::from(e).into()
	}
}

impl From<BadContentLength> for TransferError {
	fn from(e: BadContentLength) -> Self {
		InvalidData::from(e).into()
	}
}

/// An invalid configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// A duration or count that must be positive was zero.
	#[error("{0} must be non-zero")]
	Zero(&'static str),

	/// The hook dispatcher could not start its worker threads.
	#[error("Failed to spawn hook dispatcher thread: {0}")]
	Spawn(#[source] std::io::Error),
}
