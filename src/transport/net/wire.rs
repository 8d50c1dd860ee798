//! HTTP/1.1 message framing over blocking sockets.

use crate::error::{BadChunkHeader, BadContentLength, InvalidData, TransferError};
use crate::util::{is_field_value, is_request_target, is_token};
use std::io::{BufRead, Read, Write};
use std::num::NonZeroU64;
use url::{Position, Url};

/// The longest status line plus header block that will be buffered.
pub const MAX_HEAD_LEN: usize = 64 * 1024;

/// The most response headers that will be parsed.
const MAX_HEADERS: usize = 128;

/// Returns the `request-target` for an origin-form request to `url`.
pub fn request_target(url: &Url) -> &str {
	&url[Position::BeforePath..Position::AfterQuery]
}

/// Writes an HTTP request line and request headers, followed by the blank line.
///
/// # Errors
/// This function returns an error if writing to `out` fails.
///
/// # Panics
/// This function panics in a debug build if the method is not a token, if the target contains
/// characters outside 0x21 to 0x7E, if a header name is not a token or a value is not a valid
/// field value, or if more than one framing header is present.
pub fn write_head(
	out: &mut impl Write,
	method: &str,
	target: &str,
	headers: &[(String, String)],
) -> std::io::Result<()> {
	debug_assert!(is_token(method), "Request method {} is not a token", method);
	debug_assert!(
		is_request_target(target),
		"Request target contains invalid characters"
	);
	for (name, value) in headers {
		debug_assert!(is_token(name), "Request header {} is not a token", name);
		debug_assert!(
			is_field_value(value.as_bytes()),
			"Request header value {:?} is not a valid field value",
			value
		);
	}
	debug_assert!(
		headers
			.iter()
			.filter(|(n, _)| n.eq_ignore_ascii_case("content-length")
				|| n.eq_ignore_ascii_case("transfer-encoding"))
			.count() <= 1,
		"Request must contain at most one of Content-Length and Transfer-Encoding"
	);

	write!(out, "{} {} HTTP/1.1\r\n", method, target)?;
	for (name, value) in headers {
		write!(out, "{}: {}\r\n", name, value)?;
	}
	out.write_all(b"\r\n")
}

/// Writes one chunk of a chunked request body.
///
/// Empty chunks are skipped, since a zero-length chunk terminates the body.
pub fn write_chunk(out: &mut impl Write, data: &[u8]) -> std::io::Result<()> {
	if data.is_empty() {
		return Ok(());
	}
	write!(out, "{:X}\r\n", data.len())?;
	out.write_all(data)?;
	out.write_all(b"\r\n")
}

/// Writes the terminal chunk of a chunked request body, without trailers.
pub fn finish_chunks(out: &mut impl Write) -> std::io::Result<()> {
	out.write_all(b"0\r\n\r\n")
}

/// How the length of a response body is determined.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Framing {
	/// There is no body.
	Empty,

	/// The body is exactly this many bytes long.
	Fixed(u64),

	/// The body uses chunked transfer coding.
	Chunked,

	/// The body runs until the server closes the connection.
	Eof,
}

impl Framing {
	/// Returns the expected body length, or -1 if it is not known in advance.
	pub fn expected(self) -> i64 {
		match self {
			Self::Empty => 0,
			Self::Fixed(n) => i64::try_from(n).unwrap_or(-1),
			Self::Chunked | Self::Eof => -1,
		}
	}
}

/// A received status line and header block.
#[derive(Debug, Eq, PartialEq)]
pub struct Head {
	/// The status code.
	pub status: u16,

	/// The reason phrase.
	pub reason: String,

	/// The headers, with values decoded lossily as UTF-8.
	pub headers: Vec<(String, String)>,

	/// How the body that follows is framed.
	pub framing: Framing,
}

/// Receives an HTTP status line and response headers.
///
/// Informational responses other than 101 are skipped. Only the header block is consumed from
/// `reader`; the body is left in place. `head_request` indicates that the request was `HEAD`, in
/// which case the response never has a body.
///
/// # Errors
/// This function returns an error if reading fails, if the header block exceeds
/// [`MAX_HEAD_LEN`], if the status is 101, or if the headers are malformed or frame the body in
/// an unsupported or contradictory way.
pub fn read_head(reader: &mut impl BufRead, head_request: bool) -> Result<Head, TransferError> {
	let mut buffer = Vec::new();
	loop {
		buffer.clear();
		loop {
			let bytes = reader.fill_buf()?;
			if bytes.is_empty() {
				return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
			}

			// Copy what fits, but consume only up to the end of the header block so that any body
			// bytes already buffered stay in the reader.
			let used = buffer.len();
			let copied = std::cmp::min(MAX_HEAD_LEN - used, bytes.len());
			buffer.extend_from_slice(&bytes[..copied]);
			if let Some(n) = headers_length(&buffer) {
				reader.consume(n - used);
				buffer.truncate(n);
				break;
			}
			reader.consume(copied);
			if buffer.len() == MAX_HEAD_LEN {
				return Err(InvalidData::ResponseHeadersTooLong.into());
			}
		}

		let status = parse_status_code(&buffer)?;
		if status == 101 {
			return Err(InvalidData::SwitchingProtocols.into());
		}
		if !(100..=199).contains(&status) {
			break;
		}
	}

	let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
	let mut resp = httparse::Response::new(&mut storage);
	match resp.parse(&buffer).map_err(parse_error)? {
		httparse::Status::Complete(n) if n == buffer.len() => (),
		// Disagreement over where the block ends means malformed newlines.
		_ => return Err(parse_error(httparse::Error::NewLine).into()),
	}
	let status = resp.code.ok_or_else(|| parse_error(httparse::Error::Status))?;
	let reason = resp.reason.unwrap_or_default().to_owned();
	let headers = &*resp.headers;

	let content_length = get_content_length(headers)?;
	let chunked = is_chunked(headers)?;
	if content_length.is_some() && chunked {
		return Err(InvalidData::ContentLengthAndTransferEncoding.into());
	}
	let framing = if head_request || status == 204 || status == 304 {
		Framing::Empty
	} else if chunked {
		Framing::Chunked
	} else if let Some(n) = content_length {
		Framing::Fixed(n)
	} else {
		Framing::Eof
	};

	Ok(Head {
		status,
		reason,
		headers: headers
			.iter()
			.map(|h| {
				(
					h.name.to_owned(),
					String::from_utf8_lossy(h.value).into_owned(),
				)
			})
			.collect(),
		framing,
	})
}

fn parse_error(e: httparse::Error) -> InvalidData {
	InvalidData::ParseHeaders(e.to_string())
}

/// Scans the headers and decodes the `Content-Length` header, if any.
fn get_content_length(headers: &[httparse::Header<'_>]) -> Result<Option<u64>, InvalidData> {
	let mut ret = None;
	for header in headers {
		if header.name.eq_ignore_ascii_case("content-length") {
			if ret.is_some() {
				return Err(InvalidData::MultipleContentLengths);
			}
			let value = std::str::from_utf8(header.value).map_err(BadContentLength::NotUtf8)?;
			let value = value.parse::<u64>().map_err(BadContentLength::NotU64)?;
			ret = Some(value);
		}
	}
	Ok(ret)
}

/// Scans the buffer and determines the length of the HTTP headers.
///
/// If all headers have been received, returns `Some(n)` where `n` is the length of the headers
/// in bytes, including the final [CR]LF[CR]LF. If not all headers have been received yet,
/// returns `None`.
fn headers_length(buffer: &[u8]) -> Option<usize> {
	// position() reports the distance from where the previous call stopped, not from the start.
	let mut start_pos = 0;
	let mut iter = buffer.iter();
	while let Some(dist) = iter.position(|&b| b == b'\n' || b == b'\r') {
		let eol_pos = start_pos + dist;
		for &candidate in &[
			&b"\r\n\r\n"[..],
			&b"\r\n\n"[..],
			&b"\n\r\n"[..],
			&b"\n\n"[..],
		] {
			if buffer.len() >= eol_pos + candidate.len()
				&& &buffer[eol_pos..eol_pos + candidate.len()] == candidate
			{
				return Some(eol_pos + candidate.len());
			}
		}
		start_pos = eol_pos + 1;
	}
	None
}

/// Scans the headers and determines whether chunked transfer coding is in use.
fn is_chunked(headers: &[httparse::Header<'_>]) -> Result<bool, InvalidData> {
	let mut ret = false;
	for header in headers {
		if header.name.eq_ignore_ascii_case("transfer-encoding") {
			if ret {
				return Err(InvalidData::MultipleTransferEncodings);
			}
			if header.value.eq_ignore_ascii_case(b"chunked") {
				ret = true;
			} else {
				return Err(InvalidData::NotChunked);
			}
		}
	}
	Ok(ret)
}

/// Extracts the HTTP status code from a complete header block.
fn parse_status_code(buf: &[u8]) -> Result<u16, InvalidData> {
	// A zero-length header array makes httparse stop with TooManyHeaders right after the status
	// line, which is all that is needed here.
	let mut headers = [];
	let mut resp = httparse::Response::new(&mut headers);
	match resp.parse(buf) {
		Ok(httparse::Status::Partial) => Err(parse_error(httparse::Error::NewLine)),
		Ok(httparse::Status::Complete(_)) | Err(httparse::Error::TooManyHeaders) => resp
			.code
			.ok_or_else(|| parse_error(httparse::Error::Status)),
		Err(e) => Err(parse_error(e)),
	}
}

/// Checks whether a character can legally appear in the chunk extensions section.
fn is_chunk_ext_char(b: u8) -> bool {
	b == b'\t' || !b.is_ascii_control()
}

/// The states of the chunked body decoder.
#[derive(Debug, Eq, PartialEq)]
enum State {
	/// The size part of a chunk header is being read, and no characters have been seen yet.
	SizeFirst,

	/// The size part of a chunk header is being read; the value is the size decoded so far.
	SizeRest(u64),

	/// The chunk extensions are being read; the value is the chunk size.
	Ext(u64),

	/// The LF at the end of a chunk header is being read; the value is the chunk size.
	HeaderLF(u64),

	/// The chunk data is being read; the value is the remaining chunk size.
	Data(NonZeroU64),

	/// The CR following the chunk data is being read.
	DataCR,

	/// The LF following the chunk data is being read.
	DataLF,

	/// The CR following the terminal chunk header is being read.
	FinalCR,

	/// The LF following the terminal chunk header is being read.
	FinalLF,

	/// Everything has been read.
	Done,
}

fn read_byte(source: &mut impl Read) -> Result<u8, TransferError> {
	let mut byte = [0_u8; 1];
	source.read_exact(&mut byte)?;
	Ok(byte[0])
}

fn hex_digit(b: u8) -> Option<u64> {
	char::from(b).to_digit(16).map(u64::from)
}

impl State {
	/// Advances to either [`State::Data`] or [`State::Done`].
	///
	/// Returns the number of body bytes available in the current chunk, or `None` at the end of
	/// the body.
	fn advance_to_data(&mut self, source: &mut impl Read) -> Result<Option<NonZeroU64>, TransferError> {
		loop {
			match *self {
				Self::SizeFirst => match hex_digit(read_byte(source)?) {
					Some(nybble) => *self = Self::SizeRest(nybble),
					None => return Err(BadChunkHeader::SizeNotHex.into()),
				},

				Self::SizeRest(size_so_far) => match read_byte(source)? {
					b';' => *self = Self::Ext(size_so_far),
					b'\r' => *self = Self::HeaderLF(size_so_far),
					b => match hex_digit(b) {
						Some(_) if size_so_far >= 0x1000_0000_0000_0000_u64 => {
							return Err(BadChunkHeader::SizeNotU64.into());
						}
						Some(nybble) => *self = Self::SizeRest((size_so_far << 4) | nybble),
						None => return Err(BadChunkHeader::SizeNotHex.into()),
					},
				},

				Self::Ext(chunk_size) => match read_byte(source)? {
					b'\r' => *self = Self::HeaderLF(chunk_size),
					b if is_chunk_ext_char(b) => (),
					_ => return Err(BadChunkHeader::ExtChar.into()),
				},

				Self::HeaderLF(chunk_size) => {
					if read_byte(source)? != b'\n' {
						return Err(BadChunkHeader::Newline.into());
					}
					*self = NonZeroU64::new(chunk_size).map_or(Self::FinalCR, Self::Data);
				}

				Self::Data(chunk_remaining) => return Ok(Some(chunk_remaining)),

				Self::DataCR | Self::FinalCR => {
					if read_byte(source)? != b'\r' {
						return Err(BadChunkHeader::Newline.into());
					}
					*self = if *self == Self::DataCR {
						Self::DataLF
					} else {
						Self::FinalLF
					};
				}

				Self::DataLF | Self::FinalLF => {
					if read_byte(source)? != b'\n' {
						return Err(BadChunkHeader::Newline.into());
					}
					*self = if *self == Self::DataLF {
						Self::SizeFirst
					} else {
						Self::Done
					};
				}

				Self::Done => return Ok(None),
			}
		}
	}
}

#[derive(Debug)]
enum Mode {
	Fixed(u64),
	Chunked(State),
	Eof,
}

/// Decodes a response body according to its [`Framing`].
#[derive(Debug)]
pub struct BodyReader<R> {
	source: R,
	mode: Mode,
}

impl<R: Read> BodyReader<R> {
	/// Constructs a reader that decodes the body following a header block from `source`.
	pub fn new(source: R, framing: Framing) -> Self {
		let mode = match framing {
			Framing::Empty => Mode::Fixed(0),
			Framing::Fixed(n) => Mode::Fixed(n),
			Framing::Chunked => Mode::Chunked(State::SizeFirst),
			Framing::Eof => Mode::Eof,
		};
		Self { source, mode }
	}

	/// Reads decoded body bytes into `buf`, returning zero at the end of the body.
	///
	/// # Errors
	/// This function returns an error if reading fails, if the connection closes before a
	/// delimited body is complete, or if the chunk framing is malformed.
	pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransferError> {
		let available = match &mut self.mode {
			Mode::Eof => return Ok(self.source.read(buf)?),
			Mode::Fixed(0) => return Ok(0),
			Mode::Fixed(n) => *n,
			Mode::Chunked(state) => match state.advance_to_data(&mut self.source)? {
				Some(n) => n.get(),
				None => return Ok(0),
			},
		};
		let to_read = std::cmp::min(buf.len() as u64, available) as usize;
		let bytes_read = self.source.read(&mut buf[..to_read])?;
		if bytes_read == 0 && to_read != 0 {
			return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
		}
		let remaining = available - bytes_read as u64;
		match &mut self.mode {
			Mode::Fixed(n) => *n = remaining,
			Mode::Chunked(state) => {
				*state = NonZeroU64::new(remaining).map_or(State::DataCR, State::Data);
			}
			Mode::Eof => (),
		}
		Ok(bytes_read)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::io::ErrorKind;

	fn header<'a>(name: &'a str, value: &'a [u8]) -> httparse::Header<'a> {
		httparse::Header { name, value }
	}

	fn read_all<R: Read>(reader: &mut BodyReader<R>) -> Result<Vec<u8>, TransferError> {
		let mut out = Vec::new();
		let mut buf = [0_u8; 5];
		loop {
			match reader.read(&mut buf)? {
				0 => return Ok(out),
				n => out.extend_from_slice(&buf[..n]),
			}
		}
	}

	fn expect_invalid<T: std::fmt::Debug>(variant: &InvalidData, x: &Result<T, TransferError>) {
		match x {
			Err(TransferError::InvalidData(v)) if v == variant => (),
			_ => panic!("Expected {:?}, got {:?}", variant, x),
		}
	}

	fn expect_eof<T: std::fmt::Debug>(x: &Result<T, TransferError>) {
		match x {
			Err(TransferError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => (),
			_ => panic!("Expected UnexpectedEof, got {:?}", x),
		}
	}

	/// Tests the get_content_length function.
	#[test]
	fn test_get_content_length() {
		assert_eq!(
			get_content_length(&[header("content-length", b"1234")]).unwrap(),
			Some(1234)
		);
		assert_eq!(
			get_content_length(&[header("something-else", b"1234")]).unwrap(),
			None
		);
		for content_length in &[&b"-10"[..], &b"abcd"[..], &b"36893488147419103232"[..]] {
			assert!(matches!(
				get_content_length(&[header("Content-Length", content_length)]),
				Err(InvalidData::BadContentLength(BadContentLength::NotU64(_)))
			));
		}
		assert!(matches!(
			get_content_length(&[header("content-length", b"\xFFabcd")]),
			Err(InvalidData::BadContentLength(BadContentLength::NotUtf8(_)))
		));
		assert_eq!(
			get_content_length(&[
				header("content-length", b"1234"),
				header("content-length", b"1235"),
			]),
			Err(InvalidData::MultipleContentLengths)
		);
	}

	/// Tests the headers_length function.
	#[test]
	fn test_headers_length() {
		assert_eq!(headers_length(b"H:V\r\nH:V\r\n\r\n"), Some(12));
		assert_eq!(headers_length(b"H:V\nH:V\n\n"), Some(9));
		assert_eq!(headers_length(b"H:V\r\nH:V\n\n"), Some(10));
		assert_eq!(headers_length(b"H:V\nH:V\r\n\n"), Some(10));
		assert_eq!(headers_length(b"H:V\nH:V\n\r\n"), Some(10));
		assert_eq!(headers_length(b"H:V\nH:V\r\n\r\n"), Some(11));
		assert_eq!(headers_length(b"H:V\nH:V\n"), None);
		assert_eq!(headers_length(b"H:V\nH:V"), None);
		assert_eq!(headers_length(b""), None);
		assert_eq!(headers_length(b"H:V\nH:V\n\r"), None);
	}

	/// Tests the is_chunked function.
	#[test]
	fn test_is_chunked() {
		assert_eq!(is_chunked(&[header("Transfer-Encoding", b"chunked")]), Ok(true));
		assert_eq!(is_chunked(&[header("something-else", b"1234")]), Ok(false));
		assert_eq!(
			is_chunked(&[header("transfer-encoding", b"gzip")]),
			Err(InvalidData::NotChunked)
		);
		assert_eq!(
			is_chunked(&[
				header("transfer-encoding", b"chunked"),
				header("transfer-encoding", b"chunked"),
			]),
			Err(InvalidData::MultipleTransferEncodings)
		);
	}

	/// Tests the parse_status_code function.
	#[test]
	fn test_parse_status_code() {
		assert_eq!(parse_status_code(b"HTTP/1.1 200 OK\r\nH: V\r\n\r\n"), Ok(200));
		assert_eq!(parse_status_code(b"HTTP/1.1 404 Not Found\r\n\r\n"), Ok(404));
		assert_eq!(
			parse_status_code(b"ABCD/1.1 200 OK\r\n\r\n"),
			Err(parse_error(httparse::Error::Version))
		);
	}

	/// Tests receiving a full set of headers, leaving the body unread.
	#[test]
	fn test_read_head_basic() {
		let mut data = &b"HTTP/1.1 200 OK\r\nH1: V1\r\nContent-Length: 5\r\n\r\nhello"[..];
		let head = read_head(&mut data, false).unwrap();
		assert_eq!(head.status, 200);
		assert_eq!(head.reason, "OK");
		assert_eq!(
			head.headers,
			[
				("H1".to_owned(), "V1".to_owned()),
				("Content-Length".to_owned(), "5".to_owned()),
			]
		);
		assert_eq!(head.framing, Framing::Fixed(5));
		assert_eq!(data, b"hello");
	}

	/// Tests that a 100 Continue status is skipped.
	#[test]
	fn test_read_head_100_continue() {
		let mut data =
			&b"HTTP/1.1 100 Continue\r\nH0: V0\r\n\r\nHTTP/1.1 201 Created\r\nH1: V1\r\n\r\n"[..];
		let head = read_head(&mut data, false).unwrap();
		assert_eq!(head.status, 201);
		assert_eq!(head.headers, [("H1".to_owned(), "V1".to_owned())]);
		assert_eq!(head.framing, Framing::Eof);
	}

	/// Tests body framing decisions.
	#[test]
	fn test_read_head_framing() {
		let mut data = &b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n"[..];
		assert_eq!(read_head(&mut data, false).unwrap().framing, Framing::Chunked);
		let mut data = &b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n"[..];
		assert_eq!(read_head(&mut data, true).unwrap().framing, Framing::Empty);
		let mut data = &b"HTTP/1.1 304 Not Modified\r\n\r\n"[..];
		assert_eq!(read_head(&mut data, false).unwrap().framing, Framing::Empty);
		let mut data =
			&b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\nTransfer-Encoding: chunked\r\n\r\n"[..];
		expect_invalid(
			&InvalidData::ContentLengthAndTransferEncoding,
			&read_head(&mut data, false),
		);
	}

	/// Tests a truncated header block.
	#[test]
	fn test_read_head_truncated() {
		let mut data = &b"HTTP/1.1 200 OK\r\nH1: V1\r\nH2: V2\r\n"[..];
		expect_eof(&read_head(&mut data, false));
	}

	/// Tests a header block that exceeds the limit.
	#[test]
	fn test_read_head_too_long() {
		let mut raw = b"HTTP/1.1 200 OK\r\n".to_vec();
		while raw.len() <= MAX_HEAD_LEN {
			raw.extend_from_slice(b"X-Padding: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n");
		}
		raw.extend_from_slice(b"\r\n");
		let mut data = std::io::BufReader::new(&raw[..]);
		expect_invalid(&InvalidData::ResponseHeadersTooLong, &read_head(&mut data, false));
	}

	/// Tests rejection of Switching Protocols and of bad framing headers.
	#[test]
	fn test_read_head_rejections() {
		let mut data = &b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: x\r\n\r\n"[..];
		expect_invalid(&InvalidData::SwitchingProtocols, &read_head(&mut data, false));
		let mut data = &b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip\r\n\r\n"[..];
		expect_invalid(&InvalidData::NotChunked, &read_head(&mut data, false));
		let mut data = &b"HTTP/1.1 200 OK\r\nContent-Length: -1\r\n\r\n"[..];
		assert!(matches!(
			read_head(&mut data, false),
			Err(TransferError::InvalidData(InvalidData::BadContentLength(
				BadContentLength::NotU64(_)
			)))
		));
	}

	/// Tests decoding chunked bodies, including chunk extensions.
	#[test]
	fn test_chunked() {
		let mut input = &b"006\r\nHello \r\n006\r\nWorld!\r\n0\r\n\r\n"[..];
		let mut rx = BodyReader::new(&mut input, Framing::Chunked);
		assert_eq!(read_all(&mut rx).unwrap(), b"Hello World!");
		assert_eq!(rx.read(&mut [0_u8; 1]).unwrap(), 0);
		assert!(input.is_empty());

		let mut input = &b"006; cext-name=cext-value\r\nHello \r\n006; cext-name=\"quoted\twith tabs\"\r\nWorld!\r\n0\r\n\r\n"[..];
		assert_eq!(
			read_all(&mut BodyReader::new(&mut input, Framing::Chunked)).unwrap(),
			b"Hello World!"
		);
	}

	/// Tests malformed chunk framing.
	#[test]
	fn test_chunked_errors() {
		let cases: [(&[u8], BadChunkHeader); 4] = [
			(b"xyz\r\n", BadChunkHeader::SizeNotHex),
			(b"10000000000000000\r\n", BadChunkHeader::SizeNotU64),
			(b"1;\x01\r\n", BadChunkHeader::ExtChar),
			(b"1\r\nAB\r\n", BadChunkHeader::Newline),
		];
		for (input, expected) in cases {
			let mut input = input;
			expect_invalid(
				&InvalidData::BadChunkHeader(expected),
				&read_all(&mut BodyReader::new(&mut input, Framing::Chunked)),
			);
		}
	}

	/// Tests fixed-length bodies, including one cut short.
	#[test]
	fn test_fixed() {
		let mut input = &b"Hello World!trailing"[..];
		assert_eq!(
			read_all(&mut BodyReader::new(&mut input, Framing::Fixed(12))).unwrap(),
			b"Hello World!"
		);
		assert_eq!(input, b"trailing");

		let mut input = &b"short"[..];
		expect_eof(&read_all(&mut BodyReader::new(&mut input, Framing::Fixed(12))));

		let mut input = &b"ignored"[..];
		assert!(read_all(&mut BodyReader::new(&mut input, Framing::Empty))
			.unwrap()
			.is_empty());
	}

	/// Tests writing a request head and a chunked body.
	#[test]
	fn test_write() {
		let mut out = Vec::new();
		write_head(
			&mut out,
			"POST",
			"/a?b=c",
			&[
				("Host".to_owned(), "example.com".to_owned()),
				("Transfer-Encoding".to_owned(), "chunked".to_owned()),
			],
		)
		.unwrap();
		write_chunk(&mut out, b"Hello World!").unwrap();
		write_chunk(&mut out, b"").unwrap();
		finish_chunks(&mut out).unwrap();
		assert_eq!(
			out,
			&b"POST /a?b=c HTTP/1.1\r\nHost: example.com\r\nTransfer-Encoding: chunked\r\n\r\nC\r\nHello World!\r\n0\r\n\r\n"[..]
		);
	}

	/// Tests origin-form request targets.
	#[test]
	fn test_request_target() {
		let url = Url::parse("http://example.com:8080/a/b?x=1#frag").unwrap();
		assert_eq!(request_target(&url), "/a/b?x=1");
		let url = Url::parse("http://example.com").unwrap();
		assert_eq!(request_target(&url), "/");
	}
}
