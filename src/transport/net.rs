//! A plain HTTP/1.1 transport over blocking TCP sockets.
//!
//! Every task runs on its own thread and opens its own connection, which it closes after one
//! response. Suspension takes effect between socket reads and writes. Cancellation also shuts the
//! socket down so that a blocked read returns at once.
//!
//! There is no TLS support: `https` tasks fail with [`TransferError::UnsupportedScheme`]. Proxy,
//! TLS version, pipelining and connection limit settings are ignored. Outlasting sessions are
//! served in-process, so no background events are ever delivered.

mod wire;

use super::{
	Challenge, ChallengeResponse, Delegate, OutgoingRequest, ResponseHead, TaskId, TaskKind,
	Transport, TransportFactory, UploadBody,
};
use crate::config::{Configuration, CookieAcceptPolicy};
use crate::error::{InvalidData, TransferError};
use crate::request::Method;
use crate::store::{AuthMethod, Cookie, Credential, ProtectionSpace};
use base64::Engine as _;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use url::Url;

/// The size of the buffer used to move body bytes.
const BUFFER_LEN: usize = 16 * 1024;

/// Opens a [`NetTransport`] for each session.
#[derive(Clone, Copy, Debug, Default)]
pub struct NetTransportFactory;

impl TransportFactory for NetTransportFactory {
	fn open(
		&self,
		config: &Arc<Configuration>,
		identifier: Option<&str>,
		delegate: Weak<dyn Delegate>,
	) -> Arc<dyn Transport> {
		if let Some(identifier) = identifier {
			tracing::debug!(identifier, "Serving outlasting session in-process");
		}
		Arc::new(NetTransport {
			shared: Arc::new(Shared {
				config: Arc::clone(config),
				delegate,
				tasks: Mutex::new(Tasks::default()),
			}),
		})
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RunState {
	Suspended,
	Running,
	Cancelled,
}

/// The run state of one task, shared between the task thread and callers.
struct Control {
	state: Mutex<RunState>,
	cond: Condvar,
	socket: Mutex<Option<TcpStream>>,
}

impl Control {
	fn new() -> Self {
		Self {
			state: Mutex::new(RunState::Suspended),
			cond: Condvar::new(),
			socket: Mutex::new(None),
		}
	}

	/// Blocks while suspended, failing if cancelled.
	fn checkpoint(&self) -> Result<(), TransferError> {
		let mut state = self.state.lock();
		loop {
			match *state {
				RunState::Running => return Ok(()),
				RunState::Cancelled => return Err(TransferError::Cancelled),
				RunState::Suspended => self.cond.wait(&mut state),
			}
		}
	}

	/// Moves to `new` unless cancelled. Returns whether the state changed.
	fn set(&self, new: RunState) -> bool {
		let mut state = self.state.lock();
		if *state == RunState::Cancelled {
			return false;
		}
		*state = new;
		let _ = self.cond.notify_all();
		true
	}

	fn is_cancelled(&self) -> bool {
		*self.state.lock() == RunState::Cancelled
	}

	fn cancel(&self) {
		{
			let mut state = self.state.lock();
			*state = RunState::Cancelled;
			let _ = self.cond.notify_all();
		}
		if let Some(socket) = self.socket.lock().as_ref() {
			let _ = socket.shutdown(Shutdown::Both);
		}
	}

	/// Registers the task’s current connection so that cancellation can interrupt it.
	fn attach(&self, socket: &TcpStream) -> std::io::Result<()> {
		*self.socket.lock() = Some(socket.try_clone()?);
		if self.is_cancelled() {
			let _ = socket.shutdown(Shutdown::Both);
		}
		Ok(())
	}
}

struct Task {
	control: Arc<Control>,

	/// The request and task kind, until the task thread is started.
	pending: Option<(OutgoingRequest, TaskKind)>,
}

#[derive(Default)]
struct Tasks {
	next: TaskId,
	map: HashMap<TaskId, Task>,
	invalidating: bool,
	invalidated: bool,
}

impl Tasks {
	fn take_invalidation(&mut self) -> bool {
		if self.invalidating && self.map.is_empty() && !self.invalidated {
			self.invalidated = true;
			true
		} else {
			false
		}
	}
}

struct Shared {
	config: Arc<Configuration>,
	delegate: Weak<dyn Delegate>,
	tasks: Mutex<Tasks>,
}

impl Shared {
	/// Delivers a task’s completion and forgets the task.
	fn finish(&self, task: TaskId, response: Option<&ResponseHead>, error: Option<TransferError>) {
		if let Some(delegate) = self.delegate.upgrade() {
			delegate.did_complete(task, response, error);
		}
		let invalidate = {
			let mut tasks = self.tasks.lock();
			let _ = tasks.map.remove(&task);
			tasks.take_invalidation()
		};
		if invalidate {
			self.invalidate();
		}
	}

	fn invalidate(&self) {
		tracing::debug!("Transport invalidated");
		if let Some(delegate) = self.delegate.upgrade() {
			delegate.did_become_invalid();
		}
	}

	/// The body of a task thread.
	fn run(&self, task: TaskId, control: &Control, request: OutgoingRequest, kind: TaskKind) {
		let outcome = match self.delegate.upgrade() {
			Some(delegate) => {
				// The connect and per-read timeout is the tighter of the request’s and the
				// configuration’s; the resource timeout bounds the whole task.
				let timeout = std::cmp::min(request.timeout, self.config.request_timeout());
				Worker {
					shared: self,
					delegate,
					task,
					control,
					timeout,
					deadline: Instant::now() + self.config.resource_timeout(),
				}
				.perform(request, kind)
			}
			None => Err(TransferError::Cancelled),
		};
		match outcome {
			Ok(response) => {
				tracing::trace!(task, status = response.status, "Task finished");
				self.finish(task, Some(&response), None);
			}
			Err(_) if control.is_cancelled() => {
				tracing::trace!(task, "Task cancelled");
				self.finish(task, None, Some(TransferError::Cancelled));
			}
			Err(e) => {
				tracing::debug!(task, error = %e, "Task failed");
				self.finish(task, None, Some(e));
			}
		}
	}
}

/// A transport that speaks HTTP/1.1 over [`TcpStream`], one thread and one connection per task.
pub struct NetTransport {
	shared: Arc<Shared>,
}

impl Transport for NetTransport {
	fn create_task(&self, request: OutgoingRequest, kind: TaskKind) -> std::io::Result<TaskId> {
		let mut tasks = self.shared.tasks.lock();
		if tasks.invalidating {
			return Err(std::io::Error::other("transport invalidated"));
		}
		tasks.next += 1;
		let id = tasks.next;
		let _ = tasks.map.insert(
			id,
			Task {
				control: Arc::new(Control::new()),
				pending: Some((request, kind)),
			},
		);
		Ok(id)
	}

	fn resume(&self, task: TaskId) {
		let (control, pending) = match self.shared.tasks.lock().map.get_mut(&task) {
			Some(t) => (Arc::clone(&t.control), t.pending.take()),
			None => return,
		};
		if !control.set(RunState::Running) {
			return;
		}
		if let Some((request, kind)) = pending {
			let shared = Arc::clone(&self.shared);
			let spawned = std::thread::Builder::new()
				.name(format!("huntaway-task-{task}"))
				.spawn(move || shared.run(task, &control, request, kind));
			if let Err(e) = spawned {
				tracing::warn!(task, error = %e, "Cannot start task thread");
				self.shared.finish(task, None, Some(e.into()));
			}
		}
	}

	fn suspend(&self, task: TaskId) {
		let control = self
			.shared
			.tasks
			.lock()
			.map
			.get(&task)
			.map(|t| Arc::clone(&t.control));
		if let Some(control) = control {
			let _ = control.set(RunState::Suspended);
		}
	}

	fn cancel(&self, task: TaskId) {
		let (control, unstarted) = match self.shared.tasks.lock().map.get_mut(&task) {
			Some(t) => (Arc::clone(&t.control), t.pending.take().is_some()),
			None => return,
		};
		control.cancel();
		if unstarted {
			self.shared.finish(task, None, Some(TransferError::Cancelled));
		}
	}

	fn finish_tasks_and_invalidate(&self) {
		let invalidate = {
			let mut tasks = self.shared.tasks.lock();
			tasks.invalidating = true;
			tasks.take_invalidation()
		};
		if invalidate {
			self.shared.invalidate();
		}
	}

	fn outstanding_tasks(&self) -> usize {
		self.shared.tasks.lock().map.len()
	}
}

impl std::fmt::Debug for NetTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
		let tasks = self.shared.tasks.lock();
		f.debug_struct("NetTransport")
			.field("outstanding", &tasks.map.len())
			.field("invalidating", &tasks.invalidating)
			.finish()
	}
}

/// Looks up a header value by case-insensitive name.
fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
	headers
		.iter()
		.find(|(n, _)| n.eq_ignore_ascii_case(name))
		.map(|(_, v)| v.as_str())
}

fn to_i64(n: usize) -> i64 {
	i64::try_from(n).unwrap_or(i64::MAX)
}

/// Returns the `Host` header value for `url`.
fn host_header(url: &Url) -> String {
	let host = url.host_str().unwrap_or_default();
	match url.port() {
		Some(port) => format!("{host}:{port}"),
		None => host.to_owned(),
	}
}

/// Returns where a redirect response points, if it is one that can be followed.
fn redirect_target(response: &ResponseHead) -> Result<Option<Url>, TransferError> {
	if !matches!(response.status, 301 | 302 | 303 | 307 | 308) {
		return Ok(None);
	}
	match header(&response.headers, "location") {
		Some(location) => response
			.url
			.join(location)
			.map(Some)
			.map_err(|_| InvalidData::BadLocation(location.to_owned()).into()),
		None => Ok(None),
	}
}

/// Extracts the protection space of a Basic challenge from a 401 response.
fn challenge_space(response: &ResponseHead) -> Option<ProtectionSpace> {
	let value = header(&response.headers, "www-authenticate")?.trim();
	let (scheme, params) = value.split_once(' ').unwrap_or((value, ""));
	let method = AuthMethod::from_scheme(scheme);
	if method != AuthMethod::Basic {
		return None;
	}
	let realm = params
		.split(',')
		.filter_map(|p| p.split_once('='))
		.find(|(k, _)| k.trim().eq_ignore_ascii_case("realm"))
		.map(|(_, v)| v.trim().trim_matches('"').to_owned());
	ProtectionSpace::for_url(&response.url, realm, method)
}

/// Performs one task on its thread.
struct Worker<'a> {
	shared: &'a Shared,
	delegate: Arc<dyn Delegate>,
	task: TaskId,
	control: &'a Control,
	timeout: Duration,
	deadline: Instant,
}

impl Worker<'_> {
	fn checkpoint(&self) -> Result<(), TransferError> {
		if Instant::now() >= self.deadline {
			return Err(TransferError::TimedOut);
		}
		self.control.checkpoint()
	}

	/// Runs the request to its final response, following redirects and answering challenges as
	/// the delegate decides.
	fn perform(&self, mut request: OutgoingRequest, kind: TaskKind) -> Result<ResponseHead, TransferError> {
		let download = kind == TaskKind::Download;
		let mut body = match kind {
			TaskKind::Upload(body) => Some(body),
			TaskKind::Fetch | TaskKind::Download => None,
		};
		let main_host = request.url.host_str().unwrap_or_default().to_ascii_lowercase();
		let mut credential: Option<Credential> = None;
		let mut failures = 0;
		loop {
			self.checkpoint()?;
			if request.url.scheme() != "http" {
				return Err(TransferError::UnsupportedScheme(request.url.scheme().to_owned()));
			}
			let stream = self.connect(&request.url)?;
			let mut reader = BufReader::new(stream.try_clone()?);
			let mut writer = BufWriter::new(stream);
			self.send(&mut writer, &request, body.as_ref(), credential.as_ref())?;
			drop(writer);

			self.checkpoint()?;
			let head = wire::read_head(&mut reader, request.method == Method::Head)?;
			let framing = head.framing;
			let response = ResponseHead {
				status: head.status,
				reason: head.reason,
				url: request.url.clone(),
				headers: head.headers,
			};
			tracing::trace!(task = self.task, status = response.status, url = %response.url, "Received response head");
			if request.handle_cookies {
				self.store_cookies(&response, &main_host);
			}

			if let Some(next) = redirect_target(&response)? {
				if self.delegate.will_redirect(self.task, &response, &next) {
					if response.status == 303
						|| (matches!(response.status, 301 | 302) && request.method == Method::Post)
					{
						request.method = Method::Get;
						body = None;
					}
					request.url = next;
					credential = None;
					failures = 0;
					continue;
				}
			} else if response.status == 401 {
				if let Some(space) = challenge_space(&response) {
					let challenge = Challenge {
						space,
						previous_failure_count: failures,
					};
					if let ChallengeResponse::UseCredential(c) =
						self.delegate.did_receive_challenge(self.task, &challenge)
					{
						credential = Some(c);
						failures += 1;
						continue;
					}
				}
			}

			self.receive(wire::BodyReader::new(reader, framing), framing.expected(), download)?;
			return Ok(response);
		}
	}

	fn connect(&self, url: &Url) -> Result<TcpStream, TransferError> {
		let mut last = None;
		for addr in url.socket_addrs(|| None)? {
			match TcpStream::connect_timeout(&addr, self.timeout) {
				Ok(stream) => {
					stream.set_read_timeout(Some(self.timeout))?;
					stream.set_write_timeout(Some(self.timeout))?;
					self.control.attach(&stream)?;
					return Ok(stream);
				}
				Err(e) => last = Some(e),
			}
		}
		Err(last
			.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "host has no addresses"))
			.into())
	}

	/// Writes the request head and body.
	fn send(
		&self,
		writer: &mut impl Write,
		request: &OutgoingRequest,
		body: Option<&UploadBody>,
		credential: Option<&Credential>,
	) -> Result<(), TransferError> {
		let config = &self.shared.config;
		let mut headers = vec![("Host".to_owned(), host_header(&request.url))];
		headers.extend(
			request
				.headers
				.iter()
				.filter(|(n, _)| {
					!n.eq_ignore_ascii_case("content-length")
						&& !n.eq_ignore_ascii_case("transfer-encoding")
				})
				.cloned(),
		);
		if request.handle_cookies && config.should_set_cookies() {
			let cookies: Vec<String> = config
				.cookies()
				.cookies_for(&request.url)
				.into_iter()
				.map(|c| format!("{}={}", c.name, c.value))
				.collect();
			if !cookies.is_empty() {
				headers.push(("Cookie".to_owned(), cookies.join("; ")));
			}
		}
		if let Some(c) = credential {
			let token = base64::engine::general_purpose::STANDARD
				.encode(format!("{}:{}", c.user(), c.password()));
			headers.push(("Authorization".to_owned(), format!("Basic {token}")));
		}

		// A negative expected length means the body is sent chunked.
		let source: Option<(Box<dyn Read + Send>, i64)> = match body {
			None => None,
			Some(UploadBody::Bytes(data)) => {
				headers.push(("Content-Length".to_owned(), data.len().to_string()));
				let reader: Box<dyn Read + Send> = Box::new(std::io::Cursor::new(data.clone()));
				Some((reader, to_i64(data.len())))
			}
			Some(UploadBody::File(path)) => {
				let file = std::fs::File::open(path)?;
				let len = file.metadata()?.len();
				headers.push(("Content-Length".to_owned(), len.to_string()));
				let reader: Box<dyn Read + Send> = Box::new(file.take(len));
				Some((reader, i64::try_from(len).unwrap_or(i64::MAX)))
			}
			Some(UploadBody::Streamed) => {
				headers.push(("Transfer-Encoding".to_owned(), "chunked".to_owned()));
				let stream = self.delegate.need_new_body_stream(self.task).unwrap_or_else(|| {
					tracing::warn!(task = self.task, "No body stream supplied; sending empty body");
					Box::new(std::io::empty())
				});
				Some((stream, -1))
			}
		};
		headers.push(("Connection".to_owned(), "close".to_owned()));

		wire::write_head(
			writer,
			request.method.as_str(),
			wire::request_target(&request.url),
			&headers,
		)?;
		if let Some((mut source, expected)) = source {
			let chunked = expected < 0;
			let mut buffer = vec![0_u8; BUFFER_LEN];
			let mut total = 0_i64;
			loop {
				self.checkpoint()?;
				let n = source.read(&mut buffer)?;
				if n == 0 {
					break;
				}
				if chunked {
					wire::write_chunk(writer, &buffer[..n])?;
				} else {
					writer.write_all(&buffer[..n])?;
				}
				total += to_i64(n);
				self.delegate.did_send_body_data(self.task, to_i64(n), total, expected);
			}
			if chunked {
				wire::finish_chunks(writer)?;
			}
		}
		writer.flush()?;
		Ok(())
	}

	/// Stores the cookies a response sets, as the accept policy allows.
	fn store_cookies(&self, response: &ResponseHead, main_host: &str) {
		let config = &self.shared.config;
		let accept = config.cookie_accept();
		if !config.should_set_cookies() || accept == CookieAcceptPolicy::Never {
			return;
		}
		let cookies: Vec<Cookie> = response
			.headers
			.iter()
			.filter(|(n, _)| n.eq_ignore_ascii_case("set-cookie"))
			.filter_map(|(_, v)| Cookie::parse_set_cookie(v, &response.url))
			.filter(|c| {
				accept == CookieAcceptPolicy::Always
					|| c.domain == main_host
					|| main_host.ends_with(&format!(".{}", c.domain))
			})
			.collect();
		if !cookies.is_empty() {
			tracing::trace!(task = self.task, count = cookies.len(), "Storing cookies");
			config.cookies().set_cookies(cookies);
		}
	}

	/// Reads the response body, handing it to the delegate or writing it to a download file.
	fn receive(
		&self,
		mut body: wire::BodyReader<impl Read>,
		expected: i64,
		download: bool,
	) -> Result<(), TransferError> {
		let mut file = if download {
			Some(
				tempfile::Builder::new()
					.prefix("huntaway-")
					.tempfile_in(self.shared.config.download_dir())?,
			)
		} else {
			None
		};
		let mut buffer = vec![0_u8; BUFFER_LEN];
		let mut total = 0_i64;
		loop {
			self.checkpoint()?;
			let n = body.read(&mut buffer)?;
			if n == 0 {
				break;
			}
			match &mut file {
				Some(file) => file.write_all(&buffer[..n])?,
				None => self.delegate.did_receive_data(self.task, &buffer[..n]),
			}
			total += to_i64(n);
			self.delegate.did_receive_progress(self.task, to_i64(n), total, expected);
		}
		if let Some(file) = file {
			let (_, path) = file.keep().map_err(|e| e.error)?;
			self.delegate.did_finish_downloading(self.task, &path);
		}
		Ok(())
	}
}
