use crate::client::Registry;
use crate::config::Configuration;
use crate::dispatch::Dispatcher;
use crate::error::{SendError, TransferError};
use crate::exchange::Exchange;
use crate::progress::{Direction, Progress};
use crate::request::{InFlight, Method, Payload, Request};
use crate::store::Cookie;
use crate::transport::{
	Challenge, ChallengeResponse, Delegate, OutgoingRequest, ResponseHead, TaskId, TaskKind,
	Transport, TransportFactory, UploadBody,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use url::Url;

type EventsFinishedHandler = Box<dyn FnOnce() + Send + 'static>;
type DownloadFinishedHandler = Box<dyn FnOnce(PathBuf) + Send + 'static>;

/// The task map and the flags that decide retirement, all guarded by one lock.
#[derive(Default)]
struct Tasks {
	exchanges: HashMap<TaskId, Exchange>,
	decaying: bool,
	awaiting_wake: bool,
	retired: bool,
}

/// Handlers for events that arrive for an outlasting session with no local exchange.
#[derive(Default)]
struct WakeHandlers {
	events_finished: Option<EventsFinishedHandler>,
	download_finished: Option<DownloadFinishedHandler>,
}

/// One transport plus the exchanges multiplexed over it.
///
/// The session is the transport’s delegate: it routes every task event to the exchange that owns
/// the task. The task map lock is held only for map access and retirement decisions, never while
/// calling into the transport or running hooks.
pub(crate) struct Session {
	identifier: Option<String>,
	config: Arc<Configuration>,
	transport: Arc<dyn Transport>,
	dispatcher: Dispatcher,
	owner: Weak<Registry>,
	tasks: Mutex<Tasks>,
	wake: Mutex<WakeHandlers>,
}

impl Session {
	pub fn new(
		factory: &dyn TransportFactory,
		config: Arc<Configuration>,
		identifier: Option<String>,
		dispatcher: Dispatcher,
		owner: Weak<Registry>,
	) -> Arc<Self> {
		let session = Arc::new_cyclic(|weak: &Weak<Self>| {
			let delegate: Weak<dyn Delegate> = weak.clone();
			let transport = factory.open(&config, identifier.as_deref(), delegate);
			Self {
				identifier,
				config,
				transport,
				dispatcher,
				owner,
				tasks: Mutex::new(Tasks::default()),
				wake: Mutex::new(WakeHandlers::default()),
			}
		});
		tracing::debug!(identifier = ?session.identifier, "Opened session");
		session
	}

	pub fn identifier(&self) -> Option<&str> {
		self.identifier.as_deref()
	}

	pub fn transport(&self) -> &Arc<dyn Transport> {
		&self.transport
	}

	pub fn dispatcher(&self) -> &Dispatcher {
		&self.dispatcher
	}

	/// Creates a task for the request and the exchange paired with it.
	pub fn send(self: &Arc<Self>, request: Request) -> Result<Exchange, SendError> {
		if self.is_closed() {
			return Err(SendError::SessionRetired);
		}
		let url = request.url();
		if !matches!(url.scheme(), "http" | "https") {
			return Err(SendError::UnsupportedScheme(url.scheme().to_owned()));
		}
		let kind = task_kind(&request)?;
		if !request.cookies().is_empty() {
			let cookies = request
				.cookies()
				.iter()
				.filter_map(|(name, value)| Cookie::for_url(name.as_str(), value.as_str(), url))
				.collect();
			self.config.cookies().set_cookies(cookies);
		}
		let outgoing = self.outgoing(&request);
		let task = self
			.transport
			.create_task(outgoing, kind)
			.map_err(SendError::Transport)?;
		let exchange = Exchange::new(task, Arc::new(InFlight::new(request)), Arc::clone(self));
		{
			let mut tasks = self.tasks.lock();
			if !(tasks.retired || tasks.decaying) {
				let _ = tasks.exchanges.insert(task, exchange.clone());
				tracing::debug!(
					task,
					method = %exchange.request().method(),
					url = %exchange.request().url(),
					"Created exchange"
				);
				return Ok(exchange);
			}
		}
		// Retired while the task was being created.
		self.transport.cancel(task);
		Err(SendError::SessionRetired)
	}

	fn is_closed(&self) -> bool {
		let tasks = self.tasks.lock();
		tasks.retired || tasks.decaying
	}

	/// Merges the configuration’s additional headers with the request’s own.
	fn outgoing(&self, request: &Request) -> OutgoingRequest {
		let mut headers: Vec<(String, String)> = self.config.additional_headers().to_vec();
		for (name, value) in request.headers() {
			match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
				Some(existing) => existing.1.clone_from(value),
				None => headers.push((name.clone(), value.clone())),
			}
		}
		OutgoingRequest {
			method: request.method(),
			url: request.url().clone(),
			headers,
			timeout: request.timeout(),
			cache_policy: request.cache_policy(),
			allow_cellular: request.allow_cellular() && self.config.allow_cellular(),
			service_type: request.service_type(),
			handle_cookies: request.handle_cookies(),
		}
	}

	/// Deregisters an exchange, retiring the session if it was the last one out.
	pub fn remove_exchange(&self, exchange: &Exchange) {
		let (removed, retire) = {
			let mut tasks = self.tasks.lock();
			let removed = tasks.exchanges.remove(&exchange.id()).is_some();
			let retire = removed
				&& tasks.exchanges.is_empty()
				&& !tasks.retired
				&& !tasks.awaiting_wake
				&& (exchange.request().outlast() || tasks.decaying);
			if retire {
				tasks.retired = true;
			}
			(removed, retire)
		};
		if !removed {
			return;
		}
		tracing::debug!(task = exchange.id(), "Closed exchange");
		if !exchange.is_ticked() {
			self.transport.cancel(exchange.id());
		}
		if retire {
			self.retire();
		}
	}

	/// Stops accepting exchanges and retires once the existing ones are closed.
	pub fn decay(&self) {
		let retire = {
			let mut tasks = self.tasks.lock();
			tasks.decaying = true;
			let retire = tasks.exchanges.is_empty() && !tasks.retired && !tasks.awaiting_wake;
			if retire {
				tasks.retired = true;
			}
			retire
		};
		tracing::debug!(identifier = ?self.identifier, "Session decaying");
		if retire {
			self.retire();
		}
	}

	/// Retires the session regardless of what it still holds.
	pub fn shutdown(&self) {
		let retire = {
			let mut tasks = self.tasks.lock();
			!std::mem::replace(&mut tasks.retired, true)
		};
		if retire {
			self.retire();
		}
	}

	fn retire(&self) {
		tracing::info!(identifier = ?self.identifier, "Retiring session");
		self.transport.finish_tasks_and_invalidate();
	}

	/// Returns whether the session still has exchanges or unfinished tasks.
	pub fn has_pending(&self) -> bool {
		let mapped = !self.tasks.lock().exchanges.is_empty();
		mapped || self.transport.outstanding_tasks() != 0
	}

	/// Marks a session recreated for a background wake-up.
	///
	/// The session decays but does not retire before the transport has delivered its pending
	/// background events.
	pub fn await_background_events(
		&self,
		on_events_finished: EventsFinishedHandler,
		on_download_finished: DownloadFinishedHandler,
	) {
		{
			let mut wake = self.wake.lock();
			wake.events_finished = Some(on_events_finished);
			wake.download_finished = Some(on_download_finished);
		}
		let mut tasks = self.tasks.lock();
		tasks.decaying = true;
		tasks.awaiting_wake = true;
	}

	/// Replaces the handler run once background events have been delivered.
	pub fn set_events_finished_handler(&self, handler: EventsFinishedHandler) {
		self.wake.lock().events_finished = Some(handler);
	}

	fn lookup(&self, task: TaskId) -> Option<Exchange> {
		let exchange = self.tasks.lock().exchanges.get(&task).cloned();
		if exchange.is_none() {
			tracing::trace!(task, "Dropping event for unknown task");
		}
		exchange
	}

	fn report_progress(&self, task: TaskId, progress: Progress) {
		if let Some(hook) = self.lookup(task).and_then(|e| e.process_hook()) {
			self.dispatcher.spawn(move || hook(progress));
		}
	}

	/// Collects the stored cookies that apply to `url`, by name.
	fn cookies_for(&self, url: &Url) -> HashMap<String, String> {
		self.config
			.cookies()
			.cookies_for(url)
			.into_iter()
			.map(|c| (c.name, c.value))
			.collect()
	}
}

/// Chooses the task variant for a request, validating its payload.
fn task_kind(request: &Request) -> Result<TaskKind, SendError> {
	let method = request.method();
	match method {
		Method::Get | Method::Head => return Ok(TaskKind::Fetch),
		Method::Download => return Ok(TaskKind::Download),
		Method::Delete if request.payload().is_none() && !request.stream() => {
			return Ok(TaskKind::Fetch)
		}
		Method::Delete | Method::Post | Method::Put | Method::Patch => (),
	}
	if let Some(Payload::File(path)) = request.payload() {
		if !path.is_file() {
			return Err(SendError::MissingFile(path.clone()));
		}
	}
	if request.stream() {
		return Ok(TaskKind::Upload(UploadBody::Streamed));
	}
	match request.payload() {
		Some(Payload::Bytes(data)) => Ok(TaskKind::Upload(UploadBody::Bytes(data.clone()))),
		Some(Payload::File(path)) => Ok(TaskKind::Upload(UploadBody::File(path.clone()))),
		None => Err(SendError::MissingPayload(method)),
	}
}

impl Delegate for Session {
	fn did_send_body_data(&self, task: TaskId, sent: i64, total_sent: i64, expected: i64) {
		self.report_progress(task, Progress::new(Direction::Sending, expected, total_sent, sent));
	}

	fn did_receive_data(&self, task: TaskId, data: &[u8]) {
		if let Some(exchange) = self.lookup(task) {
			exchange.append_body(data);
		}
	}

	fn did_receive_progress(&self, task: TaskId, received: i64, total_received: i64, expected: i64) {
		self.report_progress(
			task,
			Progress::new(Direction::Receiving, expected, total_received, received),
		);
	}

	fn did_resume_at_offset(&self, task: TaskId, offset: i64, expected: i64) {
		self.report_progress(task, Progress::new(Direction::Receiving, expected, offset, 0));
	}

	fn did_receive_challenge(&self, task: TaskId, challenge: &Challenge) -> ChallengeResponse {
		let exchange = match self.lookup(task) {
			Some(e) => e,
			None => return ChallengeResponse::PerformDefaultHandling,
		};
		let request = exchange.in_flight();
		if let Some(credential) = request.take_basic() {
			tracing::trace!(task, "Answering challenge with request basic credential");
			return ChallengeResponse::UseCredential(credential);
		}
		if let Some(credential) = request.take_digest() {
			tracing::trace!(task, "Answering challenge with request digest credential");
			return ChallengeResponse::UseCredential(credential);
		}
		let candidates = self.config.credentials().candidates(&challenge.space);
		match exchange.next_credential(candidates, challenge.previous_failure_count) {
			Some(credential) => {
				tracing::trace!(task, user = credential.user(), "Answering challenge from store");
				ChallengeResponse::UseCredential(credential)
			}
			None => {
				tracing::trace!(task, "No untried credentials; default handling");
				ChallengeResponse::PerformDefaultHandling
			}
		}
	}

	fn will_redirect(&self, task: TaskId, response: &ResponseHead, new_url: &Url) -> bool {
		let exchange = match self.lookup(task) {
			Some(e) => e,
			None => return true,
		};
		if !exchange.in_flight().try_redirect() {
			tracing::trace!(task, status = response.status, "Refusing redirect");
			return false;
		}
		tracing::trace!(task, to = %new_url, "Following redirect");
		exchange.record_redirect(new_url);
		true
	}

	fn need_new_body_stream(&self, task: TaskId) -> Option<Box<dyn Read + Send>> {
		let exchange = self.lookup(task)?;
		match exchange.request().payload()? {
			Payload::Bytes(data) => Some(Box::new(std::io::Cursor::new(data.clone()))),
			Payload::File(path) => match std::fs::File::open(path) {
				Ok(file) => Some(Box::new(file)),
				Err(e) => {
					tracing::warn!(task, path = %path.display(), error = %e, "Cannot reopen upload body");
					None
				}
			},
		}
	}

	fn did_finish_downloading(&self, task: TaskId, location: &Path) {
		let path = location.to_owned();
		if let Some(exchange) = self.lookup(task) {
			if let Some(hook) = exchange.set_downloaded(path.clone()) {
				self.dispatcher.spawn(move || hook(path));
			}
			return;
		}
		let handler = self.wake.lock().download_finished.take();
		if let Some(handler) = handler {
			tracing::debug!(task, "Handing download of woken session to wake handler");
			self.dispatcher.spawn(move || handler(path));
		}
	}

	fn did_complete(&self, task: TaskId, response: Option<&ResponseHead>, error: Option<TransferError>) {
		let exchange = match self.lookup(task) {
			Some(e) => e,
			None => return,
		};
		let cookies = if exchange.request().handle_cookies() {
			let url = response.map_or_else(|| exchange.request().url(), |r| &r.url);
			self.cookies_for(url)
		} else {
			HashMap::new()
		};
		tracing::trace!(task, status = ?response.map(|r| r.status), error = ?error, "Task completed");
		if let Some(hook) = exchange.complete(response, cookies, error.clone()) {
			let target = exchange.clone();
			self.dispatcher.spawn(move || hook(&target, error.as_ref()));
		}
	}

	fn did_finish_events_for_background(&self) {
		let handler = self.wake.lock().events_finished.take();
		if let Some(handler) = handler {
			self.dispatcher.spawn(handler);
		}
		let retire = {
			let mut tasks = self.tasks.lock();
			tasks.awaiting_wake = false;
			let retire = tasks.decaying && tasks.exchanges.is_empty() && !tasks.retired;
			if retire {
				tasks.retired = true;
			}
			retire
		};
		if retire {
			self.retire();
		}
	}

	fn did_become_invalid(&self) {
		tracing::info!(identifier = ?self.identifier, "Session invalidated");
		self.tasks.lock().retired = true;
		if let Some(owner) = self.owner.upgrade() {
			owner.session_invalidated(self);
		}
	}
}
