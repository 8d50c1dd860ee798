use crate::error::TransferError;
use crate::progress::Progress;
use crate::request::{InFlight, Request};
use crate::session::Session;
use crate::store::Credential;
use crate::transport::{ResponseHead, TaskId};
use futures_core::future::FusedFuture;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};
use url::Url;

type BeginHook = Box<dyn FnOnce() + Send + 'static>;
pub(crate) type ProcessHook = Arc<dyn Fn(Progress) + Send + Sync + 'static>;
pub(crate) type CompleteHook = Box<dyn FnOnce(&Exchange, Option<&TransferError>) + Send + 'static>;
pub(crate) type DownloadHook = Box<dyn FnOnce(PathBuf) + Send + 'static>;

/// Everything the event threads write and the caller reads.
#[derive(Default)]
struct State {
	completed: bool,
	status: u16,
	reason: Option<String>,
	headers: HashMap<String, String>,
	cookies: HashMap<String, String>,
	body: Vec<u8>,
	error: Option<TransferError>,
	response_url: Option<Url>,
	redirect_history: Option<Vec<Url>>,
	downloaded: Option<PathBuf>,
	tried_usernames: HashSet<String>,
	on_begin: Option<BeginHook>,
	on_process: Option<ProcessHook>,
	on_complete: Option<CompleteHook>,
	on_download: Option<DownloadHook>,
	wakers: Vec<Waker>,
}

struct Shared {
	task: TaskId,
	request: Arc<InFlight>,
	session: Arc<Session>,
	ticked: AtomicBool,
	state: Mutex<State>,
	cond: Condvar,
}

/// One HTTP request paired with its in-flight or completed response.
///
/// An `Exchange` is returned by [`Client::send`](crate::Client::send) before any network traffic
/// happens. Register hooks, then start the transfer with [`tick`](Self::tick) (or one of its
/// variants). After that, the response can be observed in three ways:
/// * by calling a blocking accessor such as [`status_code`](Self::status_code), which waits for
///   completion;
/// * by awaiting [`completion`](Self::completion);
/// * through the completion hook, which runs on the client’s hook threads.
///
/// Every accessor returns its zero value immediately if the exchange was never ticked.
///
/// Handles are cheap to clone and may be used from any thread. Every exchange must be
/// [`close`](Self::close)d once the caller is done with it; a session cannot retire while it
/// still holds exchanges.
#[derive(Clone)]
pub struct Exchange {
	shared: Arc<Shared>,
}

impl Exchange {
	pub(crate) fn new(task: TaskId, request: Arc<InFlight>, session: Arc<Session>) -> Self {
		Self {
			shared: Arc::new(Shared {
				task,
				request,
				session,
				ticked: AtomicBool::new(false),
				state: Mutex::new(State::default()),
				cond: Condvar::new(),
			}),
		}
	}

	/// Returns the transport task identifier, unique within the owning session.
	pub fn id(&self) -> TaskId {
		self.shared.task
	}

	/// Returns the request this exchange was created from.
	pub fn request(&self) -> &Request {
		self.shared.request.request()
	}

	/// Returns the number of redirects followed so far.
	pub fn redirect_count(&self) -> usize {
		self.shared.request.redirect_count()
	}

	/// Returns whether the transfer has been started.
	pub fn is_ticked(&self) -> bool {
		self.shared.ticked.load(Ordering::Acquire)
	}

	/// Returns whether the transfer has completed, without blocking.
	pub fn is_ready(&self) -> bool {
		self.shared.state.lock().completed
	}

	/// Registers a hook to run once the transfer starts.
	///
	/// Ignored if the exchange has already been ticked.
	pub fn on_begin(&self, hook: impl FnOnce() + Send + 'static) -> &Self {
		let mut state = self.shared.state.lock();
		if self.is_ticked() {
			tracing::debug!(task = self.id(), "Ignoring begin hook registered after tick");
		} else {
			state.on_begin = Some(Box::new(hook));
		}
		self
	}

	/// Registers a hook to receive upload and download progress.
	///
	/// Ignored if the exchange has already been ticked.
	pub fn on_process(&self, hook: impl Fn(Progress) + Send + Sync + 'static) -> &Self {
		let mut state = self.shared.state.lock();
		if self.is_ticked() {
			tracing::debug!(task = self.id(), "Ignoring progress hook registered after tick");
		} else {
			state.on_process = Some(Arc::new(hook));
		}
		self
	}

	/// Registers a hook to run once the transfer completes.
	///
	/// Unlike the other hooks, this one may be registered after the exchange has been ticked. It
	/// replaces any previously registered completion hook, and it is ignored if completion has
	/// already been delivered.
	pub fn on_complete(
		&self,
		hook: impl FnOnce(&Exchange, Option<&TransferError>) + Send + 'static,
	) -> &Self {
		let mut state = self.shared.state.lock();
		if state.completed {
			tracing::debug!(task = self.id(), "Ignoring completion hook registered after completion");
		} else {
			state.on_complete = Some(Box::new(hook));
		}
		self
	}

	/// Registers a hook to receive the path of a finished download.
	///
	/// Ignored if the exchange has already been ticked.
	pub fn on_download_complete(&self, hook: impl FnOnce(PathBuf) + Send + 'static) -> &Self {
		let mut state = self.shared.state.lock();
		if self.is_ticked() {
			tracing::debug!(task = self.id(), "Ignoring download hook registered after tick");
		} else {
			state.on_download = Some(Box::new(hook));
		}
		self
	}

	/// Starts the transfer.
	///
	/// Only the first call on an exchange has any effect. The begin hook, if any, is dispatched to
	/// the hook threads; this function never runs it itself.
	pub fn tick(&self) -> &Self {
		self.start(None, None)
	}

	/// Starts the transfer with a completion hook.
	///
	/// If the exchange was already ticked, nothing happens and the hook is dropped.
	pub fn tick_with(
		&self,
		on_complete: impl FnOnce(&Exchange, Option<&TransferError>) + Send + 'static,
	) -> &Self {
		self.start(Some(Box::new(on_complete)), None)
	}

	/// Starts the transfer with a download completion hook.
	///
	/// If the exchange was already ticked, nothing happens and the hook is dropped.
	pub fn tick_download(&self, on_download_complete: impl FnOnce(PathBuf) + Send + 'static) -> &Self {
		self.start(None, Some(Box::new(on_download_complete)))
	}

	fn start(&self, on_complete: Option<CompleteHook>, on_download: Option<DownloadHook>) -> &Self {
		if self
			.shared
			.ticked
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			tracing::debug!(task = self.id(), "Exchange already ticked");
			return self;
		}
		let begin = {
			let mut state = self.shared.state.lock();
			if on_complete.is_some() {
				state.on_complete = on_complete;
			}
			if on_download.is_some() {
				state.on_download = on_download;
			}
			state.on_begin.take()
		};
		tracing::debug!(task = self.id(), url = %self.request().url(), "Ticked");
		if let Some(begin) = begin {
			self.shared.session.dispatcher().spawn(begin);
		}
		self.shared.session.transport().resume(self.id());
		self
	}

	/// Locks the state once the transfer has completed, or returns `None` if it was never ticked.
	fn completed_state(&self) -> Option<MutexGuard<'_, State>> {
		if !self.is_ticked() {
			return None;
		}
		let mut state = self.shared.state.lock();
		while !state.completed {
			self.shared.cond.wait(&mut state);
		}
		Some(state)
	}

	/// Blocks until the transfer completes.
	///
	/// Returns immediately if the exchange was never ticked.
	pub fn wait(&self) {
		let _ = self.completed_state();
	}

	/// Blocks until the transfer completes or `timeout` elapses.
	///
	/// Returns `true` if the accessors will no longer block, that is, if the transfer has completed
	/// or was never ticked.
	pub fn wait_timeout(&self, timeout: Duration) -> bool {
		if !self.is_ticked() {
			return true;
		}
		let deadline = Instant::now() + timeout;
		let mut state = self.shared.state.lock();
		while !state.completed {
			if self.shared.cond.wait_until(&mut state, deadline).timed_out() {
				return state.completed;
			}
		}
		true
	}

	/// Returns a future that resolves once the transfer completes.
	///
	/// The future resolves immediately if the exchange was never ticked.
	pub fn completion(&self) -> Completion {
		Completion {
			exchange: self.clone(),
			done: false,
		}
	}

	/// Returns the HTTP status code, or 0 if there is none.
	pub fn status_code(&self) -> u16 {
		self.completed_state().map_or(0, |s| s.status)
	}

	/// Returns the reason phrase of the final response.
	pub fn reason(&self) -> Option<String> {
		self.completed_state().and_then(|s| s.reason.clone())
	}

	/// Returns the response headers.
	///
	/// When the server repeated a header, the last value wins.
	pub fn headers(&self) -> HashMap<String, String> {
		self.completed_state()
			.map(|s| s.headers.clone())
			.unwrap_or_default()
	}

	/// Returns a single response header, looked up case-insensitively.
	pub fn header(&self, name: &str) -> Option<String> {
		self.completed_state().and_then(|s| {
			s.headers
				.iter()
				.find(|(k, _)| k.eq_ignore_ascii_case(name))
				.map(|(_, v)| v.clone())
		})
	}

	/// Returns the stored cookies that apply to the response URL, by name.
	pub fn cookies(&self) -> HashMap<String, String> {
		self.completed_state()
			.map(|s| s.cookies.clone())
			.unwrap_or_default()
	}

	/// Returns the response body held in memory.
	///
	/// Downloads are written to disk instead; see [`downloaded_file`](Self::downloaded_file).
	pub fn body(&self) -> Option<Vec<u8>> {
		self.completed_state().map(|s| s.body.clone())
	}

	/// Returns the response body as text, or `None` if it is not valid UTF-8.
	pub fn text(&self) -> Option<String> {
		self.completed_state()
			.and_then(|s| String::from_utf8(s.body.clone()).ok())
	}

	/// Returns the response body parsed as JSON, or `None` if it does not parse.
	pub fn json(&self) -> Option<serde_json::Value> {
		self.completed_state()
			.and_then(|s| serde_json::from_slice(&s.body).ok())
	}

	/// Returns the error the transfer failed with, if any.
	pub fn error(&self) -> Option<TransferError> {
		self.completed_state().and_then(|s| s.error.clone())
	}

	/// Returns the URL of the final response, after redirects.
	pub fn response_url(&self) -> Option<Url> {
		self.completed_state().and_then(|s| s.response_url.clone())
	}

	/// Returns the URLs of followed redirects, if the request asked for them to be remembered.
	pub fn redirect_history(&self) -> Option<Vec<Url>> {
		self.completed_state()
			.and_then(|s| s.redirect_history.clone())
	}

	/// Returns where a download was written.
	pub fn downloaded_file(&self) -> Option<PathBuf> {
		self.completed_state().and_then(|s| s.downloaded.clone())
	}

	/// Pauses the transfer.
	pub fn suspend(&self) {
		if self.is_ticked() {
			self.shared.session.transport().suspend(self.id());
		}
	}

	/// Resumes a suspended transfer.
	///
	/// Has no effect before the exchange is ticked.
	pub fn resume(&self) {
		if self.is_ticked() {
			self.shared.session.transport().resume(self.id());
		} else {
			tracing::debug!(task = self.id(), "Ignoring resume before tick");
		}
	}

	/// Cancels the transfer.
	///
	/// Cancellation is asynchronous: the exchange completes later with
	/// [`TransferError::Cancelled`].
	pub fn cancel(&self) {
		self.shared.session.transport().cancel(self.id());
	}

	/// Releases the exchange from its session.
	///
	/// The exchange’s values remain readable. Closing an exchange that was never ticked also
	/// cancels its transport task. Closing more than once has no further effect.
	///
	/// Events for a closed exchange are dropped, so a ticked exchange closed before it completes
	/// never becomes ready. Blocking accessors and [`wait`](Self::wait) called on it from another
	/// thread then block forever; use [`wait_timeout`](Self::wait_timeout) if that can happen.
	pub fn close(&self) {
		self.shared.session.remove_exchange(self);
	}

	pub(crate) fn in_flight(&self) -> &InFlight {
		&self.shared.request
	}

	pub(crate) fn append_body(&self, data: &[u8]) {
		self.shared.state.lock().body.extend_from_slice(data);
	}

	pub(crate) fn process_hook(&self) -> Option<ProcessHook> {
		self.shared.state.lock().on_process.clone()
	}

	pub(crate) fn record_redirect(&self, url: &Url) {
		if self.request().remember_redirect_history() {
			self.shared
				.state
				.lock()
				.redirect_history
				.get_or_insert_with(Vec::new)
				.push(url.clone());
		}
	}

	/// Picks the next stored credential to offer, never repeating a username within one round.
	///
	/// A round starts whenever the transport reports no previous failures.
	pub(crate) fn next_credential(
		&self,
		candidates: Vec<Credential>,
		previous_failure_count: usize,
	) -> Option<Credential> {
		let mut state = self.shared.state.lock();
		if previous_failure_count == 0 {
			state.tried_usernames.clear();
		}
		let chosen = candidates
			.into_iter()
			.find(|c| !state.tried_usernames.contains(c.user()))?;
		let _ = state.tried_usernames.insert(chosen.user().to_owned());
		Some(chosen)
	}

	/// Records a finished download and returns the hook to run for it.
	pub(crate) fn set_downloaded(&self, path: PathBuf) -> Option<DownloadHook> {
		let mut state = self.shared.state.lock();
		state.downloaded = Some(path);
		state.on_download.take()
	}

	/// Marks the exchange completed and releases all waiters.
	///
	/// Returns the completion hook to run, or `None` if there is none or completion was already
	/// delivered.
	pub(crate) fn complete(
		&self,
		head: Option<&ResponseHead>,
		cookies: HashMap<String, String>,
		error: Option<TransferError>,
	) -> Option<CompleteHook> {
		let (hook, wakers) = {
			let mut state = self.shared.state.lock();
			if state.completed {
				tracing::debug!(task = self.id(), "Dropping duplicate completion");
				return None;
			}
			if let Some(head) = head {
				state.status = head.status;
				state.reason = Some(head.reason.clone());
				state.headers = head.headers.iter().cloned().collect();
				state.response_url = Some(head.url.clone());
			}
			state.cookies = cookies;
			state.error = error;
			state.completed = true;
			let _ = self.shared.cond.notify_all();
			(state.on_complete.take(), std::mem::take(&mut state.wakers))
		};
		for waker in wakers {
			waker.wake();
		}
		hook
	}
}

impl Debug for Exchange {
	fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
		f.debug_struct("Exchange")
			.field("id", &self.id())
			.field("method", &self.request().method())
			.field("url", &self.request().url().as_str())
			.field("ticked", &self.is_ticked())
			.field("ready", &self.is_ready())
			.finish()
	}
}

/// A future that resolves once an [`Exchange`] completes.
///
/// Returned by [`Exchange::completion`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Completion {
	exchange: Exchange,
	done: bool,
}

impl Future for Completion {
	type Output = ();

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
		if !self.exchange.is_ticked() {
			self.done = true;
			return Poll::Ready(());
		}
		{
			let mut state = self.exchange.shared.state.lock();
			if !state.completed {
				if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
					state.wakers.push(cx.waker().clone());
				}
				return Poll::Pending;
			}
		}
		self.done = true;
		Poll::Ready(())
	}
}

impl FusedFuture for Completion {
	fn is_terminated(&self) -> bool {
		self.done
	}
}

#[cfg(test)]
mod test {
	use crate::error::TransferError;
	use crate::progress::Direction;
	use crate::request::Method;
	use crate::test_util::{head, scripted_session};
	use crossbeam_channel::unbounded;
	use futures_executor::block_on;
	use std::collections::HashMap;
	use std::thread;
	use std::time::Duration;

	const WAIT: Duration = Duration::from_secs(5);

	/// Tests that every accessor returns its zero value at once when the exchange was never ticked.
	#[test]
	fn test_never_ticked() {
		let (session, transport) = scripted_session();
		let ex = session.send(crate::test_util::request("http://a.example/", Method::Get)).unwrap();
		assert!(!ex.is_ticked());
		assert_eq!(ex.status_code(), 0);
		assert!(ex.reason().is_none());
		assert!(ex.headers().is_empty());
		assert!(ex.cookies().is_empty());
		assert!(ex.body().is_none());
		assert!(ex.text().is_none());
		assert!(ex.json().is_none());
		assert!(ex.error().is_none());
		assert!(ex.response_url().is_none());
		assert!(ex.redirect_history().is_none());
		assert!(ex.downloaded_file().is_none());
		assert!(ex.wait_timeout(Duration::from_millis(1)));
		ex.wait();
		block_on(ex.completion());
		assert!(transport.resumed().is_empty());
	}

	/// Tests that ticking twice starts the task once and runs the begin hook once.
	#[test]
	fn test_tick_idempotent() {
		let (session, transport) = scripted_session();
		let ex = session.send(crate::test_util::request("http://a.example/", Method::Get)).unwrap();
		let (tx, rx) = unbounded();
		let _ = ex.on_begin(move || tx.send(()).unwrap());
		let _ = ex.tick().tick();
		assert!(ex.is_ticked());
		rx.recv_timeout(WAIT).unwrap();
		assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
		assert_eq!(transport.resumed(), [ex.id()]);
		ex.resume();
		assert_eq!(transport.resumed().len(), 2);
	}

	/// Tests that hooks registered after tick are ignored, except for the completion hook.
	#[test]
	fn test_late_hooks() {
		let (session, transport) = scripted_session();
		let ex = session.send(crate::test_util::request("http://a.example/", Method::Get)).unwrap();
		let _ = ex.tick();
		let (tx, rx) = unbounded();
		let tx_begin = tx.clone();
		let _ = ex.on_begin(move || tx_begin.send("begin").unwrap());
		let tx_complete = tx.clone();
		let _ = ex.on_complete(move |_, _| tx_complete.send("complete").unwrap());
		transport.complete(ex.id(), Some(head(200, "http://a.example/")), None);
		assert_eq!(rx.recv_timeout(WAIT).unwrap(), "complete");
		let _ = ex.on_complete(move |_, _| tx.send("too late").unwrap());
		assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
	}

	/// Tests that many threads blocked on one exchange all see the same completed values.
	#[test]
	fn test_concurrent_waiters() {
		let (session, transport) = scripted_session();
		let ex = session.send(crate::test_util::request("http://a.example/", Method::Get)).unwrap();
		let _ = ex.tick();
		let waiters: Vec<_> = (0..8)
			.map(|_| {
				let ex = ex.clone();
				thread::spawn(move || (ex.status_code(), ex.text(), ex.header("x-id")))
			})
			.collect();
		thread::sleep(Duration::from_millis(20));
		assert!(!ex.is_ready());
		let delegate = transport.delegate();
		delegate.did_receive_data(ex.id(), b"hello ");
		delegate.did_receive_data(ex.id(), b"world");
		let mut h = head(201, "http://a.example/");
		h.headers.push(("X-Id".to_owned(), "1".to_owned()));
		h.headers.push(("X-Id".to_owned(), "2".to_owned()));
		transport.complete(ex.id(), Some(h), None);
		for w in waiters {
			assert_eq!(
				w.join().unwrap(),
				(201, Some("hello world".to_owned()), Some("2".to_owned()))
			);
		}
		assert!(ex.is_ready());
		assert_eq!(ex.status_code(), 201);
		assert_eq!(ex.reason().as_deref(), Some("Status"));
	}

	/// Tests that completion is delivered once and the completion future resolves.
	#[test]
	fn test_single_completion() {
		let (session, transport) = scripted_session();
		let ex = session.send(crate::test_util::request("http://a.example/", Method::Get)).unwrap();
		let (tx, rx) = unbounded();
		let _ = ex.tick_with(move |ex, err| {
			tx.send((ex.status_code(), err.cloned().map(|e| e.to_string())))
				.unwrap();
		});
		let fut = ex.completion();
		let delegate = transport.delegate();
		delegate.did_complete(ex.id(), None, Some(TransferError::TimedOut));
		delegate.did_complete(ex.id(), Some(&head(200, "http://a.example/")), None);
		block_on(fut);
		assert_eq!(
			rx.recv_timeout(WAIT).unwrap(),
			(0, Some("Transfer timed out".to_owned()))
		);
		assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
		assert!(matches!(ex.error(), Some(TransferError::TimedOut)));
	}

	/// Tests that progress reports accumulate across received chunks.
	#[test]
	fn test_progress() {
		let (session, transport) = scripted_session();
		let ex = session
			.send(crate::test_util::request("http://a.example/f", Method::Download))
			.unwrap();
		let (tx, rx) = unbounded();
		let _ = ex.on_process(move |p| tx.send(p).unwrap());
		let _ = ex.tick();
		let delegate = transport.delegate();
		let mut total = 0;
		for chunk in [100, 250, 650] {
			total += chunk;
			delegate.did_receive_progress(ex.id(), chunk, total, 1000);
		}
		let got: Vec<_> = (0..3).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
		assert_eq!(
			got.iter().map(|p| p.completed()).collect::<Vec<_>>(),
			[100, 350, 1000]
		);
		assert!(got.iter().all(|p| p.completed() <= p.total()));
		assert!(got.iter().all(|p| p.direction() == Direction::Receiving));
		assert_eq!(got[1].delta(), 250);

		delegate.did_receive_progress(ex.id(), 200, 1200, 1000);
		let overrun = rx.recv_timeout(WAIT).unwrap();
		assert_eq!(overrun.completed(), 1200);
		assert!(!overrun.is_total_known());
	}

	/// Tests JSON decoding of the body.
	#[test]
	fn test_json() {
		let (session, transport) = scripted_session();
		let ex = session.send(crate::test_util::request("http://a.example/", Method::Get)).unwrap();
		let _ = ex.tick();
		transport.delegate().did_receive_data(ex.id(), br#"{"a": [1, 2]}"#);
		transport.complete(ex.id(), Some(head(200, "http://a.example/")), None);
		assert_eq!(ex.json().unwrap()["a"][1], 2);
		assert_eq!(ex.cookies(), HashMap::new());
	}
}
