use crate::config::Configuration;
use crate::dispatch::Dispatcher;
use crate::error::{ConfigError, SendError};
use crate::exchange::Exchange;
use crate::request::{Method, Payload, Request};
use crate::session::Session;
use crate::transport::TransportFactory;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// The sessions a client owns and the settings new sessions are built from.
struct Sessions {
	config: Arc<Configuration>,
	dispatcher: Dispatcher,
	default: Option<Arc<Session>>,
	outlasting: Vec<Arc<Session>>,
	decaying: Vec<Arc<Session>>,
}

/// The state shared between a [`Client`] and the sessions reporting back to it.
pub(crate) struct Registry {
	factory: Arc<dyn TransportFactory>,
	sessions: Mutex<Sessions>,
}

impl Registry {
	/// Forgets a session whose transport has been invalidated.
	pub fn session_invalidated(&self, session: &Session) {
		let mut sessions = self.sessions.lock();
		let is_other = |s: &Arc<Session>| !std::ptr::eq(Arc::as_ptr(s), session);
		sessions.outlasting.retain(is_other);
		sessions.decaying.retain(is_other);
	}

	fn open(self: &Arc<Self>, sessions: &Sessions, identifier: Option<String>) -> Arc<Session> {
		Session::new(
			&*self.factory,
			Arc::clone(&sessions.config),
			identifier,
			sessions.dispatcher.clone(),
			Arc::downgrade(self),
		)
	}
}

/// An HTTP client.
///
/// A client routes requests to sessions. Ordinary requests share one default session, which is
/// replaced whenever a new configuration is applied; the replaced session keeps serving its
/// existing exchanges and retires once they are closed. Requests flagged
/// [`outlast`](Request::set_outlast) each get a session of their own.
///
/// Clients are cheap to clone; clones share sessions.
///
/// # Example
/// ```no_run
/// let client = huntaway::Client::new().unwrap();
/// let exchange = client.get("http://example.com/").unwrap();
/// exchange.tick();
/// println!("{} {:?}", exchange.status_code(), exchange.text());
/// exchange.close();
/// ```
#[derive(Clone)]
pub struct Client {
	registry: Arc<Registry>,
}

impl Client {
	/// Constructs a client with the default configuration and the bundled network transport.
	///
	/// # Errors
	/// This function returns an error if the hook threads cannot be started.
	#[cfg(feature = "net")]
	pub fn new() -> Result<Self, ConfigError> {
		Self::with_transport(
			Arc::new(crate::transport::net::NetTransportFactory),
			Configuration::default(),
		)
	}

	/// Constructs a client that opens its transports from `factory`.
	///
	/// # Errors
	/// This function returns an error if the hook threads cannot be started.
	pub fn with_transport(
		factory: Arc<dyn TransportFactory>,
		config: Configuration,
	) -> Result<Self, ConfigError> {
		let dispatcher = Dispatcher::new(config.hook_threads())?;
		Ok(Self {
			registry: Arc::new(Registry {
				factory,
				sessions: Mutex::new(Sessions {
					config: Arc::new(config),
					dispatcher,
					default: None,
					outlasting: Vec::new(),
					decaying: Vec::new(),
				}),
			}),
		})
	}

	/// Parses a URL and prepares a request for it.
	///
	/// # Errors
	/// This function returns an error if the URL does not parse or its scheme is neither `http`
	/// nor `https`.
	#[allow(clippy::unused_self)]
	pub fn prepare(&self, url: &str, method: Method) -> Result<Request, SendError> {
		let url = Url::parse(url)?;
		match url.scheme() {
			"http" | "https" => Ok(Request::new(url, method)),
			other => Err(SendError::UnsupportedScheme(other.to_owned())),
		}
	}

	/// Sends a request, returning its exchange unticked.
	///
	/// # Errors
	/// This function returns an error if the request is malformed, if it asks to outlast but is
	/// neither a download nor a `POST` of a file, or if the transport refuses it.
	pub fn send(&self, request: Request) -> Result<Exchange, SendError> {
		if request.outlast() {
			return self.send_outlasting(request);
		}
		self.send_via(self.default_session(), request)
	}

	/// Returns the default session, opening it if there is none yet.
	fn default_session(&self) -> Arc<Session> {
		let mut sessions = self.registry.sessions.lock();
		match &sessions.default {
			Some(session) => Arc::clone(session),
			None => {
				let session = self.registry.open(&sessions, None);
				sessions.default = Some(Arc::clone(&session));
				session
			}
		}
	}

	/// Sends on `session`, following the default session if it was replaced in the meantime.
	fn send_via(&self, mut session: Arc<Session>, request: Request) -> Result<Exchange, SendError> {
		loop {
			match session.send(request.clone()) {
				Err(SendError::SessionRetired) => {
					let current = self.default_session();
					if Arc::ptr_eq(&current, &session) {
						return Err(SendError::SessionRetired);
					}
					tracing::debug!("Default session replaced during send; retrying");
					session = current;
				}
				result => return result,
			}
		}
	}

	fn send_outlasting(&self, request: Request) -> Result<Exchange, SendError> {
		let method = request.method();
		let eligible = match method {
			Method::Download => true,
			Method::Post => matches!(request.payload(), Some(Payload::File(_))),
			_ => false,
		};
		if !eligible {
			return Err(SendError::OutlastUnsupported(method));
		}
		let session = {
			let mut sessions = self.registry.sessions.lock();
			let identifier = crate::util::random_identifier();
			let session = self.registry.open(&sessions, Some(identifier));
			sessions.outlasting.push(Arc::clone(&session));
			session
		};
		session.send(request).map_err(|e| {
			session.shutdown();
			e
		})
	}

	/// Prepares and sends a `GET` request.
	///
	/// # Errors
	/// See [`prepare`](Self::prepare) and [`send`](Self::send).
	pub fn get(&self, url: &str) -> Result<Exchange, SendError> {
		self.send(self.prepare(url, Method::Get)?)
	}

	/// Prepares and sends a `GET` request with query parameters appended to the URL.
	///
	/// # Errors
	/// See [`prepare`](Self::prepare) and [`send`](Self::send).
	pub fn get_with_query(&self, url: &str, params: &[(&str, &str)]) -> Result<Exchange, SendError> {
		let mut url = Url::parse(url)?;
		let _ = url.query_pairs_mut().extend_pairs(params);
		self.send(self.prepare(url.as_str(), Method::Get)?)
	}

	/// Prepares and sends a `HEAD` request.
	///
	/// # Errors
	/// See [`prepare`](Self::prepare) and [`send`](Self::send).
	pub fn head(&self, url: &str) -> Result<Exchange, SendError> {
		self.send(self.prepare(url, Method::Head)?)
	}

	/// Prepares and sends a `POST` request with an in-memory body.
	///
	/// # Errors
	/// See [`prepare`](Self::prepare) and [`send`](Self::send).
	pub fn post(&self, url: &str, data: impl Into<Vec<u8>>) -> Result<Exchange, SendError> {
		let mut request = self.prepare(url, Method::Post)?;
		let _ = request.set_data(data);
		self.send(request)
	}

	/// Prepares and sends a `POST` request uploading a file.
	///
	/// # Errors
	/// See [`prepare`](Self::prepare) and [`send`](Self::send).
	pub fn post_file(
		&self,
		url: &str,
		path: impl Into<PathBuf>,
		outlast: bool,
	) -> Result<Exchange, SendError> {
		let mut request = self.prepare(url, Method::Post)?;
		let _ = request.set_file(path).set_outlast(outlast);
		self.send(request)
	}

	/// Prepares and sends a `PUT` request with an in-memory body.
	///
	/// # Errors
	/// See [`prepare`](Self::prepare) and [`send`](Self::send).
	pub fn put(&self, url: &str, data: impl Into<Vec<u8>>) -> Result<Exchange, SendError> {
		let mut request = self.prepare(url, Method::Put)?;
		let _ = request.set_data(data);
		self.send(request)
	}

	/// Prepares and sends a `PATCH` request with an in-memory body.
	///
	/// # Errors
	/// See [`prepare`](Self::prepare) and [`send`](Self::send).
	pub fn patch(&self, url: &str, data: impl Into<Vec<u8>>) -> Result<Exchange, SendError> {
		let mut request = self.prepare(url, Method::Patch)?;
		let _ = request.set_data(data);
		self.send(request)
	}

	/// Prepares and sends a `DELETE` request without a body.
	///
	/// # Errors
	/// See [`prepare`](Self::prepare) and [`send`](Self::send).
	pub fn delete(&self, url: &str) -> Result<Exchange, SendError> {
		self.send(self.prepare(url, Method::Delete)?)
	}

	/// Prepares and sends a download.
	///
	/// # Errors
	/// See [`prepare`](Self::prepare) and [`send`](Self::send).
	pub fn download(&self, url: &str, outlast: bool) -> Result<Exchange, SendError> {
		let mut request = self.prepare(url, Method::Download)?;
		let _ = request.set_outlast(outlast);
		self.send(request)
	}

	/// Replaces the default session with one built from `config`.
	///
	/// The previous default session is retired at once if it is idle. Otherwise it stops accepting
	/// requests and retires after its remaining exchanges are closed.
	///
	/// # Errors
	/// This function returns an error if the configuration asks for a different number of hook
	/// threads and they cannot be started.
	pub fn apply_configuration(&self, config: Configuration) -> Result<(), ConfigError> {
		let previous = {
			let mut sessions = self.registry.sessions.lock();
			if config.hook_threads() != sessions.config.hook_threads() {
				sessions.dispatcher = Dispatcher::new(config.hook_threads())?;
			}
			sessions.config = Arc::new(config);
			let session = self.registry.open(&sessions, None);
			sessions.default.replace(session)
		};
		if let Some(previous) = previous {
			if previous.has_pending() {
				self.registry
					.sessions
					.lock()
					.decaying
					.push(Arc::clone(&previous));
				previous.decay();
			} else {
				previous.shutdown();
			}
		}
		Ok(())
	}

	/// Reattaches to an outlasting session after the process was relaunched to handle its events.
	///
	/// If a live outlasting or decaying session already has this identifier, only
	/// `on_events_finished` is registered on it. Otherwise a session bound to the identifier is
	/// created; it runs `on_events_finished` once the transport has delivered everything queued for
	/// it, hands any download that finishes without a local exchange to `on_download_finished`, and
	/// then retires.
	pub fn resume_background_session(
		&self,
		identifier: &str,
		on_events_finished: impl FnOnce() + Send + 'static,
		on_download_finished: impl FnOnce(PathBuf) + Send + 'static,
	) {
		let mut sessions = self.registry.sessions.lock();
		let existing = sessions
			.outlasting
			.iter()
			.chain(sessions.decaying.iter())
			.find(|s| s.identifier() == Some(identifier))
			.cloned();
		if let Some(session) = existing {
			drop(sessions);
			tracing::debug!(identifier, "Background session already live");
			session.set_events_finished_handler(Box::new(on_events_finished));
			return;
		}
		let session = self.registry.open(&sessions, Some(identifier.to_owned()));
		session.await_background_events(Box::new(on_events_finished), Box::new(on_download_finished));
		sessions.outlasting.push(session);
	}

	/// Returns the configuration new default sessions are built from.
	pub fn configuration(&self) -> Arc<Configuration> {
		Arc::clone(&self.registry.sessions.lock().config)
	}

	/// Returns the identifiers of the live outlasting sessions.
	pub fn outlasting_identifiers(&self) -> Vec<String> {
		self.registry
			.sessions
			.lock()
			.outlasting
			.iter()
			.filter_map(|s| s.identifier().map(str::to_owned))
			.collect()
	}

	/// Returns the number of superseded sessions still draining.
	pub fn decaying_count(&self) -> usize {
		self.registry.sessions.lock().decaying.len()
	}
}

impl std::fmt::Debug for Client {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
		let sessions = self.registry.sessions.lock();
		f.debug_struct("Client")
			.field("has_default", &sessions.default.is_some())
			.field("outlasting", &sessions.outlasting.len())
			.field("decaying", &sessions.decaying.len())
			.finish()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::test_util::head;
	use crate::transport::scripted::ScriptedFactory;
	use crate::util::IDENTIFIER_LEN;
	use crossbeam_channel::unbounded;
	use std::time::Duration;

	fn client() -> (Client, Arc<ScriptedFactory>) {
		let factory = Arc::new(ScriptedFactory::default());
		let client = Client::with_transport(factory.clone(), Configuration::default()).unwrap();
		(client, factory)
	}

	/// Tests URL validation during preparation.
	#[test]
	fn test_prepare() {
		let (client, factory) = client();
		assert!(matches!(
			client.prepare("not a url", Method::Get),
			Err(SendError::InvalidUrl(_))
		));
		assert!(matches!(
			client.prepare("ftp://example.com/", Method::Get),
			Err(SendError::UnsupportedScheme(s)) if s == "ftp"
		));
		assert!(client.prepare("https://example.com/", Method::Get).is_ok());
		assert!(factory.opened().is_empty());
	}

	/// Tests that ordinary requests share one lazily opened default session.
	#[test]
	fn test_default_session() {
		let (client, factory) = client();
		let a = client.get("http://a.example/").unwrap();
		let b = client.delete("http://a.example/x").unwrap();
		assert_eq!(factory.opened().len(), 1);
		let transport = factory.last();
		assert!(transport.identifier().is_none());
		assert_eq!(transport.created().len(), 2);
		assert_eq!(transport.created()[1].0.method, Method::Delete);
		let _ = a.tick();
		a.suspend();
		b.suspend();
		assert_eq!(transport.suspended(), [a.id()]);
		a.close();
		b.close();
		assert_eq!(transport.invalidations(), 0);
	}

	/// Tests query encoding in the convenience call.
	#[test]
	fn test_get_with_query() {
		let (client, factory) = client();
		let _ = client
			.get_with_query("http://a.example/search", &[("q", "a b"), ("page", "2")])
			.unwrap();
		assert_eq!(
			factory.last().created()[0].0.url.as_str(),
			"http://a.example/search?q=a+b&page=2"
		);
	}

	/// Tests which requests may outlast the process.
	#[test]
	fn test_outlast_rules() {
		let (client, factory) = client();
		let file = tempfile::NamedTempFile::new().unwrap();
		let mut r = client.prepare("http://a.example/", Method::Post).unwrap();
		let _ = r.set_data("x").set_outlast(true);
		assert!(matches!(
			client.send(r),
			Err(SendError::OutlastUnsupported(Method::Post))
		));
		let mut r = client.prepare("http://a.example/", Method::Get).unwrap();
		let _ = r.set_outlast(true);
		assert!(matches!(
			client.send(r),
			Err(SendError::OutlastUnsupported(Method::Get))
		));
		assert!(factory.opened().is_empty());

		let upload = client.post_file("http://a.example/", file.path(), true).unwrap();
		let download = client.download("http://a.example/f", true).unwrap();
		let ids = client.outlasting_identifiers();
		assert_eq!(ids.len(), 2);
		assert_ne!(ids[0], ids[1]);
		assert!(ids
			.iter()
			.all(|id| id.len() == IDENTIFIER_LEN && id.bytes().all(|b| b.is_ascii_alphanumeric())));
		assert_eq!(factory.opened()[0].identifier(), Some(ids[0].as_str()));
		upload.close();
		download.close();
	}

	/// Tests that an outlasting session is invalidated once and forgotten after its exchange closes.
	#[test]
	fn test_outlast_retirement() {
		let (client, factory) = client();
		let ex = client.download("http://a.example/f", true).unwrap();
		let transport = factory.last();
		let _ = ex.tick();
		transport
			.delegate()
			.did_finish_downloading(ex.id(), std::path::Path::new("/tmp/f"));
		transport.complete(ex.id(), Some(head(200, "http://a.example/f")), None);
		assert_eq!(ex.downloaded_file().unwrap(), PathBuf::from("/tmp/f"));
		assert_eq!(client.outlasting_identifiers().len(), 1);
		ex.close();
		ex.close();
		assert_eq!(transport.invalidations(), 1);
		assert!(client.outlasting_identifiers().is_empty());
	}

	/// Tests that a busy default session decays on reconfiguration and an idle one retires.
	#[test]
	fn test_apply_configuration() {
		let (client, factory) = client();
		let busy = client.get("http://a.example/").unwrap();
		let _ = busy.tick();
		let first = factory.last();

		let config = Configuration::builder()
			.additional_headers(vec![("X-Generation", "2")])
			.build()
			.unwrap();
		client.apply_configuration(config).unwrap();
		assert_eq!(factory.opened().len(), 2);
		assert_eq!(client.decaying_count(), 1);
		assert_eq!(first.invalidations(), 0);

		let next = client.get("http://a.example/").unwrap();
		let second = factory.last();
		assert_eq!(
			second.created()[0].0.headers,
			[("X-Generation".to_owned(), "2".to_owned())]
		);
		assert_eq!(client.configuration().additional_headers().len(), 1);

		first.complete(busy.id(), Some(head(200, "http://a.example/")), None);
		assert_eq!(busy.status_code(), 200);
		busy.close();
		assert_eq!(first.invalidations(), 1);
		assert_eq!(client.decaying_count(), 0);

		next.close();
		client
			.apply_configuration(Configuration::builder().hook_threads(2).build().unwrap())
			.unwrap();
		assert_eq!(second.invalidations(), 1);
		assert_eq!(client.decaying_count(), 0);
	}

	/// Tests that a send racing a configuration change lands on the new default session.
	#[test]
	fn test_send_races_apply_configuration() {
		let (client, factory) = client();
		let picked = client.default_session();
		let first = factory.last();
		client.apply_configuration(Configuration::default()).unwrap();
		assert_eq!(first.invalidations(), 1);

		let request = client.prepare("http://a.example/", Method::Get).unwrap();
		let exchange = client.send_via(picked, request).unwrap();
		let second = factory.last();
		assert!(!Arc::ptr_eq(&first, &second));
		assert!(first.created().is_empty());
		assert_eq!(second.created().len(), 1);
		assert_eq!(second.created()[0].0.method, Method::Get);
		assert_eq!(client.decaying_count(), 0);
		exchange.close();
	}

	/// Tests background session resumption, including reuse of a live session.
	#[test]
	fn test_resume_background_session() {
		let (client, factory) = client();
		let (tx, rx) = unbounded();
		let tx_events = tx.clone();
		client.resume_background_session(
			"abcdefghijklmno",
			move || tx_events.send("first events".to_owned()).unwrap(),
			move |p| tx.send(p.display().to_string()).unwrap(),
		);
		assert_eq!(client.outlasting_identifiers(), ["abcdefghijklmno"]);
		assert_eq!(factory.opened().len(), 1);

		let (tx2, rx2) = unbounded();
		client.resume_background_session(
			"abcdefghijklmno",
			move || tx2.send("second events").unwrap(),
			|_| panic!("not registered"),
		);
		assert_eq!(factory.opened().len(), 1);

		let transport = factory.last();
		assert_eq!(transport.identifier(), Some("abcdefghijklmno"));
		let delegate = transport.delegate();
		delegate.did_finish_downloading(1, std::path::Path::new("/tmp/woken"));
		assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "/tmp/woken");
		delegate.did_finish_events_for_background();
		assert_eq!(rx2.recv_timeout(Duration::from_secs(5)).unwrap(), "second events");
		assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
		assert_eq!(transport.invalidations(), 1);
		assert!(client.outlasting_identifiers().is_empty());
	}
}
