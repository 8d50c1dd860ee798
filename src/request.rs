use crate::store::Credential;
use parking_lot::Mutex;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

/// The default timeout applied to a new request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(240);

/// Headers that only the transport may set.
const RESERVED_HEADERS: [&str; 4] = ["authorization", "connection", "host", "www-authenticate"];

/// An HTTP method.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
	/// `GET`.
	Get,

	/// `HEAD`.
	Head,

	/// `POST`.
	Post,

	/// `PUT`.
	Put,

	/// `DELETE`.
	Delete,

	/// `PATCH`.
	Patch,

	/// A `GET` whose response body is written to a file instead of memory.
	Download,
}

impl Method {
	/// Returns the method string sent on the wire.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Get | Self::Download => "GET",
			Self::Head => "HEAD",
			Self::Post => "POST",
			Self::Put => "PUT",
			Self::Delete => "DELETE",
			Self::Patch => "PATCH",
		}
	}

	/// Returns whether requests with this method must carry a body.
	pub fn requires_body(self) -> bool {
		matches!(self, Self::Post | Self::Put | Self::Patch)
	}
}

impl Display for Method {
	fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
		match self {
			Self::Download => f.write_str("DOWNLOAD"),
			other => f.write_str(other.as_str()),
		}
	}
}

/// The body to upload with a request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Payload {
	/// In-memory bytes.
	Bytes(Vec<u8>),

	/// The contents of a local file.
	File(PathBuf),
}

/// How a transport may use cached responses.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CachePolicy {
	/// Follow the caching rules of the protocol.
	#[default]
	UseProtocolCachePolicy,

	/// Always load from the origin.
	ReloadIgnoringLocalCacheData,

	/// Use cached data of any age, loading only when none exists.
	ReturnCacheDataElseLoad,

	/// Use cached data of any age and never load.
	ReturnCacheDataDontLoad,
}

/// A hint to the transport about the kind of traffic a request carries.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ServiceType {
	/// Ordinary traffic.
	#[default]
	Default,

	/// Voice over IP control traffic.
	Voip,

	/// Video traffic.
	Video,

	/// Background traffic.
	Background,

	/// Voice traffic.
	Voice,
}

/// A description of an HTTP call that has not been sent yet.
///
/// A `Request` is obtained from [`Client::prepare`](crate::Client::prepare), adjusted through its
/// setters, and then consumed by [`Client::send`](crate::Client::send). Once sent it cannot be
/// modified or sent again.
#[derive(Clone, Debug)]
pub struct Request {
	url: Url,
	method: Method,
	timeout: Duration,
	cache_policy: CachePolicy,
	allow_cellular: bool,
	service_type: ServiceType,
	allow_redirect: bool,
	max_redirect: usize,
	remember_redirect_history: bool,
	handle_cookies: bool,
	basic: Option<Credential>,
	digest: Option<Credential>,
	stream: bool,
	payload: Option<Payload>,
	outlast: bool,
	headers: Vec<(String, String)>,
	cookies: Vec<(String, String)>,
}

impl Request {
	/// Constructs a new `Request` with default options.
	pub fn new(url: Url, method: Method) -> Self {
		Self {
			url,
			method,
			timeout: DEFAULT_TIMEOUT,
			cache_policy: CachePolicy::default(),
			allow_cellular: true,
			service_type: ServiceType::default(),
			allow_redirect: true,
			max_redirect: usize::MAX,
			remember_redirect_history: false,
			handle_cookies: true,
			basic: None,
			digest: None,
			stream: false,
			payload: None,
			outlast: false,
			headers: Vec::new(),
			cookies: Vec::new(),
		}
	}

	/// Returns the target URL.
	pub fn url(&self) -> &Url {
		&self.url
	}

	/// Returns the method.
	pub fn method(&self) -> Method {
		self.method
	}

	/// Returns the timeout interval.
	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Sets the timeout interval.
	pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
		self.timeout = timeout;
		self
	}

	/// Returns the cache policy.
	pub fn cache_policy(&self) -> CachePolicy {
		self.cache_policy
	}

	/// Sets the cache policy.
	pub fn set_cache_policy(&mut self, policy: CachePolicy) -> &mut Self {
		self.cache_policy = policy;
		self
	}

	/// Returns whether the request may use cellular networks.
	pub fn allow_cellular(&self) -> bool {
		self.allow_cellular
	}

	/// Sets whether the request may use cellular networks.
	pub fn set_allow_cellular(&mut self, allow: bool) -> &mut Self {
		self.allow_cellular = allow;
		self
	}

	/// Returns the network service type hint.
	pub fn service_type(&self) -> ServiceType {
		self.service_type
	}

	/// Sets the network service type hint.
	pub fn set_service_type(&mut self, service_type: ServiceType) -> &mut Self {
		self.service_type = service_type;
		self
	}

	/// Returns whether redirects are followed.
	pub fn allow_redirect(&self) -> bool {
		self.allow_redirect
	}

	/// Sets whether redirects are followed.
	///
	/// When redirects are refused, the redirect response itself completes the exchange.
	pub fn set_allow_redirect(&mut self, allow: bool) -> &mut Self {
		self.allow_redirect = allow;
		self
	}

	/// Returns the maximum number of redirects followed.
	pub fn max_redirect(&self) -> usize {
		self.max_redirect
	}

	/// Sets the maximum number of redirects followed.
	pub fn set_max_redirect(&mut self, max: usize) -> &mut Self {
		self.max_redirect = max;
		self
	}

	/// Returns whether the URLs of followed redirects are recorded.
	pub fn remember_redirect_history(&self) -> bool {
		self.remember_redirect_history
	}

	/// Sets whether the URLs of followed redirects are recorded.
	pub fn set_remember_redirect_history(&mut self, remember: bool) -> &mut Self {
		self.remember_redirect_history = remember;
		self
	}

	/// Returns whether the transport sends and stores cookies for this request.
	pub fn handle_cookies(&self) -> bool {
		self.handle_cookies
	}

	/// Sets whether the transport sends and stores cookies for this request.
	pub fn set_handle_cookies(&mut self, handle: bool) -> &mut Self {
		self.handle_cookies = handle;
		self
	}

	/// Supplies a credential to answer the first Basic challenge with.
	pub fn basic_auth(&mut self, user: impl Into<String>, password: impl Into<String>) -> &mut Self {
		self.basic = Some(Credential::new(user, password));
		self
	}

	/// Supplies a credential to answer the first Digest challenge with.
	pub fn digest_auth(
		&mut self,
		user: impl Into<String>,
		password: impl Into<String>,
	) -> &mut Self {
		self.digest = Some(Credential::new(user, password));
		self
	}

	/// Returns whether the body is streamed rather than handed to the transport whole.
	pub fn stream(&self) -> bool {
		self.stream
	}

	/// Sets whether the body is streamed rather than handed to the transport whole.
	pub fn set_stream(&mut self, stream: bool) -> &mut Self {
		self.stream = stream;
		self
	}

	/// Returns the payload, if any.
	pub fn payload(&self) -> Option<&Payload> {
		self.payload.as_ref()
	}

	/// Uploads the given bytes as the request body.
	pub fn set_data(&mut self, data: impl Into<Vec<u8>>) -> &mut Self {
		self.payload = Some(Payload::Bytes(data.into()));
		self
	}

	/// Uploads the contents of a file as the request body.
	pub fn set_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
		self.payload = Some(Payload::File(path.into()));
		self
	}

	/// Returns whether the request runs on its own outlasting session.
	pub fn outlast(&self) -> bool {
		self.outlast
	}

	/// Sets whether the request runs on its own outlasting session.
	pub fn set_outlast(&mut self, outlast: bool) -> &mut Self {
		self.outlast = outlast;
		self
	}

	/// Returns the custom headers, in insertion order.
	pub fn headers(&self) -> &[(String, String)] {
		&self.headers
	}

	/// Sets a custom header, replacing any previous value with the same name.
	///
	/// `Authorization`, `Connection`, `Host` and `WWW-Authenticate` are reserved for the transport
	/// and are ignored in any letter case, as are names that are not tokens and values that are
	/// not valid field values.
	pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
		let (name, value) = (name.into(), value.into());
		if RESERVED_HEADERS
			.iter()
			.any(|r| r.eq_ignore_ascii_case(&name))
		{
			tracing::debug!(header = %name, "Ignoring reserved request header");
		} else if !crate::util::is_token(&name) || !crate::util::is_field_value(value.as_bytes()) {
			tracing::debug!(header = %name, "Ignoring malformed request header");
		} else if let Some(existing) = self
			.headers
			.iter_mut()
			.find(|(n, _)| n.eq_ignore_ascii_case(&name))
		{
			existing.1 = value;
		} else {
			self.headers.push((name, value));
		}
		self
	}

	/// Sets several custom headers.
	pub fn set_headers<K, V>(&mut self, headers: impl IntoIterator<Item = (K, V)>) -> &mut Self
	where
		K: Into<String>,
		V: Into<String>,
	{
		for (name, value) in headers {
			let _ = self.set_header(name, value);
		}
		self
	}

	/// Returns the custom cookies, in insertion order.
	pub fn cookies(&self) -> &[(String, String)] {
		&self.cookies
	}

	/// Sets a cookie to store for the request URL before the request is sent.
	pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
		let (name, value) = (name.into(), value.into());
		match self.cookies.iter_mut().find(|(n, _)| *n == name) {
			Some(existing) => existing.1 = value,
			None => self.cookies.push((name, value)),
		}
		self
	}

	/// Sets several cookies.
	pub fn set_cookies<K, V>(&mut self, cookies: impl IntoIterator<Item = (K, V)>) -> &mut Self
	where
		K: Into<String>,
		V: Into<String>,
	{
		for (name, value) in cookies {
			let _ = self.set_cookie(name, value);
		}
		self
	}
}

/// A request that has been handed to a session.
///
/// The options are frozen. The per-request credentials and the redirect counter are the only
/// parts that event threads still mutate.
#[derive(Debug)]
pub(crate) struct InFlight {
	request: Request,
	basic: Mutex<Option<Credential>>,
	digest: Mutex<Option<Credential>>,
	redirects: AtomicUsize,
}

impl InFlight {
	pub fn new(mut request: Request) -> Self {
		let basic = Mutex::new(request.basic.take());
		let digest = Mutex::new(request.digest.take());
		Self {
			request,
			basic,
			digest,
			redirects: AtomicUsize::new(0),
		}
	}

	pub fn request(&self) -> &Request {
		&self.request
	}

	/// Takes the per-request Basic credential; each is offered at most once.
	pub fn take_basic(&self) -> Option<Credential> {
		self.basic.lock().take()
	}

	/// Takes the per-request Digest credential; each is offered at most once.
	pub fn take_digest(&self) -> Option<Credential> {
		self.digest.lock().take()
	}

	/// Counts one more redirect if the request permits it.
	///
	/// Returns `false`, leaving the count unchanged, if redirects are disabled or the maximum has
	/// already been reached.
	pub fn try_redirect(&self) -> bool {
		if !self.request.allow_redirect {
			return false;
		}
		let max = self.request.max_redirect;
		self.redirects
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
				if n >= max {
					None
				} else {
					Some(n + 1)
				}
			})
			.is_ok()
	}

	pub fn redirect_count(&self) -> usize {
		self.redirects.load(Ordering::Acquire)
	}
}
