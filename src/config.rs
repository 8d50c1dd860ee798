//! Session configuration.
//!
//! A [`Configuration`] is an immutable snapshot shared by every session created from it. To change
//! settings, build a new snapshot with [`ConfigurationBuilder`] and hand it to
//! [`Client::apply_configuration`](crate::Client::apply_configuration); existing sessions keep the
//! snapshot they were created with.

use crate::error::ConfigError;
use crate::request::{CachePolicy, ServiceType};
use crate::store::{
	AuthMethod, CookieStore, Credential, CredentialStore, MemoryCookieStore,
	MemoryCredentialStore, ProtectionSpace,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// When responses may store cookies.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CookieAcceptPolicy {
	/// Accept every cookie.
	#[default]
	Always,

	/// Accept no cookies.
	Never,

	/// Accept only cookies scoped to exactly the host that sent them.
	OnlyFromMainDocumentDomain,
}

/// A TLS protocol version.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TlsVersion {
	/// TLS 1.0.
	Tls10,

	/// TLS 1.1.
	Tls11,

	/// TLS 1.2.
	Tls12,

	/// TLS 1.3.
	Tls13,
}

/// The kind of proxy server.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ProxyKind {
	/// An HTTP proxy.
	Http,

	/// An HTTPS proxy.
	Https,

	/// A SOCKS proxy.
	Socks,
}

/// A proxy server for transports that support one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Proxy {
	/// The kind of proxy.
	pub kind: ProxyKind,

	/// The proxy host name or address.
	pub host: String,

	/// The proxy port.
	pub port: u16,

	/// The credential to present to the proxy, if any.
	pub credential: Option<Credential>,
}

/// An immutable set of session settings.
#[derive(Clone, Debug)]
pub struct Configuration {
	request_timeout: Duration,
	resource_timeout: Duration,
	allow_cellular: bool,
	service_type: ServiceType,
	cache_policy: CachePolicy,
	cookie_accept: CookieAcceptPolicy,
	should_set_cookies: bool,
	use_pipelining: bool,
	additional_headers: Vec<(String, String)>,
	tls_min: Option<TlsVersion>,
	tls_max: Option<TlsVersion>,
	max_connections_per_host: usize,
	shared_container_identifier: Option<String>,
	proxy: Option<Proxy>,
	credentials: Arc<dyn CredentialStore>,
	cookies: Arc<dyn CookieStore>,
	download_dir: PathBuf,
	hook_threads: usize,
}

impl Configuration {
	/// Returns a builder initialized with the default settings.
	pub fn builder() -> ConfigurationBuilder {
		ConfigurationBuilder::new()
	}

	/// Returns a builder initialized with the settings of this configuration.
	///
	/// The stores are shared, not copied.
	pub fn to_builder(&self) -> ConfigurationBuilder {
		ConfigurationBuilder {
			config: self.clone(),
			pending_credentials: Vec::new(),
		}
	}

	/// Returns how long a task waits for more data before timing out.
	pub fn request_timeout(&self) -> Duration {
		self.request_timeout
	}

	/// Returns how long a whole resource may take to transfer.
	pub fn resource_timeout(&self) -> Duration {
		self.resource_timeout
	}

	/// Returns whether cellular networks may be used.
	pub fn allow_cellular(&self) -> bool {
		self.allow_cellular
	}

	/// Returns the network service type hint.
	pub fn service_type(&self) -> ServiceType {
		self.service_type
	}

	/// Returns the cache policy.
	pub fn cache_policy(&self) -> CachePolicy {
		self.cache_policy
	}

	/// Returns which response cookies are stored.
	pub fn cookie_accept(&self) -> CookieAcceptPolicy {
		self.cookie_accept
	}

	/// Returns whether stored cookies are attached to requests.
	pub fn should_set_cookies(&self) -> bool {
		self.should_set_cookies
	}

	/// Returns whether HTTP pipelining may be used.
	pub fn use_pipelining(&self) -> bool {
		self.use_pipelining
	}

	/// Returns the headers added to every request before the request’s own headers.
	pub fn additional_headers(&self) -> &[(String, String)] {
		&self.additional_headers
	}

	/// Returns the minimum TLS version, if limited.
	pub fn tls_min(&self) -> Option<TlsVersion> {
		self.tls_min
	}

	/// Returns the maximum TLS version, if limited.
	pub fn tls_max(&self) -> Option<TlsVersion> {
		self.tls_max
	}

	/// Returns the maximum number of simultaneous connections to one host.
	pub fn max_connections_per_host(&self) -> usize {
		self.max_connections_per_host
	}

	/// Returns the shared container identifier for background transfers, if any.
	pub fn shared_container_identifier(&self) -> Option<&str> {
		self.shared_container_identifier.as_deref()
	}

	/// Returns the proxy, if any.
	pub fn proxy(&self) -> Option<&Proxy> {
		self.proxy.as_ref()
	}

	/// Returns the credential store.
	pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
		&self.credentials
	}

	/// Returns the cookie store.
	pub fn cookies(&self) -> &Arc<dyn CookieStore> {
		&self.cookies
	}

	/// Returns the directory downloads are written to.
	pub fn download_dir(&self) -> &Path {
		&self.download_dir
	}

	/// Returns the number of threads hooks run on.
	pub fn hook_threads(&self) -> usize {
		self.hook_threads
	}
}

impl Default for Configuration {
	fn default() -> Self {
		Self {
			request_timeout: Duration::from_secs(60),
			resource_timeout: Duration::from_secs(7 * 24 * 60 * 60),
			allow_cellular: true,
			service_type: ServiceType::default(),
			cache_policy: CachePolicy::default(),
			cookie_accept: CookieAcceptPolicy::default(),
			should_set_cookies: true,
			use_pipelining: false,
			additional_headers: Vec::new(),
			tls_min: None,
			tls_max: None,
			max_connections_per_host: 6,
			shared_container_identifier: None,
			proxy: None,
			credentials: Arc::new(MemoryCredentialStore::new()),
			cookies: Arc::new(MemoryCookieStore::new()),
			download_dir: std::env::temp_dir(),
			hook_threads: 1,
		}
	}
}

/// A builder for [`Configuration`].
#[derive(Debug)]
pub struct ConfigurationBuilder {
	config: Configuration,
	pending_credentials: Vec<(ProtectionSpace, Credential)>,
}

impl ConfigurationBuilder {
	/// Constructs a builder with the default settings.
	pub fn new() -> Self {
		Self {
			config: Configuration::default(),
			pending_credentials: Vec::new(),
		}
	}

	/// Sets the idle and whole-resource timeouts.
	#[must_use]
	pub fn timeouts(mut self, request: Duration, resource: Duration) -> Self {
		self.config.request_timeout = request;
		self.config.resource_timeout = resource;
		self
	}

	/// Sets whether cellular networks may be used.
	#[must_use]
	pub fn allow_cellular(mut self, allow: bool) -> Self {
		self.config.allow_cellular = allow;
		self
	}

	/// Sets the network service type hint.
	#[must_use]
	pub fn service_type(mut self, service_type: ServiceType) -> Self {
		self.config.service_type = service_type;
		self
	}

	/// Sets the cache policy.
	#[must_use]
	pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
		self.config.cache_policy = policy;
		self
	}

	/// Sets which response cookies are stored.
	#[must_use]
	pub fn cookie_accept(mut self, policy: CookieAcceptPolicy) -> Self {
		self.config.cookie_accept = policy;
		self
	}

	/// Sets whether stored cookies are attached to requests.
	#[must_use]
	pub fn should_set_cookies(mut self, allow: bool) -> Self {
		self.config.should_set_cookies = allow;
		self
	}

	/// Sets whether HTTP pipelining may be used.
	#[must_use]
	pub fn use_pipelining(mut self, allow: bool) -> Self {
		self.config.use_pipelining = allow;
		self
	}

	/// Replaces the headers added to every request.
	#[must_use]
	pub fn additional_headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
	where
		K: Into<String>,
		V: Into<String>,
	{
		self.config.additional_headers = headers
			.into_iter()
			.map(|(k, v)| (k.into(), v.into()))
			.collect();
		self
	}

	/// Limits the TLS versions offered.
	#[must_use]
	pub fn tls_versions(mut self, min: Option<TlsVersion>, max: Option<TlsVersion>) -> Self {
		self.config.tls_min = min;
		self.config.tls_max = max;
		self
	}

	/// Sets the maximum number of simultaneous connections to one host.
	#[must_use]
	pub fn max_connections_per_host(mut self, n: usize) -> Self {
		self.config.max_connections_per_host = n;
		self
	}

	/// Sets the shared container identifier for background transfers.
	#[must_use]
	pub fn shared_container_identifier(mut self, identifier: impl Into<String>) -> Self {
		self.config.shared_container_identifier = Some(identifier.into());
		self
	}

	/// Sets or clears the proxy.
	#[must_use]
	pub fn proxy(mut self, proxy: Option<Proxy>) -> Self {
		self.config.proxy = proxy;
		self
	}

	/// Replaces the credential store.
	#[must_use]
	pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
		self.config.credentials = store;
		self
	}

	/// Replaces the cookie store.
	#[must_use]
	pub fn cookie_store(mut self, store: Arc<dyn CookieStore>) -> Self {
		self.config.cookies = store;
		self
	}

	/// Sets the directory downloads are written to.
	#[must_use]
	pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.config.download_dir = dir.into();
		self
	}

	/// Sets the number of threads hooks run on.
	///
	/// With a single thread, hooks run in the order they were dispatched.
	#[must_use]
	pub fn hook_threads(mut self, n: usize) -> Self {
		self.config.hook_threads = n;
		self
	}

	/// Stores a Basic credential for the server of `url`.
	///
	/// URLs without a host are ignored.
	#[must_use]
	pub fn basic_auth(
		self,
		user: impl Into<String>,
		password: impl Into<String>,
		url: &Url,
		realm: Option<&str>,
	) -> Self {
		self.auth(AuthMethod::Basic, Credential::new(user, password), url, realm)
	}

	/// Stores a Digest credential for the server of `url`.
	///
	/// URLs without a host are ignored.
	#[must_use]
	pub fn digest_auth(
		self,
		user: impl Into<String>,
		password: impl Into<String>,
		url: &Url,
		realm: Option<&str>,
	) -> Self {
		self.auth(AuthMethod::Digest, Credential::new(user, password), url, realm)
	}

	fn auth(
		mut self,
		method: AuthMethod,
		credential: Credential,
		url: &Url,
		realm: Option<&str>,
	) -> Self {
		match ProtectionSpace::for_url(url, realm.map(str::to_owned), method) {
			Some(space) => self.pending_credentials.push((space, credential)),
			None => tracing::debug!(%url, "Ignoring credential for URL without a host"),
		}
		self
	}

	/// Validates the settings and produces the configuration.
	///
	/// Credentials added with [`basic_auth`](Self::basic_auth) and
	/// [`digest_auth`](Self::digest_auth) are written to the credential store at this point.
	///
	/// # Errors
	/// This function returns [`ConfigError::Zero`] if a timeout, the connection limit or the hook
	/// thread count is zero.
	pub fn build(self) -> Result<Configuration, ConfigError> {
		let config = self.config;
		if config.request_timeout.is_zero() {
			return Err(ConfigError::Zero("Request timeout"));
		}
		if config.resource_timeout.is_zero() {
			return Err(ConfigError::Zero("Resource timeout"));
		}
		if config.max_connections_per_host == 0 {
			return Err(ConfigError::Zero("Maximum connections per host"));
		}
		if config.hook_threads == 0 {
			return Err(ConfigError::Zero("Hook thread count"));
		}
		for (space, credential) in self.pending_credentials {
			config.credentials.add(space, credential);
		}
		Ok(config)
	}
}

impl Default for ConfigurationBuilder {
	fn default() -> Self {
		Self::new()
	}
}
