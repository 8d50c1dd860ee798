//! Shared credential and cookie stores.
//!
//! Both stores are collaborators that sessions consult but do not own: a store is handed to a
//! [`Configuration`](crate::Configuration) as an `Arc` and may be shared between many sessions
//! (and survive configuration changes). Implementations must be internally synchronized.

use parking_lot::RwLock;
use std::fmt::{Debug, Formatter};
use url::Url;

/// The authentication scheme a server asked for.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AuthMethod {
	/// HTTP Basic authentication.
	Basic,

	/// HTTP Digest authentication.
	Digest,

	/// Any other scheme.
	Other,
}

impl AuthMethod {
	/// Classifies the scheme token at the start of a `WWW-Authenticate` value.
	pub fn from_scheme(scheme: &str) -> Self {
		if scheme.eq_ignore_ascii_case("basic") {
			Self::Basic
		} else if scheme.eq_ignore_ascii_case("digest") {
			Self::Digest
		} else {
			Self::Other
		}
	}
}

/// Where a credential applies: host, port, URL scheme, realm and authentication method.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ProtectionSpace {
	/// The host name, compared case-insensitively.
	pub host: String,

	/// The port, with the scheme default filled in.
	pub port: u16,

	/// The URL scheme (`http` or `https`).
	pub scheme: String,

	/// The realm announced by the server, if any.
	pub realm: Option<String>,

	/// The authentication method.
	pub method: AuthMethod,
}

impl ProtectionSpace {
	/// Builds the protection space covering `url`.
	///
	/// Returns `None` if the URL has no host.
	pub fn for_url(url: &Url, realm: Option<String>, method: AuthMethod) -> Option<Self> {
		Some(Self {
			host: url.host_str()?.to_owned(),
			port: url.port_or_known_default().unwrap_or(80),
			scheme: url.scheme().to_owned(),
			realm,
			method,
		})
	}

	/// Returns whether both spaces refer to the same server (host and port).
	pub fn same_server(&self, other: &Self) -> bool {
		self.host.eq_ignore_ascii_case(&other.host) && self.port == other.port
	}
}

/// A username and password pair.
#[derive(Clone, Eq, PartialEq)]
pub struct Credential {
	user: String,
	password: String,
}

impl Credential {
	/// Constructs a new `Credential`.
	pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
		Self {
			user: user.into(),
			password: password.into(),
		}
	}

	/// Returns the username.
	pub fn user(&self) -> &str {
		&self.user
	}

	/// Returns the password.
	pub fn password(&self) -> &str {
		&self.password
	}
}

impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
		f.debug_struct("Credential")
			.field("user", &self.user)
			.field("password", &"<redacted>")
			.finish()
	}
}

/// A store of credentials keyed by protection space.
pub trait CredentialStore: Debug + Send + Sync {
	/// Adds a credential, replacing any existing one for the same space and username.
	fn add(&self, space: ProtectionSpace, credential: Credential);

	/// Returns the credentials worth offering to a server that challenged with `space`.
	///
	/// Candidates are distinct by username. Their order is the order in which they will be tried.
	fn candidates(&self, space: &ProtectionSpace) -> Vec<Credential>;
}

/// An in-memory [`CredentialStore`].
///
/// Candidates are all credentials stored for the challenging host and port. Those stored for the
/// challenge’s authentication method come first, each group in insertion order.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
	entries: RwLock<Vec<(ProtectionSpace, Credential)>>,
}

impl MemoryCredentialStore {
	/// Constructs an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the number of stored credentials.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Returns whether the store is empty.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

impl CredentialStore for MemoryCredentialStore {
	fn add(&self, space: ProtectionSpace, credential: Credential) {
		let mut entries = self.entries.write();
		match entries
			.iter_mut()
			.find(|(s, c)| *s == space && c.user == credential.user)
		{
			Some(entry) => entry.1 = credential,
			None => entries.push((space, credential)),
		}
	}

	fn candidates(&self, space: &ProtectionSpace) -> Vec<Credential> {
		let entries = self.entries.read();
		let same_server = || entries.iter().filter(|(s, _)| s.same_server(space));
		let preferred = same_server().filter(|(s, _)| s.method == space.method);
		let others = same_server().filter(|(s, _)| s.method != space.method);
		let mut ret: Vec<Credential> = Vec::new();
		for (_, credential) in preferred.chain(others) {
			if !ret.iter().any(|c| c.user == credential.user) {
				ret.push(credential.clone());
			}
		}
		ret
	}
}

/// A single name/value cookie scoped to a domain and path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cookie {
	/// The cookie name.
	pub name: String,

	/// The cookie value.
	pub value: String,

	/// The domain the cookie applies to, without a leading dot.
	pub domain: String,

	/// The path prefix the cookie applies to.
	pub path: String,
}

impl Cookie {
	/// Constructs a cookie scoped to the host and path of `url`.
	///
	/// Returns `None` if the URL has no host.
	pub fn for_url(name: impl Into<String>, value: impl Into<String>, url: &Url) -> Option<Self> {
		Some(Self {
			name: name.into(),
			value: value.into(),
			domain: url.host_str()?.to_ascii_lowercase(),
			path: url.path().to_owned(),
		})
	}

	/// Parses a `Set-Cookie` header value received in response to `url`.
	///
	/// Only the `Domain` and `Path` attributes are honoured. Returns `None` if the value has no
	/// `name=value` pair or the URL has no host.
	pub fn parse_set_cookie(header: &str, url: &Url) -> Option<Self> {
		let mut parts = header.split(';');
		let (name, value) = parts.next()?.split_once('=')?;
		let name = name.trim();
		if name.is_empty() {
			return None;
		}
		let mut cookie = Self {
			name: name.to_owned(),
			value: value.trim().trim_matches('"').to_owned(),
			domain: url.host_str()?.to_ascii_lowercase(),
			path: default_path(url.path()).to_owned(),
		};
		for attribute in parts {
			let (key, val) = attribute.split_once('=').unwrap_or((attribute, ""));
			let (key, val) = (key.trim(), val.trim());
			if key.eq_ignore_ascii_case("domain") && !val.is_empty() {
				cookie.domain = val.trim_start_matches('.').to_ascii_lowercase();
			} else if key.eq_ignore_ascii_case("path") && val.starts_with('/') {
				cookie.path = val.to_owned();
			}
		}
		Some(cookie)
	}

	/// Returns whether the cookie should be sent to `url`.
	pub fn matches(&self, url: &Url) -> bool {
		let host = match url.host_str() {
			Some(h) => h.to_ascii_lowercase(),
			None => return false,
		};
		let domain_ok = host == self.domain
			|| (host.ends_with(&self.domain)
				&& host.as_bytes()[host.len() - self.domain.len() - 1] == b'.');
		let path = url.path();
		let path_ok = path == self.path
			|| (path.starts_with(&self.path)
				&& (self.path.ends_with('/') || path.as_bytes()[self.path.len()] == b'/'));
		domain_ok && path_ok
	}
}

/// Computes the default cookie path for a request path: its directory, or `/`.
fn default_path(path: &str) -> &str {
	match path.rfind('/') {
		Some(0) | None => "/",
		Some(n) => &path[..n],
	}
}

/// A store of cookies.
pub trait CookieStore: Debug + Send + Sync {
	/// Returns the cookies applicable to `url`.
	fn cookies_for(&self, url: &Url) -> Vec<Cookie>;

	/// Stores cookies, replacing any with the same name, domain and path.
	fn set_cookies(&self, cookies: Vec<Cookie>);
}

/// An in-memory [`CookieStore`].
#[derive(Debug, Default)]
pub struct MemoryCookieStore {
	cookies: RwLock<Vec<Cookie>>,
}

impl MemoryCookieStore {
	/// Constructs an empty store.
	pub fn new() -> Self {
		Self::default()
	}
}

impl CookieStore for MemoryCookieStore {
	fn cookies_for(&self, url: &Url) -> Vec<Cookie> {
		self.cookies
			.read()
			.iter()
			.filter(|c| c.matches(url))
			.cloned()
			.collect()
	}

	fn set_cookies(&self, cookies: Vec<Cookie>) {
		let mut stored = self.cookies.write();
		for cookie in cookies {
			stored.retain(|c| {
				!(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path)
			});
			stored.push(cookie);
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn space(host: &str, method: AuthMethod) -> ProtectionSpace {
		ProtectionSpace::for_url(&Url::parse(host).unwrap(), None, method).unwrap()
	}

	/// Tests that candidates are host-matched, method-preferred and unique per username.
	#[test]
	fn test_candidates() {
		let store = MemoryCredentialStore::new();
		store.add(space("http://a.example", AuthMethod::Digest), Credential::new("dora", "1"));
		store.add(space("http://a.example", AuthMethod::Basic), Credential::new("bob", "2"));
		store.add(space("http://b.example", AuthMethod::Basic), Credential::new("eve", "3"));
		store.add(space("http://a.example", AuthMethod::Basic), Credential::new("dora", "4"));
		assert_eq!(store.len(), 4);

		let users: Vec<String> = store
			.candidates(&space("http://A.example/x", AuthMethod::Basic))
			.into_iter()
			.map(|c| c.user().to_owned())
			.collect();
		assert_eq!(users, ["bob", "dora"]);

		assert!(store
			.candidates(&space("http://a.example:8080", AuthMethod::Basic))
			.is_empty());
	}

	/// Tests that adding the same user and space replaces the password.
	#[test]
	fn test_replace() {
		let store = MemoryCredentialStore::new();
		let s = space("http://a.example", AuthMethod::Basic);
		store.add(s.clone(), Credential::new("bob", "old"));
		store.add(s.clone(), Credential::new("bob", "new"));
		assert_eq!(store.len(), 1);
		assert_eq!(store.candidates(&s)[0].password(), "new");
	}

	/// Tests that credentials never print their password.
	#[test]
	fn test_credential_debug() {
		let printed = format!("{:?}", Credential::new("bob", "hunter2"));
		assert!(printed.contains("bob"));
		assert!(!printed.contains("hunter2"));
	}

	/// Tests Set-Cookie parsing and matching.
	#[test]
	fn test_set_cookie() {
		let url = Url::parse("http://www.example.com/account/login").unwrap();
		let c = Cookie::parse_set_cookie("sid=abc123; Path=/account; HttpOnly", &url).unwrap();
		assert_eq!(c.name, "sid");
		assert_eq!(c.value, "abc123");
		assert_eq!(c.domain, "www.example.com");
		assert!(c.matches(&Url::parse("http://www.example.com/account/settings").unwrap()));
		assert!(!c.matches(&Url::parse("http://www.example.com/accounting").unwrap()));
		assert!(!c.matches(&Url::parse("http://example.com/account").unwrap()));

		let c = Cookie::parse_set_cookie("lang=en; Domain=.example.com", &url).unwrap();
		assert_eq!(c.path, "/account");
		assert!(c.matches(&Url::parse("http://api.example.com/account/x").unwrap()));
		assert!(!c.matches(&Url::parse("http://badexample.com/account").unwrap()));

		assert!(Cookie::parse_set_cookie("novalue", &url).is_none());
	}

	/// Tests that storing a cookie replaces an older one with the same identity.
	#[test]
	fn test_cookie_store() {
		let url = Url::parse("http://example.com/").unwrap();
		let store = MemoryCookieStore::new();
		store.set_cookies(vec![Cookie::for_url("a", "1", &url).unwrap()]);
		store.set_cookies(vec![
			Cookie::for_url("a", "2", &url).unwrap(),
			Cookie::for_url("b", "3", &url).unwrap(),
		]);
		let mut found: Vec<(String, String)> = store
			.cookies_for(&url)
			.into_iter()
			.map(|c| (c.name, c.value))
			.collect();
		found.sort();
		assert_eq!(
			found,
			[("a".to_owned(), "2".to_owned()), ("b".to_owned(), "3".to_owned())]
		);
	}
}
