#![forbid(unsafe_code)]
#![warn(
	future_incompatible,
	nonstandard_style,
	rust_2018_idioms,
	unused
)]
#![warn(
	deprecated_in_future,
	missing_debug_implementations,
	missing_docs,
	// Disabled due to <https://github.com/rust-lang/rust/issues/69952> and
	// <https://github.com/rust-lang/rust/issues/77217>.
	// single_use_lifetimes,
	trivial_casts,
	trivial_numeric_casts,
	unused_crate_dependencies,
	unused_import_braces,
	// Disabled due to <https://github.com/rust-lang/rust/issues/77217>.
	// unused_lifetimes,
	unused_qualifications,
	unused_results
)]
#![warn(clippy::pedantic, clippy::cargo)]
// Disabled because we frequently mix u64 and usize, where the former is used for message body
// lengths and the latter for in-memory buffer sizes.
#![allow(clippy::cast_possible_truncation)]

//! Thread-safe HTTP exchanges over shared transport sessions
//!
//! `huntaway` pairs every HTTP request with an [`Exchange`], a handle that any number of threads
//! may share. The outcome of an exchange can be consumed three ways, freely mixed:
//! * by blocking: accessors such as [`Exchange::status_code`] wait for completion;
//! * by awaiting: [`Exchange::completion`] is a future that resolves on completion;
//! * by hooks: closures registered with [`Exchange::on_complete`] and friends run on a dedicated
//!   hook thread.
//!
//! Exchanges are multiplexed over sessions owned by a [`Client`]. Ordinary requests share the
//! client’s default session; applying a new [`Configuration`] replaces it, and the old session
//! retires once its remaining exchanges are closed. Large downloads and file uploads may instead
//! [outlast](Request::set_outlast) on a session of their own.
//!
//! The bytes themselves are moved by a [`Transport`](transport::Transport). With the `net` feature
//! (on by default), [`Client::new`] uses a bundled plain HTTP/1.1 transport; any other transport
//! can be plugged in through [`Client::with_transport`].
//!
//! # Example
//! ```no_run
//! let client = huntaway::Client::new().unwrap();
//!
//! // Blocking use.
//! let exchange = client.get("http://example.com/").unwrap();
//! exchange.tick();
//! println!("{} {}", exchange.status_code(), exchange.text().unwrap_or_default());
//! exchange.close();
//!
//! // Hook-based use.
//! let exchange = client.post("http://example.com/items", r#"{"name":"x"}"#).unwrap();
//! exchange
//!		.on_process(|progress| println!("{}", progress))
//!		.tick_with(|exchange, error| match error {
//!			None => println!("created: {}", exchange.status_code()),
//!			Some(e) => println!("failed: {}", e),
//!		});
//! exchange.wait();
//! exchange.close();
//! ```

mod client;
mod config;
mod dispatch;
pub mod error;
mod exchange;
mod progress;
mod request;
mod session;
pub mod store;
#[cfg(test)]
mod test_util;
pub mod transport;
mod util;

pub use client::Client;
pub use config::{
	Configuration, ConfigurationBuilder, CookieAcceptPolicy, Proxy, ProxyKind, TlsVersion,
};
pub use error::{ConfigError, SendError, TransferError};
pub use exchange::{Completion, Exchange};
pub use progress::{Direction, Progress};
pub use request::{CachePolicy, Method, Payload, Request, ServiceType, DEFAULT_TIMEOUT};
pub use store::{
	AuthMethod, Cookie, CookieStore, Credential, CredentialStore, MemoryCookieStore,
	MemoryCredentialStore, ProtectionSpace,
};
pub use util::IDENTIFIER_LEN;
