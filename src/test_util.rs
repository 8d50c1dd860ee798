use crate::config::Configuration;
use crate::dispatch::Dispatcher;
use crate::request::{Method, Request};
use crate::session::Session;
use crate::transport::scripted::{Scripted, ScriptedFactory};
use crate::transport::ResponseHead;
use std::sync::{Arc, Weak};
use url::Url;

pub fn request(url: &str, method: Method) -> Request {
	Request::new(Url::parse(url).unwrap(), method)
}

pub fn head(status: u16, url: &str) -> ResponseHead {
	ResponseHead {
		status,
		reason: "Status".to_owned(),
		url: Url::parse(url).unwrap(),
		headers: Vec::new(),
	}
}

/// Opens an ownerless session over a scripted transport.
pub fn scripted_session_with(config: Configuration) -> (Arc<Session>, Arc<Scripted>) {
	let factory = ScriptedFactory::default();
	let session = Session::new(
		&factory,
		Arc::new(config),
		None,
		Dispatcher::new(1).unwrap(),
		Weak::new(),
	);
	(session, factory.last())
}

pub fn scripted_session() -> (Arc<Session>, Arc<Scripted>) {
	scripted_session_with(Configuration::default())
}
