//! The seam between sessions and the code that moves bytes.
//!
//! A [`Transport`] multiplexes many tasks for one session and reports everything that happens to
//! them through the session’s [`Delegate`]. Transports are created by a [`TransportFactory`], once
//! per session, from the session’s configuration snapshot.
//!
//! Delegate methods may be called from any thread and concurrently for different tasks. For a
//! single task, a transport must deliver events in order, and [`Delegate::did_complete`] must be
//! the last event for that task and must be delivered exactly once.

#[cfg(feature = "net")]
pub mod net;
#[cfg(test)]
pub(crate) mod scripted;

use crate::config::Configuration;
use crate::error::TransferError;
use crate::request::{CachePolicy, Method, ServiceType};
use crate::store::{Credential, ProtectionSpace};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use url::Url;

/// Identifies a task within one transport.
pub type TaskId = u64;

/// Where an upload body comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UploadBody {
	/// In-memory bytes.
	Bytes(Vec<u8>),

	/// A local file.
	File(PathBuf),

	/// A stream obtained from [`Delegate::need_new_body_stream`] whenever the body is (re)sent.
	Streamed,
}

/// What a task does with the request and response bodies.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskKind {
	/// No request body; the response body is delivered through [`Delegate::did_receive_data`].
	Fetch,

	/// A request body; the response body is delivered through [`Delegate::did_receive_data`].
	Upload(UploadBody),

	/// No request body; the response body is written to a file and reported through
	/// [`Delegate::did_finish_downloading`].
	Download,
}

/// A fully resolved request as handed to a transport.
#[derive(Clone, Debug)]
pub struct OutgoingRequest {
	/// The method.
	pub method: Method,

	/// The target URL.
	pub url: Url,

	/// Headers to send, in order. Never contains the reserved headers.
	pub headers: Vec<(String, String)>,

	/// The timeout interval.
	pub timeout: Duration,

	/// The cache policy.
	pub cache_policy: CachePolicy,

	/// Whether cellular networks may be used.
	pub allow_cellular: bool,

	/// The network service type hint.
	pub service_type: ServiceType,

	/// Whether cookies are sent from and stored into the configured cookie store.
	pub handle_cookies: bool,
}

/// The status line and headers of a response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResponseHead {
	/// The status code.
	pub status: u16,

	/// The reason phrase.
	pub reason: String,

	/// The URL that produced this response.
	pub url: Url,

	/// The headers, in the order received.
	pub headers: Vec<(String, String)>,
}

/// An authentication challenge from a server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Challenge {
	/// Where the credential will apply.
	pub space: ProtectionSpace,

	/// How many times a credential has already been rejected for this task’s current request.
	pub previous_failure_count: usize,
}

/// How to answer a [`Challenge`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChallengeResponse {
	/// Retry the request with this credential.
	UseCredential(Credential),

	/// Do whatever the transport does by default, normally surfacing the 401 response.
	PerformDefaultHandling,
}

/// A multiplexer of tasks for one session.
pub trait Transport: Send + Sync {
	/// Creates a task in the suspended state.
	///
	/// # Errors
	/// This function returns an error if the transport cannot accept new tasks.
	fn create_task(&self, request: OutgoingRequest, kind: TaskKind) -> std::io::Result<TaskId>;

	/// Starts a new task or continues a suspended one.
	fn resume(&self, task: TaskId);

	/// Pauses a task.
	fn suspend(&self, task: TaskId);

	/// Cancels a task.
	///
	/// The task completes asynchronously with [`TransferError::Cancelled`].
	fn cancel(&self, task: TaskId);

	/// Stops accepting tasks and invalidates once all existing tasks have completed.
	///
	/// Invalidation is reported exactly once, through [`Delegate::did_become_invalid`].
	fn finish_tasks_and_invalidate(&self);

	/// Returns the number of tasks that have not completed.
	fn outstanding_tasks(&self) -> usize;
}

/// Creates one transport per session.
pub trait TransportFactory: Send + Sync {
	/// Opens a transport.
	///
	/// `identifier` is set for outlasting sessions. The delegate cannot be upgraded until this
	/// function has returned.
	fn open(
		&self,
		config: &Arc<Configuration>,
		identifier: Option<&str>,
		delegate: Weak<dyn Delegate>,
	) -> Arc<dyn Transport>;
}

/// Receives task events from a transport.
pub trait Delegate: Send + Sync {
	/// Reports request body bytes sent.
	fn did_send_body_data(&self, task: TaskId, sent: i64, total_sent: i64, expected: i64);

	/// Delivers a chunk of the response body of a fetch or upload task.
	fn did_receive_data(&self, task: TaskId, data: &[u8]);

	/// Reports response body bytes received; `expected` is negative if unknown.
	fn did_receive_progress(&self, task: TaskId, received: i64, total_received: i64, expected: i64);

	/// Reports that a download continues from `offset` rather than from the start.
	fn did_resume_at_offset(&self, task: TaskId, offset: i64, expected: i64);

	/// Asks how to answer an authentication challenge.
	fn did_receive_challenge(&self, task: TaskId, challenge: &Challenge) -> ChallengeResponse;

	/// Asks whether to follow a redirect.
	///
	/// If this returns `false`, the redirect response itself becomes the task’s final response.
	fn will_redirect(&self, task: TaskId, response: &ResponseHead, new_url: &Url) -> bool;

	/// Asks for a fresh copy of a streamed upload body.
	fn need_new_body_stream(&self, task: TaskId) -> Option<Box<dyn Read + Send>>;

	/// Reports that a download task has written its body to `location`.
	///
	/// The file belongs to the receiver from then on.
	fn did_finish_downloading(&self, task: TaskId, location: &Path);

	/// Reports the end of a task.
	fn did_complete(&self, task: TaskId, response: Option<&ResponseHead>, error: Option<TransferError>);

	/// Reports that all events queued for an outlasting session while the process was away have
	/// been delivered.
	fn did_finish_events_for_background(&self);

	/// Reports that the transport has been invalidated.
	fn did_become_invalid(&self);
}
