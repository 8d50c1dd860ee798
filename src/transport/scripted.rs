//! A transport driven by tests.
//!
//! Tasks never move bytes on their own. Tests inspect what the session asked for and feed events
//! back through [`Scripted::delegate`]. Invalidation is reported synchronously from
//! [`Transport::finish_tasks_and_invalidate`] or from the completion that empties the transport.

use super::{
	Delegate, OutgoingRequest, ResponseHead, TaskId, TaskKind, Transport, TransportFactory,
};
use crate::config::Configuration;
use crate::error::TransferError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};

#[derive(Default)]
struct Record {
	next: TaskId,
	created: Vec<(OutgoingRequest, TaskKind)>,
	resumed: Vec<TaskId>,
	suspended: Vec<TaskId>,
	cancelled: Vec<TaskId>,
	outstanding: HashSet<TaskId>,
	invalidating: bool,
	invalidations: usize,
}

pub(crate) struct Scripted {
	identifier: Option<String>,
	delegate: Weak<dyn Delegate>,
	record: Mutex<Record>,
}

impl Scripted {
	pub fn identifier(&self) -> Option<&str> {
		self.identifier.as_deref()
	}

	pub fn delegate(&self) -> Arc<dyn Delegate> {
		self.delegate.upgrade().expect("session dropped")
	}

	pub fn created(&self) -> Vec<(OutgoingRequest, TaskKind)> {
		self.record.lock().created.clone()
	}

	pub fn resumed(&self) -> Vec<TaskId> {
		self.record.lock().resumed.clone()
	}

	pub fn suspended(&self) -> Vec<TaskId> {
		self.record.lock().suspended.clone()
	}

	pub fn cancelled(&self) -> Vec<TaskId> {
		self.record.lock().cancelled.clone()
	}

	pub fn invalidations(&self) -> usize {
		self.record.lock().invalidations
	}

	/// Delivers the completion of a task and retires it from the transport.
	pub fn complete(&self, task: TaskId, head: Option<ResponseHead>, error: Option<TransferError>) {
		if let Some(delegate) = self.delegate.upgrade() {
			delegate.did_complete(task, head.as_ref(), error);
		}
		let invalidate = {
			let mut record = self.record.lock();
			let _ = record.outstanding.remove(&task);
			Self::take_invalidation(&mut record)
		};
		if invalidate {
			self.invalidate();
		}
	}

	fn take_invalidation(record: &mut Record) -> bool {
		if record.invalidating && record.outstanding.is_empty() && record.invalidations == 0 {
			record.invalidations = 1;
			true
		} else {
			false
		}
	}

	fn invalidate(&self) {
		if let Some(delegate) = self.delegate.upgrade() {
			delegate.did_become_invalid();
		}
	}
}

impl Transport for Scripted {
	fn create_task(&self, request: OutgoingRequest, kind: TaskKind) -> std::io::Result<TaskId> {
		let mut record = self.record.lock();
		if record.invalidating {
			return Err(std::io::Error::other("invalidated"));
		}
		record.next += 1;
		let id = record.next;
		record.created.push((request, kind));
		let _ = record.outstanding.insert(id);
		Ok(id)
	}

	fn resume(&self, task: TaskId) {
		self.record.lock().resumed.push(task);
	}

	fn suspend(&self, task: TaskId) {
		self.record.lock().suspended.push(task);
	}

	fn cancel(&self, task: TaskId) {
		let outstanding = {
			let mut record = self.record.lock();
			record.cancelled.push(task);
			record.outstanding.contains(&task)
		};
		if outstanding {
			self.complete(task, None, Some(TransferError::Cancelled));
		}
	}

	fn finish_tasks_and_invalidate(&self) {
		let invalidate = {
			let mut record = self.record.lock();
			record.invalidating = true;
			Self::take_invalidation(&mut record)
		};
		if invalidate {
			self.invalidate();
		}
	}

	fn outstanding_tasks(&self) -> usize {
		self.record.lock().outstanding.len()
	}
}

/// Opens [`Scripted`] transports and keeps every one it opened.
#[derive(Default)]
pub(crate) struct ScriptedFactory {
	opened: Mutex<Vec<Arc<Scripted>>>,
}

impl ScriptedFactory {
	pub fn opened(&self) -> Vec<Arc<Scripted>> {
		self.opened.lock().clone()
	}

	pub fn last(&self) -> Arc<Scripted> {
		self.opened.lock().last().cloned().expect("no transport opened")
	}
}

impl TransportFactory for ScriptedFactory {
	fn open(
		&self,
		_config: &Arc<Configuration>,
		identifier: Option<&str>,
		delegate: Weak<dyn Delegate>,
	) -> Arc<dyn Transport> {
		let transport = Arc::new(Scripted {
			identifier: identifier.map(str::to_owned),
			delegate,
			record: Mutex::new(Record::default()),
		});
		self.opened.lock().push(Arc::clone(&transport));
		transport
	}
}
