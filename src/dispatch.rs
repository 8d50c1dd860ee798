use crate::error::ConfigError;
use crossbeam_channel::{Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs caller hooks on a small pool of dedicated threads.
///
/// Hooks never run on the thread that triggered them. With one worker, hooks run in the order they
/// were dispatched. The workers exit once every clone of the dispatcher has been dropped and the
/// queue has drained.
#[derive(Clone, Debug)]
pub(crate) struct Dispatcher {
	tx: Sender<Job>,
}

impl Dispatcher {
	/// Starts `threads` workers.
	pub fn new(threads: usize) -> Result<Self, ConfigError> {
		if threads == 0 {
			return Err(ConfigError::Zero("Hook thread count"));
		}
		let (tx, rx) = crossbeam_channel::unbounded::<Job>();
		// On a spawn failure, workers already started see the channel disconnect when `tx` drops
		// and exit.
		for index in 0..threads {
			let rx = rx.clone();
			let _ = thread::Builder::new()
				.name(format!("huntaway-hooks-{index}"))
				.spawn(move || run(&rx))
				.map_err(ConfigError::Spawn)?;
		}
		Ok(Self { tx })
	}

	/// Queues a hook.
	pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
		if self.tx.send(Box::new(job)).is_err() {
			tracing::warn!("Hook dispatcher has shut down; dropping hook");
		}
	}
}

fn run(rx: &Receiver<Job>) {
	for job in rx {
		if catch_unwind(AssertUnwindSafe(job)).is_err() {
			tracing::warn!("Hook panicked");
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::time::Duration;

	/// Tests that a single worker runs hooks in order, off the calling thread.
	#[test]
	fn test_order() {
		let d = Dispatcher::new(1).unwrap();
		let (tx, rx) = crossbeam_channel::unbounded();
		let caller = thread::current().id();
		for i in 0..10 {
			let tx = tx.clone();
			d.spawn(move || {
				assert_ne!(thread::current().id(), caller);
				tx.send(i).unwrap();
			});
		}
		let got: Vec<i32> = (0..10)
			.map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
			.collect();
		assert_eq!(got, (0..10).collect::<Vec<_>>());
	}

	/// Tests that a panicking hook does not take the worker down.
	#[test]
	fn test_panic_isolated() {
		let d = Dispatcher::new(1).unwrap();
		let (tx, rx) = crossbeam_channel::unbounded();
		d.spawn(|| panic!("boom"));
		d.spawn(move || tx.send(()).unwrap());
		rx.recv_timeout(Duration::from_secs(5)).unwrap();
	}

	/// Tests that zero workers is rejected.
	#[test]
	fn test_zero() {
		assert!(matches!(Dispatcher::new(0), Err(ConfigError::Zero(_))));
	}
}
