//! Serialized publication of session events.
//!
//! Every publish request is queued and handled by a single drain task, one
//! entry at a time in submission order, so at most one publish call from this
//! queue is ever in flight. The entry deque and the running flag share one
//! mutex, which keeps the guarantee on a multi-threaded runtime.
//!
//! # Flow
//!
//! 1. Caller submits a session; an entry with a oneshot completion is queued
//! 2. If no drain task is running, one is spawned and the flag is set
//! 3. The drain task pops the front entry and awaits its publish
//! 4. The outcome resolves only that entry's completion
//! 5. When the deque is empty the flag is cleared under the same lock

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::client::SessionHandle;
use crate::error::{Error, Result};

struct PublishEntry {
	session: SessionHandle,
	done: oneshot::Sender<Result<()>>,
}

#[derive(Default)]
struct QueueState {
	entries: VecDeque<PublishEntry>,
	running: bool,
}

/// Pending completion for one submitted publish.
pub struct PublishTicket {
	rx: oneshot::Receiver<Result<()>>,
}

impl PublishTicket {
	/// Resolves once this entry's publish has finished.
	pub async fn wait(self) -> Result<()> {
		self.rx
			.await
			.map_err(|_| Error::Publish(anyhow!("publish queue dropped the request")))?
	}
}

#[derive(Clone, Default)]
pub struct PublishQueue {
	state: Arc<Mutex<QueueState>>,
}

impl PublishQueue {
	pub fn new() -> Self {
		Self::default()
	}

	/// Publishes `session` after every previously submitted entry.
	pub async fn publish_context(&self, session: SessionHandle) -> Result<()> {
		self.submit(session).wait().await
	}

	/// Queues `session` and returns its ticket without waiting.
	///
	/// Must be called from within a tokio runtime. The entry is published even
	/// if the ticket is dropped.
	pub fn submit(&self, session: SessionHandle) -> PublishTicket {
		let (done, rx) = oneshot::channel();
		let start_drain = {
			let mut state = self.state.lock();
			state.entries.push_back(PublishEntry { session, done });
			!std::mem::replace(&mut state.running, true)
		};
		if start_drain {
			tokio::spawn(drain(Arc::clone(&self.state)));
		}
		PublishTicket { rx }
	}

	/// Entries waiting behind the one in flight.
	pub fn pending(&self) -> usize {
		self.state.lock().entries.len()
	}

	pub fn is_draining(&self) -> bool {
		self.state.lock().running
	}
}

async fn drain(state: Arc<Mutex<QueueState>>) {
	debug!(target = "edge_context.publish", "drain started");
	loop {
		let entry = {
			let mut state = state.lock();
			match state.entries.pop_front() {
				Some(entry) => entry,
				None => {
					state.running = false;
					break;
				}
			}
		};

		let user_id = entry.session.unit_ids().user_id.clone();
		let session = entry.session;
		// A panicking publish surfaces as a JoinError instead of killing the loop.
		let outcome = match tokio::spawn(async move { session.publish().await }).await {
			Ok(Ok(())) => Ok(()),
			Ok(Err(err)) => Err(Error::Publish(err)),
			Err(join) => Err(Error::Publish(anyhow!("publish task aborted: {join}"))),
		};

		match &outcome {
			Ok(()) => debug!(target = "edge_context.publish", %user_id, "published"),
			Err(err) => warn!(target = "edge_context.publish", %user_id, error = %err, "publish failed"),
		}
		let _ = entry.done.send(outcome);
	}
	debug!(target = "edge_context.publish", "drain finished");
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::testing::{FakeSession, PublishEvent, PublishJournal};

	fn session(user: &str, journal: &PublishJournal, delay_ms: u64) -> Arc<FakeSession> {
		Arc::new(
			FakeSession::for_user(user)
				.with_journal(journal.clone())
				.with_publish_delay(Duration::from_millis(delay_ms)),
		)
	}

	#[tokio::test(start_paused = true)]
	async fn single_publish_resolves() {
		let journal = PublishJournal::default();
		let queue = PublishQueue::new();
		let s = session("u1", &journal, 10);
		queue.publish_context(s.clone()).await.unwrap();
		assert_eq!(s.publish_calls(), 1);
		tokio::task::yield_now().await;
		assert!(!queue.is_draining());
	}

	#[tokio::test(start_paused = true)]
	async fn entries_run_fifo_without_overlap() {
		let journal = PublishJournal::default();
		let queue = PublishQueue::new();
		// Later submissions finish faster; serialization must still hold.
		let tickets: Vec<_> = [("a", 50), ("b", 30), ("c", 10), ("d", 1)]
			.into_iter()
			.map(|(user, delay)| queue.submit(session(user, &journal, delay)))
			.collect();
		assert!(queue.is_draining());

		for ticket in tickets {
			ticket.wait().await.unwrap();
		}

		assert_eq!(journal.start_order(), ["a", "b", "c", "d"]);
		assert_eq!(journal.max_in_flight(), 1);
		assert_eq!(
			journal.events()[..2],
			[PublishEvent::Started("a".into()), PublishEvent::Finished("a".into())]
		);
	}

	#[tokio::test(start_paused = true)]
	async fn failure_rejects_only_its_own_entry() {
		let journal = PublishJournal::default();
		let queue = PublishQueue::new();
		let failing = Arc::new(FakeSession::for_user("bad").with_journal(journal.clone()).with_publish_failure());

		let first = queue.submit(session("a", &journal, 5));
		let second = queue.submit(failing);
		let third = queue.submit(session("c", &journal, 5));

		assert!(first.wait().await.is_ok());
		assert!(matches!(second.wait().await, Err(Error::Publish(_))));
		assert!(third.wait().await.is_ok());
		assert_eq!(journal.start_order(), ["a", "bad", "c"]);
	}

	#[tokio::test(start_paused = true)]
	async fn dropped_ticket_still_publishes_and_queue_restarts() {
		let journal = PublishJournal::default();
		let queue = PublishQueue::new();
		let s = session("a", &journal, 5);
		drop(queue.submit(s.clone()));
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(s.publish_calls(), 1);
		assert!(!queue.is_draining());
		assert_eq!(queue.pending(), 0);

		queue.publish_context(session("b", &journal, 1)).await.unwrap();
		assert_eq!(journal.start_order(), ["a", "b"]);
	}
}
