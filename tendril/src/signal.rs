use core::{
	any::Any,
	fmt::{self, Debug, Formatter},
};
use std::sync::{Arc, Weak};

use tracing::{debug, trace, warn};

use crate::{
	connection::{Connection, MethodConnection},
	error::TryEmitError,
	id::{ReceiverId, SignalId},
	policy::{Admits, DefaultPolicy, LockPolicy, PolicyMutex, ThreadSafe},
	receiver::{Receiver, Sender, SlotsState},
};

type Connections<A, P> = Vec<Box<dyn Connection<A, P>>>;

/// An event source that synchronously calls every connected receiver's handler when emitted.
///
/// `A` is the argument passed to each handler. Use a tuple to pass several values.
///
/// Connections are called in the order they were made. A receiver is never called after the last strong
/// reference to it is gone, and dropping either side removes the connections between them.
///
/// Cloning a [`Signal`] creates an independent signal that starts out with the same connections.
///
/// # Re-entrancy
///
/// The signal's lock is held for the entire duration of [`emit`](`Signal::emit`). Handlers **must not**
/// [`connect`](`Signal::connect`) to, [`disconnect`](`Signal::disconnect`) from, [`emit`](`Signal::emit`)
/// or clone the signal that is currently calling them, and **must not** drop the last reference to another receiver
/// connected to it. Depending on the [`LockPolicy`] this panics ([`SingleThreaded`](`crate::SingleThreaded`),
/// [`ProcessWide`](`crate::ProcessWide`)) or deadlocks ([`PerInstance`](`crate::PerInstance`)).
///
/// [`try_emit`](`Signal::try_emit`) is the non-blocking alternative for emissions that may be re-entrant.
pub struct Signal<A: 'static, P: LockPolicy = DefaultPolicy> {
	core: Arc<SignalCore<A, P>>,
}

struct SignalCore<A: 'static, P: LockPolicy> {
	id: SignalId,
	this: Weak<Self>,
	links: PolicyMutex<P, Links<A, P>>,
}

struct Links<A: 'static, P: LockPolicy> {
	connections: Connections<A, P>,
	/// Set when the [`Signal`] is dropped. Receivers may still hold a strong reference to the core briefly,
	/// but can't add connections to it anymore.
	closed: bool,
}

// Connections are only created for receivers the policy admits, i.e. `Send + Sync` ones if it is thread-safe.
// Arguments are never stored.
unsafe impl<A: 'static, P: ThreadSafe> Send for SignalCore<A, P> {}
unsafe impl<A: 'static, P: ThreadSafe> Sync for SignalCore<A, P> {}

impl<A: 'static, P: LockPolicy> SignalCore<A, P> {
	fn sender(&self) -> Weak<dyn Sender<P>> {
		Weak::clone(&self.this) as Weak<dyn Sender<P>>
	}

	/// Removes all connections. With `close`, also turns away any later duplication into this core.
	fn clear(&self, close: bool) {
		let mut links = self.links.lock();
		links.closed |= close;
		if links.connections.is_empty() {
			return;
		}
		trace!(signal = %self.id, connections = links.connections.len(), close, "disconnecting signal");

		for connection in links.connections.drain(..) {
			// A receiver that's already gone clears its own sender set.
			if let Some(slots) = connection.slots() {
				slots.unregister_sender(self.id);
			}
		}
	}
}

impl<A: 'static, P: LockPolicy> Sender<P> for SignalCore<A, P> {
	fn slot_disconnect(&self, receiver: &SlotsState<P>) {
		let mut links = self.links.lock();
		let before = links.connections.len();
		links
			.connections
			.retain(|connection| connection.receiver() != receiver.id());
		receiver.unregister_sender(self.id);
		trace!(
			signal = %self.id,
			receiver = %receiver.id(),
			removed = before - links.connections.len(),
			"receiver disconnected itself"
		);
	}

	fn slot_duplicate(&self, original: ReceiverId, copy: &Arc<SlotsState<P>>, copy_target: &dyn Any) {
		let mut links = self.links.lock();
		if links.closed {
			trace!(signal = %self.id, copy = %copy.id(), "signal was dropped, nothing to duplicate");
			return;
		}

		let duplicates = links
			.connections
			.iter()
			.filter(|connection| connection.receiver() == original)
			.filter_map(|connection| {
				let duplicate = connection.duplicate(copy_target, copy);
				if duplicate.is_none() {
					warn!(
						signal = %self.id,
						original = %original,
						copy = %copy.id(),
						"connection was made through a different receiver type and can't be duplicated"
					);
				}
				duplicate
			})
			.collect::<Vec<_>>();

		if !duplicates.is_empty() && copy.register_sender(self.id, self.sender()) {
			trace!(
				signal = %self.id,
				original = %original,
				copy = %copy.id(),
				duplicated = duplicates.len(),
				"duplicated connections"
			);
			links.connections.extend(duplicates);
		}
	}
}

impl<A: 'static, P: LockPolicy> Signal<A, P> {
	/// Creates a new instance of [`Signal`] without connections.
	#[must_use]
	pub fn new() -> Self {
		Self {
			core: Arc::new_cyclic(|this| SignalCore {
				id: SignalId::next(),
				this: Weak::clone(this),
				links: PolicyMutex::<P, _>::new(Links {
					connections: Vec::new(),
					closed: false,
				}),
			}),
		}
	}

	/// This signal's identity, as tracked by connected receivers.
	#[must_use]
	pub fn id(&self) -> SignalId {
		self.core.id
	}

	/// Appends a connection that calls `handler` on `receiver` whenever this signal is emitted.
	///
	/// Connecting the same receiver and handler more than once is allowed.
	/// Each connection is called separately.
	///
	/// `handler` is usually a method, as in `signal.connect(&receiver, Receiver::method)`.
	pub fn connect<T>(&self, receiver: &Arc<T>, handler: fn(&T, A))
	where
		T: Receiver<P>,
		P: Admits<T>,
	{
		let slots = receiver.slots().state();
		let mut links = self.core.links.lock();
		// Only refused while the receiver is dropped, which can't overlap with holding an `Arc` to it.
		if !slots.register_sender(self.core.id, self.core.sender()) {
			return;
		}
		links
			.connections
			.push(Box::new(MethodConnection::new(receiver, handler)));
		trace!(
			signal = %self.core.id,
			receiver = %slots.id(),
			connections = links.connections.len(),
			"connected"
		);
	}

	/// Removes the *first* connection to `receiver`, if there is one.
	///
	/// Further connections to the same receiver stay in place. Call this repeatedly to remove them too, or use
	/// [`Slots::disconnect_all`](`crate::Slots::disconnect_all`) on the receiver's side to remove all at once.
	pub fn disconnect<T: Receiver<P> + ?Sized>(&self, receiver: &T) {
		let slots = receiver.slots().state();
		let mut links = self.core.links.lock();
		let connections = &mut links.connections;
		let Some(index) = connections
			.iter()
			.position(|connection| connection.receiver() == slots.id())
		else {
			return;
		};

		drop(connections.remove(index));
		if !connections
			.iter()
			.any(|connection| connection.receiver() == slots.id())
		{
			slots.unregister_sender(self.core.id);
		}
		trace!(signal = %self.core.id, receiver = %slots.id(), "disconnected");
	}

	/// Removes all connections.
	///
	/// Also runs when this instance is dropped.
	pub fn disconnect_all(&self) {
		self.core.clear(false);
	}

	/// Calls each connected handler with a clone of `args`, in connection order.
	///
	/// The last handler receives `args` itself.
	/// Receivers that are being dropped concurrently are skipped.
	///
	/// # Threading
	///
	/// Blocks while another thread connects, disconnects or emits this signal. See also [Re-entrancy](#re-entrancy).
	pub fn emit(&self, args: A)
	where
		A: Clone,
	{
		// Declared before the guard so that receivers kept alive for the call are released only after unlocking.
		let mut keep_alive = Vec::new();
		let links = self.core.links.lock();
		trace!(signal = %self.core.id, connections = links.connections.len(), "emitting");
		invoke_all(&links.connections, args, &mut keep_alive);
	}

	/// Like [`emit`](`Signal::emit`), but fails instead of blocking (or panicking) if this signal's lock is held.
	///
	/// This is the case while another thread uses this signal, or when called from within one of its own handlers.
	///
	/// # Errors
	///
	/// [`TryEmitError::WouldBlock`] iff the lock couldn't be acquired immediately. No handler was called.
	pub fn try_emit(&self, args: A) -> Result<(), TryEmitError>
	where
		A: Clone,
	{
		let mut keep_alive = Vec::new();
		let links = self
			.core
			.links
			.try_lock()
			.ok_or(TryEmitError::WouldBlock)?;
		trace!(signal = %self.core.id, connections = links.connections.len(), "emitting");
		invoke_all(&links.connections, args, &mut keep_alive);
		Ok(())
	}

	/// The number of connections, including duplicates and ones to receivers that are currently being dropped.
	#[must_use]
	pub fn connection_count(&self) -> usize {
		self.core.links.lock().connections.len()
	}

	/// Whether this signal has no connections at all.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.core.links.lock().connections.is_empty()
	}

	/// Whether at least one connection targets `receiver`.
	#[must_use]
	pub fn is_connected_to<T: Receiver<P> + ?Sized>(&self, receiver: &T) -> bool {
		let id = receiver.slots().id();
		self.core
			.links
			.lock()
			.connections
			.iter()
			.any(|connection| connection.receiver() == id)
	}
}

fn invoke_all<A: Clone, P: LockPolicy>(
	connections: &[Box<dyn Connection<A, P>>],
	args: A,
	keep_alive: &mut Vec<Arc<dyn Any>>,
) {
	if let Some((last, rest)) = connections.split_last() {
		for connection in rest {
			keep_alive.extend(connection.invoke(args.clone()));
		}
		keep_alive.extend(last.invoke(args));
	}
}

impl<A: 'static, P: LockPolicy> Default for Signal<A, P> {
	fn default() -> Self {
		Self::new()
	}
}

impl<A: 'static, P: LockPolicy> Clone for Signal<A, P> {
	/// Creates a new signal with a copy of each connection to a live receiver, in the same order.
	///
	/// The copies are registered with their receivers. Afterwards, both signals are independent.
	fn clone(&self) -> Self {
		let copy = Self::new();
		{
			let source = self.core.links.lock();
			let mut target = copy.core.links.lock();
			for connection in &source.connections {
				// A receiver that is being dropped refuses the registration, and its teardown won't see the copy.
				let registered = connection
					.slots()
					.is_some_and(|slots| slots.register_sender(copy.core.id, copy.core.sender()));
				if registered {
					target.connections.push(connection.clone_connection());
				}
			}
			debug!(
				original = %self.core.id,
				copy = %copy.core.id,
				connections = target.connections.len(),
				"cloned signal"
			);
		}
		copy
	}
}

impl<A: 'static, P: LockPolicy> Drop for Signal<A, P> {
	fn drop(&mut self) {
		self.core.clear(true);
	}
}

impl<A: 'static, P: LockPolicy> Debug for Signal<A, P> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Signal")
			.field("id", &self.core.id)
			.field("policy", &P::NAME)
			.field(
				"connections",
				&self.core.links.try_lock().map(|links| {
					links
						.connections
						.iter()
						.map(|connection| connection.receiver())
						.collect::<Vec<_>>()
				}),
			)
			.finish()
	}
}
