use core::{
	any::Any,
	fmt::{self, Debug, Formatter},
};
use std::{
	collections::BTreeMap,
	mem,
	sync::{Arc, Weak},
};

use tracing::{debug, trace};

use crate::{
	id::{ReceiverId, SignalId},
	policy::{Admits, DefaultPolicy, LockPolicy, PolicyMutex, ThreadSafe},
	Signal,
};

/// Implemented by signal cores, so that receivers can call back into the signals pointing at them.
pub(crate) trait Sender<P: LockPolicy> {
	/// Removes *all* connections targeting `receiver` and forgets this sender on its side.
	fn slot_disconnect(&self, receiver: &SlotsState<P>);

	/// Appends a copy of each connection targeting `original`, retargeted to `copy_target` (a [`Weak`] of the copy).
	fn slot_duplicate(&self, original: ReceiverId, copy: &Arc<SlotsState<P>>, copy_target: &dyn Any);
}

type Senders<P> = Vec<(SignalId, Weak<dyn Sender<P>>)>;

/// The sender set of one receiver.
///
/// Connections hold a [`Weak`] to this so that signals can update it without reaching the receiver itself.
pub(crate) struct SlotsState<P: LockPolicy> {
	id: ReceiverId,
	senders: PolicyMutex<P, SenderSet<P>>,
}

struct SenderSet<P: LockPolicy> {
	senders: BTreeMap<SignalId, Weak<dyn Sender<P>>>,
	/// Set while the owning receiver is dropped. Signals can't register anymore afterwards.
	closed: bool,
}

// The only non-thread-safe contents are the `dyn Sender<P>`s, which are signal cores of the same policy.
unsafe impl<P: ThreadSafe> Send for SlotsState<P> {}
unsafe impl<P: ThreadSafe> Sync for SlotsState<P> {}

impl<P: LockPolicy> SlotsState<P> {
	fn new() -> Self {
		Self {
			id: ReceiverId::next(),
			senders: PolicyMutex::<P, _>::new(SenderSet {
				senders: BTreeMap::new(),
				closed: false,
			}),
		}
	}

	pub(crate) fn id(&self) -> ReceiverId {
		self.id
	}

	/// **Idempotent.**
	///
	/// **Returns** `false` iff the receiver is being dropped.
	/// The caller **must not** keep its connection to it in that case, since nothing would remove it.
	#[must_use]
	pub(crate) fn register_sender(&self, id: SignalId, sender: Weak<dyn Sender<P>>) -> bool {
		let mut set = self.senders.lock();
		if set.closed {
			return false;
		}
		set.senders.entry(id).or_insert(sender);
		true
	}

	/// No-op for unknown senders.
	pub(crate) fn unregister_sender(&self, id: SignalId) {
		self.senders.lock().senders.remove(&id);
	}

	/// Copies the sender set out so that no receiver lock is held while calling into signals.
	fn snapshot(&self) -> Senders<P> {
		self.senders
			.lock()
			.senders
			.iter()
			.map(|(id, sender)| (*id, Weak::clone(sender)))
			.collect()
	}

	/// Takes the sender set and refuses further registrations, in one step.
	///
	/// Any signal that registered before is in the result. Any signal that tries afterwards is turned away,
	/// so no connection can be added behind the back of the teardown.
	fn close(&self) -> Senders<P> {
		let mut set = self.senders.lock();
		set.closed = true;
		mem::take(&mut set.senders).into_iter().collect()
	}

	fn disconnect_senders(&self, senders: Senders<P>) {
		for (id, sender) in senders {
			match sender.upgrade() {
				// Updates both sides while holding the signal's lock.
				Some(sender) => sender.slot_disconnect(self),
				None => self.unregister_sender(id),
			}
		}
	}
}

/// The receiver capability, meant to be embedded as a field.
///
/// Tracks every [`Signal`] that holds at least one connection to the receiver owning it.
/// Dropping a [`Slots`] (usually as part of its receiver) disconnects it from all of them.
///
/// Cloning yields a *fresh*, unconnected instance with a new [`ReceiverId`], so that receiver types can simply
/// `#[derive(Clone)]`. Use [`Receiver::replicate`] to copy a receiver including its inbound connections.
pub struct Slots<P: LockPolicy = DefaultPolicy> {
	state: Arc<SlotsState<P>>,
}

impl<P: LockPolicy> Slots<P> {
	/// Creates a new instance of [`Slots`] without any senders.
	#[must_use]
	pub fn new() -> Self {
		Self {
			state: Arc::new(SlotsState::new()),
		}
	}

	/// The identity connections are matched against.
	#[must_use]
	pub fn id(&self) -> ReceiverId {
		self.state.id
	}

	/// The number of distinct signals currently connected to this receiver.
	///
	/// A signal with several connections to this receiver is counted once.
	#[must_use]
	pub fn sender_count(&self) -> usize {
		self.state.senders.lock().senders.len()
	}

	/// Whether `signal` currently holds at least one connection to this receiver.
	#[must_use]
	pub fn is_connected_to<A: 'static>(&self, signal: &Signal<A, P>) -> bool {
		self.state.senders.lock().senders.contains_key(&signal.id())
	}

	/// Asks every connected signal to drop all of its connections to this receiver.
	///
	/// Afterwards the sender set is empty, unless another thread connected a signal in the meantime.
	///
	/// Also runs when this instance is dropped. From then on, signals can't connect to or be copied onto this
	/// receiver anymore.
	///
	/// # Threading
	///
	/// This locks each connected signal in turn and **will** deadlock or panic (depending on the [`LockPolicy`]) if
	/// called from a handler of one of them on the same thread.
	pub fn disconnect_all(&self) {
		let senders = self.state.snapshot();
		if senders.is_empty() {
			return;
		}
		trace!(receiver = %self.state.id, senders = senders.len(), "disconnecting receiver");
		self.state.disconnect_senders(senders);
	}

	/// Wires `copy` to every signal `original` is connected to.
	///
	/// Each such signal appends a duplicate of each of its connections targeting `original`, with the same handler
	/// but targeting `copy`, in their original relative order. `original`'s own connections are unchanged.
	///
	/// Connections that were made through a receiver type other than `T` (e.g. a wrapper exposing the same
	/// [`Slots`]) can't be retargeted and are skipped.
	pub fn replicate<T>(original: &T, copy: &Arc<T>)
	where
		T: Receiver<P>,
		P: Admits<T>,
	{
		let original = &original.slots().state;
		let copy_state = &copy.slots().state;
		if original.id == copy_state.id {
			return;
		}

		// Upgraded up front. A signal dropped meanwhile is closed and ignores the request.
		let senders = original
			.snapshot()
			.into_iter()
			.filter_map(|(_, sender)| sender.upgrade())
			.collect::<Vec<_>>();

		let copy_target: Weak<T> = Arc::downgrade(copy);
		for sender in senders {
			sender.slot_duplicate(original.id, copy_state, &copy_target);
		}
		debug!(original = %original.id, copy = %copy_state.id, "replicated receiver");
	}

	pub(crate) fn state(&self) -> &Arc<SlotsState<P>> {
		&self.state
	}
}

impl<P: LockPolicy> Default for Slots<P> {
	fn default() -> Self {
		Self::new()
	}
}

impl<P: LockPolicy> Clone for Slots<P> {
	/// Connections aren't carried over. See [`Receiver::replicate`].
	fn clone(&self) -> Self {
		Self::new()
	}
}

impl<P: LockPolicy> Drop for Slots<P> {
	fn drop(&mut self) {
		let senders = self.state.close();
		if !senders.is_empty() {
			trace!(receiver = %self.state.id, senders = senders.len(), "dropping connected receiver");
			self.state.disconnect_senders(senders);
		}
	}
}

impl<P: LockPolicy> Debug for Slots<P> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Slots")
			.field("id", &self.state.id)
			.field("policy", &P::NAME)
			.field(
				"senders",
				&self
					.state
					.senders
					.try_lock()
					.map(|set| set.senders.keys().copied().collect::<Vec<_>>()),
			)
			.finish()
	}
}

/// Any type that can be the target of a [`Signal`] connection.
///
/// Receivers are connected through an [`Arc`], and are only ever called while at least one strong reference
/// to them exists. Once the last one is gone, no signal will call into it again, and dropping its [`Slots`]
/// removes the remaining connections.
///
/// ```
/// use std::sync::{atomic::{AtomicI32, Ordering}, Arc};
/// use tendril::{Receiver, Signal, Slots};
///
/// #[derive(Default)]
/// struct Counter {
/// 	slots: Slots,
/// 	total: AtomicI32,
/// }
///
/// impl Receiver for Counter {
/// 	fn slots(&self) -> &Slots {
/// 		&self.slots
/// 	}
/// }
///
/// impl Counter {
/// 	fn add(&self, amount: i32) {
/// 		self.total.fetch_add(amount, Ordering::Relaxed);
/// 	}
/// }
///
/// let counter = Arc::new(Counter::default());
/// let signal = Signal::<i32>::new();
/// signal.connect(&counter, Counter::add);
/// signal.emit(2);
/// signal.emit(3);
/// assert_eq!(counter.total.load(Ordering::Relaxed), 5);
/// ```
pub trait Receiver<P: LockPolicy = DefaultPolicy>: 'static {
	/// The embedded receiver state.
	///
	/// This **must** return the same instance on every call.
	fn slots(&self) -> &Slots<P>;

	/// Clones this receiver, then connects the clone to every signal this one is connected to,
	/// using the same handlers.
	///
	/// A subsequent emission of a shared signal reaches both receivers.
	/// See [`Slots::replicate`].
	#[must_use]
	fn replicate(self: &Arc<Self>) -> Arc<Self>
	where
		Self: Sized + Clone,
		P: Admits<Self>,
	{
		let copy = Arc::new((**self).clone());
		Slots::<P>::replicate(&**self, &copy);
		copy
	}
}
