use std::{
	panic::{catch_unwind, AssertUnwindSafe},
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Barrier, Mutex, OnceLock,
	},
	thread,
};

use tendril::{
	policy::{Admits, ThreadSafe},
	LockPolicy, PerInstance, ProcessWide, Receiver, Signal, SingleThreaded, Slots, TryEmitError,
};

use _validator::{Probe, Validator};

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn thread_safe_policies_are_send_and_sync() {
	assert_send_sync::<Signal<i32, PerInstance>>();
	assert_send_sync::<Signal<i32, ProcessWide>>();
	assert_send_sync::<Slots<PerInstance>>();
	assert_send_sync::<Slots<ProcessWide>>();
	assert_send_sync::<Probe<PerInstance>>();
}

/// Emits into the signal it is connected to, from within its handler.
struct Echo<P: LockPolicy> {
	slots: Slots<P>,
	signal: OnceLock<Arc<Signal<i32, P>>>,
	results: Mutex<Vec<Result<(), TryEmitError>>>,
	calls: AtomicUsize,
}

impl<P: LockPolicy> Receiver<P> for Echo<P> {
	fn slots(&self) -> &Slots<P> {
		&self.slots
	}
}

impl<P: LockPolicy> Echo<P> {
	fn new() -> Arc<Self> {
		Arc::new(Self {
			slots: Slots::new(),
			signal: OnceLock::new(),
			results: Mutex::new(Vec::new()),
			calls: AtomicUsize::new(0),
		})
	}

	fn wire(self: &Arc<Self>, handler: fn(&Self, i32)) -> Arc<Signal<i32, P>>
	where
		P: Admits<Self>,
	{
		let signal = Arc::new(Signal::new());
		signal.connect(self, handler);
		assert!(self.signal.set(Arc::clone(&signal)).is_ok());
		signal
	}

	fn try_echo(&self, value: i32) {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let result = self.signal.get().unwrap().try_emit(value + 1);
		self.results.lock().unwrap().push(result);
	}

	fn echo(&self, value: i32) {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.signal.get().unwrap().emit(value + 1);
	}
}

fn try_emit_refuses_reentrancy<P: LockPolicy + Admits<Echo<P>>>() {
	let echo = Echo::<P>::new();
	let signal = echo.wire(Echo::try_echo);

	signal.emit(0);
	assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
	assert_eq!(
		*echo.results.lock().unwrap(),
		[Err(TryEmitError::WouldBlock)]
	);

	signal.emit(0);
	assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
	assert_eq!(echo.results.lock().unwrap().len(), 2);

	signal.disconnect_all();
}

#[test]
fn try_emit_refuses_reentrancy_single_threaded() {
	try_emit_refuses_reentrancy::<SingleThreaded>();
}

#[test]
fn try_emit_refuses_reentrancy_process_wide() {
	try_emit_refuses_reentrancy::<ProcessWide>();
}

#[test]
fn try_emit_refuses_reentrancy_per_instance() {
	try_emit_refuses_reentrancy::<PerInstance>();
}

/// Only for policies that detect re-entrancy. `PerInstance` deadlocks instead.
fn reentrant_emit_panics_and_unlocks<P: LockPolicy + Admits<Echo<P>>>() {
	let echo = Echo::<P>::new();
	let signal = echo.wire(Echo::echo);

	assert!(catch_unwind(AssertUnwindSafe(|| signal.emit(0))).is_err());
	assert_eq!(echo.calls.load(Ordering::SeqCst), 1);

	// The outer emission released the lock while unwinding.
	signal.disconnect_all();
	assert!(signal.is_empty());
	signal.emit(0);
	assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn reentrant_emit_panics_and_unlocks_single_threaded() {
	reentrant_emit_panics_and_unlocks::<SingleThreaded>();
}

#[test]
fn reentrant_emit_panics_and_unlocks_process_wide() {
	reentrant_emit_panics_and_unlocks::<ProcessWide>();
}

// `ProcessWide` is left out: any other test holding the process-wide lock would make `try_emit` fail.
fn try_emit_calls_handlers_when_unlocked<P: LockPolicy + Admits<Echo<P>>>() {
	let echo = Echo::<P>::new();
	let signal = echo.wire(Echo::try_echo);

	assert_eq!(signal.try_emit(0), Ok(()));
	assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn try_emit_calls_handlers_when_unlocked_single_threaded() {
	try_emit_calls_handlers_when_unlocked::<SingleThreaded>();
}

#[test]
fn try_emit_calls_handlers_when_unlocked_per_instance() {
	try_emit_calls_handlers_when_unlocked::<PerInstance>();
}

#[derive(Default)]
struct Gate {
	slots: Slots<PerInstance>,
	barrier: OnceLock<Arc<Barrier>>,
}

impl Receiver<PerInstance> for Gate {
	fn slots(&self) -> &Slots<PerInstance> {
		&self.slots
	}
}

impl Gate {
	fn hold(&self, (): ()) {
		let barrier = self.barrier.get().unwrap();
		// Entered.
		barrier.wait();
		// Released.
		barrier.wait();
	}
}

#[test]
fn try_emit_fails_while_another_thread_emits() {
	let gate = Arc::new(Gate::default());
	let barrier = Arc::new(Barrier::new(2));
	assert!(gate.barrier.set(Arc::clone(&barrier)).is_ok());

	let signal = Signal::<(), PerInstance>::new();
	signal.connect(&gate, Gate::hold);

	thread::scope(|scope| {
		scope.spawn(|| signal.emit(()));
		barrier.wait();
		assert_eq!(signal.try_emit(()), Err(TryEmitError::WouldBlock));
		barrier.wait();
	});
}

fn concurrent_connect_emit_and_drop<P>()
where
	P: ThreadSafe + Admits<Probe<P>>,
{
	const THREADS: usize = 4;
	const ROUNDS: usize = 100;

	let log = Arc::new(Validator::new());
	let shared = Signal::<i32, P>::new();
	let emitted = AtomicUsize::new(0);

	thread::scope(|scope| {
		for _ in 0..THREADS {
			scope.spawn(|| {
				for round in 0..ROUNDS {
					let r = Probe::<P>::new("r", &log);
					let local = Signal::<i32, P>::new();
					shared.connect(&r, Probe::first);
					local.connect(&r, Probe::second);
					shared.emit(1);
					emitted.fetch_add(1, Ordering::Relaxed);

					match round % 3 {
						0 => drop(r),
						1 => {
							shared.disconnect(&*r);
							assert!(r.slots().is_connected_to(&local));
							assert!(!r.slots().is_connected_to(&shared));
						}
						_ => {
							let copy = r.replicate();
							r.slots().disconnect_all();
							assert_eq!(r.slots().sender_count(), 0);
							assert_eq!(copy.slots().sender_count(), 2);
						}
					}
				}
			});
		}
	});

	assert_eq!(emitted.load(Ordering::Relaxed), THREADS * ROUNDS);
	assert!(shared.is_empty());
}

#[test]
fn concurrent_connect_emit_and_drop_per_instance() {
	concurrent_connect_emit_and_drop::<PerInstance>();
}

#[test]
fn concurrent_connect_emit_and_drop_process_wide() {
	concurrent_connect_emit_and_drop::<ProcessWide>();
}

fn receivers_dropped_on_other_threads_are_never_called<P>()
where
	P: ThreadSafe + Admits<Counter>,
	Counter: Receiver<P>,
{
	let signal = Signal::<(), P>::new();
	let live = Arc::new(Mutex::new(Vec::new()));

	thread::scope(|scope| {
		scope.spawn(|| {
			for _ in 0..200 {
				let counter = Arc::new(Counter::default());
				signal.connect(&counter, Counter::bump);
				live.lock().unwrap().push(counter);
				if live.lock().unwrap().len() > 8 {
					let oldest = live.lock().unwrap().remove(0);
					drop(oldest);
				}
			}
			live.lock().unwrap().clear();
		});
		scope.spawn(|| {
			for _ in 0..200 {
				signal.emit(());
			}
		});
	});

	assert!(signal.is_empty());
}

/// Asserts that it's never called after being dropped.
#[derive(Default)]
struct Counter {
	per_instance: Slots<PerInstance>,
	process_wide: Slots<ProcessWide>,
	calls: AtomicUsize,
	dropped: std::sync::atomic::AtomicBool,
}

impl Receiver<PerInstance> for Counter {
	fn slots(&self) -> &Slots<PerInstance> {
		&self.per_instance
	}
}

impl Receiver<ProcessWide> for Counter {
	fn slots(&self) -> &Slots<ProcessWide> {
		&self.process_wide
	}
}

impl Counter {
	fn bump(&self, (): ()) {
		assert!(!self.dropped.load(Ordering::SeqCst));
		self.calls.fetch_add(1, Ordering::Relaxed);
	}
}

impl Drop for Counter {
	fn drop(&mut self) {
		self.dropped.store(true, Ordering::SeqCst);
	}
}

#[test]
fn receivers_dropped_on_other_threads_are_never_called_per_instance() {
	receivers_dropped_on_other_threads_are_never_called::<PerInstance>();
}

#[test]
fn receivers_dropped_on_other_threads_are_never_called_process_wide() {
	receivers_dropped_on_other_threads_are_never_called::<ProcessWide>();
}

/// A gate that is already connected to a signal it can block.
fn gated() -> (Arc<Gate>, Arc<Barrier>, Signal<(), PerInstance>) {
	let gate = Arc::new(Gate::default());
	let barrier = Arc::new(Barrier::new(2));
	assert!(gate.barrier.set(Arc::clone(&barrier)).is_ok());
	let signal = Signal::new();
	signal.connect(&gate, Gate::hold);
	(gate, barrier, signal)
}

#[test]
fn signal_cloned_while_receiver_drops_keeps_no_connection_to_it() {
	let log = Arc::new(Validator::new());
	let (_gate, barrier, blocked) = gated();
	let r = Probe::<PerInstance>::new("r", &log);
	let other = Signal::<(), PerInstance>::new();
	blocked.connect(&r, |r, ()| r.first(1));
	other.connect(&r, |r, ()| r.first(2));

	let copy = thread::scope(|scope| {
		scope.spawn(|| blocked.emit(()));
		// The gate's handler now holds `blocked`'s lock.
		barrier.wait();

		// Visits `blocked` first and waits for it, with `other` still to go.
		scope.spawn(move || drop(r));
		thread::sleep(std::time::Duration::from_millis(50));
		let copy = other.clone();

		barrier.wait();
		copy
	});

	assert_eq!(blocked.connection_count(), 1);
	assert!(other.is_empty());
	assert!(copy.is_empty());
	copy.emit(());
	log.expect([]);
}

#[test]
fn receiver_replicated_while_signal_drops_is_not_registered_with_it() {
	let log = Arc::new(Validator::new());
	let (_gate, barrier, blocked) = gated();
	let r = Probe::<PerInstance>::new("r", &log);
	blocked.connect(&r, |r, ()| r.first(1));
	// Created after `blocked`, so it is visited second.
	let dropped = Signal::<i32, PerInstance>::new();
	dropped.connect(&r, Probe::first);
	assert_eq!(r.slots().sender_count(), 2);

	let copy = thread::scope(|scope| {
		scope.spawn(|| blocked.emit(()));
		barrier.wait();

		// Holds on to both signals while waiting for `blocked`.
		let replicating = scope.spawn(|| r.replicate());
		thread::sleep(std::time::Duration::from_millis(50));
		drop(dropped);

		barrier.wait();
		replicating.join().unwrap()
	});
	log.expect([("r", "first", 1)]);

	assert_eq!(r.slots().sender_count(), 1);
	assert_eq!(copy.slots().sender_count(), 1);
	assert!(copy.slots().is_connected_to(&blocked));
	assert_eq!(blocked.connection_count(), 3);

	blocked.disconnect_all();
	assert_eq!(copy.slots().sender_count(), 0);
}
