//! Lock policies decide how [`Signal`](`crate::Signal`)s and receiver [`Slots`](`crate::Slots`) guard their bookkeeping.
//!
//! A policy is chosen once, as a type parameter, and **must** be the same for every signal and receiver that are
//! connected to each other. The type system enforces this: a `Signal<A, P>` only connects to receivers that
//! implement [`Receiver<P>`](`crate::Receiver`) for the same `P`.
//!
//! | Policy             | Locking                                  | Threads     | Re-entrant use of one object |
//! |--------------------|------------------------------------------|-------------|------------------------------|
//! | [`SingleThreaded`] | a borrow flag                            | `!Send`     | panics                       |
//! | [`ProcessWide`]    | one lock shared by the whole process     | `Send+Sync` | panics                       |
//! | [`PerInstance`]    | one [`parking_lot`] mutex per object     | `Send+Sync` | deadlocks                    |
//!
//! None of the locks are re-entrant *for the same object*: a handler that connects to, disconnects from or emits the
//! signal that is currently calling it cannot succeed. Use [`Signal::try_emit`](`crate::Signal::try_emit`) where that
//! can happen.

use core::{
	cell::Cell,
	sync::atomic::{AtomicBool, Ordering},
};

use lock_api::{GuardNoSend, RawMutex, RawReentrantMutex};
use scopeguard::{guard, ScopeGuard};

mod private {
	pub trait Sealed {}

	/// Not nameable outside this crate, so [`Admits`](`super::Admits`) can't be implemented downstream.
	pub trait Admits<T: ?Sized> {}
}

/// A mutual exclusion strategy shared by cooperating signals and receivers.
///
/// This trait is sealed. Pick one of [`SingleThreaded`], [`ProcessWide`] or [`PerInstance`].
pub trait LockPolicy: private::Sealed + 'static {
	/// The raw lock embedded into each signal and each receiver.
	type RawMutex: RawMutex;

	/// A short name used in diagnostics.
	const NAME: &'static str;
}

/// Policies whose signals and receivers may be shared between threads.
pub trait ThreadSafe: LockPolicy {}

/// Implemented by policies for the receiver types they can safely call into.
///
/// Thread-safe policies only admit `Send + Sync` receivers, since [`Signal::emit`](`crate::Signal::emit`) may run on
/// any thread that can see the signal.
pub trait Admits<T: ?Sized>: LockPolicy + private::Admits<T> {}
impl<P: LockPolicy + private::Admits<T>, T: ?Sized> Admits<T> for P {}

/// No cross-thread locking at all.
///
/// Signals and receivers using this policy are neither [`Send`] nor [`Sync`].
/// Instead of silently corrupting state, re-entrant access to one object panics.
#[derive(Debug)]
pub enum SingleThreaded {}

/// A single lock shared by every signal and receiver using this policy, process-wide.
///
/// Uses less memory than [`PerInstance`], but all signal activity in the process is serialised.
#[derive(Debug)]
pub enum ProcessWide {}

/// One lock per signal and per receiver.
///
/// Contention only happens between operations that touch the same objects.
#[derive(Debug)]
pub enum PerInstance {}

#[cfg(all(feature = "default_single_threaded", feature = "default_process_wide"))]
compile_error!("The `default_single_threaded` and `default_process_wide` features are mutually exclusive. Please only enable these in binaries, not in libraries.");

/// The policy used when none is specified.
///
/// [`PerInstance`], unless changed by the `default_single_threaded` or `default_process_wide` feature.
#[cfg(not(any(feature = "default_single_threaded", feature = "default_process_wide")))]
pub type DefaultPolicy = PerInstance;

/// The policy used when none is specified.
#[cfg(feature = "default_single_threaded")]
pub type DefaultPolicy = SingleThreaded;

/// The policy used when none is specified.
#[cfg(all(feature = "default_process_wide", not(feature = "default_single_threaded")))]
pub type DefaultPolicy = ProcessWide;

impl private::Sealed for SingleThreaded {}
impl LockPolicy for SingleThreaded {
	type RawMutex = RawFlagMutex;
	const NAME: &'static str = "single-threaded";
}
impl<T: ?Sized> private::Admits<T> for SingleThreaded {}

impl private::Sealed for ProcessWide {}
impl LockPolicy for ProcessWide {
	type RawMutex = RawProcessMutex;
	const NAME: &'static str = "process-wide";
}
impl ThreadSafe for ProcessWide {}
impl<T: ?Sized + Send + Sync> private::Admits<T> for ProcessWide {}

impl private::Sealed for PerInstance {}
impl LockPolicy for PerInstance {
	type RawMutex = parking_lot::RawMutex;
	const NAME: &'static str = "per-instance";
}
impl ThreadSafe for PerInstance {}
impl<T: ?Sized + Send + Sync> private::Admits<T> for PerInstance {}

/// The scoped lock of a policy. Locking yields a guard that releases on every exit path, including unwinding.
pub type PolicyMutex<P, T> = lock_api::Mutex<<P as LockPolicy>::RawMutex, T>;

/// Guard of a [`PolicyMutex`].
pub type PolicyMutexGuard<'a, P, T> = lock_api::MutexGuard<'a, <P as LockPolicy>::RawMutex, T>;

/// The raw lock of [`SingleThreaded`]: just a flag.
#[derive(Debug)]
pub struct RawFlagMutex {
	locked: Cell<bool>,
}

unsafe impl RawMutex for RawFlagMutex {
	#[allow(clippy::declare_interior_mutable_const)]
	const INIT: Self = Self {
		locked: Cell::new(false),
	};

	type GuardMarker = GuardNoSend;

	#[track_caller]
	fn lock(&self) {
		assert!(
			self.try_lock(),
			"Re-entrant access to a single-threaded signal or receiver. (Did a handler use the signal that is calling it?)"
		);
	}

	fn try_lock(&self) -> bool {
		!self.locked.replace(true)
	}

	unsafe fn unlock(&self) {
		self.locked.set(false);
	}

	fn is_locked(&self) -> bool {
		self.locked.get()
	}
}

/// Shared by all [`RawProcessMutex`] instances.
///
/// Re-entrant so that one thread can hold the locks of several *different* objects at once,
/// which e.g. [`Signal::connect`](`crate::Signal::connect`) does for the signal and the receiver.
static PROCESS_LOCK: RawReentrantMutex<parking_lot::RawMutex, parking_lot::RawThreadId> =
	RawReentrantMutex::INIT;

/// The raw lock of [`ProcessWide`].
///
/// Each instance only records whether it is held.
/// Exclusion between threads comes entirely from the one process-wide lock.
#[derive(Debug)]
pub struct RawProcessMutex {
	held: AtomicBool,
}

unsafe impl RawMutex for RawProcessMutex {
	#[allow(clippy::declare_interior_mutable_const)]
	const INIT: Self = Self {
		held: AtomicBool::new(false),
	};

	// The process-wide lock is owned by a thread.
	type GuardMarker = GuardNoSend;

	#[track_caller]
	fn lock(&self) {
		PROCESS_LOCK.lock();
		let process_lock = guard((), |()| unsafe {
			// SAFETY: Acquired just above, on this thread.
			PROCESS_LOCK.unlock();
		});

		// Only the thread holding `PROCESS_LOCK` touches `held`, so a set flag means that it's this one.
		assert!(
			!self.held.swap(true, Ordering::Relaxed),
			"Re-entrant access to a process-wide-locked signal or receiver. (Did a handler use the signal that is calling it?)"
		);
		ScopeGuard::into_inner(process_lock);
	}

	fn try_lock(&self) -> bool {
		if !PROCESS_LOCK.try_lock() {
			return false;
		}
		if self.held.swap(true, Ordering::Relaxed) {
			// SAFETY: Acquired just above, on this thread.
			unsafe { PROCESS_LOCK.unlock() };
			false
		} else {
			true
		}
	}

	unsafe fn unlock(&self) {
		self.held.store(false, Ordering::Relaxed);
		PROCESS_LOCK.unlock();
	}

	fn is_locked(&self) -> bool {
		self.held.load(Ordering::Relaxed)
	}
}
