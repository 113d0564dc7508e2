//! Process-unique identity symbols for signals and receivers.
//!
//! Identity is what the bookkeeping is keyed by: a receiver's sender set is keyed by [`SignalId`],
//! and connections are matched against their target's [`ReceiverId`].

use core::{
	fmt::{self, Debug, Display, Formatter},
	num::NonZeroU64,
	sync::atomic::{AtomicU64, Ordering},
};

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn next() -> NonZeroU64 {
	(COUNTER.fetch_add(1, Ordering::Relaxed) + 1)
		.try_into()
		.expect("infallible within reasonable time")
}

/// Identifies one [`Signal`](`crate::Signal`) for as long as the process runs.
///
/// Clones of a signal are different signals with distinct ids.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignalId(NonZeroU64);

/// Identifies one receiver's [`Slots`](`crate::Slots`) for as long as the process runs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReceiverId(NonZeroU64);

impl SignalId {
	pub(crate) fn next() -> Self {
		Self(next())
	}
}

impl ReceiverId {
	pub(crate) fn next() -> Self {
		Self(next())
	}
}

impl Debug for SignalId {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "SignalId({})", self.0)
	}
}

impl Display for SignalId {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "S{}", self.0)
	}
}

impl Debug for ReceiverId {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "ReceiverId({})", self.0)
	}
}

impl Display for ReceiverId {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "R{}", self.0)
	}
}
