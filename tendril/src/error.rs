//! Error types.

use thiserror::Error;

/// Returned by [`Signal::try_emit`](`crate::Signal::try_emit`).
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryEmitError {
	/// The signal's lock is currently held, by another thread or by the caller (re-entrantly).
	#[error("the signal is locked by an ongoing operation; emitting now would block")]
	WouldBlock,
}
