#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![warn(unreachable_pub)]
#![doc = include_str!("../README.md")]
//!
//! # Threading Notes
//!
//! Everything here is synchronous: handlers run on the thread that calls [`Signal::emit`], before it returns.
//! Whether signals and receivers can be shared between threads at all is decided by their [`LockPolicy`].

mod connection;
mod id;
mod receiver;
mod signal;

pub mod error;
pub mod policy;

pub use error::TryEmitError;
pub use id::{ReceiverId, SignalId};
pub use policy::{DefaultPolicy, LockPolicy, PerInstance, ProcessWide, SingleThreaded};
pub use receiver::{Receiver, Slots};
pub use signal::Signal;

#[doc = include_str!("../README.md")]
mod readme {}
