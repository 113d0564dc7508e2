use core::any::Any;
use std::sync::{Arc, Weak};

use crate::{
	id::ReceiverId,
	policy::LockPolicy,
	receiver::{Receiver, SlotsState},
};

/// One receiver and handler, as stored by a [`Signal`](`crate::Signal`).
///
/// Connections don't synchronise anything themselves. The owning signal's lock guards them.
pub(crate) trait Connection<A, P: LockPolicy> {
	/// The target's identity, available even after the target is gone.
	fn receiver(&self) -> ReceiverId;

	/// The target's sender set, if the target still exists.
	fn slots(&self) -> Option<Arc<SlotsState<P>>>;

	/// Calls the handler on the target, unless the target is gone.
	///
	/// **Returns** the strong reference used for the call.
	/// The caller decides when it is released, since that may drop the target.
	fn invoke(&self, args: A) -> Option<Arc<dyn Any>>;

	/// An identical copy with the same target.
	fn clone_connection(&self) -> Box<dyn Connection<A, P>>;

	/// A copy with the same handler, targeting `target` instead.
	///
	/// `target` is a [`Weak`] of the new receiver. **Returns** [`None`] if its type doesn't match.
	fn duplicate(
		&self,
		target: &dyn Any,
		slots: &Arc<SlotsState<P>>,
	) -> Option<Box<dyn Connection<A, P>>>;
}

/// Calls a plain function (usually a method) on the target.
pub(crate) struct MethodConnection<T, A, P: LockPolicy> {
	receiver: ReceiverId,
	slots: Weak<SlotsState<P>>,
	target: Weak<T>,
	handler: fn(&T, A),
}

impl<T: Receiver<P>, A, P: LockPolicy> MethodConnection<T, A, P> {
	pub(crate) fn new(target: &Arc<T>, handler: fn(&T, A)) -> Self {
		let slots = target.slots().state();
		Self {
			receiver: slots.id(),
			slots: Arc::downgrade(slots),
			target: Arc::downgrade(target),
			handler,
		}
	}
}

impl<T, A, P: LockPolicy> Clone for MethodConnection<T, A, P> {
	fn clone(&self) -> Self {
		Self {
			receiver: self.receiver,
			slots: Weak::clone(&self.slots),
			target: Weak::clone(&self.target),
			handler: self.handler,
		}
	}
}

impl<T: 'static, A: 'static, P: LockPolicy> Connection<A, P> for MethodConnection<T, A, P> {
	fn receiver(&self) -> ReceiverId {
		self.receiver
	}

	fn slots(&self) -> Option<Arc<SlotsState<P>>> {
		self.slots.upgrade()
	}

	fn invoke(&self, args: A) -> Option<Arc<dyn Any>> {
		let target = self.target.upgrade()?;
		(self.handler)(&target, args);
		Some(target)
	}

	fn clone_connection(&self) -> Box<dyn Connection<A, P>> {
		Box::new(self.clone())
	}

	fn duplicate(
		&self,
		target: &dyn Any,
		slots: &Arc<SlotsState<P>>,
	) -> Option<Box<dyn Connection<A, P>>> {
		let target = target.downcast_ref::<Weak<T>>()?;
		Some(Box::new(Self {
			receiver: slots.id(),
			slots: Arc::downgrade(slots),
			target: Weak::clone(target),
			handler: self.handler,
		}))
	}
}
