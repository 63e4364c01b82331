//! Listening relation - reference-counted bookkeeping between a listener and
//! the source it subscribed to

use std::cell::Cell;
use std::rc::{Rc, Weak};

use ripple_core::ListenId;

use crate::emitter::Inner;

/// Shared by the listener's `listening_to` table and the source's
/// `listeners` table. Holds weak references only.
pub(crate) struct Listening<E> {
    pub(crate) source_id: ListenId,
    pub(crate) listener_id: ListenId,
    pub(crate) source: Weak<Inner<E>>,
    pub(crate) listener: Weak<Inner<E>>,
    /// Live handlers registered on the source through this relation
    pub(crate) count: Cell<usize>,
}

impl<E> Listening<E> {
    pub(crate) fn new(source: &Rc<Inner<E>>, listener: &Rc<Inner<E>>) -> Self {
        Listening {
            source_id: source.id,
            listener_id: listener.id,
            source: Rc::downgrade(source),
            listener: Rc::downgrade(listener),
            count: Cell::new(0),
        }
    }

    pub(crate) fn increment(&self) {
        self.count.set(self.count.get() + 1);
    }

    /// Returns true when the last handler went away
    pub(crate) fn decrement(&self) -> bool {
        let count = self.count.get().saturating_sub(1);
        self.count.set(count);
        count == 0
    }

    /// Drop this record from both tables
    pub(crate) fn detach(self: &Rc<Self>) {
        if let Some(source) = self.source.upgrade() {
            let mut listeners = source.listeners.borrow_mut();
            if listeners
                .get(&self.listener_id)
                .is_some_and(|l| Rc::ptr_eq(l, self))
            {
                listeners.remove(&self.listener_id);
            }
        }
        if let Some(listener) = self.listener.upgrade() {
            let mut listening_to = listener.listening_to.borrow_mut();
            if listening_to
                .get(&self.source_id)
                .is_some_and(|l| Rc::ptr_eq(l, self))
            {
                listening_to.remove(&self.source_id);
            }
        }
    }
}
