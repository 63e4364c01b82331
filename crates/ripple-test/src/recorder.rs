//! Event recorder - captures the names an entity emits

use std::cell::RefCell;
use std::rc::Rc;

use ripple_events::{Callback, Events, ALL};
use ripple_state::Event;

/// Records every event name emitted by one entity, in dispatch order
pub struct EventRecorder {
    log: Rc<RefCell<Vec<String>>>,
    callback: Callback<Event>,
}

impl EventRecorder {
    /// Start recording `target`'s events
    pub fn attach<T: Events<Event>>(target: &T) -> Self {
        let log: Rc<RefCell<Vec<String>>> = Rc::default();
        let sink = Rc::clone(&log);
        let callback = target.on(ALL, move |name, _| sink.borrow_mut().push(name.to_string()));
        EventRecorder { log, callback }
    }

    /// Stop recording
    pub fn detach<T: Events<Event>>(&self, target: &T) {
        target.off(Some(ALL), Some(&self.callback), None);
    }

    pub fn names(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    /// Names recorded since the last call
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.borrow_mut())
    }

    pub fn count(&self, name: &str) -> usize {
        self.log.borrow().iter().filter(|n| *n == name).count()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}

/// Check the ordering rules of one reconciliation pass: every `remove`
/// precedes every `add`, `sort` and `update` happen at most once, and
/// `update` comes after all of them.
pub fn reconcile_order_ok(names: &[String]) -> bool {
    let last = |name: &str| names.iter().rposition(|n| n == name);
    let first = |name: &str| names.iter().position(|n| n == name);
    let count = |name: &str| names.iter().filter(|n| *n == name).count();

    if let (Some(remove), Some(add)) = (last("remove"), first("add")) {
        if remove > add {
            return false;
        }
    }
    if count("sort") > 1 || count("update") > 1 {
        return false;
    }
    if let Some(update) = first("update") {
        let tail = ["remove", "add", "sort"].iter().filter_map(|n| last(*n)).max();
        if tail.is_some_and(|t| t > update) {
            return false;
        }
    }
    true
}
