//! Emitter - per-entity registry of named-event handlers
//!
//! Dispatch is synchronous and re-entrant. No `RefCell` borrow is held while
//! a callback runs, so callbacks may bind, unbind and trigger freely.
//!
//! INVARIANT: handlers present when a trigger starts are the only ones that
//! can run for it; handlers removed during the trigger do not run afterwards.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use ripple_core::ListenId;

use crate::listening::Listening;

/// Wildcard event name; its handlers see every event
pub const ALL: &str = "all";

/// Event callback. Receives the concrete event name and the payload.
pub type Callback<E> = Rc<dyn Fn(&str, &E)>;

/// Wrap a closure as a callback handle usable with `unbind`
pub fn callback<E, F>(f: F) -> Callback<E>
where
    F: Fn(&str, &E) + 'static,
{
    Rc::new(f)
}

#[inline]
fn same_callback<E>(a: &Callback<E>, b: &Callback<E>) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

/// Split a whitespace separated list of event names
#[inline]
fn split_names(names: &str) -> impl Iterator<Item = &str> {
    names.split_whitespace()
}

/// A single registration
pub(crate) struct Handler<E> {
    callback: Callback<E>,
    context: Option<ListenId>,
    listening: Option<Rc<Listening<E>>>,
    once: bool,
    /// Tombstone; set on removal so in-flight dispatch skips it
    removed: Cell<bool>,
}

impl<E> Handler<E> {
    fn matches(
        &self,
        callback: Option<&Callback<E>>,
        context: Option<ListenId>,
        listener: Option<ListenId>,
    ) -> bool {
        if let Some(cb) = callback {
            if !same_callback(cb, &self.callback) {
                return false;
            }
        }
        if context.is_some() && context != self.context {
            return false;
        }
        if let Some(listener) = listener {
            match &self.listening {
                Some(l) if l.listener_id == listener => {}
                _ => return false,
            }
        }
        true
    }
}

pub(crate) struct Inner<E> {
    pub(crate) id: ListenId,
    handlers: RefCell<HashMap<String, Vec<Rc<Handler<E>>>>>,
    /// Entities listening to this one, keyed by listener id
    pub(crate) listeners: RefCell<HashMap<ListenId, Rc<Listening<E>>>>,
    /// Entities this one listens to, keyed by source id
    pub(crate) listening_to: RefCell<HashMap<ListenId, Rc<Listening<E>>>>,
}

impl<E> Drop for Inner<E> {
    fn drop(&mut self) {
        for listening in self.listeners.get_mut().values() {
            if let Some(listener) = listening.listener.upgrade() {
                listener.listening_to.borrow_mut().remove(&self.id);
            }
        }
        for listening in self.listening_to.get_mut().values() {
            if let Some(source) = listening.source.upgrade() {
                source.listeners.borrow_mut().remove(&self.id);
            }
        }
    }
}

/// Event emitter. Cloning yields another handle to the same registry.
pub struct Emitter<E> {
    inner: Rc<Inner<E>>,
}

impl<E> Clone for Emitter<E> {
    fn clone(&self) -> Self {
        Emitter {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("id", &self.inner.id)
            .field("handlers", &self.handler_count(None))
            .field("listening_to", &self.listening_count())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Emitter<E> {
    pub fn new() -> Self {
        Emitter {
            inner: Rc::new(Inner {
                id: ListenId::next(),
                handlers: RefCell::new(HashMap::new()),
                listeners: RefCell::new(HashMap::new()),
                listening_to: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Listen id of this emitter
    #[inline]
    pub fn id(&self) -> ListenId {
        self.inner.id
    }

    /// True when both handles point at the same registry
    #[inline]
    pub fn same(&self, other: &Emitter<E>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Bind a callback to one or more whitespace separated event names
    pub fn bind(&self, names: &str, callback: &Callback<E>, context: Option<ListenId>) {
        self.register(names, callback, context, false, None);
    }

    /// Bind a callback that removes itself before its first invocation
    pub fn bind_once(&self, names: &str, callback: &Callback<E>, context: Option<ListenId>) {
        self.register(names, callback, context, true, None);
    }

    /// Bind several name → callback pairs at once
    pub fn bind_map<'a, I>(&self, map: I, context: Option<ListenId>)
    where
        I: IntoIterator<Item = (&'a str, Callback<E>)>,
    {
        for (names, callback) in map {
            self.register(names, &callback, context, false, None);
        }
    }

    fn register(
        &self,
        names: &str,
        callback: &Callback<E>,
        context: Option<ListenId>,
        once: bool,
        listening: Option<&Rc<Listening<E>>>,
    ) {
        let mut handlers = self.inner.handlers.borrow_mut();
        for name in split_names(names) {
            if let Some(l) = listening {
                l.increment();
            }
            handlers
                .entry(name.to_string())
                .or_default()
                .push(Rc::new(Handler {
                    callback: Rc::clone(callback),
                    context,
                    listening: listening.cloned(),
                    once,
                    removed: Cell::new(false),
                }));
        }
    }

    /// Remove matching registrations. Every argument narrows the match;
    /// with none given, everything is removed and every listening relation
    /// pointing at this emitter is severed.
    pub fn unbind(
        &self,
        names: Option<&str>,
        callback: Option<&Callback<E>>,
        context: Option<ListenId>,
    ) {
        self.remove(names, callback, context, None);
    }

    pub(crate) fn remove(
        &self,
        names: Option<&str>,
        callback: Option<&Callback<E>>,
        context: Option<ListenId>,
        listener: Option<ListenId>,
    ) {
        if names.is_none() && callback.is_none() && context.is_none() && listener.is_none() {
            self.clear();
            return;
        }

        let mut removed = Vec::new();
        {
            let mut handlers = self.inner.handlers.borrow_mut();
            let keys: Vec<String> = match names {
                Some(names) => split_names(names).map(str::to_string).collect(),
                None => handlers.keys().cloned().collect(),
            };

            for key in keys {
                let Some(list) = handlers.get_mut(&key) else {
                    continue;
                };
                list.retain(|h| {
                    if h.matches(callback, context, listener) {
                        removed.push(Rc::clone(h));
                        false
                    } else {
                        true
                    }
                });
                if list.is_empty() {
                    handlers.remove(&key);
                }
            }
        }

        for handler in removed {
            self.release(&handler);
        }
    }

    fn clear(&self) {
        let handlers = std::mem::take(&mut *self.inner.handlers.borrow_mut());
        for handler in handlers.values().flatten() {
            handler.removed.set(true);
        }
        let listeners: Vec<_> = self.inner.listeners.borrow_mut().drain().collect();
        for (_, listening) in listeners {
            listening.detach();
        }
    }

    /// Tombstone a handler that has already left the list and settle its
    /// listening relation
    fn release(&self, handler: &Rc<Handler<E>>) {
        if handler.removed.replace(true) {
            return;
        }
        if let Some(listening) = &handler.listening {
            if listening.decrement() {
                listening.detach();
            }
        }
    }

    fn remove_handler(&self, name: &str, handler: &Rc<Handler<E>>) {
        {
            let mut handlers = self.inner.handlers.borrow_mut();
            if let Some(list) = handlers.get_mut(name) {
                list.retain(|h| !Rc::ptr_eq(h, handler));
                if list.is_empty() {
                    handlers.remove(name);
                }
            }
        }
        self.release(handler);
    }

    /// Synchronously dispatch `payload` to every handler of each named
    /// event, then to the `"all"` handlers.
    pub fn emit(&self, names: &str, payload: &E) {
        for name in split_names(names) {
            self.dispatch(name, payload);
        }
    }

    fn dispatch(&self, name: &str, payload: &E) {
        let (named, all) = {
            let handlers = self.inner.handlers.borrow();
            let named = if name == ALL {
                None
            } else {
                handlers.get(name).cloned()
            };
            (named, handlers.get(ALL).cloned())
        };

        tracing::trace!(
            emitter = %self.inner.id,
            event = name,
            handlers = named.as_ref().map_or(0, Vec::len) + all.as_ref().map_or(0, Vec::len),
            "dispatch"
        );

        if let Some(named) = named {
            self.run(name, name, &named, payload);
        }
        if let Some(all) = all {
            self.run(ALL, name, &all, payload);
        }
    }

    fn run(&self, key: &str, name: &str, handlers: &[Rc<Handler<E>>], payload: &E) {
        for handler in handlers {
            if handler.removed.get() {
                continue;
            }
            if handler.once {
                self.remove_handler(key, handler);
            }
            (handler.callback)(name, payload);
        }
    }

    /// Subscribe to `source` on behalf of this emitter, recording the
    /// relation so that `unlisten` can tear it down in bulk
    pub fn listen(&self, source: &Emitter<E>, names: &str, callback: &Callback<E>) {
        self.track(source, names, callback, false);
    }

    /// As `listen`, but each registration fires at most once
    pub fn listen_once(&self, source: &Emitter<E>, names: &str, callback: &Callback<E>) {
        self.track(source, names, callback, true);
    }

    fn track(&self, source: &Emitter<E>, names: &str, callback: &Callback<E>, once: bool) {
        let source_id = source.id();
        let existing = self.inner.listening_to.borrow().get(&source_id).cloned();
        let listening = match existing {
            Some(listening) => listening,
            None => {
                let listening = Rc::new(Listening::new(&source.inner, &self.inner));
                self.inner
                    .listening_to
                    .borrow_mut()
                    .insert(source_id, Rc::clone(&listening));
                source
                    .inner
                    .listeners
                    .borrow_mut()
                    .insert(self.inner.id, Rc::clone(&listening));
                listening
            }
        };

        source.register(names, callback, Some(self.inner.id), once, Some(&listening));

        if listening.count.get() == 0 {
            listening.detach();
        }
    }

    /// Remove handlers this emitter registered through `listen`, on one
    /// source or on all of them
    pub fn unlisten(
        &self,
        source: Option<&Emitter<E>>,
        names: Option<&str>,
        callback: Option<&Callback<E>>,
    ) {
        let targets: Vec<Rc<Listening<E>>> = {
            let listening_to = self.inner.listening_to.borrow();
            match source {
                Some(source) => listening_to.get(&source.id()).cloned().into_iter().collect(),
                None => listening_to.values().cloned().collect(),
            }
        };

        for listening in targets {
            match listening.source.upgrade() {
                Some(inner) => {
                    let source = Emitter { inner };
                    source.remove(names, callback, None, Some(self.inner.id));
                }
                None => listening.detach(),
            }
        }
    }

    /// Number of live handlers for `name`, or across all names
    pub fn handler_count(&self, name: Option<&str>) -> usize {
        let handlers = self.inner.handlers.borrow();
        match name {
            Some(name) => handlers.get(name).map_or(0, Vec::len),
            None => handlers.values().map(Vec::len).sum(),
        }
    }

    /// Number of sources this emitter listens to
    pub fn listening_count(&self) -> usize {
        self.inner.listening_to.borrow().len()
    }

    /// Number of emitters listening to this one
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Handlers registered on `source` through the relation, if any
    pub fn listening_refs(&self, source: &Emitter<E>) -> Option<usize> {
        self.inner
            .listening_to
            .borrow()
            .get(&source.id())
            .map(|l| l.count.get())
    }

    pub fn is_listening_to(&self, source: &Emitter<E>) -> bool {
        self.inner.listening_to.borrow().contains_key(&source.id())
    }
}
