//! Events capability
//!
//! Entities own an `Emitter` and implement `Events` by pointing at it; every
//! subscription method comes for free.

use std::rc::Rc;

use ripple_core::ListenId;

use crate::emitter::{Callback, Emitter};

pub trait Events<E: 'static> {
    /// The emitter this entity dispatches through
    fn emitter(&self) -> &Emitter<E>;

    fn listen_id(&self) -> ListenId {
        self.emitter().id()
    }

    /// Bind a closure; returns the handle needed to unbind it
    fn on<F>(&self, names: &str, f: F) -> Callback<E>
    where
        F: Fn(&str, &E) + 'static,
        Self: Sized,
    {
        let callback: Callback<E> = Rc::new(f);
        self.emitter().bind(names, &callback, None);
        callback
    }

    fn once<F>(&self, names: &str, f: F) -> Callback<E>
    where
        F: Fn(&str, &E) + 'static,
        Self: Sized,
    {
        let callback: Callback<E> = Rc::new(f);
        self.emitter().bind_once(names, &callback, None);
        callback
    }

    fn off(&self, names: Option<&str>, callback: Option<&Callback<E>>, context: Option<ListenId>) {
        self.emitter().unbind(names, callback, context);
    }

    fn trigger(&self, names: &str, payload: &E) {
        self.emitter().emit(names, payload);
    }

    /// Subscribe to another entity's events, tracked for bulk teardown
    fn listen_to<S, F>(&self, source: &S, names: &str, f: F) -> Callback<E>
    where
        S: Events<E> + ?Sized,
        F: Fn(&str, &E) + 'static,
        Self: Sized,
    {
        let callback: Callback<E> = Rc::new(f);
        self.emitter().listen(source.emitter(), names, &callback);
        callback
    }

    fn listen_to_once<S, F>(&self, source: &S, names: &str, f: F) -> Callback<E>
    where
        S: Events<E> + ?Sized,
        F: Fn(&str, &E) + 'static,
        Self: Sized,
    {
        let callback: Callback<E> = Rc::new(f);
        self.emitter().listen_once(source.emitter(), names, &callback);
        callback
    }

    /// Drop subscriptions made with `listen_to`; `None` widens the match
    fn stop_listening(
        &self,
        source: Option<&Emitter<E>>,
        names: Option<&str>,
        callback: Option<&Callback<E>>,
    ) {
        self.emitter().unlisten(source, names, callback);
    }
}

impl<E: 'static> Events<E> for Emitter<E> {
    fn emitter(&self) -> &Emitter<E> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Widget {
        events: Emitter<String>,
    }

    impl Events<String> for Widget {
        fn emitter(&self) -> &Emitter<String> {
            &self.events
        }
    }

    fn widget() -> Widget {
        Widget {
            events: Emitter::new(),
        }
    }

    #[test]
    fn test_composed_entity() {
        let w = widget();
        let seen = Rc::new(Cell::new(0));
        let s = Rc::clone(&seen);
        let cb = w.on("ping", move |_, msg: &String| {
            assert_eq!(msg, "hello");
            s.set(s.get() + 1);
        });
        w.trigger("ping", &"hello".to_string());
        w.off(Some("ping"), Some(&cb), None);
        w.trigger("ping", &"hello".to_string());
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn test_stop_listening_clears_both_sides() {
        let a = widget();
        let b = widget();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        a.listen_to(&b, "x", move |_, _| h.set(h.get() + 1));

        a.stop_listening(None, None, None);

        assert_eq!(a.emitter().listening_count(), 0);
        assert_eq!(b.emitter().listener_count(), 0);
        b.trigger("x", &String::new());
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_stop_listening_by_callback() {
        let a = widget();
        let b = widget();
        let keep = a.listen_to(&b, "x", |_, _| {});
        let drop_me = a.listen_to(&b, "x", |_, _| {});
        a.stop_listening(Some(b.emitter()), None, Some(&drop_me));
        assert_eq!(a.emitter().listening_refs(b.emitter()), Some(1));
        a.stop_listening(Some(b.emitter()), Some("x"), Some(&keep));
        assert!(!a.emitter().is_listening_to(b.emitter()));
    }

    #[test]
    fn test_stop_listening_spares_direct_bindings() {
        let a = widget();
        let b = widget();
        b.on("x", |_, _| {});
        a.listen_to(&b, "x", |_, _| {});
        a.stop_listening(Some(b.emitter()), None, None);
        assert_eq!(b.emitter().handler_count(Some("x")), 1);
    }
}
