//! Ripple Events - Named-event publish/subscribe
//!
//! This crate implements the event dispatch engine:
//! - Direct binding (bind / bind_once / unbind)
//! - Synchronous dispatch with an `"all"` wildcard
//! - Tracked, reference-counted listening relations between emitters
//! - The `Events` capability trait that entities implement by composition

pub mod emitter;
pub mod events;
mod listening;

pub use emitter::*;
pub use events::*;
