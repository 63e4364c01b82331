//! Ripple State - Observable models and ordered collections
//!
//! This crate implements the state layer:
//! - Model: attribute store with change tracking and re-entrant set draining
//! - Collection: ordered, id-indexed model set with bulk reconciliation
//! - Event payloads shared by both
//! - Configuration and option structs
//! - The transport seam used for fetch / save / destroy

pub mod collection;
pub mod config;
pub mod event;
pub mod model;
pub mod options;
mod persist;
mod reconcile;
pub mod transport;

pub use collection::*;
pub use config::*;
pub use event::*;
pub use model::*;
pub use options::*;
pub use transport::*;

pub use ripple_core::{Attributes, Cid, RippleError, RippleResult, ValidationError, Value};
pub use ripple_events::{Callback, Emitter, Events, ALL};
