//! Ripple Core - Fundamental types shared by the event bus and the state layer
//!
//! This crate defines:
//! - Identifiers (Cid, ListenId)
//! - Attribute values (Attributes, deep equality, value ordering, index keys)
//! - Error taxonomy (RippleError, ValidationError)

pub mod error;
pub mod id;
pub mod value;

pub use error::*;
pub use id::*;
pub use value::*;
