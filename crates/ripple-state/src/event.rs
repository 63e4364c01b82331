//! Event payloads and names
//!
//! Every model and collection dispatches `Event` values. Member events are
//! re-emitted on their collections unchanged.

use ripple_core::{ValidationError, Value};

use crate::collection::Collection;
use crate::model::Model;
use crate::options::{SetOptions, SyncOptions, UpdateOptions};
use crate::transport::{Method, Target};

pub const CHANGE: &str = "change";
pub const CHANGE_ID: &str = "change-id";
pub const ADD: &str = "add";
pub const REMOVE: &str = "remove";
pub const UPDATE: &str = "update";
pub const RESET: &str = "reset";
pub const SORT: &str = "sort";
pub const DESTROY: &str = "destroy";
pub const INVALID: &str = "invalid";
pub const REQUEST: &str = "request";
pub const SYNC: &str = "sync";
pub const ERROR: &str = "error";

/// Name of the per-attribute change event
pub fn change_attr(name: &str) -> String {
    format!("{CHANGE}:{name}")
}

/// What a reconciliation pass did
#[derive(Clone, Debug, Default)]
pub struct Changes {
    pub added: Vec<Model>,
    pub removed: Vec<Model>,
    pub merged: Vec<Model>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.merged.is_empty()
    }
}

#[derive(Clone, Debug)]
pub enum Event {
    /// Aggregate change after a top-level set
    Change { model: Model, options: SetOptions },
    /// One attribute changed
    Attribute {
        model: Model,
        name: String,
        value: Value,
        options: SetOptions,
    },
    /// The derived id changed
    IdChange {
        model: Model,
        previous: Option<Value>,
        options: SetOptions,
    },
    Invalid {
        model: Model,
        error: ValidationError,
    },
    Add {
        model: Model,
        collection: Collection,
        index: Option<usize>,
        options: UpdateOptions,
    },
    Remove {
        model: Model,
        collection: Collection,
        index: usize,
        options: UpdateOptions,
    },
    Update {
        collection: Collection,
        changes: Changes,
        options: UpdateOptions,
    },
    Reset {
        collection: Collection,
        previous: Vec<Model>,
        options: UpdateOptions,
    },
    Sort {
        collection: Collection,
        options: UpdateOptions,
    },
    Destroy {
        model: Model,
        collection: Option<Collection>,
        options: SyncOptions,
    },
    Request {
        target: Target,
        method: Method,
    },
    Sync {
        target: Target,
        response: Value,
    },
    Error {
        target: Target,
        response: Value,
    },
    /// Application-defined event
    Custom(Value),
}

impl Event {
    /// The model the event is about, if any
    pub fn model(&self) -> Option<&Model> {
        match self {
            Event::Change { model, .. }
            | Event::Attribute { model, .. }
            | Event::IdChange { model, .. }
            | Event::Invalid { model, .. }
            | Event::Add { model, .. }
            | Event::Remove { model, .. }
            | Event::Destroy { model, .. } => Some(model),
            Event::Request { target, .. } | Event::Sync { target, .. } | Event::Error { target, .. } => {
                target.model()
            }
            _ => None,
        }
    }

    /// The collection the event is about, if any
    pub fn collection(&self) -> Option<&Collection> {
        match self {
            Event::Add { collection, .. }
            | Event::Remove { collection, .. }
            | Event::Update { collection, .. }
            | Event::Reset { collection, .. }
            | Event::Sort { collection, .. } => Some(collection),
            Event::Destroy { collection, .. } => collection.as_ref(),
            Event::Request { target, .. } | Event::Sync { target, .. } | Event::Error { target, .. } => {
                target.collection()
            }
            _ => None,
        }
    }

    /// New value carried by a per-attribute change
    pub fn value(&self) -> Option<&Value> {
        match self {
            Event::Attribute { value, .. } => Some(value),
            Event::Custom(value) => Some(value),
            _ => None,
        }
    }
}
