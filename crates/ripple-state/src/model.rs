//! Model - observable attribute store
//!
//! A model owns a map of attributes and reports every change through its
//! emitter. `set` is re-entrant: handlers may call `set` again while the
//! outer call is still dispatching.
//!
//! INVARIANT: a top-level `set` is followed by exactly as many `change`
//! events as there were rounds of nested, non-silent changes made from
//! `change` handlers, and the last one observes the final state.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ripple_core::{
    display_value, escape_html, is_blank, slots_equal, Attributes, Cid, ValidationError, Value,
};
use ripple_events::{Emitter, Events};

use crate::collection::{Collection, CollectionInner};
use crate::config::ModelConfig;
use crate::event::{change_attr, Event, CHANGE, CHANGE_ID, INVALID};
use crate::options::SetOptions;

#[derive(Default)]
struct ModelState {
    attributes: Attributes,
    /// Snapshot from before the current / last top-level set
    previous: Attributes,
    /// Attributes that differ from `previous`
    changed: Attributes,
    id: Option<Value>,
    /// A top-level set is in progress
    changing: bool,
    /// Options of the set that queued the next aggregate `change`
    pending: Option<SetOptions>,
    validation_error: Option<ValidationError>,
}

pub(crate) struct ModelInner {
    cid: Cid,
    events: Emitter<Event>,
    config: Rc<ModelConfig>,
    state: RefCell<ModelState>,
    collection: RefCell<Option<Weak<CollectionInner>>>,
}

/// Handle to a model. Clones share the same attributes and emitter.
#[derive(Clone)]
pub struct Model {
    inner: Rc<ModelInner>,
}

/// Clears the in-progress marker when the outermost set finishes, including
/// when a handler unwinds out of it
struct Settle<'a>(&'a ModelInner);

impl Drop for Settle<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.borrow_mut();
        state.pending = None;
        state.changing = false;
    }
}

impl Model {
    /// Model with default configuration
    pub fn new(attrs: Attributes) -> Self {
        Self::with_config(Rc::new(ModelConfig::default()), attrs)
    }

    pub fn with_config(config: Rc<ModelConfig>, attrs: Attributes) -> Self {
        Self::build(config, attrs, SetOptions::default(), None)
    }

    /// Construct a model. Defaults are applied under `attrs`; with
    /// `options.parse` the parser runs first. When validation is requested
    /// and fails the model starts empty and `validation_error` says why.
    pub fn build(
        config: Rc<ModelConfig>,
        attrs: Attributes,
        options: SetOptions,
        collection: Option<&Collection>,
    ) -> Self {
        let model = Model {
            inner: Rc::new(ModelInner {
                cid: Cid::next(),
                events: Emitter::new(),
                config,
                state: RefCell::new(ModelState::default()),
                collection: RefCell::new(collection.map(Collection::downgrade)),
            }),
        };

        let attrs = if options.parse {
            model.inner.config.parse(Value::Object(attrs))
        } else {
            attrs
        };
        let mut initial = model.inner.config.defaults.clone();
        for (name, value) in attrs {
            initial.insert(name, value);
        }

        // a rejected initial set leaves the model empty; `validation_error` keeps the reason
        let _ = model.set(initial, options);
        model.inner.state.borrow_mut().changed = Attributes::new();
        model
    }

    #[inline]
    pub fn cid(&self) -> Cid {
        self.inner.cid
    }

    pub fn config(&self) -> &ModelConfig {
        &self.inner.config
    }

    /// True when both handles refer to the same model
    #[inline]
    pub fn ptr_eq(&self, other: &Model) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn id(&self) -> Option<Value> {
        self.inner.state.borrow().id.clone()
    }

    /// Not yet persisted: no id
    pub fn is_new(&self) -> bool {
        self.inner.state.borrow().id.is_none()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.state.borrow().attributes.get(name).cloned()
    }

    /// Present and not `null`
    pub fn has(&self, name: &str) -> bool {
        !is_blank(self.inner.state.borrow().attributes.get(name))
    }

    /// HTML-escaped text form of an attribute
    pub fn escape(&self, name: &str) -> String {
        escape_html(&display_value(self.inner.state.borrow().attributes.get(name)))
    }

    pub fn attributes(&self) -> Attributes {
        self.inner.state.borrow().attributes.clone()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.attributes())
    }

    /// The collection that adopted this model, if it is still alive
    pub fn collection(&self) -> Option<Collection> {
        self.inner
            .collection
            .borrow()
            .as_ref()
            .and_then(Collection::upgrade)
    }

    pub(crate) fn set_collection(&self, collection: Option<&Collection>) {
        *self.inner.collection.borrow_mut() = collection.map(Collection::downgrade);
    }

    pub(crate) fn belongs_to(&self, collection: &Collection) -> bool {
        self.collection().is_some_and(|c| c.ptr_eq(collection))
    }

    /// Response → attributes via the configured parser
    pub fn parse(&self, response: Value) -> Attributes {
        self.inner.config.parse(response)
    }

    /// Write attributes. Returns `Err` only when validation was requested
    /// and failed, in which case nothing was written.
    pub fn set(&self, attrs: Attributes, options: SetOptions) -> Result<(), ValidationError> {
        let incoming = if options.unset {
            attrs.into_iter().map(|(name, _)| (name, None)).collect()
        } else {
            attrs.into_iter().map(|(name, value)| (name, Some(value))).collect()
        };
        self.apply(incoming, options)
    }

    /// Write a single attribute
    pub fn set_attr(
        &self,
        name: impl Into<String>,
        value: impl Into<Value>,
        options: SetOptions,
    ) -> Result<(), ValidationError> {
        self.apply(vec![(name.into(), Some(value.into()))], options)
    }

    /// Delete an attribute
    pub fn unset(&self, name: &str, options: SetOptions) -> Result<(), ValidationError> {
        self.apply(vec![(name.to_string(), None)], options.with_unset(true))
    }

    /// Delete every attribute
    pub fn clear(&self, options: SetOptions) -> Result<(), ValidationError> {
        let names: Vec<_> = self
            .inner
            .state
            .borrow()
            .attributes
            .keys()
            .map(|name| (name.clone(), None))
            .collect();
        self.apply(names, options.with_unset(true))
    }

    fn apply(
        &self,
        incoming: Vec<(String, Option<Value>)>,
        options: SetOptions,
    ) -> Result<(), ValidationError> {
        if options.validate {
            let mut candidate = self.attributes();
            for (name, value) in &incoming {
                match value {
                    Some(value) => {
                        candidate.insert(name.clone(), value.clone());
                    }
                    None => candidate.retain(|key, _| key != name),
                }
            }
            self.run_validator(&candidate, &options)?;
        }

        let silent = options.silent;
        let (changes, nested, id_change) = {
            let mut state = self.inner.state.borrow_mut();
            let nested = state.changing;
            state.changing = true;
            if !nested {
                state.previous = state.attributes.clone();
                state.changed = Attributes::new();
            }

            let mut changes = Vec::new();
            for (name, value) in incoming {
                if !slots_equal(state.attributes.get(&name), value.as_ref()) {
                    changes.push(name.clone());
                }
                if slots_equal(state.previous.get(&name), value.as_ref()) {
                    state.changed.retain(|key, _| key != &name);
                } else {
                    state
                        .changed
                        .insert(name.clone(), value.clone().unwrap_or(Value::Null));
                }
                match value {
                    Some(value) => {
                        state.attributes.insert(name, value);
                    }
                    None => state.attributes.retain(|key, _| key != &name),
                }
            }

            let id = self.inner.config.id_rule.extract(&state.attributes);
            let id_change = if slots_equal(id.as_ref(), state.id.as_ref()) {
                None
            } else {
                Some(std::mem::replace(&mut state.id, id))
            };

            if !silent && !changes.is_empty() {
                state.pending = Some(options.clone());
            }
            (changes, nested, id_change)
        };

        let _settle = (!nested).then(|| Settle(&self.inner));

        if let Some(previous) = id_change {
            self.trigger(
                CHANGE_ID,
                &Event::IdChange {
                    model: self.clone(),
                    previous,
                    options: options.clone(),
                },
            );
        }

        if !silent {
            for name in changes {
                let value = self.get(&name).unwrap_or(Value::Null);
                self.trigger(
                    &change_attr(&name),
                    &Event::Attribute {
                        model: self.clone(),
                        name,
                        value,
                        options: options.clone(),
                    },
                );
            }
        }

        if nested {
            return Ok(());
        }

        if !silent {
            loop {
                let pending = self.inner.state.borrow_mut().pending.take();
                let Some(options) = pending else {
                    break;
                };
                self.trigger(
                    CHANGE,
                    &Event::Change {
                        model: self.clone(),
                        options,
                    },
                );
            }
        }

        Ok(())
    }

    fn run_validator(&self, candidate: &Attributes, options: &SetOptions) -> Result<(), ValidationError> {
        let Some(validator) = self.inner.config.validator.clone() else {
            return Ok(());
        };
        match validator.validate(candidate, options) {
            Ok(()) => {
                self.inner.state.borrow_mut().validation_error = None;
                Ok(())
            }
            Err(error) => {
                tracing::debug!(cid = %self.inner.cid, %error, "validation failed");
                self.inner.state.borrow_mut().validation_error = Some(error.clone());
                self.trigger(
                    INVALID,
                    &Event::Invalid {
                        model: self.clone(),
                        error: error.clone(),
                    },
                );
                Err(error)
            }
        }
    }

    /// Validate prospective attributes merged over the current ones
    /// without writing anything
    pub(crate) fn check(&self, attrs: &Attributes, options: &SetOptions) -> Result<(), ValidationError> {
        if !options.validate {
            return Ok(());
        }
        let mut candidate = self.attributes();
        for (name, value) in attrs {
            candidate.insert(name.clone(), value.clone());
        }
        self.run_validator(&candidate, options)
    }

    /// Run the validator over the current attributes; `invalid` fires on
    /// failure
    pub fn is_valid(&self, options: SetOptions) -> bool {
        self.check(&Attributes::new(), &options.with_validate(true)).is_ok()
    }

    pub fn validation_error(&self) -> Option<ValidationError> {
        self.inner.state.borrow().validation_error.clone()
    }

    /// Without a name: whether the last set changed anything.
    /// With a name: whether that attribute changed.
    pub fn has_changed(&self, name: Option<&str>) -> bool {
        let state = self.inner.state.borrow();
        match name {
            Some(name) => state.changed.contains_key(name),
            None => !state.changed.is_empty(),
        }
    }

    /// Without `diff`: the changed attributes, if any. With `diff`: the
    /// subset of `diff` that differs from the attributes as they were
    /// before the set in progress (or from the current ones).
    pub fn changed_attributes(&self, diff: Option<&Attributes>) -> Option<Attributes> {
        let state = self.inner.state.borrow();
        let Some(diff) = diff else {
            return (!state.changed.is_empty()).then(|| state.changed.clone());
        };
        let old = if state.changing {
            &state.previous
        } else {
            &state.attributes
        };
        let changed: Attributes = diff
            .iter()
            .filter(|(name, value)| !slots_equal(old.get(name.as_str()), Some(value)))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        (!changed.is_empty()).then_some(changed)
    }

    /// Value of an attribute before the last top-level set
    pub fn previous(&self, name: &str) -> Option<Value> {
        self.inner.state.borrow().previous.get(name).cloned()
    }

    pub fn previous_attributes(&self) -> Attributes {
        self.inner.state.borrow().previous.clone()
    }

    /// New model with the same configuration and a copy of the attributes
    pub fn clone_model(&self) -> Model {
        Model::with_config(Rc::clone(&self.inner.config), self.attributes())
    }
}

impl Events<Event> for Model {
    fn emitter(&self) -> &Emitter<Event> {
        &self.inner.events
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Model {}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.state.try_borrow() {
            Ok(state) => f
                .debug_struct("Model")
                .field("cid", &self.inner.cid)
                .field("id", &state.id)
                .field("attributes", &state.attributes)
                .finish(),
            Err(_) => f
                .debug_struct("Model")
                .field("cid", &self.inner.cid)
                .finish_non_exhaustive(),
        }
    }
}
