//! Collection - ordered, id-indexed set of models
//!
//! Members are kept in `models` (canonical order) and indexed in `by_id`
//! under both their cid and their id. Each member is wired to the
//! collection through a single `"all"` handler that relays its events.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use ripple_core::{
    id_key, values_equal, Attributes, Cid, RippleError, RippleResult, Value,
};
use ripple_events::{Callback, Emitter, Events, ALL};

use crate::config::{CollectionConfig, Comparator, ModelConfig};
use crate::event::{Changes, Event, CHANGE_ID, DESTROY, INVALID, REMOVE, RESET, SORT, UPDATE};
use crate::model::Model;
use crate::options::{SetOptions, UpdateOptions};
use crate::transport::Transport;

/// Key in the membership index
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum IndexKey {
    Id(String),
    Cid(Cid),
}

impl IndexKey {
    pub(crate) fn id(value: &Value) -> Option<Self> {
        id_key(value).map(IndexKey::Id)
    }
}

#[derive(Default)]
pub(crate) struct Members {
    pub(crate) models: Vec<Model>,
    pub(crate) by_id: HashMap<IndexKey, Model>,
}

impl Members {
    pub(crate) fn index(&mut self, model: &Model) {
        self.by_id.insert(IndexKey::Cid(model.cid()), model.clone());
        if let Some(key) = model.id().as_ref().and_then(IndexKey::id) {
            self.by_id.insert(key, model.clone());
        }
    }

    fn unindex_key(&mut self, key: &IndexKey, model: &Model) {
        if self.by_id.get(key).is_some_and(|m| m.ptr_eq(model)) {
            self.by_id.remove(key);
        }
    }

    pub(crate) fn unindex(&mut self, model: &Model) {
        self.unindex_key(&IndexKey::Cid(model.cid()), model);
        if let Some(key) = model.id().as_ref().and_then(IndexKey::id) {
            self.unindex_key(&key, model);
        }
    }

    pub(crate) fn position(&self, model: &Model) -> Option<usize> {
        self.models.iter().position(|m| m.ptr_eq(model))
    }
}

pub(crate) struct CollectionInner {
    events: Emitter<Event>,
    config: CollectionConfig,
    comparator: RefCell<Option<Comparator>>,
    pub(crate) members: RefCell<Members>,
    /// Handler bound on every member
    relay: Callback<Event>,
}

/// Handle to a collection. Clones share the same membership.
#[derive(Clone)]
pub struct Collection {
    pub(crate) inner: Rc<CollectionInner>,
}

/// Something a member can be looked up by
#[derive(Clone, Debug)]
pub enum Lookup {
    Id(Value),
    Cid(Cid),
    Model(Model),
    Attrs(Attributes),
}

impl From<Value> for Lookup {
    fn from(id: Value) -> Self {
        Lookup::Id(id)
    }
}

impl From<&str> for Lookup {
    fn from(id: &str) -> Self {
        Lookup::Id(Value::from(id))
    }
}

impl From<i32> for Lookup {
    fn from(id: i32) -> Self {
        Lookup::Id(Value::from(id))
    }
}

impl From<i64> for Lookup {
    fn from(id: i64) -> Self {
        Lookup::Id(Value::from(id))
    }
}

impl From<u64> for Lookup {
    fn from(id: u64) -> Self {
        Lookup::Id(Value::from(id))
    }
}

impl From<Cid> for Lookup {
    fn from(cid: Cid) -> Self {
        Lookup::Cid(cid)
    }
}

impl From<Model> for Lookup {
    fn from(model: Model) -> Self {
        Lookup::Model(model)
    }
}

impl From<&Model> for Lookup {
    fn from(model: &Model) -> Self {
        Lookup::Model(model.clone())
    }
}

impl From<Attributes> for Lookup {
    fn from(attrs: Attributes) -> Self {
        Lookup::Attrs(attrs)
    }
}

/// One element of an incoming batch
#[derive(Clone, Debug)]
pub enum Item {
    Attrs(Attributes),
    Model(Model),
}

impl From<Attributes> for Item {
    fn from(attrs: Attributes) -> Self {
        Item::Attrs(attrs)
    }
}

impl From<Model> for Item {
    fn from(model: Model) -> Self {
        Item::Model(model)
    }
}

impl From<&Model> for Item {
    fn from(model: &Model) -> Self {
        Item::Model(model.clone())
    }
}

impl From<Item> for Lookup {
    fn from(item: Item) -> Self {
        match item {
            Item::Attrs(attrs) => Lookup::Attrs(attrs),
            Item::Model(model) => Lookup::Model(model),
        }
    }
}

/// Input to `set` / `add` / `reset`
#[derive(Clone, Debug)]
pub enum Batch {
    One(Item),
    Many(Vec<Item>),
}

impl Batch {
    pub fn empty() -> Self {
        Batch::Many(Vec::new())
    }

    pub(crate) fn into_items(self) -> Vec<Item> {
        match self {
            Batch::One(item) => vec![item],
            Batch::Many(items) => items,
        }
    }
}

impl<T: Into<Item>> From<Vec<T>> for Batch {
    fn from(items: Vec<T>) -> Self {
        Batch::Many(items.into_iter().map(Into::into).collect())
    }
}

impl From<Item> for Batch {
    fn from(item: Item) -> Self {
        Batch::One(item)
    }
}

impl From<Attributes> for Batch {
    fn from(attrs: Attributes) -> Self {
        Batch::One(Item::Attrs(attrs))
    }
}

impl From<Model> for Batch {
    fn from(model: Model) -> Self {
        Batch::One(Item::Model(model))
    }
}

impl From<&Model> for Batch {
    fn from(model: &Model) -> Self {
        Batch::One(Item::Model(model.clone()))
    }
}

/// Raw JSON: an array yields many items, an object one. Anything else is
/// not a record and is dropped.
impl From<Value> for Batch {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(attrs) => Batch::One(Item::Attrs(attrs)),
            Value::Array(values) => Batch::Many(
                values
                    .into_iter()
                    .filter_map(|value| match value {
                        Value::Object(attrs) => Some(Item::Attrs(attrs)),
                        Value::Null => None,
                        other => {
                            tracing::warn!(value = %other, "skipping non-object record");
                            None
                        }
                    })
                    .collect(),
            ),
            Value::Null => Batch::empty(),
            other => {
                tracing::warn!(value = %other, "skipping non-object record");
                Batch::empty()
            }
        }
    }
}

/// Resolve a possibly negative index against `len`, clamped to `0..=len`
pub(crate) fn clamp_index(at: isize, len: usize) -> usize {
    if at < 0 {
        let from_end = at.unsigned_abs();
        (len + 1).saturating_sub(from_end)
    } else {
        (at as usize).min(len)
    }
}

impl Collection {
    pub fn new(config: CollectionConfig) -> Self {
        let comparator = config.comparator.clone();
        let inner = Rc::new_cyclic(|weak: &Weak<CollectionInner>| {
            let weak = weak.clone();
            let relay: Callback<Event> = Rc::new(move |name: &str, event: &Event| {
                if let Some(inner) = weak.upgrade() {
                    Collection { inner }.on_member_event(name, event);
                }
            });
            CollectionInner {
                events: Emitter::new(),
                config,
                comparator: RefCell::new(comparator),
                members: RefCell::new(Members::default()),
                relay,
            }
        });
        Collection { inner }
    }

    /// Collection seeded with `batch`, without events
    pub fn with_models(config: CollectionConfig, batch: impl Into<Batch>, options: UpdateOptions) -> Self {
        let collection = Self::new(config);
        collection.reset(batch, options.with_silent(true));
        collection
    }

    pub(crate) fn downgrade(&self) -> Weak<CollectionInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<CollectionInner>) -> Option<Collection> {
        weak.upgrade().map(|inner| Collection { inner })
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Collection) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.inner.config
    }

    pub(crate) fn model_config(&self) -> Rc<ModelConfig> {
        Rc::clone(&self.inner.config.model)
    }

    pub fn comparator(&self) -> Option<Comparator> {
        self.inner.comparator.borrow().clone()
    }

    /// Replace the comparator; the current order is kept until the next sort
    pub fn set_comparator(&self, comparator: Option<Comparator>) {
        *self.inner.comparator.borrow_mut() = comparator;
    }

    pub fn len(&self) -> usize {
        self.inner.members.borrow().models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the members in order
    pub fn models(&self) -> Vec<Model> {
        self.inner.members.borrow().models.clone()
    }

    /// Iterate over a snapshot; handlers may mutate the collection meanwhile
    pub fn iter(&self) -> std::vec::IntoIter<Model> {
        self.models().into_iter()
    }

    /// Member at `index`; negative counts from the end
    pub fn at(&self, index: isize) -> Option<Model> {
        let members = self.inner.members.borrow();
        let index = if index < 0 {
            members.models.len().checked_sub(index.unsigned_abs())?
        } else {
            index as usize
        };
        members.models.get(index).cloned()
    }

    pub fn slice(&self, start: usize, end: Option<usize>) -> Vec<Model> {
        let members = self.inner.members.borrow();
        let end = end.unwrap_or(members.models.len()).min(members.models.len());
        members
            .models
            .get(start.min(end)..end)
            .map(<[Model]>::to_vec)
            .unwrap_or_default()
    }

    /// Id the configured id rule derives from raw attributes
    pub fn model_id(&self, attrs: &Attributes) -> Option<Value> {
        self.inner.config.model.id_rule.extract(attrs)
    }

    fn lookup_key(&self, lookup: &Lookup) -> Vec<IndexKey> {
        match lookup {
            Lookup::Id(id) => IndexKey::id(id).into_iter().collect(),
            Lookup::Cid(cid) => vec![IndexKey::Cid(*cid)],
            Lookup::Model(model) => {
                let mut keys: Vec<IndexKey> = model.id().as_ref().and_then(IndexKey::id).into_iter().collect();
                keys.push(IndexKey::Cid(model.cid()));
                keys
            }
            Lookup::Attrs(attrs) => self
                .model_id(attrs)
                .as_ref()
                .and_then(IndexKey::id)
                .into_iter()
                .collect(),
        }
    }

    /// Member by id, cid, model or raw attributes
    pub fn get(&self, lookup: impl Into<Lookup>) -> Option<Model> {
        let keys = self.lookup_key(&lookup.into());
        let members = self.inner.members.borrow();
        keys.iter().find_map(|key| members.by_id.get(key).cloned())
    }

    pub fn has(&self, lookup: impl Into<Lookup>) -> bool {
        self.get(lookup).is_some()
    }

    pub fn index_of(&self, model: &Model) -> Option<usize> {
        self.inner.members.borrow().position(model)
    }

    /// Members whose attributes include every pair in `attrs`
    pub fn where_(&self, attrs: &Attributes) -> Vec<Model> {
        self.iter().filter(|model| matches(model, attrs)).collect()
    }

    pub fn find_where(&self, attrs: &Attributes) -> Option<Model> {
        self.iter().find(|model| matches(model, attrs))
    }

    /// One attribute from every member, in order
    pub fn pluck(&self, name: &str) -> Vec<Option<Value>> {
        self.iter().map(|model| model.get(name)).collect()
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.iter().map(|model| model.to_json()).collect())
    }

    /// Collection-level response → list of records
    pub fn parse(&self, response: Value) -> Value {
        match &self.inner.config.parser {
            Some(parser) => parser(response),
            None => response,
        }
    }

    pub fn url(&self) -> RippleResult<String> {
        self.inner.config.url.clone().ok_or(RippleError::MissingUrl)
    }

    pub(crate) fn transport(&self) -> Option<Rc<dyn Transport>> {
        self.inner.config.transport.clone()
    }

    /// New collection with the same configuration and members
    pub fn clone_collection(&self) -> Collection {
        let copy = Collection::new(self.inner.config.clone());
        copy.set_comparator(self.comparator());
        copy.reset(self.models(), UpdateOptions::silent());
        copy
    }

    /// Add elements without removing anything; existing members are merged
    /// unless `merge` is turned off
    pub fn add(&self, batch: impl Into<Batch>, options: UpdateOptions) -> Vec<Model> {
        self.set(batch, options.with_add(true).with_remove(false))
    }

    pub fn add_one(&self, item: impl Into<Item>, options: UpdateOptions) -> Option<Model> {
        self.add(Batch::One(item.into()), options).into_iter().next()
    }

    /// Remove members; unknown lookups are ignored
    pub fn remove<I, L>(&self, lookups: I, options: UpdateOptions) -> Vec<Model>
    where
        I: IntoIterator<Item = L>,
        L: Into<Lookup>,
    {
        let targets: Vec<Model> = lookups.into_iter().filter_map(|l| self.get(l)).collect();
        let removed = self.remove_models(targets, &options);
        if !options.silent && !removed.is_empty() {
            let changes = Changes {
                removed: removed.clone(),
                ..Default::default()
            };
            self.trigger(
                UPDATE,
                &Event::Update {
                    collection: self.clone(),
                    changes,
                    options,
                },
            );
        }
        removed
    }

    pub fn remove_one(&self, lookup: impl Into<Lookup>, options: UpdateOptions) -> Option<Model> {
        let lookup: Lookup = lookup.into();
        self.remove([lookup], options).into_iter().next()
    }

    /// Replace every member without per-element events; one `reset` at the end
    pub fn reset(&self, batch: impl Into<Batch>, options: UpdateOptions) -> Vec<Model> {
        let previous = std::mem::take(&mut *self.inner.members.borrow_mut()).models;
        for model in &previous {
            self.detach(model);
        }

        let silent = options.silent;
        let added = self.add(batch, options.clone().with_silent(true));
        tracing::debug!(previous = previous.len(), current = self.len(), "collection reset");
        if !silent {
            self.trigger(
                RESET,
                &Event::Reset {
                    collection: self.clone(),
                    previous,
                    options,
                },
            );
        }
        added
    }

    pub fn push(&self, item: impl Into<Item>, options: UpdateOptions) -> Option<Model> {
        let at = self.len() as isize;
        self.add_one(item, options.with_at(at))
    }

    pub fn pop(&self, options: UpdateOptions) -> Option<Model> {
        let last = self.at(-1)?;
        self.remove_one(last, options)
    }

    pub fn unshift(&self, item: impl Into<Item>, options: UpdateOptions) -> Option<Model> {
        self.add_one(item, options.with_at(0))
    }

    pub fn shift(&self, options: UpdateOptions) -> Option<Model> {
        let first = self.at(0)?;
        self.remove_one(first, options)
    }

    /// Stable sort by the comparator; `sort` fires unless silent
    pub fn sort(&self, options: UpdateOptions) -> RippleResult<()> {
        let comparator = self.comparator().ok_or(RippleError::MissingComparator)?;
        let mut models = self.models();
        comparator.sort(&mut models);
        tracing::trace!(len = models.len(), "collection sorted");
        self.inner.members.borrow_mut().models = models;
        if !options.silent {
            self.trigger(
                SORT,
                &Event::Sort {
                    collection: self.clone(),
                    options,
                },
            );
        }
        Ok(())
    }

    /// Build a member from an incoming element. Models are used as they
    /// are; attributes go through the model config. Invalid elements are
    /// reported with `invalid` on the collection and yield `None`.
    pub(crate) fn prepare(&self, item: Item, options: &UpdateOptions) -> Option<Model> {
        let attrs = match item {
            Item::Model(model) => {
                if model.collection().is_none() {
                    model.set_collection(Some(self));
                }
                return Some(model);
            }
            Item::Attrs(attrs) => attrs,
        };

        let set_options = SetOptions {
            silent: false,
            unset: false,
            validate: options.validate,
            parse: options.parse,
        };
        let model = Model::build(self.model_config(), attrs, set_options, Some(self));
        match model.validation_error() {
            Some(error) if options.validate => {
                tracing::warn!(cid = %model.cid(), %error, "rejected invalid element");
                self.trigger(INVALID, &Event::Invalid { model, error });
                None
            }
            _ => Some(model),
        }
    }

    /// Subscribe the collection to a member's events
    pub(crate) fn wire(&self, model: &Model) {
        if model.collection().is_none() {
            model.set_collection(Some(self));
        }
        model
            .emitter()
            .bind(ALL, &self.inner.relay, Some(self.listen_id()));
    }

    fn detach(&self, model: &Model) {
        if model.belongs_to(self) {
            model.set_collection(None);
        }
        model
            .emitter()
            .unbind(None, Some(&self.inner.relay), Some(self.listen_id()));
    }

    /// Drop members one at a time. Each one leaves the order and the
    /// index before its `remove` event fires, and is unwired after it.
    pub(crate) fn remove_models(&self, models: Vec<Model>, options: &UpdateOptions) -> Vec<Model> {
        let mut removed = Vec::with_capacity(models.len());
        for model in models {
            let index = {
                let mut members = self.inner.members.borrow_mut();
                let Some(index) = members.position(&model) else {
                    continue;
                };
                members.models.remove(index);
                members.unindex(&model);
                index
            };

            if !options.silent {
                model.trigger(
                    REMOVE,
                    &Event::Remove {
                        model: model.clone(),
                        collection: self.clone(),
                        index,
                        options: options.clone(),
                    },
                );
            }
            self.detach(&model);
            removed.push(model);
        }
        removed
    }

    fn reindex(&self, model: &Model, previous: Option<&Value>) {
        let mut members = self.inner.members.borrow_mut();
        if members.position(model).is_none() {
            return;
        }
        if let Some(key) = previous.and_then(IndexKey::id) {
            members.unindex_key(&key, model);
        }
        if let Some(key) = model.id().as_ref().and_then(IndexKey::id) {
            members.by_id.insert(key, model.clone());
        }
    }

    fn on_member_event(&self, name: &str, event: &Event) {
        match event {
            Event::Add { collection, .. } | Event::Remove { collection, .. } if !collection.ptr_eq(self) => {
                return;
            }
            Event::Destroy { model, .. } if name == DESTROY => {
                self.remove_one(model, UpdateOptions::default());
            }
            Event::IdChange { model, previous, .. } if name == CHANGE_ID => {
                self.reindex(model, previous.as_ref());
            }
            _ => {}
        }
        self.trigger(name, event);
    }
}

fn matches(model: &Model, attrs: &Attributes) -> bool {
    attrs
        .iter()
        .all(|(name, value)| model.get(name).is_some_and(|v| values_equal(&v, value)))
}

impl Default for Collection {
    fn default() -> Self {
        Self::new(CollectionConfig::default())
    }
}

impl Events<Event> for Collection {
    fn emitter(&self) -> &Emitter<Event> {
        &self.inner.events
    }
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Collection");
        out.field("id", &self.inner.events.id());
        match self.inner.members.try_borrow() {
            Ok(members) => out.field("len", &members.models.len()).finish(),
            Err(_) => out.finish_non_exhaustive(),
        }
    }
}
