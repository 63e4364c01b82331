//! Bulk reconciliation of a collection against an incoming batch
//!
//! One pass resolves every element to an existing member, a member merged
//! with new attributes, or a freshly built model. Stale members are removed
//! before anything new is spliced in, so handlers never observe an index
//! that contains models which are not (yet) members.
//!
//! Merges into models built earlier in the same pass are applied
//! silently, since those models are not wired to the collection yet.
//!
//! Event order for a non-silent pass:
//! 1. `change:*` / `change` on merged members (during resolution)
//! 2. `remove` per removed member
//! 3. `add` per added member, in insertion order
//! 4. at most one `sort`
//! 5. at most one `update`

use std::collections::{HashMap, HashSet};

use ripple_core::{slots_equal, Cid, Value};
use ripple_events::Events;

use crate::collection::{clamp_index, Batch, Collection, IndexKey, Item};
use crate::event::{Changes, Event, ADD, SORT, UPDATE};
use crate::model::Model;
use crate::options::UpdateOptions;

/// Models built during the current pass, not yet members
#[derive(Default)]
struct Pending {
    by_key: HashMap<IndexKey, Model>,
    cids: HashSet<Cid>,
}

impl Pending {
    fn insert(&mut self, model: &Model) {
        self.cids.insert(model.cid());
        self.by_key.insert(IndexKey::Cid(model.cid()), model.clone());
        if let Some(key) = model.id().as_ref().and_then(IndexKey::id) {
            self.by_key.insert(key, model.clone());
        }
    }

    fn rekey(&mut self, model: &Model, previous: Option<&Value>) {
        if let Some(key) = previous.and_then(IndexKey::id) {
            if self.by_key.get(&key).is_some_and(|m| m.ptr_eq(model)) {
                self.by_key.remove(&key);
            }
        }
        if let Some(key) = model.id().as_ref().and_then(IndexKey::id) {
            self.by_key.insert(key, model.clone());
        }
    }

    fn contains(&self, model: &Model) -> bool {
        self.cids.contains(&model.cid())
    }
}

impl Collection {
    fn resolve(&self, item: &Item, pending: &Pending) -> Option<Model> {
        let keys: Vec<IndexKey> = match item {
            Item::Model(model) => model
                .id()
                .as_ref()
                .and_then(IndexKey::id)
                .into_iter()
                .chain([IndexKey::Cid(model.cid())])
                .collect(),
            Item::Attrs(attrs) => self
                .model_id(attrs)
                .as_ref()
                .and_then(IndexKey::id)
                .into_iter()
                .collect(),
        };
        let members = self.inner.members.borrow();
        keys.iter()
            .find_map(|key| members.by_id.get(key).or_else(|| pending.by_key.get(key)))
            .cloned()
    }

    /// Reconcile the collection against `batch`.
    ///
    /// Returns the model every element resolved to, in input order.
    /// Elements that failed validation are left out.
    pub fn set(&self, batch: impl Into<Batch>, options: UpdateOptions) -> Vec<Model> {
        let items = batch.into().into_items();
        let merge = options.merge;
        let at = options.at.map(|at| clamp_index(at, self.len()));
        let comparator = self.comparator();
        let sortable = comparator.is_some() && at.is_none() && options.sort;
        let sort_attr = comparator
            .as_ref()
            .and_then(|c| c.sort_attribute().map(str::to_string));
        let set_options = options.set_options();

        let mut pending = Pending::default();
        let mut seen: HashSet<Cid> = HashSet::new();
        let mut order: Vec<Model> = Vec::new();
        let mut to_add: Vec<Model> = Vec::new();
        let mut merged: Vec<Model> = Vec::new();
        let mut resolved: Vec<Model> = Vec::with_capacity(items.len());
        let mut sort = false;

        for item in items {
            if let Some(existing) = self.resolve(&item, &pending) {
                let same = matches!(&item, Item::Model(m) if m.ptr_eq(&existing));
                if merge && !same {
                    let attrs = match item {
                        Item::Model(model) => model.attributes(),
                        Item::Attrs(attrs) if options.parse => existing.parse(Value::Object(attrs)),
                        Item::Attrs(attrs) => attrs,
                    };
                    let previous_id = existing.id();
                    if pending.contains(&existing) {
                        // pending models are not wired yet
                        let quiet = set_options.clone().with_silent(true);
                        if existing.set(attrs, quiet).is_ok() {
                            pending.rekey(&existing, previous_id.as_ref());
                        }
                    } else {
                        let diff: Vec<String> = attrs
                            .iter()
                            .filter(|(name, value)| !slots_equal(existing.get(name).as_ref(), Some(*value)))
                            .map(|(name, _)| name.clone())
                            .collect();
                        let applied = existing.set(attrs, set_options.clone()).is_ok();
                        if applied && !diff.is_empty() {
                            if !merged.iter().any(|m| m.ptr_eq(&existing)) {
                                merged.push(existing.clone());
                            }
                            if sortable && !sort {
                                sort = sort_attr.as_ref().map_or(true, |name| diff.contains(name));
                            }
                        }
                    }
                }
                if seen.insert(existing.cid()) {
                    order.push(existing.clone());
                }
                resolved.push(existing);
            } else if options.add {
                let Some(model) = self.prepare(item, &options) else {
                    continue;
                };
                pending.insert(&model);
                seen.insert(model.cid());
                order.push(model.clone());
                to_add.push(model.clone());
                resolved.push(model);
            }
        }

        let mut removed = Vec::new();
        if options.remove {
            let stale: Vec<Model> = self
                .inner
                .members
                .borrow()
                .models
                .iter()
                .filter(|m| !seen.contains(&m.cid()))
                .cloned()
                .collect();
            if !stale.is_empty() {
                removed = self.remove_models(stale, &options);
            }
        }

        let replace = !sortable && options.add && options.remove && at.is_none();
        let mut order_changed = false;
        {
            let mut members = self.inner.members.borrow_mut();
            if replace && !order.is_empty() {
                // handlers run during resolution may have changed membership
                order.retain(|m| pending.contains(m) || members.by_id.contains_key(&IndexKey::Cid(m.cid())));
                let extra: Vec<Model> = members
                    .models
                    .iter()
                    .filter(|m| !seen.contains(&m.cid()))
                    .cloned()
                    .collect();
                let mut before = members.models.iter();
                order_changed = order
                    .iter()
                    .filter(|m| !pending.contains(m))
                    .any(|m| !before.next().is_some_and(|b| b.ptr_eq(m)));
                order.extend(extra);
                members.models = order;
            } else if !to_add.is_empty() {
                if sortable {
                    sort = true;
                }
                let len = members.models.len();
                let index = at.unwrap_or(len).min(len);
                members.models.splice(index..index, to_add.iter().cloned());
            }
            for model in &to_add {
                members.index(model);
            }
        }
        for model in &to_add {
            self.wire(model);
        }

        if sort {
            let _ = self.sort(UpdateOptions::silent());
        }

        tracing::debug!(
            added = to_add.len(),
            removed = removed.len(),
            merged = merged.len(),
            sorted = sort,
            "reconciled collection"
        );

        if !options.silent {
            for (i, model) in to_add.iter().enumerate() {
                model.trigger(
                    ADD,
                    &Event::Add {
                        model: model.clone(),
                        collection: self.clone(),
                        index: at.map(|at| at + i),
                        options: options.clone(),
                    },
                );
            }
            if sort || order_changed {
                self.trigger(
                    SORT,
                    &Event::Sort {
                        collection: self.clone(),
                        options: options.clone(),
                    },
                );
            }
            let changes = Changes {
                added: to_add,
                removed,
                merged,
            };
            if !changes.is_empty() {
                self.trigger(
                    UPDATE,
                    &Event::Update {
                        collection: self.clone(),
                        changes,
                        options,
                    },
                );
            }
        }

        resolved
    }

    /// `set` for a single element
    pub fn set_one(&self, item: impl Into<Item>, options: UpdateOptions) -> Option<Model> {
        self.set(Batch::One(item.into()), options).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use ripple_core::{into_attributes, Attributes};
    use ripple_events::ALL;
    use serde_json::json;

    use super::*;
    use crate::config::{CollectionConfig, Comparator, ModelConfig};
    use crate::event::{CHANGE, INVALID, REMOVE};
    use crate::options::SetOptions;
    use ripple_core::ValidationError;

    fn attrs(value: Value) -> Attributes {
        into_attributes(value)
    }

    fn ids(collection: &Collection) -> Vec<i64> {
        collection
            .pluck("id")
            .into_iter()
            .map(|v| v.and_then(|v| v.as_i64()).unwrap_or(-1))
            .collect()
    }

    fn ranked() -> Collection {
        Collection::new(CollectionConfig::new().with_comparator(Comparator::attribute("rank")))
    }

    fn record(collection: &Collection) -> Rc<RefCell<Vec<String>>> {
        let log: Rc<RefCell<Vec<String>>> = Rc::default();
        let l = Rc::clone(&log);
        collection.on(ALL, move |name, _| l.borrow_mut().push(name.to_string()));
        log
    }

    #[test]
    fn test_duplicate_ids_in_one_batch() {
        let collection = Collection::default();
        let resolved = collection.add(
            json!([{"id": 1, "v": "a", "keep": true}, {"id": 1, "v": "b", "w": 1}]),
            UpdateOptions::add(),
        );
        assert_eq!(collection.len(), 1);
        assert_eq!(resolved.len(), 2);
        assert!(resolved[0].ptr_eq(&resolved[1]));
        assert_eq!(
            collection.get(1).unwrap().attributes(),
            attrs(json!({"id": 1, "v": "b", "keep": true, "w": 1}))
        );

        let collection = Collection::default();
        collection.set(json!([{"id": 1, "v": "a"}, {"id": 1, "v": "b"}]), UpdateOptions::set());
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.get(1).unwrap().get("v"), Some(json!("b")));
    }

    #[test]
    fn test_duplicate_merge_into_new_model_is_silent() {
        let collection = Collection::default();
        let log = record(&collection);
        collection.add(json!([{"id": 1, "v": "a"}, {"id": 1, "v": "b"}]), UpdateOptions::add());
        assert_eq!(*log.borrow(), vec!["add", "update"]);
        assert_eq!(collection.get(1).unwrap().get("v"), Some(json!("b")));
    }

    #[test]
    fn test_remove_before_add() {
        let collection = Collection::with_models(
            CollectionConfig::default(),
            json!([{"id": 1}, {"id": 2}, {"id": 3}]),
            UpdateOptions::default(),
        );
        let log = record(&collection);

        collection.set(json!([{"id": 2}, {"id": 4}]), UpdateOptions::set());

        assert_eq!(*log.borrow(), vec!["remove", "remove", "add", "update"]);
        assert_eq!(ids(&collection), vec![2, 4]);
    }

    #[test]
    fn test_handlers_see_consistent_index() {
        let collection = Collection::with_models(
            CollectionConfig::default(),
            json!([{"id": 1}, {"id": 2}]),
            UpdateOptions::default(),
        );
        let c = collection.clone();
        let checked = Rc::new(Cell::new(0));
        let k = Rc::clone(&checked);
        collection.on(REMOVE, move |_, _| {
            k.set(k.get() + 1);
            assert!(c.get(5).is_none());
            assert!(c.get(1).is_none());
            assert_eq!(c.len(), 1);
        });

        collection.set(json!([{"id": 2}, {"id": 5}]), UpdateOptions::set());

        assert_eq!(checked.get(), 1);
        assert!(collection.get(5).is_some());
    }

    #[test]
    fn test_stable_sort_on_add() {
        let collection = ranked();
        collection.add(json!({"id": 3, "rank": 1.5}), UpdateOptions::add());
        collection.add(json!([{"id": 1, "rank": 2}, {"id": 2, "rank": 1}]), UpdateOptions::add());
        assert_eq!(ids(&collection), vec![2, 3, 1]);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let collection = ranked();
        collection.add(
            json!([{"id": 1, "rank": 1}, {"id": 2, "rank": 0}, {"id": 3, "rank": 1}, {"id": 4}]),
            UpdateOptions::add(),
        );
        assert_eq!(ids(&collection), vec![2, 1, 3, 4]);
    }

    #[test]
    fn test_explicit_index_skips_sort() {
        let collection = ranked();
        collection.add(json!([{"id": 1, "rank": 1}, {"id": 2, "rank": 2}]), UpdateOptions::add());
        let log = record(&collection);

        collection.add(json!({"id": 3, "rank": 0}), UpdateOptions::add().with_at(-1));
        assert_eq!(ids(&collection), vec![1, 2, 3]);
        assert_eq!(*log.borrow(), vec!["add", "update"]);

        collection.add(json!({"id": 4}), UpdateOptions::add().with_at(1));
        assert_eq!(ids(&collection), vec![1, 4, 2, 3]);
    }

    #[test]
    fn test_add_index_in_event() {
        let collection = Collection::with_models(
            CollectionConfig::default(),
            json!([{"id": 1}, {"id": 2}]),
            UpdateOptions::default(),
        );
        let indexes: Rc<RefCell<Vec<Option<usize>>>> = Rc::default();
        let i = Rc::clone(&indexes);
        collection.on(ADD, move |_, event| {
            if let Event::Add { index, .. } = event {
                i.borrow_mut().push(*index);
            }
        });

        collection.add(json!([{"id": 7}, {"id": 8}]), UpdateOptions::add().with_at(1));
        collection.add(json!({"id": 9}), UpdateOptions::add());

        assert_eq!(*indexes.borrow(), vec![Some(1), Some(2), None]);
        assert_eq!(ids(&collection), vec![1, 7, 8, 2, 9]);
    }

    #[test]
    fn test_merge_resorts_only_on_sort_attribute() {
        let collection = ranked();
        collection.add(json!([{"id": 1, "rank": 1}, {"id": 2, "rank": 2}]), UpdateOptions::add());
        let log = record(&collection);

        collection.set(json!([{"id": 1, "name": "x"}]), UpdateOptions::set().with_remove(false));
        assert_eq!(*log.borrow(), vec!["change:name", "change", "update"]);

        log.borrow_mut().clear();
        collection.set(json!([{"id": 1, "rank": 3}]), UpdateOptions::set().with_remove(false));
        assert_eq!(*log.borrow(), vec!["change:rank", "change", "sort", "update"]);
        assert_eq!(ids(&collection), vec![2, 1]);
    }

    #[test]
    fn test_add_merges_existing_members() {
        let collection = Collection::with_models(
            CollectionConfig::default(),
            json!([{"id": 1, "v": 1}]),
            UpdateOptions::default(),
        );
        let log = record(&collection);
        collection.add(json!({"id": 1, "v": 2}), UpdateOptions::add());
        assert_eq!(collection.get(1).unwrap().get("v"), Some(json!(2)));
        assert_eq!(*log.borrow(), vec!["change:v", "change", "update"]);
    }

    #[test]
    fn test_merge_disabled_leaves_members() {
        let collection = Collection::with_models(
            CollectionConfig::default(),
            json!([{"id": 1, "v": 1}]),
            UpdateOptions::default(),
        );
        let log = record(&collection);
        collection.add(json!({"id": 1, "v": 2}), UpdateOptions::add().with_merge(false));
        assert_eq!(collection.get(1).unwrap().get("v"), Some(json!(1)));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_rejected_merge_is_not_reported() {
        let model = ModelConfig::new().with_validator(|attrs: &Attributes, _: &SetOptions| {
            match attrs.get("rank").and_then(Value::as_i64) {
                Some(rank) if rank < 0 => Err(ValidationError::on("rank", "negative")),
                _ => Ok(()),
            }
        });
        let collection = Collection::new(
            CollectionConfig::new()
                .with_model(model)
                .with_comparator(Comparator::attribute("rank")),
        );
        collection.add(json!([{"id": 1, "rank": 1}, {"id": 2, "rank": 2}]), UpdateOptions::add());
        // leaves a stale `changed` entry for the sort attribute
        collection.get(1).unwrap().set_attr("rank", 5, SetOptions::default()).unwrap();
        assert_eq!(ids(&collection), vec![1, 2]);
        let log = record(&collection);

        collection.set(
            json!([{"id": 1, "rank": -1}]),
            UpdateOptions::set().with_remove(false).with_validate(true),
        );

        assert_eq!(*log.borrow(), vec![INVALID]);
        assert_eq!(ids(&collection), vec![1, 2]);
        assert_eq!(collection.get(1).unwrap().get("rank"), Some(json!(5)));
    }

    #[test]
    fn test_member_removed_by_merge_handler_stays_out() {
        let collection = Collection::with_models(
            CollectionConfig::default(),
            json!([{"id": 1, "v": 1}, {"id": 2}]),
            UpdateOptions::default(),
        );
        let member = collection.get(1).unwrap();
        let c = collection.clone();
        member.on("change:v", move |_, event| {
            if let Some(model) = event.model() {
                c.remove_one(model, UpdateOptions::default());
            }
        });

        collection.set(json!([{"id": 1, "v": 2}, {"id": 2}]), UpdateOptions::set());

        assert_eq!(ids(&collection), vec![2]);
        assert!(!collection.has(1));
        assert!(!member.belongs_to(&collection));
        for model in collection.iter() {
            assert!(collection.get(model.cid()).is_some_and(|m| m.ptr_eq(&model)));
        }
    }

    #[test]
    fn test_update_carries_changes() {
        let collection = Collection::with_models(
            CollectionConfig::default(),
            json!([{"id": 1, "v": 1}, {"id": 2}]),
            UpdateOptions::default(),
        );
        let changes: Rc<RefCell<Option<Changes>>> = Rc::default();
        let c = Rc::clone(&changes);
        collection.on(UPDATE, move |_, event| {
            if let Event::Update { changes, .. } = event {
                *c.borrow_mut() = Some(changes.clone());
            }
        });

        collection.set(json!([{"id": 1, "v": 5}, {"id": 3}]), UpdateOptions::set());

        let changes = changes.borrow().clone().unwrap();
        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.added[0].id(), Some(json!(3)));
        assert_eq!(changes.removed[0].id(), Some(json!(2)));
        assert_eq!(changes.merged[0].id(), Some(json!(1)));
    }

    #[test]
    fn test_unchanged_set_is_quiet() {
        let collection = Collection::with_models(
            CollectionConfig::default(),
            json!([{"id": 1, "v": 1}, {"id": 2}]),
            UpdateOptions::default(),
        );
        let log = record(&collection);
        collection.set(json!([{"id": 1, "v": 1}, {"id": 2}]), UpdateOptions::set());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_set_reorders_without_comparator() {
        let collection = Collection::with_models(
            CollectionConfig::default(),
            json!([{"id": 1}, {"id": 2}, {"id": 3}]),
            UpdateOptions::default(),
        );
        let log = record(&collection);

        collection.set(json!([{"id": 3}, {"id": 1}, {"id": 2}]), UpdateOptions::set());

        assert_eq!(ids(&collection), vec![3, 1, 2]);
        assert_eq!(*log.borrow(), vec!["sort"]);
    }

    #[test]
    fn test_set_existing_model_instance() {
        let collection = Collection::with_models(
            CollectionConfig::default(),
            json!([{"id": 1}]),
            UpdateOptions::default(),
        );
        let member = collection.get(1).unwrap();
        let log = record(&collection);

        let resolved = collection.set(vec![member.clone()], UpdateOptions::set());
        assert!(resolved[0].ptr_eq(&member));
        assert!(log.borrow().is_empty());

        let twin = Model::new(attrs(json!({"id": 1, "v": 2})));
        let resolved = collection.set_one(&twin, UpdateOptions::set()).unwrap();
        assert!(resolved.ptr_eq(&member));
        assert_eq!(member.get("v"), Some(json!(2)));
        assert!(!collection.has(twin.cid()));
    }

    #[test]
    fn test_invalid_elements_are_skipped() {
        let model = ModelConfig::new().with_validator(|attrs: &Attributes, _: &SetOptions| {
            if attrs.contains_key("title") {
                Ok(())
            } else {
                Err(ValidationError::on("title", "required"))
            }
        });
        let collection = Collection::new(CollectionConfig::new().with_model(model));
        let log = record(&collection);

        let resolved = collection.add(
            json!([{"id": 1, "title": "ok"}, {"id": 2}]),
            UpdateOptions::add().with_validate(true),
        );

        assert_eq!(resolved.len(), 1);
        assert_eq!(ids(&collection), vec![1]);
        assert_eq!(*log.borrow(), vec![INVALID, ADD, UPDATE]);

        // without validation the same element is accepted
        collection.add(json!({"id": 2}), UpdateOptions::add());
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn test_parse_on_merge_and_build() {
        let model = ModelConfig::new().with_parser(|raw| into_attributes(raw["row"].clone()));
        let collection = Collection::new(CollectionConfig::new().with_model(model));
        let options = UpdateOptions::add().with_parse(true).with_merge(true);

        collection.add(json!({"row": {"id": 1, "v": 1}}), options.clone());
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.at(0).unwrap().get("v"), Some(json!(1)));

        // lookup sees the raw record, so the id rule has to read it too
        let model = ModelConfig::new()
            .with_parser(|raw| into_attributes(raw["row"].clone()))
            .with_id_rule(crate::config::IdRule::custom(|attrs| {
                attrs
                    .get("row")
                    .and_then(|row| row.get("id"))
                    .or_else(|| attrs.get("id"))
                    .cloned()
            }));
        let collection = Collection::new(CollectionConfig::new().with_model(model));
        collection.add(json!({"row": {"id": 1, "v": 1}}), options.clone());
        collection.add(json!({"row": {"id": 1, "v": 2}}), options);
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.at(0).unwrap().get("v"), Some(json!(2)));
    }

    #[test]
    fn test_silent_set_emits_nothing_but_updates() {
        let collection = ranked();
        let log = record(&collection);
        collection.set(json!([{"id": 1, "rank": 2}, {"id": 2, "rank": 1}]), UpdateOptions::silent());
        assert!(log.borrow().is_empty());
        assert_eq!(ids(&collection), vec![2, 1]);

        // members are wired even when added silently
        collection.get(1).unwrap().set_attr("x", 1, SetOptions::default()).unwrap();
        assert_eq!(*log.borrow(), vec!["change:x", CHANGE]);
    }

    #[test]
    fn test_add_handler_can_mutate_collection() {
        let collection = Collection::default();
        let c = collection.clone();
        collection.on(ADD, move |_, event| {
            let Some(model) = event.model() else { return };
            if model.get("spawn") == Some(json!(true)) {
                c.add(json!({"id": 100}), UpdateOptions::add());
            }
        });

        collection.add(json!([{"id": 1, "spawn": true}, {"id": 2}]), UpdateOptions::add());

        assert_eq!(collection.len(), 3);
        assert!(collection.has(100));
    }

    #[test]
    fn test_new_model_id_change_during_batch() {
        let collection = Collection::default();
        let resolved = collection.set(
            json!([{"v": 1}, {"id": 5, "v": 2}, {"id": 5, "v": 3}]),
            UpdateOptions::set(),
        );
        assert_eq!(collection.len(), 2);
        assert!(resolved[1].ptr_eq(&resolved[2]));
        assert_eq!(collection.get(5).unwrap().get("v"), Some(json!(3)));
    }
}
