//! Collection Fuzzer - randomized operation sequences against a collection
//!
//! Tests:
//! - Index consistency (every member reachable by cid and id)
//! - No duplicate members or ids
//! - Sort order maintained when a comparator is configured
//! - Event ordering of each reconciliation pass

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ripple_core::{id_key, into_attributes, Attributes};
use ripple_state::{Collection, CollectionConfig, Comparator, Model, SetOptions, UpdateOptions};
use serde_json::json;

use crate::recorder::{reconcile_order_ok, EventRecorder};

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    /// Number of distinct ids records are drawn from
    pub id_space: u64,
    /// Number of operations to run
    pub op_count: usize,
    /// Maximum records per batch
    pub batch_size: usize,
    /// Keep the collection sorted by `rank`
    pub sorted: bool,
    /// Probability that a record carries no id
    pub anonymous_prob: f64,
    /// Probability that an operation is silent
    pub silent_prob: f64,
    /// Random seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            id_space: 50,
            op_count: 1000,
            batch_size: 12,
            sorted: true,
            anonymous_prob: 0.1,
            silent_prob: 0.1,
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            id_space: 10,
            op_count: 100,
            batch_size: 5,
            sorted: false,
            anonymous_prob: 0.1,
            silent_prob: 0.0,
            seed: 42,
        }
    }

    /// Heavy fuzzing for thorough testing
    pub fn heavy() -> Self {
        FuzzerConfig {
            id_space: 500,
            op_count: 10000,
            batch_size: 40,
            sorted: true,
            anonymous_prob: 0.2,
            silent_prob: 0.2,
            seed: 42,
        }
    }
}

/// One generated operation
#[derive(Clone, Debug)]
pub enum FuzzOp {
    Set(Vec<Attributes>),
    Add { records: Vec<Attributes>, merge: bool },
    Remove(Vec<u64>),
    Reset(Vec<Attributes>),
    /// Write a non-sort attribute on a member
    Touch { index: usize, value: u64 },
    /// Move a member to a fresh id
    Rekey { index: usize, id: u64 },
    Push(Attributes),
    Pop,
    Shift,
}

/// Collection fuzzer
pub struct CollectionFuzzer {
    config: FuzzerConfig,
    collection: Collection,
    recorder: EventRecorder,
    rng: StdRng,
    next_fresh_id: u64,
}

impl CollectionFuzzer {
    /// Create a new fuzzer
    pub fn new(config: FuzzerConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let mut collection_config = CollectionConfig::new();
        if config.sorted {
            collection_config = collection_config.with_comparator(Comparator::attribute("rank"));
        }
        let collection = Collection::new(collection_config);
        let recorder = EventRecorder::attach(&collection);
        let next_fresh_id = config.id_space;

        CollectionFuzzer {
            config,
            collection,
            recorder,
            rng,
            next_fresh_id,
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    fn generate_record(&mut self) -> Attributes {
        let rank = self.rng.gen_range(0..20);
        let value: u8 = self.rng.gen();
        if self.rng.gen::<f64>() < self.config.anonymous_prob {
            into_attributes(json!({"rank": rank, "v": value}))
        } else {
            let id = self.rng.gen_range(0..self.config.id_space);
            into_attributes(json!({"id": id, "rank": rank, "v": value}))
        }
    }

    fn generate_batch(&mut self) -> Vec<Attributes> {
        let len = self.rng.gen_range(0..=self.config.batch_size);
        (0..len).map(|_| self.generate_record()).collect()
    }

    /// Generate a random operation
    fn generate_op(&mut self) -> FuzzOp {
        let len = self.collection.len();
        let kinds = if self.config.sorted { 7 } else { 9 };
        match self.rng.gen_range(0..kinds) {
            0 | 1 => FuzzOp::Set(self.generate_batch()),
            2 => FuzzOp::Add {
                records: self.generate_batch(),
                merge: self.rng.gen(),
            },
            3 => {
                let count = self.rng.gen_range(0..4);
                FuzzOp::Remove((0..count).map(|_| self.rng.gen_range(0..self.config.id_space)).collect())
            }
            4 if self.rng.gen::<f64>() < 0.2 => FuzzOp::Reset(self.generate_batch()),
            4 | 5 if len > 0 => FuzzOp::Touch {
                index: self.rng.gen_range(0..len),
                value: self.rng.gen(),
            },
            6 if len > 0 => {
                self.next_fresh_id += 1;
                FuzzOp::Rekey {
                    index: self.rng.gen_range(0..len),
                    id: self.next_fresh_id,
                }
            }
            7 => FuzzOp::Push(self.generate_record()),
            8 if self.rng.gen() => FuzzOp::Pop,
            8 => FuzzOp::Shift,
            _ => FuzzOp::Set(self.generate_batch()),
        }
    }

    fn options(&mut self) -> UpdateOptions {
        let silent = self.rng.gen::<f64>() < self.config.silent_prob;
        UpdateOptions::default().with_silent(silent)
    }

    /// Apply one operation, returning the events it produced
    pub fn apply(&mut self, op: FuzzOp) -> Vec<String> {
        self.recorder.clear();
        let options = self.options();
        match op {
            FuzzOp::Set(records) => {
                self.collection.set(records, options);
            }
            FuzzOp::Add { records, merge } => {
                self.collection.add(records, options.with_merge(merge));
            }
            FuzzOp::Remove(ids) => {
                self.collection.remove(ids, options);
            }
            FuzzOp::Reset(records) => {
                self.collection.reset(records, options);
            }
            FuzzOp::Touch { index, value } => {
                if let Some(model) = self.collection.at(index as isize) {
                    let _ = model.set_attr("v", value, SetOptions::default());
                }
            }
            FuzzOp::Rekey { index, id } => {
                if let Some(model) = self.collection.at(index as isize) {
                    let _ = model.set_attr("id", id, SetOptions::default());
                }
            }
            FuzzOp::Push(record) => {
                self.collection.push(record, options);
            }
            FuzzOp::Pop => {
                self.collection.pop(options);
            }
            FuzzOp::Shift => {
                self.collection.shift(options);
            }
        }
        self.recorder.take()
    }

    /// Run the fuzzer
    pub fn run(&mut self) -> FuzzResult {
        let mut result = FuzzResult::new();

        for _ in 0..self.config.op_count {
            let op = self.generate_op();
            let reconciles = matches!(op, FuzzOp::Set(_) | FuzzOp::Add { .. } | FuzzOp::Remove(_));
            let events = self.apply(op);
            result.operations += 1;

            if reconciles && !reconcile_order_ok(&events) {
                tracing::warn!(?events, "reconciliation events out of order");
                result.event_violations += 1;
            }
            self.check_invariants(&mut result);
        }

        result.final_len = self.collection.len();
        result
    }

    /// Check all invariants
    fn check_invariants(&self, result: &mut FuzzResult) {
        let models = self.collection.models();
        if !properties::no_duplicates(&models) {
            result.duplicate_violations += 1;
        }
        if !properties::index_consistent(&self.collection) {
            result.index_violations += 1;
        }
        if self.config.sorted && !properties::sorted_by(&models, "rank") {
            result.order_violations += 1;
        }
    }
}

/// Fuzzing result
#[derive(Debug, Default)]
pub struct FuzzResult {
    pub operations: u64,
    pub final_len: usize,
    pub duplicate_violations: u32,
    pub index_violations: u32,
    pub order_violations: u32,
    pub event_violations: u32,
}

impl FuzzResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.duplicate_violations == 0
            && self.index_violations == 0
            && self.order_violations == 0
            && self.event_violations == 0
    }
}

/// Property-based test helpers
pub mod properties {
    use super::*;
    use ripple_core::compare_values;
    use std::cmp::Ordering;

    /// Property: no model appears twice and no two members share an id
    pub fn no_duplicates(models: &[Model]) -> bool {
        let mut cids = HashSet::new();
        let mut ids = HashSet::new();
        models.iter().all(|m| {
            let id_unique = match m.id().as_ref().and_then(id_key) {
                Some(key) => ids.insert(key),
                None => true,
            };
            cids.insert(m.cid()) && id_unique
        })
    }

    /// Property: every member is found by cid and by id, and belongs here
    pub fn index_consistent(collection: &Collection) -> bool {
        collection.iter().all(|m| {
            let by_cid = collection.get(m.cid()).is_some_and(|found| found.ptr_eq(&m));
            let by_id = match m.id() {
                Some(id) => collection.get(id).is_some_and(|found| found.ptr_eq(&m)),
                None => true,
            };
            by_cid && by_id
        })
    }

    /// Property: members are in ascending order of `name`
    pub fn sorted_by(models: &[Model], name: &str) -> bool {
        models.windows(2).all(|pair| {
            compare_values(pair[0].get(name).as_ref(), pair[1].get(name).as_ref()) != Ordering::Greater
        })
    }

    /// Property: setting the same attributes twice changes nothing the
    /// second time
    pub fn set_idempotent(model: &Model, attrs: &Attributes) -> bool {
        let _ = model.set(attrs.clone(), SetOptions::default());
        let _ = model.set(attrs.clone(), SetOptions::default());
        !model.has_changed(None)
    }

    /// Property: ids of the members, as index keys
    pub fn id_keys(models: &[Model]) -> Vec<Option<String>> {
        models
            .iter()
            .map(|m| m.id().as_ref().and_then(id_key))
            .collect()
    }
}
