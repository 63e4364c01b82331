//! Transport seam - the persistence collaborator
//!
//! Models and collections never talk to a server themselves. They hand a
//! `Request` to a `Transport` and get the outcome back through a `Reply`,
//! either synchronously or whenever the transport gets around to it.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;

use ripple_core::{id_key, Value};

use crate::collection::Collection;
use crate::model::Model;

/// CRUD verb
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Create,
    Read,
    Update,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Create => "create",
            Method::Read => "read",
            Method::Update => "update",
            Method::Patch => "patch",
            Method::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Entity a request is made for
#[derive(Clone, Debug)]
pub enum Target {
    Model(Model),
    Collection(Collection),
}

impl Target {
    pub fn model(&self) -> Option<&Model> {
        match self {
            Target::Model(model) => Some(model),
            Target::Collection(_) => None,
        }
    }

    pub fn collection(&self) -> Option<&Collection> {
        match self {
            Target::Collection(collection) => Some(collection),
            Target::Model(_) => None,
        }
    }
}

/// Outgoing request
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub url: String,
    /// Body for create / update / patch
    pub data: Option<Value>,
}

/// Completion handle; exactly one of `success` / `error` should be called
pub struct Reply {
    on_success: Box<dyn FnOnce(Value)>,
    on_error: Box<dyn FnOnce(Value)>,
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Reply")
    }
}

impl Reply {
    pub fn new(on_success: impl FnOnce(Value) + 'static, on_error: impl FnOnce(Value) + 'static) -> Self {
        Reply {
            on_success: Box::new(on_success),
            on_error: Box::new(on_error),
        }
    }

    pub fn success(self, response: Value) {
        (self.on_success)(response)
    }

    pub fn error(self, response: Value) {
        (self.on_error)(response)
    }
}

/// Persistence adapter
pub trait Transport {
    fn sync(&self, method: Method, target: Target, request: Request, reply: Reply);
}

/// In-memory transport. Records live under their url; `create` assigns
/// increasing integer ids. Replies are delivered synchronously.
#[derive(Default)]
pub struct MemoryTransport {
    records: RefCell<BTreeMap<String, Value>>,
    next_id: Cell<u64>,
    log: RefCell<Vec<(Method, String)>>,
    fail_next: RefCell<Option<Value>>,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("records", &self.records.borrow().len())
            .field("requests", &self.log.borrow().len())
            .finish()
    }
}

fn child_url(base: &str, id: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{id}")
    } else {
        format!("{base}/{id}")
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record under `url`
    pub fn insert(&self, url: impl Into<String>, record: Value) {
        self.records.borrow_mut().insert(url.into(), record);
    }

    pub fn record(&self, url: &str) -> Option<Value> {
        self.records.borrow().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    /// Requests seen so far, oldest first
    pub fn requests(&self) -> Vec<(Method, String)> {
        self.log.borrow().clone()
    }

    /// Answer the next request with an error
    pub fn fail_next(&self, response: Value) {
        *self.fail_next.borrow_mut() = Some(response);
    }

    fn id_attribute(target: &Target) -> String {
        target
            .model()
            .and_then(|m| m.config().id_rule.attribute().map(str::to_string))
            .unwrap_or_else(|| "id".to_string())
    }

    fn handle(&self, method: Method, target: &Target, request: Request) -> Result<Value, Value> {
        let url = request.url;
        match method {
            Method::Create => {
                let id = self.next_id.get() + 1;
                self.next_id.set(id);
                let mut record = match request.data {
                    Some(Value::Object(map)) => map,
                    _ => Default::default(),
                };
                record.insert(Self::id_attribute(target), Value::from(id));
                let record = Value::Object(record);
                self.records
                    .borrow_mut()
                    .insert(child_url(&url, &id.to_string()), record.clone());
                Ok(record)
            }
            Method::Read => match target {
                Target::Model(_) => self
                    .record(&url)
                    .ok_or_else(|| serde_json::json!({ "status": 404, "url": url })),
                Target::Collection(_) => {
                    let prefix = child_url(&url, "");
                    let records = self.records.borrow();
                    let items = records
                        .range(prefix.clone()..)
                        .take_while(|(key, _)| key.starts_with(&prefix))
                        .filter(|(key, _)| !key[prefix.len()..].contains('/'))
                        .map(|(_, record)| record.clone())
                        .collect();
                    Ok(Value::Array(items))
                }
            },
            Method::Update => {
                let record = request.data.unwrap_or(Value::Null);
                self.records.borrow_mut().insert(url, record.clone());
                Ok(record)
            }
            Method::Patch => {
                let mut records = self.records.borrow_mut();
                let Some(Value::Object(existing)) = records.get_mut(&url) else {
                    return Err(serde_json::json!({ "status": 404, "url": url }));
                };
                if let Some(Value::Object(changes)) = request.data {
                    for (key, value) in changes {
                        existing.insert(key, value);
                    }
                }
                Ok(Value::Object(existing.clone()))
            }
            Method::Delete => {
                self.records.borrow_mut().remove(&url);
                Ok(Value::Null)
            }
        }
    }
}

impl Transport for MemoryTransport {
    fn sync(&self, method: Method, target: Target, request: Request, reply: Reply) {
        tracing::debug!(%method, url = %request.url, "memory transport request");
        self.log.borrow_mut().push((method, request.url.clone()));

        let failure = self.fail_next.borrow_mut().take();
        if let Some(response) = failure {
            reply.error(response);
            return;
        }

        match self.handle(method, &target, request) {
            Ok(response) => reply.success(response),
            Err(response) => reply.error(response),
        }
    }
}

/// Path segment for an id
pub(crate) fn url_segment(id: &Value) -> String {
    urlencoding::encode(&id_key(id).unwrap_or_default()).into_owned()
}
