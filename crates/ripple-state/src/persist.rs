//! Fetch / save / destroy through the transport seam
//!
//! `request` is emitted before the transport is called. The outcome comes
//! back through a `Reply`: success runs the response through the parser,
//! applies it, calls the success hook and emits `sync`; failure calls the
//! error hook and emits `error`. Nothing is retried.

use std::rc::Rc;

use ripple_core::{into_attributes, Attributes, RippleError, RippleResult, Value};
use ripple_events::Events;

use crate::collection::{Collection, Item};
use crate::event::{Event, DESTROY, ERROR, REQUEST, SYNC};
use crate::model::Model;
use crate::options::{ResponseHook, SyncOptions};
use crate::transport::{url_segment, Method, Reply, Request, Target, Transport};

fn emit(target: &Target, name: &str, event: &Event) {
    match target {
        Target::Model(model) => model.trigger(name, event),
        Target::Collection(collection) => collection.trigger(name, event),
    }
}

fn announce(target: &Target, method: Method) {
    emit(
        target,
        REQUEST,
        &Event::Request {
            target: target.clone(),
            method,
        },
    );
}

/// Hand a request to the transport; failures go to the error hook and
/// the `error` event
fn dispatch(
    transport: &dyn Transport,
    method: Method,
    target: Target,
    request: Request,
    on_success: impl FnOnce(Value) + 'static,
    error: Option<ResponseHook>,
) {
    let failed = target.clone();
    let on_error = move |response: Value| {
        tracing::warn!(%method, %response, "sync failed");
        if let Some(hook) = &error {
            hook(&response);
        }
        emit(
            &failed,
            ERROR,
            &Event::Error {
                target: failed.clone(),
                response,
            },
        );
    };

    tracing::debug!(%method, url = %request.url, "sync request");
    transport.sync(method, target, request, Reply::new(on_success, on_error));
}

fn send(
    transport: &dyn Transport,
    method: Method,
    target: Target,
    request: Request,
    on_success: impl FnOnce(Value) + 'static,
    error: Option<ResponseHook>,
) {
    announce(&target, method);
    dispatch(transport, method, target, request, on_success, error);
}

fn finish(target: &Target, hook: Option<&ResponseHook>, response: Value) {
    tracing::trace!(%response, "sync response");
    if let Some(hook) = hook {
        hook(&response);
    }
    emit(
        target,
        SYNC,
        &Event::Sync {
            target: target.clone(),
            response,
        },
    );
}

impl Model {
    /// Resource url: the configured root, or the owning collection's url,
    /// followed by the encoded id once the model has one
    pub fn url(&self) -> RippleResult<String> {
        let base = match &self.config().url_root {
            Some(root) => root.clone(),
            None => self
                .collection()
                .ok_or(RippleError::MissingUrl)
                .and_then(|collection| collection.url())?,
        };
        let Some(id) = self.id() else {
            return Ok(base);
        };
        let separator = if base.ends_with('/') { "" } else { "/" };
        Ok(format!("{base}{separator}{}", url_segment(&id)))
    }

    fn transport(&self) -> Option<Rc<dyn Transport>> {
        self.config()
            .transport
            .clone()
            .or_else(|| self.collection().and_then(|c| c.transport()))
    }

    fn endpoint(&self) -> RippleResult<(Rc<dyn Transport>, String)> {
        let url = self.url()?;
        let transport = self
            .transport()
            .ok_or_else(|| RippleError::MissingTransport(url.clone()))?;
        Ok((transport, url))
    }

    fn response_attributes(&self, response: &Value, parse: bool) -> Attributes {
        if parse {
            self.parse(response.clone())
        } else {
            into_attributes(response.clone())
        }
    }

    /// Load the model's attributes from the transport
    pub fn fetch(&self, options: SyncOptions) -> RippleResult<()> {
        let (transport, url) = self.endpoint()?;

        let model = self.clone();
        let error = options.error.clone();
        let on_success = move |response: Value| {
            let attrs = model.response_attributes(&response, options.parse);
            if model.set(attrs, options.set_options(false)).is_err() {
                return;
            }
            finish(&Target::Model(model), options.success.as_ref(), response);
        };

        send(
            transport.as_ref(),
            Method::Read,
            Target::Model(self.clone()),
            Request { url, data: None },
            on_success,
            error,
        );
        Ok(())
    }

    /// Persist the model, optionally writing `attrs` first.
    ///
    /// Validation runs unless disabled. Without `wait` the attributes are
    /// set before the request; with `wait` they are only sent, and applied
    /// together with the server's response.
    pub fn save(&self, attrs: Option<Attributes>, options: SyncOptions) -> RippleResult<()> {
        let set_options = options.set_options(true);
        match &attrs {
            Some(attrs) if !options.wait => self.set(attrs.clone(), set_options.clone())?,
            Some(attrs) => self.check(attrs, &set_options)?,
            None => self.check(&Attributes::new(), &set_options)?,
        }

        let (transport, url) = self.endpoint()?;
        let method = if self.is_new() {
            Method::Create
        } else if options.patch {
            Method::Patch
        } else {
            Method::Update
        };

        let data = match (method, &attrs) {
            (Method::Patch, Some(attrs)) => attrs.clone(),
            _ => {
                let mut data = self.attributes();
                if options.wait {
                    for (name, value) in attrs.iter().flatten() {
                        data.insert(name.clone(), value.clone());
                    }
                }
                data
            }
        };

        let model = self.clone();
        let error = options.error.clone();
        let on_success = move |response: Value| {
            let mut server = model.response_attributes(&response, options.parse);
            if options.wait {
                if let Some(saved) = attrs {
                    let mut merged = saved;
                    for (name, value) in server {
                        merged.insert(name, value);
                    }
                    server = merged;
                }
            }
            if model.set(server, set_options).is_err() {
                return;
            }
            finish(&Target::Model(model), options.success.as_ref(), response);
        };

        send(
            transport.as_ref(),
            method,
            Target::Model(self.clone()),
            Request {
                url,
                data: Some(Value::Object(data)),
            },
            on_success,
            error,
        );
        Ok(())
    }

    fn destroyed(&self, options: &SyncOptions) {
        self.stop_listening(None, None, None);
        self.trigger(
            DESTROY,
            &Event::Destroy {
                model: self.clone(),
                collection: self.collection(),
                options: options.clone(),
            },
        );
    }

    /// Delete the model. A model that was never saved is destroyed locally
    /// and `Ok(false)` is returned; otherwise a delete request is sent.
    /// `destroy` fires right away, or once the transport confirms with
    /// `wait`.
    pub fn destroy(&self, options: SyncOptions) -> RippleResult<bool> {
        if self.is_new() {
            self.destroyed(&options);
            if let Some(hook) = &options.success {
                hook(&Value::Null);
            }
            return Ok(false);
        }

        let (transport, url) = self.endpoint()?;
        let target = Target::Model(self.clone());
        announce(&target, Method::Delete);
        if !options.wait {
            self.destroyed(&options);
        }

        let model = self.clone();
        let error = options.error.clone();
        let on_success = move |response: Value| {
            if options.wait {
                model.destroyed(&options);
            }
            finish(&Target::Model(model), options.success.as_ref(), response);
        };
        dispatch(
            transport.as_ref(),
            Method::Delete,
            target,
            Request { url, data: None },
            on_success,
            error,
        );
        Ok(true)
    }
}

impl Collection {
    /// Load the member list from the transport and reconcile against it
    /// (or reset to it with `options.reset`)
    pub fn fetch(&self, options: SyncOptions) -> RippleResult<()> {
        let url = self.url()?;
        let transport = self
            .transport()
            .ok_or_else(|| RippleError::MissingTransport(url.clone()))?;

        let collection = self.clone();
        let error = options.error.clone();
        let on_success = move |response: Value| {
            let records = if options.parse {
                collection.parse(response.clone())
            } else {
                response.clone()
            };
            let update = options.update_options();
            if options.reset {
                collection.reset(records, update);
            } else {
                collection.set(records, update);
            }
            finish(&Target::Collection(collection), options.success.as_ref(), response);
        };

        send(
            transport.as_ref(),
            Method::Read,
            Target::Collection(self.clone()),
            Request { url, data: None },
            on_success,
            error,
        );
        Ok(())
    }

    /// Build a model, add it and save it. With `wait` the model joins the
    /// collection only after the transport confirms. `Ok(None)` when the
    /// element fails validation.
    pub fn create(&self, item: impl Into<Item>, options: SyncOptions) -> RippleResult<Option<Model>> {
        let update = options
            .update_options()
            .with_validate(options.validate.unwrap_or(false));
        let Some(model) = self.prepare(item.into(), &update) else {
            return Ok(None);
        };

        let mut options = options;
        if options.wait {
            let collection = self.clone();
            let added = model.clone();
            let hook = options.success.take();
            let add_options = update.clone();
            options.success = Some(Rc::new(move |response: &Value| {
                collection.add(&added, add_options.clone());
                if let Some(hook) = &hook {
                    hook(response);
                }
            }));
        } else {
            self.add(&model, update);
        }

        model.save(None, options)?;
        Ok(Some(model))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use ripple_core::ValidationError;
    use ripple_events::ALL;
    use serde_json::json;

    use super::*;
    use crate::config::{CollectionConfig, ModelConfig};
    use crate::options::{SetOptions, UpdateOptions};
    use crate::transport::MemoryTransport;

    fn attrs(value: Value) -> Attributes {
        into_attributes(value)
    }

    fn record(target: &impl Events<Event>) -> Rc<RefCell<Vec<String>>> {
        let log: Rc<RefCell<Vec<String>>> = Rc::default();
        let l = Rc::clone(&log);
        target.on(ALL, move |name, _| l.borrow_mut().push(name.to_string()));
        log
    }

    fn todos(transport: &Rc<MemoryTransport>) -> Collection {
        Collection::new(
            CollectionConfig::new()
                .with_url("/todos")
                .with_transport(transport.clone()),
        )
    }

    #[test]
    fn test_url() {
        let plain = Model::new(attrs(json!({"id": "a b"})));
        assert!(matches!(plain.url(), Err(RippleError::MissingUrl)));

        let config = Rc::new(ModelConfig::new().with_url_root("/items/"));
        let model = Model::with_config(config, attrs(json!({"id": "a b"})));
        assert_eq!(model.url().unwrap(), "/items/a%20b");

        let transport = Rc::new(MemoryTransport::new());
        let collection = todos(&transport);
        let member = collection.add_one(attrs(json!({"id": 3})), UpdateOptions::add()).unwrap();
        assert_eq!(member.url().unwrap(), "/todos/3");
        let fresh = collection.add_one(attrs(json!({"title": "x"})), UpdateOptions::add()).unwrap();
        assert_eq!(fresh.url().unwrap(), "/todos");
    }

    #[test]
    fn test_missing_transport() {
        let config = Rc::new(ModelConfig::new().with_url_root("/items"));
        let model = Model::with_config(config, Attributes::new());
        assert!(matches!(
            model.save(None, SyncOptions::default()),
            Err(RippleError::MissingTransport(url)) if url == "/items"
        ));
    }

    #[test]
    fn test_save_new_model_creates() {
        let transport = Rc::new(MemoryTransport::new());
        let collection = todos(&transport);
        let model = collection
            .add_one(attrs(json!({"title": "write"})), UpdateOptions::add())
            .unwrap();
        let log = record(&model);

        model.save(None, SyncOptions::default()).unwrap();

        assert_eq!(model.id(), Some(json!(1)));
        assert_eq!(*log.borrow(), vec!["request", "change-id", "change:id", "change", "sync"]);
        assert_eq!(transport.record("/todos/1"), Some(json!({"title": "write", "id": 1})));
        assert!(collection.get(1).unwrap().ptr_eq(&model));
    }

    #[test]
    fn test_save_existing_updates_or_patches() {
        let transport = Rc::new(MemoryTransport::new());
        transport.insert("/todos/4", json!({"id": 4, "title": "old", "done": false}));
        let collection = todos(&transport);
        let model = collection
            .add_one(attrs(json!({"id": 4, "title": "old", "done": false})), UpdateOptions::add())
            .unwrap();

        model
            .save(Some(attrs(json!({"done": true}))), SyncOptions::default().with_patch(true))
            .unwrap();
        model
            .save(Some(attrs(json!({"title": "new"}))), SyncOptions::default())
            .unwrap();

        let methods: Vec<Method> = transport.requests().into_iter().map(|(m, _)| m).collect();
        assert_eq!(methods, vec![Method::Patch, Method::Update]);
        assert_eq!(
            transport.record("/todos/4"),
            Some(json!({"id": 4, "title": "new", "done": true}))
        );
    }

    #[test]
    fn test_save_with_wait_applies_after_success() {
        let transport = Rc::new(MemoryTransport::new());
        let collection = todos(&transport);
        let model = collection
            .add_one(attrs(json!({"id": 1, "title": "a"})), UpdateOptions::add())
            .unwrap();
        transport.insert("/todos/1", json!({"id": 1, "title": "a"}));

        transport.fail_next(json!({"status": 500}));
        let errors: Rc<RefCell<Vec<Value>>> = Rc::default();
        let e = Rc::clone(&errors);
        let log = record(&model);
        model
            .save(
                Some(attrs(json!({"title": "b"}))),
                SyncOptions::wait().on_error(move |resp| e.borrow_mut().push(resp.clone())),
            )
            .unwrap();
        assert_eq!(model.get("title"), Some(json!("a")));
        assert_eq!(*errors.borrow(), vec![json!({"status": 500})]);
        assert_eq!(*log.borrow(), vec!["request", "error"]);

        model
            .save(Some(attrs(json!({"title": "b"}))), SyncOptions::wait())
            .unwrap();
        assert_eq!(model.get("title"), Some(json!("b")));
    }

    #[test]
    fn test_save_validation_failure() {
        let transport: Rc<MemoryTransport> = Rc::new(MemoryTransport::new());
        let config = ModelConfig::new()
            .with_url_root("/v")
            .with_transport(transport.clone())
            .with_validator(|attrs: &Attributes, _: &SetOptions| {
                if attrs.get("n").and_then(Value::as_i64).unwrap_or(0) > 10 {
                    Err(ValidationError::on("n", "too big"))
                } else {
                    Ok(())
                }
            });
        let model = Model::with_config(Rc::new(config), attrs(json!({"n": 1})));

        let result = model.save(Some(attrs(json!({"n": 11}))), SyncOptions::default());
        assert!(matches!(result, Err(RippleError::Invalid(_))));
        assert_eq!(model.get("n"), Some(json!(1)));
        assert!(transport.requests().is_empty());

        let result = model.save(Some(attrs(json!({"n": 11}))), SyncOptions::wait());
        assert!(result.is_err());

        // validation can be switched off
        model
            .save(Some(attrs(json!({"n": 11}))), SyncOptions::default().with_validate(false))
            .unwrap();
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn test_fetch_model() {
        let transport = Rc::new(MemoryTransport::new());
        transport.insert("/todos/2", json!({"id": 2, "title": "remote"}));
        let collection = todos(&transport);
        let model = collection.add_one(attrs(json!({"id": 2})), UpdateOptions::add()).unwrap();
        let seen: Rc<RefCell<Option<Value>>> = Rc::default();
        let s = Rc::clone(&seen);

        model
            .fetch(SyncOptions::default().on_success(move |resp| *s.borrow_mut() = Some(resp.clone())))
            .unwrap();

        assert_eq!(model.get("title"), Some(json!("remote")));
        assert_eq!(*seen.borrow(), Some(json!({"id": 2, "title": "remote"})));
    }

    #[test]
    fn test_fetch_missing_record_emits_error() {
        let transport = Rc::new(MemoryTransport::new());
        let collection = todos(&transport);
        let model = collection.add_one(attrs(json!({"id": 9})), UpdateOptions::add()).unwrap();
        let collection_log = record(&collection);

        model.fetch(SyncOptions::default()).unwrap();

        assert_eq!(*collection_log.borrow(), vec!["request", "error"]);
    }

    #[test]
    fn test_destroy_new_model() {
        let collection = Collection::default();
        let model = collection.add_one(Attributes::new(), UpdateOptions::add()).unwrap();
        let log = record(&model);

        assert!(!model.destroy(SyncOptions::default()).unwrap());
        assert_eq!(*log.borrow(), vec!["remove", "destroy"]);
        assert!(collection.is_empty());
    }

    #[test]
    fn test_destroy_existing() {
        let transport = Rc::new(MemoryTransport::new());
        transport.insert("/todos/1", json!({"id": 1}));
        let collection = todos(&transport);
        let model = collection.add_one(attrs(json!({"id": 1})), UpdateOptions::add()).unwrap();
        let log = record(&collection);

        assert!(model.destroy(SyncOptions::default()).unwrap());

        assert!(collection.is_empty());
        assert!(transport.is_empty());
        assert_eq!(*log.borrow(), vec!["request", "remove", "update", "destroy"]);
    }

    #[test]
    fn test_destroy_with_wait_keeps_member_on_failure() {
        let transport = Rc::new(MemoryTransport::new());
        let collection = todos(&transport);
        let model = collection.add_one(attrs(json!({"id": 1})), UpdateOptions::add()).unwrap();

        transport.fail_next(json!({"status": 503}));
        model.destroy(SyncOptions::wait()).unwrap();
        assert_eq!(collection.len(), 1);

        model.destroy(SyncOptions::wait()).unwrap();
        assert!(collection.is_empty());
    }

    #[test]
    fn test_collection_fetch_sets_and_resets() {
        let transport = Rc::new(MemoryTransport::new());
        transport.insert("/todos/1", json!({"id": 1, "title": "a"}));
        transport.insert("/todos/2", json!({"id": 2, "title": "b"}));
        transport.insert("/todos/2/notes/1", json!({"id": 1}));
        let collection = todos(&transport);
        collection.add(json!([{"id": 3}]), UpdateOptions::add());
        let log = record(&collection);

        collection.fetch(SyncOptions::default()).unwrap();
        assert_eq!(collection.len(), 2);
        assert!(!collection.has(3));
        assert_eq!(log.borrow().last().map(String::as_str), Some("sync"));

        log.borrow_mut().clear();
        collection.fetch(SyncOptions::default().with_reset(true)).unwrap();
        assert_eq!(*log.borrow(), vec!["request", "reset", "sync"]);
    }

    #[test]
    fn test_collection_fetch_with_parser() {
        let transport = Rc::new(MemoryTransport::new());
        transport.insert("/wrapped/1", json!({"id": 1}));
        let collection = Collection::new(
            CollectionConfig::new()
                .with_url("/wrapped")
                .with_transport(transport.clone())
                .with_parser(|resp| json!([{"id": resp.as_array().map_or(0, Vec::len)}])),
        );
        collection.fetch(SyncOptions::default()).unwrap();
        assert_eq!(collection.at(0).unwrap().id(), Some(json!(1)));

        collection.fetch(SyncOptions::default().with_parse(false)).unwrap();
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_create() {
        let transport = Rc::new(MemoryTransport::new());
        let collection = todos(&transport);
        let added: Rc<RefCell<Vec<Option<Value>>>> = Rc::default();
        let a = Rc::clone(&added);
        collection.on(crate::event::ADD, move |_, event| {
            a.borrow_mut().push(event.model().and_then(Model::id));
        });

        let model = collection
            .create(attrs(json!({"title": "now"})), SyncOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(model.id(), Some(json!(1)));

        let waited = collection
            .create(attrs(json!({"title": "later"})), SyncOptions::wait())
            .unwrap()
            .unwrap();
        assert_eq!(waited.id(), Some(json!(2)));

        assert_eq!(*added.borrow(), vec![None, Some(json!(2))]);
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn test_create_with_wait_failure_does_not_add() {
        let transport = Rc::new(MemoryTransport::new());
        let collection = todos(&transport);
        transport.fail_next(json!({"status": 400}));

        let model = collection
            .create(attrs(json!({"title": "x"})), SyncOptions::wait())
            .unwrap()
            .unwrap();

        assert!(collection.is_empty());
        assert!(model.is_new());
    }

    #[test]
    fn test_create_rejects_invalid() {
        let transport = Rc::new(MemoryTransport::new());
        let model = ModelConfig::new().with_validator(|attrs: &Attributes, _: &SetOptions| {
            if attrs.contains_key("title") {
                Ok(())
            } else {
                Err(ValidationError::new("title required"))
            }
        });
        let collection = Collection::new(
            CollectionConfig::new()
                .with_url("/todos")
                .with_transport(transport.clone())
                .with_model(model),
        );
        let created = collection
            .create(Attributes::new(), SyncOptions::default().with_validate(true))
            .unwrap();
        assert!(created.is_none());
        assert!(collection.is_empty());
        assert!(transport.requests().is_empty());
    }
}
