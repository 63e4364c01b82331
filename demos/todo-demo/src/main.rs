//! Ripple Todo Demo
//!
//! Drives a sorted todo list through an in-memory transport and logs what
//! a view layer would react to:
//! - add / remove / sort on the list
//! - per-attribute changes on items
//! - request / sync / error around persistence
//!
//! Run with `RUST_LOG=todo_demo=info,ripple_state=debug` for more detail.

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ripple_core::{into_attributes, Attributes, ValidationError};
use ripple_events::{Events, ALL};
use ripple_state::{
    Collection, CollectionConfig, Comparator, Event, MemoryTransport, Model, ModelConfig,
    SetOptions, SyncOptions, UpdateOptions,
};

#[derive(Debug, Serialize, Deserialize)]
struct Todo {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    title: String,
    #[serde(default)]
    done: bool,
    order: u32,
}

impl Todo {
    fn new(title: &str, order: u32) -> Self {
        Todo {
            id: None,
            title: title.to_string(),
            done: false,
            order,
        }
    }

    fn attributes(&self) -> Result<Attributes, serde_json::Error> {
        Ok(into_attributes(serde_json::to_value(self)?))
    }

    fn from_model(model: &Model) -> Result<Self, serde_json::Error> {
        serde_json::from_value(model.to_json())
    }
}

fn validate_todo(attrs: &Attributes, _: &SetOptions) -> Result<(), ValidationError> {
    match attrs.get("title").and_then(|t| t.as_str()) {
        Some(title) if !title.trim().is_empty() => Ok(()),
        _ => Err(ValidationError::on("title", "a todo needs a title")),
    }
}

fn todo_list(transport: Rc<MemoryTransport>) -> Collection {
    let model = ModelConfig::new()
        .with_defaults(into_attributes(serde_json::json!({"done": false})))
        .with_validator(validate_todo);

    Collection::new(
        CollectionConfig::new()
            .with_model(model)
            .with_url("/todos")
            .with_comparator(Comparator::attribute("order"))
            .with_transport(transport),
    )
}

fn watch(list: &Collection) {
    list.on("add remove", |name, event| {
        if let Some(model) = event.model() {
            info!(event = name, title = %model.escape("title"), "list membership");
        }
    });
    list.on("change:done", |_, event| {
        if let (Some(model), Some(done)) = (event.model(), event.value()) {
            info!(title = %model.escape("title"), %done, "item toggled");
        }
    });
    list.on("sort", |_, event| {
        if let Some(list) = event.collection() {
            let titles: Vec<String> = list.iter().map(|m| m.escape("title")).collect();
            info!(?titles, "list reordered");
        }
    });
    list.on("invalid", |_, event| {
        if let Event::Invalid { error, .. } = event {
            warn!(%error, "rejected todo");
        }
    });
    list.on("request sync error", |name, event| {
        if let Some(model) = event.model() {
            info!(event = name, cid = %model.cid(), "persistence");
        }
    });
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("todo_demo=info".parse()?))
        .init();

    info!("Ripple todo demo starting...");

    let transport = Rc::new(MemoryTransport::new());
    let list = todo_list(Rc::clone(&transport));
    watch(&list);

    for (title, order) in [("write docs", 3), ("fix bug", 1), ("ship", 2)] {
        list.create(Todo::new(title, order).attributes()?, SyncOptions::default())?;
    }

    // rejected by the validator, never reaches the transport
    let rejected = list.create(
        Todo::new("  ", 9).attributes()?,
        SyncOptions::default().with_validate(true),
    )?;
    info!(rejected = rejected.is_none(), "blank todo");

    if let Some(first) = list.at(0) {
        first.save(
            Some(into_attributes(serde_json::json!({"done": true}))),
            SyncOptions::default().with_patch(true),
        )?;
    }

    // a server-side reorder arrives as a batch
    list.set(
        serde_json::json!([
            {"id": 1, "title": "write docs", "order": 0},
            {"id": 2, "title": "fix bug", "order": 5, "done": true},
            {"id": 3, "title": "ship", "order": 4},
        ]),
        UpdateOptions::set(),
    );

    if let Some(last) = list.at(-1) {
        last.destroy(SyncOptions::wait())?;
    }

    transport.fail_next(serde_json::json!({"status": 503}));
    list.fetch(SyncOptions::default())?;
    list.fetch(SyncOptions::default().with_reset(true))?;

    let todos = list
        .iter()
        .map(|m| Todo::from_model(&m))
        .collect::<Result<Vec<_>, _>>()?;
    for todo in &todos {
        info!(?todo, "final");
    }

    let names = Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = Rc::clone(&names);
    let callback = list.on(ALL, move |name, _| sink.borrow_mut().push(name.to_string()));
    list.push(Todo::new("one more", 10).attributes()?, UpdateOptions::default());
    list.off(Some(ALL), Some(&callback), None);
    info!(events = ?names.borrow(), records = transport.len(), "done");

    Ok(())
}
