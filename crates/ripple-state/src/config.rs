//! Model and collection configuration
//!
//! Behaviour that would otherwise come from subclassing (defaults,
//! validation, parsing, id extraction, urls, sort order) is carried by these
//! structs and shared between instances through `Rc`.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use ripple_core::{compare_values, into_attributes, Attributes, ValidationError, Value};

use crate::model::Model;
use crate::options::SetOptions;
use crate::transport::Transport;

/// How a model's id is derived from its attributes
#[derive(Clone)]
pub enum IdRule {
    /// Read a single attribute
    Attribute(String),
    /// Compute from the whole attribute map
    Custom(Rc<dyn Fn(&Attributes) -> Option<Value>>),
}

impl Default for IdRule {
    fn default() -> Self {
        IdRule::Attribute("id".to_string())
    }
}

impl fmt::Debug for IdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdRule::Attribute(name) => f.debug_tuple("Attribute").field(name).finish(),
            IdRule::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl IdRule {
    pub fn custom(f: impl Fn(&Attributes) -> Option<Value> + 'static) -> Self {
        IdRule::Custom(Rc::new(f))
    }

    /// Extract the id; `null` counts as absent
    pub fn extract(&self, attrs: &Attributes) -> Option<Value> {
        let id = match self {
            IdRule::Attribute(name) => attrs.get(name).cloned(),
            IdRule::Custom(f) => f(attrs),
        };
        id.filter(|v| !v.is_null())
    }

    /// Attribute name, when the rule reads a single attribute
    pub fn attribute(&self) -> Option<&str> {
        match self {
            IdRule::Attribute(name) => Some(name),
            IdRule::Custom(_) => None,
        }
    }
}

/// Model validator
pub trait Validator {
    fn validate(&self, attrs: &Attributes, options: &SetOptions) -> Result<(), ValidationError>;
}

impl<F> Validator for F
where
    F: Fn(&Attributes, &SetOptions) -> Result<(), ValidationError>,
{
    fn validate(&self, attrs: &Attributes, options: &SetOptions) -> Result<(), ValidationError> {
        self(attrs, options)
    }
}

/// Converts a transport response into attributes
pub type Parser = Rc<dyn Fn(Value) -> Attributes>;

/// Shared model configuration
#[derive(Clone, Default)]
pub struct ModelConfig {
    pub id_rule: IdRule,
    /// Attributes every new model starts with
    pub defaults: Attributes,
    pub url_root: Option<String>,
    pub validator: Option<Rc<dyn Validator>>,
    pub parser: Option<Parser>,
    pub transport: Option<Rc<dyn Transport>>,
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("id_rule", &self.id_rule)
            .field("defaults", &self.defaults)
            .field("url_root", &self.url_root)
            .field("validator", &self.validator.is_some())
            .field("parser", &self.parser.is_some())
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

impl ModelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id_attribute(mut self, name: impl Into<String>) -> Self {
        self.id_rule = IdRule::Attribute(name.into());
        self
    }

    pub fn with_id_rule(mut self, rule: IdRule) -> Self {
        self.id_rule = rule;
        self
    }

    pub fn with_defaults(mut self, defaults: Attributes) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_url_root(mut self, root: impl Into<String>) -> Self {
        self.url_root = Some(root.into());
        self
    }

    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Rc::new(validator));
        self
    }

    pub fn with_parser(mut self, parser: impl Fn(Value) -> Attributes + 'static) -> Self {
        self.parser = Some(Rc::new(parser));
        self
    }

    pub fn with_transport(mut self, transport: Rc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Response → attributes. Without a parser, objects pass through and
    /// anything else yields no attributes.
    pub fn parse(&self, response: Value) -> Attributes {
        match &self.parser {
            Some(parser) => parser(response),
            None => into_attributes(response),
        }
    }
}

/// Sort order for a collection
#[derive(Clone)]
pub enum Comparator {
    /// Ascending by one attribute
    Attribute(String),
    /// Ascending by a computed key
    Key(Rc<dyn Fn(&Model) -> Value>),
    /// Direct two-argument comparison
    Compare(Rc<dyn Fn(&Model, &Model) -> Ordering>),
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparator::Attribute(name) => f.debug_tuple("Attribute").field(name).finish(),
            Comparator::Key(_) => f.write_str("Key(..)"),
            Comparator::Compare(_) => f.write_str("Compare(..)"),
        }
    }
}

impl Comparator {
    pub fn attribute(name: impl Into<String>) -> Self {
        Comparator::Attribute(name.into())
    }

    pub fn key(f: impl Fn(&Model) -> Value + 'static) -> Self {
        Comparator::Key(Rc::new(f))
    }

    pub fn compare(f: impl Fn(&Model, &Model) -> Ordering + 'static) -> Self {
        Comparator::Compare(Rc::new(f))
    }

    /// The attribute a merge must touch to invalidate the order; `None`
    /// means any change may
    pub fn sort_attribute(&self) -> Option<&str> {
        match self {
            Comparator::Attribute(name) => Some(name),
            _ => None,
        }
    }

    /// Stable sort in place
    pub fn sort(&self, models: &mut Vec<Model>) {
        match self {
            Comparator::Attribute(name) => {
                let mut keyed: Vec<(Option<Value>, Model)> =
                    models.drain(..).map(|m| (m.get(name), m)).collect();
                keyed.sort_by(|a, b| compare_values(a.0.as_ref(), b.0.as_ref()));
                models.extend(keyed.into_iter().map(|(_, m)| m));
            }
            Comparator::Key(key) => {
                let mut keyed: Vec<(Value, Model)> = models.drain(..).map(|m| (key(&m), m)).collect();
                keyed.sort_by(|a, b| compare_values(Some(&a.0), Some(&b.0)));
                models.extend(keyed.into_iter().map(|(_, m)| m));
            }
            Comparator::Compare(cmp) => models.sort_by(|a, b| cmp(a, b)),
        }
    }
}

/// Parses a collection-level response into a list of records
pub type ResponseParser = Rc<dyn Fn(Value) -> Value>;

/// Shared collection configuration
#[derive(Clone, Default)]
pub struct CollectionConfig {
    /// Configuration for models the collection creates
    pub model: Rc<ModelConfig>,
    pub comparator: Option<Comparator>,
    pub url: Option<String>,
    pub parser: Option<ResponseParser>,
    pub transport: Option<Rc<dyn Transport>>,
}

impl fmt::Debug for CollectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionConfig")
            .field("model", &self.model)
            .field("comparator", &self.comparator)
            .field("url", &self.url)
            .field("parser", &self.parser.is_some())
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

impl CollectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = Rc::new(model);
        self
    }

    pub fn with_comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_parser(mut self, parser: impl Fn(Value) -> Value + 'static) -> Self {
        self.parser = Some(Rc::new(parser));
        self
    }

    pub fn with_transport(mut self, transport: Rc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }
}
