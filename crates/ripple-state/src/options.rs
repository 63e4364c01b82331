//! Per-call options

use std::fmt;
use std::rc::Rc;

use ripple_core::Value;

/// Options for `Model::set` and friends
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Suppress change events (the id change still fires)
    pub silent: bool,
    /// Delete the named attributes instead of writing them
    pub unset: bool,
    /// Run the configured validator first
    pub validate: bool,
    /// Run the configured parser over incoming attributes (construction
    /// and collection merges)
    pub parse: bool,
}

impl SetOptions {
    pub fn silent() -> Self {
        SetOptions {
            silent: true,
            ..Default::default()
        }
    }

    pub fn validate() -> Self {
        SetOptions {
            validate: true,
            ..Default::default()
        }
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn with_validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn with_parse(mut self, parse: bool) -> Self {
        self.parse = parse;
        self
    }

    pub fn with_unset(mut self, unset: bool) -> Self {
        self.unset = unset;
        self
    }
}

/// Options for collection reconciliation (`set`, `add`, `remove`, `reset`)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Create members for unknown elements
    pub add: bool,
    /// Drop members absent from the input
    pub remove: bool,
    /// Merge attributes into existing members
    pub merge: bool,
    /// Explicit insertion index; negative counts from the end
    pub at: Option<isize>,
    /// Allow the comparator to re-sort
    pub sort: bool,
    pub silent: bool,
    pub parse: bool,
    pub validate: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        UpdateOptions {
            add: true,
            remove: true,
            merge: true,
            at: None,
            sort: true,
            silent: false,
            parse: false,
            validate: false,
        }
    }
}

impl UpdateOptions {
    /// Defaults for `Collection::set`
    pub fn set() -> Self {
        Self::default()
    }

    /// Defaults for `Collection::add`
    pub fn add() -> Self {
        UpdateOptions {
            remove: false,
            ..Default::default()
        }
    }

    pub fn silent() -> Self {
        UpdateOptions {
            silent: true,
            ..Default::default()
        }
    }

    pub fn with_add(mut self, add: bool) -> Self {
        self.add = add;
        self
    }

    pub fn with_remove(mut self, remove: bool) -> Self {
        self.remove = remove;
        self
    }

    pub fn with_merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_at(mut self, at: isize) -> Self {
        self.at = Some(at);
        self
    }

    pub fn with_sort(mut self, sort: bool) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn with_parse(mut self, parse: bool) -> Self {
        self.parse = parse;
        self
    }

    pub fn with_validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Options forwarded to member `set` calls
    pub fn set_options(&self) -> SetOptions {
        SetOptions {
            silent: self.silent,
            unset: false,
            validate: self.validate,
            parse: self.parse,
        }
    }
}

/// Callback invoked with a transport response
pub type ResponseHook = Rc<dyn Fn(&Value)>;

/// Options for fetch / save / destroy / create
#[derive(Clone)]
pub struct SyncOptions {
    /// Apply changes only after the transport confirms
    pub wait: bool,
    /// Send only the changed attributes with a `patch` request
    pub patch: bool,
    /// Run the parser over the response
    pub parse: bool,
    /// Collection fetch: `reset` instead of `set`
    pub reset: bool,
    /// `None` uses the operation default (save validates, fetch does not)
    pub validate: Option<bool>,
    pub silent: bool,
    /// Reconciliation options for collection fetch / create
    pub update: UpdateOptions,
    pub success: Option<ResponseHook>,
    pub error: Option<ResponseHook>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            wait: false,
            patch: false,
            parse: true,
            reset: false,
            validate: None,
            silent: false,
            update: UpdateOptions::default(),
            success: None,
            error: None,
        }
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("wait", &self.wait)
            .field("patch", &self.patch)
            .field("parse", &self.parse)
            .field("reset", &self.reset)
            .field("validate", &self.validate)
            .field("silent", &self.silent)
            .field("update", &self.update)
            .field("success", &self.success.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

impl SyncOptions {
    pub fn wait() -> Self {
        SyncOptions {
            wait: true,
            ..Default::default()
        }
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_patch(mut self, patch: bool) -> Self {
        self.patch = patch;
        self
    }

    pub fn with_parse(mut self, parse: bool) -> Self {
        self.parse = parse;
        self
    }

    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn with_validate(mut self, validate: bool) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn with_update(mut self, update: UpdateOptions) -> Self {
        self.update = update;
        self
    }

    pub fn on_success(mut self, hook: impl Fn(&Value) + 'static) -> Self {
        self.success = Some(Rc::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&Value) + 'static) -> Self {
        self.error = Some(Rc::new(hook));
        self
    }

    pub(crate) fn set_options(&self, validate_default: bool) -> SetOptions {
        SetOptions {
            silent: self.silent,
            unset: false,
            validate: self.validate.unwrap_or(validate_default),
            parse: false,
        }
    }

    pub(crate) fn update_options(&self) -> UpdateOptions {
        let mut update = self.update.clone();
        update.parse = self.parse;
        update.silent = update.silent || self.silent;
        update
    }
}
