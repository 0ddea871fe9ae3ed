//! Statement configuration.
//!
//! [`StatementOptions`] controls how strictly placeholders are resolved and how
//! `$lookup` stages are laid out in aggregation pipelines. Options can be built
//! fluently or deserialized from configuration:
//!
//! ```ignore
//! use prepdoc_core::options::{StatementOptions, LookupMode, PlaceholderPolicy};
//!
//! let options = StatementOptions::builder()
//!     .placeholders(PlaceholderPolicy::Lenient)
//!     .lookup_mode(LookupMode::Interleaved)
//!     .build();
//! ```

use serde::{Deserialize, Serialize};

use crate::template::Template;

/// What to do with a placeholder whose name has no binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderPolicy {
    /// Fail with [`QueryError::UnboundPlaceholder`](crate::error::QueryError::UnboundPlaceholder).
    #[default]
    Strict,
    /// Drop the leaf from the compiled command and log a warning.
    Lenient,
}

/// Layout of `$lookup` and `$unwind` stages in a compiled pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupMode {
    /// Every lookup in template order, then every unwind.
    ///
    /// This is what `set_multi_lookup(true)` selects, and the default for any
    /// template that mentions `$lookup`.
    Single,
    /// Lookups interleaved with the unwinds of their aliases, honouring
    /// `dependency` markers. Selected by `set_multi_lookup(false)`.
    Interleaved,
}

impl LookupMode {
    /// Maps the legacy multi-lookup flag onto a mode. `true` selects the single layout.
    pub fn from_multi_lookup(multi_lookup: bool) -> Self {
        if multi_lookup {
            LookupMode::Single
        } else {
            LookupMode::Interleaved
        }
    }

    /// The mode a template gets when none is configured.
    pub fn for_template(template: &Template) -> Self {
        LookupMode::from_multi_lookup(template.mentions_lookup())
    }
}

/// Options applied when compiling a statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatementOptions {
    /// Unbound placeholder handling.
    pub placeholders: PlaceholderPolicy,
    /// Lookup layout; `None` derives it from the template.
    pub lookup_mode: Option<LookupMode>,
}

impl StatementOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new options builder.
    pub fn builder() -> StatementOptionsBuilder {
        StatementOptionsBuilder::new()
    }

    /// The lookup mode to use for `template`.
    pub fn lookup_mode_for(&self, template: &Template) -> LookupMode {
        self.lookup_mode
            .unwrap_or_else(|| LookupMode::for_template(template))
    }

    pub fn is_strict(&self) -> bool {
        self.placeholders == PlaceholderPolicy::Strict
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatementOptionsBuilder {
    options: StatementOptions,
}

impl StatementOptionsBuilder {
    pub fn new() -> Self {
        StatementOptionsBuilder { options: StatementOptions::default() }
    }

    /// Sets the unbound placeholder policy.
    pub fn placeholders(mut self, policy: PlaceholderPolicy) -> Self {
        self.options.placeholders = policy;
        self
    }

    /// Shorthand for [`PlaceholderPolicy::Lenient`].
    pub fn lenient(self) -> Self {
        self.placeholders(PlaceholderPolicy::Lenient)
    }

    /// Pins the lookup layout regardless of the template.
    pub fn lookup_mode(mut self, mode: LookupMode) -> Self {
        self.options.lookup_mode = Some(mode);
        self
    }

    pub fn build(self) -> StatementOptions {
        self.options
    }
}
