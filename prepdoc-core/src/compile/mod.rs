//! Template compilation.
//!
//! Compilation is a pure function of a [`Template`], its [`Bindings`] and the
//! [`StatementOptions`]: equal inputs always give equal commands. The result is
//! either a [`CompiledQuery`] (filter, projection, update document) or a
//! [`CompiledPipeline`] (ordered aggregation stages).
//!
//! # Example
//!
//! ```ignore
//! use prepdoc_core::{compile::{compile, CompiledCommand}, template::Template, value::Bindings};
//!
//! let template = Template::parse(r#"{"collection":"users","name":"?"}"#)?;
//! let mut bindings = Bindings::new();
//! bindings.bind("name", "alice");
//!
//! let CompiledCommand::Query(query) = compile(&template, &bindings, &Default::default())? else {
//!     unreachable!()
//! };
//! assert_eq!(query.filter, doc! { "name": "alice" });
//! ```

mod pipeline;
mod query;

pub use pipeline::compile_pipeline;
pub use query::compile_query;

use bson::{Bson, Document, doc};
use tracing::{debug, warn};

use crate::{
    error::{QueryError, QueryResult},
    fields::{PROJECTION_FIELD, SET_FIELD, UNSET_FIELD},
    options::{PlaceholderPolicy, StatementOptions},
    template::{Node, Template, TemplateKind},
    value::{Bindings, TypedValue},
};

/// A modification applied by an update.
#[derive(Debug, Clone, PartialEq)]
pub enum Modification {
    /// Fields to write.
    Set(Document),
    /// Fields to remove.
    Unset(Document),
}

impl Modification {
    /// The update operator, `$set` or `$unset`.
    pub fn operator(&self) -> &'static str {
        match self {
            Modification::Set(_) => SET_FIELD,
            Modification::Unset(_) => UNSET_FIELD,
        }
    }

    /// The fields written or removed.
    pub fn fields(&self) -> &Document {
        match self {
            Modification::Set(fields) | Modification::Unset(fields) => fields,
        }
    }

    /// The driver update document, e.g. `{ "$set": { ... } }`.
    pub fn to_update_document(&self) -> Document {
        doc! { self.operator(): self.fields().clone() }
    }
}

/// A compiled find / insert / update / remove / distinct command.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// Target collection.
    pub collection: String,
    /// The predicate document. For inserts this is the inserted document.
    pub filter: Document,
    /// Field selection, if the template carries a `projection`.
    pub projection: Option<Document>,
    /// The update payload, if the template carries `$set` or `$unset`.
    pub modification: Option<Modification>,
    /// The field named by the `distinct` attribute.
    pub distinct: Option<String>,
}

impl CompiledQuery {
    /// The document passed to an update call.
    ///
    /// Templates without `$set` / `$unset` write their projection with `$set`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::MissingUpdate`] if there is nothing to write.
    pub fn update_document(&self) -> QueryResult<Document> {
        match (&self.modification, &self.projection) {
            (Some(modification), _) => Ok(modification.to_update_document()),
            (None, Some(projection)) => Ok(doc! { SET_FIELD: projection.clone() }),
            (None, None) => Err(QueryError::MissingUpdate),
        }
    }

    /// The replacement document queued by a batched update.
    pub fn replacement(&self) -> QueryResult<Document> {
        match (&self.modification, &self.projection) {
            (Some(Modification::Set(fields)), _) => Ok(fields.clone()),
            (_, Some(projection)) => Ok(projection.clone()),
            _ => Err(QueryError::MissingUpdate),
        }
    }
}

/// A compiled aggregation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPipeline {
    pub collection: String,
    /// Stage documents in emission order.
    pub stages: Vec<Document>,
}

/// The output of [`compile`].
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledCommand {
    Query(CompiledQuery),
    Pipeline(CompiledPipeline),
}

impl CompiledCommand {
    pub fn collection(&self) -> &str {
        match self {
            CompiledCommand::Query(query) => &query.collection,
            CompiledCommand::Pipeline(pipeline) => &pipeline.collection,
        }
    }
}

/// Compiles a template against its bindings, dispatching on [`Template::kind`].
pub fn compile(
    template: &Template,
    bindings: &Bindings,
    options: &StatementOptions,
) -> QueryResult<CompiledCommand> {
    let kind = template.kind();
    let command = match kind {
        TemplateKind::Aggregate => {
            CompiledCommand::Pipeline(compile_pipeline(template, bindings, options)?)
        }
        _ => CompiledCommand::Query(compile_query(template, bindings, options)?),
    };

    debug!(collection = command.collection(), ?kind, "compiled template");

    Ok(command)
}

/// Resolves template leaves against the binding registry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Resolver<'a> {
    bindings: &'a Bindings,
    policy: PlaceholderPolicy,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(bindings: &'a Bindings, policy: PlaceholderPolicy) -> Self {
        Self { bindings, policy }
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<&'a TypedValue> {
        self.bindings.get(name)
    }

    /// Handles a leaf that has no binding. Literals are dropped quietly;
    /// placeholders fail under the strict policy.
    pub(crate) fn unbound(&self, name: &str, node: &Node) -> QueryResult<()> {
        if !node.is_placeholder() {
            return Ok(());
        }

        match self.policy {
            PlaceholderPolicy::Strict => Err(QueryError::UnboundPlaceholder(name.to_string())),
            PlaceholderPolicy::Lenient => {
                warn!(placeholder = name, "dropping unbound placeholder");
                Ok(())
            }
        }
    }

    /// Resolves the placeholders inside `node`, keeping everything else verbatim.
    ///
    /// Returns `None` when `node` is itself an unbound placeholder that the
    /// policy allows to be dropped.
    pub(crate) fn resolve_node(&self, name: &str, node: &Node) -> QueryResult<Option<Bson>> {
        Ok(match node {
            Node::Placeholder => match self.lookup(name) {
                Some(value) => Some(value.to_bson()),
                None => {
                    self.unbound(name, node)?;
                    None
                }
            },
            Node::Object(entries) => Some(Bson::Document(self.resolve_entries(entries)?)),
            Node::Array(items) => Some(Bson::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Node::Object(entries) => self.resolve_entries(entries).map(Bson::Document),
                        other => Ok(other.to_bson()),
                    })
                    .collect::<QueryResult<Vec<_>>>()?,
            )),
            Node::Scalar(value) => Some(value.clone()),
        })
    }

    /// Resolves every entry of an object into a document.
    pub(crate) fn resolve_entries(&self, entries: &[(String, Node)]) -> QueryResult<Document> {
        let mut document = Document::new();

        for (key, node) in entries {
            if let Some(value) = self.resolve_node(key, node)? {
                document.insert(key.clone(), value);
            }
        }

        Ok(document)
    }

    /// Resolves a field whose binding, when present, overrides the template value.
    pub(crate) fn resolve_field(&self, name: &str, node: &Node) -> QueryResult<Option<Bson>> {
        match (self.lookup(name), node) {
            (Some(value), Node::Placeholder | Node::Scalar(_)) => Ok(Some(value.to_bson())),
            _ => self.resolve_node(name, node),
        }
    }
}

/// Inserts every entry of `source` into `target`, overwriting existing keys.
pub(crate) fn merge(target: &mut Document, source: Document) {
    for (key, value) in source {
        target.insert(key, value);
    }
}

/// Returns the `$set` / `$unset` body of an entry, whether it sits at the top
/// level or under `projection`.
pub(crate) fn modifier_body<'t>(key: &str, node: &'t Node, operator: &str) -> Option<&'t Node> {
    if key == operator {
        Some(node)
    } else if key == PROJECTION_FIELD {
        node.get(operator)
    } else {
        None
    }
}
