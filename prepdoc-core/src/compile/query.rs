//! Filter, projection and update compilation for non-aggregation templates.

use bson::{Bson, Document};
use tracing::debug;

use crate::{
    error::{QueryError, QueryResult},
    fields::{
        CASE_INSENSITIVE_OPTION, OPTIONS_FIELD, PROJECTION_FIELD, REGEX_FIELD, SET_FIELD,
        UNSET_FIELD, USER_NAME_FIELD,
    },
    options::StatementOptions,
    template::{Node, Template, entries_to_document},
    value::Bindings,
};

use super::{CompiledQuery, Modification, Resolver, merge, modifier_body};

/// Compiles a find / insert / update / unset / remove / distinct template.
///
/// # Errors
///
/// Returns [`QueryError::NoCollection`] if the template names no collection,
/// [`QueryError::MalformedTemplate`] if it carries both `$set` and `$unset`,
/// and [`QueryError::UnboundPlaceholder`] for unbound placeholders under the
/// strict policy.
pub fn compile_query(
    template: &Template,
    bindings: &Bindings,
    options: &StatementOptions,
) -> QueryResult<CompiledQuery> {
    let collection = template
        .collection()
        .ok_or(QueryError::NoCollection)?
        .to_string();
    let resolver = Resolver::new(bindings, options.placeholders);

    let (filter, projection, modification) = match (template.has_set(), template.has_unset()) {
        (true, true) => {
            return Err(QueryError::MalformedTemplate(format!(
                "{SET_FIELD} and {UNSET_FIELD} are mutually exclusive"
            )));
        }
        (true, false) => {
            let (filter, fields) = compile_modifier(template, resolver, SET_FIELD)?;
            (filter, None, Some(Modification::Set(fields)))
        }
        (false, true) => {
            let (filter, fields) = compile_modifier(template, resolver, UNSET_FIELD)?;
            (filter, None, Some(Modification::Unset(fields)))
        }
        (false, false) => {
            let mut walker = FilterWalker::new(resolver);
            walker.walk(template.body())?;
            let (filter, projection) = walker.finish();
            (filter, projection, None)
        }
    };

    Ok(CompiledQuery {
        collection,
        filter,
        projection,
        modification,
        distinct: template.distinct_key().map(str::to_string),
    })
}

/// Splits an update template into its filter and its `$set` / `$unset` fields.
fn compile_modifier(
    template: &Template,
    resolver: Resolver<'_>,
    operator: &str,
) -> QueryResult<(Document, Document)> {
    let mut fields = Document::new();
    let mut rest = Vec::new();

    for entry in template.body() {
        let (key, node) = entry;

        match modifier_body(key, node, operator) {
            Some(Node::Object(entries)) if operator == UNSET_FIELD => {
                merge(&mut fields, entries_to_document(entries));
            }
            Some(Node::Object(entries)) => {
                for (field, value) in entries {
                    if let Some(resolved) = resolver.resolve_field(field, value)? {
                        fields.insert(field.clone(), resolved);
                    }
                }
            }
            Some(_) => {
                return Err(QueryError::MalformedTemplate(format!(
                    "{operator} must be an object"
                )));
            }
            // A plain projection next to a top-level modifier selects nothing on update.
            None if key == PROJECTION_FIELD => {}
            None => rest.push(entry),
        }
    }

    let mut walker = FilterWalker::new(resolver);
    walker.walk(rest)?;
    let (filter, _) = walker.finish();

    Ok((filter, fields))
}

/// Depth-first walk producing the filter and projection of a template.
///
/// Nesting is flattened: every resolved leaf lands at the top of the filter
/// under its own key. A `$regex` leaf switches the rest of the walk to
/// case-insensitive matching on the user-name field.
struct FilterWalker<'a> {
    resolver: Resolver<'a>,
    filter: Document,
    projection: Document,
    case_query: Document,
    case_insensitive: bool,
}

impl<'a> FilterWalker<'a> {
    fn new(resolver: Resolver<'a>) -> Self {
        Self {
            resolver,
            filter: Document::new(),
            projection: Document::new(),
            case_query: Document::new(),
            case_insensitive: false,
        }
    }

    fn walk<'t>(&mut self, entries: impl IntoIterator<Item = &'t (String, Node)>) -> QueryResult<()> {
        for (key, node) in entries {
            match node {
                Node::Object(children) if key == PROJECTION_FIELD => {
                    let selected = self.resolver.resolve_entries(children)?;
                    merge(&mut self.projection, selected);
                }
                Node::Object(children) => self.walk(children)?,
                Node::Array(items) => {
                    let list = self.compile_list(items)?;
                    if !list.is_empty() {
                        self.filter.insert(key.clone(), list);
                    }
                }
                leaf => self.leaf(key, leaf)?,
            }
        }

        Ok(())
    }

    /// Compiles an `$or`-style list of objects. Unbound literals keep their
    /// template value; placeholders nested in operator documents are resolved.
    fn compile_list(&self, items: &[Node]) -> QueryResult<Vec<Bson>> {
        let mut list = Vec::new();

        for entries in items.iter().filter_map(Node::as_object) {
            let mut clause = Document::new();

            for (key, node) in entries {
                match self.resolver.lookup(key) {
                    Some(value) => {
                        clause.insert(key.clone(), value.to_bson());
                    }
                    None => {
                        if let Some(value) = self.resolver.resolve_node(key, node)? {
                            clause.insert(key.clone(), value);
                        }
                    }
                }
            }

            if !clause.is_empty() {
                list.push(Bson::Document(clause));
            }
        }

        Ok(list)
    }

    fn leaf(&mut self, key: &str, node: &Node) -> QueryResult<()> {
        let regex = key == REGEX_FIELD;
        let name = if regex {
            self.case_insensitive = true;
            USER_NAME_FIELD
        } else {
            key
        };

        let bound = self
            .resolver
            .lookup(name)
            .or_else(|| regex.then(|| self.resolver.lookup(REGEX_FIELD)).flatten());

        let Some(value) = bound else {
            return self.resolver.unbound(key, node);
        };

        if value.is_filter_operator() {
            debug!(field = name, "skipping wildcard binding");
            return Ok(());
        }

        if self.case_insensitive && name == USER_NAME_FIELD {
            self.case_query.insert(REGEX_FIELD, value.to_bson());
            self.case_query
                .insert(OPTIONS_FIELD, CASE_INSENSITIVE_OPTION);
        } else {
            self.filter.insert(name, value.to_bson());
        }

        Ok(())
    }

    fn finish(mut self) -> (Document, Option<Document>) {
        if !self.case_query.is_empty() {
            self.filter
                .insert(USER_NAME_FIELD, self.case_query);
        }

        let projection = (!self.projection.is_empty()).then_some(self.projection);

        (self.filter, projection)
    }
}
