//! Template parsing and the template tree.
//!
//! A template is a JSON object. Leaves whose value is the string `"?"` are
//! placeholders named after the key they sit under. Parsing preserves the key
//! order of the source so compiled documents come out in template order.
//!
//! ```ignore
//! use prepdoc_core::template::{Template, TemplateKind};
//!
//! let template = Template::parse(r#"{"collection":"users","name":"?"}"#)?;
//! assert_eq!(template.collection(), Some("users"));
//! assert_eq!(template.kind(), TemplateKind::Filter);
//! ```

use bson::{Bson, Document};
use serde_json::{Number, Value};

use crate::{
    error::{QueryError, QueryResult},
    fields::{
        COLLECTION_FIELD, DISTINCT_FIELD, GROUP_FIELD, LIMIT_FIELD, MATCH_FIELD, PLACEHOLDER,
        PROJECT_FIELD, PROJECTION_FIELD, SET_FIELD, SORT_FIELD, UNSET_FIELD, is_lookup_key,
        is_unwind_key,
    },
};

/// A node of the parsed template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// An object; entries keep their source order.
    Object(Vec<(String, Node)>),
    /// An array.
    Array(Vec<Node>),
    /// The `"?"` placeholder.
    Placeholder,
    /// Any other JSON primitive.
    Scalar(Bson),
}

impl Node {
    /// Builds a node from a parsed JSON value.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Node::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Node::from_json(value)))
                    .collect(),
            ),
            Value::Array(items) => Node::Array(items.into_iter().map(Node::from_json).collect()),
            Value::String(s) if s == PLACEHOLDER => Node::Placeholder,
            Value::String(s) => Node::Scalar(Bson::String(s)),
            Value::Bool(b) => Node::Scalar(Bson::Boolean(b)),
            Value::Number(n) => Node::Scalar(number_to_bson(&n)),
            Value::Null => Node::Scalar(Bson::Null),
        }
    }

    /// Converts this node to BSON verbatim. Placeholders become the string `"?"`.
    pub fn to_bson(&self) -> Bson {
        match self {
            Node::Object(entries) => Bson::Document(entries_to_document(entries)),
            Node::Array(items) => Bson::Array(items.iter().map(Node::to_bson).collect()),
            Node::Placeholder => Bson::String(PLACEHOLDER.to_string()),
            Node::Scalar(value) => value.clone(),
        }
    }

    pub fn as_object(&self) -> Option<&[(String, Node)]> {
        match self {
            Node::Object(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Scalar(Bson::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Node::Placeholder)
    }

    /// Looks up a direct child of an object node.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_object().and_then(|entries| find_entry(entries, key))
    }

    /// Returns `true` if `key` appears at any depth below this node.
    pub fn mentions(&self, key: &str) -> bool {
        match self {
            Node::Object(entries) => entries
                .iter()
                .any(|(k, v)| k == key || v.mentions(key)),
            Node::Array(items) => items.iter().any(|item| item.mentions(key)),
            _ => false,
        }
    }
}

/// Converts a list of entries to a BSON document verbatim.
pub fn entries_to_document(entries: &[(String, Node)]) -> Document {
    entries
        .iter()
        .map(|(key, value)| (key.clone(), value.to_bson()))
        .collect()
}

pub(crate) fn find_entry<'a>(entries: &'a [(String, Node)], key: &str) -> Option<&'a Node> {
    entries
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}

fn number_to_bson(number: &Number) -> Bson {
    if let Some(value) = number.as_i64() {
        match i32::try_from(value) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(value),
        }
    } else {
        Bson::Double(number.as_f64().unwrap_or(f64::NAN))
    }
}

/// The command family a template compiles to, inferred from its markers.
///
/// Find, insert and remove templates are indistinguishable by markers and all
/// compile to [`TemplateKind::Filter`]; the caller picks the verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// Filter (and optional projection) for find, insert or remove.
    Filter,
    /// Filter plus a `$set` document.
    Update,
    /// Filter plus an `$unset` document.
    Unset,
    /// Filter plus a field to distinct over.
    Distinct,
    /// Aggregation pipeline.
    Aggregate,
}

/// A parsed query template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    entries: Vec<(String, Node)>,
}

impl Template {
    /// Parses a template string.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::EmptyTemplate`] for a blank string and
    /// [`QueryError::MalformedTemplate`] if the string is not a JSON object.
    pub fn parse(source: &str) -> QueryResult<Self> {
        if source.trim().is_empty() {
            return Err(QueryError::EmptyTemplate);
        }

        match Node::from_json(serde_json::from_str::<Value>(source)?) {
            Node::Object(entries) => Ok(Self {
                source: source.to_string(),
                entries,
            }),
            _ => Err(QueryError::MalformedTemplate(
                "template must be a JSON object".to_string(),
            )),
        }
    }

    /// The template string as supplied.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// All top-level entries, `collection` included.
    pub fn entries(&self) -> &[(String, Node)] {
        &self.entries
    }

    /// Top-level entries without the `collection` attribute.
    pub fn body(&self) -> impl Iterator<Item = &(String, Node)> {
        self.entries
            .iter()
            .filter(|(key, _)| key != COLLECTION_FIELD)
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        find_entry(&self.entries, key)
    }

    /// The collection named by the template, if it is a string.
    pub fn collection(&self) -> Option<&str> {
        self.get(COLLECTION_FIELD).and_then(Node::as_str)
    }

    /// The field named by the `distinct` attribute.
    pub fn distinct_key(&self) -> Option<&str> {
        self.get(DISTINCT_FIELD).and_then(Node::as_str)
    }

    /// Returns `true` if `key` appears anywhere in the template.
    pub fn mentions(&self, key: &str) -> bool {
        self.entries
            .iter()
            .any(|(k, v)| k == key || v.mentions(key))
    }

    /// Returns `true` if any key names a `$lookup` stage.
    pub fn mentions_lookup(&self) -> bool {
        self.entries.iter().any(|(key, _)| is_lookup_key(key))
    }

    /// Returns `true` if a `$set` document sits at the top level or under `projection`.
    pub fn has_set(&self) -> bool {
        self.has_modifier(SET_FIELD)
    }

    /// Returns `true` if an `$unset` document sits at the top level or under `projection`.
    pub fn has_unset(&self) -> bool {
        self.has_modifier(UNSET_FIELD)
    }

    fn has_modifier(&self, operator: &str) -> bool {
        self.get(operator).is_some()
            || self
                .get(PROJECTION_FIELD)
                .and_then(|projection| projection.get(operator))
                .is_some()
    }

    /// Returns `true` if any top-level key names an aggregation stage.
    pub fn is_aggregation(&self) -> bool {
        self.entries.iter().any(|(key, _)| {
            is_lookup_key(key)
                || is_unwind_key(key)
                || [LIMIT_FIELD, MATCH_FIELD, SORT_FIELD, GROUP_FIELD, PROJECT_FIELD]
                    .contains(&key.as_str())
        })
    }

    /// Infers the command family from the markers present.
    pub fn kind(&self) -> TemplateKind {
        if self.is_aggregation() {
            TemplateKind::Aggregate
        } else if self.has_set() {
            TemplateKind::Update
        } else if self.has_unset() {
            TemplateKind::Unset
        } else if self.distinct_key().is_some() {
            TemplateKind::Distinct
        } else {
            TemplateKind::Filter
        }
    }
}
