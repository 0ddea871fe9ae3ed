//! Filter evaluation for in-memory documents.
//!
//! This module provides the matching engine behind [`InMemoryDriver`](crate::InMemoryDriver):
//! comparison and membership operators, `$regex` with its `$options`, the
//! logical `$and` / `$or` / `$nor` combinators, and the `$set` / `$unset`
//! update operators. Dotted field paths descend into embedded documents and
//! array indices.

use std::{collections::HashMap, cmp::Ordering};
use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use regex::RegexBuilder;

use prepdoc_core::{
    error::{QueryError, QueryResult},
    fields::{OPTIONS_FIELD, SET_FIELD, UNSET_FIELD},
};

/// The primary key field added to inserted documents.
pub(crate) const ID_FIELD: &str = "_id";


/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so that `Int32(1)`, `Int64(1)` and
/// `Double(1.0)` compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null or missing value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// String value
    String(&'a str),
    /// ObjectId value
    ObjectId(ObjectId),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Any other BSON value, compared structurally
    Other(&'a Bson),
}

impl<'a> Comparable<'a> {
    /// Maps a missing value to [`Comparable::Null`].
    pub fn from_option(value: Option<&'a Bson>) -> Self {
        value.map_or(Comparable::Null, Comparable::from)
    }

    /// Cross-type sort order, used when two values are not directly comparable.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
            Comparable::Other(_) => 8,
        }
    }

    /// Total order over comparable values.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            other => Comparable::Other(other),
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            _ => None,
        }
    }
}


/// Evaluates filter documents against a single document.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Returns `true` if every clause of `filter` matches. An empty filter matches.
    pub fn evaluate(&self, filter: &Document) -> QueryResult<bool> {
        for (key, condition) in filter {
            if !self.visit_clause(key, condition)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        filter: &Document,
    ) -> QueryResult<Vec<Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(document).evaluate(filter)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }

    /// Index of the first document matching `filter`.
    pub fn position(documents: &[Document], filter: &Document) -> QueryResult<Option<usize>> {
        for (index, document) in documents.iter().enumerate() {
            if DocumentEvaluator::new(document).evaluate(filter)? {
                return Ok(Some(index));
            }
        }

        Ok(None)
    }

    fn visit_clause(&self, key: &str, condition: &Bson) -> QueryResult<bool> {
        match key {
            "$and" => {
                for clause in clauses(key, condition)? {
                    if !self.evaluate(clause)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            "$or" => {
                for clause in clauses(key, condition)? {
                    if self.evaluate(clause)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            "$nor" => {
                for clause in clauses(key, condition)? {
                    if self.evaluate(clause)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ if key.starts_with('$') => Err(QueryError::Unsupported(format!("top-level operator {key}"))),
            _ => self.visit_field(key, condition),
        }
    }

    fn visit_field(&self, field: &str, condition: &Bson) -> QueryResult<bool> {
        let value = get_path(self.document, field);

        match condition {
            Bson::Document(operators) if is_operator_document(operators) => {
                for (operator, operand) in operators {
                    if !visit_operator(value, operator, operand, operators)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(equals(value, condition)),
        }
    }
}

fn visit_operator(
    value: Option<&Bson>,
    operator: &str,
    operand: &Bson,
    siblings: &Document,
) -> QueryResult<bool> {
    match operator {
        "$eq" => Ok(equals(value, operand)),
        "$ne" => Ok(!equals(value, operand)),
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let expected = Comparable::from(operand);
            Ok(value.is_some_and(|value| {
                candidates(value)
                    .into_iter()
                    .any(|candidate| match Comparable::from(candidate).partial_cmp(&expected) {
                        Some(ordering) => match operator {
                            "$gt" => ordering == Ordering::Greater,
                            "$gte" => ordering != Ordering::Less,
                            "$lt" => ordering == Ordering::Less,
                            _ => ordering != Ordering::Greater,
                        },
                        None => false,
                    })
            }))
        }
        "$in" => one_of(value, operator, operand),
        "$nin" => Ok(!one_of(value, operator, operand)?),
        "$exists" => Ok(value.is_some() == truthy(operand)),
        "$regex" => {
            let options = siblings.get_str(OPTIONS_FIELD).unwrap_or("");
            regex_matches(value, operand, options)
        }
        // Read together with `$regex`.
        "$options" => Ok(true),
        other => Err(QueryError::Unsupported(format!("filter operator {other}"))),
    }
}

fn clauses<'c>(operator: &str, condition: &'c Bson) -> QueryResult<Vec<&'c Document>> {
    match condition {
        Bson::Array(items) => items
            .iter()
            .map(|item| {
                item.as_document()
                    .ok_or_else(|| QueryError::Driver(format!("{operator} clauses must be documents")))
            })
            .collect(),
        _ => Err(QueryError::Driver(format!("{operator} expects an array"))),
    }
}

fn is_operator_document(document: &Document) -> bool {
    !document.is_empty() && document.keys().all(|key| key.starts_with('$'))
}

/// The value itself, followed by its elements when it is an array.
fn candidates(value: &Bson) -> Vec<&Bson> {
    match value {
        Bson::Array(items) => std::iter::once(value)
            .chain(items.iter())
            .collect(),
        other => vec![other],
    }
}

/// Equality with array fan-out: an array field equals any of its elements.
/// A missing field equals `null`.
pub(crate) fn equals(value: Option<&Bson>, operand: &Bson) -> bool {
    match value {
        None => matches!(operand, Bson::Null),
        Some(value) => {
            let expected = Comparable::from(operand);
            candidates(value)
                .into_iter()
                .any(|candidate| Comparable::from(candidate) == expected)
        }
    }
}

fn one_of(value: Option<&Bson>, operator: &str, operand: &Bson) -> QueryResult<bool> {
    match operand {
        Bson::Array(items) => Ok(items.iter().any(|item| equals(value, item))),
        _ => Err(QueryError::Driver(format!("{operator} expects an array"))),
    }
}

fn regex_matches(value: Option<&Bson>, pattern: &Bson, options: &str) -> QueryResult<bool> {
    let Bson::String(pattern) = pattern else {
        return Err(QueryError::Driver("$regex expects a string pattern".to_string()));
    };

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .build()
        .map_err(|e| QueryError::Driver(e.to_string()))?;

    Ok(value.is_some_and(|value| {
        candidates(value)
            .into_iter()
            .any(|candidate| matches!(candidate, Bson::String(s) if regex.is_match(s)))
    }))
}

pub(crate) fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(value) => *value,
        Bson::Int32(value) => *value != 0,
        Bson::Int64(value) => *value != 0,
        Bson::Double(value) => *value != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

pub(crate) fn get_path<'d>(document: &'d Document, path: &str) -> Option<&'d Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Writes `value` at a dotted path, creating embedded documents as needed.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

pub(crate) fn remove_path(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(inner)) => remove_path(inner, rest),
            _ => None,
        },
    }
}

/// Applies a `$set` / `$unset` update document in place.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> QueryResult<()> {
    if !is_operator_document(update) {
        return Err(QueryError::Driver("update document must only contain operators".to_string()));
    }

    for (operator, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| QueryError::Driver(format!("{operator} expects a document")))?;

        match operator.as_str() {
            SET_FIELD => {
                for (path, value) in fields {
                    set_path(document, path, value.clone());
                }
            }
            UNSET_FIELD => {
                for path in fields.keys() {
                    remove_path(document, path);
                }
            }
            other => return Err(QueryError::Unsupported(format!("update operator {other}"))),
        }
    }

    Ok(())
}

/// Applies a projection.
///
/// Any truthy field other than `_id` selects inclusion mode, where `_id` is
/// kept unless explicitly excluded. Otherwise the falsy fields are removed.
pub(crate) fn project(document: &Document, projection: &Document) -> Document {
    let including = projection
        .iter()
        .any(|(key, value)| key != ID_FIELD && truthy(value));

    if including {
        let mut projected = Document::new();

        if projection.get(ID_FIELD).is_none_or(truthy) {
            if let Some(id) = document.get(ID_FIELD) {
                projected.insert(ID_FIELD, id.clone());
            }
        }

        for (path, value) in projection {
            if path != ID_FIELD && truthy(value) {
                if let Some(found) = get_path(document, path) {
                    set_path(&mut projected, path, found.clone());
                }
            }
        }

        projected
    } else {
        let mut projected = document.clone();

        for (path, value) in projection {
            if !truthy(value) {
                remove_path(&mut projected, path);
            }
        }

        projected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn matches(document: Document, filter: Document) -> bool {
        DocumentEvaluator::new(&document)
            .evaluate(&filter)
            .unwrap()
    }

    #[test]
    fn numeric_types_compare_equal() {
        assert!(matches(doc! { "age": 30_i64 }, doc! { "age": 30 }));
        assert!(matches(doc! { "age": 30.0 }, doc! { "age": { "$gte": 30 } }));
    }

    #[test]
    fn array_fields_match_any_element() {
        let document = doc! { "tags": ["a", "b"] };
        assert!(matches(document.clone(), doc! { "tags": "b" }));
        assert!(matches(document, doc! { "tags": { "$in": ["x", "a"] } }));
    }

    #[test]
    fn missing_field_equals_null() {
        assert!(matches(doc! { "name": "alice" }, doc! { "role": Bson::Null }));
        assert!(matches(doc! { "name": "alice" }, doc! { "role": { "$exists": false } }));
    }

    #[test]
    fn regex_honours_case_insensitive_option() {
        let document = doc! { "UM_USER_NAME": "Alice" };
        assert!(matches(document.clone(), doc! { "UM_USER_NAME": { "$regex": "^ali", "$options": "i" } }));
        assert!(!matches(document, doc! { "UM_USER_NAME": { "$regex": "^ali" } }));
    }

    #[test]
    fn logical_combinators() {
        let document = doc! { "a": 1, "b": 2 };
        assert!(matches(document.clone(), doc! { "$or": [{ "a": 5 }, { "b": 2 }] }));
        assert!(!matches(document.clone(), doc! { "$and": [{ "a": 1 }, { "b": 3 }] }));
        assert!(matches(document, doc! { "$nor": [{ "a": 5 }] }));
    }

    #[test]
    fn dotted_paths_descend() {
        let document = doc! { "profile": { "city": "Oslo" }, "items": [{ "n": 1 }] };
        assert!(matches(document.clone(), doc! { "profile.city": "Oslo" }));
        assert!(matches(document, doc! { "items.0.n": 1 }));
    }

    #[test]
    fn unknown_operator_is_unsupported() {
        let result = DocumentEvaluator::new(&doc! { "a": 1 })
            .evaluate(&doc! { "a": { "$mod": [2, 1] } });
        assert!(matches!(result, Err(QueryError::Unsupported(_))));
    }

    #[test]
    fn update_sets_and_unsets_paths() {
        let mut document = doc! { "name": "alice", "role": "user" };
        apply_update(&mut document, &doc! { "$set": { "profile.city": "Oslo" } }).unwrap();
        apply_update(&mut document, &doc! { "$unset": { "role": "" } }).unwrap();

        assert_eq!(document, doc! { "name": "alice", "profile": { "city": "Oslo" } });
    }

    #[test]
    fn projection_modes() {
        let document = doc! { "_id": 1, "name": "alice", "role": "admin" };

        assert_eq!(project(&document, &doc! { "name": 1 }), doc! { "_id": 1, "name": "alice" });
        assert_eq!(project(&document, &doc! { "name": 1, "_id": 0 }), doc! { "name": "alice" });
        assert_eq!(project(&document, &doc! { "role": 0 }), doc! { "_id": 1, "name": "alice" });
    }
}
