//! Aggregation pipeline execution over the in-memory collections.
//!
//! Supported stages: `$limit`, `$match`, `$sort`, `$project`, `$unwind` and
//! equality `$lookup`. `$group` and sub-pipeline lookups are reported as
//! [`QueryError::Unsupported`].

use bson::{Bson, Document};
use tracing::trace;

use prepdoc_core::{
    error::{QueryError, QueryResult},
    fields::{GROUP_FIELD, LIMIT_FIELD, LOOKUP_FIELD, MATCH_FIELD, PROJECT_FIELD, SORT_FIELD, UNWIND_FIELD},
};

use crate::{
    driver::StoreMap,
    evaluator::{Comparable, DocumentEvaluator, equals, get_path, project, set_path},
};

pub(crate) struct PipelineRunner<'s> {
    store: &'s StoreMap,
}

impl<'s> PipelineRunner<'s> {
    pub fn new(store: &'s StoreMap) -> Self {
        Self { store }
    }

    pub fn run(&self, collection: &str, pipeline: &[Document]) -> QueryResult<Vec<Document>> {
        let mut documents = self
            .store
            .get(collection)
            .cloned()
            .unwrap_or_default();

        for stage in pipeline {
            let (operator, body) = single_operator(stage)?;

            documents = match operator {
                LIMIT_FIELD => limit(documents, body)?,
                MATCH_FIELD => {
                    let filter = body
                        .as_document()
                        .ok_or_else(|| QueryError::Driver("$match expects a document".to_string()))?;
                    DocumentEvaluator::filter_documents(documents.iter(), filter)?
                }
                SORT_FIELD => sort(documents, body)?,
                PROJECT_FIELD => {
                    let projection = body
                        .as_document()
                        .ok_or_else(|| QueryError::Driver("$project expects a document".to_string()))?;
                    documents
                        .iter()
                        .map(|document| project(document, projection))
                        .collect()
                }
                UNWIND_FIELD => unwind(documents, body)?,
                LOOKUP_FIELD => self.lookup(documents, body)?,
                GROUP_FIELD => return Err(QueryError::Unsupported("$group stages".to_string())),
                other => return Err(QueryError::Unsupported(format!("pipeline stage {other}"))),
            };

            trace!(stage = operator, documents = documents.len(), "applied pipeline stage");
        }

        Ok(documents)
    }

    /// Equality join: `as` receives the `from` documents whose `foreignField`
    /// equals the local `localField`.
    fn lookup(&self, documents: Vec<Document>, body: &Bson) -> QueryResult<Vec<Document>> {
        let spec = body
            .as_document()
            .ok_or_else(|| QueryError::Driver("$lookup expects a document".to_string()))?;

        if spec.contains_key("pipeline") {
            return Err(QueryError::Unsupported("$lookup sub-pipelines".to_string()));
        }

        let field = |name: &str| {
            spec.get_str(name)
                .map_err(|_| QueryError::Driver(format!("$lookup requires a string {name}")))
        };
        let from = field("from")?;
        let local = field("localField")?;
        let foreign = field("foreignField")?;
        let alias = field("as")?;

        let foreign_documents = self
            .store
            .get(from)
            .map(Vec::as_slice)
            .unwrap_or_default();

        Ok(
            documents
                .into_iter()
                .map(|mut document| {
                    let joined = foreign_documents
                        .iter()
                        .filter(|candidate| joins(get_path(&document, local), get_path(candidate, foreign)))
                        .cloned()
                        .map(Bson::Document)
                        .collect::<Vec<_>>();

                    set_path(&mut document, alias, Bson::Array(joined));
                    document
                })
                .collect()
        )
    }
}

fn single_operator(stage: &Document) -> QueryResult<(&str, &Bson)> {
    let mut entries = stage.iter();

    match (entries.next(), entries.next()) {
        (Some((operator, body)), None) => Ok((operator.as_str(), body)),
        _ => Err(QueryError::Driver(format!(
            "pipeline stage must have exactly one operator: {stage}"
        ))),
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(*value as f64),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

fn limit(mut documents: Vec<Document>, body: &Bson) -> QueryResult<Vec<Document>> {
    match as_number(body) {
        Some(limit) if limit >= 1.0 && limit.fract() == 0.0 => {
            documents.truncate(limit as usize);
            Ok(documents)
        }
        _ => Err(QueryError::Driver(format!("$limit must be a positive integer, got {body}"))),
    }
}

fn sort(mut documents: Vec<Document>, body: &Bson) -> QueryResult<Vec<Document>> {
    let keys = body
        .as_document()
        .ok_or_else(|| QueryError::Driver("$sort expects a document".to_string()))?
        .iter()
        .map(|(field, direction)| match as_number(direction) {
            Some(direction) if direction == 1.0 || direction == -1.0 => Ok((field.as_str(), direction < 0.0)),
            _ => Err(QueryError::Driver(format!("invalid $sort direction for {field}"))),
        })
        .collect::<QueryResult<Vec<_>>>()?;

    documents.sort_by(|a, b| {
        keys.iter()
            .map(|(field, descending)| {
                let ordering = Comparable::from_option(get_path(a, field))
                    .total_cmp(&Comparable::from_option(get_path(b, field)));
                if *descending { ordering.reverse() } else { ordering }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(documents)
}

fn unwind(documents: Vec<Document>, body: &Bson) -> QueryResult<Vec<Document>> {
    let (path, preserve) = match body {
        Bson::String(path) => (path.as_str(), false),
        Bson::Document(options) => (
            options
                .get_str("path")
                .map_err(|_| QueryError::Driver("$unwind requires a path".to_string()))?,
            options
                .get_bool("preserveNullAndEmptyArrays")
                .unwrap_or(false),
        ),
        other => return Err(QueryError::Driver(format!("invalid $unwind body {other}"))),
    };
    let field = path
        .strip_prefix('$')
        .ok_or_else(|| QueryError::Driver(format!("$unwind path {path} must start with '$'")))?;

    let mut unwound = Vec::with_capacity(documents.len());

    for document in documents {
        match get_path(&document, field).cloned() {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut copy = document.clone();
                    set_path(&mut copy, field, item);
                    unwound.push(copy);
                }
            }
            Some(Bson::Array(_)) | Some(Bson::Null) | None => {
                if preserve {
                    unwound.push(document);
                }
            }
            Some(_) => unwound.push(document),
        }
    }

    Ok(unwound)
}

/// A missing local field joins documents whose foreign field is null or missing.
fn joins(local: Option<&Bson>, foreign: Option<&Bson>) -> bool {
    match local {
        None => equals(foreign, &Bson::Null),
        Some(Bson::Array(items)) => items.iter().any(|item| equals(foreign, item)),
        Some(value) => equals(foreign, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn store() -> StoreMap {
        StoreMap::from([
            (
                "users".to_string(),
                vec![
                    doc! { "_id": 1, "name": "carol", "roles": ["admin", "dev"] },
                    doc! { "_id": 2, "name": "alice", "roles": ["dev"] },
                    doc! { "_id": 3, "name": "bob", "roles": [] },
                ],
            ),
            (
                "roles".to_string(),
                vec![
                    doc! { "name": "admin", "level": 9 },
                    doc! { "name": "dev", "level": 3 },
                ],
            ),
        ])
    }

    #[test]
    fn sort_then_limit() {
        let store = store();
        let result = PipelineRunner::new(&store)
            .run("users", &[doc! { "$sort": { "name": 1 } }, doc! { "$limit": 2 }])
            .unwrap();

        let names = result
            .iter()
            .map(|document| document.get_str("name").unwrap())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn unwind_drops_empty_arrays() {
        let store = store();
        let result = PipelineRunner::new(&store)
            .run("users", &[doc! { "$unwind": "$roles" }])
            .unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result[0].get_str("roles").unwrap(), "admin");
    }

    #[test]
    fn lookup_joins_on_equality() {
        let store = store();
        let result = PipelineRunner::new(&store)
            .run(
                "users",
                &[
                    doc! { "$match": { "_id": 2 } },
                    doc! { "$lookup": { "from": "roles", "localField": "roles", "foreignField": "name", "as": "grants" } },
                ],
            )
            .unwrap();

        assert_eq!(
            result[0].get_array("grants").unwrap(),
            &vec![Bson::Document(doc! { "name": "dev", "level": 3 })]
        );
    }

    #[test]
    fn group_is_unsupported() {
        let store = store();
        let result = PipelineRunner::new(&store).run("users", &[doc! { "$group": { "_id": "$name" } }]);

        assert!(matches!(result, Err(QueryError::Unsupported(_))));
    }
}
