//! In-memory command driver.
//!
//! This module provides a driver that keeps every collection as an ordered
//! list of BSON documents behind async-safe read-write locks, and records each
//! command it receives in a journal.

use std::{collections::HashMap, sync::Arc};
use async_trait::async_trait;
use mea::rwlock::RwLock;
use bson::{Bson, Document, doc, oid::ObjectId};
use tracing::{debug, warn};

use prepdoc_core::{
    driver::{BulkOp, CommandDriver, CommandDriverBuilder, WriteSummary},
    error::{QueryError, QueryResult},
};

use crate::{
    evaluator::{Comparable, DocumentEvaluator, ID_FIELD, apply_update, get_path, project},
    journal::DriverCommand,
    pipeline::PipelineRunner,
};

pub(crate) type StoreMap = HashMap<String, Vec<Document>>;


/// Thread-safe in-memory implementation of [`CommandDriver`].
///
/// Documents keep their insertion order, so `find` returns them in the order
/// they were written. Inserted documents without an `_id` receive a fresh
/// [`ObjectId`].
///
/// `InMemoryDriver` is cloneable; clones share the same collections and journal.
///
/// # Example
///
/// ```ignore
/// use prepdoc_memory::InMemoryDriver;
/// use prepdoc_core::statement::PreparedStatement;
///
/// let driver = InMemoryDriver::new();
/// let mut statement = PreparedStatement::new(&driver, r#"{"collection":"users","name":"?"}"#)?;
/// statement.bind_string("name", "alice")?;
/// statement.insert().await?;
///
/// assert_eq!(driver.journal().await.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryDriver {
    /// collection name -> documents in insertion order
    collections: Arc<RwLock<StoreMap>>,
    /// Every command received, oldest first
    journal: Arc<RwLock<Vec<DriverCommand>>>,
}

impl InMemoryDriver {
    /// Creates a driver with no collections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder that can seed collections.
    pub fn builder() -> InMemoryDriverBuilder {
        InMemoryDriverBuilder::default()
    }

    /// Returns a copy of the commands received so far.
    pub async fn journal(&self) -> Vec<DriverCommand> {
        self.journal.read().await.clone()
    }

    pub async fn clear_journal(&self) {
        self.journal.write().await.clear();
    }

    /// Returns a snapshot of a collection's documents.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    async fn record(&self, command: DriverCommand) {
        debug!(command = command.name(), collection = command.collection(), "in-memory command");
        self.journal.write().await.push(command);
    }
}

/// Prepends a fresh `_id` unless the document already carries one.
fn with_object_id(document: Document) -> Document {
    if document.contains_key(ID_FIELD) {
        return document;
    }

    with_id(ObjectId::new().into(), document)
}

/// Returns `document` with `id` as its leading `_id`.
fn with_id(id: Bson, document: Document) -> Document {
    let mut identified = doc! { ID_FIELD: id };
    for (key, value) in document {
        if key != ID_FIELD {
            identified.insert(key, value);
        }
    }
    identified
}

/// Applies one bulk operation and reports what it changed.
fn apply_bulk_op(documents: &mut Vec<Document>, operation: BulkOp) -> QueryResult<WriteSummary> {
    let mut summary = WriteSummary::default();

    match operation {
        BulkOp::Insert(document) => {
            documents.push(with_object_id(document));
            summary.inserted = 1;
        }
        BulkOp::Replace { filter, replacement, upsert } => {
            match DocumentEvaluator::position(documents, &filter)? {
                Some(index) => {
                    let replacement = match documents[index].get(ID_FIELD) {
                        Some(id) => with_id(id.clone(), replacement),
                        None => replacement,
                    };

                    summary.matched = 1;
                    summary.modified = u64::from(documents[index] != replacement);
                    documents[index] = replacement;
                }
                None if upsert => {
                    documents.push(with_object_id(replacement));
                    summary.upserted = 1;
                }
                None => {}
            }
        }
    }

    Ok(summary)
}


#[async_trait]
impl CommandDriver for InMemoryDriver {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> QueryResult<Vec<Document>> {
        self.record(DriverCommand::Find {
            collection: collection.to_string(),
            filter: filter.clone(),
            projection: projection.clone(),
        })
        .await;

        let store = self.collections.read().await;
        let documents = match store.get(collection) {
            Some(documents) => documents,
            None => return Ok(vec![]),
        };

        let matched = DocumentEvaluator::filter_documents(documents, &filter)?;

        Ok(match projection {
            Some(projection) => matched
                .iter()
                .map(|document| project(document, &projection))
                .collect(),
            None => matched,
        })
    }

    async fn insert(&self, collection: &str, document: Document) -> QueryResult<WriteSummary> {
        self.record(DriverCommand::Insert {
            collection: collection.to_string(),
            document: document.clone(),
        })
        .await;

        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(with_object_id(document));

        Ok(WriteSummary { inserted: 1, ..Default::default() })
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> QueryResult<WriteSummary> {
        self.record(DriverCommand::Update {
            collection: collection.to_string(),
            filter: filter.clone(),
            update: update.clone(),
        })
        .await;

        let mut store = self.collections.write().await;
        let documents = match store.get_mut(collection) {
            Some(documents) => documents,
            None => return Ok(WriteSummary::default()),
        };

        let Some(index) = DocumentEvaluator::position(documents, &filter)? else {
            return Ok(WriteSummary::default());
        };

        let mut updated = documents[index].clone();
        apply_update(&mut updated, &update)?;

        let modified = u64::from(updated != documents[index]);
        documents[index] = updated;

        Ok(WriteSummary { matched: 1, modified, ..Default::default() })
    }

    async fn remove(&self, collection: &str, filter: Document) -> QueryResult<WriteSummary> {
        self.record(DriverCommand::Remove {
            collection: collection.to_string(),
            filter: filter.clone(),
        })
        .await;

        let mut store = self.collections.write().await;
        let documents = match store.get_mut(collection) {
            Some(documents) => documents,
            None => return Ok(WriteSummary::default()),
        };

        // Evaluate everything first so an evaluation error leaves the collection intact.
        let matched = documents
            .iter()
            .map(|document| DocumentEvaluator::new(document).evaluate(&filter))
            .collect::<QueryResult<Vec<_>>>()?;

        let before = documents.len();
        let mut flags = matched.into_iter();
        documents.retain(|_| !flags.next().unwrap_or(false));

        Ok(WriteSummary {
            deleted: (before - documents.len()) as u64,
            ..Default::default()
        })
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
    ) -> QueryResult<Vec<Bson>> {
        self.record(DriverCommand::Distinct {
            collection: collection.to_string(),
            field: field.to_string(),
            filter: filter.clone(),
        })
        .await;

        let store = self.collections.read().await;
        let documents = match store.get(collection) {
            Some(documents) => documents,
            None => return Ok(vec![]),
        };

        let mut values: Vec<Bson> = Vec::new();

        for document in DocumentEvaluator::filter_documents(documents, &filter)? {
            let items = match get_path(&document, field) {
                Some(Bson::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => continue,
            };

            for item in items {
                let seen = values
                    .iter()
                    .any(|value| Comparable::from(value) == Comparable::from(&item));
                if !seen {
                    values.push(item);
                }
            }
        }

        Ok(values)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> QueryResult<Vec<Document>> {
        self.record(DriverCommand::Aggregate {
            collection: collection.to_string(),
            pipeline: pipeline.clone(),
        })
        .await;

        let store = self.collections.read().await;
        PipelineRunner::new(&store).run(collection, &pipeline)
    }

    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<BulkOp>,
    ) -> QueryResult<WriteSummary> {
        self.record(DriverCommand::BulkWrite {
            collection: collection.to_string(),
            operations: operations.clone(),
        })
        .await;

        let total = operations.len();
        let mut summary = WriteSummary::default();
        let mut failures = Vec::new();

        let mut store = self.collections.write().await;
        let documents = store
            .entry(collection.to_string())
            .or_default();

        for operation in operations {
            match apply_bulk_op(documents, operation) {
                Ok(applied) => summary += applied,
                Err(e) => failures.push(e.to_string()),
            }
        }

        if !failures.is_empty() {
            warn!(collection, failed = failures.len(), total, "bulk write partially failed");
            return Err(QueryError::Driver(format!(
                "{} of {} bulk operations failed: {}",
                failures.len(),
                total,
                failures.join("; ")
            )));
        }

        Ok(summary)
    }
}


/// Builder for constructing [`InMemoryDriver`] instances, optionally seeded
/// with documents.
///
/// # Example
///
/// ```ignore
/// use prepdoc_memory::InMemoryDriver;
/// use prepdoc_core::driver::CommandDriverBuilder;
/// use bson::doc;
///
/// let driver = InMemoryDriver::builder()
///     .collection("users", [doc! { "name": "alice" }])
///     .build()
///     .await?;
/// ```
#[derive(Default, Debug)]
pub struct InMemoryDriverBuilder {
    collections: StoreMap,
}

impl InMemoryDriverBuilder {
    /// Appends `documents` to `name`. Seeding is not recorded in the journal.
    pub fn collection(mut self, name: impl Into<String>, documents: impl IntoIterator<Item = Document>) -> Self {
        self.collections
            .entry(name.into())
            .or_default()
            .extend(documents.into_iter().map(with_object_id));
        self
    }
}

#[async_trait]
impl CommandDriverBuilder for InMemoryDriverBuilder {
    type Driver = InMemoryDriver;

    /// Builds the driver. This always succeeds.
    async fn build(self) -> QueryResult<Self::Driver> {
        Ok(InMemoryDriver {
            collections: Arc::new(RwLock::new(self.collections)),
            journal: Arc::default(),
        })
    }
}
