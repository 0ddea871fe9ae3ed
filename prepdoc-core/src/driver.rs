//! Driver abstraction for executing compiled commands.
//!
//! The [`CommandDriver`] trait is the seam between the statement layer and a
//! concrete document database. The statement only produces command trees; the
//! driver owns the wire protocol and the server-side semantics.
//!
//! # Traits
//!
//! - [`CommandDriver`]: Executes find / insert / update / remove / distinct /
//!   aggregate / bulk commands against a named collection
//! - [`CommandDriverBuilder`]: Factory trait for creating driver instances
//!
//! # Examples
//!
//! ```ignore
//! use prepdoc_core::driver::CommandDriver;
//! use bson::doc;
//!
//! let driver = MyDriverImpl::new();
//! let users = driver.find("users", doc! { "name": "alice" }, None).await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, ops::AddAssign};

use crate::error::QueryResult;

/// One operation queued in a bulk accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOp {
    /// Insert a document.
    Insert(Document),
    /// Replace the first document matching `filter`.
    Replace {
        filter: Document,
        replacement: Document,
        /// Insert `replacement` when nothing matches.
        upsert: bool,
    },
}

/// Counters reported by write commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub deleted: u64,
    pub upserted: u64,
}

impl AddAssign for WriteSummary {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.matched += other.matched;
        self.modified += other.modified;
        self.deleted += other.deleted;
        self.upserted += other.upserted;
    }
}

/// Executes compiled commands against a document database.
///
/// Implementations must be thread-safe: a single driver is meant to be shared
/// by many statements, typically by reference.
///
/// # Error Handling
///
/// Driver failures are reported as
/// [`QueryError::Driver`](crate::error::QueryError::Driver); commands a driver
/// cannot run are reported as
/// [`QueryError::Unsupported`](crate::error::QueryError::Unsupported).
#[async_trait]
pub trait CommandDriver: Send + Sync + Debug {
    /// Returns the documents of `collection` matching `filter`.
    ///
    /// An empty filter matches every document. When `projection` is given only
    /// the selected fields are returned.
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> QueryResult<Vec<Document>>;

    /// Inserts one document.
    async fn insert(&self, collection: &str, document: Document) -> QueryResult<WriteSummary>;

    /// Applies an update document (`$set` / `$unset`) to the first match of `filter`.
    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> QueryResult<WriteSummary>;

    /// Removes every document matching `filter`.
    async fn remove(&self, collection: &str, filter: Document) -> QueryResult<WriteSummary>;

    /// Returns the distinct values of `field` among the documents matching `filter`.
    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
    ) -> QueryResult<Vec<Bson>>;

    /// Runs an aggregation pipeline.
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> QueryResult<Vec<Document>>;

    /// Executes a batch of operations without ordering guarantees.
    ///
    /// A failing operation does not stop the rest of the batch; the error is
    /// reported once every operation has been attempted.
    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<BulkOp>,
    ) -> QueryResult<WriteSummary>;

    /// Releases the driver's connections.
    async fn shutdown(self) -> QueryResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<D> CommandDriver for &D
where
    D: CommandDriver,
{
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> QueryResult<Vec<Document>> {
        (*self)
            .find(collection, filter, projection)
            .await
    }

    async fn insert(&self, collection: &str, document: Document) -> QueryResult<WriteSummary> {
        (*self).insert(collection, document).await
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> QueryResult<WriteSummary> {
        (*self)
            .update(collection, filter, update)
            .await
    }

    async fn remove(&self, collection: &str, filter: Document) -> QueryResult<WriteSummary> {
        (*self).remove(collection, filter).await
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
    ) -> QueryResult<Vec<Bson>> {
        (*self)
            .distinct(collection, field, filter)
            .await
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> QueryResult<Vec<Document>> {
        (*self).aggregate(collection, pipeline).await
    }

    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<BulkOp>,
    ) -> QueryResult<WriteSummary> {
        (*self)
            .bulk_write(collection, operations)
            .await
    }
}

#[async_trait]
pub trait CommandDriverBuilder {
    type Driver: CommandDriver;

    async fn build(self) -> QueryResult<Self::Driver>;
}
