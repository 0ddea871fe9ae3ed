use async_trait::async_trait;
use futures::TryStreamExt;
use bson::{Bson, Document};
use mongodb::{
    Client, Collection as MongoCollection,
    options::{ClientOptions, FindOptions, InsertManyOptions, ReplaceOptions},
};
use tracing::{debug, warn};

use prepdoc_core::{
    driver::{BulkOp, CommandDriver, CommandDriverBuilder, WriteSummary},
    error::{QueryError, QueryResult},
};


fn driver_error(error: mongodb::error::Error) -> QueryError {
    QueryError::Driver(error.to_string())
}

#[derive(Debug)]
pub struct MongoDbDriver {
    client: Client,
    database: String,
}

impl MongoDbDriver {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbDriverBuilder {
        MongoDbDriverBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

#[async_trait]
impl CommandDriver for MongoDbDriver {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> QueryResult<Vec<Document>> {
        debug!(collection, %filter, "mongodb find");

        let mut options = FindOptions::default();
        options.projection = projection;

        self.get_collection(collection)
            .find(filter)
            .with_options(options)
            .await
            .map_err(driver_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(driver_error)
    }

    async fn insert(&self, collection: &str, document: Document) -> QueryResult<WriteSummary> {
        debug!(collection, %document, "mongodb insert");

        self.get_collection(collection)
            .insert_one(document)
            .await
            .map_err(driver_error)?;

        Ok(WriteSummary { inserted: 1, ..Default::default() })
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> QueryResult<WriteSummary> {
        debug!(collection, %filter, %update, "mongodb update_one");

        let result = self
            .get_collection(collection)
            .update_one(filter, update)
            .await
            .map_err(driver_error)?;

        Ok(WriteSummary {
            matched: result.matched_count,
            modified: result.modified_count,
            ..Default::default()
        })
    }

    async fn remove(&self, collection: &str, filter: Document) -> QueryResult<WriteSummary> {
        debug!(collection, %filter, "mongodb delete_many");

        let result = self
            .get_collection(collection)
            .delete_many(filter)
            .await
            .map_err(driver_error)?;

        Ok(WriteSummary {
            deleted: result.deleted_count,
            ..Default::default()
        })
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: Document,
    ) -> QueryResult<Vec<Bson>> {
        debug!(collection, field, %filter, "mongodb distinct");

        self.get_collection(collection)
            .distinct(field, filter)
            .await
            .map_err(driver_error)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> QueryResult<Vec<Document>> {
        debug!(collection, stages = pipeline.len(), "mongodb aggregate");

        self.get_collection(collection)
            .aggregate(pipeline)
            .await
            .map_err(driver_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(driver_error)
    }

    /// Runs the inserts as one unordered `insertMany`, then each replace as a
    /// `replaceOne`. Failures are collected and reported together.
    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<BulkOp>,
    ) -> QueryResult<WriteSummary> {
        let total = operations.len();
        let mut inserts = Vec::new();
        let mut replaces = Vec::new();

        for operation in operations {
            match operation {
                BulkOp::Insert(document) => inserts.push(document),
                BulkOp::Replace { filter, replacement, upsert } => replaces.push((filter, replacement, upsert)),
            }
        }

        debug!(collection, inserts = inserts.len(), replaces = replaces.len(), "mongodb bulk write");

        let target = self.get_collection(collection);
        let mut summary = WriteSummary::default();
        let mut failures = Vec::new();

        if !inserts.is_empty() {
            let mut options = InsertManyOptions::default();
            options.ordered = Some(false);

            match target.insert_many(inserts).with_options(options).await {
                Ok(result) => {
                    summary += WriteSummary {
                        inserted: result.inserted_ids.len() as u64,
                        ..Default::default()
                    };
                }
                Err(e) => failures.push(e.to_string()),
            }
        }

        for (filter, replacement, upsert) in replaces {
            let mut options = ReplaceOptions::default();
            options.upsert = Some(upsert);

            match target.replace_one(filter, replacement).with_options(options).await {
                Ok(result) => {
                    summary += WriteSummary {
                        matched: result.matched_count,
                        modified: result.modified_count,
                        upserted: u64::from(result.upserted_id.is_some()),
                        ..Default::default()
                    };
                }
                Err(e) => failures.push(e.to_string()),
            }
        }

        if !failures.is_empty() {
            warn!(collection, failed = failures.len(), total, "bulk write partially failed");
            return Err(QueryError::Driver(failures.join("; ")));
        }

        Ok(summary)
    }

    async fn shutdown(self) -> QueryResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}


pub struct MongoDbDriverBuilder {
    dsn: String,
    database: String,
}

impl MongoDbDriverBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl CommandDriverBuilder for MongoDbDriverBuilder {
    type Driver = MongoDbDriver;

    async fn build(self) -> QueryResult<Self::Driver> {
        Ok(MongoDbDriver::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(driver_error)?,
            )
            .map_err(driver_error)?,
            self.database,
        ))
    }
}
