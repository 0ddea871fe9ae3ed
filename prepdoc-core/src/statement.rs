//! The prepared statement: a template, its bindings and a driver.
//!
//! A [`PreparedStatement`] is constructed from a driver and a template string,
//! collects typed bindings by name, and compiles the bound template on every
//! execution. Compilation failures (parameter count mismatch, missing
//! collection, unbound placeholders) are raised before the driver is touched.
//!
//! # Lifecycle
//!
//! ```text
//! PartiallyBound --bind--> Bound --execute--> Used --bind--> Bound ...
//!                            |
//!                            +--add_batch--> Batching --insert_bulk--> Used
//!
//! any state --close--> Closed
//! ```
//!
//! Once closed, every operation fails with [`QueryError::Closed`].
//!
//! # Example
//!
//! ```ignore
//! use prepdoc::prelude::*;
//!
//! let mut statement = PreparedStatement::new(&driver, r#"{"collection":"users","name":"?"}"#)?;
//! statement.bind_string("name", "alice")?;
//! let users = statement.find().await?;
//! ```
//!
//! Statements are single-threaded by contract: every executing call takes
//! `&mut self`. Share the driver between statements instead.

use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    compile::{CompiledCommand, CompiledPipeline, CompiledQuery, compile, compile_pipeline, compile_query},
    driver::{BulkOp, CommandDriver, WriteSummary},
    error::{QueryError, QueryResult},
    matcher::{ensure_arguments, match_arguments},
    options::{LookupMode, StatementOptions},
    template::Template,
    value::{Bindings, TypedValue},
};

/// Where a statement is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    /// Fewer (or more) bindings than placeholders.
    PartiallyBound,
    /// Binding count matches the placeholder count.
    Bound,
    /// Operations are queued in the bulk accumulator.
    Batching,
    /// At least one command has been executed.
    Used,
    /// The statement has been closed.
    Closed,
}

#[derive(Debug)]
struct Batch {
    collection: String,
    operations: Vec<BulkOp>,
}

#[derive(Debug)]
struct Session<D> {
    driver: D,
    template: Template,
    bindings: Bindings,
    options: StatementOptions,
    batch: Option<Batch>,
}

impl<D: CommandDriver> Session<D> {
    fn prepare_query(&self) -> QueryResult<CompiledQuery> {
        ensure_arguments(&self.template, &self.bindings)?;
        compile_query(&self.template, &self.bindings, &self.options)
    }

    fn prepare_pipeline(&self) -> QueryResult<CompiledPipeline> {
        ensure_arguments(&self.template, &self.bindings)?;
        compile_pipeline(&self.template, &self.bindings, &self.options)
    }

    fn queue(&mut self, collection: String, operation: BulkOp) {
        self.batch
            .get_or_insert_with(|| Batch { collection, operations: Vec::new() })
            .operations
            .push(operation);
    }
}

/// A JSON template bound to a driver, executed with named typed parameters.
#[derive(Debug)]
pub struct PreparedStatement<D: CommandDriver> {
    session: Option<Session<D>>,
    state: StatementState,
}

impl<D: CommandDriver> PreparedStatement<D> {
    /// Prepares `template` for execution on `driver` with default options.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::EmptyTemplate`] or [`QueryError::MalformedTemplate`]
    /// if the template cannot be parsed.
    pub fn new(driver: D, template: &str) -> QueryResult<Self> {
        Self::with_options(driver, template, StatementOptions::default())
    }

    /// Prepares `template` with explicit [`StatementOptions`].
    pub fn with_options(driver: D, template: &str, options: StatementOptions) -> QueryResult<Self> {
        let template = Template::parse(template)?;

        debug!(
            lookup_mode = ?options.lookup_mode_for(&template),
            kind = ?template.kind(),
            "prepared statement"
        );

        let mut statement = Self {
            session: Some(Session {
                driver,
                template,
                bindings: Bindings::new(),
                options,
                batch: None,
            }),
            state: StatementState::PartiallyBound,
        };
        statement.refresh_state();

        Ok(statement)
    }

    fn session(&self) -> QueryResult<&Session<D>> {
        self.session.as_ref().ok_or(QueryError::Closed)
    }

    fn session_mut(&mut self) -> QueryResult<&mut Session<D>> {
        self.session.as_mut().ok_or(QueryError::Closed)
    }

    fn refresh_state(&mut self) {
        if let Some(session) = &self.session {
            self.state = if session.batch.is_some() {
                StatementState::Batching
            } else if match_arguments(&session.template, &session.bindings) {
                StatementState::Bound
            } else {
                StatementState::PartiallyBound
            };
        }
    }

    /// Binds `value` to the placeholder `name`. Rebinding a name replaces its value.
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<TypedValue>) -> QueryResult<&mut Self> {
        self.session_mut()?.bindings.bind(name, value);
        self.refresh_state();
        Ok(self)
    }

    pub fn bind_int(&mut self, name: impl Into<String>, value: i32) -> QueryResult<&mut Self> {
        self.bind(name, TypedValue::Int32(value))
    }

    pub fn bind_long(&mut self, name: impl Into<String>, value: i64) -> QueryResult<&mut Self> {
        self.bind(name, TypedValue::Int64(value))
    }

    pub fn bind_string(&mut self, name: impl Into<String>, value: impl Into<String>) -> QueryResult<&mut Self> {
        self.bind(name, TypedValue::Str(value.into()))
    }

    pub fn bind_bool(&mut self, name: impl Into<String>, value: bool) -> QueryResult<&mut Self> {
        self.bind(name, TypedValue::Bool(value))
    }

    pub fn bind_date(&mut self, name: impl Into<String>, value: DateTime<Utc>) -> QueryResult<&mut Self> {
        self.bind(name, TypedValue::Date(value))
    }

    /// Selects the lookup layout with the legacy flag.
    ///
    /// Note the polarity: `true` selects [`LookupMode::Single`] (every lookup,
    /// then every unwind) and `false` selects [`LookupMode::Interleaved`].
    pub fn set_multi_lookup(&mut self, multi_lookup: bool) -> QueryResult<()> {
        self.set_lookup_mode(LookupMode::from_multi_lookup(multi_lookup))
    }

    pub fn set_lookup_mode(&mut self, mode: LookupMode) -> QueryResult<()> {
        self.session_mut()?.options.lookup_mode = Some(mode);
        Ok(())
    }

    /// The lookup layout the next aggregation will use.
    pub fn lookup_mode(&self) -> QueryResult<LookupMode> {
        let session = self.session()?;
        Ok(session.options.lookup_mode_for(&session.template))
    }

    pub fn template(&self) -> QueryResult<&Template> {
        Ok(&self.session()?.template)
    }

    pub fn bindings(&self) -> QueryResult<&Bindings> {
        Ok(&self.session()?.bindings)
    }

    pub fn state(&self) -> StatementState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    /// Number of operations waiting in the bulk accumulator.
    pub fn pending_batch(&self) -> usize {
        self.session
            .as_ref()
            .and_then(|session| session.batch.as_ref())
            .map_or(0, |batch| batch.operations.len())
    }

    /// Compiles the bound template without executing it.
    pub fn compile(&self) -> QueryResult<CompiledCommand> {
        let session = self.session()?;
        ensure_arguments(&session.template, &session.bindings)?;
        compile(&session.template, &session.bindings, &session.options)
    }

    /// Finds the documents matching the compiled filter, applying the projection if any.
    pub async fn find(&mut self) -> QueryResult<Vec<Document>> {
        let session = self.session()?;
        let query = session.prepare_query()?;

        debug!(collection = %query.collection, filter = %query.filter, "find");

        let documents = session
            .driver
            .find(&query.collection, query.filter, query.projection)
            .await?;

        self.state = StatementState::Used;
        Ok(documents)
    }

    /// Inserts the compiled filter document.
    pub async fn insert(&mut self) -> QueryResult<WriteSummary> {
        let session = self.session()?;
        let query = session.prepare_query()?;

        debug!(collection = %query.collection, document = %query.filter, "insert");

        let summary = session
            .driver
            .insert(&query.collection, query.filter)
            .await?;

        self.state = StatementState::Used;
        Ok(summary)
    }

    /// Applies the template's `$set` / `$unset` document to the first match.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::MissingUpdate`] if the template has neither a
    /// modifier nor a projection to write.
    pub async fn update(&mut self) -> QueryResult<WriteSummary> {
        let session = self.session()?;
        let query = session.prepare_query()?;
        let update = query.update_document()?;

        debug!(collection = %query.collection, filter = %query.filter, %update, "update");

        let summary = session
            .driver
            .update(&query.collection, query.filter, update)
            .await?;

        self.state = StatementState::Used;
        Ok(summary)
    }

    /// Removes every document matching the compiled filter.
    pub async fn remove(&mut self) -> QueryResult<WriteSummary> {
        let session = self.session()?;
        let query = session.prepare_query()?;

        debug!(collection = %query.collection, filter = %query.filter, "remove");

        let summary = session
            .driver
            .remove(&query.collection, query.filter)
            .await?;

        self.state = StatementState::Used;
        Ok(summary)
    }

    /// Returns the distinct values of the template's `distinct` field.
    pub async fn distinct(&mut self) -> QueryResult<Vec<Bson>> {
        let session = self.session()?;
        let query = session.prepare_query()?;
        let field = query
            .distinct
            .ok_or(QueryError::MissingDistinctKey)?;

        debug!(collection = %query.collection, field = %field, filter = %query.filter, "distinct");

        let values = session
            .driver
            .distinct(&query.collection, &field, query.filter)
            .await?;

        self.state = StatementState::Used;
        Ok(values)
    }

    /// Runs the compiled aggregation pipeline.
    pub async fn aggregate(&mut self) -> QueryResult<Vec<Document>> {
        let session = self.session()?;
        let pipeline = session.prepare_pipeline()?;

        debug!(collection = %pipeline.collection, stages = pipeline.stages.len(), "aggregate");

        let documents = session
            .driver
            .aggregate(&pipeline.collection, pipeline.stages)
            .await?;

        self.state = StatementState::Used;
        Ok(documents)
    }

    /// Queues the compiled filter document as an insert in the bulk accumulator.
    pub fn add_batch(&mut self) -> QueryResult<()> {
        let session = self.session_mut()?;
        let query = session.prepare_query()?;

        session.queue(query.collection, BulkOp::Insert(query.filter));
        self.state = StatementState::Batching;

        Ok(())
    }

    /// Queues an upserting replace-one of the first match with the update fields.
    pub fn update_batch(&mut self) -> QueryResult<()> {
        let session = self.session_mut()?;
        let query = session.prepare_query()?;
        let replacement = query.replacement()?;

        session.queue(
            query.collection,
            BulkOp::Replace {
                filter: query.filter,
                replacement,
                upsert: true,
            },
        );
        self.state = StatementState::Batching;

        Ok(())
    }

    /// Executes and drains the bulk accumulator.
    pub async fn insert_bulk(&mut self) -> QueryResult<WriteSummary> {
        self.execute_batch().await
    }

    /// Executes and drains the bulk accumulator.
    pub async fn update_bulk(&mut self) -> QueryResult<WriteSummary> {
        self.execute_batch().await
    }

    async fn execute_batch(&mut self) -> QueryResult<WriteSummary> {
        let session = self.session_mut()?;
        let batch = session
            .batch
            .take()
            .ok_or(QueryError::EmptyBatch)?;

        debug!(
            collection = %batch.collection,
            operations = batch.operations.len(),
            "executing bulk write"
        );

        let result = session
            .driver
            .bulk_write(&batch.collection, batch.operations)
            .await;

        match result {
            Ok(summary) => {
                self.state = StatementState::Used;
                Ok(summary)
            }
            Err(err) => {
                self.refresh_state();
                Err(err)
            }
        }
    }

    /// Releases the driver, template, bindings and accumulator. Idempotent.
    pub fn close(&mut self) {
        self.session = None;
        self.state = StatementState::Closed;
    }
}
