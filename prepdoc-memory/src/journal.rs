//! The record of commands an [`InMemoryDriver`](crate::InMemoryDriver) received.

use bson::Document;

use prepdoc_core::driver::BulkOp;

/// One command, exactly as the driver received it.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCommand {
    Find {
        collection: String,
        filter: Document,
        projection: Option<Document>,
    },
    Insert {
        collection: String,
        document: Document,
    },
    Update {
        collection: String,
        filter: Document,
        update: Document,
    },
    Remove {
        collection: String,
        filter: Document,
    },
    Distinct {
        collection: String,
        field: String,
        filter: Document,
    },
    Aggregate {
        collection: String,
        pipeline: Vec<Document>,
    },
    BulkWrite {
        collection: String,
        operations: Vec<BulkOp>,
    },
}

impl DriverCommand {
    pub fn collection(&self) -> &str {
        match self {
            DriverCommand::Find { collection, .. }
            | DriverCommand::Insert { collection, .. }
            | DriverCommand::Update { collection, .. }
            | DriverCommand::Remove { collection, .. }
            | DriverCommand::Distinct { collection, .. }
            | DriverCommand::Aggregate { collection, .. }
            | DriverCommand::BulkWrite { collection, .. } => collection,
        }
    }

    /// The command name, e.g. `"find"`.
    pub fn name(&self) -> &'static str {
        match self {
            DriverCommand::Find { .. } => "find",
            DriverCommand::Insert { .. } => "insert",
            DriverCommand::Update { .. } => "update",
            DriverCommand::Remove { .. } => "remove",
            DriverCommand::Distinct { .. } => "distinct",
            DriverCommand::Aggregate { .. } => "aggregate",
            DriverCommand::BulkWrite { .. } => "bulk_write",
        }
    }
}
