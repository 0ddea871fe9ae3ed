//! JSON-templated prepared statements for document databases.
//!
//! This crate is the primary entry point of prepdoc. It re-exports the
//! statement, template and driver types from the sub-crates and gives
//! convenient access to the available drivers.
//!
//! A statement is prepared from a JSON template whose `"?"` leaves are
//! placeholders, bound by name with typed values, and executed through a
//! [`CommandDriver`](driver::CommandDriver). The template decides the command:
//!
//! - `$set` / `$unset` (top level or under `projection`) make an update
//! - `$lookup`, `$unwind`, `$limit`, `$match`, `$sort`, `$group` or `$project`
//!   make an aggregation pipeline
//! - anything else is a filter, used by find, insert, remove and distinct
//!
//! # Features
//!
//! - **Typed bindings** - Int, long, string, bool and date values bound by name
//! - **Argument checking** - Placeholder count verified before every execution
//! - **Aggregation assembly** - Canonical stage order with lookup / unwind layout control
//! - **Bulk accumulation** - Queued inserts and upserting replaces, drained on execution
//! - **Multiple drivers** - In-memory and MongoDB, behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use prepdoc::{prelude::*, memory::InMemoryDriver};
//!
//! #[tokio::main]
//! async fn main() -> QueryResult<()> {
//!     let driver = InMemoryDriver::builder().build().await?;
//!
//!     let mut insert = PreparedStatement::new(&driver, r#"{"collection":"users","name":"?","age":"?"}"#)?;
//!     insert.bind_string("name", "alice")?.bind_int("age", 30)?;
//!     insert.insert().await?;
//!
//!     let mut find = PreparedStatement::new(&driver, r#"{"collection":"users","age":"?"}"#)?;
//!     find.bind_int("age", 30)?;
//!     let users = find.find().await?;
//!
//!     println!("Found users: {:?}", users);
//!
//!     insert.close();
//!     find.close();
//!     Ok(())
//! }
//! ```
//!
//! # Aggregation
//!
//! ```ignore
//! let mut statement = PreparedStatement::new(
//!     &driver,
//!     r#"{"collection":"users",
//!         "$lookup":{"from":"roles","localField":"role","foreignField":"name","as":"roles"},
//!         "$unwind":"$roles",
//!         "$match":{"age":"?"},
//!         "$limit":"?"}"#,
//! )?;
//! statement.bind_int("age", 30)?.bind_int("$limit", 10)?;
//!
//! // [$limit, $lookup, $unwind, $match]
//! let rows = statement.aggregate().await?;
//! ```
//!
//! # Drivers
//!
//! - [`memory`] - In-memory driver with a command journal, for development and testing
//! - [`mongodb`] - MongoDB driver (requires `mongodb` feature)

pub mod prelude;

pub use prepdoc_core::{compile, driver, error, fields, matcher, options, statement, template, value};

// Re-export BSON types for convenience
pub use bson;

/// In-memory driver implementations.
pub mod memory {
    pub use prepdoc_memory::{DriverCommand, InMemoryDriver, InMemoryDriverBuilder};
}

/// MongoDB driver implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use prepdoc_mongodb::{MongoDbDriver, MongoDbDriverBuilder};
}
