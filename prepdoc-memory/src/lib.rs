//! In-memory command driver for prepdoc.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! [`CommandDriver`](prepdoc_core::driver::CommandDriver) trait. It evaluates
//! compiled filters, update documents and aggregation pipelines against
//! collections held in memory, and keeps a journal of every command received,
//! which makes it the driver of choice for tests.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Filter evaluation** - Comparison, membership, `$regex` and logical operators
//! - **Aggregation** - `$limit`, `$match`, `$sort`, `$project`, `$unwind` and `$lookup`
//! - **Command journal** - Every command as received, for assertions
//!
//! # Quick Start
//!
//! ```ignore
//! use prepdoc_core::{driver::CommandDriverBuilder, statement::PreparedStatement};
//! use prepdoc_memory::InMemoryDriver;
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = InMemoryDriver::builder()
//!         .collection("users", [doc! { "name": "alice", "age": 30 }])
//!         .build()
//!         .await?;
//!
//!     let mut statement = PreparedStatement::new(&driver, r#"{"collection":"users","name":"?"}"#)?;
//!     statement.bind_string("name", "alice")?;
//!
//!     let users = statement.find().await?;
//!     assert_eq!(users.len(), 1);
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as prepdoc_memory;

pub mod driver;
pub mod journal;
mod evaluator;
mod pipeline;

pub use driver::{InMemoryDriver, InMemoryDriverBuilder};
pub use journal::DriverCommand;
