//! MongoDB command driver for prepdoc.
//!
//! This crate provides a MongoDB-based implementation of the
//! [`CommandDriver`](prepdoc_core::driver::CommandDriver) trait: compiled
//! filters, update documents and pipelines are handed to the server as-is.
//!
//! To use this driver, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! prepdoc = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Connection
//!
//! The driver is created from a MongoDB connection string and a database name
//! through [`MongoDbDriverBuilder`].
//!
//! # Example
//!
//! ```ignore
//! use prepdoc::{driver::CommandDriverBuilder, mongodb::MongoDbDriver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = MongoDbDriver::builder("mongodb://localhost:27017", "my_database")
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as prepdoc_mongodb;

pub mod driver;

pub use driver::{MongoDbDriver, MongoDbDriverBuilder};
