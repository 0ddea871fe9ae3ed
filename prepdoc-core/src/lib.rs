//! JSON-templated prepared statements for document databases.
//!
//! This crate is the core of the prepdoc project and provides:
//!
//! - **Templates** ([`template`]) - Parsing JSON query templates with `"?"` placeholders
//! - **Bindings** ([`value`]) - Typed values bound to placeholders by name
//! - **Argument matching** ([`matcher`]) - Placeholder counting against the bindings
//! - **Compilation** ([`compile`]) - Filters, projections, update documents and aggregation pipelines
//! - **Driver abstraction** ([`driver`]) - Traits for executing compiled commands
//! - **Prepared statements** ([`statement`]) - The stateful bind / execute / close surface
//! - **Configuration** ([`options`]) - Placeholder strictness and lookup layout
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use prepdoc_core::statement::PreparedStatement;
//!
//! let mut statement = PreparedStatement::new(
//!     &driver,
//!     r#"{"collection":"u","id":"?","projection":{"$set":{"role":"?"}}}"#,
//! )?;
//! statement.bind_int("id", 7)?.bind_string("role", "admin")?;
//!
//! // update({"id": 7}, {"$set": {"role": "admin"}})
//! statement.update().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as prepdoc_core;

pub mod compile;
pub mod driver;
pub mod error;
pub mod fields;
pub mod matcher;
pub mod options;
pub mod statement;
pub mod template;
pub mod value;
