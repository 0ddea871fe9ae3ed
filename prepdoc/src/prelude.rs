//! Convenient re-exports of commonly used types from prepdoc.
//!
//! ```ignore
//! use prepdoc::prelude::*;
//! ```

pub use prepdoc_core::{
    compile::{CompiledCommand, CompiledPipeline, CompiledQuery, Modification, compile},
    driver::{BulkOp, CommandDriver, CommandDriverBuilder, WriteSummary},
    error::{QueryError, QueryResult},
    options::{LookupMode, PlaceholderPolicy, StatementOptions, StatementOptionsBuilder},
    statement::{PreparedStatement, StatementState},
    template::{Template, TemplateKind},
    value::{Bindings, TypedValue},
};
