//! # objectql-data — Backend-agnostic data access abstractions
//!
//! This crate defines the **pure abstraction layer** for ObjectQL's
//! data access: the driver contract, the universal query
//! representation, and the shared error taxonomy, with **zero backend
//! driver dependencies**.
//!
//! Concrete backends live in separate crates:
//! - `objectql-data-memory` — reference in-memory driver
//! - `objectql-data-remote` — remote ObjectQL federation driver
//!
//! # What's in this crate
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Driver`] | Async trait with the universal data operations and a published capability vector |
//! | [`QueryAst`] | Filter/sort/pagination query consumed by every driver |
//! | [`FilterCondition`] | Canonical filter tree; [`normalize`] converts the legacy spellings |
//! | [`Command`] / [`CommandResult`] | Unified write envelope (`executeCommand`) |
//! | [`Error`] / [`ErrorCode`] | The closed, stable error taxonomy shared workspace-wide |
//! | [`run_pipeline`] | Reference aggregation pipeline for drivers without native aggregation |
//! | [`eval`] | In-memory filter matching, stable sorting, pagination, projection |
//!
//! # Records
//!
//! Records are schema-less at this layer: a [`Record`] is a JSON
//! object, and the metadata registry (in `objectql-core`) decides what
//! shape it must have. Drivers never see Rust structs.

pub mod aggregate;
pub mod driver;
pub mod error;
pub mod eval;
pub mod filter;
pub mod normalize;
pub mod query;
pub mod record;

pub use aggregate::run_pipeline;
pub use driver::{
    CallOptions, Command, CommandResult, CommandType, Driver, DriverCapabilities, QueryResult,
    Transaction,
};
pub use error::{Error, ErrorCode, Result};
pub use filter::{ComparisonOperator, FilterCondition};
pub use normalize::{normalize, to_array_form};
pub use query::{QueryAst, SortOrder, SortSpec};
pub use record::{
    record_from_value, record_id, Record, CREATED_AT_FIELD, CREATED_BY_FIELD, ID_FIELD,
    SPACE_ID_FIELD, SYSTEM_FIELDS, UPDATED_AT_FIELD, UPDATED_BY_FIELD,
};

/// Re-exports of the most commonly used data types.
pub mod prelude {
    pub use crate::{
        CallOptions, ComparisonOperator, Driver, DriverCapabilities, Error, ErrorCode,
        FilterCondition, QueryAst, Record, Result, SortOrder, SortSpec,
    };
}
