//! Core domain model and contracts for pollcheck.
//!
//! Pure code only: the data model, the schema validator for model output, the
//! span resolver, and the traits the engine plugs external services into.

pub mod protocol;
pub mod schema;
pub mod spans;
pub mod text;
pub mod types;

pub use protocol::*;
pub use schema::{
    analysis_output_schema, validate_analysis_output, SchemaViolation, ANALYSIS_SCHEMA_NAME,
};
pub use spans::{resolve_analysis, resolve_spans, DropReason, DroppedFinding, SpanResolution};
pub use types::*;
