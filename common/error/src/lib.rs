//! Shared error classification for the ingestion pipeline.

mod class;
mod pipeline_error;

pub use class::ClassMeta;
pub use class::ErrorClass;
pub use pipeline_error::PipelineError;
pub use pipeline_error::Result;
pub use pipeline_error::wrap;
