pub mod error;
pub mod generate_content;
pub mod schema;
pub mod tokens;
pub mod transcoder;
pub mod usage;

pub use error::TransformError;
pub use schema::SchemaSanitizer;
pub use transcoder::{Emitted, SseTranscoder};
pub use usage::{UsageAccumulator, UsageObservation, UsageSnapshot};
