pub mod error;
pub mod generate_content;
pub mod internal;
pub mod types;
