pub mod artifact;
pub mod retention;
pub mod token;

pub use artifact::{artifact_file_name, parse_artifact_timestamp, ARTIFACT_EXTENSION};
pub use retention::RetentionPolicy;
pub use token::Token;
