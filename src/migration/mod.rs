//! The migration engine: rules, prefix handling, post-move passes and the
//! orchestrator that sequences them

pub mod error;
pub mod imports;
pub mod normalizer;
pub mod orchestrator;
pub mod prefix;
pub mod rules;
pub mod scrubber;

pub use orchestrator::{MigrationOptions, MigrationReport, Migrator};
