use std::fmt;

/// Errors that abort a migration run
#[derive(Debug)]
pub enum MigrationError {
    /// The old state has too few resources to be a real deployment
    ImplausibleSource { found: usize, minimum: usize },

    /// Pushing a state document back to its backend failed
    PushFailed { dir: String, message: String },

    /// A rule pattern is not a valid regular expression
    InvalidRule { pattern: String, message: String },
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationError::ImplausibleSource { found, minimum } => {
                write!(
                    f,
                    "Old state only has {} resources (at least {} expected); \
                     the old state was probably not pulled from the right backend",
                    found, minimum
                )
            }
            MigrationError::PushFailed { dir, message } => {
                write!(f, "Failed to push state in {}: {}", dir, message)
            }
            MigrationError::InvalidRule { pattern, message } => {
                write!(f, "Invalid rule pattern '{}': {}", pattern, message)
            }
        }
    }
}

impl std::error::Error for MigrationError {}
