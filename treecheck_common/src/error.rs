use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeCheckError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The root of a walk is missing or unreadable. Aborts the whole run.
    #[error("Cannot walk {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Comparison error: {0}")]
    Comparison(String),

    #[error("Archive error: {0}")]
    Archive(String),
}

pub type Result<T> = std::result::Result<T, TreeCheckError>;

/// A file could not be opened or failed mid-stream while hashing.
#[derive(Error, Debug)]
#[error("Failed to read {}: {source}", path.display())]
pub struct ReadError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// A textual exclusion rule that could not be compiled. The rule is dropped.
#[derive(Error, Debug)]
pub enum RuleCompileError {
    #[error("Rule '{0}' is empty after normalization")]
    Empty(String),

    #[error("Rule '{0}' contains a '..' segment")]
    ParentTraversal(String),

    #[error("Rule '{rule}' could not be compiled: {source}")]
    Regex {
        rule: String,
        #[source]
        source: regex::Error,
    },
}
