//! Error types for the scenario runner
//!
//! A single crate-wide error enum keeps error propagation uniform across the
//! loader, template engine, and execution pipeline. Decoration variants wrap
//! inner errors with YAML-path trails and source excerpts.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the scenario runner
#[derive(Error, Debug)]
pub enum Error {
    // === Load Errors ===
    #[error("failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    #[error("failed to parse YAML: {0}")]
    YamlParse(String),

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    // === Registry Errors ===
    #[error("protocol \"{0}\" is already registered")]
    ProtocolAlreadyRegistered(String),

    #[error("protocol \"{0}\" is not registered")]
    ProtocolNotFound(String),

    #[error("plugin \"{0}\" is not registered")]
    PluginNotFound(String),

    // === Template Errors ===
    #[error("failed to parse template: {message} (offset {pos})")]
    TemplateParse { pos: usize, message: String },

    #[error("failed to execute: {template}: {source}")]
    TemplateExecute {
        template: String,
        #[source]
        source: Box<Error>,
    },

    #[error("\"{0}\" not found")]
    NotFound(String),

    #[error("{0}")]
    Execute(String),

    // === Invocation Errors ===
    #[error("failed to invoke: {0}")]
    Invoke(String),

    #[error("failed to build assertion: {0}")]
    BuildAssertion(String),

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("{0}")]
    Assertions(AssertionError),

    // === Plugin Errors ===
    #[error("{0}")]
    Plugin(String),

    // === Cancellation ===
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    // === Decoration ===
    #[error("{path}: {source}")]
    WithPath {
        path: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{path}: {message}: {source}")]
    WrapPath {
        path: String,
        message: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{source}\n{excerpt}")]
    Annotated {
        excerpt: String,
        #[source]
        source: Box<Error>,
    },

    // === Configuration Errors ===
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Run Outcome ===
    #[error("at least one test failed")]
    TestFailed,

    // === Internal Errors ===
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a file read error
    pub fn file_read(path: impl fmt::Display, error: impl fmt::Display) -> Self {
        Self::FileRead {
            path: path.to_string(),
            error: error.to_string(),
        }
    }

    /// Create an execution error from a message
    pub fn execute(message: impl Into<String>) -> Self {
        Self::Execute(message.into())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::YamlParse(e.to_string())
    }
}

/// Aggregate of assertion failures collected by a single assertion run
#[derive(Debug, Default)]
pub struct AssertionError {
    pub errors: Vec<Error>,
}

impl AssertionError {
    pub fn new(errors: Vec<Error>) -> Self {
        Self { errors }
    }
}

impl fmt::Display for AssertionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.len() == 1 {
            return write!(f, "{}", self.errors[0]);
        }
        write!(f, "{} assertions failed", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n{err}")?;
        }
        Ok(())
    }
}
