use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot find any test files")]
    NoTestFilesFound,

    #[error("INVALID_PATTERN: Invalid test file pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Unsupported \"entry\" field type ({0}) in build configuration.")]
    UnsupportedEntryType(String),

    /// Rendered bundler output, surfaced as-is.
    #[error("{0}")]
    BuildFailure(String),

    #[error("BUNDLER_FAILED: {0}")]
    Bundler(String),

    #[error("SERVER_BIND_FAILED: No free port found in {first}..={last}")]
    ServerBindError { first: u16, last: u16 },

    #[error("BROWSER_FAILED: {0}")]
    Browser(String),

    /// Uncaught error raised by the page outside of any test.
    #[error("{0}")]
    PageError(String),

    #[error("RUN_ALREADY_STARTED: A test run executes once")]
    AlreadyStarted,

    #[error("{0} tests failed!")]
    TestsFailed(u32),

    #[error("Failed to close {resource}: {reason}")]
    ResourceClose { resource: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<chromiumoxide::error::CdpError> for Error {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        Error::Browser(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
