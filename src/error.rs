//! Error types for the invoice service.

use thiserror::Error;

/// Start-up errors. Anything raised while serving a request is mapped to a
/// response by the route layer instead.
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid or unparseable configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invoice store error.
    #[error("database error: {0}")]
    Db(#[from] DbError),

    /// I/O error (binding the listener, running the server).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while talking to the document-analysis service.
///
/// These never leave the extraction adapter: they are rendered into the
/// diagnostic message of a failed extraction.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// Endpoint or key missing from the configuration.
    #[error("Document analysis service is not configured")]
    NotConfigured,

    /// Connection, TLS or timeout failure.
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service rejected the request (bad key, quota, unsupported file).
    #[error("Analysis request failed ({status}): {body}")]
    Service { status: u16, body: String },

    /// Accepted response without a result location to poll.
    #[error("No Operation-Location in response")]
    MissingOperationLocation,

    /// The service finished with status `failed`.
    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    /// The result never reached a terminal status.
    #[error("Analysis timed out after {0} polls")]
    Timeout(u32),

    /// A terminal response that does not have the expected structure.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Invoice store errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A writer panicked while holding the connection.
    #[error("database lock poisoned")]
    Poisoned,

    /// A stored column could not be decoded back into its type.
    #[error("corrupt column {column}: {value}")]
    Corrupt { column: &'static str, value: String },

    #[error("could not create database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons an upload is refused or cannot be completed.
#[derive(Error, Debug)]
pub enum IngestError {
    /// No `file` part, or a part with an empty file name.
    #[error("No file selected")]
    MissingFile,

    #[error("Invalid file type")]
    DisallowedExtension(String),

    #[error("File too large (max {max_bytes} bytes)")]
    TooLarge { max_bytes: usize },

    /// Persisting the outcome failed; nothing can be compensated.
    #[error(transparent)]
    Store(#[from] DbError),
}

impl IngestError {
    /// True for errors caused by the request itself (HTTP 400).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, IngestError::Store(_))
    }
}

/// Errors from the BI embed-token exchange.
#[derive(Error, Debug)]
pub enum PowerBiError {
    #[error("Power BI is not configured")]
    NotConfigured,

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to get token: {0}")]
    Token(String),

    #[error("Failed to get report: {0}")]
    Report(String),

    #[error("Failed to generate embed token: {0}")]
    EmbedToken(String),
}

pub type AppResult<T> = Result<T, AppError>;
pub type DbResult<T> = Result<T, DbError>;
