//! Module for the error management
use thiserror::Error;

/// A fatal error that aborts a pipeline run.
///
/// Per-row validation failures are not errors in this sense; they are
/// [crate::record::Rejection]s, diverted to the dead-letter table while the
/// row loop keeps going. Everything below unwinds to the orchestrator, which
/// rolls back the open transaction and cleans up the extraction directory
/// before returning.
#[derive(Error, Debug)]
pub enum Error {
    /// The feed URL or credentials are a placeholder or unusable; detected
    /// before any I/O is attempted
    #[error("invalid feed configuration: {0}")]
    Configuration(String),
    /// The feed archive could not be fetched from its origin
    #[error("could not download feed")]
    Download(#[source] reqwest::Error),
    /// The feed archive is corrupt or could not be unpacked
    #[error("could not extract feed archive")]
    Extract(#[from] zip::result::ZipError),
    /// A file the registry marks as required is absent from the feed
    #[error("required feed file {0} is missing")]
    MissingRequiredFile(String),
    /// DDL against the store failed while materializing the schema
    #[error("could not materialize schema: {0}")]
    Schema(String),
    /// A batch insert failed; the whole table load is abandoned
    #[error("bulk load into '{table}' failed: {message}")]
    LoadBatch {
        /// Target table whose load failed
        table: String,
        /// Store-reported failure
        message: String,
    },
    /// Adding a foreign key failed for a reason other than a missing table
    #[error("could not add foreign key '{0}'")]
    Integrity(String),
    /// Any other failure reported by the database handle
    #[error("database error: {0}")]
    Database(String),
    /// Generic Input/Output error while reading a file
    #[error("impossible to read file")]
    IO(#[from] std::io::Error),
    /// Impossible to read a CSV file
    #[error("impossible to read csv file '{file_name}'")]
    CsvError {
        /// File name that could not be parsed as CSV
        file_name: String,
        /// The initial error by the csv library
        #[source]
        source: csv::Error,
    },
}
