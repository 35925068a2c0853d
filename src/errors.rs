//! Centralised error type for the analysis run.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Cannot read credentials file {0}: {1}")]
    Credentials(PathBuf, #[source] std::io::Error),

    #[error("Malformed credentials file {0}: {1}")]
    CredentialsFormat(PathBuf, #[source] serde_json::Error),

    #[error("Could not connect to {0}: {1}")]
    Connect(String, #[source] sqlx::Error),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("CSV error in {0}: {1}")]
    Csv(PathBuf, #[source] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid relationship declaration: {0}")]
    InvalidSchema(String),

    #[error("Column {column} not found in table {table}")]
    MissingColumn { table: String, column: String },

    #[error("Cannot parse {value:?} as a timestamp ({table}.{column}, row {row})")]
    Timestamp {
        table: String,
        column: String,
        row: usize,
        value: String,
    },

    #[error("Declared table {0} was not loaded from the dataset")]
    MissingTable(String),

    #[error("Query {0} failed: {1}")]
    Query(u8, #[source] sqlx::Error),

    #[error("Query {0} returned no rows")]
    EmptyResult(u8),

    #[error("Unsupported column type {type_name} for column {column}")]
    UnsupportedType { column: String, type_name: String },

    #[error("Query {query}: expected {expected} in column {index}")]
    Decode {
        query: u8,
        index: usize,
        expected: &'static str,
    },
}
