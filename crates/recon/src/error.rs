use thiserror::Error;

/// Batch-level failures. Per-shipment problems never surface here; they are
/// encoded in the shipment's `comment`.
#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (bad threshold, empty column list, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// Rule book document could not be parsed.
    #[error("rules parse error: {0}")]
    RulesParse(String),
    /// The rate table has no lanes.
    #[error("rate table is empty")]
    EmptyRateTable,
    /// Shipment and rate tables have no column in common.
    #[error("shipment and rate tables share no columns")]
    NoSharedColumns,
    /// A configured column is required but absent from a table.
    #[error("{table} table: missing column '{column}'")]
    MissingColumn { table: String, column: String },
    /// Rate cards being merged disagree on their column set.
    #[error("rate card '{card}': column mismatch (missing: {missing:?}, extra: {extra:?})")]
    ColumnMismatch {
        card: String,
        missing: Vec<String>,
        extra: Vec<String>,
    },
    /// CSV read/write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// IO error (file read, output write).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
