use thiserror::Error;

#[derive(Error, Debug)]
pub enum NpactError {
    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Unmapped {kind} value: '{value}'")]
    UnmappedCategory { kind: &'static str, value: String },

    #[error("No eligible values for {statistic} in group ({field}, {year})")]
    MissingData {
        statistic: String,
        field: String,
        year: i32,
    },

    #[error("Undefined ratio: {0}")]
    UndefinedRatio(String),

    #[error("Configuration: {0}")]
    Configuration(String),

    #[error("Validation: {0}")]
    Validation(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NpactError>;
