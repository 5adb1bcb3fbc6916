use thiserror::Error;

/// Errors raised by the reshaping, extraction and fitting layers.
///
/// All variants are raised synchronously at the call that detects the
/// problem; nothing is retried internally.
#[derive(Debug, Error)]
pub enum EdaError {
    #[error("unsupported index depth: {nlevels} level(s)")]
    UnsupportedShape { nlevels: usize },

    #[error(
        "pivoting a table with fewer than 2 index levels requires both \
         x_values_column and y_values_column"
    )]
    MissingAxisColumns,

    #[error("column not found: '{0}'")]
    ColumnNotFound(String),

    #[error("pivot produced no rows")]
    EmptyPivot,

    #[error("dataset {dataset} has {found} samples, expected {expected}")]
    RaggedDataset {
        dataset: String,
        expected: usize,
        found: usize,
    },

    #[error("table index has {nlevels} levels, at most 2 allowed (normalize first)")]
    TooManyLevels { nlevels: usize },

    #[error("not a single dataset: {0}")]
    NotADataset(String),

    #[error("{what}: expected {expected}, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("no fit parameters for dataset {0}")]
    NoFitForDataset(String),

    #[error("fit failed: {0}")]
    FitFailed(String),

    #[error("task {index} exceeded the {timeout_secs:.1}s timeout")]
    TaskTimedOut { index: usize, timeout_secs: f64 },

    #[error("task {index} failed: {message}")]
    TaskFailed { index: usize, message: String },
}

pub type Result<T> = std::result::Result<T, EdaError>;
