/// Failures surfaced by the optimization engine.
/// Validation errors are the caller's fault and are raised before any simulation runs;
/// numerical errors mean valid inputs hit an unhandled arithmetic edge.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptimizerError {
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("numerical failure: {0}")]
    Numerical(String),
}

impl OptimizerError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        OptimizerError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, OptimizerError::Validation { .. })
    }
}

pub type OptimizerResult<T> = Result<T, OptimizerError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolverError {
    #[error("root not bracketed: f({a}) = {fa}, f({b}) = {fb}")]
    InvalidBracket { a: f64, b: f64, fa: f64, fb: f64 },

    #[error("no convergence after {iterations} iterations (residual {residual})")]
    ConvergenceFailed { iterations: u32, residual: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("no matching row".into()),
            rusqlite::Error::SqliteFailure(err, message)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(message.unwrap_or_else(|| err.to_string()))
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("config error: {key}: {message}")]
    Invalid { key: &'static str, message: String },
}
