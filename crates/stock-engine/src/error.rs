//! Engine error types

use stock_data::DataError;
use stock_utils::ConfigError;
use thiserror::Error;

use crate::task::TaskState;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Run-fatal errors. Per-task failures are reported as results instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("No model endpoints configured")]
    NoEndpoints,

    #[error("Illegal task transition for {symbol}: {from} -> {to}")]
    InvalidTransition {
        symbol: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("Data setup failed: {0}")]
    Data(#[from] DataError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
