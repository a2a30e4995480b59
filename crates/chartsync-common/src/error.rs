//! Error types shared across chartsync crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Unknown chart type: {0}")]
    UnknownChartType(String),

    #[error("Invalid stage key: {0}")]
    InvalidStage(String),

    #[error("Unknown item kind: {0}")]
    UnknownItemKind(String),
}
