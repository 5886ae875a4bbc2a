// src/error.rs

//! Crate-wide error type

use thiserror::Error;

/// Errors raised by the solvability checker
///
/// Most of these never escape a check: solver and data-source failures are
/// folded into the report as strings. They do surface from the building
/// blocks (client, renderer, pool) so callers can decide.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Download failed: {0}")]
    DownloadError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Initialization failed: {0}")]
    InitError(String),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Invalid requirement '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("Solver failure: {0}")]
    SolverError(String),

    #[error("Failed to render recipe: {0}")]
    RenderError(String),

    #[error("Cannot apply pin: {0}")]
    PinError(String),

    #[error("Worker failed: {0}")]
    WorkerError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
