//! Typed failures for the trend pipeline.
//!
//! Per-region problems (a failed fetch, a misaligned borough series) are
//! recoverable and only skip the affected region. [`PipelineError`] is the
//! fatal class: it aborts the run before any artifact is replaced.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal run errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The region catalog could not be read or parsed.
    #[error("failed to load region catalog {path}: {message}")]
    Catalog { path: PathBuf, message: String },

    /// An artifact could not be written into the output directory.
    #[error("failed to write artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An artifact could not be serialized.
    #[error("failed to serialize artifact {name}: {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// Uploading a written artifact failed.
    #[error("failed to publish artifact {key}: {message}")]
    Publish { key: String, message: String },
}

/// NYC borough series could not be merged.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AlignmentError {
    /// A secondary borough series differs in length from the primary borough.
    #[error("borough {fips} has {found} observations, expected {expected}")]
    LengthMismatch {
        fips: String,
        expected: usize,
        found: usize,
    },
}
