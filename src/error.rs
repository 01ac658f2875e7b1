//! Error type shared by every stage of a run.
//!
//! All variants are terminal: a run that hits one stops, and the caller has
//! to start the whole pipeline again.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The input stream could not be opened or yielded a malformed frame.
    #[error("input {path}: {reason}")]
    Input { path: PathBuf, reason: String },

    /// The output writer could not be opened or written.
    #[error("output writer {path}: {reason}")]
    OutputWriter { path: PathBuf, reason: String },

    /// The detection model failed on a frame.
    #[error("detection failed on frame {frame}: {source}")]
    Detection {
        frame: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The detection model could not be loaded.
    #[error("model {path}: {reason}")]
    Model { path: PathBuf, reason: String },

    #[error("config: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl Error {
    pub(crate) fn input(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Input {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn output(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::OutputWriter {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn model(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Model {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
