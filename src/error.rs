// 🚨 Error taxonomy - what can stop a run
//
// Data-quality anomalies never show up here: they are absorbed by the
// normalizer and the engine and surface as absent values or notes.

use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ReconError {
    /// Input file missing, unreadable, or in an unexpected format
    Input { path: PathBuf, message: String },

    /// Output artifact could not be written
    Write { path: PathBuf, message: String },

    /// TOML parse or validation failure
    Config(String),
}

impl ReconError {
    pub fn input(path: &Path, message: impl Into<String>) -> Self {
        ReconError::Input {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn write(path: &Path, message: impl Into<String>) -> Self {
        ReconError::Write {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self, ReconError::Input { .. })
    }

    pub fn is_write(&self) -> bool {
        matches!(self, ReconError::Write { .. })
    }
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconError::Input { path, message } => {
                write!(f, "cannot read input {}: {}", path.display(), message)
            }
            ReconError::Write { path, message } => {
                write!(f, "cannot write {}: {}", path.display(), message)
            }
            ReconError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {}
