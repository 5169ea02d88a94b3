use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while locating, loading, caching or configuring the analysis.
///
/// Every variant that comes from a file names that file, so a failed run
/// points straight at the offending log or cache.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("malformed run file name {path}: expected at least {expected} `_`-separated fields, found {found}")]
    MalformedFileName {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("field `{field}` of {path} is all digits but does not fit in 64 bits: {token}")]
    ParamOverflow {
        path: PathBuf,
        field: String,
        token: String,
    },

    #[error("schema mismatch in {path}: {reason}")]
    Schema { path: PathBuf, reason: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode cache {path}: {reason}")]
    CacheDecode { path: PathBuf, reason: String },

    #[error("failed to encode cache {path}: {reason}")]
    CacheEncode { path: PathBuf, reason: String },

    #[error("cache {path} is corrupt: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    #[error("configuration error in {path}: {reason}")]
    Config { path: PathBuf, reason: String },
}

impl AnalysisError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn schema(path: &Path, reason: impl Into<String>) -> Self {
        Self::Schema {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn config(path: &Path, reason: impl Into<String>) -> Self {
        Self::Config {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
