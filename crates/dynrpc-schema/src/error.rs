use dynrpc_common::RpcError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A problem found in one IDL file. Recorded per file; never aborts a load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaParseError {
    pub file: PathBuf,
    /// 1-based; `0` when the error is not tied to a position (e.g. I/O).
    pub line: usize,
    pub column: usize,
    pub reason: String,
}

impl SchemaParseError {
    pub fn at(file: impl Into<PathBuf>, line: usize, column: usize, reason: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            reason: reason.into(),
        }
    }

    pub fn whole_file(file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::at(file, 0, 0, reason)
    }
}

impl fmt::Display for SchemaParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}: {}", self.file.display(), self.reason)
        } else {
            write!(f, "{}:{}:{}: {}", self.file.display(), self.line, self.column, self.reason)
        }
    }
}

impl std::error::Error for SchemaParseError {}

/// Failures that prevent a load from producing any index at all.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("IDL root '{}' is not a readable directory: {source}", path.display())]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IDL root '{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),
}

impl From<SchemaError> for RpcError {
    fn from(err: SchemaError) -> Self {
        RpcError::Schema(err.to_string())
    }
}
