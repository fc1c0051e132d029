use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid filename pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Directory does not exist: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("Path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("No read permissions for directory: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("No PDF files found in {}", .0.display())]
    NoPdfFiles(PathBuf),

    #[error("Scan cancelled")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Errors that end a scan in the `Failed` state because of the scan root
    /// itself rather than an individual file.
    pub fn is_root_failure(&self) -> bool {
        matches!(
            self,
            Error::RootNotFound(_)
                | Error::NotADirectory(_)
                | Error::PermissionDenied(_)
                | Error::NoPdfFiles(_)
        )
    }
}
