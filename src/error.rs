use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    #[error("invalid experiment accession: {0}")]
    InvalidAccession(String),

    #[error("unknown assay: {0}")]
    UnknownAssay(String),

    #[error("unknown sample sheet format: {0}")]
    UnknownSheet(String),

    #[error("config file not found: {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("ENCODE request failed: {0}")]
    EncodeHttp(String),

    #[error("ENCODE returned status {status}: {message}")]
    EncodeStatus { status: u16, message: String },

    #[error("unexpected ENCODE response: {0}")]
    EncodeResponse(String),

    #[error("download request failed: {0}")]
    DownloadHttp(String),

    #[error("download returned status {status} for {url}")]
    DownloadStatus { status: u16, url: String },

    #[error("failed to write manifest: {0}")]
    Manifest(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl FetchError {
    /// Remote-side failures, as opposed to local configuration or I/O problems.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            FetchError::EncodeHttp(_)
                | FetchError::EncodeStatus { .. }
                | FetchError::EncodeResponse(_)
                | FetchError::DownloadHttp(_)
                | FetchError::DownloadStatus { .. }
        )
    }
}
