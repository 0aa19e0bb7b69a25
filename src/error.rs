use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "download engine not found; looked for a bundled binary, `yt-dlp` on PATH, and `python -m yt_dlp`"
    )]
    EngineMissing,

    #[error("external tool failed: {tool} (code={code:?}) {stderr}")]
    ExternalToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("URL is empty")]
    EmptyUrl,

    #[error("download queue is empty")]
    EmptyQueue,

    #[error("a download run is already active")]
    DownloadActive,

    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("install failed: {0}")]
    InstallFailed(String),

    #[error("update failed: {0}")]
    UpdateFailed(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
