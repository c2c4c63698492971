use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid download URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP {status} at {url}: {body}")]
    Http { status: u16, url: String, body: String },

    #[error("network error while fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("too many redirects (more than {limit}) starting at {url}")]
    TooManyRedirects { url: String, limit: usize },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("download of {url} timed out")]
    Timeout { url: String },

    #[error("download cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to start 7-Zip ({program}): {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("7-Zip: {message}")]
    Tool { code: Option<i32>, message: String },

    #[error("extraction of {archive} timed out")]
    Timeout { archive: PathBuf },

    #[error("extraction cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("failed to start patch tool {tool}: {source}")]
    Spawn {
        tool: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Toolkit Error Code: {code}")]
    ToolExit { code: i64 },

    #[error("patch tool was terminated without an exit code")]
    Terminated,

    #[error("patch tool I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("patch tool did not finish in time")]
    Timeout,

    #[error("patching cancelled")]
    Cancelled,
}

/// Every way an install run can fail after it started.
/// Declining a prompt is not here: that is `InstallOutcome::Cancelled`.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("No patches found!")]
    NoPatchesFound,

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("Patcher finished, but {} was not found.", .expected.display())]
    Finalization { expected: PathBuf },

    #[error("selected image does not match the expected checksum (got {actual})")]
    ImageMismatch { actual: String },

    #[error("no archive URL configured for version {0}")]
    UnknownVersion(String),

    #[error("emulator is not installed at {}", .0.display())]
    EmulatorNotInstalled(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl InstallError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the run stopped because the user or a signal asked it to
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Download(DownloadError::Cancelled)
                | Self::Extract(ExtractError::Cancelled)
                | Self::Patch(PatchError::Cancelled)
        )
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("emulator not found at {0}")]
    NotFound(PathBuf),

    #[error("failed to start emulator: {0}")]
    Spawn(#[source] io::Error),
}
