use std::io;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Error taxonomy shared by the resolver, the fetch workers and the viewer
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    /// Path is missing, unreadable, or not a supported kind of file.
    #[error("invalid source {path}: {detail}")]
    InvalidSource { path: PathBuf, detail: String },

    #[error("corrupt archive {path}: {detail}")]
    CorruptArchive { path: PathBuf, detail: String },

    /// The archive opened fine but holds no supported images.
    #[error("no images in {path}")]
    EmptyDocument { path: PathBuf },

    #[error("source unavailable {path}: {detail}")]
    SourceUnavailable { path: PathBuf, detail: String },

    #[error("entry missing: {name}")]
    EntryMissing { name: String },

    #[error("failed to read page {name}: {detail}")]
    DecodeFailed { name: String, detail: String },

    /// A result for a document that has since been replaced. Never shown to the user.
    #[error("stale generation {got} (active {active})")]
    StaleGeneration { got: u64, active: u64 },
}

impl ViewerError {
    pub fn invalid_source(path: impl Into<PathBuf>, detail: impl ToString) -> Self {
        Self::InvalidSource { path: path.into(), detail: detail.to_string() }
    }

    pub fn decode_failed(name: impl Into<String>, detail: impl ToString) -> Self {
        Self::DecodeFailed { name: name.into(), detail: detail.to_string() }
    }

    /// Map an I/O failure while (re)opening a document for a page read.
    pub fn unavailable(path: impl Into<PathBuf>, err: &io::Error) -> Self {
        Self::SourceUnavailable { path: path.into(), detail: err.to_string() }
    }

    /// True for conditions the viewer shows as an empty document rather than an error.
    pub fn is_empty_document(&self) -> bool {
        matches!(self, Self::EmptyDocument { .. })
    }
}

pub type Result<T> = std::result::Result<T, ViewerError>;
