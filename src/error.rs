//! Error kinds shared by the manifest, pipeline and segmentation modules.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Manifest or image retrieval failed.
    #[error("fetch failed for {url}: {reason}")]
    SourceFetch { url: String, reason: String },

    /// The classifier could not produce a verdict for an image.
    #[error("classification failed: {0}")]
    Classification(String),

    /// Caller-supplied page bounds are outside `[1, total_pages]` or reversed.
    #[error("invalid page range {start}..={end} (manifest has {total} pages)")]
    InvalidRange { start: usize, end: usize, total: usize },

    /// A cover lies outside the analyzed page range.
    #[error("cover page {index} is outside the analyzed range {start}..={end}")]
    CoverOutOfRange { index: usize, start: usize, end: usize },

    /// A page has no derivable stable identifier.
    #[error("page {index} has no resolvable identifier")]
    UnresolvableIdentifier { index: usize },

    #[error("manifest contains no pages")]
    EmptySource,

    #[error("malformed manifest: {0}")]
    Manifest(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        Error::SourceFetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}
