//! Error types for the slicing exporter.
//!
//! Failures are split by how far they reach: an [`IsolationError`] costs one
//! slice, a [`CaptureError`] stops the remaining slices, and only
//! [`ExportError::Configuration`] is ever returned to the caller of
//! [`Exporter::export`](crate::export::Exporter::export).

use std::io;
use thiserror::Error;

/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, ExportError>;

/// The live tree and its clone disagree about slice markers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IsolationError {
    /// No element carrying the expected slice index exists in the clone.
    #[error("missing slice start marker {index} in cloned tree")]
    MissingMarker { index: usize },
}

/// A single slice could not be turned into a bitmap.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Marking the clone failed; only this slice is lost.
    #[error("structural error: {0}")]
    Structural(#[from] IsolationError),

    /// The subtree references a resource the rasterizer may not read.
    #[error("tainted resource: {0}")]
    Tainted(String),

    /// The bitmap would exceed the rasterizer's output ceiling.
    #[error("capture of {height}px exceeds the {limit}px raster limit")]
    TooLarge { height: u32, limit: u32 },

    /// Nothing visible was left to paint.
    #[error("capture produced an empty bitmap")]
    Empty,

    /// The bitmap could not be encoded for embedding.
    #[error("bitmap encoding failed: {0}")]
    Encode(String),

    /// The cloned subtree could not be laid out.
    #[error("layout error: {0}")]
    Layout(String),
}

impl CaptureError {
    /// Whether the export should move on to the next slice after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureError::Structural(_))
    }
}

/// Errors surfaced by the export pipeline.
#[derive(Error, Debug)]
pub enum ExportError {
    /// An unsupported option or malformed configuration value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O error when reading input or persisting output.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The PDF could not be assembled.
    #[error("PDF composition error: {0}")]
    Compose(String),

    /// The live document could not be measured.
    #[error("layout error: {0}")]
    Layout(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_structural_capture_errors_are_recoverable() {
        let structural = CaptureError::from(IsolationError::MissingMarker { index: 2 });
        assert!(structural.is_recoverable());
        assert!(!CaptureError::Tainted("http://x/y.png".into()).is_recoverable());
        assert!(!CaptureError::Empty.is_recoverable());
    }

    #[test]
    fn messages_name_the_marker() {
        let err = IsolationError::MissingMarker { index: 4 };
        assert_eq!(err.to_string(), "missing slice start marker 4 in cloned tree");
    }
}
