//! # pdf-slicer – rendered document → sliced multi-page PDF
//!
//! Exports one long, variable-height rendered document as a PDF whose pages
//! each hold one slice of the content, broken at headings. The stages are:
//!
//! 1. **Measure** – lay the live document out and read child offsets ([`document`])
//! 2. **Select** – choose slice boundaries between a min and max height ([`boundary`])
//! 3. **Isolate** – mark the tree so a clone shows one slice at a time ([`isolation`])
//! 4. **Capture** – rasterize each isolated clone to a bitmap ([`raster`])
//! 5. **Compose** – embed each bitmap as a PDF page via printpdf ([`compose`])
//! 6. **Persist** – hand the finished file to a [`persist::Persister`]
//!
//! [`export::Exporter`] drives the whole run.

pub mod boundary;
pub mod compose;
pub mod config;
pub mod document;
pub mod dom;
pub mod error;
pub mod export;
pub mod fonts;
pub mod isolation;
pub mod layout;
pub mod persist;
pub mod raster;
pub mod samples;
pub mod style;

// Re-exports for convenience
pub use boundary::{select_slices, BoundarySelector, Slice};
pub use config::ExportConfig;
pub use document::LiveDocument;
pub use error::{CaptureError, ExportError, IsolationError};
pub use export::{ExportOptions, ExportOutcome, ExportReport, Exporter};
