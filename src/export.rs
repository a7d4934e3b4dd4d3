//! Export orchestration – measures the document, picks slices, captures them
//! one at a time through the rasterizer and assembles the PDF.
//!
//! Per-slice failures never reach the caller: a structural failure drops the
//! slice, any other capture failure stops the loop and keeps the pages built
//! so far. Only configuration problems (and a document that cannot be
//! measured) come back as `Err`.

use std::iter::FusedIterator;
use std::sync::{Arc, Mutex};

use crate::boundary::{select_slices, BoundarySelector, Slice};
use crate::compose::PageComposer;
use crate::config::ExportConfig;
use crate::document::LiveDocument;
use crate::dom::ElementNode;
use crate::error::{CaptureError, ExportError, Result};
use crate::fonts::FontManager;
use crate::isolation::{isolate, mark_slice_indices};
use crate::persist::{sanitize_file_name_body, Persister};
use crate::raster::{Bitmap, LayoutRasterizer, RasterRequest, Rasterizer};
use crate::style::Color;

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// File name without the `.pdf` extension; sanitized before use.
    pub file_name_body: String,
    /// Keep text selectable. Not supported.
    pub preserve_text: bool,
}

impl ExportOptions {
    pub fn new(file_name_body: impl Into<String>) -> Self {
        Self {
            file_name_body: file_name_body.into(),
            preserve_text: false,
        }
    }
}

/// Summary of a saved export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub file_name: String,
    /// Where the persister put the file.
    pub location: String,
    pub page_count: usize,
    pub slice_count: usize,
    /// Indices of slices that produced no page.
    pub failed_slices: Vec<usize>,
    /// Whether a capture failure ended the export before the last slice.
    pub stopped_early: bool,
}

/// How an export call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Another export on the same exporter is still running.
    Busy,
    /// The document has no element to export.
    Empty,
    /// Every capture failed; nothing was written.
    NoPages {
        slice_count: usize,
        failed_slices: Vec<usize>,
    },
    /// The PDF was built but could not be stored.
    PersistFailed { file_name: String, reason: String },
    Saved(ExportReport),
}

/// Called before each capture to give other work a chance to run.
pub trait IdleScheduler {
    fn yield_idle(&self);
}

/// Yields the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadYield;

impl IdleScheduler for ThreadYield {
    fn yield_idle(&self) {
        std::thread::yield_now();
    }
}

impl<T: IdleScheduler + ?Sized> IdleScheduler for Arc<T> {
    fn yield_idle(&self) {
        (**self).yield_idle()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Running,
}

/// Marks the exporter busy until dropped.
struct SessionGuard<'a> {
    state: &'a Mutex<SessionState>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = SessionState::Idle;
    }
}

type SharedRasterizer = Box<dyn Rasterizer + Send + Sync>;
type SharedPersister = Box<dyn Persister + Send + Sync>;
type SharedScheduler = Box<dyn IdleScheduler + Send + Sync>;

/// Slices a live document into a multi-page PDF.
///
/// At most one export runs per exporter; a call made while another is in
/// flight returns [`ExportOutcome::Busy`] without touching the document.
pub struct Exporter {
    config: ExportConfig,
    boundary: BoundarySelector,
    background: Color,
    rasterizer: SharedRasterizer,
    persister: SharedPersister,
    scheduler: SharedScheduler,
    session: Mutex<SessionState>,
}

impl Exporter {
    /// Build an exporter, rejecting an invalid configuration.
    pub fn new(
        config: ExportConfig,
        rasterizer: impl Rasterizer + Send + Sync + 'static,
        persister: impl Persister + Send + Sync + 'static,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            boundary: config.boundary()?,
            background: config.background_color()?,
            config,
            rasterizer: Box::new(rasterizer),
            persister: Box::new(persister),
            scheduler: Box::new(ThreadYield),
            session: Mutex::new(SessionState::Idle),
        })
    }

    /// Build an exporter around a [`LayoutRasterizer`] configured from
    /// `config`.
    pub fn with_layout_rasterizer(
        config: ExportConfig,
        fonts: Arc<FontManager>,
        persister: impl Persister + Send + Sync + 'static,
    ) -> Result<Self> {
        let rasterizer = LayoutRasterizer::new(fonts)
            .with_ignore_selector(config.ignore()?)
            .with_strict_resources(config.strict_resources)
            .with_max_height(config.max_raster_height);
        Self::new(config, rasterizer, persister)
    }

    pub fn with_scheduler(mut self, scheduler: impl IdleScheduler + Send + Sync + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) == SessionState::Running
    }

    fn try_begin(&self) -> Option<SessionGuard<'_>> {
        let mut state = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if *state == SessionState::Running {
            return None;
        }
        *state = SessionState::Running;
        Some(SessionGuard {
            state: &self.session,
        })
    }

    /// Export `document` as a PDF named after `options.file_name_body`.
    ///
    /// The document is marked for the duration of the call and restored
    /// before it returns, whatever the outcome.
    pub fn export(
        &self,
        document: &mut LiveDocument,
        options: &ExportOptions,
    ) -> Result<ExportOutcome> {
        if options.preserve_text {
            return Err(ExportError::Configuration(
                "preserving text in the exported PDF is not supported".to_string(),
            ));
        }
        let Some(_session) = self.try_begin() else {
            log::warn!("An export is already running; ignoring this request");
            return Ok(ExportOutcome::Busy);
        };

        let width = document.client_width();
        let metrics = document.measure().map_err(ExportError::Layout)?;
        let min_height = self.config.min_slice_height(width);
        let max_height = self
            .config
            .max_slice_height(width, self.rasterizer.max_output_height());
        let mut slices = select_slices(document.root(), &metrics, &self.boundary, min_height, max_height);
        if slices.is_empty() {
            return Ok(ExportOutcome::Empty);
        }
        log::debug!(
            "{} slice(s) for {:.0}px of content (min {min_height:.0}px, max {max_height:.0}px)",
            slices.len(),
            metrics.content_height
        );

        let file_name = format!("{}.pdf", sanitize_file_name_body(&options.file_name_body));
        let marks = mark_slice_indices(document.root_mut(), &metrics, &mut slices);
        let run = self.compose(&marks, &slices, width);
        marks.release();

        let Some(composer) = run.composer else {
            log::error!("No slice could be captured; nothing to save");
            return Ok(ExportOutcome::NoPages {
                slice_count: slices.len(),
                failed_slices: run.failed_slices,
            });
        };

        let page_count = composer.page_count();
        let bytes = composer.finish();
        match self.persister.persist(&file_name, &bytes) {
            Ok(location) => {
                log::info!(
                    "Saved {file_name}: {page_count} page(s) from {} slice(s), {} bytes",
                    slices.len(),
                    bytes.len()
                );
                Ok(ExportOutcome::Saved(ExportReport {
                    file_name,
                    location,
                    page_count,
                    slice_count: slices.len(),
                    failed_slices: run.failed_slices,
                    stopped_early: run.stopped_early,
                }))
            }
            Err(e) => {
                log::error!("Could not save {file_name}: {e}");
                Ok(ExportOutcome::PersistFailed {
                    file_name,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn compose(&self, root: &ElementNode, slices: &[Slice], viewport_width: f32) -> ComposeRun {
        let mut run = ComposeRun {
            composer: None,
            failed_slices: Vec::new(),
            stopped_early: false,
        };
        let captures = PageCaptures::new(self, root, slices, viewport_width);
        for (slice, capture) in captures {
            let placed = capture.and_then(|bitmap| self.place(&mut run.composer, &bitmap));
            match placed {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => {
                    log::error!("Skipping slice {}: {e}", slice.index);
                    run.failed_slices.push(slice.index);
                }
                Err(e) => {
                    log::error!("Stopping at slice {} of {}: {e}", slice.index, slices.len());
                    run.failed_slices.push(slice.index);
                    run.stopped_early = slice.index + 1 < slices.len();
                    break;
                }
            }
        }
        run
    }

    fn place(&self, composer: &mut Option<PageComposer>, bitmap: &Bitmap) -> std::result::Result<(), CaptureError> {
        match composer {
            Some(c) => c.append(bitmap),
            None => {
                let first = PageComposer::first(
                    &self.config.title,
                    self.config.page_width(),
                    bitmap,
                    self.config.jpeg_quality,
                    self.background,
                )?
                .with_overscan(self.config.page_overscan_pt);
                *composer = Some(first);
                Ok(())
            }
        }
    }
}

struct ComposeRun {
    composer: Option<PageComposer>,
    failed_slices: Vec<usize>,
    stopped_early: bool,
}

/// Captures slices in order, yielding to the scheduler before each one.
///
/// Stops after the first capture error that is not recoverable.
pub struct PageCaptures<'a> {
    exporter: &'a Exporter,
    root: &'a ElementNode,
    slices: &'a [Slice],
    viewport_width: f32,
    next: usize,
    halted: bool,
}

impl<'a> PageCaptures<'a> {
    fn new(exporter: &'a Exporter, root: &'a ElementNode, slices: &'a [Slice], viewport_width: f32) -> Self {
        Self {
            exporter,
            root,
            slices,
            viewport_width,
            next: 0,
            halted: false,
        }
    }
}

impl Iterator for PageCaptures<'_> {
    type Item = (Slice, std::result::Result<Bitmap, CaptureError>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.halted {
            return None;
        }
        let slice = *self.slices.get(self.next)?;
        self.next += 1;

        self.exporter.scheduler.yield_idle();
        let request = RasterRequest {
            viewport_width: self.viewport_width,
            background: self.exporter.background,
            offset_y: slice.margin_top_px,
            scale: self.exporter.config.device_pixel_ratio,
        };
        let result = self
            .exporter
            .rasterizer
            .rasterize(self.root, &request, &mut |clone| isolate(slice.index, clone));
        if let Err(e) = &result {
            self.halted = !e.is_recoverable();
        }
        Some((slice, result))
    }
}

impl FusedIterator for PageCaptures<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IsolationError;
    use crate::isolation::{SHOW_FROM_ATTR, SLICE_INDEX_ATTR};
    use crate::persist::MemoryPersister;
    use crate::raster::CloneHook;
    use std::collections::HashMap;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    /// Three 200px sections, each starting with a heading.
    const THREE_SECTIONS: &str = "<div>\
        <h2 style=\"height: 200px; margin: 0\">One</h2>\
        <h2 style=\"height: 200px; margin: 0\">Two</h2>\
        <h2 style=\"height: 200px; margin: 0\">Three</h2>\
        </div>";

    /// Reference page height at this width is 160px.
    const WIDTH: f32 = 90.0;

    fn document(html: &str) -> LiveDocument {
        LiveDocument::from_html(html, WIDTH, Arc::new(FontManager::default()))
    }

    fn config() -> ExportConfig {
        ExportConfig {
            page_count_factor: 0.0,
            ..ExportConfig::default()
        }
    }

    /// Returns solid bitmaps and fails the calls listed in `failures`.
    struct ScriptedRasterizer {
        /// Chosen so that the maximum slice height is 200px.
        max_height: u32,
        failures: HashMap<usize, fn() -> CaptureError>,
        calls: AtomicUsize,
        shown: Mutex<Vec<usize>>,
    }

    impl ScriptedRasterizer {
        fn new() -> Self {
            Self {
                max_height: 360,
                failures: HashMap::new(),
                calls: AtomicUsize::new(0),
                shown: Mutex::new(Vec::new()),
            }
        }

        fn failing(mut self, call: usize, error: fn() -> CaptureError) -> Self {
            self.failures.insert(call, error);
            self
        }
    }

    impl Rasterizer for ScriptedRasterizer {
        fn max_output_height(&self) -> u32 {
            self.max_height
        }

        fn rasterize(
            &self,
            root: &ElementNode,
            request: &RasterRequest,
            on_clone: &mut CloneHook<'_>,
        ) -> std::result::Result<Bitmap, CaptureError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut clone = root.clone();
            on_clone(&mut clone)?;
            if let Some(position) = clone.element_children().position(|e| e.has_attr(SHOW_FROM_ATTR)) {
                self.shown.lock().unwrap().push(position);
            }
            if let Some(error) = self.failures.get(&call) {
                return Err(error());
            }
            Ok(Bitmap::solid(request.viewport_width as u32, 200, [255, 255, 255]))
        }
    }

    struct FailingPersister;

    impl Persister for FailingPersister {
        fn persist(&self, _: &str, _: &[u8]) -> io::Result<String> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }
    }

    fn exporter(rasterizer: Arc<ScriptedRasterizer>, persister: Arc<MemoryPersister>) -> Exporter {
        Exporter::new(config(), rasterizer, persister).unwrap()
    }

    fn saved(outcome: ExportOutcome) -> ExportReport {
        match outcome {
            ExportOutcome::Saved(report) => report,
            other => panic!("expected a saved export, got {other:?}"),
        }
    }

    #[test]
    fn every_slice_becomes_a_page() {
        let rasterizer = Arc::new(ScriptedRasterizer::new());
        let persister = Arc::new(MemoryPersister::new());
        let mut doc = document(THREE_SECTIONS);
        let report = saved(
            exporter(rasterizer.clone(), persister.clone())
                .export(&mut doc, &ExportOptions::new("My Notes"))
                .unwrap(),
        );
        assert_eq!(report.page_count, 3);
        assert_eq!(report.slice_count, 3);
        assert!(report.failed_slices.is_empty());
        assert_eq!(report.file_name, "MyNotes.pdf");
        assert_eq!(*rasterizer.shown.lock().unwrap(), vec![0, 1, 2]);
        let bytes = persister.get("MyNotes.pdf").unwrap();
        assert_eq!(&bytes[0..5], b"%PDF-");
    }

    #[test]
    fn capture_failure_stops_but_keeps_earlier_pages() {
        let rasterizer = Arc::new(
            ScriptedRasterizer::new().failing(1, || CaptureError::Tainted("https://x/y.png".into())),
        );
        let persister = Arc::new(MemoryPersister::new());
        let mut doc = document(THREE_SECTIONS);
        let report = saved(
            exporter(rasterizer.clone(), persister.clone())
                .export(&mut doc, &ExportOptions::new("doc"))
                .unwrap(),
        );
        assert_eq!(report.page_count, 1);
        assert_eq!(report.failed_slices, vec![1]);
        assert!(report.stopped_early);
        assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn structural_failure_skips_one_slice() {
        let rasterizer = Arc::new(
            ScriptedRasterizer::new()
                .failing(1, || IsolationError::MissingMarker { index: 1 }.into()),
        );
        let persister = Arc::new(MemoryPersister::new());
        let mut doc = document(THREE_SECTIONS);
        let report = saved(
            exporter(rasterizer.clone(), persister)
                .export(&mut doc, &ExportOptions::new("doc"))
                .unwrap(),
        );
        assert_eq!(report.page_count, 2);
        assert_eq!(report.failed_slices, vec![1]);
        assert!(!report.stopped_early);
        assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failing_the_first_capture_writes_nothing() {
        let rasterizer = Arc::new(ScriptedRasterizer::new().failing(0, || CaptureError::Empty));
        let persister = Arc::new(MemoryPersister::new());
        let mut doc = document(THREE_SECTIONS);
        let outcome = exporter(rasterizer, persister.clone())
            .export(&mut doc, &ExportOptions::new("doc"))
            .unwrap();
        assert_eq!(
            outcome,
            ExportOutcome::NoPages {
                slice_count: 3,
                failed_slices: vec![0],
            }
        );
        assert!(persister.file_names().is_empty());
    }

    #[test]
    fn the_tree_is_restored_on_every_path() {
        for failing_call in [None, Some(0), Some(2)] {
            let mut rasterizer = ScriptedRasterizer::new();
            if let Some(call) = failing_call {
                rasterizer = rasterizer.failing(call, || CaptureError::Empty);
            }
            let mut doc = document(THREE_SECTIONS);
            let before = doc.root().clone();
            exporter(Arc::new(rasterizer), Arc::new(MemoryPersister::new()))
                .export(&mut doc, &ExportOptions::new("doc"))
                .unwrap();
            assert_eq!(doc.root(), &before, "failing call {failing_call:?}");
            assert!(doc.root().element_children().all(|e| !e.has_attr(SLICE_INDEX_ATTR)));
        }
    }

    #[test]
    fn preserving_text_is_rejected_before_any_capture() {
        let rasterizer = Arc::new(ScriptedRasterizer::new());
        let mut doc = document(THREE_SECTIONS);
        let options = ExportOptions {
            file_name_body: "doc".into(),
            preserve_text: true,
        };
        let result = exporter(rasterizer.clone(), Arc::new(MemoryPersister::new())).export(&mut doc, &options);
        assert!(matches!(result, Err(ExportError::Configuration(_))));
        assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_document_is_a_no_op() {
        let rasterizer = Arc::new(ScriptedRasterizer::new());
        let persister = Arc::new(MemoryPersister::new());
        let mut doc = document("<div></div>");
        let outcome = exporter(rasterizer.clone(), persister.clone())
            .export(&mut doc, &ExportOptions::new("doc"))
            .unwrap();
        assert_eq!(outcome, ExportOutcome::Empty);
        assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 0);
        assert!(persister.file_names().is_empty());
    }

    #[test]
    fn persistence_failure_is_reported() {
        let mut doc = document(THREE_SECTIONS);
        let outcome = Exporter::new(config(), Arc::new(ScriptedRasterizer::new()), FailingPersister)
            .unwrap()
            .export(&mut doc, &ExportOptions::new(""))
            .unwrap();
        assert!(matches!(
            outcome,
            ExportOutcome::PersistFailed { file_name, reason } if file_name == "markdown.pdf" && reason == "read-only"
        ));
    }

    #[test]
    fn scheduler_runs_before_each_capture() {
        struct Counting(AtomicUsize);
        impl IdleScheduler for Counting {
            fn yield_idle(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let mut doc = document(THREE_SECTIONS);
        exporter(Arc::new(ScriptedRasterizer::new()), Arc::new(MemoryPersister::new()))
            .with_scheduler(counter.clone())
            .export(&mut doc, &ExportOptions::new("doc"))
            .unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn invalid_configuration_is_rejected_up_front() {
        let config = ExportConfig {
            boundary_selector: "h1 > p".into(),
            ..ExportConfig::default()
        };
        let result = Exporter::new(config, ScriptedRasterizer::new(), MemoryPersister::new());
        assert!(matches!(result, Err(ExportError::Configuration(_))));
    }

    /// Blocks inside the first capture until released.
    struct BlockingRasterizer {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
        calls: AtomicUsize,
    }

    impl Rasterizer for BlockingRasterizer {
        fn max_output_height(&self) -> u32 {
            14_400
        }

        fn rasterize(
            &self,
            _root: &ElementNode,
            request: &RasterRequest,
            _on_clone: &mut CloneHook<'_>,
        ) -> std::result::Result<Bitmap, CaptureError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            Ok(Bitmap::solid(request.viewport_width as u32, 10, [0, 0, 0]))
        }
    }

    #[test]
    fn concurrent_export_is_busy() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let rasterizer = Arc::new(BlockingRasterizer {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
            calls: AtomicUsize::new(0),
        });
        let exporter = Arc::new(
            Exporter::new(config(), rasterizer.clone(), MemoryPersister::new()).unwrap(),
        );

        let first = {
            let exporter = exporter.clone();
            std::thread::spawn(move || {
                let mut doc = document(THREE_SECTIONS);
                exporter.export(&mut doc, &ExportOptions::new("first")).unwrap()
            })
        };
        entered_rx.recv().unwrap();
        assert!(exporter.is_busy());

        let mut doc = document(THREE_SECTIONS);
        let before = doc.root().clone();
        let second = exporter.export(&mut doc, &ExportOptions::new("second")).unwrap();
        assert_eq!(second, ExportOutcome::Busy);
        assert_eq!(doc.root(), &before);
        assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 1);

        release_tx.send(()).unwrap();
        assert!(matches!(first.join().unwrap(), ExportOutcome::Saved(_)));
        assert!(!exporter.is_busy());
    }
}
