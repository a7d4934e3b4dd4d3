//! Integration tests for the pdf-slicer export pipeline.
//!
//! These tests validate:
//! - Slice boundaries computed from real layout measurements
//! - Full exports through the layout rasterizer into a PDF
//! - Partial output and tree restoration when captures fail
//! - Configuration loading and rejection

use std::sync::Arc;

use pdf_slicer::boundary::{select_slices, BoundarySelector};
use pdf_slicer::error::CaptureError;
use pdf_slicer::fonts::FontManager;
use pdf_slicer::persist::MemoryPersister;
use pdf_slicer::samples;
use pdf_slicer::{ExportConfig, ExportError, ExportOptions, ExportOutcome, ExportReport, Exporter, LiveDocument};

// =====================================================================
// Helper
// =====================================================================

/// Reference page height at this width is 160px.
const WIDTH: f32 = 90.0;

fn fonts() -> Arc<FontManager> {
    Arc::new(FontManager::default())
}

fn document(html: &str) -> LiveDocument {
    LiveDocument::from_html(html, WIDTH, fonts())
}

/// No minimum slice height; the maximum is `max_slice` CSS px.
fn config(max_slice: u32) -> ExportConfig {
    ExportConfig {
        page_count_factor: 0.0,
        max_raster_height: max_slice + 160,
        ..ExportConfig::default()
    }
}

fn export(html: &str, config: ExportConfig) -> (ExportOutcome, Arc<MemoryPersister>) {
    let persister = Arc::new(MemoryPersister::new());
    let exporter = Exporter::with_layout_rasterizer(config, fonts(), persister.clone()).unwrap();
    let mut doc = document(html);
    let outcome = exporter.export(&mut doc, &ExportOptions::new("out")).unwrap();
    (outcome, persister)
}

fn saved(outcome: ExportOutcome) -> ExportReport {
    match outcome {
        ExportOutcome::Saved(report) => report,
        other => panic!("expected a saved export, got {other:?}"),
    }
}

fn assert_valid_pdf(bytes: &[u8]) {
    assert!(bytes.len() > 100, "PDF too small: {} bytes", bytes.len());
    assert_eq!(&bytes[0..5], b"%PDF-", "Missing PDF header");
}

// =====================================================================
// Boundary selection on measured documents
// =====================================================================

#[test]
fn measured_sections_split_at_max_height() {
    let doc = document(&samples::fixed_sections(&[200, 200, 200, 200]));
    let metrics = doc.measure().unwrap();
    let tops: Vec<f32> = metrics.children.iter().map(|m| m.top).collect();
    assert_eq!(tops, vec![0.0, 200.0, 400.0, 600.0]);

    let slices = select_slices(doc.root(), &metrics, &BoundarySelector::default(), 0.0, 400.0);
    let starts: Vec<usize> = slices.iter().map(|s| s.start).collect();
    assert_eq!(starts, vec![0, 2]);
}

#[test]
fn short_document_is_one_slice() {
    let doc = document(samples::minimal_note());
    let metrics = doc.measure().unwrap();
    let slices = select_slices(doc.root(), &metrics, &BoundarySelector::default(), 4800.0, 12_800.0);
    assert_eq!(slices.len(), 1);
    assert_eq!(slices[0].start, 0);
}

#[test]
fn custom_selector_picks_other_boundaries() {
    let html = "<div>\
        <p style=\"height: 100px; margin: 0\">intro</p>\
        <section class=\"page\" style=\"height: 100px\">a</section>\
        <section class=\"page\" style=\"height: 100px\">b</section>\
        </div>";
    let doc = document(html);
    let metrics = doc.measure().unwrap();
    let selector = BoundarySelector::parse(":scope > section.page").unwrap();
    let slices = select_slices(doc.root(), &metrics, &selector, 0.0, 100.0);
    let starts: Vec<usize> = slices.iter().map(|s| s.start).collect();
    assert_eq!(starts, vec![0, 1, 2]);
}

#[test]
fn handbook_slice_count_falls_as_max_rises() {
    let doc = document(&samples::handbook(12));
    let metrics = doc.measure().unwrap();
    let selector = BoundarySelector::default();
    let counts: Vec<usize> = [300.0, 600.0, 1200.0, 2400.0, 1.0e6]
        .iter()
        .map(|&max| select_slices(doc.root(), &metrics, &selector, 0.0, max).len())
        .collect();
    assert!(counts.windows(2).all(|w| w[0] >= w[1]), "{counts:?}");
    assert_eq!(counts.last(), Some(&1));
    assert!(counts[0] > 1);
}

// =====================================================================
// End-to-end exports
// =====================================================================

#[test]
fn export_writes_one_page_per_slice() {
    let (outcome, persister) = export(&samples::fixed_sections(&[200, 200, 200]), config(200));
    let report = saved(outcome);
    assert_eq!(report.slice_count, 3);
    assert_eq!(report.page_count, 3);
    assert_eq!(report.file_name, "out.pdf");
    assert_valid_pdf(&persister.get("out.pdf").unwrap());
}

#[test]
fn export_of_every_element_kind() {
    let (outcome, persister) = export(&samples::release_notes(), ExportConfig::default());
    let report = saved(outcome);
    assert_eq!(report.page_count, 1);
    assert!(report.failed_slices.is_empty());
    assert_valid_pdf(&persister.get("out.pdf").unwrap());
}

#[test]
fn uneven_sections_all_fit_the_rasterizer() {
    // Every section is shorter than the reserved reference page, so no
    // slice can overshoot the raster limit.
    let heights: Vec<u32> = (0..30).map(|i| 100 + (i * 37) % 50).collect();
    let (outcome, _) = export(&samples::fixed_sections(&heights), config(500));
    let report = saved(outcome);
    assert!(report.page_count > 1, "{report:?}");
    assert_eq!(report.page_count, report.slice_count);
    assert!(report.failed_slices.is_empty());
}

#[test]
fn retina_export_uses_a_smaller_max_height() {
    let html = samples::fixed_sections(&[200, 200, 200, 200]);
    let one_x = saved(export(&html, config(400)).0);
    let two_x = saved(
        export(
            &html,
            ExportConfig {
                device_pixel_ratio: 2.0,
                ..config(400)
            },
        )
        .0,
    );
    assert!(two_x.slice_count > one_x.slice_count);
}

#[test]
fn tainted_capture_keeps_earlier_pages() {
    let html = "<div>\
        <h2 style=\"height: 200px; margin: 0\">One</h2>\
        <h2 style=\"height: 200px; margin: 0\">Two</h2>\
        <img src=\"https://example.com/remote.png\" style=\"width: 10px; height: 10px\">\
        <h2 style=\"height: 200px; margin: 0\">Three</h2>\
        </div>";
    let strict = ExportConfig {
        strict_resources: true,
        ..config(200)
    };
    let report = saved(export(html, strict).0);
    assert_eq!(report.slice_count, 3);
    assert_eq!(report.page_count, 1);
    assert_eq!(report.failed_slices, vec![1]);
    assert!(report.stopped_early);

    let lenient = saved(export(html, config(200)).0);
    assert_eq!(lenient.page_count, 3);
}

#[test]
fn oversized_tail_stops_at_the_rasterizer_limit() {
    // The last slice has no candidate to break at and exceeds the limit.
    let html = samples::fixed_sections(&[200, 900]);
    let report = saved(export(&html, config(200)).0);
    assert_eq!(report.slice_count, 2);
    assert_eq!(report.page_count, 1);
    assert_eq!(report.failed_slices, vec![1]);
}

#[test]
fn live_document_is_unchanged_by_export() {
    let persister = Arc::new(MemoryPersister::new());
    let exporter = Exporter::with_layout_rasterizer(config(200), fonts(), persister).unwrap();
    let mut doc = document(&samples::fixed_sections(&[200, 200, 200]));
    let before = doc.root().clone();
    exporter.export(&mut doc, &ExportOptions::new("a")).unwrap();
    assert_eq!(doc.root(), &before);
    assert!(!exporter.is_busy());
}

#[test]
fn repeated_exports_agree() {
    let html = samples::fixed_sections(&[200, 200]);
    let first = saved(export(&html, config(200)).0);
    let second = saved(export(&html, config(200)).0);
    assert_eq!(first, second);
}

#[test]
fn empty_document_writes_nothing() {
    let (outcome, persister) = export("<div></div>", ExportConfig::default());
    assert_eq!(outcome, ExportOutcome::Empty);
    assert!(persister.file_names().is_empty());
}

// =====================================================================
// Configuration
// =====================================================================

#[test]
fn preserve_text_is_a_configuration_error() {
    let exporter =
        Exporter::with_layout_rasterizer(ExportConfig::default(), fonts(), MemoryPersister::new()).unwrap();
    let mut doc = document(samples::minimal_note());
    let options = ExportOptions {
        file_name_body: "x".into(),
        preserve_text: true,
    };
    assert!(matches!(
        exporter.export(&mut doc, &options),
        Err(ExportError::Configuration(_))
    ));
}

#[test]
fn config_json_overrides_defaults() {
    let config = ExportConfig::from_json(
        r#"{ "boundary_selector": ":scope > h1", "jpeg_quality": 0.5, "background": "black" }"#,
    )
    .unwrap();
    assert_eq!(config.jpeg_quality, 0.5);
    assert_eq!(config.title, "pdf-slicer output");
    assert!(Exporter::with_layout_rasterizer(config, fonts(), MemoryPersister::new()).is_ok());
}

#[test]
fn bad_ignore_selector_is_rejected() {
    let config = ExportConfig {
        ignore_selector: "iframe video".into(),
        ..ExportConfig::default()
    };
    assert!(matches!(
        Exporter::with_layout_rasterizer(config, fonts(), MemoryPersister::new()),
        Err(ExportError::Configuration(_))
    ));
}

#[test]
fn too_large_is_not_recoverable() {
    assert!(!CaptureError::TooLarge { height: 2, limit: 1 }.is_recoverable());
}
