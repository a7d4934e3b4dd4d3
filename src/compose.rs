//! Page composer – accumulates slice bitmaps into PDF pages using `printpdf`
//! (v0.8 ops-based API).
//!
//! The first bitmap fixes the points-per-pixel ratio: every page is
//! `page_width_pt` wide and as tall as its bitmap scaled by that ratio.

use image::codecs::jpeg::JpegEncoder;
use printpdf::{
    Color as PdfColor, LinePoint, Mm, Op, PaintMode, PdfDocument, PdfPage, PdfSaveOptions,
    PdfWarnMsg, Point, Polygon, PolygonRing, Pt, RawImage, Rgb, WindingOrder, XObjectTransform,
};

use crate::error::CaptureError;
use crate::raster::Bitmap;
use crate::style::Color;

const MM_PER_PT: f32 = 0.352778;

/// Extra points painted past the page edge by the background rectangle.
pub const DEFAULT_PAGE_OVERSCAN_PT: f32 = 8.0;

/// An in-progress PDF owned by a single export.
pub struct PageComposer {
    doc: PdfDocument,
    pages: Vec<PdfPage>,
    page_width_pt: f32,
    /// Points per bitmap pixel, fixed by the first page.
    ratio: f32,
    quality: f32,
    background: Color,
    overscan_pt: f32,
}

impl PageComposer {
    /// Start a document whose first page holds `bitmap`.
    pub fn first(
        title: &str,
        page_width_pt: f32,
        bitmap: &Bitmap,
        quality: f32,
        background: Color,
    ) -> Result<Self, CaptureError> {
        if bitmap.width() == 0 || bitmap.height() == 0 {
            return Err(CaptureError::Empty);
        }
        let mut composer = Self {
            doc: PdfDocument::new(title),
            pages: Vec::new(),
            page_width_pt,
            ratio: page_width_pt / bitmap.width() as f32,
            quality,
            background,
            overscan_pt: DEFAULT_PAGE_OVERSCAN_PT,
        };
        composer.append(bitmap)?;
        Ok(composer)
    }

    pub fn with_overscan(mut self, overscan_pt: f32) -> Self {
        self.overscan_pt = overscan_pt;
        self
    }

    /// Add a page sized by the ratio fixed at the first page.
    pub fn append(&mut self, bitmap: &Bitmap) -> Result<(), CaptureError> {
        if bitmap.width() == 0 || bitmap.height() == 0 {
            return Err(CaptureError::Empty);
        }
        let page_height_pt = bitmap.height() as f32 * self.ratio;
        log::debug!(
            "Size: page {:.1}x{:.1}pt, bitmap {}x{}px",
            self.page_width_pt,
            page_height_pt,
            bitmap.width(),
            bitmap.height()
        );

        let jpeg = encode_jpeg(bitmap, self.quality)?;
        let mut warnings: Vec<PdfWarnMsg> = Vec::new();
        let raw = RawImage::decode_from_bytes(&jpeg, &mut warnings).map_err(CaptureError::Encode)?;
        let xobj_id = self.doc.add_image(&raw);

        let mut ops = Vec::new();
        self.push_background(&mut ops, page_height_pt);
        ops.push(Op::UseXobject {
            id: xobj_id,
            transform: XObjectTransform {
                translate_x: Some(Pt(0.0)),
                translate_y: Some(Pt(0.0)),
                // At dpi=72 one bitmap pixel is one point before scaling.
                dpi: Some(72.0),
                scale_x: Some(self.page_width_pt / bitmap.width() as f32),
                scale_y: Some(page_height_pt / bitmap.height() as f32),
                rotate: None,
            },
        });

        self.pages.push(PdfPage::new(
            Mm(self.page_width_pt * MM_PER_PT),
            Mm(page_height_pt * MM_PER_PT),
            ops,
        ));
        Ok(())
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Serialize the document.
    pub fn finish(mut self) -> Vec<u8> {
        self.doc.with_pages(self.pages);
        self.doc.save(&PdfSaveOptions::default(), &mut Vec::new())
    }

    /// Full-bleed opaque rectangle, slightly larger than the page to cover
    /// rounding gaps at the edges.
    fn push_background(&self, ops: &mut Vec<Op>, page_height_pt: f32) {
        let [r, g, b] = self.background.to_rgb8_over([255, 255, 255]);
        ops.push(Op::SetFillColor {
            col: PdfColor::Rgb(Rgb {
                r: r as f32 / 255.0,
                g: g as f32 / 255.0,
                b: b as f32 / 255.0,
                icc_profile: None,
            }),
        });

        let x2 = self.page_width_pt + self.overscan_pt;
        let y2 = page_height_pt + self.overscan_pt;
        let corner = |x: f32, y: f32| LinePoint {
            p: Point { x: Pt(x), y: Pt(y) },
            bezier: false,
        };
        ops.push(Op::DrawPolygon {
            polygon: Polygon {
                rings: vec![PolygonRing {
                    points: vec![corner(0.0, 0.0), corner(x2, 0.0), corner(x2, y2), corner(0.0, y2)],
                }],
                mode: PaintMode::Fill,
                winding_order: WindingOrder::NonZero,
            },
        });
    }
}

fn encode_jpeg(bitmap: &Bitmap, quality: f32) -> Result<Vec<u8>, CaptureError> {
    let quality = (quality.clamp(0.01, 1.0) * 100.0).round() as u8;
    let mut bytes = Vec::new();
    bitmap
        .as_image()
        .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, quality))
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(bytes)
}
