//! Rasterizer – turns a (cloned) subtree into a bitmap.
//!
//! [`Rasterizer`] is the seam the exporter captures through. The bundled
//! [`LayoutRasterizer`] clones the root, lets the caller mark the clone, lays
//! it out with the Taffy-based engine and paints the positioned boxes into an
//! `image::RgbImage`.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64_STD, Engine as _};
use image::{imageops, Rgb, RgbImage};

use crate::boundary::BoundarySelector;
use crate::dom::{DomNode, ElementNode};
use crate::error::{CaptureError, IsolationError};
use crate::fonts::{Contour, FontKey, FontManager};
use crate::layout::{layout_root, BoxContent, PositionedBox};
use crate::style::{Color, ComputedStyle, FontStyle, FontWeight, TextAlign, TextDecoration};

/// Elements never rendered into a capture.
pub const DEFAULT_IGNORE_SELECTOR: &str = "iframe, video, input, textarea";

/// Default ceiling on the output bitmap height, in device pixels.
pub const DEFAULT_MAX_RASTER_HEIGHT: u32 = 14_400;

/// Parameters of one capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterRequest {
    /// Width the clone is laid out at, in CSS px.
    pub viewport_width: f32,
    /// Colour behind everything painted.
    pub background: Color,
    /// CSS px cropped from the top of the capture.
    pub offset_y: f32,
    /// Device pixels per CSS px.
    pub scale: f32,
}

/// An opaque RGB capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    image: RgbImage,
}

impl Bitmap {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// A single-colour bitmap.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::new(RgbImage::from_pixel(width, height, Rgb(rgb)))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Raw RGB bytes, row-major.
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }
}

/// Hook run on the clone before it is rendered.
pub type CloneHook<'a> = dyn FnMut(&mut ElementNode) -> Result<(), IsolationError> + 'a;

/// Renders a subtree to a bitmap.
///
/// Implementations must work on a clone of `root`; `on_clone` receives that
/// clone before rendering and an error from it aborts the capture as
/// [`CaptureError::Structural`].
pub trait Rasterizer {
    /// Largest bitmap height this rasterizer can produce.
    fn max_output_height(&self) -> u32;

    fn rasterize(
        &self,
        root: &ElementNode,
        request: &RasterRequest,
        on_clone: &mut CloneHook<'_>,
    ) -> Result<Bitmap, CaptureError>;
}

impl<T: Rasterizer + ?Sized> Rasterizer for Arc<T> {
    fn max_output_height(&self) -> u32 {
        (**self).max_output_height()
    }

    fn rasterize(
        &self,
        root: &ElementNode,
        request: &RasterRequest,
        on_clone: &mut CloneHook<'_>,
    ) -> Result<Bitmap, CaptureError> {
        (**self).rasterize(root, request, on_clone)
    }
}

impl<T: Rasterizer + ?Sized> Rasterizer for Box<T> {
    fn max_output_height(&self) -> u32 {
        (**self).max_output_height()
    }

    fn rasterize(
        &self,
        root: &ElementNode,
        request: &RasterRequest,
        on_clone: &mut CloneHook<'_>,
    ) -> Result<Bitmap, CaptureError> {
        (**self).rasterize(root, request, on_clone)
    }
}

/// Parse a `data:<mime>;base64,<data>` URI and return the raw decoded bytes.
///
/// Returns `Err` if `src` is not a data URI or does not use base64 encoding.
pub fn decode_data_uri(src: &str) -> Result<Vec<u8>, String> {
    let Some(rest) = src.strip_prefix("data:") else {
        let preview: String = src.chars().take(80).collect();
        return Err(format!("not a data URI: {preview:?}"));
    };
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| "invalid data URI: missing `,` separator".to_string())?;
    if !header.contains(";base64") {
        return Err("only base64-encoded data URIs are supported".to_string());
    }
    BASE64_STD
        .decode(data.trim())
        .map_err(|e| format!("base64 decode error: {e}"))
}

// ---------------------------------------------------------------------------
// Layout-backed rasterizer
// ---------------------------------------------------------------------------

/// Paints the crate's own layout of the clone.
///
/// Text is drawn from glyph outlines, so it only shows up once a real font
/// has been loaded into the shared [`FontManager`].
pub struct LayoutRasterizer {
    fonts: Arc<FontManager>,
    ignore: BoundarySelector,
    strict_resources: bool,
    max_height: u32,
}

impl LayoutRasterizer {
    pub fn new(fonts: Arc<FontManager>) -> Self {
        Self {
            fonts,
            ignore: BoundarySelector::parse(DEFAULT_IGNORE_SELECTOR)
                .unwrap_or_else(|_| BoundarySelector::empty()),
            strict_resources: false,
            max_height: DEFAULT_MAX_RASTER_HEIGHT,
        }
    }

    pub fn with_ignore_selector(mut self, ignore: BoundarySelector) -> Self {
        self.ignore = ignore;
        self
    }

    /// Fail with [`CaptureError::Tainted`] on images that are not data URIs
    /// instead of skipping them.
    pub fn with_strict_resources(mut self, strict: bool) -> Self {
        self.strict_resources = strict;
        self
    }

    pub fn with_max_height(mut self, max_height: u32) -> Self {
        self.max_height = max_height;
        self
    }

    /// Hide every element matching the ignore selector. Markers on the
    /// hidden elements stay in place.
    fn hide_ignored(&self, element: &mut ElementNode, depth: usize) {
        for child in element.element_children_mut() {
            if self.ignore.matches_at_depth(child, depth) {
                let style = match child.inline_style() {
                    Some(s) => format!("{s};display:none"),
                    None => "display:none".to_string(),
                };
                child.set_attr("style", style);
                child.children.retain(|c| !matches!(c, DomNode::Element(_)));
            } else {
                self.hide_ignored(child, depth + 1);
            }
        }
    }
}

impl Rasterizer for LayoutRasterizer {
    fn max_output_height(&self) -> u32 {
        self.max_height
    }

    fn rasterize(
        &self,
        root: &ElementNode,
        request: &RasterRequest,
        on_clone: &mut CloneHook<'_>,
    ) -> Result<Bitmap, CaptureError> {
        let mut clone = root.clone();
        on_clone(&mut clone)?;
        self.hide_ignored(&mut clone, 1);

        let layout = layout_root(&clone, request.viewport_width, &self.fonts)
            .map_err(CaptureError::Layout)?;

        let css_width = layout.root.width.max(0.0);
        let css_height = (layout.root.height - request.offset_y).max(0.0);
        let width = (css_width * request.scale).ceil() as u32;
        let height = (css_height * request.scale).ceil() as u32;
        if width == 0 || height == 0 {
            return Err(CaptureError::Empty);
        }
        if height > self.max_height {
            return Err(CaptureError::TooLarge {
                height,
                limit: self.max_height,
            });
        }

        let backdrop = request.background.to_rgb8_over([255, 255, 255]);
        let mut painter = Painter {
            canvas: RgbImage::from_pixel(width, height, Rgb(backdrop)),
            fonts: &self.fonts,
            scale: request.scale,
            offset_y: request.offset_y,
            strict_resources: self.strict_resources,
        };
        painter.paint_box(&layout.root)?;

        log::debug!("Captured {width}x{height} px (offset {:.1})", request.offset_y);
        Ok(Bitmap::new(painter.canvas))
    }
}

// ---------------------------------------------------------------------------
// Painting
// ---------------------------------------------------------------------------

struct Painter<'a> {
    canvas: RgbImage,
    fonts: &'a FontManager,
    scale: f32,
    offset_y: f32,
    strict_resources: bool,
}

impl Painter<'_> {
    /// CSS px → canvas px.
    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale, (y - self.offset_y) * self.scale)
    }

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Color) {
        if color.is_transparent() || w <= 0.0 || h <= 0.0 {
            return;
        }
        let (x0, y0) = self.map(x, y);
        let (x1, y1) = self.map(x + w, y + h);
        let (cw, ch) = (self.canvas.width() as f32, self.canvas.height() as f32);
        let (x0, x1) = (x0.round().clamp(0.0, cw) as u32, x1.round().clamp(0.0, cw) as u32);
        let (y0, y1) = (y0.round().clamp(0.0, ch) as u32, y1.round().clamp(0.0, ch) as u32);
        for py in y0..y1 {
            for px in x0..x1 {
                let pixel = self.canvas.get_pixel_mut(px, py);
                pixel.0 = color.to_rgb8_over(pixel.0);
            }
        }
    }

    fn paint_box(&mut self, b: &PositionedBox) -> Result<(), CaptureError> {
        if !b.is_displayed() {
            return Ok(());
        }
        let s = &b.style;

        self.fill_rect(b.x, b.y, b.width, b.height, s.background_color);
        if s.border_width > 0.0 {
            let bw = s.border_width;
            self.fill_rect(b.x, b.y, b.width, bw, s.border_color);
            self.fill_rect(b.x, b.bottom() - bw, b.width, bw, s.border_color);
            self.fill_rect(b.x, b.y, bw, b.height, s.border_color);
            self.fill_rect(b.x + b.width - bw, b.y, bw, b.height, s.border_color);
        }
        if s.border_left_width > 0.0 {
            let x = b.x + s.border_width;
            self.fill_rect(x, b.y, s.border_left_width, b.height, s.border_color);
        }

        match &b.content {
            BoxContent::None => {}
            BoxContent::Rule => {
                if s.background_color.is_transparent() {
                    self.fill_rect(b.x, b.y, b.width, b.height.max(1.0), s.border_color);
                }
            }
            BoxContent::ListItem { marker } => {
                let lh = self.fonts.line_height_px(s.font_size, s.line_height);
                let w = self.text_width(marker, s);
                let baseline = b.y + s.padding_top + self.baseline_offset(s, lh);
                self.paint_text_run(marker, b.x - w - 8.0, baseline, s);
            }
            BoxContent::Text { lines, .. } => {
                let lh = self.fonts.line_height_px(s.font_size, s.line_height);
                for (i, line) in lines.iter().enumerate() {
                    let w = self.text_width(line, s);
                    let x = match s.text_align {
                        TextAlign::Left => b.x,
                        TextAlign::Center => b.x + (b.width - w) / 2.0,
                        TextAlign::Right => b.x + b.width - w,
                    };
                    let baseline = b.y + i as f32 * lh + self.baseline_offset(s, lh);
                    self.paint_text_run(line, x, baseline, s);
                    if s.text_decoration == TextDecoration::Underline {
                        let thickness = (s.font_size / 16.0).max(1.0);
                        self.fill_rect(x, baseline + 2.0, w, thickness, s.color);
                    }
                }
            }
            BoxContent::Image { src } => self.paint_image(b, src)?,
        }

        for child in &b.children {
            self.paint_box(child)?;
        }
        Ok(())
    }

    fn text_width(&self, text: &str, s: &ComputedStyle) -> f32 {
        self.fonts.measure_text_width(
            text,
            s.font_size,
            s.font_weight == FontWeight::Bold,
            s.font_style == FontStyle::Italic,
            &s.font_family,
        )
    }

    /// Distance from the top of a line box to its baseline.
    fn baseline_offset(&self, s: &ComputedStyle, line_height: f32) -> f32 {
        let ascender = self.fonts.ascender_px(
            s.font_size,
            s.font_weight == FontWeight::Bold,
            s.font_style == FontStyle::Italic,
            &s.font_family,
        );
        (line_height - s.font_size) / 2.0 + ascender
    }

    fn paint_text_run(&mut self, text: &str, x: f32, baseline: f32, s: &ComputedStyle) {
        if text.trim().is_empty() {
            return;
        }
        let key = FontKey::new(
            &s.font_family,
            s.font_weight == FontWeight::Bold,
            s.font_style == FontStyle::Italic,
        );
        let origin = self.map(x, baseline);
        let contours = self
            .fonts
            .outline_text(text, s.font_size * self.scale, &key, origin);
        fill_contours(&mut self.canvas, &contours, s.color);
    }

    fn paint_image(&mut self, b: &PositionedBox, src: &str) -> Result<(), CaptureError> {
        if !src.starts_with("data:") {
            if self.strict_resources {
                return Err(CaptureError::Tainted(src.to_string()));
            }
            log::warn!("Skipping image that is not a data URI: {src}");
            return Ok(());
        }
        let decoded = decode_data_uri(src)
            .and_then(|bytes| image::load_from_memory(&bytes).map_err(|e| e.to_string()));
        let img = match decoded {
            Ok(img) => img.to_rgba8(),
            Err(e) => {
                log::warn!("Skipping image: {e}");
                return Ok(());
            }
        };

        let (x0, y0) = self.map(b.x, b.y);
        let w = (b.width * self.scale).round() as u32;
        let h = (b.height * self.scale).round() as u32;
        if w == 0 || h == 0 {
            return Ok(());
        }
        let resized = imageops::resize(&img, w, h, imageops::FilterType::Triangle);
        let (x0, y0) = (x0.round() as i64, y0.round() as i64);
        for (px, py, pixel) in resized.enumerate_pixels() {
            let (cx, cy) = (x0 + px as i64, y0 + py as i64);
            if cx < 0 || cy < 0 || cx >= self.canvas.width() as i64 || cy >= self.canvas.height() as i64 {
                continue;
            }
            let [red, green, blue, alpha] = pixel.0;
            let color = Color {
                r: red as f32 / 255.0,
                g: green as f32 / 255.0,
                b: blue as f32 / 255.0,
                a: alpha as f32 / 255.0,
            };
            let target = self.canvas.get_pixel_mut(cx as u32, cy as u32);
            target.0 = color.to_rgb8_over(target.0);
        }
        Ok(())
    }
}

/// Fill glyph contours with the non-zero winding rule, sampling each row at
/// its pixel centre.
fn fill_contours(canvas: &mut RgbImage, contours: &[Contour], color: Color) {
    let points = contours.iter().flatten();
    let (min_y, max_y) = points.fold((f32::MAX, f32::MIN), |(lo, hi), &(_, y)| {
        (lo.min(y), hi.max(y))
    });
    if min_y > max_y {
        return;
    }
    let height = canvas.height() as f32;
    let width = canvas.width() as f32;
    let first_row = min_y.floor().clamp(0.0, height) as u32;
    let last_row = max_y.ceil().clamp(0.0, height) as u32;

    let mut crossings: Vec<(f32, i32)> = Vec::new();
    for row in first_row..last_row {
        let cy = row as f32 + 0.5;
        crossings.clear();
        for contour in contours {
            for (i, &(x0, y0)) in contour.iter().enumerate() {
                let (x1, y1) = contour[(i + 1) % contour.len()];
                let upward = y0 <= cy && y1 > cy;
                let downward = y1 <= cy && y0 > cy;
                if upward || downward {
                    let t = (cy - y0) / (y1 - y0);
                    crossings.push((x0 + t * (x1 - x0), if upward { 1 } else { -1 }));
                }
            }
        }
        crossings.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut winding = 0;
        for pair in crossings.windows(2) {
            winding += pair[0].1;
            if winding == 0 {
                continue;
            }
            let start = pair[0].0.round().clamp(0.0, width) as u32;
            let end = pair[1].0.round().clamp(0.0, width) as u32;
            for px in start..end {
                let pixel = canvas.get_pixel_mut(px, row);
                pixel.0 = color.to_rgb8_over(pixel.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_document;
    use sha2::{Digest, Sha256};

    const RED: [u8; 3] = [255, 0, 0];

    fn request(scale: f32, offset_y: f32) -> RasterRequest {
        RasterRequest {
            viewport_width: 100.0,
            background: Color::WHITE,
            offset_y,
            scale,
        }
    }

    fn rasterizer() -> LayoutRasterizer {
        LayoutRasterizer::new(Arc::new(FontManager::default()))
    }

    fn no_hook(_: &mut ElementNode) -> Result<(), IsolationError> {
        Ok(())
    }

    fn digest(bitmap: &Bitmap) -> Vec<u8> {
        Sha256::digest(bitmap.as_raw()).to_vec()
    }

    const BLOCKS: &str = "<div>\
        <div style=\"height: 40px; background: #ff0000\"></div>\
        <div style=\"height: 60px; background: #0000ff\"></div>\
        </div>";

    #[test]
    fn output_size_follows_scale() {
        let root = parse_document(BLOCKS);
        let r = rasterizer();
        let one = r.rasterize(&root, &request(1.0, 0.0), &mut no_hook).unwrap();
        assert_eq!((one.width(), one.height()), (100, 100));
        let two = r.rasterize(&root, &request(2.0, 0.0), &mut no_hook).unwrap();
        assert_eq!((two.width(), two.height()), (200, 200));
        let odd = r.rasterize(&root, &request(1.5, 0.0), &mut no_hook).unwrap();
        assert_eq!(odd.height(), 150);
    }

    #[test]
    fn offset_crops_from_the_top() {
        let root = parse_document(BLOCKS);
        let bitmap = rasterizer()
            .rasterize(&root, &request(1.0, 40.0), &mut no_hook)
            .unwrap();
        assert_eq!(bitmap.height(), 60);
        assert_eq!(bitmap.as_image().get_pixel(50, 0).0, [0, 0, 255]);
    }

    #[test]
    fn paints_backgrounds() {
        let root = parse_document(BLOCKS);
        let bitmap = rasterizer()
            .rasterize(&root, &request(1.0, 0.0), &mut no_hook)
            .unwrap();
        assert_eq!(bitmap.as_image().get_pixel(10, 10).0, RED);
        assert_eq!(bitmap.as_image().get_pixel(10, 90).0, [0, 0, 255]);
    }

    #[test]
    fn captures_are_deterministic() {
        let root = parse_document(BLOCKS);
        let r = rasterizer();
        let a = r.rasterize(&root, &request(1.0, 0.0), &mut no_hook).unwrap();
        let b = r.rasterize(&root, &request(1.0, 0.0), &mut no_hook).unwrap();
        assert_eq!(digest(&a), digest(&b));
        let c = r.rasterize(&root, &request(1.0, 10.0), &mut no_hook).unwrap();
        assert_ne!(digest(&a), digest(&c));
    }

    #[test]
    fn hook_runs_on_a_clone() {
        let root = parse_document(BLOCKS);
        let before = root.clone();
        let mut seen = 0;
        let mut hook = |clone: &mut ElementNode| {
            seen = clone.element_child_count();
            clone.set_attr("data-touched", "");
            Ok::<(), IsolationError>(())
        };
        rasterizer()
            .rasterize(&root, &request(1.0, 0.0), &mut hook)
            .unwrap();
        assert_eq!(seen, 2);
        assert_eq!(root, before);
    }

    #[test]
    fn hook_failure_is_structural() {
        let root = parse_document(BLOCKS);
        let mut hook = |_: &mut ElementNode| Err::<(), _>(IsolationError::MissingMarker { index: 1 });
        let err = rasterizer()
            .rasterize(&root, &request(1.0, 0.0), &mut hook)
            .unwrap_err();
        assert!(matches!(err, CaptureError::Structural(_)));
    }

    #[test]
    fn too_tall_captures_are_rejected() {
        let root = parse_document(BLOCKS);
        let err = rasterizer()
            .with_max_height(50)
            .rasterize(&root, &request(1.0, 0.0), &mut no_hook)
            .unwrap_err();
        assert!(matches!(err, CaptureError::TooLarge { height: 100, limit: 50 }));
    }

    #[test]
    fn empty_capture_is_an_error() {
        let root = parse_document("<div></div>");
        let err = rasterizer()
            .rasterize(&root, &request(1.0, 0.0), &mut no_hook)
            .unwrap_err();
        assert!(matches!(err, CaptureError::Empty));
    }

    #[test]
    fn ignored_elements_take_no_space() {
        let root = parse_document(
            "<div><div style=\"height: 40px\"></div>\
             <iframe style=\"height: 300px; display: block\"></iframe></div>",
        );
        let bitmap = rasterizer()
            .rasterize(&root, &request(1.0, 0.0), &mut no_hook)
            .unwrap();
        assert_eq!(bitmap.height(), 40);
    }

    #[test]
    fn remote_images_taint_strict_captures() {
        let root = parse_document(
            "<div><div style=\"height: 10px\"></div>\
             <img src=\"https://example.com/a.png\" style=\"width: 10px; height: 10px\"></div>",
        );
        let lenient = rasterizer().rasterize(&root, &request(1.0, 0.0), &mut no_hook);
        assert!(lenient.is_ok());
        let strict = rasterizer()
            .with_strict_resources(true)
            .rasterize(&root, &request(1.0, 0.0), &mut no_hook);
        assert!(matches!(strict, Err(CaptureError::Tainted(src)) if src.contains("example.com")));
    }

    #[test]
    fn data_uri_images_are_painted() {
        let mut png = Vec::new();
        RgbImage::from_pixel(4, 4, Rgb([0, 255, 0]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let src = format!("data:image/png;base64,{}", BASE64_STD.encode(&png));
        let root = parse_document(&format!(
            "<div><img src=\"{src}\" style=\"width: 20px; height: 20px\"></div>"
        ));
        let bitmap = rasterizer()
            .rasterize(&root, &request(1.0, 0.0), &mut no_hook)
            .unwrap();
        assert_eq!(bitmap.as_image().get_pixel(10, 10).0, [0, 255, 0]);
    }

    #[test]
    fn data_uri_decoding() {
        assert_eq!(decode_data_uri("data:text/plain;base64,aGk=").unwrap(), b"hi");
        assert!(decode_data_uri("https://example.com/x.png").is_err());
        assert!(decode_data_uri("data:text/plain,hi").is_err());
        assert!(decode_data_uri("data:image/png;base64").is_err());
    }

    #[test]
    fn contour_fill_covers_a_square() {
        let mut canvas = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        let square = vec![(2.0, 2.0), (8.0, 2.0), (8.0, 8.0), (2.0, 8.0)];
        fill_contours(&mut canvas, &[square], Color::BLACK);
        assert_eq!(canvas.get_pixel(5, 5).0, [0, 0, 0]);
        assert_eq!(canvas.get_pixel(1, 5).0, [255, 255, 255]);
        assert_eq!(canvas.get_pixel(5, 9).0, [255, 255, 255]);
    }
}
