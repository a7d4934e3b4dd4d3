//! Font loading, text measurement and glyph outlines using `ttf-parser`.
//!
//! Without a loaded font the manager falls back to Helvetica-like synthetic
//! metrics, which is enough for layout measurement. Painting text needs real
//! outlines, so the rasterizer only draws glyphs once a TTF/OTF is loaded.

use std::collections::HashMap;

/// A loaded font face with metrics.
#[derive(Clone)]
pub struct FontData {
    /// Raw font bytes (kept alive for ttf-parser's zero-copy API).
    pub bytes: Vec<u8>,
    pub units_per_em: f32,
    pub ascender: f32,
    pub descender: f32,
    pub line_gap: f32,
}

impl FontData {
    fn synthetic() -> Self {
        Self {
            bytes: Vec::new(),
            units_per_em: 1000.0,
            ascender: 750.0,
            descender: -250.0,
            line_gap: 0.0,
        }
    }
}

/// Manages loaded fonts.
pub struct FontManager {
    fonts: HashMap<FontKey, FontData>,
    default_key: FontKey,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct FontKey {
    pub family: String,
    pub bold: bool,
    pub italic: bool,
}

impl FontKey {
    pub fn new(family: &str, bold: bool, italic: bool) -> Self {
        Self {
            family: family.to_string(),
            bold,
            italic,
        }
    }
}

/// A closed glyph contour in CSS pixels, y growing downwards.
pub type Contour = Vec<(f32, f32)>;

impl FontManager {
    pub fn new() -> Self {
        Self {
            fonts: HashMap::new(),
            default_key: FontKey::new("Helvetica", false, false),
        }
    }

    /// Load a TTF/OTF font from bytes.
    ///
    /// The first real font loaded becomes the fallback for every family.
    pub fn load_font(
        &mut self,
        family: &str,
        bold: bool,
        italic: bool,
        bytes: Vec<u8>,
    ) -> Result<(), String> {
        let face = ttf_parser::Face::parse(&bytes, 0)
            .map_err(|e| format!("Failed to parse font: {e}"))?;

        let data = FontData {
            units_per_em: face.units_per_em() as f32,
            ascender: face.ascender() as f32,
            descender: face.descender() as f32,
            line_gap: face.line_gap() as f32,
            bytes,
        };

        let key = FontKey::new(family, bold, italic);
        if !self.has_real_fonts() {
            self.default_key = key.clone();
        }
        self.fonts.insert(key, data);
        Ok(())
    }

    /// Register Helvetica-like synthetic metrics (for when no TTF is
    /// available).
    pub fn ensure_default(&mut self) {
        if self.fonts.is_empty() {
            for bold in [false, true] {
                self.fonts
                    .insert(FontKey::new("Helvetica", bold, false), FontData::synthetic());
            }
            self.default_key = FontKey::new("Helvetica", false, false);
        }
    }

    /// Get font data for a key: exact match, then the same family in any
    /// style, then the default face.
    pub fn get(&self, key: &FontKey) -> Option<&FontData> {
        self.fonts
            .get(key)
            .or_else(|| {
                self.fonts
                    .iter()
                    .find(|(k, _)| k.family == key.family)
                    .map(|(_, d)| d)
            })
            .or_else(|| self.fonts.get(&self.default_key))
    }

    /// Measure the width of a string at a given font size (in px).
    /// If we have actual font bytes, we parse glyph advances. Otherwise we
    /// use an average character width heuristic (0.5 × font_size per char,
    /// 0.6 for monospace families).
    pub fn measure_text_width(
        &self,
        text: &str,
        font_size: f32,
        bold: bool,
        italic: bool,
        family: &str,
    ) -> f32 {
        let key = FontKey::new(family, bold, italic);
        let face = self
            .get(&key)
            .filter(|d| !d.bytes.is_empty())
            .and_then(|d| ttf_parser::Face::parse(&d.bytes, 0).ok().map(|f| (d, f)));

        let Some((data, face)) = face else {
            let avg = if is_monospace(family) {
                0.6
            } else if bold {
                0.55
            } else {
                0.5
            };
            return text.chars().count() as f32 * font_size * avg;
        };

        let scale = font_size / data.units_per_em;
        text.chars()
            .map(|ch| match face.glyph_index(ch) {
                Some(gid) => face.glyph_hor_advance(gid).unwrap_or(0) as f32 * scale,
                None => font_size * 0.5,
            })
            .sum()
    }

    /// Measure the line height in px.
    pub fn line_height_px(&self, font_size: f32, line_height_factor: f32) -> f32 {
        font_size * line_height_factor
    }

    /// Get the ascender in px for the given font.
    pub fn ascender_px(&self, font_size: f32, bold: bool, italic: bool, family: &str) -> f32 {
        let key = FontKey::new(family, bold, italic);
        match self.get(&key) {
            Some(data) => data.ascender * font_size / data.units_per_em,
            None => font_size * 0.75,
        }
    }

    /// Check if real font bytes are loaded for the default font.
    pub fn has_real_fonts(&self) -> bool {
        self.fonts
            .get(&self.default_key)
            .map(|d| !d.bytes.is_empty())
            .unwrap_or(false)
    }

    /// Glyph outlines for a run of text whose baseline starts at `origin`.
    ///
    /// Returns no contours when only synthetic metrics are available.
    pub fn outline_text(
        &self,
        text: &str,
        font_size: f32,
        key: &FontKey,
        origin: (f32, f32),
    ) -> Vec<Contour> {
        let Some(data) = self.get(key).filter(|d| !d.bytes.is_empty()) else {
            return Vec::new();
        };
        let Ok(face) = ttf_parser::Face::parse(&data.bytes, 0) else {
            return Vec::new();
        };
        let scale = font_size / data.units_per_em;
        let mut pen_x = origin.0;
        let mut contours = Vec::new();
        for ch in text.chars() {
            let Some(gid) = face.glyph_index(ch) else {
                pen_x += font_size * 0.5;
                continue;
            };
            let mut builder = ContourBuilder {
                origin: (pen_x, origin.1),
                scale,
                current: Vec::new(),
                contours: &mut contours,
            };
            face.outline_glyph(gid, &mut builder);
            builder.flush();
            pen_x += face.glyph_hor_advance(gid).unwrap_or(0) as f32 * scale;
        }
        contours
    }
}

impl Default for FontManager {
    fn default() -> Self {
        let mut mgr = Self::new();
        mgr.ensure_default();
        mgr
    }
}

fn is_monospace(family: &str) -> bool {
    let family = family.to_ascii_lowercase();
    family.contains("courier") || family.contains("mono")
}

/// Flattens glyph outlines into polygons in pixel space.
struct ContourBuilder<'a> {
    origin: (f32, f32),
    scale: f32,
    current: Contour,
    contours: &'a mut Vec<Contour>,
}

const CURVE_STEPS: usize = 8;

impl ContourBuilder<'_> {
    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        // Font units grow upwards; pixels grow downwards.
        (self.origin.0 + x * self.scale, self.origin.1 - y * self.scale)
    }

    fn last(&self) -> (f32, f32) {
        self.current.last().copied().unwrap_or(self.origin)
    }

    fn flush(&mut self) {
        if self.current.len() > 2 {
            self.contours.push(std::mem::take(&mut self.current));
        } else {
            self.current.clear();
        }
    }
}

impl ttf_parser::OutlineBuilder for ContourBuilder<'_> {
    fn move_to(&mut self, x: f32, y: f32) {
        self.flush();
        let p = self.map(x, y);
        self.current.push(p);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let p = self.map(x, y);
        self.current.push(p);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let p0 = self.last();
        let c = self.map(x1, y1);
        let p1 = self.map(x, y);
        for i in 1..=CURVE_STEPS {
            let t = i as f32 / CURVE_STEPS as f32;
            let mt = 1.0 - t;
            self.current.push((
                mt * mt * p0.0 + 2.0 * mt * t * c.0 + t * t * p1.0,
                mt * mt * p0.1 + 2.0 * mt * t * c.1 + t * t * p1.1,
            ));
        }
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let p0 = self.last();
        let c1 = self.map(x1, y1);
        let c2 = self.map(x2, y2);
        let p1 = self.map(x, y);
        for i in 1..=CURVE_STEPS {
            let t = i as f32 / CURVE_STEPS as f32;
            let mt = 1.0 - t;
            let a = mt * mt * mt;
            let b = 3.0 * mt * mt * t;
            let c = 3.0 * mt * t * t;
            let d = t * t * t;
            self.current.push((
                a * p0.0 + b * c1.0 + c * c2.0 + d * p1.0,
                a * p0.1 + b * c1.1 + c * c2.1 + d * p1.1,
            ));
        }
    }

    fn close(&mut self) {
        self.flush();
    }
}

/// Word-wrap text to fit within `max_width` pixels. Returns a vec of lines.
pub fn wrap_text(
    text: &str,
    font_size: f32,
    bold: bool,
    italic: bool,
    family: &str,
    max_width: f32,
    fonts: &FontManager,
) -> Vec<String> {
    if max_width <= 0.0 || text.is_empty() {
        return vec![text.to_string()];
    }

    let mut lines: Vec<String> = Vec::new();
    // Split on existing newlines first
    for paragraph in text.split('\n') {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        if words.is_empty() {
            lines.push(String::new());
            continue;
        }

        let mut current_line = String::new();
        for word in &words {
            let candidate = if current_line.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current_line, word)
            };
            let w = fonts.measure_text_width(&candidate, font_size, bold, italic, family);
            if w > max_width && !current_line.is_empty() {
                lines.push(current_line);
                current_line = word.to_string();
            } else {
                current_line = candidate;
            }
        }
        if !current_line.is_empty() {
            lines.push(current_line);
        }
    }

    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}
