//! Export configuration – serializable, every field defaulted.

use serde::{Deserialize, Serialize};

use crate::boundary::{BoundarySelector, DEFAULT_BOUNDARY_SELECTOR};
use crate::compose::DEFAULT_PAGE_OVERSCAN_PT;
use crate::error::{ExportError, Result};
use crate::raster::{DEFAULT_IGNORE_SELECTOR, DEFAULT_MAX_RASTER_HEIGHT};
use crate::style::Color;

/// Tunables of a slicing export.
///
/// Missing JSON fields take their defaults, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Elements allowed to start a page.
    pub boundary_selector: String,
    /// Elements left out of every capture.
    pub ignore_selector: String,
    /// JPEG quality of embedded pages, 0–1.
    pub jpeg_quality: f32,
    pub device_pixel_ratio: f32,
    /// Page width in points at a device pixel ratio of 1.
    pub page_width_pt: f32,
    /// Height / width of a reference device page.
    pub reference_aspect: f32,
    /// Minimum slice height in reference pages.
    pub page_count_factor: f32,
    /// Rasterizer output ceiling in device pixels.
    pub max_raster_height: u32,
    /// CSS colour behind every capture and page.
    pub background: String,
    pub page_overscan_pt: f32,
    /// Treat non-data-URI images as tainted instead of skipping them.
    pub strict_resources: bool,
    /// PDF document title.
    pub title: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            boundary_selector: DEFAULT_BOUNDARY_SELECTOR.to_string(),
            ignore_selector: DEFAULT_IGNORE_SELECTOR.to_string(),
            jpeg_quality: 0.85,
            device_pixel_ratio: 1.0,
            page_width_pt: 1080.0,
            reference_aspect: 16.0 / 9.0,
            page_count_factor: 3.0,
            max_raster_height: DEFAULT_MAX_RASTER_HEIGHT,
            background: "#ffffff".to_string(),
            page_overscan_pt: DEFAULT_PAGE_OVERSCAN_PT,
            strict_resources: false,
            title: "pdf-slicer output".to_string(),
        }
    }
}

impl ExportConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ExportError::Configuration(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn boundary(&self) -> Result<BoundarySelector> {
        BoundarySelector::parse(&self.boundary_selector)
    }

    pub fn ignore(&self) -> Result<BoundarySelector> {
        BoundarySelector::parse(&self.ignore_selector)
    }

    pub fn background_color(&self) -> Result<Color> {
        Color::from_css(&self.background).ok_or_else(|| {
            ExportError::Configuration(format!("unsupported background colour {:?}", self.background))
        })
    }

    /// Check every field, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.boundary()?;
        self.ignore()?;
        self.background_color()?;
        let positive = [
            ("device_pixel_ratio", self.device_pixel_ratio),
            ("page_width_pt", self.page_width_pt),
            ("reference_aspect", self.reference_aspect),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ExportError::Configuration(format!("{name} must be positive, got {value}")));
            }
        }
        if !(self.jpeg_quality > 0.0 && self.jpeg_quality <= 1.0) {
            return Err(ExportError::Configuration(format!(
                "jpeg_quality must be in (0, 1], got {}",
                self.jpeg_quality
            )));
        }
        if !(self.page_count_factor.is_finite() && self.page_count_factor >= 0.0) {
            return Err(ExportError::Configuration(format!(
                "page_count_factor must not be negative, got {}",
                self.page_count_factor
            )));
        }
        if self.max_raster_height == 0 {
            return Err(ExportError::Configuration("max_raster_height must not be zero".into()));
        }
        Ok(())
    }

    /// Height of one reference device page for content `width` px wide.
    pub fn reference_page_height(&self, width: f32) -> f32 {
        width * self.reference_aspect
    }

    /// Smallest slice height worth a page of its own.
    pub fn min_slice_height(&self, width: f32) -> f32 {
        self.reference_page_height(width) * self.page_count_factor
    }

    /// Largest slice height the rasterizer can take, in CSS px.
    ///
    /// One reference page is kept in reserve so that the overshoot past the
    /// last candidate still fits.
    pub fn max_slice_height(&self, width: f32, raster_limit: u32) -> f32 {
        (raster_limit as f32 / self.device_pixel_ratio).floor() - self.reference_page_height(width)
    }

    /// Width of every page, in points.
    pub fn page_width(&self) -> f32 {
        self.page_width_pt * self.device_pixel_ratio
    }
}
