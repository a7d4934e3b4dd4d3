//! The live document – the export target together with what is needed to
//! measure it (viewport width and fonts).

use std::sync::Arc;

use crate::dom::{parse_document, ElementNode};
use crate::fonts::FontManager;
use crate::layout::layout_root;

/// Layout measurements of one element child of the export root.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChildMetrics {
    /// Border-box top relative to the root (an element's offset top).
    pub top: f32,
    pub height: f32,
    /// Computed top margin.
    pub margin_top: f32,
}

/// Measurements of the root's element children, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMetrics {
    pub content_height: f32,
    pub children: Vec<ChildMetrics>,
}

impl DocumentMetrics {
    /// Offset top of the `n`-th element child, or 0 when out of range.
    pub fn top(&self, n: usize) -> f32 {
        self.children.get(n).map(|m| m.top).unwrap_or(0.0)
    }
}

/// A rendered document as shown to the user.
///
/// The tree is only ever changed through
/// [`mark_slice_indices`](crate::isolation::mark_slice_indices), whose guard
/// restores it.
pub struct LiveDocument {
    root: ElementNode,
    viewport_width: f32,
    fonts: Arc<FontManager>,
}

impl LiveDocument {
    pub fn new(root: ElementNode, viewport_width: f32, fonts: Arc<FontManager>) -> Self {
        Self {
            root,
            viewport_width,
            fonts,
        }
    }

    /// Parse rendered HTML and use its content container as the root.
    pub fn from_html(html: &str, viewport_width: f32, fonts: Arc<FontManager>) -> Self {
        Self::new(parse_document(html), viewport_width, fonts)
    }

    pub fn root(&self) -> &ElementNode {
        &self.root
    }

    pub(crate) fn root_mut(&mut self) -> &mut ElementNode {
        &mut self.root
    }

    pub fn fonts(&self) -> &Arc<FontManager> {
        &self.fonts
    }

    /// Rendered width of the root's content box plus padding.
    pub fn client_width(&self) -> f32 {
        self.viewport_width
    }

    /// Lay the document out and report where each element child sits.
    ///
    /// Children that are not displayed report the top of the element before
    /// them so that tops stay monotonic.
    pub fn measure(&self) -> Result<DocumentMetrics, String> {
        let layout = layout_root(&self.root, self.viewport_width, &self.fonts)?;
        let mut children = Vec::new();
        let mut last_top = 0.0f32;
        for (child, slot) in self.root.children.iter().zip(&layout.child_boxes) {
            if !matches!(child, crate::dom::DomNode::Element(_)) {
                continue;
            }
            let metrics = match slot.and_then(|i| layout.root.children.get(i)) {
                Some(b) if b.is_displayed() => ChildMetrics {
                    top: b.y,
                    height: b.height,
                    margin_top: b.style.margin_top,
                },
                _ => ChildMetrics {
                    top: last_top,
                    height: 0.0,
                    margin_top: 0.0,
                },
            };
            last_top = metrics.top;
            children.push(metrics);
        }
        Ok(DocumentMetrics {
            content_height: layout.root.height,
            children,
        })
    }
}
