//! Layout engine – uses Taffy to compute block flow for a styled DOM tree,
//! then converts the result into a tree of positioned boxes.
//!
//! Block elements become flex columns; consecutive inline children are
//! merged into one anonymous text leaf that is word-wrapped at build time.

use std::collections::HashMap;
use taffy::prelude::*;

use crate::dom::{ElementNode, Tag};
use crate::fonts::{wrap_text, FontManager};
use crate::style::{
    self, build_styled_children, resolve_style, ComputedStyle, FontStyle as CssFontStyle,
    FontWeight, StyledNode,
};

// ---------------------------------------------------------------------------
// Intermediate layout tree
// ---------------------------------------------------------------------------

/// A positioned box, coordinates relative to the laid-out root's top-left.
#[derive(Debug, Clone)]
pub struct PositionedBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub style: ComputedStyle,
    pub content: BoxContent,
    pub children: Vec<PositionedBox>,
}

impl PositionedBox {
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn is_displayed(&self) -> bool {
        self.style.display != style::Display::None
    }
}

#[derive(Debug, Clone)]
pub enum BoxContent {
    None,
    Text {
        text: String,
        lines: Vec<String>,
    },
    Image {
        src: String,
    },
    /// List item marker drawn in the left gutter.
    ListItem {
        marker: String,
    },
    /// Horizontal rule.
    Rule,
}

/// Layout of an export root and the mapping from its DOM children to boxes.
#[derive(Debug, Clone)]
pub struct RootLayout {
    pub root: PositionedBox,
    /// For each entry of `ElementNode::children`, the index of its box in
    /// `root.children` (`None` for dropped whitespace text).
    pub child_boxes: Vec<Option<usize>>,
}

// ---------------------------------------------------------------------------
// Build Taffy tree from styled nodes
// ---------------------------------------------------------------------------

struct LayoutBuilder<'a> {
    taffy: TaffyTree<()>,
    fonts: &'a FontManager,
    node_styles: HashMap<NodeId, ComputedStyle>,
    node_content: HashMap<NodeId, BoxContent>,
}

type BuildResult = Result<NodeId, String>;

fn taffy_err(e: taffy::TaffyError) -> String {
    format!("taffy: {e}")
}

impl<'a> LayoutBuilder<'a> {
    fn new(fonts: &'a FontManager) -> Self {
        Self {
            taffy: TaffyTree::new(),
            fonts,
            node_styles: HashMap::new(),
            node_content: HashMap::new(),
        }
    }

    /// Collect all text content from an inline subtree (spans, text nodes).
    fn collect_inline_text(node: &StyledNode) -> String {
        match node {
            StyledNode::Text { text, .. } => text.clone(),
            StyledNode::Element {
                tag: Tag::Br, ..
            } => "\n".to_string(),
            StyledNode::Element { children, .. } => {
                children.iter().map(Self::collect_inline_text).collect()
            }
        }
    }

    fn is_inline(node: &StyledNode) -> bool {
        match node {
            StyledNode::Text { .. } => true,
            StyledNode::Element { style, .. } => style.display == style::Display::Inline,
        }
    }

    fn build_node(&mut self, styled: &StyledNode, parent_width: f32) -> BuildResult {
        match styled {
            StyledNode::Text { text, style } => {
                self.build_text_node(text.clone(), style, parent_width)
            }
            StyledNode::Element {
                tag,
                style,
                children,
                attrs,
            } => {
                if style.display == style::Display::Inline {
                    // A lone inline element outside any run: lay it out as text.
                    let text = Self::collect_inline_text(styled);
                    return self.build_text_node(text, style, parent_width);
                }
                self.build_element_node(tag, style, children, attrs, parent_width)
            }
        }
    }

    fn build_text_node(&mut self, text: String, style: &ComputedStyle, max_w: f32) -> BuildResult {
        let bold = style.font_weight == FontWeight::Bold;
        let italic = style.font_style == CssFontStyle::Italic;
        let family = &style.font_family;
        let font_size = style.font_size;
        let line_height_px = self.fonts.line_height_px(font_size, style.line_height);

        let lines = if style.preserve_whitespace {
            text.trim_matches('\n')
                .split('\n')
                .map(|l| l.trim_end().replace('\t', "    "))
                .collect()
        } else {
            // Collapse whitespace within each line; `<br>` survives as '\n'.
            let normalised = text
                .split('\n')
                .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
                .collect::<Vec<_>>()
                .join("\n");
            wrap_text(
                normalised.trim(),
                font_size,
                bold,
                italic,
                family,
                max_w,
                self.fonts,
            )
        };

        let text_height = lines.len() as f32 * line_height_px;
        let taffy_style = Style {
            display: if style.display == style::Display::None {
                taffy::Display::None
            } else {
                taffy::Display::Block
            },
            size: Size {
                width: Dimension::Auto,
                height: Dimension::Length(text_height),
            },
            ..Default::default()
        };

        let node = self.taffy.new_leaf(taffy_style).map_err(taffy_err)?;
        self.node_styles.insert(node, style.clone());
        self.node_content.insert(node, BoxContent::Text { text, lines });
        Ok(node)
    }

    fn build_element_node(
        &mut self,
        tag: &Tag,
        style: &ComputedStyle,
        children: &[StyledNode],
        attrs: &HashMap<String, String>,
        parent_width: f32,
    ) -> BuildResult {
        let my_width = match style.width {
            style::Dimension::Px(w) => w,
            style::Dimension::Percent(p) => parent_width * p / 100.0,
            style::Dimension::Auto => parent_width - style.margin_left - style.margin_right,
        };
        let inner_width = (my_width
            - style.padding_left
            - style.padding_right
            - style.border_left_width
            - 2.0 * style.border_width)
            .max(1.0);

        // Table rows share their width equally between cells.
        let child_build_width = if *tag == Tag::Tr {
            let cells = children
                .iter()
                .filter(|c| matches!(c, StyledNode::Element { .. }))
                .count()
                .max(1);
            (inner_width / cells as f32).max(1.0)
        } else {
            inner_width
        };

        let mut child_nodes = Vec::new();
        let mut list_counter = 0u32;
        let mut run: Vec<&StyledNode> = Vec::new();

        for child in children {
            if Self::is_inline(child) {
                run.push(child);
                continue;
            }
            if let Some(id) = self.flush_inline_run(&mut run, style, child_build_width)? {
                child_nodes.push(id);
            }

            // For list items, compute and record the marker string so it can
            // be rendered as a bullet / number in the left gutter.
            let li_marker = match child {
                StyledNode::Element { tag: Tag::Li, .. } => {
                    list_counter += 1;
                    Some(if *tag == Tag::Ol {
                        format!("{}.", list_counter)
                    } else {
                        "\u{2022}".to_string()
                    })
                }
                _ => None,
            };

            let child_id = self.build_node(child, child_build_width)?;
            if let Some(marker) = li_marker {
                self.node_content
                    .insert(child_id, BoxContent::ListItem { marker });
            }
            child_nodes.push(child_id);
        }
        if let Some(id) = self.flush_inline_run(&mut run, style, child_build_width)? {
            child_nodes.push(id);
        }

        // For <img> elements, resolve Auto width/height to concrete pixel
        // dimensions using the image's intrinsic size from its data URI.
        let style_override = if *tag == Tag::Img {
            let src = attrs.get("src").map(|s| s.as_str()).unwrap_or("");
            resolve_img_auto_dimensions(src, style, inner_width.max(my_width))
        } else {
            None
        };

        let effective_style = style_override.as_ref().unwrap_or(style);
        let taffy_style = computed_to_taffy(effective_style, tag);
        let node = self
            .taffy
            .new_with_children(taffy_style, &child_nodes)
            .map_err(taffy_err)?;
        self.node_styles.insert(node, effective_style.clone());

        match tag {
            Tag::Img => {
                let src = attrs.get("src").cloned().unwrap_or_default();
                self.node_content.insert(node, BoxContent::Image { src });
            }
            Tag::Hr => {
                self.node_content.insert(node, BoxContent::Rule);
            }
            _ => {}
        }

        Ok(node)
    }

    /// Merge a run of inline siblings into one anonymous text leaf.
    fn flush_inline_run(
        &mut self,
        run: &mut Vec<&StyledNode>,
        block_style: &ComputedStyle,
        width: f32,
    ) -> Result<Option<NodeId>, String> {
        if run.is_empty() {
            return Ok(None);
        }
        let text: String = run.iter().map(|n| Self::collect_inline_text(n)).collect();
        // A run made of a single element (e.g. `<strong>`) keeps its style.
        let style = match run.as_slice() {
            [single] => single.style().clone(),
            _ => {
                let mut s = block_style.clone();
                s.display = style::Display::Inline;
                s.background_color = style::Color::TRANSPARENT;
                s.border_width = 0.0;
                s.border_left_width = 0.0;
                s
            }
        };
        run.clear();
        if text.trim().is_empty() && !style.preserve_whitespace {
            return Ok(None);
        }
        self.build_text_node(text, &style, width).map(Some)
    }

    /// Extract positioned boxes after layout computation.
    fn extract(&self, node: NodeId, offset_x: f32, offset_y: f32) -> Result<PositionedBox, String> {
        let layout = self.taffy.layout(node).map_err(taffy_err)?;
        let style = self.node_styles.get(&node).cloned().unwrap_or_default();
        let content = self
            .node_content
            .get(&node)
            .cloned()
            .unwrap_or(BoxContent::None);

        let x = offset_x + layout.location.x;
        let y = offset_y + layout.location.y;

        let children = self
            .taffy
            .children(node)
            .map_err(taffy_err)?
            .iter()
            .map(|&child| self.extract(child, x, y))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PositionedBox {
            x,
            y,
            width: layout.size.width,
            height: layout.size.height,
            style,
            content,
            children,
        })
    }
}

fn computed_to_taffy(s: &ComputedStyle, tag: &Tag) -> Style {
    let mut ts = Style {
        display: taffy::Display::Flex,
        flex_direction: taffy::FlexDirection::Column,
        ..Default::default()
    };

    match s.display {
        style::Display::None => {
            ts.display = taffy::Display::None;
            return ts;
        }
        style::Display::TableRow => {
            ts.flex_direction = taffy::FlexDirection::Row;
            ts.align_items = Some(taffy::AlignItems::Stretch);
        }
        style::Display::TableCell => {
            ts.flex_grow = 1.0;
            ts.flex_shrink = 1.0;
            ts.flex_basis = Dimension::Length(0.0); // equal columns
        }
        _ => {}
    }

    ts.size = Size {
        width: dim_to_taffy(s.width),
        height: dim_to_taffy(s.height),
    };
    ts.min_size.width = Dimension::Length(0.0);
    if *tag == Tag::Img {
        // Images never overflow their container (max-width: 100%).
        ts.max_size.width = Dimension::Percent(1.0);
    }

    ts.margin = Rect {
        top: LengthPercentageAuto::Length(s.margin_top),
        right: LengthPercentageAuto::Length(s.margin_right),
        bottom: LengthPercentageAuto::Length(s.margin_bottom),
        left: LengthPercentageAuto::Length(s.margin_left),
    };
    ts.padding = Rect {
        top: LengthPercentage::Length(s.padding_top),
        right: LengthPercentage::Length(s.padding_right),
        bottom: LengthPercentage::Length(s.padding_bottom),
        left: LengthPercentage::Length(s.padding_left),
    };
    ts.border = Rect {
        top: LengthPercentage::Length(s.border_width),
        right: LengthPercentage::Length(s.border_width),
        bottom: LengthPercentage::Length(s.border_width),
        left: LengthPercentage::Length(s.border_width + s.border_left_width),
    };

    ts
}

fn dim_to_taffy(d: style::Dimension) -> Dimension {
    match d {
        style::Dimension::Auto => Dimension::Auto,
        style::Dimension::Px(v) => Dimension::Length(v),
        style::Dimension::Percent(v) => Dimension::Percent(v / 100.0),
    }
}

// ---------------------------------------------------------------------------
// Image intrinsic-size helper
// ---------------------------------------------------------------------------

/// Decode a base64 data-URI image and return a cloned [`ComputedStyle`] with
/// any `Auto` width/height replaced by concrete pixel values derived from the
/// image's intrinsic dimensions, scaled down to `max_width`.
///
/// Returns `None` when the src is not a parseable base64 data URI, when image
/// decoding fails, or when both dimensions are already specified.
fn resolve_img_auto_dimensions(
    src: &str,
    style: &ComputedStyle,
    max_width: f32,
) -> Option<ComputedStyle> {
    let bytes = crate::raster::decode_data_uri(src).ok()?;
    let img = ::image::load_from_memory(&bytes).ok()?;
    let (px_w, px_h) = (img.width() as f32, img.height() as f32);
    if px_w == 0.0 || px_h == 0.0 {
        return None;
    }
    let aspect = px_w / px_h;

    let known_w = match style.width {
        style::Dimension::Px(v) => Some(v),
        style::Dimension::Percent(p) => Some(max_width * p / 100.0),
        style::Dimension::Auto => None,
    };
    let known_h = match style.height {
        style::Dimension::Px(v) => Some(v),
        _ => None,
    };

    let mut s = style.clone();
    match (known_w, known_h) {
        (Some(w), None) => s.height = style::Dimension::Px((w / aspect).max(1.0)),
        (None, Some(h)) => s.width = style::Dimension::Px((h * aspect).max(1.0)),
        (None, None) => {
            let w = px_w.min(max_width);
            s.width = style::Dimension::Px(w);
            s.height = style::Dimension::Px((w / aspect).max(1.0));
        }
        (Some(_), Some(_)) => return None,
    }
    Some(s)
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Lay out an export root at a given viewport width.
///
/// The root's own box starts at (0, 0); every box position is relative to
/// it, which makes `y` the equivalent of an element's offset top.
pub fn layout_root(
    root: &ElementNode,
    viewport_width: f32,
    fonts: &FontManager,
) -> Result<RootLayout, String> {
    let root_style = resolve_style(root, None);
    let styled = build_styled_children(root, &root_style);

    let inner_width = (viewport_width
        - root_style.padding_left
        - root_style.padding_right
        - 2.0 * root_style.border_width)
        .max(1.0);

    let mut builder = LayoutBuilder::new(fonts);
    let mut child_ids = Vec::new();
    let mut slots = Vec::with_capacity(styled.len());
    for node in &styled {
        match node {
            Some(node) => {
                slots.push(Some(child_ids.len()));
                child_ids.push(builder.build_node(node, inner_width)?);
            }
            None => slots.push(None),
        }
    }

    let mut taffy_root = computed_to_taffy(&root_style, &root.tag);
    taffy_root.display = taffy::Display::Flex;
    taffy_root.size.width = Dimension::Length(viewport_width);
    taffy_root.size.height = Dimension::Auto;
    taffy_root.margin = Rect {
        top: LengthPercentageAuto::Length(0.0),
        right: LengthPercentageAuto::Length(0.0),
        bottom: LengthPercentageAuto::Length(0.0),
        left: LengthPercentageAuto::Length(0.0),
    };

    let root_id = builder
        .taffy
        .new_with_children(taffy_root, &child_ids)
        .map_err(taffy_err)?;
    builder.node_styles.insert(root_id, root_style);

    builder
        .taffy
        .compute_layout(
            root_id,
            Size {
                width: AvailableSpace::Definite(viewport_width),
                height: AvailableSpace::MaxContent,
            },
        )
        .map_err(taffy_err)?;

    Ok(RootLayout {
        root: builder.extract(root_id, 0.0, 0.0)?,
        child_boxes: slots,
    })
}
