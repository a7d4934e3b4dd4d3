//! Style resolver – maps tag defaults and CSS inline styles to a flat
//! [`ComputedStyle`] struct consumed by the layout engine.
//!
//! The resolver also carries the declarative visibility rule for export
//! clones: inside a root marked by [`isolate`](crate::isolation::isolate),
//! only the children from the show marker up to (not including) the hide
//! marker are displayed.

use crate::dom::{DomNode, ElementNode, Tag};
use crate::isolation::{EXPORT_CLONE_ATTR, HIDE_FROM_ATTR, SHOW_FROM_ATTR};

/// Fully resolved style for a single element.
#[derive(Debug, Clone)]
pub struct ComputedStyle {
    pub display: Display,

    // Sizing
    pub width: Dimension,
    pub height: Dimension,

    // Spacing (px)
    pub margin_top: f32,
    pub margin_right: f32,
    pub margin_bottom: f32,
    pub margin_left: f32,
    pub padding_top: f32,
    pub padding_right: f32,
    pub padding_bottom: f32,
    pub padding_left: f32,

    // Border
    pub border_width: f32,
    pub border_color: Color,
    /// Left rule only (blockquotes).
    pub border_left_width: f32,

    // Typography
    pub font_size: f32,
    pub font_weight: FontWeight,
    pub font_family: String,
    pub color: Color,
    pub text_align: TextAlign,
    pub line_height: f32,
    pub text_decoration: TextDecoration,
    pub font_style: FontStyle,
    pub preserve_whitespace: bool,

    // Background
    pub background_color: Color,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: Display::Block,
            width: Dimension::Auto,
            height: Dimension::Auto,
            margin_top: 0.0,
            margin_right: 0.0,
            margin_bottom: 0.0,
            margin_left: 0.0,
            padding_top: 0.0,
            padding_right: 0.0,
            padding_bottom: 0.0,
            padding_left: 0.0,
            border_width: 0.0,
            border_color: Color::BLACK,
            border_left_width: 0.0,
            font_size: 16.0,
            font_weight: FontWeight::Normal,
            font_family: "Helvetica".to_string(),
            color: Color::BLACK,
            text_align: TextAlign::Left,
            line_height: 1.5,
            text_decoration: TextDecoration::None,
            font_style: FontStyle::Normal,
            preserve_whitespace: false,
            background_color: Color::TRANSPARENT,
        }
    }
}

// ---------------------------------------------------------------------------
// Supporting enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    Block,
    Inline,
    ListItem,
    Table,
    TableRow,
    TableCell,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontWeight {
    Normal,
    Bold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextDecoration {
    None,
    Underline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontStyle {
    Normal,
    Italic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dimension {
    Auto,
    Px(f32),
    Percent(f32),
}

/// RGBA colour (0.0 – 1.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
    pub const WHITE: Self = Self {
        r: 1.0,
        g: 1.0,
        b: 1.0,
        a: 1.0,
    };
    pub const TRANSPARENT: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn is_transparent(&self) -> bool {
        self.a < 0.001
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim_start_matches('#');
        if !hex.is_ascii() {
            return None;
        }
        if hex.len() == 6 {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()? as f32 / 255.0;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()? as f32 / 255.0;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()? as f32 / 255.0;
            Some(Self { r, g, b, a: 1.0 })
        } else if hex.len() == 3 {
            let r = u8::from_str_radix(&hex[0..1].repeat(2), 16).ok()? as f32 / 255.0;
            let g = u8::from_str_radix(&hex[1..2].repeat(2), 16).ok()? as f32 / 255.0;
            let b = u8::from_str_radix(&hex[2..3].repeat(2), 16).ok()? as f32 / 255.0;
            Some(Self { r, g, b, a: 1.0 })
        } else {
            None
        }
    }

    /// Parse a hex colour or one of a handful of CSS colour keywords.
    pub fn from_css(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.starts_with('#') {
            return Self::from_hex(value);
        }
        match value.to_ascii_lowercase().as_str() {
            "black" => Some(Self::BLACK),
            "white" => Some(Self::WHITE),
            "transparent" => Some(Self::TRANSPARENT),
            "red" => Some(Self::rgb(1.0, 0.0, 0.0)),
            "green" => Some(Self::rgb(0.0, 0.502, 0.0)),
            "blue" => Some(Self::rgb(0.0, 0.0, 1.0)),
            "gray" | "grey" => Some(Self::rgb(0.502, 0.502, 0.502)),
            _ => None,
        }
    }

    /// Channels as 8-bit RGB, compositing alpha over `backdrop`.
    pub fn to_rgb8_over(&self, backdrop: [u8; 3]) -> [u8; 3] {
        let mix = |c: f32, b: u8| -> u8 {
            let v = c * self.a + (b as f32 / 255.0) * (1.0 - self.a);
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        };
        [
            mix(self.r, backdrop[0]),
            mix(self.g, backdrop[1]),
            mix(self.b, backdrop[2]),
        ]
    }
}

const RULE_GRAY: Color = Color::rgb(0.8, 0.8, 0.8);
const CODE_BACKGROUND: Color = Color::rgb(0.95, 0.95, 0.95);
const LINK_BLUE: Color = Color::rgb(0.012, 0.4, 0.839);

// ---------------------------------------------------------------------------
// Style resolution
// ---------------------------------------------------------------------------

/// Resolve the style for an element, inheriting text properties from its parent.
pub fn resolve_style(element: &ElementNode, parent: Option<&ComputedStyle>) -> ComputedStyle {
    let mut style = ComputedStyle::default();

    // Inherit text properties before tag defaults so headings can override.
    if let Some(p) = parent {
        style.font_size = p.font_size;
        style.font_weight = p.font_weight;
        style.font_family = p.font_family.clone();
        style.color = p.color;
        style.text_align = p.text_align;
        style.line_height = p.line_height;
        style.font_style = p.font_style;
        style.text_decoration = p.text_decoration;
        style.preserve_whitespace = p.preserve_whitespace;
    }

    apply_tag_defaults(&mut style, &element.tag);

    if let Some(inline) = element.inline_style() {
        apply_inline_style(&mut style, inline);
    }

    style
}

/// Default styles based on tag semantics (a plain markdown theme).
fn apply_tag_defaults(s: &mut ComputedStyle, tag: &Tag) {
    let heading = |s: &mut ComputedStyle, size: f32| {
        s.font_size = size;
        s.font_weight = FontWeight::Bold;
        s.line_height = 1.25;
        s.margin_top = 24.0;
        s.margin_bottom = 16.0;
    };
    match tag {
        Tag::H1 => {
            heading(s, 32.0);
            s.padding_bottom = 6.0;
        }
        Tag::H2 => heading(s, 24.0),
        Tag::H3 => heading(s, 20.0),
        Tag::H4 => heading(s, 16.0),
        Tag::H5 => heading(s, 14.0),
        Tag::H6 => heading(s, 13.6),
        Tag::P => {
            s.margin_bottom = 16.0;
        }
        Tag::Ul | Tag::Ol => {
            s.margin_bottom = 16.0;
            s.padding_left = 32.0;
        }
        Tag::Li => {
            s.display = Display::ListItem;
            s.margin_bottom = 4.0;
        }
        Tag::Blockquote => {
            s.margin_bottom = 16.0;
            s.padding_left = 16.0;
            s.border_left_width = 4.0;
            s.border_color = RULE_GRAY;
            s.color = Color::rgb(0.4, 0.4, 0.4);
        }
        Tag::Pre => {
            s.margin_bottom = 16.0;
            s.padding_top = 16.0;
            s.padding_right = 16.0;
            s.padding_bottom = 16.0;
            s.padding_left = 16.0;
            s.font_family = "Courier".to_string();
            s.font_size = 13.6;
            s.background_color = CODE_BACKGROUND;
            s.preserve_whitespace = true;
        }
        Tag::Code => {
            s.display = Display::Inline;
            s.font_family = "Courier".to_string();
        }
        Tag::Hr => {
            s.margin_top = 24.0;
            s.margin_bottom = 24.0;
            s.height = Dimension::Px(4.0);
            s.background_color = RULE_GRAY;
        }
        Tag::Br | Tag::Span => {
            s.display = Display::Inline;
        }
        Tag::Em => {
            s.display = Display::Inline;
            s.font_style = FontStyle::Italic;
        }
        Tag::Strong => {
            s.display = Display::Inline;
            s.font_weight = FontWeight::Bold;
        }
        Tag::A => {
            s.display = Display::Inline;
            s.color = LINK_BLUE;
            s.text_decoration = TextDecoration::Underline;
        }
        Tag::Table => {
            s.display = Display::Table;
            s.margin_bottom = 16.0;
        }
        Tag::Tr => {
            s.display = Display::TableRow;
        }
        Tag::Td | Tag::Th => {
            s.display = Display::TableCell;
            s.padding_top = 6.0;
            s.padding_right = 13.0;
            s.padding_bottom = 6.0;
            s.padding_left = 13.0;
            s.border_width = 1.0;
            s.border_color = RULE_GRAY;
            if *tag == Tag::Th {
                s.font_weight = FontWeight::Bold;
            }
        }
        Tag::Img => {
            s.display = Display::Block;
        }
        Tag::Div | Tag::Article | Tag::Section | Tag::Main | Tag::Body | Tag::Html => {}
        Tag::Head | Tag::Unknown(_) => {
            s.display = Display::None;
        }
    }
}

// ---------------------------------------------------------------------------
// Inline style parsing (limited subset)
// ---------------------------------------------------------------------------

fn apply_inline_style(s: &mut ComputedStyle, style_str: &str) {
    for decl in style_str.split(';') {
        let decl = decl.trim();
        if decl.is_empty() {
            continue;
        }
        let mut parts = decl.splitn(2, ':');
        let prop = match parts.next() {
            Some(p) => p.trim().to_ascii_lowercase(),
            None => continue,
        };
        let val = match parts.next() {
            Some(v) => v.trim(),
            None => continue,
        };
        apply_css_property(s, &prop, val);
    }
}

fn apply_css_property(s: &mut ComputedStyle, prop: &str, val: &str) {
    let font_size = s.font_size;
    let px = |v: &str| parse_length(v, font_size);
    match prop {
        "display" => {
            s.display = match val {
                "block" => Display::Block,
                "inline" | "inline-block" => Display::Inline,
                "list-item" => Display::ListItem,
                "none" => Display::None,
                _ => s.display,
            }
        }
        "font-size" => {
            if let Some(v) = px(val) {
                s.font_size = v;
            }
        }
        "font-weight" => {
            s.font_weight = match val {
                "bold" | "bolder" | "600" | "700" | "800" | "900" => FontWeight::Bold,
                _ => FontWeight::Normal,
            }
        }
        "font-style" => {
            s.font_style = match val {
                "italic" | "oblique" => FontStyle::Italic,
                _ => FontStyle::Normal,
            }
        }
        "font-family" => {
            if let Some(first) = val.split(',').next() {
                let family = first.trim().trim_matches(|c| c == '\'' || c == '"');
                if !family.is_empty() {
                    s.font_family = family.to_string();
                }
            }
        }
        "color" => {
            if let Some(c) = Color::from_css(val) {
                s.color = c;
            }
        }
        "background-color" | "background" => {
            if let Some(c) = Color::from_css(val) {
                s.background_color = c;
            }
        }
        "text-align" => {
            s.text_align = match val {
                "center" => TextAlign::Center,
                "right" | "end" => TextAlign::Right,
                _ => TextAlign::Left,
            }
        }
        "text-decoration" => {
            s.text_decoration = if val.contains("underline") {
                TextDecoration::Underline
            } else {
                TextDecoration::None
            }
        }
        "width" => s.width = parse_dimension(val, font_size),
        "height" => s.height = parse_dimension(val, font_size),
        "margin" => apply_shorthand_spacing(
            val,
            font_size,
            [
                &mut s.margin_top,
                &mut s.margin_right,
                &mut s.margin_bottom,
                &mut s.margin_left,
            ],
        ),
        "margin-top" => set_if_some(&mut s.margin_top, px(val)),
        "margin-right" => set_if_some(&mut s.margin_right, px(val)),
        "margin-bottom" => set_if_some(&mut s.margin_bottom, px(val)),
        "margin-left" => set_if_some(&mut s.margin_left, px(val)),
        "padding" => apply_shorthand_spacing(
            val,
            font_size,
            [
                &mut s.padding_top,
                &mut s.padding_right,
                &mut s.padding_bottom,
                &mut s.padding_left,
            ],
        ),
        "padding-top" => set_if_some(&mut s.padding_top, px(val)),
        "padding-right" => set_if_some(&mut s.padding_right, px(val)),
        "padding-bottom" => set_if_some(&mut s.padding_bottom, px(val)),
        "padding-left" => set_if_some(&mut s.padding_left, px(val)),
        "border-width" | "border" => {
            if let Some(v) = val.split_whitespace().find_map(|p| parse_length(p, font_size)) {
                s.border_width = v;
            }
            if let Some(c) = val.split_whitespace().find_map(Color::from_css) {
                s.border_color = c;
            }
        }
        "border-color" => {
            if let Some(c) = Color::from_css(val) {
                s.border_color = c;
            }
        }
        "line-height" => {
            if let Ok(v) = val.parse::<f32>() {
                s.line_height = v;
            } else if let Some(v) = px(val) {
                s.line_height = v / s.font_size;
            }
        }
        "white-space" => {
            s.preserve_whitespace = val.starts_with("pre");
        }
        _ => {}
    }
}

fn set_if_some(slot: &mut f32, value: Option<f32>) {
    if let Some(v) = value {
        *slot = v;
    }
}

/// Parse `12px`, `1.5em`, `2rem` or a bare number into CSS pixels.
fn parse_length(s: &str, font_size: f32) -> Option<f32> {
    let s = s.trim();
    if let Some(v) = s.strip_suffix("rem") {
        return v.trim().parse::<f32>().ok().map(|v| v * 16.0);
    }
    if let Some(v) = s.strip_suffix("em") {
        return v.trim().parse::<f32>().ok().map(|v| v * font_size);
    }
    s.trim_end_matches("px").trim().parse().ok()
}

fn parse_dimension(s: &str, font_size: f32) -> Dimension {
    let s = s.trim();
    if s == "auto" {
        Dimension::Auto
    } else if let Some(pct) = s.strip_suffix('%') {
        pct.parse::<f32>()
            .map(Dimension::Percent)
            .unwrap_or(Dimension::Auto)
    } else {
        parse_length(s, font_size)
            .map(Dimension::Px)
            .unwrap_or(Dimension::Auto)
    }
}

fn apply_shorthand_spacing(val: &str, font_size: f32, [top, right, bottom, left]: [&mut f32; 4]) {
    let parts: Vec<f32> = val
        .split_whitespace()
        .filter_map(|p| parse_length(p, font_size))
        .collect();
    match parts.as_slice() {
        [all] => {
            *top = *all;
            *right = *all;
            *bottom = *all;
            *left = *all;
        }
        [v, h] => {
            *top = *v;
            *bottom = *v;
            *right = *h;
            *left = *h;
        }
        [t, h, b] => {
            *top = *t;
            *right = *h;
            *bottom = *b;
            *left = *h;
        }
        [t, r, b, l] => {
            *top = *t;
            *right = *r;
            *bottom = *b;
            *left = *l;
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Export clone visibility
// ---------------------------------------------------------------------------

/// Visibility of each direct child of `root` under the export clone rule.
///
/// Returns `None` when `root` is not an export clone, in which case every
/// child keeps its own display. Text children follow the element before them.
pub fn clone_visibility(root: &ElementNode) -> Option<Vec<bool>> {
    if !root.has_attr(EXPORT_CLONE_ATTR) {
        return None;
    }
    let mut showing = false;
    let flags = root
        .children
        .iter()
        .map(|child| {
            if let DomNode::Element(e) = child {
                if e.has_attr(SHOW_FROM_ATTR) {
                    showing = true;
                }
                if e.has_attr(HIDE_FROM_ATTR) {
                    showing = false;
                }
            }
            showing
        })
        .collect();
    Some(flags)
}

// ---------------------------------------------------------------------------
// Styled DOM tree
// ---------------------------------------------------------------------------

/// A DOM node annotated with its computed style.
#[derive(Debug, Clone)]
pub enum StyledNode {
    Element {
        tag: Tag,
        style: ComputedStyle,
        children: Vec<StyledNode>,
        /// Original attributes (for images src, etc.)
        attrs: std::collections::HashMap<String, String>,
    },
    Text {
        text: String,
        style: ComputedStyle,
    },
}

impl StyledNode {
    pub fn style(&self) -> &ComputedStyle {
        match self {
            StyledNode::Element { style, .. } | StyledNode::Text { style, .. } => style,
        }
    }
}

/// Build a styled tree from a DOM tree, resolving styles top-down.
///
/// Whitespace-only text nodes are dropped unless whitespace is preserved.
pub fn build_styled_tree(
    nodes: &[DomNode],
    parent_style: Option<&ComputedStyle>,
) -> Vec<StyledNode> {
    let mut result = Vec::new();
    for node in nodes {
        if let Some(styled) = style_node(node, parent_style) {
            result.push(styled);
        }
    }
    result
}

/// Style the children of an export root, applying the clone visibility rule.
///
/// The returned vector has one entry per child of `root`, `None` where the
/// child produces no styled node (e.g. whitespace-only text).
pub fn build_styled_children(root: &ElementNode, root_style: &ComputedStyle) -> Vec<Option<StyledNode>> {
    let visibility = clone_visibility(root);
    root.children
        .iter()
        .enumerate()
        .map(|(i, child)| {
            let mut styled = style_node(child, Some(root_style))?;
            let hidden = visibility.as_ref().is_some_and(|v| !v[i]);
            if hidden {
                match &mut styled {
                    StyledNode::Element { style, .. } | StyledNode::Text { style, .. } => {
                        style.display = Display::None;
                    }
                }
            }
            Some(styled)
        })
        .collect()
}

fn style_node(node: &DomNode, parent_style: Option<&ComputedStyle>) -> Option<StyledNode> {
    match node {
        DomNode::Element(e) => {
            let style = resolve_style(e, parent_style);
            let children = build_styled_tree(&e.children, Some(&style));
            Some(StyledNode::Element {
                tag: e.tag.clone(),
                style,
                children,
                attrs: e.attributes.clone(),
            })
        }
        DomNode::Text(text) => {
            let preserve = parent_style.is_some_and(|p| p.preserve_whitespace);
            if text.trim().is_empty() && !preserve {
                return None;
            }
            let mut style = parent_style.cloned().unwrap_or_default();
            // Text nodes render inline: clear all box-model properties
            // that must not be inherited (border, background, spacing).
            style.display = Display::Inline;
            style.border_width = 0.0;
            style.border_left_width = 0.0;
            style.background_color = Color::TRANSPARENT;
            style.width = Dimension::Auto;
            style.height = Dimension::Auto;
            style.margin_top = 0.0;
            style.margin_right = 0.0;
            style.margin_bottom = 0.0;
            style.margin_left = 0.0;
            style.padding_top = 0.0;
            style.padding_right = 0.0;
            style.padding_bottom = 0.0;
            style.padding_left = 0.0;
            Some(StyledNode::Text {
                text: text.clone(),
                style,
            })
        }
    }
}
