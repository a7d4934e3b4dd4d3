//! HTML parser – converts rendered markdown into a simple DOM tree.
//!
//! We support the subset of elements a markdown renderer emits:
//! - Block: div, article, section, main, p, h1-h6, ul, ol, li, blockquote,
//!   pre, hr, table, tr, td, th, img
//! - Inline: span, a, em, strong, code, br
//! - Styling via the `style` attribute
//!
//! The export target is an [`ElementNode`] whose element children are the
//! candidates for slice boundaries.

use std::collections::HashMap;

// ---------------------------------------------------------------------------
// DOM types
// ---------------------------------------------------------------------------

/// The tag name of a supported element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Div,
    Article,
    Section,
    Main,
    P,
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
    Ul,
    Ol,
    Li,
    Blockquote,
    Pre,
    Code,
    Hr,
    Br,
    Em,
    Strong,
    A,
    Table,
    Tr,
    Td,
    Th,
    Span,
    Img,
    Body,
    Html,
    Head,
    /// Catch-all for unknown tags – they are kept but never rendered.
    Unknown(String),
}

impl Tag {
    pub fn from_name(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "div" => Tag::Div,
            "article" => Tag::Article,
            "section" => Tag::Section,
            "main" => Tag::Main,
            "p" => Tag::P,
            "h1" => Tag::H1,
            "h2" => Tag::H2,
            "h3" => Tag::H3,
            "h4" => Tag::H4,
            "h5" => Tag::H5,
            "h6" => Tag::H6,
            "ul" => Tag::Ul,
            "ol" => Tag::Ol,
            "li" => Tag::Li,
            "blockquote" => Tag::Blockquote,
            "pre" => Tag::Pre,
            "code" => Tag::Code,
            "hr" => Tag::Hr,
            "br" => Tag::Br,
            "em" | "i" => Tag::Em,
            "strong" | "b" => Tag::Strong,
            "a" => Tag::A,
            "table" => Tag::Table,
            "tr" => Tag::Tr,
            "td" => Tag::Td,
            "th" => Tag::Th,
            "span" => Tag::Span,
            "img" => Tag::Img,
            "body" => Tag::Body,
            "html" => Tag::Html,
            "head" => Tag::Head,
            _ => Tag::Unknown(s.to_ascii_lowercase()),
        }
    }

    /// Lower-case tag name as it appears in selectors.
    pub fn name(&self) -> &str {
        match self {
            Tag::Div => "div",
            Tag::Article => "article",
            Tag::Section => "section",
            Tag::Main => "main",
            Tag::P => "p",
            Tag::H1 => "h1",
            Tag::H2 => "h2",
            Tag::H3 => "h3",
            Tag::H4 => "h4",
            Tag::H5 => "h5",
            Tag::H6 => "h6",
            Tag::Ul => "ul",
            Tag::Ol => "ol",
            Tag::Li => "li",
            Tag::Blockquote => "blockquote",
            Tag::Pre => "pre",
            Tag::Code => "code",
            Tag::Hr => "hr",
            Tag::Br => "br",
            Tag::Em => "em",
            Tag::Strong => "strong",
            Tag::A => "a",
            Tag::Table => "table",
            Tag::Tr => "tr",
            Tag::Td => "td",
            Tag::Th => "th",
            Tag::Span => "span",
            Tag::Img => "img",
            Tag::Body => "body",
            Tag::Html => "html",
            Tag::Head => "head",
            Tag::Unknown(name) => name.as_str(),
        }
    }

    pub fn is_heading(&self) -> bool {
        matches!(
            self,
            Tag::H1 | Tag::H2 | Tag::H3 | Tag::H4 | Tag::H5 | Tag::H6
        )
    }

    pub fn is_inline(&self) -> bool {
        matches!(
            self,
            Tag::Span | Tag::A | Tag::Em | Tag::Strong | Tag::Code | Tag::Br
        )
    }

    /// Elements that never have children or a closing tag.
    fn is_void(&self) -> bool {
        matches!(self, Tag::Img | Tag::Hr | Tag::Br)
    }
}

/// A node in our DOM tree.
#[derive(Debug, Clone, PartialEq)]
pub enum DomNode {
    Element(ElementNode),
    Text(String),
}

/// An element node carrying tag, attributes, and children.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementNode {
    pub tag: Tag,
    pub attributes: HashMap<String, String>,
    pub children: Vec<DomNode>,
}

impl ElementNode {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_children(tag: Tag, children: Vec<DomNode>) -> Self {
        Self {
            tag,
            attributes: HashMap::new(),
            children,
        }
    }

    pub fn classes(&self) -> Vec<&str> {
        self.attributes
            .get("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn inline_style(&self) -> Option<&str> {
        self.attr("style")
    }

    pub fn src(&self) -> Option<&str> {
        self.attr("src")
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Set an attribute, returning the value it replaced.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) -> Option<String> {
        self.attributes.insert(name.to_string(), value.into())
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        self.attributes.remove(name)
    }

    /// Element children in document order, skipping text nodes.
    pub fn element_children(&self) -> impl Iterator<Item = &ElementNode> {
        self.children.iter().filter_map(|c| match c {
            DomNode::Element(e) => Some(e),
            DomNode::Text(_) => None,
        })
    }

    pub fn element_children_mut(&mut self) -> impl Iterator<Item = &mut ElementNode> {
        self.children.iter_mut().filter_map(|c| match c {
            DomNode::Element(e) => Some(e),
            DomNode::Text(_) => None,
        })
    }

    pub fn element_child_count(&self) -> usize {
        self.element_children().count()
    }

    /// The `n`-th element child (text nodes are not counted).
    pub fn element_child_mut(&mut self, n: usize) -> Option<&mut ElementNode> {
        self.element_children_mut().nth(n)
    }

    /// Concatenated text of the subtree.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            match child {
                DomNode::Text(t) => out.push_str(t),
                DomNode::Element(e) => out.push_str(&e.text_content()),
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Parser – simple recursive descent over HTML
// ---------------------------------------------------------------------------

/// Parse an HTML string into a list of DOM nodes.
///
/// The hand-written parser covers the controlled subset a markdown renderer
/// produces; unknown tags are kept as [`Tag::Unknown`].
pub fn parse_html(html: &str) -> Vec<DomNode> {
    let mut parser = Parser::new(html);
    parser.parse_nodes()
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_nodes(&mut self) -> Vec<DomNode> {
        let mut nodes = Vec::new();
        loop {
            self.skip_whitespace_preserve();
            if self.eof() || self.starts_with("</") {
                break;
            }
            if let Some(node) = self.parse_node() {
                nodes.push(node);
            }
        }
        nodes
    }

    fn parse_node(&mut self) -> Option<DomNode> {
        if self.starts_with("<!--") {
            self.skip_comment();
            return None;
        }
        if self.starts_with("<!") || self.starts_with("<?") {
            // Skip doctype / processing instructions
            while !self.eof() && !self.starts_with(">") {
                self.advance(1);
            }
            if !self.eof() {
                self.advance(1);
            }
            return None;
        }
        if self.starts_with("<") {
            Some(self.parse_element())
        } else {
            Some(self.parse_text())
        }
    }

    fn parse_text(&mut self) -> DomNode {
        let start = self.pos;
        while !self.eof() && !self.starts_with("<") {
            self.advance(1);
        }
        let text = &self.input[start..self.pos];
        DomNode::Text(decode_entities(text))
    }

    fn parse_element(&mut self) -> DomNode {
        // Consume '<'
        self.advance(1);
        let tag_name = self.parse_tag_name();
        let tag = Tag::from_name(&tag_name);
        let mut elem = ElementNode::new(tag.clone());

        loop {
            self.skip_whitespace();
            if self.eof() || self.starts_with(">") || self.starts_with("/>") {
                break;
            }
            let (key, value) = self.parse_attribute();
            if key.is_empty() {
                // Stray character inside the tag; step over it.
                self.advance(1);
                continue;
            }
            elem.attributes.insert(key, value);
        }

        if self.starts_with("/>") {
            self.advance(2);
            return DomNode::Element(elem);
        }
        if self.starts_with(">") {
            self.advance(1);
        }
        if tag.is_void() {
            return DomNode::Element(elem);
        }

        elem.children = self.parse_nodes();

        // Consume closing tag
        if self.starts_with("</") {
            self.advance(2);
            self.parse_tag_name();
            self.skip_whitespace();
            if self.starts_with(">") {
                self.advance(1);
            }
        }

        DomNode::Element(elem)
    }

    fn parse_tag_name(&mut self) -> String {
        let start = self.pos;
        while !self.eof() {
            let c = self.current_char();
            if c.is_alphanumeric() || c == '-' || c == '_' || c == ':' {
                self.advance(1);
            } else {
                break;
            }
        }
        self.input[start..self.pos].to_string()
    }

    fn parse_attribute(&mut self) -> (String, String) {
        let key = self.parse_tag_name().to_ascii_lowercase();
        self.skip_whitespace();
        if !self.starts_with("=") {
            return (key, String::new());
        }
        self.advance(1);
        self.skip_whitespace();
        let value = self.parse_attr_value();
        (key, value)
    }

    fn parse_attr_value(&mut self) -> String {
        for quote in ["\"", "'"] {
            if self.starts_with(quote) {
                self.advance(1);
                let start = self.pos;
                while !self.eof() && !self.starts_with(quote) {
                    self.advance(1);
                }
                let val = self.input[start..self.pos].to_string();
                if !self.eof() {
                    self.advance(1);
                }
                return decode_entities(&val);
            }
        }
        let start = self.pos;
        while !self.eof() {
            let c = self.current_char();
            if c.is_whitespace() || c == '>' || c == '/' {
                break;
            }
            self.advance(1);
        }
        self.input[start..self.pos].to_string()
    }

    fn skip_whitespace(&mut self) {
        while !self.eof() && self.current_char().is_whitespace() {
            self.advance(1);
        }
    }

    fn skip_whitespace_preserve(&mut self) {
        // Skip runs of pure whitespace between elements.
        let saved = self.pos;
        while !self.eof() && self.current_char().is_whitespace() {
            self.advance(1);
        }
        // If we reached a tag or EOF, keep the skip. Otherwise revert.
        if !self.eof() && !self.starts_with("<") {
            self.pos = saved;
        }
    }

    fn skip_comment(&mut self) {
        self.advance(4);
        while !self.eof() && !self.starts_with("-->") {
            self.advance(1);
        }
        if !self.eof() {
            self.advance(3);
        }
    }

    fn starts_with(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn current_char(&self) -> char {
        self.input[self.pos..].chars().next().unwrap_or('\0')
    }

    fn advance(&mut self, n: usize) {
        // Advance by `n` characters (not bytes).
        for _ in 0..n {
            if let Some(c) = self.input[self.pos..].chars().next() {
                self.pos += c.len_utf8();
            }
        }
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", "\u{00A0}")
        .replace("&amp;", "&")
}

// ---------------------------------------------------------------------------
// Convenience helpers
// ---------------------------------------------------------------------------

/// Find the `<body>` element and return its children, or return all nodes if
/// no `<body>` is present.
pub fn body_children(nodes: &[DomNode]) -> Vec<DomNode> {
    for node in nodes {
        if let DomNode::Element(e) = node {
            if e.tag == Tag::Body {
                return e.children.clone();
            }
            if e.tag == Tag::Html {
                let inner = body_children(&e.children);
                if !inner.is_empty() {
                    return inner;
                }
            }
        }
    }
    nodes.to_vec()
}

/// Parse a rendered document and return the export target.
///
/// A body holding exactly one container element (`div`, `article`, `main`,
/// `section`) uses that container, as a markdown preview pane would.
/// Otherwise the body's children are wrapped in a synthetic `<div>`.
pub fn parse_document(html: &str) -> ElementNode {
    let nodes = body_children(&parse_html(html));
    let significant: Vec<&DomNode> = nodes
        .iter()
        .filter(|n| !matches!(n, DomNode::Text(t) if t.trim().is_empty()))
        .collect();
    if let [DomNode::Element(only)] = significant.as_slice() {
        if matches!(
            only.tag,
            Tag::Div | Tag::Article | Tag::Main | Tag::Section
        ) {
            return only.clone();
        }
    }
    ElementNode::with_children(Tag::Div, nodes)
}
