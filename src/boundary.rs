//! Boundary selection – decides where each PDF page starts.
//!
//! Candidates are direct children of the export root that match a
//! [`BoundarySelector`] (top-level headings by default). The walk keeps a
//! slice open until it is at least `min_height` tall and then closes it at
//! the first candidate that is `max_height` or more below the slice start.

use std::fmt;
use std::str::FromStr;

use crate::document::DocumentMetrics;
use crate::dom::ElementNode;
use crate::error::ExportError;

/// Top-level headings.
pub const DEFAULT_BOUNDARY_SELECTOR: &str = ":scope > h1, :scope > h2, :scope > h3";

/// A contiguous region of content destined for one PDF page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slice {
    /// Ordinal of the slice (and of its page).
    pub index: usize,
    /// Position of the start element among the root's element children.
    pub start: usize,
    /// Computed top margin of the start element, recorded when marking.
    pub margin_top_px: f32,
}

impl Slice {
    pub fn new(index: usize, start: usize) -> Self {
        Self {
            index,
            start,
            margin_top_px: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Compound {
    /// `:scope >` prefix: only direct children of the root match.
    scoped: bool,
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
}

impl Compound {
    fn matches(&self, element: &ElementNode) -> bool {
        if let Some(tag) = &self.tag {
            if element.tag.name() != tag.as_str() {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if element.attr("id") != Some(id.as_str()) {
                return false;
            }
        }
        let classes = element.classes();
        if !self.classes.iter().all(|c| classes.contains(&c.as_str())) {
            return false;
        }
        self.attributes.iter().all(|(name, value)| match value {
            Some(v) => element.attr(name) == Some(v.as_str()),
            None => element.has_attr(name),
        })
    }

    fn parse(source: &str) -> Result<Self, String> {
        let mut rest = source.trim();
        let mut scoped = false;
        if let Some(after) = rest.strip_prefix(":scope") {
            rest = after
                .trim_start()
                .strip_prefix('>')
                .ok_or_else(|| format!("expected `>` after `:scope` in {source:?}"))?
                .trim_start();
            scoped = true;
        }
        if rest.is_empty() {
            return Err(format!("empty compound selector in {source:?}"));
        }
        if rest.contains(char::is_whitespace) && !rest.contains('[') {
            return Err(format!("descendant combinators are not supported: {source:?}"));
        }

        let mut compound = Compound {
            scoped,
            tag: None,
            id: None,
            classes: Vec::new(),
            attributes: Vec::new(),
        };

        let name_end = rest
            .find(|c: char| matches!(c, '.' | '#' | '['))
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        if !name.is_empty() && name != "*" {
            if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(format!("invalid tag name {name:?}"));
            }
            compound.tag = Some(name.to_ascii_lowercase());
        }

        let mut rest = &rest[name_end..];
        while let Some(first) = rest.chars().next() {
            match first {
                '.' | '#' => {
                    let end = rest[1..]
                        .find(|c: char| matches!(c, '.' | '#' | '['))
                        .map(|i| i + 1)
                        .unwrap_or(rest.len());
                    let ident = &rest[1..end];
                    if ident.is_empty() {
                        return Err(format!("empty identifier in {source:?}"));
                    }
                    if first == '.' {
                        compound.classes.push(ident.to_string());
                    } else {
                        compound.id = Some(ident.to_string());
                    }
                    rest = &rest[end..];
                }
                '[' => {
                    let end = rest
                        .find(']')
                        .ok_or_else(|| format!("unterminated attribute selector in {source:?}"))?;
                    let body = rest[1..end].trim();
                    let attribute = match body.split_once('=') {
                        Some((name, value)) => {
                            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
                            (name.trim().to_ascii_lowercase(), Some(value.to_string()))
                        }
                        None => (body.to_ascii_lowercase(), None),
                    };
                    if attribute.0.is_empty() {
                        return Err(format!("empty attribute name in {source:?}"));
                    }
                    compound.attributes.push(attribute);
                    rest = &rest[end + 1..];
                }
                _ => return Err(format!("unexpected {first:?} in {source:?}")),
            }
        }
        Ok(compound)
    }
}

/// A comma-separated list of simple selectors.
///
/// Each alternative is an optional tag (or `*`) followed by `.class`, `#id`,
/// `[attr]` and `[attr="value"]` qualifiers, optionally prefixed with
/// `:scope >` to restrict it to direct children of the root.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundarySelector {
    source: String,
    alternatives: Vec<Compound>,
}

impl BoundarySelector {
    pub fn parse(source: &str) -> Result<Self, ExportError> {
        let alternatives = source
            .split(',')
            .map(Compound::parse)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ExportError::Configuration)?;
        Ok(Self {
            source: source.trim().to_string(),
            alternatives,
        })
    }

    /// A selector that matches nothing.
    pub fn empty() -> Self {
        Self {
            source: String::new(),
            alternatives: Vec::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `element`, a direct child of the root, matches.
    pub fn matches_child(&self, element: &ElementNode) -> bool {
        self.alternatives.iter().any(|c| c.matches(element))
    }

    /// Whether `element`, found `depth` levels below the root, matches.
    pub fn matches_at_depth(&self, element: &ElementNode, depth: usize) -> bool {
        self.alternatives
            .iter()
            .any(|c| (!c.scoped || depth == 1) && c.matches(element))
    }
}

impl Default for BoundarySelector {
    fn default() -> Self {
        Self::parse(DEFAULT_BOUNDARY_SELECTOR).unwrap_or_else(|_| Self::empty())
    }
}

impl FromStr for BoundarySelector {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BoundarySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ---------------------------------------------------------------------------
// Slice selection
// ---------------------------------------------------------------------------

/// Compute the ordered slices of `target`.
///
/// `metrics` must come from measuring `target` with no layout change in
/// between. Returns an empty vector when `target` has no element children.
/// The last slice always runs to the end of the content and is not checked
/// against `max_height`.
pub fn select_slices(
    target: &ElementNode,
    metrics: &DocumentMetrics,
    selector: &BoundarySelector,
    min_height: f32,
    max_height: f32,
) -> Vec<Slice> {
    if target.element_child_count() == 0 {
        log::warn!("No child element to export");
        return Vec::new();
    }

    let mut candidates: Vec<usize> = target
        .element_children()
        .enumerate()
        .filter(|(_, e)| selector.matches_child(e))
        .map(|(i, _)| i)
        .collect();

    if candidates.is_empty() {
        return vec![Slice::new(0, 0)];
    }
    if candidates[0] != 0 {
        candidates.insert(0, 0);
    }

    let mut slices = vec![Slice::new(0, 0)];
    let mut current = 0usize;
    let mut min_reached = false;

    for &candidate in &candidates[1..] {
        let height = metrics.top(candidate) - metrics.top(current);
        if !min_reached {
            if height >= min_height {
                min_reached = true;
            } else {
                continue;
            }
        }
        if height >= max_height {
            current = candidate;
            slices.push(Slice::new(slices.len(), candidate));
            min_reached = false;
        }
    }

    let tail = metrics.content_height - metrics.top(current);
    if tail > max_height {
        log::warn!(
            "Last slice is {tail:.0}px tall, above the {max_height:.0}px limit; \
             no boundary candidate is left to split it"
        );
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ChildMetrics;
    use crate::dom::{DomNode, Tag};

    /// A root whose children are `tags`, measured at the given tops.
    fn fixture(tags: &[Tag], tops: &[f32], content_height: f32) -> (ElementNode, DocumentMetrics) {
        let children = tags
            .iter()
            .map(|t| DomNode::Element(ElementNode::new(t.clone())))
            .collect();
        let metrics = DocumentMetrics {
            content_height,
            children: tops
                .iter()
                .map(|&top| ChildMetrics {
                    top,
                    height: 0.0,
                    margin_top: 0.0,
                })
                .collect(),
        };
        (ElementNode::with_children(Tag::Div, children), metrics)
    }

    fn starts(slices: &[Slice]) -> Vec<usize> {
        slices.iter().map(|s| s.start).collect()
    }

    #[test]
    fn default_selector_matches_top_level_headings() {
        let sel = BoundarySelector::default();
        assert!(sel.matches_child(&ElementNode::new(Tag::H2)));
        assert!(!sel.matches_child(&ElementNode::new(Tag::H4)));
        assert!(!sel.matches_at_depth(&ElementNode::new(Tag::H1), 2));
    }

    #[test]
    fn selector_qualifiers() {
        let sel = BoundarySelector::parse(r#"section.page[data-kind="x"], #cover"#).unwrap();
        let mut e = ElementNode::new(Tag::Section);
        e.set_attr("class", "wide page");
        assert!(!sel.matches_child(&e));
        e.set_attr("data-kind", "x");
        assert!(sel.matches_child(&e));

        let mut cover = ElementNode::new(Tag::Div);
        cover.set_attr("id", "cover");
        assert!(sel.matches_at_depth(&cover, 3));
    }

    #[test]
    fn malformed_selectors_are_configuration_errors() {
        for bad in ["", ":scope h1", "h1 > p", "[data-x", "h1,", "p..x"] {
            assert!(
                matches!(BoundarySelector::parse(bad), Err(ExportError::Configuration(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn empty_target_yields_no_slices() {
        let (root, metrics) = fixture(&[], &[], 0.0);
        assert!(select_slices(&root, &metrics, &BoundarySelector::default(), 10.0, 20.0).is_empty());
    }

    #[test]
    fn no_candidates_yields_first_child() {
        let (root, metrics) = fixture(&[Tag::P, Tag::P], &[0.0, 500.0], 900.0);
        let slices = select_slices(&root, &metrics, &BoundarySelector::default(), 10.0, 20.0);
        assert_eq!(slices, vec![Slice::new(0, 0)]);
    }

    #[test]
    fn short_document_is_one_slice() {
        let (root, metrics) = fixture(&[Tag::P], &[0.0], 100.0);
        let slices = select_slices(&root, &metrics, &BoundarySelector::default(), 300.0, 900.0);
        assert_eq!(starts(&slices), vec![0]);

        let (root, metrics) = fixture(&[Tag::H1, Tag::P, Tag::H2], &[0.0, 40.0, 80.0], 120.0);
        let slices = select_slices(&root, &metrics, &BoundarySelector::default(), 300.0, 900.0);
        assert_eq!(starts(&slices), vec![0]);
    }

    #[test]
    fn leading_non_heading_is_covered() {
        let (root, metrics) = fixture(&[Tag::P, Tag::H1, Tag::H1], &[0.0, 100.0, 200.0], 300.0);
        let slices = select_slices(&root, &metrics, &BoundarySelector::default(), 50.0, 100.0);
        assert_eq!(starts(&slices), vec![0, 1, 2]);
    }

    #[test]
    fn six_headings_two_hundred_apart() {
        let tops = [0.0, 200.0, 400.0, 600.0, 800.0, 1000.0];
        let (root, metrics) = fixture(&vec![Tag::H1; 6], &tops, 1200.0);
        let slices = select_slices(&root, &metrics, &BoundarySelector::default(), 150.0, 450.0);
        // 600 is the first offset at least 450 below 0; from 600 the next
        // would be 1050 and there is no candidate there.
        assert_eq!(starts(&slices), vec![0, 3]);
        assert_eq!(slices[1].index, 1);
    }

    #[test]
    fn evenly_spaced_at_max_height_gives_one_slice_each() {
        let n = 7;
        let h = 300.0;
        let tops: Vec<f32> = (0..n).map(|i| i as f32 * h).collect();
        let (root, metrics) = fixture(&vec![Tag::H2; n], &tops, n as f32 * h);
        let slices = select_slices(&root, &metrics, &BoundarySelector::default(), 100.0, h);
        assert_eq!(slices.len(), n);
    }

    #[test]
    fn raising_max_height_never_adds_slices() {
        let tops: Vec<f32> = (0..20).map(|i| (i * i) as f32 * 13.0).collect();
        let (root, metrics) = fixture(&vec![Tag::H1; 20], &tops, 6000.0);
        let sel = BoundarySelector::default();
        let mut previous = usize::MAX;
        for max in (100..3000).step_by(50) {
            let count = select_slices(&root, &metrics, &sel, 100.0, max as f32).len();
            assert!(count <= previous, "max {max}: {count} > {previous}");
            previous = count;
        }
    }

    #[test]
    fn zero_height_ties_never_break() {
        let (root, metrics) = fixture(&vec![Tag::H1; 4], &[0.0, 0.0, 0.0, 0.0], 10.0);
        let slices = select_slices(&root, &metrics, &BoundarySelector::default(), 0.0, 0.5);
        assert_eq!(starts(&slices), vec![0]);
    }

    #[test]
    fn min_height_latch_delays_break() {
        // The max is crossed before the min: the latch must be set first.
        let (root, metrics) = fixture(&vec![Tag::H1; 3], &[0.0, 200.0, 400.0], 500.0);
        let slices = select_slices(&root, &metrics, &BoundarySelector::default(), 300.0, 100.0);
        assert_eq!(starts(&slices), vec![0, 2]);
    }

    #[test]
    fn slices_are_ordered_and_repeatable() {
        let tops: Vec<f32> = (0..12).map(|i| i as f32 * 120.0).collect();
        let (root, metrics) = fixture(&vec![Tag::H3; 12], &tops, 1500.0);
        let sel = BoundarySelector::default();
        let a = select_slices(&root, &metrics, &sel, 200.0, 400.0);
        let b = select_slices(&root, &metrics, &sel, 200.0, 400.0);
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0].start < w[1].start));
        assert!(a.iter().enumerate().all(|(i, s)| s.index == i));
    }
}
