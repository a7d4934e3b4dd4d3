//! Slice isolation – temporary markers that let a cloned tree show exactly
//! one slice.
//!
//! The live tree is marked once per export through [`mark_slice_indices`];
//! the returned [`SliceMarks`] guard puts every touched attribute back when
//! it goes out of scope. Each capture then calls [`isolate`] on its own clone
//! and the visibility rule in [`crate::style::clone_visibility`] hides
//! everything outside the marked range.

use std::ops::{Deref, DerefMut};

use crate::boundary::Slice;
use crate::document::DocumentMetrics;
use crate::dom::ElementNode;
use crate::error::IsolationError;

/// Ordinal of the slice starting at the marked element.
pub const SLICE_INDEX_ATTR: &str = "data-slice-index";
/// Set on the live root for the duration of an export.
pub const EXPORT_SOURCE_ATTR: &str = "data-export-source";
/// Set on a cloned root; scopes the visibility rule to clones.
pub const EXPORT_CLONE_ATTR: &str = "data-export-clone";
/// First child shown in a clone.
pub const SHOW_FROM_ATTR: &str = "data-show-from";
/// First child hidden again after the shown range.
pub const HIDE_FROM_ATTR: &str = "data-hide-from";

/// Where a saved attribute lives: the root itself or one of its element
/// children.
#[derive(Debug, Clone, Copy)]
enum Target {
    Root,
    Child(usize),
}

#[derive(Debug)]
struct Saved {
    target: Target,
    name: &'static str,
    previous: Option<String>,
}

/// Scoped guard over the marked live tree.
///
/// Derefs to the root. Dropping the guard (or calling
/// [`release`](SliceMarks::release)) restores every attribute it changed,
/// leaving the tree equal to its state before marking.
#[derive(Debug)]
pub struct SliceMarks<'a> {
    root: &'a mut ElementNode,
    saved: Vec<Saved>,
}

/// Tag each slice's start element with its ordinal and record the start
/// element's top margin into the slice.
///
/// Stray `data-slice-index` attributes on other children are removed for the
/// lifetime of the guard so that lookups in a clone cannot hit them. Slices
/// whose start is out of range are left unmarked; [`isolate`] reports them.
pub fn mark_slice_indices<'a>(
    root: &'a mut ElementNode,
    metrics: &DocumentMetrics,
    slices: &mut [Slice],
) -> SliceMarks<'a> {
    let mut saved = Vec::new();

    saved.push(Saved {
        target: Target::Root,
        name: EXPORT_SOURCE_ATTR,
        previous: root.set_attr(EXPORT_SOURCE_ATTR, ""),
    });

    for (i, child) in root.element_children_mut().enumerate() {
        if slices.iter().any(|s| s.start == i) {
            continue;
        }
        if let Some(previous) = child.remove_attr(SLICE_INDEX_ATTR) {
            saved.push(Saved {
                target: Target::Child(i),
                name: SLICE_INDEX_ATTR,
                previous: Some(previous),
            });
        }
    }

    for slice in slices.iter_mut() {
        let Some(element) = root.element_child_mut(slice.start) else {
            continue;
        };
        saved.push(Saved {
            target: Target::Child(slice.start),
            name: SLICE_INDEX_ATTR,
            previous: element.set_attr(SLICE_INDEX_ATTR, slice.index.to_string()),
        });
        slice.margin_top_px = metrics
            .children
            .get(slice.start)
            .map(|m| m.margin_top)
            .unwrap_or(0.0);
    }

    SliceMarks { root, saved }
}

impl SliceMarks<'_> {
    /// Remove every marker and restore the values they replaced.
    pub fn release(self) {}

    fn restore(&mut self) {
        while let Some(saved) = self.saved.pop() {
            let element = match saved.target {
                Target::Root => Some(&mut *self.root),
                Target::Child(n) => self.root.element_child_mut(n),
            };
            let Some(element) = element else { continue };
            match saved.previous {
                Some(value) => {
                    element.set_attr(saved.name, value);
                }
                None => {
                    element.remove_attr(saved.name);
                }
            }
        }
    }
}

impl Deref for SliceMarks<'_> {
    type Target = ElementNode;

    fn deref(&self) -> &ElementNode {
        self.root
    }
}

impl DerefMut for SliceMarks<'_> {
    fn deref_mut(&mut self) -> &mut ElementNode {
        self.root
    }
}

impl Drop for SliceMarks<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}

fn find_marker(root: &ElementNode, index: usize) -> Option<usize> {
    let wanted = index.to_string();
    root.element_children()
        .position(|e| e.attr(SLICE_INDEX_ATTR) == Some(wanted.as_str()))
}

/// Restrict a cloned tree to the slice starting at `page_index`.
///
/// Calling it again on the same clone moves the visible range.
pub fn isolate(page_index: usize, clone_root: &mut ElementNode) -> Result<(), IsolationError> {
    let start = find_marker(clone_root, page_index)
        .ok_or(IsolationError::MissingMarker { index: page_index })?;
    let end = find_marker(clone_root, page_index + 1);

    clone_root.set_attr(EXPORT_CLONE_ATTR, "");
    for (i, child) in clone_root.element_children_mut().enumerate() {
        child.remove_attr(SHOW_FROM_ATTR);
        child.remove_attr(HIDE_FROM_ATTR);
        if i == start {
            child.set_attr(SHOW_FROM_ATTR, "");
        }
        if Some(i) == end {
            child.set_attr(HIDE_FROM_ATTR, "");
        }
    }
    Ok(())
}
