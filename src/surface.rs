use crate::page::{char_len, char_to_byte, NodeId, PageDom};
use crate::settings::Settings;
use log::debug;
use once_cell::sync::Lazy;

/// `input` types that hold annotatable text. Numeric, password and other
/// non-text inputs are rejected.
static TEXT_INPUT_TYPES: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["text", "search", "email", "url"]);

/// Marker classes of third-party rich editors we recognize out of the box.
/// `Settings::editor_classes` extends this list.
static EDITOR_CLASSES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "ql-editor",
        "ProseMirror",
        "cm-content",
        "mce-content-body",
        "public-DraftEditor-content",
    ]
});

/// How a surface's text is addressed.
///
/// Value-based surfaces (native form controls) expose one opaque string;
/// individual ranges cannot be visually addressed inside them.
/// Range-addressable surfaces (rich text containers) expose a subtree of
/// text nodes the renderer can split and wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    ValueBased,
    RangeAddressable,
}

/// Handle to one text-bearing element of the host page. Holds a node id,
/// never the node; the page owns its tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub kind: SurfaceKind,
    pub node: NodeId,
    pub last_text: String,
}

/// Classify a DOM event target, walking up to the nearest qualifying
/// ancestor (input events often land on nodes inside a rich editor).
/// Unrecognized targets yield `None` silently.
pub fn classify(page: &PageDom, target: NodeId, settings: &Settings) -> Option<Surface> {
    let mut current = Some(target);
    while let Some(id) = current {
        if let Some(kind) = classify_element(page, id, settings) {
            let last_text = flattened_text(page, kind, id);
            return Some(Surface {
                kind,
                node: id,
                last_text,
            });
        }
        current = page.parent(id);
    }
    None
}

fn classify_element(page: &PageDom, id: NodeId, settings: &Settings) -> Option<SurfaceKind> {
    let tag = page.tag(id)?;
    match tag {
        "input" => {
            let input_type = page.attr(id, "type").unwrap_or_else(|| "text".to_string());
            if TEXT_INPUT_TYPES.contains(&input_type.as_str()) {
                Some(SurfaceKind::ValueBased)
            } else {
                None
            }
        }
        "textarea" => Some(SurfaceKind::ValueBased),
        _ => {
            if page.attr(id, "contenteditable").as_deref() == Some("true") {
                return Some(SurfaceKind::RangeAddressable);
            }
            if EDITOR_CLASSES.iter().any(|class| page.has_class(id, class)) {
                return Some(SurfaceKind::RangeAddressable);
            }
            if settings
                .editor_classes
                .iter()
                .any(|class| page.has_class(id, class))
            {
                return Some(SurfaceKind::RangeAddressable);
            }
            None
        }
    }
}

/// Current flattened text of a surface: the `value` string for form
/// controls, the concatenated descendant text for rich containers.
pub fn flattened_text(page: &PageDom, kind: SurfaceKind, node: NodeId) -> String {
    match kind {
        SurfaceKind::ValueBased => page.attr(node, "value").unwrap_or_default(),
        SurfaceKind::RangeAddressable => page.text_content(node),
    }
}

/// Replace a surface's entire text content. Returns false when the surface
/// is no longer attached (the host page got there first).
pub fn replace_text(page: &mut PageDom, surface: &Surface, new_text: &str) -> bool {
    if !page.is_attached(surface.node) {
        debug!("replace_text: surface {} detached, skipping", surface.node);
        return false;
    }
    match surface.kind {
        SurfaceKind::ValueBased => {
            page.set_attr(surface.node, "value", new_text);
        }
        SurfaceKind::RangeAddressable => {
            for child in page.children(surface.node) {
                page.remove(child);
            }
            page.append_text(surface.node, new_text);
        }
    }
    true
}

/// Current selection of a surface, clamped to the text length. Collapsed at
/// the end when the page reports none.
pub fn selection(page: &PageDom, surface: &Surface) -> (usize, usize) {
    let len = char_len(&flattened_text(page, surface.kind, surface.node));
    match page.selection(surface.node) {
        Some((start, end)) => {
            let start = start.min(len);
            let end = end.min(len).max(start);
            (start, end)
        }
        None => (len, len),
    }
}

/// Insert `text` at a recorded selection of a surface, replacing whatever
/// the selection covered. Value surfaces splice the raw string; range
/// surfaces delete the selected range and place a text node at the
/// collapsed point. Returns false when the surface is detached.
pub fn insert_at_selection(
    page: &mut PageDom,
    surface: &Surface,
    text: &str,
    sel: (usize, usize),
) -> bool {
    if !page.is_attached(surface.node) {
        debug!(
            "insert_at_selection: surface {} detached, skipping",
            surface.node
        );
        return false;
    }
    let (start, end) = sel;
    match surface.kind {
        SurfaceKind::ValueBased => {
            let value = page.attr(surface.node, "value").unwrap_or_default();
            let len = char_len(&value);
            let start = start.min(len);
            let end = end.min(len).max(start);
            let head = &value[..char_to_byte(&value, start)];
            let tail = &value[char_to_byte(&value, end)..];
            let spliced = format!("{}{}{}", head, text, tail);
            page.set_attr(surface.node, "value", &spliced);
            let caret = start + char_len(text);
            page.set_selection(surface.node, caret, caret);
        }
        SurfaceKind::RangeAddressable => {
            if end > start {
                delete_char_range(page, surface.node, start, end);
            }
            insert_text_at(page, surface.node, start, text);
            let caret = start + char_len(text);
            page.set_selection(surface.node, caret, caret);
        }
    }
    true
}

/// Remove characters `[start, end)` of the flattened text by trimming each
/// overlapped text node in place. Structure (marks, nested elements) is
/// left alone; only character data changes.
fn delete_char_range(page: &mut PageDom, root: NodeId, start: usize, end: usize) {
    let mut offset = 0;
    for node in page.text_nodes(root) {
        let content = match page.text(node) {
            Some(c) => c.to_string(),
            None => continue,
        };
        let len = char_len(&content);
        let node_start = offset;
        let node_end = offset + len;
        offset = node_end;
        if node_end <= start || node_start >= end {
            continue;
        }
        let local_start = start.saturating_sub(node_start).min(len);
        let local_end = (end - node_start).min(len);
        let head = &content[..char_to_byte(&content, local_start)];
        let tail = &content[char_to_byte(&content, local_end)..];
        let trimmed = format!("{}{}", head, tail);
        page.set_text(node, &trimmed);
    }
}

/// Insert a fresh text node at character `offset` of the flattened text,
/// splitting the text node that contains the offset when it falls inside
/// one.
fn insert_text_at(page: &mut PageDom, root: NodeId, offset: usize, text: &str) {
    let mut acc = 0;
    for node in page.text_nodes(root) {
        let len = char_len(page.text(node).unwrap_or(""));
        if offset <= acc + len {
            let local = offset - acc;
            let parent = match page.parent(node) {
                Some(p) => p,
                None => break,
            };
            let fresh = page.create_text(text);
            if local == 0 {
                page.insert_before(parent, fresh, node);
            } else if let Some(tail) = page.split_text(node, local) {
                page.insert_before(parent, fresh, tail);
            } else {
                page.insert_after(parent, fresh, node);
            }
            return;
        }
        acc += len;
    }
    // Empty surface or offset past the end: append at the root.
    page.append_text(root, text);
}
