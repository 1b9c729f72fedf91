use crate::client::Issue;
use crate::page::{char_len, NodeId, PageDom};
use crate::surface::{flattened_text, Surface, SurfaceKind};
use log::debug;

pub const MARK_TAG: &str = "mark";
pub const MARK_CLASS: &str = "rl-mark";
pub const ATTR_MESSAGE: &str = "data-rl-message";
pub const ATTR_INDEX: &str = "data-rl-index";
pub const ATTR_ISSUE_COUNT: &str = "data-rl-issues";

/// What a render pass did. `skipped` counts issues whose span could not be
/// placed because it crosses a text-node boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderStats {
    pub placed: usize,
    pub skipped: usize,
}

/// Remove every annotation previously painted on `surface`, restoring the
/// tree to its unannotated shape. Safe to call when nothing is painted.
pub fn clear(page: &mut PageDom, surface: &Surface) {
    match surface.kind {
        SurfaceKind::ValueBased => {
            page.remove_attr(surface.node, ATTR_ISSUE_COUNT);
            page.remove_attr(surface.node, "title");
        }
        SurfaceKind::RangeAddressable => {
            let marks = collect_marks(page, surface.node);
            for mark in marks {
                page.unwrap_element(mark);
            }
            page.normalize(surface.node);
        }
    }
}

/// Paint `issues` onto `surface`, replacing any previous annotations.
///
/// `snapshot` is the text the issues were computed against. When the
/// surface has been edited or detached since, the pass is dropped whole
/// rather than painted against the wrong text; returns `None` in that
/// case. Issues whose span does not fall inside a single text node are
/// skipped individually, the rest still paint.
pub fn render(
    page: &mut PageDom,
    surface: &Surface,
    issues: &[Issue],
    snapshot: &str,
) -> Option<RenderStats> {
    if !page.is_attached(surface.node) {
        debug!("render: surface {} detached, dropping pass", surface.node);
        return None;
    }
    if flattened_text(page, surface.kind, surface.node) != snapshot {
        debug!(
            "render: surface {} text changed since analysis, dropping pass",
            surface.node
        );
        return None;
    }

    clear(page, surface);

    let mut stats = RenderStats::default();
    match surface.kind {
        SurfaceKind::ValueBased => {
            if !issues.is_empty() {
                page.set_attr(surface.node, ATTR_ISSUE_COUNT, &issues.len().to_string());
                let summary = issues
                    .iter()
                    .map(|i| i.message.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                page.set_attr(surface.node, "title", &summary);
            }
            stats.placed = issues.len();
        }
        SurfaceKind::RangeAddressable => {
            for (index, issue) in issues.iter().enumerate() {
                if wrap_issue(page, surface.node, index, issue) {
                    stats.placed += 1;
                } else {
                    debug!(
                        "render: issue span {}..{} crosses a node boundary, skipping",
                        issue.start, issue.end
                    );
                    stats.skipped += 1;
                }
            }
        }
    }
    Some(stats)
}

/// Elements with the mark class under `root`, in document order. Nested
/// marks never occur (clear runs before every paint), but the walk would
/// find them anyway.
fn collect_marks(page: &PageDom, root: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if id != root && page.tag(id) == Some(MARK_TAG) && page.has_class(id, MARK_CLASS) {
            out.push(id);
        }
        let mut children = page.children(id);
        children.reverse();
        stack.extend(children);
    }
    out
}

/// Wrap the characters `[issue.start, issue.end)` of the flattened text in
/// a mark element. Returns false when the span is empty, out of range, or
/// not wholly contained in one text node.
fn wrap_issue(page: &mut PageDom, root: NodeId, index: usize, issue: &Issue) -> bool {
    if issue.end <= issue.start {
        return false;
    }
    // Walk fresh each time: earlier wraps restructure the tree, though the
    // flattened text (and therefore the offsets) stays the same.
    let mut acc = 0;
    for node in page.text_nodes(root) {
        let len = char_len(page.text(node).unwrap_or(""));
        let node_start = acc;
        let node_end = acc + len;
        acc = node_end;
        if issue.start >= node_end {
            continue;
        }
        if issue.start < node_start || issue.end > node_end {
            return false;
        }
        let local_start = issue.start - node_start;
        let local_end = issue.end - node_start;

        let _ = page.split_text(node, local_end);
        let target = page.split_text(node, local_start).unwrap_or(node);

        let parent = match page.parent(target) {
            Some(p) => p,
            None => return false,
        };
        let mark = page.create_element(MARK_TAG);
        page.set_attr(mark, "class", MARK_CLASS);
        page.set_attr(mark, ATTR_MESSAGE, &issue.message);
        page.set_attr(mark, ATTR_INDEX, &index.to_string());
        page.insert_before(parent, mark, target);
        page.append_child(mark, target);
        return true;
    }
    false
}
