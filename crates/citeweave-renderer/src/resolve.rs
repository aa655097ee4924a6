//! Reference resolver: turns `[ID:k]` markers in text nodes into citation
//! annotations.

use crate::normalize::MARKER_RE;
use crate::tree::{ANNOTATION_TAG, CHUNK_INDEX_PROP, Element, Node};
use serde::Serialize;
use smol_str::format_smolstr;

/// Output of [`resolve_references`].
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub root: Node,
    /// Markers replaced by an annotation.
    pub annotated: usize,
    /// Markers left as text because their index is out of range.
    pub unresolved: usize,
}

/// Build the annotation element for chunk `index`.
pub fn annotation(index: usize) -> Node {
    Element::new(ANNOTATION_TAG)
        .with_property(CHUNK_INDEX_PROP, format_smolstr!("{index}"))
        .into_node()
}

/// Replace every marker with a valid index by exactly one annotation.
///
/// Text below code, math or an existing annotation is left alone, as are
/// markers whose index is not below `chunk_count`. The input tree is not
/// modified; unchanged subtrees are shared with the result.
#[tracing::instrument(level = "debug", skip(root))]
pub fn resolve_references(root: &Node, chunk_count: usize) -> Resolution {
    let mut annotated = 0;
    let mut unresolved = 0;
    let root = root.rewrite(|node, ancestors| {
        let Node::Text(value) = node else {
            return None;
        };
        if ancestors
            .iter()
            .any(|a| a.is_literal() || a.is_annotation())
        {
            return None;
        }
        let (nodes, hits, misses) = split_markers(value, chunk_count);
        annotated += hits;
        unresolved += misses;
        nodes
    });
    if unresolved > 0 {
        tracing::debug!(unresolved, chunk_count, "markers left unresolved");
    }
    Resolution {
        root,
        annotated,
        unresolved,
    }
}

/// Split one text value around its valid markers.
///
/// Returns `None` for the nodes when nothing was replaced.
fn split_markers(value: &str, chunk_count: usize) -> (Option<Vec<Node>>, usize, usize) {
    let mut nodes = Vec::new();
    let mut hits = 0;
    let mut misses = 0;
    let mut cursor = 0;
    for caps in MARKER_RE.captures_iter(value) {
        let (Some(whole), Some(digits)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        match digits.as_str().parse::<usize>() {
            Ok(index) if index < chunk_count => {
                if whole.start() > cursor {
                    nodes.push(Node::text(&value[cursor..whole.start()]));
                }
                nodes.push(annotation(index));
                cursor = whole.end();
                hits += 1;
            }
            _ => {
                tracing::debug!(marker = whole.as_str(), "citation index out of range");
                misses += 1;
            }
        }
    }
    if hits == 0 {
        return (None, 0, misses);
    }
    if cursor < value.len() {
        nodes.push(Node::text(&value[cursor..]));
    }
    (Some(nodes), hits, misses)
}
