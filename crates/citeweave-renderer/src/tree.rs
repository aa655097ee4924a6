//! Document tree produced from normalized answer text.
//!
//! Elements sit behind `Arc` so a rewrite only allocates along the path to
//! the nodes it changes; every untouched subtree is shared with the input.

use serde::Serialize;
use smol_str::SmolStr;
use std::sync::Arc;

/// Tag of the synthetic root element.
pub const ROOT_TAG: &str = "root";
/// Tag reserved for resolved citations.
pub const ANNOTATION_TAG: &str = "citation";
/// Property of an annotation holding the chunk index.
pub const CHUNK_INDEX_PROP: &str = "data-chunk-index";
/// Class marking a collapsible reasoning section.
pub const REASONING_CLASS: &str = "think";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Node {
    Text(SmolStr),
    Element(Arc<Element>),
    Raw(SmolStr),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Element {
    pub tag: SmolStr,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<(SmolStr, SmolStr)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<SmolStr>) -> Self {
        Self {
            tag: tag.into(),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.property("class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class))
    }

    /// Resolved citation produced by the reference resolver.
    pub fn is_annotation(&self) -> bool {
        self.tag == ANNOTATION_TAG
    }

    /// Chunk index carried by an annotation.
    pub fn chunk_index(&self) -> Option<usize> {
        if !self.is_annotation() {
            return None;
        }
        self.property(CHUNK_INDEX_PROP)?.parse().ok()
    }

    /// Code and math: text below these is shown verbatim.
    pub fn is_literal(&self) -> bool {
        matches!(self.tag.as_str(), "code" | "pre" | "kbd" | "samp") || self.has_class("math")
    }

    pub fn is_reasoning(&self) -> bool {
        self.tag == "details" && self.has_class(REASONING_CLASS)
    }

    pub fn into_node(self) -> Node {
        Node::Element(Arc::new(self))
    }
}

impl Node {
    pub fn text(value: impl Into<SmolStr>) -> Self {
        Node::Text(value.into())
    }

    pub fn raw(html: impl Into<SmolStr>) -> Self {
        Node::Raw(html.into())
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            Node::Text(_) | Node::Raw(_) => None,
        }
    }

    /// Concatenated text of this subtree, raw HTML excluded.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Node::Text(value) => out.push_str(value),
            Node::Element(el) => el.children.iter().for_each(|c| c.collect_text(out)),
            Node::Raw(_) => {}
        }
    }

    /// Chunk indices of every annotation, in document order.
    pub fn annotations(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if let Some(idx) = node.as_element().and_then(Element::chunk_index) {
                out.push(idx);
            }
        });
        out
    }

    /// Pre-order visit of every node.
    pub fn walk(&self, f: &mut impl FnMut(&Node)) {
        f(self);
        if let Node::Element(el) = self {
            for child in &el.children {
                child.walk(f);
            }
        }
    }

    /// Copy-on-write rewrite of leaf nodes.
    ///
    /// `f` sees each `Text` and `Raw` node in pre-order together with its
    /// ancestor chain (outermost first) and returns the nodes that replace it,
    /// or `None` to keep it. Elements whose subtree is unchanged are shared
    /// with `self`, changed elements are rebuilt, and `self` is never mutated.
    pub fn rewrite<F>(&self, mut f: F) -> Node
    where
        F: FnMut(&Node, &[&Element]) -> Option<Vec<Node>>,
    {
        let mut ancestors = Vec::new();
        match self {
            Node::Element(el) => match rewrite_element(el, &mut ancestors, &mut f) {
                Some(el) => el.into_node(),
                None => self.clone(),
            },
            leaf => match f(leaf, &ancestors) {
                Some(children) => Element::new(ROOT_TAG).with_children(children).into_node(),
                None => self.clone(),
            },
        }
    }
}

fn rewrite_element<'n, F>(
    el: &'n Element,
    ancestors: &mut Vec<&'n Element>,
    f: &mut F,
) -> Option<Element>
where
    F: FnMut(&Node, &[&Element]) -> Option<Vec<Node>>,
{
    ancestors.push(el);
    let mut rebuilt: Option<Vec<Node>> = None;
    for (i, child) in el.children.iter().enumerate() {
        let replacement = match child {
            Node::Element(child_el) => {
                rewrite_element(child_el, ancestors, f).map(|e| vec![e.into_node()])
            }
            leaf => f(leaf, ancestors),
        };
        match replacement {
            Some(nodes) => rebuilt
                .get_or_insert_with(|| el.children[..i].to_vec())
                .extend(nodes),
            None => {
                if let Some(children) = rebuilt.as_mut() {
                    children.push(child.clone());
                }
            }
        }
    }
    ancestors.pop();
    rebuilt.map(|children| Element {
        tag: el.tag.clone(),
        properties: el.properties.clone(),
        children,
    })
}
