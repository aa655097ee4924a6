//! Builds a [`Node`] tree from normalized markdown.
//!
//! Parsing is delegated to markdown-weaver; this module only folds its event
//! stream into elements. Raw HTML is kept as `Raw` nodes for the sanitizer,
//! except the reasoning-section markers emitted by the normalizer, which open
//! and close a real `details` element so its contents are parsed as markdown.
//!
//! Inline HTML arrives one tag at a time, so an element holding any is
//! written back out as a single `Raw` fragment when it closes. The sanitizer
//! then sees `<b>bold</b>` whole instead of two unbalanced tags.

use crate::html::write_fragment;
use crate::normalize::REASONING_CLOSE;
use crate::tree::{Element, Node, REASONING_CLASS, ROOT_TAG};
use markdown_weaver::{
    Alignment, BlockQuoteKind, CodeBlockKind, Event, LinkType, Options, Parser, Tag, TagEnd,
};
use regex::Regex;
use smol_str::{SmolStr, format_smolstr};
use std::collections::HashMap;
use std::sync::LazyLock;

static REASONING_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^<details class="think"(?P<streaming> data-streaming="true")?>$"#).unwrap()
});

/// Parser extensions used for answers: tables, math, footnotes, GFM.
pub fn default_md_options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_GFM
        | Options::ENABLE_MATH
}

/// Parse `text` and build its tree.
pub fn build(text: &str, options: Options) -> Node {
    let mut builder = TreeBuilder::new();
    for event in Parser::new_ext(text, options) {
        builder.push_event(event);
    }
    builder.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Root,
    /// Closed by the matching markdown end event.
    Markdown,
    /// Opened alongside a markdown frame and closed with it.
    Implicit,
    /// Opened by a raw reasoning marker, closed by the raw closer or when an
    /// enclosing frame ends.
    Reasoning,
    /// Children become the `alt` text on close.
    Image,
    /// Metadata blocks: content is dropped.
    Hidden,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    element: Element,
    /// Inline HTML was pushed directly into this frame.
    inline_html: bool,
}

impl Frame {
    fn new(kind: FrameKind, element: Element) -> Self {
        Self {
            kind,
            element,
            inline_html: false,
        }
    }

    fn into_element(self) -> Element {
        let mut element = self.element;
        if self.inline_html {
            let mut html = String::new();
            let written = write_fragment(&mut html, &element.children);
            debug_assert!(written.is_ok(), "writing to a String cannot fail");
            element.children = vec![Node::raw(html)];
        }
        element
    }
}

struct TreeBuilder {
    stack: Vec<Frame>,
    table_alignments: Vec<Alignment>,
    table_cell_index: usize,
    in_table_head: bool,
    footnotes: HashMap<String, usize>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            stack: vec![Frame::new(FrameKind::Root, Element::new(ROOT_TAG))],
            table_alignments: Vec::new(),
            table_cell_index: 0,
            in_table_head: false,
            footnotes: HashMap::new(),
        }
    }

    fn finish(mut self) -> Node {
        while self.stack.len() > 1 {
            self.close_top();
        }
        match self.stack.pop() {
            Some(frame) => frame.into_element().into_node(),
            None => Element::new(ROOT_TAG).into_node(),
        }
    }

    fn children(&mut self) -> &mut Vec<Node> {
        let last = self.stack.len() - 1;
        &mut self.stack[last].element.children
    }

    fn push_frame(&mut self, kind: FrameKind, element: Element) {
        self.stack.push(Frame::new(kind, element));
    }

    fn open(&mut self, element: Element) {
        self.push_frame(FrameKind::Markdown, element);
    }

    fn close_top(&mut self) -> Option<FrameKind> {
        if self.stack.len() <= 1 {
            return None;
        }
        let frame = self.stack.pop()?;
        let kind = frame.kind;
        let mut element = frame.into_element();
        match kind {
            FrameKind::Hidden => return Some(kind),
            FrameKind::Image => {
                let alt = element
                    .children
                    .drain(..)
                    .map(|c| c.text_content())
                    .collect::<String>();
                element.properties.push(("alt".into(), alt.into()));
            }
            _ => {}
        }
        self.children().push(element.into_node());
        Some(kind)
    }

    /// Close frames up to and including the innermost markdown frame.
    fn close_markdown(&mut self) {
        while let Some(kind) = self.close_top() {
            if !matches!(kind, FrameKind::Implicit | FrameKind::Reasoning) {
                break;
            }
        }
    }

    fn push_text(&mut self, text: &str) {
        let children = self.children();
        if let Some(Node::Text(prev)) = children.last_mut() {
            *prev = format_smolstr!("{prev}{text}");
        } else {
            children.push(Node::text(text));
        }
    }

    fn push_raw(&mut self, html: &str, merge: bool) {
        let children = self.children();
        match children.last_mut() {
            Some(Node::Raw(prev)) if merge => *prev = format_smolstr!("{prev}{html}"),
            _ => children.push(Node::raw(html)),
        }
    }

    fn push_html(&mut self, html: &str, block: bool) {
        let trimmed = html.trim();
        if let Some(caps) = REASONING_OPEN_RE.captures(trimmed) {
            let mut details = Element::new("details").with_property("class", REASONING_CLASS);
            if caps.name("streaming").is_some() {
                details = details.with_property("data-streaming", "true");
            }
            self.push_frame(FrameKind::Reasoning, details);
            return;
        }
        if trimmed == REASONING_CLOSE && self.top_kind() == FrameKind::Reasoning {
            self.close_top();
            return;
        }
        if !block {
            if let Some(frame) = self.stack.last_mut() {
                frame.inline_html = true;
            }
        }
        self.push_raw(html, block);
    }

    fn top_kind(&self) -> FrameKind {
        self.stack.last().map(|f| f.kind).unwrap_or(FrameKind::Root)
    }

    fn footnote_number(&mut self, name: &str) -> usize {
        let next = self.footnotes.len() + 1;
        *self.footnotes.entry(name.to_string()).or_insert(next)
    }

    fn push_event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start_tag(tag),
            Event::End(TagEnd::HtmlBlock) => {}
            Event::End(TagEnd::TableHead) => {
                self.close_markdown();
                self.in_table_head = false;
            }
            Event::End(_) => self.close_markdown(),
            Event::Text(text) => {
                if self.top_kind() != FrameKind::Hidden {
                    self.push_text(&text);
                }
            }
            Event::Code(text) => {
                let code = Element::new("code").with_children(vec![Node::text(text.as_ref())]);
                self.children().push(code.into_node());
            }
            Event::InlineMath(text) => self.push_math(&text, "math math-inline"),
            Event::DisplayMath(text) => self.push_math(&text, "math math-display"),
            Event::Html(html) => self.push_html(&html, true),
            Event::InlineHtml(html) => self.push_html(&html, false),
            Event::SoftBreak => self.push_text("\n"),
            Event::HardBreak => self.children().push(Element::new("br").into_node()),
            Event::Rule => self.children().push(Element::new("hr").into_node()),
            Event::FootnoteReference(name) => {
                let number = self.footnote_number(&name);
                let link = Element::new("a")
                    .with_property("href", format_smolstr!("#{name}"))
                    .with_children(vec![Node::text(format_smolstr!("{number}"))]);
                let sup = Element::new("sup")
                    .with_property("class", "footnote-reference")
                    .with_children(vec![link.into_node()]);
                self.children().push(sup.into_node());
            }
            Event::TaskListMarker(checked) => {
                let mut input = Element::new("input")
                    .with_property("disabled", "")
                    .with_property("type", "checkbox");
                if checked {
                    input = input.with_property("checked", "");
                }
                self.children().push(input.into_node());
            }
            Event::WeaverBlock(_) => {}
        }
    }

    fn push_math(&mut self, tex: &str, class: &'static str) {
        let span = Element::new("span")
            .with_property("class", class)
            .with_children(vec![Node::text(tex)]);
        self.children().push(span.into_node());
    }

    fn start_tag(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::HtmlBlock => {}
            Tag::Paragraph => self.open(Element::new("p")),
            Tag::Heading {
                level, id, classes, ..
            } => {
                let mut heading = Element::new(format_smolstr!("{level}"));
                if let Some(id) = id {
                    heading = heading.with_property("id", id.as_ref());
                }
                if !classes.is_empty() {
                    let joined = classes
                        .iter()
                        .map(|c| c.as_ref())
                        .collect::<Vec<_>>()
                        .join(" ");
                    heading = heading.with_property("class", joined);
                }
                self.open(heading);
            }
            Tag::BlockQuote(kind) => {
                let mut quote = Element::new("blockquote");
                let class = match kind {
                    None => None,
                    Some(BlockQuoteKind::Note) => Some("markdown-alert-note"),
                    Some(BlockQuoteKind::Tip) => Some("markdown-alert-tip"),
                    Some(BlockQuoteKind::Important) => Some("markdown-alert-important"),
                    Some(BlockQuoteKind::Warning) => Some("markdown-alert-warning"),
                    Some(BlockQuoteKind::Caution) => Some("markdown-alert-caution"),
                };
                if let Some(class) = class {
                    quote = quote.with_property("class", class);
                }
                self.open(quote);
            }
            Tag::CodeBlock(kind) => {
                self.open(Element::new("pre"));
                let mut code = Element::new("code");
                if let CodeBlockKind::Fenced(info) = kind {
                    let lang = info.split(' ').next().unwrap_or_default();
                    if !lang.is_empty() {
                        code = code.with_property("class", format_smolstr!("language-{lang}"));
                    }
                }
                self.push_frame(FrameKind::Implicit, code);
            }
            Tag::List(Some(1)) => self.open(Element::new("ol")),
            Tag::List(Some(start)) => {
                self.open(Element::new("ol").with_property("start", format_smolstr!("{start}")))
            }
            Tag::List(None) => self.open(Element::new("ul")),
            Tag::Item => self.open(Element::new("li")),
            Tag::FootnoteDefinition(name) => {
                let number = self.footnote_number(&name);
                let label = Element::new("sup")
                    .with_property("class", "footnote-definition-label")
                    .with_children(vec![Node::text(format_smolstr!("{number}"))]);
                self.open(
                    Element::new("div")
                        .with_property("class", "footnote-definition")
                        .with_property("id", name.as_ref())
                        .with_children(vec![label.into_node()]),
                );
            }
            Tag::DefinitionList => self.open(Element::new("dl")),
            Tag::DefinitionListTitle => self.open(Element::new("dt")),
            Tag::DefinitionListDefinition => self.open(Element::new("dd")),
            Tag::Table(alignments) => {
                self.table_alignments = alignments;
                self.open(Element::new("table"));
            }
            Tag::TableHead => {
                self.in_table_head = true;
                self.table_cell_index = 0;
                self.open(Element::new("thead"));
                self.push_frame(FrameKind::Implicit, Element::new("tr"));
            }
            Tag::TableRow => {
                self.table_cell_index = 0;
                self.open(Element::new("tr"));
            }
            Tag::TableCell => {
                let mut cell = Element::new(if self.in_table_head { "th" } else { "td" });
                let align = match self.table_alignments.get(self.table_cell_index) {
                    Some(Alignment::Left) => Some("text-align: left"),
                    Some(Alignment::Center) => Some("text-align: center"),
                    Some(Alignment::Right) => Some("text-align: right"),
                    _ => None,
                };
                if let Some(align) = align {
                    cell = cell.with_property("style", align);
                }
                self.table_cell_index += 1;
                self.open(cell);
            }
            Tag::Emphasis => self.open(Element::new("em")),
            Tag::Strong => self.open(Element::new("strong")),
            Tag::Strikethrough => self.open(Element::new("s")),
            Tag::Superscript => self.open(Element::new("sup")),
            Tag::Subscript => self.open(Element::new("sub")),
            Tag::Link {
                link_type,
                dest_url,
                title,
                ..
            } => {
                let href = if matches!(link_type, LinkType::Email) {
                    format_smolstr!("mailto:{dest_url}")
                } else {
                    SmolStr::new(dest_url.as_ref())
                };
                let mut link = Element::new("a").with_property("href", href);
                if !title.is_empty() {
                    link = link.with_property("title", title.as_ref());
                }
                self.open(link);
            }
            Tag::Image {
                dest_url, title, ..
            } => {
                let mut image = Element::new("img").with_property("src", dest_url.as_ref());
                if !title.is_empty() {
                    image = image.with_property("title", title.as_ref());
                }
                self.push_frame(FrameKind::Image, image);
            }
            Tag::Embed {
                dest_url, title, ..
            } => {
                let mut link = Element::new("a")
                    .with_property("class", "embed")
                    .with_property("href", dest_url.as_ref());
                if !title.is_empty() {
                    link = link.with_property("title", title.as_ref());
                }
                self.open(link);
            }
            Tag::MetadataBlock(_) | Tag::WeaverBlock(..) => {
                self.push_frame(FrameKind::Hidden, Element::new("div"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;

    fn build_md(text: &str) -> Node {
        build(text, default_md_options())
    }

    fn root_children(node: &Node) -> &[Node] {
        &node.as_element().unwrap().children
    }

    #[test]
    fn paragraph_text_is_merged() {
        let tree = build_md("see [ID:3] for *details*");
        let p = root_children(&tree)[0].as_element().unwrap();
        assert_eq!(p.tag, "p");
        assert_eq!(p.children[0], Node::text("see [ID:3] for "));
        assert_eq!(p.children[1].as_element().unwrap().tag, "em");
    }

    #[test]
    fn fenced_code_gets_language_class() {
        let tree = build_md("```rust\nlet x = 1;\n```\n");
        let pre = root_children(&tree)[0].as_element().unwrap();
        assert_eq!(pre.tag, "pre");
        let code = pre.children[0].as_element().unwrap();
        assert_eq!(code.property("class"), Some("language-rust"));
        assert_eq!(code.children[0].text_content(), "let x = 1;\n");
    }

    #[test]
    fn math_spans_keep_source() {
        let tree = build_md("inline $x^2$ here");
        let p = root_children(&tree)[0].as_element().unwrap();
        let math = p.children[1].as_element().unwrap();
        assert!(math.has_class("math-inline"));
        assert!(math.is_literal());
        assert_eq!(math.children[0].text_content(), "x^2");
    }

    #[test]
    fn reasoning_markers_become_details() {
        let tree = build_md(&normalize("<think>step **one**</think>answer"));
        let children = root_children(&tree);
        let details = children
            .iter()
            .filter_map(Node::as_element)
            .find(|el| el.is_reasoning())
            .expect("reasoning section");
        assert_eq!(details.property("data-streaming"), None);
        let inner = details.children[0].as_element().unwrap();
        assert_eq!(inner.tag, "p");
        assert!(!tree.text_content().contains("think>"));
        assert!(
            children
                .iter()
                .all(|c| !matches!(c, Node::Raw(html) if html.contains("details")))
        );
    }

    #[test]
    fn streaming_reasoning_is_well_formed() {
        let tree = build_md(&normalize("<think>partial reasoning"));
        let details = root_children(&tree)
            .iter()
            .filter_map(Node::as_element)
            .find(|el| el.is_reasoning())
            .expect("reasoning section");
        assert_eq!(details.property("data-streaming"), Some("true"));
        assert_eq!(details.children[0].text_content(), "partial reasoning");
    }

    #[test]
    fn other_html_stays_raw() {
        let tree = build_md("<div onclick=\"x()\">\nhi\n</div>\n");
        assert!(matches!(&root_children(&tree)[0], Node::Raw(html) if html.contains("onclick")));
    }

    #[test]
    fn inline_html_is_kept_whole() {
        let tree = build_md("a <b>bold [ID:0]</b> and *em* c");
        let p = root_children(&tree)[0].as_element().unwrap();
        assert_eq!(
            p.children,
            vec![Node::raw("a <b>bold [ID:0]</b> and <em>em</em> c")]
        );
    }

    #[test]
    fn streaming_fence_in_reasoning_stays_code() {
        let tree = build_md(&normalize("<think>let me check:\n```py\nprint(1)"));
        let details = root_children(&tree)
            .iter()
            .filter_map(Node::as_element)
            .find(|el| el.is_reasoning())
            .expect("reasoning section");
        let pre = details
            .children
            .iter()
            .filter_map(Node::as_element)
            .find(|el| el.tag == "pre")
            .expect("code block");
        assert_eq!(pre.children[0].text_content(), "print(1)\n");
        assert!(!tree.text_content().contains("</details>"));
    }

    #[test]
    fn table_head_cells_are_th() {
        let tree = build_md("| a | b |\n|:--|--:|\n| 1 | 2 |\n");
        let table = root_children(&tree)[0].as_element().unwrap();
        let thead = table.children[0].as_element().unwrap();
        let head_row = thead.children[0].as_element().unwrap();
        assert_eq!(head_row.tag, "tr");
        let th = head_row.children[0].as_element().unwrap();
        assert_eq!(th.tag, "th");
        assert_eq!(th.property("style"), Some("text-align: left"));
        let body_row = table.children[1].as_element().unwrap();
        let td = body_row.children[1].as_element().unwrap();
        assert_eq!(td.tag, "td");
        assert_eq!(td.property("style"), Some("text-align: right"));
    }

    #[test]
    fn image_children_become_alt() {
        let tree = build_md("![a *cat*](cat.png)");
        let p = root_children(&tree)[0].as_element().unwrap();
        let img = p.children[0].as_element().unwrap();
        assert_eq!(img.property("alt"), Some("a cat"));
        assert!(img.children.is_empty());
    }
}
