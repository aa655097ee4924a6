//! HTML output for a rendered answer.
//!
//! The renderer has already turned raw HTML into sanitized elements, so a
//! `Raw` node only reaches the writer in a hand-built tree and is cleaned on
//! the way out. Link and image URLs coming from markdown syntax never pass
//! through the sanitizer and are filtered here.

use crate::citation::{DocumentLink, LinkTarget, Popover, RenderDecision};
use crate::sanitize::Sanitizer;
use crate::tree::{Element, Node, ROOT_TAG};
use citeweave_common::Config;
use markdown_weaver_escape::{StrWrite, escape_href, escape_html, escape_html_body_text};
use std::collections::BTreeMap;

const VOID_TAGS: &[&str] = &["br", "hr", "img", "input"];

const BLOCK_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre", "ul", "ol", "li", "table",
    "thead", "tr", "div", "details", "dl", "dt", "dd", "hr",
];

pub struct HtmlWriter<'a, W: StrWrite> {
    writer: W,
    end_newline: bool,
    config: &'a Config,
    sanitizer: &'a Sanitizer,
    citations: &'a BTreeMap<usize, RenderDecision>,
    /// Popovers written so far, for unique element ids.
    popovers: usize,
}

impl<'a, W: StrWrite> HtmlWriter<'a, W> {
    pub fn new(
        writer: W,
        config: &'a Config,
        sanitizer: &'a Sanitizer,
        citations: &'a BTreeMap<usize, RenderDecision>,
    ) -> Self {
        Self {
            writer,
            end_newline: true,
            config,
            sanitizer,
            citations,
            popovers: 0,
        }
    }

    #[inline]
    fn write(&mut self, s: &str) -> Result<(), W::Error> {
        self.writer.write_str(s)?;
        if !s.is_empty() {
            self.end_newline = s.ends_with('\n');
        }
        Ok(())
    }

    #[inline]
    fn write_text(&mut self, text: &str) -> Result<(), W::Error> {
        escape_html_body_text(&mut self.writer, text)?;
        if !text.is_empty() {
            self.end_newline = text.ends_with('\n');
        }
        Ok(())
    }

    fn write_attr(&mut self, name: &str, value: &str) -> Result<(), W::Error> {
        self.write(" ")?;
        self.write(name)?;
        self.write("=\"")?;
        escape_html(&mut self.writer, value)?;
        self.write("\"")
    }

    pub fn run(mut self, root: &Node) -> Result<W, W::Error> {
        match root {
            Node::Element(el) if el.tag == ROOT_TAG => {
                for child in &el.children {
                    self.write_node(child)?;
                }
            }
            node => self.write_node(node)?,
        }
        Ok(self.writer)
    }

    fn write_node(&mut self, node: &Node) -> Result<(), W::Error> {
        match node {
            Node::Text(text) => self.write_text(text),
            Node::Raw(html) => {
                let clean = self.sanitizer.clean(html);
                self.write(&clean)
            }
            Node::Element(el) => {
                if let Some(index) = el.chunk_index() {
                    self.write_citation(index)
                } else if el.is_annotation() {
                    Ok(())
                } else if el.is_reasoning() {
                    self.write_reasoning(el)
                } else if el.tag == "span" && el.has_class("math") {
                    self.write_math(el)
                } else {
                    self.write_element(el)
                }
            }
        }
    }

    fn write_element(&mut self, el: &Element) -> Result<(), W::Error> {
        let block = BLOCK_TAGS.contains(&el.tag.as_str());
        if block && !self.end_newline {
            self.write("\n")?;
        }
        self.write("<")?;
        self.write(&el.tag)?;
        for (name, value) in &el.properties {
            let url = matches!((el.tag.as_str(), name.as_str()), ("a", "href") | ("img", "src"));
            if url {
                if !self.sanitizer.is_safe_url(value) {
                    tracing::debug!(tag = %el.tag, "dropped unsafe url");
                    continue;
                }
                self.write(" ")?;
                self.write(name)?;
                self.write("=\"")?;
                escape_href(&mut self.writer, value)?;
                self.write("\"")?;
            } else {
                self.write_attr(name, value)?;
            }
        }
        if VOID_TAGS.contains(&el.tag.as_str()) {
            return self.write(if block { " />\n" } else { " />" });
        }
        self.write(">")?;
        for child in &el.children {
            self.write_node(child)?;
        }
        self.write("</")?;
        self.write(&el.tag)?;
        self.write(">")?;
        if block {
            self.write("\n")?;
        }
        Ok(())
    }

    fn write_reasoning(&mut self, el: &Element) -> Result<(), W::Error> {
        if !self.end_newline {
            self.write("\n")?;
        }
        self.write("<details class=\"think\"")?;
        if let Some(streaming) = el.property("data-streaming") {
            self.write_attr("data-streaming", streaming)?;
        }
        self.write("><summary>")?;
        let config = self.config;
        self.write_text(&config.reasoning_label)?;
        self.write("</summary>\n")?;
        for child in &el.children {
            self.write_node(child)?;
        }
        if !self.end_newline {
            self.write("\n")?;
        }
        self.write("</details>\n")
    }

    fn write_math(&mut self, el: &Element) -> Result<(), W::Error> {
        let tex = el.children.iter().map(Node::text_content).collect::<String>();
        let display = el.has_class("math-display");
        let class = if display { "math-display" } else { "math-inline" };

        #[cfg(feature = "math")]
        {
            if self.config.render_math {
                use crate::math::{MathDisplay, to_mathml};
                let mode = if display {
                    MathDisplay::Block
                } else {
                    MathDisplay::Inline
                };
                match to_mathml(&tex, mode) {
                    Ok(mathml) => {
                        self.write("<span class=\"math ")?;
                        self.write(mode.class())?;
                        self.write("\">")?;
                        self.write(&mathml)?;
                        return self.write("</span>");
                    }
                    Err(err) => {
                        tracing::debug!(%err, "math fell back to source");
                        self.write("<span class=\"math math-error ")?;
                        self.write(class)?;
                        self.write("\"")?;
                        self.write_attr("title", &err.to_string())?;
                        self.write("><code>")?;
                        escape_html(&mut self.writer, &tex)?;
                        return self.write("</code></span>");
                    }
                }
            }
        }

        self.write("<span class=\"math ")?;
        self.write(class)?;
        self.write("\"><code>")?;
        escape_html(&mut self.writer, &tex)?;
        self.write("</code></span>")
    }

    fn write_citation(&mut self, index: usize) -> Result<(), W::Error> {
        let citations = self.citations;
        match citations.get(&index) {
            None | Some(RenderDecision::Inert) => Ok(()),
            Some(RenderDecision::InlineMedia { src, alt, .. }) => {
                self.write("<img class=\"citation-media\" src=\"")?;
                escape_href(&mut self.writer, src)?;
                self.write("\"")?;
                self.write_attr("alt", alt)?;
                write!(&mut self.writer, " data-chunk-index=\"{index}\" />")?;
                self.end_newline = false;
                Ok(())
            }
            Some(RenderDecision::CitationPopover(popover)) => self.write_popover(index, popover),
        }
    }

    fn write_popover(&mut self, index: usize, popover: &Popover) -> Result<(), W::Error> {
        self.popovers += 1;
        let id = self.popovers;
        write!(
            &mut self.writer,
            "<span class=\"citation\" data-chunk-index=\"{index}\">\
             <button class=\"citation-trigger\" popovertarget=\"citation-{id}\">{index}</button>\
             <span class=\"citation-popover\" id=\"citation-{id}\" popover>"
        )?;
        self.write(&popover.sanitized_content)?;
        if let Some(link) = &popover.document {
            self.write_document_link(link)?;
        }
        self.write("</span></span>")?;
        self.end_newline = false;
        Ok(())
    }

    fn write_document_link(&mut self, link: &DocumentLink) -> Result<(), W::Error> {
        match &link.target {
            LinkTarget::External { url } => {
                self.write("<a class=\"citation-document\" href=\"")?;
                escape_href(&mut self.writer, url)?;
                self.write("\" target=\"_blank\" rel=\"noopener noreferrer\">")?;
                self.write_text(&link.doc_name)?;
                self.write("</a>")
            }
            LinkTarget::Preview => {
                self.write("<button class=\"citation-document\"")?;
                self.write_attr("data-doc-id", &link.doc_id)?;
                self.write(">")?;
                self.write_text(&link.doc_name)?;
                self.write("</button>")
            }
        }
    }
}

/// Plain HTML for `nodes`, with no citation or math handling. Used to hand
/// inline markup to the sanitizer.
pub(crate) fn write_fragment<W: StrWrite>(out: &mut W, nodes: &[Node]) -> Result<(), W::Error> {
    for node in nodes {
        match node {
            Node::Text(text) => escape_html_body_text(&mut *out, text)?,
            Node::Raw(html) => out.write_str(html)?,
            Node::Element(el) => {
                write!(out, "<{}", el.tag)?;
                for (name, value) in &el.properties {
                    write!(out, " {name}=\"")?;
                    escape_html(&mut *out, value)?;
                    out.write_str("\"")?;
                }
                out.write_str(">")?;
                if VOID_TAGS.contains(&el.tag.as_str()) {
                    continue;
                }
                write_fragment(out, &el.children)?;
                write!(out, "</{}>", el.tag)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(root: &Node, citations: &BTreeMap<usize, RenderDecision>) -> String {
        let config = Config {
            render_math: false,
            ..Config::default()
        };
        let sanitizer = Sanitizer::default();
        HtmlWriter::new(String::new(), &config, &sanitizer, citations)
            .run(root)
            .unwrap()
    }

    fn paragraph(children: Vec<Node>) -> Node {
        Element::new(ROOT_TAG)
            .with_children(vec![Element::new("p").with_children(children).into_node()])
            .into_node()
    }

    fn citation(index: usize) -> Node {
        crate::resolve::annotation(index)
    }

    #[test]
    fn escapes_text_and_drops_unsafe_links() {
        let root = paragraph(vec![
            Node::text("a < b "),
            Element::new("a")
                .with_property("href", "javascript:alert(1)")
                .with_children(vec![Node::text("x")])
                .into_node(),
        ]);
        assert_eq!(render(&root, &BTreeMap::new()), "<p>a &lt; b <a>x</a></p>\n");
    }

    #[test]
    fn raw_nodes_are_cleaned_on_output() {
        let root = paragraph(vec![Node::raw("<b onclick=\"x()\">hi</b><script>x()</script>")]);
        assert_eq!(render(&root, &BTreeMap::new()), "<p><b>hi</b></p>\n");
    }

    #[test]
    fn fragment_escapes_text_and_attributes() {
        let nodes = vec![
            Node::text("a < b "),
            Element::new("a")
                .with_property("title", "\"q\"")
                .with_children(vec![Node::text("x")])
                .into_node(),
            Element::new("br").into_node(),
        ];
        let mut out = String::new();
        write_fragment(&mut out, &nodes).unwrap();
        assert_eq!(out, "a &lt; b <a title=\"&quot;q&quot;\">x</a><br>");
    }

    #[test]
    fn inert_citation_writes_nothing() {
        let mut citations = BTreeMap::new();
        citations.insert(0, RenderDecision::Inert);
        let root = paragraph(vec![Node::text("x"), citation(0), citation(5)]);
        assert_eq!(render(&root, &citations), "<p>x</p>\n");
    }

    #[test]
    fn media_and_popover_markup() {
        let mut citations = BTreeMap::new();
        citations.insert(
            0,
            RenderDecision::InlineMedia {
                image_id: "img1".into(),
                src: "/v1/document/image/img1".into(),
                alt: "chart.png".into(),
            },
        );
        citations.insert(
            1,
            RenderDecision::CitationPopover(Popover {
                chunk_id: "c1".into(),
                sanitized_content: "<b>hi</b>".into(),
                document: Some(DocumentLink {
                    doc_id: "d1".into(),
                    doc_name: "memo.docx".into(),
                    target: LinkTarget::Preview,
                }),
            }),
        );
        let root = paragraph(vec![citation(0), citation(1), citation(1)]);
        let html = render(&root, &citations);
        assert!(html.starts_with(
            "<p><img class=\"citation-media\" src=\"/v1/document/image/img1\" \
             alt=\"chart.png\" data-chunk-index=\"0\" />"
        ));
        assert!(html.contains("popovertarget=\"citation-1\""));
        assert!(html.contains("popovertarget=\"citation-2\""));
        assert!(html.contains(
            "<b>hi</b><button class=\"citation-document\" data-doc-id=\"d1\">memo.docx</button>"
        ));
    }

    #[test]
    fn reasoning_is_collapsed_with_summary() {
        let details = Element::new("details")
            .with_property("class", "think")
            .with_property("data-streaming", "true")
            .with_children(vec![
                Element::new("p")
                    .with_children(vec![Node::text("thinking")])
                    .into_node(),
            ]);
        let root = Element::new(ROOT_TAG)
            .with_children(vec![details.into_node()])
            .into_node();
        insta::assert_snapshot!(render(&root, &BTreeMap::new()), @r#"
        <details class="think" data-streaming="true"><summary>Reasoning</summary>
        <p>thinking</p>
        </details>
        "#);
    }

    #[test]
    fn math_without_rendering_shows_source() {
        let math = Element::new("span")
            .with_property("class", "math math-inline")
            .with_children(vec![Node::text("a<b")]);
        let root = paragraph(vec![math.into_node()]);
        assert_eq!(
            render(&root, &BTreeMap::new()),
            "<p><span class=\"math math-inline\"><code>a&lt;b</code></span></p>\n"
        );
    }
}
