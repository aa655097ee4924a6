//! Allow-list HTML sanitizer for chunk content and raw HTML in answers.
//!
//! Cleaning is done by ammonia. Benign formatting tags pass through with a
//! filtered set of attributes. Script-like elements are removed together with
//! their content, every other unknown tag is removed but its text kept.
//! Sanitizing never fails.
//!
//! [`Sanitizer::clean_fragment`] parses the cleaned markup back into tree
//! nodes, so text inside raw HTML can still carry citations.

use crate::tree::{Element, Node};
use ammonia::{Builder, UrlRelative};
use scraper::{ElementRef, Html};
use std::collections::{HashMap, HashSet};

const ALLOWED_TAGS: &[&str] = &[
    "a", "abbr", "article", "b", "blockquote", "br", "caption", "cite", "code", "col",
    "colgroup", "dd", "del", "details", "dfn", "div", "dl", "dt", "em", "figcaption", "figure",
    "h1", "h2", "h3", "h4", "h5", "h6", "hr", "i", "img", "ins", "kbd", "li", "mark", "ol", "p",
    "pre", "q", "s", "samp", "section", "small", "span", "strike", "strong", "sub", "summary",
    "sup", "table", "tbody", "td", "tfoot", "th", "thead", "time", "tr", "u", "ul",
];

/// Removed along with everything inside them.
const DROP_WITH_CONTENT: &[&str] = &[
    "script", "style", "iframe", "object", "applet", "template", "noscript", "noembed",
    "noframes", "svg", "math", "textarea", "title", "xmp", "select",
];

const ALLOWED_ATTRIBUTES: &[&str] = &[
    "alt", "align", "class", "colspan", "dir", "height", "lang", "open", "rowspan", "scope",
    "span", "start", "title", "width", "datetime", "cite",
];

const URL_SCHEMES: &[&str] = &["http", "https", "mailto"];

const LINK_REL: &str = "noopener noreferrer";

pub struct Sanitizer {
    cleaner: Builder<'static>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        let url_attributes = HashMap::from([
            ("a", HashSet::from(["href"])),
            ("img", HashSet::from(["src"])),
        ]);
        let mut cleaner = Builder::empty();
        cleaner
            .tags(ALLOWED_TAGS.iter().copied().collect())
            .clean_content_tags(DROP_WITH_CONTENT.iter().copied().collect())
            .generic_attributes(ALLOWED_ATTRIBUTES.iter().copied().collect())
            .tag_attributes(url_attributes)
            .url_schemes(URL_SCHEMES.iter().copied().collect())
            .url_relative(UrlRelative::PassThrough)
            .link_rel(Some(LINK_REL))
            .strip_comments(true);
        Self { cleaner }
    }
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sanitized HTML for `input`.
    pub fn clean(&self, input: &str) -> String {
        let html = self.cleaner.clean(input).to_string();
        if html != input {
            tracing::debug!(before = input.len(), after = html.len(), "sanitized markup");
        }
        html
    }

    /// Sanitize `input` and parse what is left into tree nodes.
    pub fn clean_fragment(&self, input: &str) -> Vec<Node> {
        let html = self.clean(input);
        let fragment = Html::parse_fragment(&html);
        convert_children(fragment.root_element())
    }

    /// Relative references and allow-listed schemes only.
    ///
    /// Checked on URLs that never went through [`Sanitizer::clean`], such as
    /// markdown links and document addresses.
    pub fn is_safe_url(&self, url: &str) -> bool {
        let compact: String = url
            .chars()
            .filter(|c| !c.is_ascii_whitespace() && !c.is_control())
            .collect();
        let scheme_end = compact.find(':');
        let path_start = compact.find(['/', '?', '#']);
        match (scheme_end, path_start) {
            (None, _) => true,
            (Some(colon), Some(path)) if path < colon => true,
            (Some(colon), _) => {
                let scheme = compact[..colon].to_ascii_lowercase();
                URL_SCHEMES.contains(&scheme.as_str())
            }
        }
    }
}

fn convert_children(parent: ElementRef<'_>) -> Vec<Node> {
    let mut nodes = Vec::new();
    for child in parent.children() {
        match child.value() {
            scraper::Node::Text(text) => nodes.push(Node::text(&**text)),
            scraper::Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(child) {
                    nodes.push(convert_element(element));
                }
            }
            _ => {}
        }
    }
    nodes
}

fn convert_element(element: ElementRef<'_>) -> Node {
    let value = element.value();
    // attribute order from the parser is not stable
    let mut attrs: Vec<(&str, &str)> = value.attrs().collect();
    attrs.sort_unstable();
    let mut converted = Element::new(value.name());
    for (name, attr) in attrs {
        converted = converted.with_property(name, attr);
    }
    converted
        .with_children(convert_children(element))
        .into_node()
}
