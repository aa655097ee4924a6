//! Citeweave renderer
//!
//! Turns the text of a model answer, complete or still streaming, into a
//! sanitized document tree with its citation markers resolved against a
//! [`ReferenceTable`], and writes that tree out as HTML.
//!

use citeweave_common::{Config, ReferenceTable};
use markdown_weaver::Options;
use markdown_weaver_escape::StrWrite;
use serde::Serialize;
use std::collections::BTreeMap;

pub mod builder;
pub mod citation;
pub mod html;
#[cfg(feature = "math")]
pub mod math;
pub mod normalize;
pub mod resolve;
pub mod sanitize;
pub mod tree;

use citation::{CitationAction, CitationHandler, CitationRenderer, RenderDecision};
use html::HtmlWriter;
use resolve::{Resolution, resolve_references};
use sanitize::Sanitizer;
use tree::Node;

/// One render of an answer.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedAnswer {
    pub root: Node,
    /// Decision for every chunk index cited in `root`.
    pub citations: BTreeMap<usize, RenderDecision>,
    pub annotated: usize,
    pub unresolved: usize,
}

/// The full pipeline: normalize, parse, sanitize, resolve citations.
///
/// Rendering holds no state between calls, so a streaming UI can call
/// [`Renderer::render`] on every update and drop stale results freely.
pub struct Renderer<H = ()> {
    config: Config,
    sanitizer: Sanitizer,
    options: Options,
    handler: H,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Renderer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sanitizer: Sanitizer::default(),
            options: builder::default_md_options(),
            handler: (),
        }
    }
}

impl<H: CitationHandler> Renderer<H> {
    /// Receive clicks on citations whose document opens in-app.
    pub fn with_citation_handler<H2: CitationHandler>(self, handler: H2) -> Renderer<H2> {
        Renderer {
            config: self.config,
            sanitizer: self.sanitizer,
            options: self.options,
            handler,
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    #[tracing::instrument(level = "debug", skip_all, fields(len = raw.len(), chunks = table.len()))]
    pub fn render(&self, raw: &str, table: &ReferenceTable) -> RenderedAnswer {
        let text = normalize::normalize(raw);
        let tree = builder::build(&text, self.options);
        let tree = self.sanitize_raw(&tree);
        let Resolution {
            root,
            annotated,
            unresolved,
        } = resolve_references(&tree, table.len());

        let decider = CitationRenderer::new(&self.config, &self.sanitizer);
        let mut citations = BTreeMap::new();
        for index in root.annotations() {
            citations
                .entry(index)
                .or_insert_with(|| decider.decide(index, table));
        }
        tracing::debug!(annotated, unresolved, cited = citations.len(), "rendered answer");

        RenderedAnswer {
            root,
            citations,
            annotated,
            unresolved,
        }
    }

    /// Replace every `Raw` node with the sanitized nodes it parses to, so
    /// markers in raw HTML reach the resolver as text.
    fn sanitize_raw(&self, root: &Node) -> Node {
        root.rewrite(|node, _| match node {
            Node::Raw(html) => Some(self.sanitizer.clean_fragment(html)),
            Node::Text(_) | Node::Element(_) => None,
        })
    }

    pub fn write_html<W: StrWrite>(
        &self,
        answer: &RenderedAnswer,
        writer: W,
    ) -> Result<W, W::Error> {
        HtmlWriter::new(writer, &self.config, &self.sanitizer, &answer.citations).run(&answer.root)
    }

    pub fn to_html(&self, answer: &RenderedAnswer) -> String {
        let mut out = String::new();
        let written = self.write_html(answer, &mut out);
        debug_assert!(written.is_ok(), "writing to a String cannot fail");
        out
    }

    /// Activate the citation of chunk `index` in `answer`.
    pub fn activate(
        &self,
        answer: &RenderedAnswer,
        table: &ReferenceTable,
        index: usize,
    ) -> CitationAction {
        match answer.citations.get(&index) {
            Some(decision) => decision.activate(table.chunk(index), &self.handler),
            None => CitationAction::None,
        }
    }
}
