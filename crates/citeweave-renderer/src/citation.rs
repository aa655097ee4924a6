//! Turns a resolved chunk index into something a UI can draw.

use crate::sanitize::Sanitizer;
use citeweave_common::{Chunk, Config, DocumentAggregate, ReferenceTable};
use serde::Serialize;
use smol_str::SmolStr;

/// How one citation is shown.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RenderDecision {
    /// Nothing usable behind the marker; draws nothing.
    Inert,
    InlineMedia {
        image_id: SmolStr,
        src: String,
        alt: SmolStr,
    },
    CitationPopover(Popover),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Popover {
    pub chunk_id: SmolStr,
    /// Chunk content after sanitizing, safe to insert as HTML.
    pub sanitized_content: String,
    /// Missing for chunks whose document is not in the table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentLink {
    pub doc_id: SmolStr,
    pub doc_name: SmolStr,
    pub target: LinkTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkTarget {
    /// Opens the document at its own URL.
    External { url: String },
    /// Handed to the [`CitationHandler`] for an in-app preview.
    Preview,
}

/// Result of activating a citation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CitationAction {
    Navigate(String),
    Previewed,
    None,
}

/// Receives clicks on citations that have no directly viewable document.
pub trait CitationHandler {
    fn click_document(&self, document_id: &str, chunk: &Chunk);
}

impl CitationHandler for () {
    fn click_document(&self, _document_id: &str, _chunk: &Chunk) {}
}

/// Adapts a closure into a [`CitationHandler`].
pub struct ClickCallback<F>(pub F);

impl<F> CitationHandler for ClickCallback<F>
where
    F: Fn(&str, &Chunk),
{
    fn click_document(&self, document_id: &str, chunk: &Chunk) {
        (self.0)(document_id, chunk)
    }
}

pub struct CitationRenderer<'a> {
    config: &'a Config,
    sanitizer: &'a Sanitizer,
}

impl<'a> CitationRenderer<'a> {
    pub fn new(config: &'a Config, sanitizer: &'a Sanitizer) -> Self {
        Self { config, sanitizer }
    }

    /// Decide how the chunk at `index` renders. Never fails.
    pub fn decide(&self, index: usize, table: &ReferenceTable) -> RenderDecision {
        let Some(chunk) = table.chunk(index) else {
            tracing::debug!(index, len = table.len(), "citation points past the chunk table");
            return RenderDecision::Inert;
        };
        if chunk.id.is_empty() {
            tracing::debug!(index, "chunk has no id");
            return RenderDecision::Inert;
        }
        let doc = table.document(&chunk.document_id);
        if doc.is_none() {
            tracing::debug!(index, document_id = %chunk.document_id, "orphaned chunk");
        }

        if self.config.is_media_type(&chunk.doc_type) {
            if let Some(image_id) = chunk.image_id.as_ref().filter(|id| !id.is_empty()) {
                let alt = doc
                    .map(|d| d.doc_name.clone())
                    .or_else(|| chunk.document_name.clone())
                    .unwrap_or_else(|| chunk.id.clone());
                return RenderDecision::InlineMedia {
                    image_id: image_id.clone(),
                    src: format!("{}{}", self.config.image_url_prefix, image_id),
                    alt,
                };
            }
        }

        RenderDecision::CitationPopover(Popover {
            chunk_id: chunk.id.clone(),
            sanitized_content: self.sanitizer.clean(&chunk.content),
            document: doc.map(|d| self.link(d)),
        })
    }

    fn link(&self, doc: &DocumentAggregate) -> DocumentLink {
        let viewable = doc
            .extension()
            .is_some_and(|ext| self.config.is_viewable_extension(&ext));
        let target = match &doc.url {
            Some(url) if viewable && self.sanitizer.is_safe_url(url) => {
                LinkTarget::External { url: url.clone() }
            }
            _ => LinkTarget::Preview,
        };
        DocumentLink {
            doc_id: doc.doc_id.clone(),
            doc_name: doc.doc_name.clone(),
            target,
        }
    }
}

impl RenderDecision {
    /// Act on a click. Previewable documents go to `handler` with the chunk
    /// that was cited; viewable ones navigate.
    pub fn activate(
        &self,
        chunk: Option<&Chunk>,
        handler: &impl CitationHandler,
    ) -> CitationAction {
        let RenderDecision::CitationPopover(Popover {
            document: Some(link),
            ..
        }) = self
        else {
            return CitationAction::None;
        };
        match (&link.target, chunk) {
            (LinkTarget::External { url }, _) => CitationAction::Navigate(url.clone()),
            (LinkTarget::Preview, Some(chunk)) => {
                handler.click_document(&link.doc_id, chunk);
                CitationAction::Previewed
            }
            (LinkTarget::Preview, None) => CitationAction::None,
        }
    }
}
