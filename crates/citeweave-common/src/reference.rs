//! Reference table supplied alongside an answer.
//!
//! Chunks are addressed by their position in `chunks`; markers in answer text
//! carry that position. Document aggregates are looked up by id.

use crate::error::ParseError;
use miette::NamedSource;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::borrow::Cow;
use std::collections::HashMap;

/// A retrieved fragment of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: SmolStr,
    pub document_id: SmolStr,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<SmolStr>,
    #[serde(default)]
    pub doc_type: SmolStr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_name: Option<SmolStr>,
}

/// Metadata about a source document, independent of any chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAggregate {
    pub doc_id: SmolStr,
    pub doc_name: SmolStr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl DocumentAggregate {
    /// Lowercased file extension of `doc_name`, if it has one.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.doc_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

#[derive(Deserialize)]
struct ReferenceWire {
    #[serde(default)]
    chunks: Vec<Chunk>,
    #[serde(default, alias = "document_aggregates")]
    doc_aggs: Vec<DocumentAggregate>,
}

/// Immutable snapshot of the references for one render.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "ReferenceWire")]
pub struct ReferenceTable {
    chunks: Vec<Chunk>,
    doc_aggs: Vec<DocumentAggregate>,
    #[serde(skip)]
    by_doc_id: HashMap<SmolStr, usize>,
}

impl From<ReferenceWire> for ReferenceTable {
    fn from(wire: ReferenceWire) -> Self {
        Self::new(wire.chunks, wire.doc_aggs)
    }
}

impl ReferenceTable {
    pub fn new(chunks: Vec<Chunk>, doc_aggs: Vec<DocumentAggregate>) -> Self {
        let mut by_doc_id = HashMap::with_capacity(doc_aggs.len());
        for (idx, doc) in doc_aggs.iter().enumerate() {
            if by_doc_id.contains_key(&doc.doc_id) {
                tracing::debug!(doc_id = %doc.doc_id, "duplicate document aggregate ignored");
                continue;
            }
            by_doc_id.insert(doc.doc_id.clone(), idx);
        }
        Self {
            chunks,
            doc_aggs,
            by_doc_id,
        }
    }

    /// Parse a table from its JSON wire form. `name` labels the source in
    /// diagnostics.
    pub fn from_json(name: impl AsRef<str>, text: &str) -> Result<Self, ParseError> {
        serde_json::from_str(text).map_err(|err| {
            ParseError::from(err)
                .with_source(NamedSource::new(name, Cow::Owned(text.to_string())))
                .with_advice("expected an object with `chunks` and `doc_aggs` arrays")
        })
    }

    /// Bounds-checked chunk lookup.
    #[inline]
    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub fn document(&self, doc_id: &str) -> Option<&DocumentAggregate> {
        self.by_doc_id.get(doc_id).map(|&idx| &self.doc_aggs[idx])
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn documents(&self) -> &[DocumentAggregate] {
        &self.doc_aggs
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
