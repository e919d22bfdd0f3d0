//! Core data models for content blocks and vector writes.
//!
//! A report (one regulatory filing) is decomposed by the acquisition layer
//! into an ordered run of [`ContentBlock`]s. The materialization pipeline
//! reads those blocks and writes back exactly two things per block: the
//! embedding vector and the `context_injected` flag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EmbedError;

/// Row identity of a content block (monotonically assigned by the store).
pub type BlockId = i64;

/// Identity of the owning report.
pub type DocumentId = i64;

/// The two block types produced by the acquisition layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Text,
    Table,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Text => "text",
            BlockKind::Table => "table",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockKind {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(BlockKind::Text),
            "table" => Ok(BlockKind::Table),
            other => Err(EmbedError::UnknownBlockKind(other.to_string())),
        }
    }
}

/// One typed unit of a report, in reading order.
///
/// `sequence_order` is unique within a document and strictly increasing in
/// reading order. It may have gaps when the acquisition layer filtered blocks.
/// Table blocks carry a canonical textual (markdown) serialization of the
/// table in `raw_content`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBlock {
    pub id: BlockId,
    pub document_id: DocumentId,
    pub block_kind: BlockKind,
    pub section_path: Option<String>,
    pub sequence_order: i64,
    pub raw_content: String,
}

impl ContentBlock {
    pub fn is_table(&self) -> bool {
        self.block_kind == BlockKind::Table
    }

    pub fn is_text(&self) -> bool {
        self.block_kind == BlockKind::Text
    }
}

/// A pending write of one block's embedding and context flag.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorWrite {
    pub block_id: BlockId,
    pub vector: Vec<f32>,
    pub context_injected: bool,
}
