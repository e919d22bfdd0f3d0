//! Context resolution policy.
//!
//! Tables rarely carry their own units, reference dates, or subject; that
//! information usually sits in the text block right above them. When a
//! table directly follows a text block of the same section, the policy
//! folds a bounded excerpt of that text into the table's embedding input.
//!
//! # Rule
//!
//! Context is injected if and only if:
//! - the current block is a table,
//! - a predecessor exists,
//! - the predecessor is a text block, and
//! - both blocks have exactly the same `section_path`.
//!
//! The policy is pure: it never touches storage or the model.

use crate::models::ContentBlock;

/// Default character budget for injected context.
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 500;

/// Marker appended to context that was cut to fit the budget.
pub const TRUNCATION_MARKER: &str = "...";

/// Header placeholder for blocks without a section path.
pub const UNKNOWN_SECTION: &str = "unknown";

/// Embedding input produced for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedText {
    pub text: String,
    pub context_injected: bool,
}

/// Parameters for building embedding inputs.
#[derive(Debug, Clone)]
pub struct ContextPolicy {
    /// Maximum number of characters of predecessor text to inject.
    pub max_context_chars: usize,
}

impl Default for ContextPolicy {
    fn default() -> Self {
        Self {
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
        }
    }
}

impl ContextPolicy {
    pub fn new(max_context_chars: usize) -> Self {
        Self { max_context_chars }
    }

    /// Whether `current` should receive `previous` as context.
    pub fn should_inject(&self, current: &ContentBlock, previous: Option<&ContentBlock>) -> bool {
        match previous {
            Some(prev) => {
                current.is_table() && prev.is_text() && prev.section_path == current.section_path
            }
            None => false,
        }
    }

    /// Build the embedding input for `current` given its immediate predecessor.
    pub fn resolve(&self, current: &ContentBlock, previous: Option<&ContentBlock>) -> ResolvedText {
        let path = current.section_path.as_deref().unwrap_or(UNKNOWN_SECTION);

        if let Some(prev) = previous.filter(|p| self.should_inject(current, Some(p))) {
            let context = truncate_with_marker(&prev.raw_content, self.max_context_chars);
            return ResolvedText {
                text: format!(
                    "Document path: {}\n[Context: {}]\n[Table data]\n{}",
                    path, context, current.raw_content
                ),
                context_injected: true,
            };
        }

        ResolvedText {
            text: format!("Document path: {}\n{}", path, current.raw_content),
            context_injected: false,
        }
    }
}

/// Keep the first `max_chars` characters of `text`, appending
/// [`TRUNCATION_MARKER`] only when something was cut.
///
/// Counts Unicode scalar values, so multi-byte text is never split
/// inside a character.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + TRUNCATION_MARKER.len());
            out.push_str(&text[..byte_idx]);
            out.push_str(TRUNCATION_MARKER);
            out
        }
        None => text.to_string(),
    }
}
