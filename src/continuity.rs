//! Continuity context for sequence-aware generation.
//!
//! Only the tail of the immediately preceding part is passed on, so the
//! prompt stays bounded no matter how long the document grows.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::store::PartRepository;

pub struct ContinuityManager {
    parts: Arc<dyn PartRepository>,
    max_words: usize,
}

impl ContinuityManager {
    pub fn new(parts: Arc<dyn PartRepository>, max_words: usize) -> Self {
        Self { parts, max_words }
    }

    /// Context for the part with `sequence`, drawn from part `sequence - 1`.
    ///
    /// `None` for the first part, or when the preceding part is missing or
    /// empty.
    pub async fn token_for(&self, document_id: Uuid, sequence: u32) -> Result<Option<String>> {
        if sequence <= 1 {
            return Ok(None);
        }
        let previous = self
            .parts
            .find_by_sequence(document_id, sequence - 1)
            .await?;
        Ok(previous.and_then(|p| bounded_tail(&p.content, self.max_words)))
    }
}

/// The last `max_words` words of `text`, prefixed with an ellipsis when
/// anything was cut. Section markers are dropped.
pub fn bounded_tail(text: &str, max_words: usize) -> Option<String> {
    let text = text.replace(crate::generation::SECTION_MARKER, " ");
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || max_words == 0 {
        return None;
    }
    let start = words.len().saturating_sub(max_words);
    let tail = words[start..].join(" ");
    Some(if start > 0 { format!("… {tail}") } else { tail })
}
