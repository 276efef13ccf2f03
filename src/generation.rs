//! Generation orchestrator.
//!
//! A request for more pages than one call may produce is split into an
//! explicit, ordered plan of sub-requests. The plan is executed strictly in
//! order with a pause between calls, and the first failure aborts the rest.
//! Outputs are joined with [`SECTION_MARKER`], which the renderer later
//! turns into page containers.

use std::sync::Arc;

use crate::completion::{CompletionRequest, TextCompletion};
use crate::config::GenerationConfig;
use crate::continuity::bounded_tail;
use crate::error::{ForgeError, Result};
use crate::profile::Profile;
use crate::protect::{self, ProtectionMap};

/// Delimiter between independently generated sections.
pub const SECTION_MARKER: &str = "<!-- section-break -->";

/// One bounded sub-call of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    pub index: usize,
    pub total: usize,
    pub pages: u32,
    pub target_words: u32,
}

/// Split `page_target` into calls of at most `max_per_call` pages:
/// `max, max, …, remainder`.
pub fn plan_chunks(page_target: u32, max_per_call: u32, words_per_page: u32) -> Vec<ChunkRequest> {
    let max = max_per_call.max(1);
    let total = page_target.div_ceil(max) as usize;
    (0..total)
        .map(|index| {
            let done = index as u32 * max;
            let pages = (page_target - done).min(max);
            ChunkRequest {
                index,
                total,
                pages,
                target_words: pages * words_per_page,
            }
        })
        .collect()
}

/// Validated input, ready to be sent chunk by chunk.
#[derive(Debug, Clone)]
pub struct PreparedGeneration {
    pub profile: Profile,
    pub source: String,
    pub protection: ProtectionMap,
    pub plan: Vec<ChunkRequest>,
}

pub struct Orchestrator {
    completion: Arc<dyn TextCompletion>,
    config: GenerationConfig,
}

impl Orchestrator {
    pub fn new(completion: Arc<dyn TextCompletion>, config: GenerationConfig) -> Self {
        Self { completion, config }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Check limits, protect literal spans, and plan the sub-calls. Makes no
    /// external call.
    pub fn prepare(
        &self,
        source: &str,
        profile: Profile,
        page_target: u32,
    ) -> Result<PreparedGeneration> {
        let words = source.split_whitespace().count();
        if words > self.config.max_source_words {
            return Err(ForgeError::InputTooLarge {
                words,
                limit: self.config.max_source_words,
            });
        }
        if page_target == 0 {
            return Err(ForgeError::InvalidRequest(
                "page target must be at least 1".to_string(),
            ));
        }

        let (source, protection) = if profile.requires_protection() {
            protect::encode(source)
        } else {
            (source.to_string(), ProtectionMap::default())
        };
        let plan = plan_chunks(
            page_target,
            self.config.max_pages_per_call,
            self.config.words_per_page,
        );
        log::debug!(
            "Planned {} call(s) for {page_target} pages ({profile}, {} protected span(s))",
            plan.len(),
            protection.len()
        );
        Ok(PreparedGeneration {
            profile,
            source,
            protection,
            plan,
        })
    }

    /// Run a full generation.
    ///
    /// `continuity` is used only when `sequence > 1`.
    pub async fn generate(
        &self,
        source: &str,
        profile: Profile,
        continuity: Option<&str>,
        sequence: u32,
        page_target: u32,
    ) -> Result<String> {
        let prepared = self.prepare(source, profile, page_target)?;

        let mut context = continuity
            .filter(|_| sequence > 1)
            .map(str::to_string);
        let mut sections = Vec::with_capacity(prepared.plan.len());

        for chunk in &prepared.plan {
            if chunk.index > 0 {
                tokio::time::sleep(self.config.inter_call_delay()).await;
            }
            let text = self
                .generate_chunk(&prepared, chunk, context.as_deref())
                .await
                .inspect_err(|e| {
                    log::warn!(
                        "Section {}/{} failed, abandoning the remaining {}: {e}",
                        chunk.index + 1,
                        chunk.total,
                        chunk.total - chunk.index - 1
                    )
                })?;
            context = bounded_tail(&text, self.config.continuity_words);
            sections.push(text);
        }

        Ok(sections.join(&format!("\n\n{SECTION_MARKER}\n\n")))
    }

    /// Execute one planned sub-call under the call deadline and restore the
    /// protected spans in its output.
    pub async fn generate_chunk(
        &self,
        prepared: &PreparedGeneration,
        chunk: &ChunkRequest,
        continuity: Option<&str>,
    ) -> Result<String> {
        let section = (chunk.total > 1).then_some((chunk.index, chunk.total));
        let placeholder =
            (!prepared.protection.is_empty()).then(|| prepared.protection.token_shape());
        let request = CompletionRequest {
            profile: prepared.profile,
            continuity: continuity.map(str::to_string),
            instructions: prepared.profile.instructions(
                chunk.target_words,
                section,
                placeholder.as_deref(),
            ),
            user_content: prepared.source.clone(),
            target_words: chunk.target_words,
            pages: chunk.pages,
            section,
        };

        let timeout = self.config.call_timeout();
        let raw = tokio::time::timeout(timeout, self.completion.complete(&request))
            .await
            .map_err(|_| ForgeError::Timeout {
                stage: "text completion",
                seconds: timeout.as_secs(),
            })??;

        if prepared.protection.is_empty() {
            return Ok(raw);
        }
        let missing = prepared.protection.missing_in(&raw);
        if !missing.is_empty() {
            log::warn!(
                "Completion dropped {} of {} protected span(s) in section {}",
                missing.len(),
                prepared.protection.len(),
                chunk.index + 1
            );
        }
        Ok(protect::decode(&raw, &prepared.protection))
    }
}
