//! One-shot revision of a rendered part.
//!
//! A part may be edited exactly once. [`EditManager::start_edit`] hands out
//! the current content; [`EditManager::commit_edit`] renders (or accepts) the
//! replacement, uploads it, and then flips the part's edit lock together with
//! the new content in a single compare-and-set. Of two racing commits only
//! one wins the lock; the loser's upload is left behind and logged.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::budget::BudgetTracker;
use crate::error::{ForgeError, Result};
use crate::model::{Document, Part, PartRevision};
use crate::pipeline::{count_pages, render_off_thread, RenderMetadata, Renderer};
use crate::storage::{artifact_key, ObjectStorage};
use crate::store::{DocumentRepository, PartRepository};

/// Handed to the caller when an edit begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    pub part_id: Uuid,
    pub content: String,
    /// Opaque; identifies the session in logs.
    pub token: Uuid,
}

/// What a commit replaces the part with.
#[derive(Debug, Clone)]
pub enum EditPayload {
    /// New text, rendered with the part's original settings.
    Content(String),
    /// A finished PDF supplied by the caller.
    Artifact(Vec<u8>),
}

pub struct EditManager {
    documents: Arc<dyn DocumentRepository>,
    parts: Arc<dyn PartRepository>,
    storage: Arc<dyn ObjectStorage>,
    renderer: Arc<Renderer>,
    budget: Arc<BudgetTracker>,
    render_timeout: Duration,
}

impl EditManager {
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        parts: Arc<dyn PartRepository>,
        storage: Arc<dyn ObjectStorage>,
        renderer: Arc<Renderer>,
        budget: Arc<BudgetTracker>,
    ) -> Self {
        let render_timeout = renderer.config().timeout();
        Self {
            documents,
            parts,
            storage,
            renderer,
            budget,
            render_timeout,
        }
    }

    /// Load a part that `owner_id` may still edit, along with its document.
    async fn editable(&self, part_id: Uuid, owner_id: &str) -> Result<(Part, Document)> {
        let part = self.parts.get(part_id).await?.ok_or(ForgeError::NotFound {
            entity: "part",
            id: part_id,
        })?;
        if part.owner_id != owner_id {
            return Err(ForgeError::Unauthorized {
                entity: "part",
                id: part_id,
                owner_id: owner_id.to_string(),
            });
        }
        let document = self
            .documents
            .get(part.document_id)
            .await?
            .ok_or(ForgeError::NotFound {
                entity: "document",
                id: part.document_id,
            })?;
        if part.edit_locked {
            return Err(ForgeError::AlreadyLocked { part_id });
        }
        Ok((part, document))
    }

    pub async fn start_edit(&self, part_id: Uuid, owner_id: &str) -> Result<EditSession> {
        let (part, _) = self.editable(part_id, owner_id).await?;
        let session = EditSession {
            part_id,
            content: part.content,
            token: Uuid::new_v4(),
        };
        log::info!("Edit {} opened on part {part_id}", session.token);
        Ok(session)
    }

    /// Commit the single permitted revision and return the new artifact
    /// address. Edits are not checked against the page allowance; the
    /// aggregate is recomputed and clamped afterwards.
    pub async fn commit_edit(
        &self,
        part_id: Uuid,
        owner_id: &str,
        payload: EditPayload,
    ) -> Result<String> {
        let (part, document) = self.editable(part_id, owner_id).await?;

        let (bytes, page_count, content) = match payload {
            EditPayload::Content(text) => {
                if text.trim().is_empty() {
                    return Err(ForgeError::InvalidRequest(
                        "edited content is empty".to_string(),
                    ));
                }
                let metadata = RenderMetadata {
                    title: document.title.clone(),
                    author: document.author.clone(),
                    kind: document.kind,
                    part_title: Some(part.title.clone()),
                };
                let artifact = render_off_thread(
                    Arc::clone(&self.renderer),
                    text.clone(),
                    part.render.clone(),
                    metadata,
                    self.render_timeout,
                )
                .await?;
                (artifact.bytes, artifact.page_count, Some(text))
            }
            EditPayload::Artifact(bytes) => {
                let pages = count_pages(&bytes)?;
                (bytes, pages, None)
            }
        };

        let key = artifact_key(part.document_id, part.sequence, &bytes);
        let address = self.storage.put(bytes, &key, "application/pdf").await?;

        let revision = PartRevision {
            content,
            artifact_url: address.clone(),
            page_count,
        };
        if !self.parts.commit_revision(part_id, revision).await? {
            log::warn!("Part {part_id} was edited concurrently; upload '{address}' is orphaned");
            return Err(ForgeError::AlreadyLocked { part_id });
        }
        log::info!(
            "Part {part_id} revised: {} -> {page_count} page(s) at {address}",
            part.page_count
        );

        self.budget.recompute(part.document_id).await?;
        Ok(address)
    }
}
