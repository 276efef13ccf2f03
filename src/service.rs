//! Caller-facing operations.
//!
//! [`BookForge`] wires the orchestrator, renderer, budget tracker and edit
//! manager over injected persistence, storage and completion ports. A part
//! is produced in stages:
//!
//! 1. budget pre-flight (no external call when it fails)
//! 2. continuity lookup and text generation
//! 3. rendering on the blocking pool
//! 4. upload, then part insert
//! 5. aggregate recomputation under the document lock
//!
//! Ownership is plain owner-id equality; deciding who the caller is happens
//! elsewhere.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::budget::{check_allowance, BudgetTracker, DocumentStatus};
use crate::completion::TextCompletion;
use crate::config::ForgeConfig;
use crate::continuity::ContinuityManager;
use crate::edit::{EditManager, EditPayload, EditSession};
use crate::error::{ForgeError, Result};
use crate::generation::Orchestrator;
use crate::model::{AssetRef, Document, DocumentKind, Part, RenderSettings};
use crate::pipeline::{render_off_thread, RenderMetadata, Renderer};
use crate::profile::Profile;
use crate::storage::{artifact_key, ObjectStorage};
use crate::store::{DocumentRepository, MemoryStore, PartRepository};

/// Input for [`BookForge::create_document`].
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub owner_id: String,
    pub title: String,
    pub author: String,
    pub kind: DocumentKind,
    pub profile: Profile,
    /// Falls back to the default theme.
    pub theme: Option<String>,
    pub font: Option<String>,
}

/// Input for [`BookForge::generate_part`].
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub document_id: Uuid,
    pub owner_id: String,
    /// Requested page target for this part.
    pub pages: u32,
    /// Source text for this part; defaults to the document's prompt.
    pub source: Option<String>,
    /// Defaults to "Part N".
    pub title: Option<String>,
    pub cover: Option<AssetRef>,
    pub cta_text: Option<String>,
    pub link: Option<String>,
}

pub struct BookForge {
    config: ForgeConfig,
    documents: Arc<dyn DocumentRepository>,
    parts: Arc<dyn PartRepository>,
    storage: Arc<dyn ObjectStorage>,
    orchestrator: Orchestrator,
    continuity: ContinuityManager,
    budget: Arc<BudgetTracker>,
    renderer: Arc<Renderer>,
    edits: EditManager,
}

impl BookForge {
    pub fn new(
        config: ForgeConfig,
        documents: Arc<dyn DocumentRepository>,
        parts: Arc<dyn PartRepository>,
        storage: Arc<dyn ObjectStorage>,
        completion: Arc<dyn TextCompletion>,
    ) -> Self {
        let budget = Arc::new(BudgetTracker::new(
            Arc::clone(&documents),
            Arc::clone(&parts),
            config.budget.page_cap,
        ));
        let renderer = Arc::new(Renderer::new(config.render.clone()));
        let edits = EditManager::new(
            Arc::clone(&documents),
            Arc::clone(&parts),
            Arc::clone(&storage),
            Arc::clone(&renderer),
            Arc::clone(&budget),
        );
        Self {
            orchestrator: Orchestrator::new(completion, config.generation.clone()),
            continuity: ContinuityManager::new(
                Arc::clone(&parts),
                config.generation.continuity_words,
            ),
            config,
            documents,
            parts,
            storage,
            budget,
            renderer,
            edits,
        }
    }

    /// Everything in one process-local [`MemoryStore`].
    pub fn in_memory(
        config: ForgeConfig,
        storage: Arc<dyn ObjectStorage>,
        completion: Arc<dyn TextCompletion>,
    ) -> Self {
        let store = MemoryStore::shared();
        Self::new(config, store.clone(), store, storage, completion)
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    async fn owned_document(&self, id: Uuid, owner_id: &str) -> Result<Document> {
        let doc = self.documents.get(id).await?.ok_or(ForgeError::NotFound {
            entity: "document",
            id,
        })?;
        if doc.owner_id != owner_id {
            return Err(ForgeError::Unauthorized {
                entity: "document",
                id,
                owner_id: owner_id.to_string(),
            });
        }
        Ok(doc)
    }

    pub async fn create_document(&self, new: NewDocument) -> Result<Document> {
        if new.owner_id.trim().is_empty() {
            return Err(ForgeError::InvalidRequest("owner id is empty".to_string()));
        }
        if new.title.trim().is_empty() {
            return Err(ForgeError::InvalidRequest("title is empty".to_string()));
        }
        let mut doc = Document::new(new.owner_id, new.title, new.author, new.kind, new.profile);
        if let Some(theme) = new.theme.filter(|t| !t.trim().is_empty()) {
            // Resolve now so an unknown name is reported at creation time.
            doc.theme = self.renderer.theme(&theme).name;
        }
        doc.font = new.font.filter(|f| !f.trim().is_empty());

        self.documents.insert(doc.clone()).await?;
        log::info!(
            "Created {:?} document {} ('{}', {} profile)",
            doc.kind,
            doc.id,
            doc.title,
            doc.profile
        );
        Ok(doc)
    }

    /// Store the prompt and move an empty document to `pending`.
    pub async fn attach_prompt(&self, id: Uuid, owner_id: &str, prompt: &str) -> Result<Document> {
        if prompt.trim().is_empty() {
            return Err(ForgeError::InvalidRequest("prompt is empty".to_string()));
        }
        let _guard = self.documents.lock(id).await;
        let mut doc = self.owned_document(id, owner_id).await?;
        if doc.status == DocumentStatus::AwaitingInput {
            doc.status = doc.status.transition(DocumentStatus::Pending)?;
        }
        doc.prompt = Some(prompt.to_string());
        doc.updated_at = Utc::now();
        self.documents.update(&doc).await?;
        log::info!("Document {id}: prompt attached, status {}", doc.status);
        Ok(doc)
    }

    /// Generate, render and store the next part of a document.
    pub async fn generate_part(&self, request: GenerateRequest) -> Result<Part> {
        let doc = self
            .owned_document(request.document_id, &request.owner_id)
            .await?;
        match doc.status {
            DocumentStatus::AwaitingInput => {
                return Err(ForgeError::InvalidRequest(
                    "attach a prompt before generating".to_string(),
                ))
            }
            DocumentStatus::Completed => {
                return Err(ForgeError::InvalidTransition {
                    from: doc.status.to_string(),
                    to: DocumentStatus::InProgress.to_string(),
                })
            }
            _ => {}
        }
        check_allowance(doc.total_pages, request.pages, self.budget.cap())?;

        let source = match request.source.as_deref().or(doc.prompt.as_deref()) {
            Some(s) if !s.trim().is_empty() => s.to_string(),
            _ => return Err(ForgeError::InvalidRequest("no source text".to_string())),
        };
        let sequence = self.parts.next_sequence(doc.id).await?;
        let continuity = self.continuity.token_for(doc.id, sequence).await?;

        log::info!(
            "Document {}: generating part {sequence} ({} pages, {} pages used)",
            doc.id,
            request.pages,
            doc.total_pages
        );
        let content = self
            .orchestrator
            .generate(
                &source,
                doc.profile,
                continuity.as_deref(),
                sequence,
                request.pages,
            )
            .await?;

        let title = request
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("Part {sequence}"));
        let settings = RenderSettings {
            theme: doc.theme.clone(),
            font: doc.font.clone(),
            cover: request.cover.clone(),
            cta_text: request.cta_text.clone(),
            link: request.link.clone(),
        };

        let stored = self.render_and_store(&doc, sequence, &title, &content, &settings).await;
        let (artifact_url, page_count) = match stored {
            Ok(stored) => stored,
            Err(e) => {
                // Deadlines leave the status alone; render and upload
                // failures do not.
                if !e.is_retryable() {
                    log::warn!("Document {}: part {sequence} failed terminally: {e}", doc.id);
                    self.budget.mark_failed(doc.id).await?;
                }
                return Err(e);
            }
        };

        let now = Utc::now();
        let part = Part {
            id: Uuid::new_v4(),
            document_id: doc.id,
            owner_id: doc.owner_id.clone(),
            sequence,
            title,
            content,
            artifact_url,
            page_count,
            edit_locked: false,
            render: settings,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.parts.insert(part.clone()).await {
            log::warn!(
                "Part {sequence} of document {} not saved; upload '{}' is orphaned",
                doc.id,
                part.artifact_url
            );
            return Err(e);
        }

        let usage = self.budget.recompute(doc.id).await?;
        log::info!(
            "Document {}: part {sequence} stored ({page_count} pages); {}/{} used, {}",
            doc.id,
            usage.stored_total,
            self.budget.cap(),
            usage.status
        );
        Ok(part)
    }

    async fn render_and_store(
        &self,
        doc: &Document,
        sequence: u32,
        title: &str,
        content: &str,
        settings: &RenderSettings,
    ) -> Result<(String, u32)> {
        let metadata = RenderMetadata {
            title: doc.title.clone(),
            author: doc.author.clone(),
            kind: doc.kind,
            part_title: Some(title.to_string()),
        };
        let artifact = render_off_thread(
            Arc::clone(&self.renderer),
            content.to_string(),
            settings.clone(),
            metadata,
            self.config.render.timeout(),
        )
        .await?;

        let key = artifact_key(doc.id, sequence, &artifact.bytes);
        let url = self
            .storage
            .put(artifact.bytes, &key, "application/pdf")
            .await?;
        Ok((url, artifact.page_count))
    }

    pub async fn start_edit(&self, part_id: Uuid, owner_id: &str) -> Result<EditSession> {
        self.edits.start_edit(part_id, owner_id).await
    }

    pub async fn commit_edit(
        &self,
        part_id: Uuid,
        owner_id: &str,
        payload: EditPayload,
    ) -> Result<String> {
        self.edits.commit_edit(part_id, owner_id, payload).await
    }

    pub async fn get_document(&self, id: Uuid, owner_id: &str) -> Result<Document> {
        self.owned_document(id, owner_id).await
    }

    pub async fn list_parts(&self, id: Uuid, owner_id: &str) -> Result<Vec<Part>> {
        let doc = self.owned_document(id, owner_id).await?;
        self.parts.list(doc.id).await
    }

    /// Soft-delete; the document disappears from every read.
    pub async fn delete_document(&self, id: Uuid, owner_id: &str) -> Result<()> {
        let _guard = self.documents.lock(id).await;
        self.owned_document(id, owner_id).await?;
        if self.documents.soft_delete(id, Utc::now()).await? {
            log::info!("Document {id} deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionRequest;
    use crate::storage::LocalObjectStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextCompletion for Scripted {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("# Section\n\n{}", request.user_content))
        }
    }

    struct BrokenStorage;

    #[async_trait]
    impl ObjectStorage for BrokenStorage {
        async fn put(&self, _bytes: Vec<u8>, key: &str, _content_type: &str) -> Result<String> {
            Err(ForgeError::StorageUpload {
                key: key.to_string(),
                message: "bucket unavailable".to_string(),
            })
        }
    }

    fn config() -> ForgeConfig {
        let mut config = ForgeConfig::default();
        config.generation.inter_call_delay_ms = 1;
        config
    }

    fn forge(storage: Arc<dyn ObjectStorage>) -> (BookForge, Arc<Scripted>) {
        let completion = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
        });
        (
            BookForge::in_memory(config(), storage, completion.clone()),
            completion,
        )
    }

    fn new_doc() -> NewDocument {
        NewDocument {
            owner_id: "ann".into(),
            title: "Field Notes".into(),
            author: "Ann".into(),
            kind: DocumentKind::Guide,
            ..NewDocument::default()
        }
    }

    #[tokio::test]
    async fn lifecycle_from_creation_to_first_part() {
        let dir = tempfile::tempdir().unwrap();
        let (forge, calls) = forge(Arc::new(LocalObjectStore::new(dir.path(), "file://a")));

        let doc = forge.create_document(new_doc()).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::AwaitingInput);

        let early = forge
            .generate_part(GenerateRequest {
                document_id: doc.id,
                owner_id: "ann".into(),
                pages: 1,
                ..GenerateRequest::default()
            })
            .await;
        assert!(matches!(early, Err(ForgeError::InvalidRequest(_))));

        assert!(matches!(
            forge.attach_prompt(doc.id, "ann", "   ").await,
            Err(ForgeError::InvalidRequest(_))
        ));
        let doc = forge.attach_prompt(doc.id, "ann", "Birds of the coast").await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Pending);

        let part = forge
            .generate_part(GenerateRequest {
                document_id: doc.id,
                owner_id: "ann".into(),
                pages: 2,
                ..GenerateRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(part.sequence, 1);
        assert_eq!(part.title, "Part 1");
        assert_eq!(calls.calls.load(Ordering::SeqCst), 1);

        let doc = forge.get_document(doc.id, "ann").await.unwrap();
        assert_eq!(doc.status, DocumentStatus::InProgress);
        assert_eq!(doc.total_pages, part.page_count);
        assert_eq!(forge.list_parts(doc.id, "ann").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn other_owners_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (forge, _) = forge(Arc::new(LocalObjectStore::new(dir.path(), "file://a")));
        let doc = forge.create_document(new_doc()).await.unwrap();

        assert!(matches!(
            forge.get_document(doc.id, "bob").await,
            Err(ForgeError::Unauthorized { .. })
        ));
        assert!(matches!(
            forge.delete_document(doc.id, "bob").await,
            Err(ForgeError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn deleted_documents_are_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let (forge, _) = forge(Arc::new(LocalObjectStore::new(dir.path(), "file://a")));
        let doc = forge.create_document(new_doc()).await.unwrap();
        forge.delete_document(doc.id, "ann").await.unwrap();
        assert!(matches!(
            forge.get_document(doc.id, "ann").await,
            Err(ForgeError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn upload_failure_marks_failed_and_saves_nothing() {
        let (forge, _) = forge(Arc::new(BrokenStorage));
        let doc = forge.create_document(new_doc()).await.unwrap();
        forge.attach_prompt(doc.id, "ann", "topic").await.unwrap();

        let err = forge
            .generate_part(GenerateRequest {
                document_id: doc.id,
                owner_id: "ann".into(),
                pages: 1,
                ..GenerateRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::StorageUpload { .. }));
        assert!(!err.is_retryable());
        assert!(forge.list_parts(doc.id, "ann").await.unwrap().is_empty());
        let doc = forge.get_document(doc.id, "ann").await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.total_pages, 0);
    }

    #[tokio::test]
    async fn failed_document_recovers_on_next_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::shared();
        let completion = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
        });
        let broken = BookForge::new(
            config(),
            store.clone(),
            store.clone(),
            Arc::new(BrokenStorage),
            completion.clone(),
        );
        let working = BookForge::new(
            config(),
            store.clone(),
            store.clone(),
            Arc::new(LocalObjectStore::new(dir.path(), "file://a")),
            completion,
        );

        let doc = working.create_document(new_doc()).await.unwrap();
        working.attach_prompt(doc.id, "ann", "topic").await.unwrap();
        let request = GenerateRequest {
            document_id: doc.id,
            owner_id: "ann".into(),
            pages: 1,
            ..GenerateRequest::default()
        };
        assert!(broken.generate_part(request.clone()).await.is_err());
        working.generate_part(request).await.unwrap();

        let doc = working.get_document(doc.id, "ann").await.unwrap();
        assert_eq!(doc.status, DocumentStatus::InProgress);
    }
}
