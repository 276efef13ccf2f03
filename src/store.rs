//! Persistence ports and the in-memory adapter.
//!
//! Each entity has its own repository trait. Reads through
//! [`DocumentRepository::get`] never return soft-deleted documents.
//! [`DocumentRepository::lock`] hands out a per-document guard that callers
//! hold across read-aggregate-then-write sequences.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::error::{ForgeError, Result};
use crate::model::{Document, Part, PartRevision};

/// Exclusive access to one document for the lifetime of the guard.
pub struct DocumentLock {
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn insert(&self, document: Document) -> Result<()>;

    /// `None` for unknown or soft-deleted documents.
    async fn get(&self, id: Uuid) -> Result<Option<Document>>;

    async fn update(&self, document: &Document) -> Result<()>;

    /// Returns `false` if the document was unknown or already deleted.
    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    async fn lock(&self, id: Uuid) -> DocumentLock;
}

#[async_trait]
pub trait PartRepository: Send + Sync {
    /// Fails with `Conflict` if the sequence number is taken.
    async fn insert(&self, part: Part) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Part>>;

    /// All parts of a document ordered by sequence number.
    async fn list(&self, document_id: Uuid) -> Result<Vec<Part>>;

    async fn find_by_sequence(&self, document_id: Uuid, sequence: u32) -> Result<Option<Part>>;

    /// One past the highest sequence number in use (1 for an empty document).
    async fn next_sequence(&self, document_id: Uuid) -> Result<u32>;

    /// `(sum of page counts, number of parts)`.
    async fn sum_pages(&self, document_id: Uuid) -> Result<(u32, usize)>;

    /// Apply `revision` and set the edit lock, but only if the lock is still
    /// clear. Returns `false` when another edit got there first.
    async fn commit_revision(&self, id: Uuid, revision: PartRevision) -> Result<bool>;
}

/// Process-local store for tests and the CLI.
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<Uuid, Document>>,
    parts: Mutex<HashMap<Uuid, Part>>,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn guard<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| ForgeError::Persistence("store mutex poisoned".to_string()))
}

#[async_trait]
impl DocumentRepository for MemoryStore {
    async fn insert(&self, document: Document) -> Result<()> {
        let mut docs = guard(&self.documents)?;
        if docs.contains_key(&document.id) {
            return Err(ForgeError::Conflict(format!(
                "document {} already exists",
                document.id
            )));
        }
        docs.insert(document.id, document);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Document>> {
        let docs = guard(&self.documents)?;
        Ok(docs.get(&id).filter(|d| !d.is_deleted()).cloned())
    }

    async fn update(&self, document: &Document) -> Result<()> {
        let mut docs = guard(&self.documents)?;
        match docs.get_mut(&document.id) {
            Some(existing) if !existing.is_deleted() => {
                *existing = document.clone();
                Ok(())
            }
            _ => Err(ForgeError::NotFound {
                entity: "document",
                id: document.id,
            }),
        }
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut docs = guard(&self.documents)?;
        match docs.get_mut(&id) {
            Some(doc) if !doc.is_deleted() => {
                doc.deleted_at = Some(at);
                doc.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lock(&self, id: Uuid) -> DocumentLock {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // An entry only the map refers to has no holder and no waiter.
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            locks.entry(id).or_default().clone()
        };
        DocumentLock {
            _guard: mutex.lock_owned().await,
        }
    }
}

#[async_trait]
impl PartRepository for MemoryStore {
    async fn insert(&self, part: Part) -> Result<()> {
        let mut parts = guard(&self.parts)?;
        let taken = parts
            .values()
            .any(|p| p.document_id == part.document_id && p.sequence == part.sequence);
        if taken {
            return Err(ForgeError::Conflict(format!(
                "document {} already has a part {}",
                part.document_id, part.sequence
            )));
        }
        parts.insert(part.id, part);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Part>> {
        Ok(guard(&self.parts)?.get(&id).cloned())
    }

    async fn list(&self, document_id: Uuid) -> Result<Vec<Part>> {
        let mut list: Vec<Part> = guard(&self.parts)?
            .values()
            .filter(|p| p.document_id == document_id)
            .cloned()
            .collect();
        list.sort_by_key(|p| p.sequence);
        Ok(list)
    }

    async fn find_by_sequence(&self, document_id: Uuid, sequence: u32) -> Result<Option<Part>> {
        Ok(guard(&self.parts)?
            .values()
            .find(|p| p.document_id == document_id && p.sequence == sequence)
            .cloned())
    }

    async fn next_sequence(&self, document_id: Uuid) -> Result<u32> {
        let highest = guard(&self.parts)?
            .values()
            .filter(|p| p.document_id == document_id)
            .map(|p| p.sequence)
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }

    async fn sum_pages(&self, document_id: Uuid) -> Result<(u32, usize)> {
        let parts = guard(&self.parts)?;
        let (sum, count) = parts
            .values()
            .filter(|p| p.document_id == document_id)
            .fold((0u32, 0usize), |(sum, count), p| {
                (sum.saturating_add(p.page_count), count + 1)
            });
        Ok((sum, count))
    }

    async fn commit_revision(&self, id: Uuid, revision: PartRevision) -> Result<bool> {
        let mut parts = guard(&self.parts)?;
        let part = parts.get_mut(&id).ok_or(ForgeError::NotFound {
            entity: "part",
            id,
        })?;
        if part.edit_locked {
            return Ok(false);
        }
        if let Some(content) = revision.content {
            part.content = content;
        }
        part.artifact_url = revision.artifact_url;
        part.page_count = revision.page_count;
        part.edit_locked = true;
        part.updated_at = Utc::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentKind, RenderSettings};
    use crate::profile::Profile;

    fn part(document_id: Uuid, sequence: u32, pages: u32) -> Part {
        let now = Utc::now();
        Part {
            id: Uuid::new_v4(),
            document_id,
            owner_id: "owner".into(),
            sequence,
            title: format!("Part {sequence}"),
            content: String::new(),
            artifact_url: String::new(),
            page_count: pages,
            edit_locked: false,
            render: RenderSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn soft_deleted_documents_are_invisible() {
        let store = MemoryStore::new();
        let doc = Document::new("o", "T", "A", DocumentKind::Book, Profile::Generic);
        let id = doc.id;
        DocumentRepository::insert(&store, doc).await.unwrap();
        assert!(DocumentRepository::get(&store, id).await.unwrap().is_some());
        assert!(store.soft_delete(id, Utc::now()).await.unwrap());
        assert!(DocumentRepository::get(&store, id).await.unwrap().is_none());
        assert!(!store.soft_delete(id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_sequence_is_a_conflict() {
        let store = MemoryStore::new();
        let doc_id = Uuid::new_v4();
        PartRepository::insert(&store, part(doc_id, 1, 3)).await.unwrap();
        let err = PartRepository::insert(&store, part(doc_id, 1, 4))
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Conflict(_)));
        assert_eq!(store.next_sequence(doc_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn sums_only_the_documents_parts() {
        let store = MemoryStore::new();
        let doc_id = Uuid::new_v4();
        PartRepository::insert(&store, part(doc_id, 1, 3)).await.unwrap();
        PartRepository::insert(&store, part(doc_id, 2, 7)).await.unwrap();
        PartRepository::insert(&store, part(Uuid::new_v4(), 1, 100))
            .await
            .unwrap();
        assert_eq!(store.sum_pages(doc_id).await.unwrap(), (10, 2));
        let listed = store.list(doc_id).await.unwrap();
        assert_eq!(
            listed.iter().map(|p| p.sequence).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn revision_applies_once() {
        let store = MemoryStore::new();
        let p = part(Uuid::new_v4(), 1, 3);
        let id = p.id;
        PartRepository::insert(&store, p).await.unwrap();
        let revision = PartRevision {
            content: Some("new".into()),
            artifact_url: "file://new.pdf".into(),
            page_count: 4,
        };
        assert!(store.commit_revision(id, revision.clone()).await.unwrap());
        assert!(!store.commit_revision(id, revision).await.unwrap());
        let stored = PartRepository::get(&store, id).await.unwrap().unwrap();
        assert!(stored.edit_locked);
        assert_eq!(stored.page_count, 4);
        assert_eq!(stored.content, "new");
    }

    #[tokio::test]
    async fn idle_locks_are_released() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let held = store.lock(a).await;
        drop(store.lock(b).await);
        drop(store.lock(Uuid::new_v4()).await);
        {
            let locks = store.locks.lock().unwrap();
            assert_eq!(locks.len(), 2);
            assert!(locks.contains_key(&a));
            assert!(!locks.contains_key(&b));
        }
        drop(held);
        drop(store.lock(b).await);
        assert_eq!(store.locks.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waiters_keep_their_lock_entry() {
        let store = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();
        let held = store.lock(id).await;

        let waiter = tokio::spawn({
            let store = store.clone();
            async move { drop(store.lock(id).await) }
        });
        // Wait until the waiter has cloned the entry.
        while Arc::strong_count(&store.locks.lock().unwrap()[&id]) < 3 {
            tokio::task::yield_now().await;
        }
        drop(store.lock(Uuid::new_v4()).await);
        assert!(store.locks.lock().unwrap().contains_key(&id));

        drop(held);
        waiter.await.unwrap();
    }
}
