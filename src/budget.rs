//! Page budget and document lifecycle.
//!
//! ```text
//! AwaitingInput → Pending → InProgress → Completed
//!                    │          │  ▲
//!                    └──────────┴──┴─→ Failed
//! ```
//!
//! `Failed` is left again only by a later successful part. Soft deletion is
//! a marker on the document, not a status.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ForgeError, Result};
use crate::store::{DocumentRepository, PartRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    AwaitingInput,
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingInput => "awaiting_input",
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Legal edges of the lifecycle graph. Staying put is always allowed.
    pub fn can_transition(self, to: Self) -> bool {
        use DocumentStatus::*;

        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (AwaitingInput, Pending)
                | (Pending, InProgress)
                | (Pending, Completed)
                | (Pending, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, InProgress)
                | (Failed, Completed)
        )
    }

    pub fn transition(self, to: Self) -> Result<Self> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(ForgeError::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status implied by a freshly summed page total.
pub fn derive_status(used_pages: u32, cap: u32, has_parts: bool) -> DocumentStatus {
    if has_parts && used_pages >= cap {
        DocumentStatus::Completed
    } else if has_parts {
        DocumentStatus::InProgress
    } else {
        DocumentStatus::Pending
    }
}

/// Reject a request that cannot fit in what is left of the allowance.
pub fn check_allowance(used_pages: u32, requested: u32, cap: u32) -> Result<()> {
    if used_pages.saturating_add(requested) > cap {
        return Err(ForgeError::BudgetExceeded {
            requested,
            remaining: cap.saturating_sub(used_pages),
            cap,
        });
    }
    Ok(())
}

/// Outcome of an aggregate recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageUsage {
    /// Unclamped sum over all parts.
    pub raw_total: u32,
    /// What the document stores; never above the cap.
    pub stored_total: u32,
    pub status: DocumentStatus,
}

pub struct BudgetTracker {
    documents: Arc<dyn DocumentRepository>,
    parts: Arc<dyn PartRepository>,
    cap: u32,
}

impl BudgetTracker {
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        parts: Arc<dyn PartRepository>,
        cap: u32,
    ) -> Self {
        Self {
            documents,
            parts,
            cap,
        }
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    /// Recompute the stored aggregate and status from the parts.
    ///
    /// Holds the document lock across the read-sum-write so concurrent
    /// completions cannot lose each other's pages.
    pub async fn recompute(&self, document_id: Uuid) -> Result<PageUsage> {
        let _guard = self.documents.lock(document_id).await;

        let mut doc = self
            .documents
            .get(document_id)
            .await?
            .ok_or(ForgeError::NotFound {
                entity: "document",
                id: document_id,
            })?;
        let (raw_total, part_count) = self.parts.sum_pages(document_id).await?;

        let derived = derive_status(raw_total, self.cap, part_count > 0);
        // Completed is terminal even if an edit later shrinks the total.
        let status = if part_count == 0 || doc.status.is_terminal() {
            doc.status
        } else {
            doc.status.transition(derived)?
        };
        let stored_total = raw_total.min(self.cap);
        if raw_total > self.cap {
            log::info!(
                "Document {document_id}: {raw_total} pages exceed the {} cap; storing the cap",
                self.cap
            );
        }

        doc.total_pages = stored_total;
        doc.status = status;
        doc.updated_at = chrono::Utc::now();
        self.documents.update(&doc).await?;

        log::debug!("Document {document_id}: {stored_total}/{} pages, {status}", self.cap);
        Ok(PageUsage {
            raw_total,
            stored_total,
            status,
        })
    }

    /// Move a document to `Failed` after a terminal generation error.
    /// Documents that may not fail from their current state are left alone.
    pub async fn mark_failed(&self, document_id: Uuid) -> Result<()> {
        let _guard = self.documents.lock(document_id).await;
        if let Some(mut doc) = self.documents.get(document_id).await? {
            if doc.status.can_transition(DocumentStatus::Failed) {
                doc.status = DocumentStatus::Failed;
                doc.updated_at = chrono::Utc::now();
                self.documents.update(&doc).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_request_past_cap_with_remaining() {
        let err = check_allowance(740, 20, 750).unwrap_err();
        match err {
            ForgeError::BudgetExceeded {
                requested,
                remaining,
                cap,
            } => {
                assert_eq!(requested, 20);
                assert_eq!(remaining, 10);
                assert_eq!(cap, 750);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn allows_request_that_exactly_fills_cap() {
        assert!(check_allowance(740, 10, 750).is_ok());
        assert!(check_allowance(0, 750, 750).is_ok());
        assert!(check_allowance(750, 1, 750).is_err());
    }

    #[test]
    fn derives_status_from_totals() {
        assert_eq!(derive_status(0, 750, false), DocumentStatus::Pending);
        assert_eq!(derive_status(12, 750, true), DocumentStatus::InProgress);
        assert_eq!(derive_status(750, 750, true), DocumentStatus::Completed);
        assert_eq!(derive_status(760, 750, true), DocumentStatus::Completed);
    }

    #[test]
    fn transition_table() {
        use DocumentStatus::*;
        assert!(AwaitingInput.can_transition(Pending));
        assert!(!AwaitingInput.can_transition(InProgress));
        assert!(Pending.can_transition(Failed));
        assert!(InProgress.can_transition(Failed));
        assert!(Failed.can_transition(InProgress));
        assert!(!Completed.can_transition(InProgress));
        assert!(!Completed.can_transition(Failed));
        assert!(Completed.is_terminal());
        assert!(matches!(
            Completed.transition(Pending),
            Err(ForgeError::InvalidTransition { .. })
        ));
    }
}
