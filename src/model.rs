//! Persistent entities: documents and their parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::budget::DocumentStatus;
use crate::profile::Profile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Multi-part book; every part gets a title/author page.
    #[default]
    Book,
    /// Standalone guide; no title page.
    Guide,
}

impl DocumentKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "book" => Some(Self::Book),
            "guide" => Some(Self::Guide),
            _ => None,
        }
    }
}

/// A cover image reference, resolved at render time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRef {
    /// `data:<mime>;base64,<data>`
    DataUri(String),
    Path(std::path::PathBuf),
}

/// Everything the renderer needs besides the content itself. Stored on the
/// part so an edit re-renders with the same look.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RenderSettings {
    pub theme: String,
    pub font: Option<String>,
    pub cover: Option<AssetRef>,
    pub cta_text: Option<String>,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub owner_id: String,
    pub title: String,
    pub author: String,
    pub kind: DocumentKind,
    pub profile: Profile,
    pub status: DocumentStatus,
    /// Sum of part page counts, clamped to the page cap.
    pub total_pages: u32,
    pub font: Option<String>,
    pub theme: String,
    pub prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(
        owner_id: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
        kind: DocumentKind,
        profile: Profile,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            title: title.into(),
            author: author.into(),
            kind,
            profile,
            status: DocumentStatus::AwaitingInput,
            total_pages: 0,
            font: None,
            theme: crate::theme::DEFAULT_THEME.to_string(),
            prompt: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub id: Uuid,
    pub document_id: Uuid,
    pub owner_id: String,
    /// 1-based, unique within the document.
    pub sequence: u32,
    pub title: String,
    pub content: String,
    pub artifact_url: String,
    /// Physical pages of the rendered artifact; never clamped.
    pub page_count: u32,
    /// Set once by a committed edit; never cleared.
    pub edit_locked: bool,
    pub render: RenderSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The replacement values written by a committed edit.
#[derive(Debug, Clone)]
pub struct PartRevision {
    pub content: Option<String>,
    pub artifact_url: String,
    pub page_count: u32,
}
