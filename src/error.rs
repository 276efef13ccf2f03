//! Error taxonomy for the generation pipeline.
//!
//! Callers can ask [`ForgeError::is_retryable`] instead of string matching:
//!
//! | Variant            | Retryable | Raised by                          |
//! |--------------------|-----------|------------------------------------|
//! | `InputTooLarge`    | no        | generation pre-flight              |
//! | `BudgetExceeded`   | no        | budget pre-flight                  |
//! | `Timeout`          | yes       | completion / render deadline       |
//! | `Completion`       | yes       | text-completion backend            |
//! | `Render`           | no        | PDF engine or page read-back       |
//! | `StorageUpload`    | no        | object storage                     |
//! | `AlreadyLocked`    | no        | edit workflow                      |
//! | `Unauthorized`     | no        | edit workflow, document access     |
//! | `Conflict`         | yes       | concurrent part submission         |

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ForgeError>;

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("source text has {words} words; the per-request limit is {limit}")]
    InputTooLarge { words: usize, limit: usize },

    #[error(
        "requested {requested} pages but only {remaining} of the {cap}-page allowance remain"
    )]
    BudgetExceeded {
        requested: u32,
        remaining: u32,
        cap: u32,
    },

    #[error("{stage} did not finish within {seconds}s")]
    Timeout { stage: &'static str, seconds: u64 },

    #[error("text completion failed: {0}")]
    Completion(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("artifact upload to '{key}' failed: {message}")]
    StorageUpload { key: String, message: String },

    #[error("part {part_id} has already been edited; only one revision is allowed")]
    AlreadyLocked { part_id: Uuid },

    #[error("{entity} {id} does not belong to owner '{owner_id}'")]
    Unauthorized {
        entity: &'static str,
        id: Uuid,
        owner_id: String,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("document cannot move from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl ForgeError {
    /// Whether the caller may resubmit the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Completion(_) | Self::Conflict(_) | Self::Persistence(_)
        )
    }
}
