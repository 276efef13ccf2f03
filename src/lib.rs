//! # book-forge – prompt → paginated PDF books and guides
//!
//! A document grows part by part. Each part goes through:
//!
//! 1. **Budget** – pre-flight against the page allowance ([`budget`])
//! 2. **Generate** – profile instructions, continuity, chunked completion
//!    calls and verbatim-span protection ([`generation`], [`protect`],
//!    [`continuity`], [`completion`])
//! 3. **Layout** – Markdown blocks flowed onto themed pages
//!    ([`content`], [`theme`], [`pagination`])
//! 4. **Render** – PDF bytes via printpdf, page count read back with lopdf
//!    ([`render`], [`pipeline`])
//! 5. **Commit** – upload, part insert, aggregate recomputation
//!    ([`storage`], [`store`], [`service`])
//!
//! A rendered part may be revised exactly once ([`edit`]).

pub mod budget;
pub mod completion;
pub mod config;
pub mod content;
pub mod continuity;
pub mod edit;
pub mod error;
pub mod fonts;
pub mod generation;
pub mod layout_config;
pub mod model;
pub mod pagination;
pub mod pipeline;
pub mod profile;
pub mod protect;
pub mod render;
pub mod service;
pub mod storage;
pub mod store;
pub mod theme;

// Re-exports for convenience
pub use budget::DocumentStatus;
pub use config::ForgeConfig;
pub use edit::{EditPayload, EditSession};
pub use error::{ForgeError, Result};
pub use model::{Document, DocumentKind, Part};
pub use profile::Profile;
pub use service::{BookForge, GenerateRequest, NewDocument};
