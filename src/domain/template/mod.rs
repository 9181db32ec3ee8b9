//! Versioned notification template catalog.
//!
//! - `NotificationTemplate` is an immutable value with pure transitions
//!   (`with_new_version`, `with_revision`, `with_active`)
//! - `TemplateRepository` persists lineages append-only (memory or PostgreSQL)
//! - `TemplateStore` is the service callers use
//!
//! # Example
//!
//! ```ignore
//! let store = TemplateStore::in_memory();
//! let v1 = store.create(new_template, "admin").await?;
//! let v2 = store.create_new_version(v1.id, "editor").await?;
//! assert_eq!(v2.version, 2);
//! ```

mod postgres;
mod repository;
mod store;
mod types;

pub use postgres::PostgresTemplateRepository;
pub use repository::{MemoryTemplateRepository, TemplateRepository};
pub use store::{create_template_store, TemplateStore};
pub use types::{
    NewTemplate, NotificationTemplate, TemplateCategory, TemplateError, TemplateResult,
    TemplateRevision,
};
