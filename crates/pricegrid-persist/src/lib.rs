//! # Pricegrid Persistence
//!
//! SQLite storage for the storefront backend: the durable job store behind
//! `pricegrid-queue` and the data-redaction job handlers.

pub mod queue;
pub mod redact;
pub mod sqlite;

pub use queue::SqliteJobStore;
pub use redact::{
    register_redaction_handlers, CustomerRedactHandler, GdprRequestType, ShopRedactHandler,
    CUSTOMER_REDACT, REDACTION_JOB_TYPES, SHOP_REDACT,
};
pub use sqlite::{SqliteBackend, SqliteConfig, StorageError};
