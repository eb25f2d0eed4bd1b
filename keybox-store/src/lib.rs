//! Keybox store and maintenance jobs
//!
//! Accepted keyboxes live in a flat directory named by the SHA-256 of their
//! canonical form. Two jobs keep it current:
//! - [`import_directory`] validates candidates and links accepted ones in
//! - [`cleanup_store`] re-validates stored documents and deletes rejected ones
//!
//! Both run validations concurrently on a shared
//! [`keybox_engine::KeyboxValidator`].

pub mod canonical;
pub mod cleanup;
pub mod error;
pub mod import;
pub mod store;

pub use canonical::{canonicalize, file_name};
pub use cleanup::{cleanup_store, CleanupStats};
pub use error::{StoreError, StoreResult};
pub use import::{import_directory, ImportStats};
pub use store::{KeyboxStore, StoreOutcome};
