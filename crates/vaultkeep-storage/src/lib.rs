//! Vaultkeep Storage Library
//!
//! This crate provides the remote storage abstraction archives are shipped
//! through, with a local-directory backend and an `object_store` backend
//! (WebDAV over HTTP, S3).
//!
//! # Remote path format
//!
//! Archives live at `<prefix>/<archive name>`, where the prefix is the
//! configured remote directory without leading or trailing slashes. Paths must
//! not contain `..` segments or start with `/`.

pub mod factory;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-object")]
pub mod object;
pub mod traits;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

// Re-export commonly used types
pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-object")]
pub use object::ObjectStorage;
pub use traits::{RemoteStorage, StorageError, StorageResult};
pub use vaultkeep_core::StorageBackend;
