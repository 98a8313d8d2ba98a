//! Archive builder
//!
//! Packs the vault data directory into a single ZIP (optionally sealed with
//! a passphrase) and unpacks it again. Building and unpacking are blocking
//! filesystem work and run on tokio's blocking pool.

mod builder;
mod extract;
mod filter;
mod handle;

pub use builder::{build, build_blocking};
pub use extract::{
    clear_directory, extract, open, open_blocking, remove_sqlite_side_files, VerifiedArchive,
};
pub use filter::{is_excluded, is_sqlite_side_file};
pub use handle::{is_archive, ArchiveHandle};
