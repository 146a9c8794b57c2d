//! ExtMux Service Directory
//!
//! Maps tenant ids to their dedicated instance (address and shared secret).
//! The [`DirectoryStore`] is the durable source of truth; [`DirectoryCache`]
//! fronts it with a time-bounded copy that is dropped wholesale once its TTL
//! elapses. [`ServiceDirectory`] ties both to an
//! [`InstanceProvisioner`](extmux_provision::InstanceProvisioner).

pub mod cache;
pub mod directory;
pub mod entry;
pub mod error;
pub mod store;

pub use cache::{DEFAULT_CACHE_TTL, DirectoryCache, Lookup};
pub use directory::ServiceDirectory;
pub use entry::DirectoryEntry;
pub use error::{DirectoryError, Result};
pub use store::{DirectoryStore, FileDirectoryStore, MemoryDirectoryStore};

#[cfg(feature = "postgres")]
pub use store::PostgresDirectoryStore;
