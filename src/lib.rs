//! Versioned key-value store kept in an issue tracker.
//!
//! Each key is a label plus an issue titled with the key. Every write
//! appends a comment, so the comment list doubles as the key's history.
//!
//! ```
//! use galbi::{Key, MemoryTracker, Store};
//! use serde_json::json;
//!
//! let tracker = MemoryTracker::new();
//! let store = Store::new(&tracker);
//! let key = Key::parse("db.url").unwrap();
//!
//! store.upsert(&key, &json!("postgres://a")).unwrap();
//! store.upsert(&key, &json!("postgres://b")).unwrap();
//!
//! assert_eq!(store.get_one(&key).unwrap(), json!("postgres://b"));
//! assert_eq!(store.get_revision(&key, 0).unwrap(), json!("postgres://a"));
//! ```

pub mod directory;
pub mod error;
pub mod kv;
pub mod memory;
pub mod migrate;
pub mod model;
pub mod pager;
pub mod secret;
pub mod tracker;

#[cfg(feature = "remote")]
pub mod github;
#[cfg(feature = "remote")]
pub mod proxy;
#[cfg(all(test, feature = "remote"))]
mod stub;

pub use directory::Directory;
pub use error::{CryptoError, Error, Result};
pub use kv::Store;
pub use memory::MemoryTracker;
pub use migrate::{migrate, MigrationReport};
pub use model::{Convention, Issue, Key, Revision, WriteMode, MIGRATED_LABEL};
pub use pager::{Pager, PAGE_SIZE};
pub use secret::{Cipher, CommandCipher, SecretBackend, SecretStore};
pub use tracker::Tracker;

#[cfg(feature = "remote")]
pub use github::GithubTracker;
#[cfg(feature = "remote")]
pub use proxy::ProxyClient;
