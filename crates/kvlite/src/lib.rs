//! kvlite: key/value store on SQLite
//!
//! Tables of `key -> value` records inside one SQLite file, with:
//!
//! - typed values: anything `serde::Serialize` goes in, a matching
//!   `DeserializeOwned` type comes out; raw bytes pass through untouched;
//! - per-record encryption (`crypt_set*`) under a session key held only in
//!   memory;
//! - a master lock: [`lock`] seals the key behind a padlock (needed by every
//!   [`Store::open`]) and a passphrase (needed by [`unlock`]).
//!
//! ```no_run
//! use kvlite::Store;
//!
//! # fn main() -> kvlite::Result<()> {
//! let store = Store::open("app.db", &[b"my padlock"])?;
//! store.set("settings", "theme", &"dark")?;
//! store.crypt_set("secrets", "token", &"s3cr3t")?;
//! let theme: Option<String> = store.get("settings", "THEME")?;
//! assert_eq!(theme.as_deref(), Some("dark"));
//! store.close()?;
//!
//! kvlite::lock("app.db", "passphrase", b"my padlock")?;
//! # Ok(())
//! # }
//! ```
//!
//! # Table names
//! Names may not contain `; " ' & (`, and `KVLite` is reserved for the lock
//! record. See [`namespace`].

pub mod backend;
pub mod codec;
pub mod error;
pub mod lock;
pub mod namespace;
pub mod options;
pub mod store;

pub use codec::{CodecError, Shape};
pub use error::{KvError, Result};
pub use kvlite_crypto::KdfParams;
pub use lock::{is_locked, is_locked_with, lock, lock_with, unlock, unlock_with};
pub use options::{JournalMode, StoreOptions};
pub use store::Store;
