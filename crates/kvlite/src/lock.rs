//! Lock manager: keeps the store key behind a padlock and a passphrase.
//!
//! A locked datastore carries one record in the reserved table. It holds the
//! store key sealed twice with XChaCha20-Poly1305:
//!
//! - under an Argon2id secret of the passphrase, which only [`unlock`] uses;
//! - under an Argon2id secret of the padlock, which [`Store::open`] uses to
//!   recover the key.
//!
//! On an unlocked datastore the padlock given to `open` *is* the key, so the
//! key sealed by [`lock`] is the padlock itself and records encrypted before
//! locking stay readable afterwards.
//!
//! ```text
//! Unlocked ──lock──▶ Locked ──unlock(passphrase)──▶ Unlocked
//!                      │
//!                      └──lock──▶ NotUnlocked
//! ```

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use kvlite_crypto::kdf::{derive_secret, generate_salt, SALT_LEN};
use kvlite_crypto::{aead, CryptoError, KdfParams};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::codec;
use crate::error::{KvError, Result};
use crate::namespace::RESERVED_TABLE;
use crate::options::StoreOptions;
use crate::store::{Session, Store};

/// Key of the lock record inside the reserved table.
const LOCK_KEY: &str = "Padlock";
const LOCK_VERSION: u32 = 1;

const PASS_AAD: &[u8] = b"kvlite-lock-v1:passphrase";
const PADLOCK_AAD: &[u8] = b"kvlite-lock-v1:padlock";

/// Persisted lock record. Salts are hex, sealed blobs base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    version: u32,
    kdf: KdfParams,
    pass_salt: String,
    pass_seal: String,
    padlock_salt: String,
    padlock_seal: String,
}

impl LockRecord {
    fn seal(key: &[u8], passphrase: &[u8], padlock: &[u8], kdf: &KdfParams) -> Result<Self> {
        let pass_salt = generate_salt();
        let pass_secret = derive_secret(passphrase, &pass_salt, kdf)?;
        let pass_seal = aead::seal(&pass_secret, key, PASS_AAD)?;

        let padlock_salt = generate_salt();
        let padlock_secret = derive_secret(padlock, &padlock_salt, kdf)?;
        let padlock_seal = aead::seal(&padlock_secret, key, PADLOCK_AAD)?;

        Ok(Self {
            version: LOCK_VERSION,
            kdf: *kdf,
            pass_salt: hex::encode(pass_salt),
            pass_seal: BASE64.encode(pass_seal),
            padlock_salt: hex::encode(padlock_salt),
            padlock_seal: BASE64.encode(padlock_seal),
        })
    }

    fn open_with_padlock(&self, padlock: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.open_seal(&self.padlock_salt, &self.padlock_seal, padlock, PADLOCK_AAD)
            .map_err(|e| match e {
                KvError::Crypto(CryptoError::Open) => KvError::BadPadlock,
                other => other,
            })
    }

    fn open_with_passphrase(&self, passphrase: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.open_seal(&self.pass_salt, &self.pass_seal, passphrase, PASS_AAD)
            .map_err(|e| match e {
                KvError::Crypto(CryptoError::Open) => KvError::BadPass,
                other => other,
            })
    }

    fn open_seal(
        &self,
        salt_hex: &str,
        seal_b64: &str,
        secret: &[u8],
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        if self.version != LOCK_VERSION {
            return Err(KvError::CorruptLock(format!(
                "unsupported lock version {}",
                self.version
            )));
        }
        let salt: [u8; SALT_LEN] = hex::decode(salt_hex)
            .map_err(|e| KvError::CorruptLock(format!("salt: {e}")))?
            .try_into()
            .map_err(|_| KvError::CorruptLock("salt length".into()))?;
        let sealed = BASE64
            .decode(seal_b64)
            .map_err(|e| KvError::CorruptLock(format!("seal: {e}")))?;

        let derived = derive_secret(secret, &salt, &self.kdf)?;
        Ok(aead::open(&derived, &sealed, aad)?)
    }
}

impl Session {
    /// The lock record, if the datastore is locked.
    fn lock_record(&self) -> Result<Option<LockRecord>> {
        match self.fetch(RESERVED_TABLE, LOCK_KEY) {
            Ok(Some(bytes)) => Ok(Some(codec::decode(&bytes)?)),
            Ok(None) => Ok(None),
            // Reserved table left behind by a previous unlock.
            Err(KvError::MissingKey { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Store {
    /// Install the session key from `padlock`, consulting the lock record.
    pub(crate) fn resolve_lock(&self, padlock: &[u8]) -> Result<()> {
        self.exclusive(|session| {
            match session.lock_record()? {
                None => {
                    debug!(padlock = !padlock.is_empty(), "datastore unlocked");
                    session.set_key(padlock);
                }
                Some(record) => {
                    let key = match record.open_with_padlock(padlock) {
                        Ok(key) => key,
                        Err(e) => {
                            warn!(path = %self.path().display(), "padlock rejected");
                            return Err(e);
                        }
                    };
                    session.set_key(&key);
                    debug!("datastore key recovered from lock record");
                }
            }
            Ok(())
        })
    }
}

/// Lock the datastore at `path`. See [`lock_with`].
pub fn lock<P: AsRef<Path>>(path: P, passphrase: &str, padlock: &[u8]) -> Result<()> {
    lock_with(path, passphrase, padlock, &StoreOptions::default())
}

/// Seal the datastore key under `passphrase` and `padlock`.
///
/// Fails with [`KvError::NotUnlocked`] if the datastore is already locked.
/// From then on `open` needs `padlock`, and `unlock` needs `passphrase`.
pub fn lock_with<P: AsRef<Path>>(
    path: P,
    passphrase: &str,
    padlock: &[u8],
    options: &StoreOptions,
) -> Result<()> {
    let store = Store::open_for_lock(path.as_ref(), options)?;
    store.exclusive(|session| {
        if session.lock_record()?.is_some() {
            return Err(KvError::NotUnlocked);
        }
        let record = LockRecord::seal(padlock, passphrase.as_bytes(), padlock, &options.kdf)?;
        codec::encode(&record, session.buffer_mut())?;
        session.put(RESERVED_TABLE, LOCK_KEY, false)
    })?;
    info!(path = %store.path().display(), "datastore locked");
    store.close()
}

/// Remove the lock. See [`unlock_with`].
pub fn unlock<P: AsRef<Path>>(path: P, passphrase: &str) -> Result<()> {
    unlock_with(path, passphrase, &StoreOptions::default())
}

/// Remove the lock record if `passphrase` opens it.
///
/// A wrong passphrase fails with [`KvError::BadPass`] and leaves the lock in
/// place. Unlocking an unlocked datastore succeeds and changes nothing.
pub fn unlock_with<P: AsRef<Path>>(path: P, passphrase: &str, options: &StoreOptions) -> Result<()> {
    let store = Store::open_for_lock(path.as_ref(), options)?;
    store.exclusive(|session| {
        let Some(record) = session.lock_record()? else {
            debug!("unlock requested on an unlocked datastore");
            return Ok(());
        };
        record.open_with_passphrase(passphrase.as_bytes())?;
        session.delete(RESERVED_TABLE, LOCK_KEY)
    })?;
    info!(path = %store.path().display(), "datastore unlocked");
    store.close()
}

/// Whether the datastore at `path` carries a lock record. See
/// [`is_locked_with`].
pub fn is_locked<P: AsRef<Path>>(path: P) -> Result<bool> {
    is_locked_with(path, &StoreOptions::default())
}

/// Whether the datastore at `path` carries a lock record, connecting with
/// `options`. Like [`lock`] and [`unlock`], this leaves the file's journal
/// mode untouched.
pub fn is_locked_with<P: AsRef<Path>>(path: P, options: &StoreOptions) -> Result<bool> {
    let store = Store::open_for_lock(path.as_ref(), options)?;
    let locked = store.shared(|session| Ok(session.lock_record()?.is_some()))?;
    store.close()?;
    Ok(locked)
}
