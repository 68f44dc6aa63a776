//! Key/value session over one datastore file.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use kvlite_crypto::cipher;
use parking_lot::RwLock;
use rusqlite::params;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::backend::{is_missing_table, quote_ident, Backend};
use crate::codec::{self, CodecError};
use crate::error::{KvError, Result};
use crate::namespace::{check_table, RESERVED_TABLE};
use crate::options::StoreOptions;

/// An open datastore.
///
/// Writes (`set*`, `unset`, `truncate`, `crypt_key`) hold the session lock
/// exclusively; reads (`get*`, `list_*`, `count_keys`) share it. `Store` is
/// `Send + Sync`, so share it across threads behind an `Arc`.
pub struct Store {
    path: PathBuf,
    inner: RwLock<Session>,
}

/// State guarded by the session lock.
pub(crate) struct Session {
    backend: Backend,
    key: Zeroizing<Vec<u8>>,
    buffer: Vec<u8>,
}

impl Store {
    /// Open (or create) the datastore at `path`.
    ///
    /// `padlock` fragments are concatenated into one token. On an unlocked
    /// datastore that token becomes the encryption key; on a locked one it
    /// must open the lock record or the call fails with
    /// [`KvError::BadPadlock`].
    pub fn open<P: AsRef<Path>>(path: P, padlock: &[&[u8]]) -> Result<Self> {
        Self::open_with(path, padlock, &StoreOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        padlock: &[&[u8]],
        options: &StoreOptions,
    ) -> Result<Self> {
        let padlock = Zeroizing::new(padlock.concat());
        let store = Self::open_unresolved(path.as_ref(), options)?;
        // Dropping `store` on failure releases the backend.
        store.resolve_lock(&padlock)?;
        info!(path = %store.path.display(), "datastore opened");
        Ok(store)
    }

    /// Open without consulting the lock record.
    fn open_unresolved(path: &Path, options: &StoreOptions) -> Result<Self> {
        Self::open_backend(path, options, Backend::connect)
    }

    /// Open for the lock manager: no lock resolution, and the journal mode
    /// stored in the file is left as the owning application configured it.
    pub(crate) fn open_for_lock(path: &Path, options: &StoreOptions) -> Result<Self> {
        Self::open_backend(path, options, Backend::connect_keeping_journal)
    }

    fn open_backend(
        path: &Path,
        options: &StoreOptions,
        connect: fn(&Path, &StoreOptions) -> Result<Backend>,
    ) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(KvError::MissingPath);
        }
        options.validate()?;
        let backend = connect(path, options)?;
        Ok(Self {
            path: path.to_path_buf(),
            inner: RwLock::new(Session {
                backend,
                key: Zeroizing::new(Vec::new()),
                buffer: Vec::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` with the session held exclusively.
    pub(crate) fn exclusive<R>(&self, f: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
        let mut session = self.inner.write();
        f(&mut session)
    }

    /// Run `f` with the session held shared.
    pub(crate) fn shared<R>(&self, f: impl FnOnce(&Session) -> Result<R>) -> Result<R> {
        let session = self.inner.read();
        f(&session)
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    /// Store `value` under `key`, replacing any key that matches
    /// case-insensitively.
    pub fn set<V: Serialize + ?Sized>(&self, table: &str, key: &str, value: &V) -> Result<()> {
        self.write_value(table, key, false, |buf| codec::encode(value, buf))
    }

    /// Like [`Store::set`], encrypting the encoded value with the session key.
    pub fn crypt_set<V: Serialize + ?Sized>(&self, table: &str, key: &str, value: &V) -> Result<()> {
        self.write_value(table, key, true, |buf| codec::encode(value, buf))
    }

    /// Store raw bytes verbatim.
    pub fn set_bytes(&self, table: &str, key: &str, bytes: &[u8]) -> Result<()> {
        self.write_value(table, key, false, |buf| {
            codec::encode_raw(bytes, buf);
            Ok(())
        })
    }

    /// Store raw bytes encrypted with the session key.
    pub fn crypt_set_bytes(&self, table: &str, key: &str, bytes: &[u8]) -> Result<()> {
        self.write_value(table, key, true, |buf| {
            codec::encode_raw(bytes, buf);
            Ok(())
        })
    }

    fn write_value(
        &self,
        table: &str,
        key: &str,
        encrypt: bool,
        encode: impl FnOnce(&mut Vec<u8>) -> std::result::Result<(), CodecError>,
    ) -> Result<()> {
        self.exclusive(|session| {
            check_table(table, false)?;
            encode(&mut session.buffer)?;
            session.put(table, key, encrypt)
        })
    }

    /// Remove `key`. A table that was never written is not an error.
    pub fn unset(&self, table: &str, key: &str) -> Result<()> {
        self.exclusive(|session| {
            check_table(table, false)?;
            session.delete(table, key)
        })
    }

    /// Drop `table` and everything in it. Unlike [`Store::unset`], a table
    /// that does not exist is reported as [`KvError::MissingTable`].
    pub fn truncate(&self, table: &str) -> Result<()> {
        self.exclusive(|session| {
            check_table(table, false)?;
            let ident = quote_ident(table)?;
            session.backend.write(|conn| {
                match conn.execute(&format!("DROP TABLE {ident}"), []) {
                    Ok(_) => Ok(()),
                    Err(e) if is_missing_table(&e) => Err(KvError::MissingTable(table.to_string())),
                    Err(e) => Err(e.into()),
                }
            })
        })
    }

    /// Replace the session key. Operations already holding the lock finish
    /// under the old key.
    pub fn crypt_key(&self, key: &[u8]) {
        self.inner.write().key = Zeroizing::new(key.to_vec());
    }

    /// Close the datastore. Consuming `self` ends the session; nothing can
    /// use it afterwards.
    pub fn close(self) -> Result<()> {
        let session = self.inner.into_inner();
        session.backend.close()?;
        info!(path = %self.path.display(), "datastore closed");
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Read `key` into a `T`.
    ///
    /// Returns `Ok(None)` when `table` has never been written, but
    /// [`KvError::MissingKey`] when the table exists and the key does not.
    pub fn get<T: DeserializeOwned>(&self, table: &str, key: &str) -> Result<Option<T>> {
        self.shared(|session| match session.fetch(table, key)? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        })
    }

    /// Read the stored bytes of `key` verbatim (decrypted if the record is
    /// encrypted). Same missing-table / missing-key rules as [`Store::get`].
    pub fn get_bytes(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.shared(|session| session.fetch(table, key))
    }

    /// Tables in the datastore, excluding the reserved one. `filter` is a
    /// case-insensitive `LIKE` pattern; empty means everything.
    pub fn list_tables(&self, filter: &str) -> Result<Vec<String>> {
        self.shared(|session| {
            session.backend.read(|conn| {
                let mut sql = String::from(
                    "SELECT name FROM sqlite_master WHERE type = 'table' \
                     AND name != ?1 COLLATE NOCASE AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'",
                );
                if !filter.is_empty() {
                    sql.push_str(" AND name LIKE ?2");
                }
                sql.push_str(" ORDER BY name COLLATE NOCASE");

                let mut stmt = conn.prepare(&sql)?;
                let rows = if filter.is_empty() {
                    stmt.query_map(params![RESERVED_TABLE], |row| row.get::<_, String>(0))?
                        .collect::<rusqlite::Result<Vec<_>>>()?
                } else {
                    stmt.query_map(params![RESERVED_TABLE, filter], |row| row.get::<_, String>(0))?
                        .collect::<rusqlite::Result<Vec<_>>>()?
                };
                Ok(rows)
            })
        })
    }

    /// Keys in `table`, optionally filtered by a case-insensitive `LIKE`
    /// pattern. A missing table lists as empty.
    pub fn list_keys(&self, table: &str, filter: &str) -> Result<Vec<String>> {
        self.shared(|session| {
            check_table(table, true)?;
            let ident = quote_ident(table)?;
            session.backend.read(|conn| {
                let (sql, args) = keyed_query(&format!("SELECT key FROM {ident}"), filter, true);
                let mut stmt = match conn.prepare(&sql) {
                    Ok(stmt) => stmt,
                    Err(e) if is_missing_table(&e) => return Ok(Vec::new()),
                    Err(e) => return Err(e.into()),
                };
                let keys = stmt
                    .query_map(rusqlite::params_from_iter(args), |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(keys)
            })
        })
    }

    /// Number of keys in `table` matching `filter`. A missing table counts zero.
    pub fn count_keys(&self, table: &str, filter: &str) -> Result<u64> {
        self.shared(|session| {
            check_table(table, true)?;
            let ident = quote_ident(table)?;
            session.backend.read(|conn| {
                let (sql, args) = keyed_query(&format!("SELECT COUNT(key) FROM {ident}"), filter, false);
                match conn.query_row(&sql, rusqlite::params_from_iter(args), |row| row.get::<_, i64>(0)) {
                    Ok(n) => Ok(n.max(0) as u64),
                    Err(e) if is_missing_table(&e) => Ok(0),
                    Err(e) => Err(e.into()),
                }
            })
        })
    }
}

/// Append the optional key filter to `select`, and `ORDER BY key` when
/// `ordered`.
fn keyed_query<'a>(select: &str, filter: &'a str, ordered: bool) -> (String, Vec<&'a str>) {
    let mut sql = select.to_string();
    let mut args = Vec::new();
    if !filter.is_empty() {
        sql.push_str(" WHERE key LIKE ?1");
        args.push(filter);
    }
    if ordered {
        sql.push_str(" ORDER BY key");
    }
    (sql, args)
}

impl Session {
    /// Write the encoded value sitting in `buffer` as the record for `key`.
    pub(crate) fn put(&mut self, table: &str, key: &str, encrypt: bool) -> Result<()> {
        let ident = quote_ident(table)?;
        let (value, flag): (Cow<'_, [u8]>, i64) = if encrypt {
            if self.key.is_empty() {
                warn!(table, "encrypting record under an empty key");
            }
            (Cow::Owned(cipher::encrypt(&self.buffer, &self.key)?), 1)
        } else {
            (Cow::Borrowed(&self.buffer[..]), 0)
        };

        self.backend.write(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {ident} \
                     (key TEXT PRIMARY KEY COLLATE NOCASE, value BLOB, e INTEGER)"
                ),
                [],
            )?;
            tx.execute(
                &format!("DELETE FROM {ident} WHERE key = ?1 COLLATE NOCASE"),
                params![key],
            )?;
            tx.execute(
                &format!("INSERT INTO {ident} (key, value, e) VALUES (?1, ?2, ?3)"),
                params![key, value.as_ref(), flag],
            )?;
            tx.commit()?;
            Ok(())
        })?;
        debug!(table, encrypted = encrypt, len = value.len(), "record written");
        Ok(())
    }

    /// Stored bytes for `key`, decrypted when flagged. `None` means the table
    /// does not exist.
    pub(crate) fn fetch(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        check_table(table, true)?;
        let ident = quote_ident(table)?;
        let row = self.backend.read(|conn| {
            let found = conn.query_row(
                &format!("SELECT value, e FROM {ident} WHERE key = ?1 COLLATE NOCASE"),
                params![key],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Option<i64>>(1)?)),
            );
            match found {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Err(KvError::MissingKey {
                    table: table.to_string(),
                    key: key.to_string(),
                }),
                Err(e) if is_missing_table(&e) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })?;

        match row {
            Some((data, Some(flag))) if flag != 0 => Ok(Some(cipher::decrypt(&data, &self.key)?)),
            Some((data, _)) => Ok(Some(data)),
            None => Ok(None),
        }
    }

    /// Delete `key` from `table`; a missing table is a no-op.
    pub(crate) fn delete(&self, table: &str, key: &str) -> Result<()> {
        let ident = quote_ident(table)?;
        self.backend.write(|conn| {
            match conn.execute(
                &format!("DELETE FROM {ident} WHERE key = ?1 COLLATE NOCASE"),
                params![key],
            ) {
                Ok(_) => Ok(()),
                Err(e) if is_missing_table(&e) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    pub(crate) fn set_key(&mut self, key: &[u8]) {
        self.key = Zeroizing::new(key.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MEMORY_PATH;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn file_store() -> (tempfile::TempDir, Arc<Store>) {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("kv.db"), &[]).unwrap();
        (dir, Arc::new(store))
    }

    #[test]
    fn keyed_query_orders_only_when_asked() {
        let (sql, args) = keyed_query("SELECT key FROM \"t\"", "a%", true);
        assert_eq!(sql, "SELECT key FROM \"t\" WHERE key LIKE ?1 ORDER BY key");
        assert_eq!(args, vec!["a%"]);

        let (sql, args) = keyed_query("SELECT COUNT(key) FROM \"t\"", "", false);
        assert_eq!(sql, "SELECT COUNT(key) FROM \"t\"");
        assert!(args.is_empty());
    }

    #[test]
    fn empty_path_is_rejected() {
        assert!(matches!(Store::open("", &[]), Err(KvError::MissingPath)));
    }

    #[test]
    fn in_memory_store_works() {
        let store = Store::open(MEMORY_PATH, &[]).unwrap();
        store.set("t", "k", &5u32).unwrap();
        assert_eq!(store.get::<u32>("t", "k").unwrap(), Some(5));
        store.close().unwrap();
    }

    #[test]
    fn padlock_fragments_are_concatenated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frag.db");
        let store = Store::open(&path, &[b"pad", b"lock"]).unwrap();
        assert_eq!(store.inner.read().key.as_slice(), b"padlock");
        store.crypt_set_bytes("t", "k", b"secret").unwrap();
        store.close().unwrap();

        let store = Store::open(&path, &[b"padlock"]).unwrap();
        assert_eq!(store.get_bytes("t", "k").unwrap().unwrap(), b"secret");
    }

    #[test]
    fn encrypted_flag_is_persisted() {
        let (_dir, store) = file_store();
        store.set_bytes("t", "plain", b"abc").unwrap();
        store.crypt_set_bytes("t", "sealed", b"abc").unwrap();
        let flags: Vec<i64> = store
            .shared(|s| {
                s.backend.read(|conn| {
                    let mut stmt = conn.prepare("SELECT e FROM \"t\" ORDER BY key")?;
                    let rows = stmt
                        .query_map([], |row| row.get(0))?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    Ok(rows)
                })
            })
            .unwrap();
        assert_eq!(flags, vec![0, 1]);
    }

    #[test]
    fn readers_do_not_block_each_other() {
        let (_dir, store) = file_store();
        store.set("t", "k", &"v").unwrap();

        let held = store.inner.read();
        let (tx, rx) = mpsc::channel();
        let reader = Arc::clone(&store);
        thread::spawn(move || {
            tx.send(reader.get::<String>("t", "k").unwrap()).unwrap();
        });
        let got = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("second reader blocked behind the first");
        assert_eq!(got.as_deref(), Some("v"));
        drop(held);
    }

    #[test]
    fn writer_waits_for_readers_and_holds_off_new_ones() {
        let (_dir, store) = file_store();
        store.set("t", "k", &"old").unwrap();

        let held = store.inner.read();

        let (wtx, wrx) = mpsc::channel();
        let writer = Arc::clone(&store);
        thread::spawn(move || {
            writer.set("t", "k", &"new").unwrap();
            wtx.send(()).unwrap();
        });
        assert!(
            wrx.recv_timeout(Duration::from_millis(200)).is_err(),
            "writer ran while a reader held the lock"
        );

        let (rtx, rrx) = mpsc::channel();
        let reader = Arc::clone(&store);
        thread::spawn(move || {
            rtx.send(reader.get::<String>("t", "k").unwrap()).unwrap();
        });
        assert!(
            rrx.recv_timeout(Duration::from_millis(200)).is_err(),
            "reader jumped ahead of a waiting writer"
        );

        drop(held);
        wrx.recv_timeout(Duration::from_secs(5)).expect("writer never finished");
        let seen = rrx.recv_timeout(Duration::from_secs(5)).expect("reader never finished");
        assert_eq!(seen.as_deref(), Some("new"));
    }

    #[test]
    fn parallel_readers_share_the_pool() {
        let (_dir, store) = file_store();
        for i in 0..16 {
            store.set("nums", &format!("k{i}"), &i).unwrap();
        }
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..16 {
                        let v: i32 = store.get("nums", &format!("K{i}")).unwrap().unwrap();
                        assert_eq!(v, i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.count_keys("nums", "").unwrap(), 16);
    }
}
