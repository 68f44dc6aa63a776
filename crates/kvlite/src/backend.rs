//! SQLite connections behind the store.
//!
//! One writer connection, used only while the store's session lock is held
//! exclusively, plus a small pool of idle read connections so shared holders
//! can query in parallel. An in-memory datastore is private to a single
//! connection, so there readers fall back to the writer.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::error::{KvError, Result};
use crate::namespace::check_table;
use crate::options::StoreOptions;

/// Path that opens a private in-memory datastore.
pub const MEMORY_PATH: &str = ":memory:";

/// WAL journal mode, the default for file datastores, needs 3.7.0. Only a
/// build linked against a system SQLite can fall below it.
const MIN_SQLITE_VERSION: i32 = 3_007_000;

static REGISTERED: OnceLock<i32> = OnceLock::new();

/// One-time, idempotent process setup for the SQLite backend.
///
/// Called by every [`Backend::connect`]; calling it directly up front is
/// allowed and only surfaces an unusable SQLite earlier.
pub fn register_backend() -> Result<()> {
    let version = *REGISTERED.get_or_init(|| {
        info!(sqlite = rusqlite::version(), "registered SQLite backend");
        rusqlite::version_number()
    });
    if version < MIN_SQLITE_VERSION {
        return Err(KvError::Config(format!(
            "SQLite {} is too old for WAL journaling, need at least 3.7.0",
            rusqlite::version()
        )));
    }
    Ok(())
}

/// Quote a table name for splicing into statement text.
///
/// The only place identifiers enter SQL. The name is re-checked here so a
/// caller that skipped validation still cannot inject.
pub fn quote_ident(table: &str) -> Result<String> {
    check_table(table, true)?;
    Ok(format!("\"{table}\""))
}

/// True when SQLite reported a reference to a table that does not exist.
pub fn is_missing_table(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.starts_with("no such table")
    )
}

pub struct Backend {
    path: PathBuf,
    writer: Mutex<Connection>,
    idle: Mutex<Vec<Connection>>,
    pooled: bool,
    max_idle: usize,
    options: StoreOptions,
}

impl Backend {
    /// Open (or create) the datastore at `path`, apply the configured
    /// journal mode and check it is a usable SQLite file.
    pub fn connect(path: &Path, options: &StoreOptions) -> Result<Self> {
        Self::connect_inner(path, options, true)
    }

    /// Like [`Backend::connect`] but leaves the journal mode stored in the
    /// file as it is.
    pub fn connect_keeping_journal(path: &Path, options: &StoreOptions) -> Result<Self> {
        Self::connect_inner(path, options, false)
    }

    fn connect_inner(path: &Path, options: &StoreOptions, set_journal: bool) -> Result<Self> {
        register_backend()?;

        let in_memory = path.as_os_str() == MEMORY_PATH;
        let writer = if in_memory {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        configure(&writer, options)?;
        if set_journal && !in_memory {
            writer.execute_batch(&format!(
                "PRAGMA journal_mode = {};",
                options.journal_mode.as_pragma()
            ))?;
        }
        // Fails here on a file that is not a database.
        writer.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))?;

        debug!(path = %path.display(), in_memory, set_journal, "backend connected");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
            idle: Mutex::new(Vec::new()),
            pooled: !in_memory,
            max_idle: options.max_idle_readers,
            options: options.clone(),
        })
    }

    /// Run `f` on the writer connection.
    pub fn write<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let conn = self.writer.lock();
        f(&conn)
    }

    /// Run `f` on a read connection checked out for the duration of the call.
    pub fn read<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        if !self.pooled {
            return self.write(f);
        }

        let cached = self.idle.lock().pop();
        let conn = match cached {
            Some(conn) => conn,
            None => self.open_reader()?,
        };
        let result = f(&conn);

        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
        result
    }

    fn open_reader(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags)?;
        configure(&conn, &self.options)?;
        debug!(path = %self.path.display(), "opened read connection");
        Ok(conn)
    }

    /// Close every connection, reporting the writer's close error if any.
    pub fn close(self) -> Result<()> {
        drop(self.idle.into_inner());
        self.writer
            .into_inner()
            .close()
            .map_err(|(_, e)| KvError::Backend(e))
    }
}

fn configure(conn: &Connection, options: &StoreOptions) -> Result<()> {
    conn.busy_timeout(options.busy_timeout())?;
    conn.execute_batch("PRAGMA case_sensitive_like = OFF;")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::JournalMode;
    use tempfile::tempdir;

    #[test]
    fn register_is_idempotent() {
        register_backend().unwrap();
        register_backend().unwrap();
    }

    #[test]
    fn quote_ident_refuses_unsafe_names() {
        assert_eq!(quote_ident("users").unwrap(), "\"users\"");
        assert!(matches!(
            quote_ident("x\"; DROP TABLE y"),
            Err(KvError::InvalidTableName(_))
        ));
    }

    #[test]
    fn missing_table_is_recognised() {
        let backend = Backend::connect(Path::new(MEMORY_PATH), &StoreOptions::default()).unwrap();
        let err = backend
            .read(|conn| {
                conn.query_row("SELECT value FROM \"nope\"", [], |row| row.get::<_, Vec<u8>>(0))
                    .map_err(KvError::from)
            })
            .unwrap_err();
        match err {
            KvError::Backend(e) => assert!(is_missing_table(&e)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn readers_see_writer_commits() {
        let dir = tempdir().unwrap();
        let backend =
            Backend::connect(&dir.path().join("pool.db"), &StoreOptions::default()).unwrap();
        backend
            .write(|conn| {
                conn.execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (42);")?;
                Ok(())
            })
            .unwrap();
        let v: i64 = backend
            .read(|conn| Ok(conn.query_row("SELECT v FROM t", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(v, 42);
        assert_eq!(backend.idle.lock().len(), 1);
        backend.close().unwrap();
    }

    #[test]
    fn bundled_sqlite_meets_minimum() {
        assert!(rusqlite::version_number() >= MIN_SQLITE_VERSION);
    }

    fn journal_mode(backend: &Backend) -> String {
        backend
            .write(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?))
            .unwrap()
    }

    #[test]
    fn keeping_journal_leaves_file_mode_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.db");
        let delete = StoreOptions {
            journal_mode: JournalMode::Delete,
            ..StoreOptions::default()
        };
        let backend = Backend::connect(&path, &delete).unwrap();
        assert_eq!(journal_mode(&backend), "delete");
        backend.close().unwrap();

        let backend = Backend::connect_keeping_journal(&path, &StoreOptions::default()).unwrap();
        assert_eq!(journal_mode(&backend), "delete");
        backend.close().unwrap();

        let backend = Backend::connect(&path, &StoreOptions::default()).unwrap();
        assert_eq!(journal_mode(&backend), "wal");
        backend.close().unwrap();
    }

    #[test]
    fn rejects_non_database_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.db");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();
        assert!(matches!(
            Backend::connect(&path, &StoreOptions::default()),
            Err(KvError::Backend(_))
        ));
    }
}
