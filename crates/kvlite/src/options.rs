//! Store configuration.

use std::time::Duration;

use kvlite_crypto::KdfParams;
use serde::{Deserialize, Serialize};

use crate::error::{KvError, Result};

/// SQLite journal mode applied to the writer connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    #[default]
    Wal,
    Off,
}

impl JournalMode {
    pub fn as_pragma(&self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Memory => "MEMORY",
            JournalMode::Wal => "WAL",
            JournalMode::Off => "OFF",
        }
    }
}

/// Knobs for opening a datastore. Every field has a default, so a partial
/// JSON document is enough:
///
/// ```
/// let opts = kvlite::StoreOptions::from_json(r#"{"busy_timeout_ms": 250}"#).unwrap();
/// assert_eq!(opts.busy_timeout_ms, 250);
/// assert_eq!(opts.max_idle_readers, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    pub journal_mode: JournalMode,
    /// How long a statement waits on a busy database file before failing.
    pub busy_timeout_ms: u64,
    /// Read connections kept open between shared operations.
    pub max_idle_readers: usize,
    /// Argon2id costs used when sealing a new lock record. Existing records
    /// carry their own.
    pub kdf: KdfParams,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5_000,
            max_idle_readers: 4,
            kdf: KdfParams::default(),
        }
    }
}

impl StoreOptions {
    /// Parse options from JSON, filling gaps with defaults, and validate them.
    pub fn from_json(json: &str) -> Result<Self> {
        let opts: Self =
            serde_json::from_str(json).map_err(|e| KvError::Config(e.to_string()))?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> Result<()> {
        self.kdf
            .validate()
            .map_err(|e| KvError::Config(format!("kdf: {e}")))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = StoreOptions::default();
        assert_eq!(opts.journal_mode, JournalMode::Wal);
        assert_eq!(opts.busy_timeout(), Duration::from_secs(5));
        assert_eq!(opts.kdf, KdfParams::default());
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let opts = StoreOptions::from_json(
            r#"{"journal_mode": "delete", "kdf": {"m_cost_kib": 1024}}"#,
        )
        .unwrap();
        assert_eq!(opts.journal_mode, JournalMode::Delete);
        assert_eq!(opts.kdf.m_cost_kib, 1024);
        assert_eq!(opts.kdf.t_cost, KdfParams::default().t_cost);
        assert_eq!(opts.max_idle_readers, 4);
    }

    #[test]
    fn rejects_unknown_journal_mode() {
        assert!(matches!(
            StoreOptions::from_json(r#"{"journal_mode": "yolo"}"#),
            Err(KvError::Config(_))
        ));
    }

    #[test]
    fn rejects_zero_kdf_cost() {
        assert!(matches!(
            StoreOptions::from_json(r#"{"kdf": {"t_cost": 0}}"#),
            Err(KvError::Config(_))
        ));
    }
}
