use thiserror::Error;

use crate::codec::CodecError;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("Invalid characters in table name: '{0}'")]
    InvalidTableName(String),

    #[error("Table name '{0}' is reserved")]
    ReservedTable(String),

    #[error("Missing datastore file path")]
    MissingPath,

    #[error("Database error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("No such table: {0}")]
    MissingTable(String),

    #[error("Key '{key}' not found in table '{table}'")]
    MissingKey { table: String, key: String },

    #[error("Padlock does not open this datastore")]
    BadPadlock,

    #[error("Passphrase does not unlock this datastore")]
    BadPass,

    #[error("Datastore is already locked; unlock it before locking again")]
    NotUnlocked,

    #[error("Lock record is corrupt: {0}")]
    CorruptLock(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] kvlite_crypto::CryptoError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, KvError>;
