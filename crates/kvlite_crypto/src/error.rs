use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("AEAD sealing failed")]
    Seal,

    #[error("AEAD open failed (wrong secret or tampered record)")]
    Open,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Ciphertext too short: {len} bytes, need at least {min}")]
    CiphertextTooShort { len: usize, min: usize },
}
