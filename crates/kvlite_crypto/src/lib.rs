//! kvlite_crypto: cryptographic primitives for the kvlite store
//!
//! # Module layout
//! - `cipher`: XChaCha20 record cipher (unauthenticated; wrong keys give garbage)
//! - `aead`: XChaCha20-Poly1305 sealing for the lock record
//! - `kdf`: Argon2id secret derivation / HKDF-SHA256 expansion
//! - `error`: unified error type
//!
//! All secret material handed out by this crate is zeroized on drop.

pub mod aead;
pub mod cipher;
pub mod error;
pub mod kdf;

pub use error::CryptoError;
pub use kdf::{KdfParams, SecretKey};
