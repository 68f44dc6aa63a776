//! Key derivation functions
//!
//! `derive_secret`: Argon2id, turns a passphrase or padlock into the 32-byte
//!   secret that seals the store key inside the lock record.
//!
//! `hkdf_expand`: HKDF-SHA256, stretches caller key bytes of any length into
//!   the fixed-size record cipher key.

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

pub const SECRET_LEN: usize = 32;
pub const SALT_LEN: usize = 16;

// ── Argon2id ──────────────────────────────────────────────────────────────────

/// 32-byte secret derived from a passphrase or padlock. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct SecretKey(pub [u8; SECRET_LEN]);

/// Argon2id cost parameters.
///
/// Persisted next to every sealed value so a record stays openable after
/// the defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub m_cost_kib: u32,
    /// Iterations.
    pub t_cost: u32,
    /// Lanes.
    pub p_cost: u32,
}

impl Default for KdfParams {
    /// Tuned for interactive (desktop) use: 64 MiB, 3 passes, 1 lane.
    fn default() -> Self {
        Self {
            m_cost_kib: 64 * 1024,
            t_cost: 3,
            p_cost: 1,
        }
    }
}

impl KdfParams {
    fn to_argon2(self) -> Result<Params, CryptoError> {
        Params::new(self.m_cost_kib, self.t_cost, self.p_cost, Some(SECRET_LEN))
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
    }

    /// Check the parameters without deriving anything.
    pub fn validate(&self) -> Result<(), CryptoError> {
        self.to_argon2().map(|_| ())
    }
}

/// Derive a sealing secret from `secret` + 16-byte salt.
/// The salt is stored alongside the sealed value (not secret).
pub fn derive_secret(
    secret: &[u8],
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<SecretKey, CryptoError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);
    let mut output = [0u8; SECRET_LEN];
    argon2
        .hash_password_into(secret, salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(SecretKey(output))
}

/// Generate a fresh random 16-byte salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

// ── HKDF-SHA256 ───────────────────────────────────────────────────────────────

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
///
/// `ikm` may be empty; `salt` of `None` means a zeroed salt.
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}
