//! Authenticated sealing for key material
//!
//! Uses XChaCha20-Poly1305 (192-bit nonce).
//! Secret size: 32 bytes.  Nonce: 24 bytes (random).  Tag: 16 bytes.
//!
//! Sealed layout:
//!   [ nonce (24 bytes) | ciphertext + tag ]

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::kdf::SecretKey;

const NONCE_LEN: usize = 24;

/// Seal `plaintext` under `secret`, binding it to `aad`.
pub fn seal(secret: &SecretKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(&secret.0).map_err(|_| CryptoError::Seal)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::Seal)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a sealed value. Any wrong secret, wrong `aad` or modified byte fails
/// with [`CryptoError::Open`].
pub fn open(secret: &SecretKey, sealed: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.len() < NONCE_LEN {
        return Err(CryptoError::Open);
    }
    let (nonce_bytes, ct) = sealed.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new_from_slice(&secret.0).map_err(|_| CryptoError::Open)?;
    let plaintext = cipher
        .decrypt(nonce, Payload { msg: ct, aad })
        .map_err(|_| CryptoError::Open)?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let secret = SecretKey([7u8; 32]);
        let sealed = seal(&secret, b"store key", b"ctx").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + b"store key".len() + 16);
        assert_eq!(open(&secret, &sealed, b"ctx").unwrap().as_slice(), b"store key");
    }

    #[test]
    fn wrong_secret_or_aad_is_detected() {
        let sealed = seal(&SecretKey([7u8; 32]), b"store key", b"ctx").unwrap();
        assert!(matches!(open(&SecretKey([8u8; 32]), &sealed, b"ctx"), Err(CryptoError::Open)));
        assert!(matches!(open(&SecretKey([7u8; 32]), &sealed, b"other"), Err(CryptoError::Open)));
        assert!(matches!(open(&SecretKey([7u8; 32]), &sealed[..10], b"ctx"), Err(CryptoError::Open)));
    }
}
