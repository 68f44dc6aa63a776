//! Record cipher
//!
//! XChaCha20 keystream over the record bytes, no authentication tag.
//! Decrypting under the wrong key therefore succeeds and yields garbage of
//! the same length; callers that need integrity must add it themselves.
//!
//! The caller key may be any length (empty included). It is stretched to the
//! 32-byte cipher key with HKDF-SHA256.
//!
//! Layout:
//!   [ nonce (24 bytes) | ciphertext ]

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{Key, XChaCha20, XNonce};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::kdf::hkdf_expand;

pub const NONCE_LEN: usize = 24;

const KEY_SALT: &[u8] = b"kvlite";
const KEY_INFO: &[u8] = b"kvlite-record-cipher-v1";

fn cipher_key(key: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut out = Zeroizing::new([0u8; 32]);
    hkdf_expand(key, Some(KEY_SALT), KEY_INFO, &mut out[..])?;
    Ok(out)
}

fn apply(key: &[u8], nonce: &[u8], data: &mut [u8]) -> Result<(), CryptoError> {
    let k = cipher_key(key)?;
    let mut cipher = XChaCha20::new(Key::from_slice(&k[..]), XNonce::from_slice(nonce));
    cipher.apply_keystream(data);
    Ok(())
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let mut out = Vec::with_capacity(NONCE_LEN + plaintext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(plaintext);
    apply(key, &nonce, &mut out[NONCE_LEN..])?;
    Ok(out)
}

/// Decrypt bytes produced by [`encrypt`].
pub fn decrypt(data: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_LEN {
        return Err(CryptoError::CiphertextTooShort { len: data.len(), min: NONCE_LEN });
    }
    let (nonce, ct) = data.split_at(NONCE_LEN);
    let mut out = ct.to_vec();
    apply(key, nonce, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_same_key() {
        let ct = encrypt(b"attack at dawn", b"k1").unwrap();
        assert_eq!(ct.len(), NONCE_LEN + 14);
        assert_ne!(&ct[NONCE_LEN..], b"attack at dawn");
        assert_eq!(decrypt(&ct, b"k1").unwrap(), b"attack at dawn");
    }

    #[test]
    fn wrong_key_gives_garbage_not_error() {
        let ct = encrypt(b"attack at dawn", b"k1").unwrap();
        let pt = decrypt(&ct, b"k2").unwrap();
        assert_eq!(pt.len(), 14);
        assert_ne!(pt, b"attack at dawn");
    }

    #[test]
    fn empty_key_is_a_key() {
        let ct = encrypt(b"payload", b"").unwrap();
        assert_eq!(decrypt(&ct, b"").unwrap(), b"payload");
        assert_ne!(decrypt(&ct, b"x").unwrap(), b"payload");
    }

    #[test]
    fn fresh_nonce_per_call() {
        let a = encrypt(b"same", b"k").unwrap();
        let b = encrypt(b"same", b"k").unwrap();
        assert_ne!(hex::encode(&a), hex::encode(&b));
    }

    #[test]
    fn short_input_is_rejected() {
        assert!(matches!(
            decrypt(&[0u8; 5], b"k"),
            Err(CryptoError::CiphertextTooShort { len: 5, min: NONCE_LEN })
        ));
    }
}
