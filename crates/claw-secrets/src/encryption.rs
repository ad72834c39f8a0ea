//! Cryptographic operations for secrets encryption.
//!
//! This module provides encryption and decryption using ChaCha20-Poly1305 AEAD.
//! It supports:
//! - Master key generation
//! - Path-specific key derivation
//! - Authenticated encryption with random nonces, bound to the secret path
//! - A versioned key ring with rotation notifications
//!
//! Stored ciphertexts have the form `enc:v<key-version>:<base64>`, where the
//! base64 payload is `nonce || ciphertext || tag`.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use parking_lot::RwLock;
use rand::RngCore;
use tokio::sync::watch;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::types::{SecretPath, SecretValue};

/// Size of the encryption key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

const CIPHERTEXT_PREFIX: &str = "enc:v";

/// A secret key for encryption operations.
///
/// The key is securely zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    /// Generates a new random secret key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a `SecretKey` from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the byte slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::Encryption {
                reason: format!("key must be exactly {KEY_SIZE} bytes, got {}", bytes.len()),
            });
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key bytes as a slice.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Derives a path-specific key from this master key.
    ///
    /// Uses BLAKE3 key derivation to create a unique key for each path.
    #[must_use]
    pub fn derive_for_path(&self, path: &SecretPath) -> Self {
        let context = format!("claw-secrets v1 {}", path.as_str());
        let derived = blake3::derive_key(&context, &self.bytes);
        Self { bytes: derived }
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts plaintext using ChaCha20-Poly1305.
///
/// The output format is: `nonce || ciphertext || tag`. `aad` is authenticated
/// but not encrypted; decryption must present the same bytes.
///
/// # Errors
///
/// Returns an error if encryption fails.
pub fn encrypt(key: &SecretKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new_from_slice(&key.bytes).map_err(|e| Error::Encryption {
        reason: format!("failed to create cipher: {e}"),
    })?;

    // Generate a random nonce
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| Error::Encryption {
            reason: format!("encryption failed: {e}"),
        })?;

    // Prepend nonce to ciphertext
    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);

    Ok(output)
}

/// Decrypts ciphertext that was encrypted with [`encrypt`].
///
/// Expects the input format: `nonce || ciphertext || tag`
///
/// # Errors
///
/// Returns an error if:
/// - The ciphertext is too short
/// - Authentication fails (wrong key, wrong `aad` or tampered data)
pub fn decrypt(key: &SecretKey, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Encryption {
            reason: format!(
                "ciphertext too short: expected at least {} bytes, got {}",
                NONCE_SIZE + TAG_SIZE,
                ciphertext.len()
            ),
        });
    }

    let cipher = ChaCha20Poly1305::new_from_slice(&key.bytes).map_err(|e| Error::Encryption {
        reason: format!("failed to create cipher: {e}"),
    })?;

    let (nonce, encrypted) = ciphertext.split_at(NONCE_SIZE);
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: encrypted,
                aad,
            },
        )
        .map_err(|e| Error::Encryption {
            reason: format!("decryption failed: {e}"),
        })
}

struct KeyRing {
    keys: BTreeMap<u32, SecretKey>,
    active: u32,
}

/// Encrypts secret values at rest with a rotatable key ring.
///
/// Each value is sealed with a key derived from the active ring key and the
/// secret's path; the path is also bound as associated data, so a ciphertext
/// copied to another path fails authentication. Older ring keys are retained
/// so values written before a key rotation remain readable.
pub struct EncryptionService {
    ring: RwLock<KeyRing>,
    version_tx: watch::Sender<u32>,
}

impl EncryptionService {
    /// Creates a service whose ring starts with `master` as version 1.
    #[must_use]
    pub fn new(master: SecretKey) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert(1, master);
        let (version_tx, _) = watch::channel(1);
        Self {
            ring: RwLock::new(KeyRing { keys, active: 1 }),
            version_tx,
        }
    }

    /// Creates a service with a freshly generated master key.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(SecretKey::generate())
    }

    /// Returns the version of the key new ciphertexts are sealed with.
    #[must_use]
    pub fn key_version(&self) -> u32 {
        self.ring.read().active
    }

    /// Subscribes to key-rotation notifications.
    ///
    /// The channel carries the active key version; it changes exactly when
    /// [`rotate_key`](Self::rotate_key) runs.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u32> {
        self.version_tx.subscribe()
    }

    /// Adds a freshly generated key to the ring and makes it active.
    ///
    /// Returns the new key version.
    pub fn rotate_key(&self) -> u32 {
        self.rotate_key_with(SecretKey::generate())
    }

    /// Adds `key` to the ring and makes it active.
    ///
    /// Returns the new key version.
    pub fn rotate_key_with(&self, key: SecretKey) -> u32 {
        let version = {
            let mut ring = self.ring.write();
            let version = ring.active + 1;
            ring.keys.insert(version, key);
            ring.active = version;
            version
        };
        self.version_tx.send_replace(version);
        tracing::info!(key_version = version, "encryption key rotated");
        version
    }

    /// Returns true if `value` looks like a ciphertext produced by this service.
    #[must_use]
    pub fn is_ciphertext(value: &str) -> bool {
        value.starts_with(CIPHERTEXT_PREFIX)
    }

    /// Encrypts `plaintext` for storage at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encryption`] if sealing fails.
    pub fn encrypt(&self, path: &SecretPath, plaintext: &SecretValue) -> Result<SecretValue> {
        let (version, key) = {
            let ring = self.ring.read();
            let key = ring.keys.get(&ring.active).ok_or_else(|| Error::Encryption {
                reason: format!("active key version {} missing from ring", ring.active),
            })?;
            (ring.active, key.derive_for_path(path))
        };

        let sealed = encrypt(&key, plaintext.as_bytes(), path.as_str().as_bytes())?;
        Ok(SecretValue::new(format!(
            "{CIPHERTEXT_PREFIX}{version}:{}",
            STANDARD.encode(sealed)
        )))
    }

    /// Decrypts a value previously produced by [`encrypt`](Self::encrypt)
    /// for the same `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encryption`] if the value is malformed, names an
    /// unknown key version, fails authentication or is not UTF-8.
    pub fn decrypt(&self, path: &SecretPath, ciphertext: &SecretValue) -> Result<SecretValue> {
        let (version, payload) = parse_ciphertext(ciphertext.expose())?;

        let key = {
            let ring = self.ring.read();
            let key = ring.keys.get(&version).ok_or_else(|| Error::Encryption {
                reason: format!("unknown key version {version}"),
            })?;
            key.derive_for_path(path)
        };

        let sealed = STANDARD.decode(payload).map_err(|e| Error::Encryption {
            reason: format!("ciphertext is not valid base64: {e}"),
        })?;
        let plaintext = decrypt(&key, &sealed, path.as_str().as_bytes())?;

        match String::from_utf8(plaintext) {
            Ok(text) => Ok(SecretValue::new(text)),
            Err(e) => {
                let mut bytes = e.into_bytes();
                bytes.zeroize();
                Err(Error::Encryption {
                    reason: "decrypted value is not valid UTF-8".to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.read();
        f.debug_struct("EncryptionService")
            .field("active_version", &ring.active)
            .field("keys", &ring.keys.len())
            .finish()
    }
}

fn parse_ciphertext(value: &str) -> Result<(u32, &str)> {
    let malformed = || Error::Encryption {
        reason: "value is not in 'enc:v<version>:<payload>' format".to_string(),
    };
    let rest = value.strip_prefix(CIPHERTEXT_PREFIX).ok_or_else(malformed)?;
    let (version, payload) = rest.split_once(':').ok_or_else(malformed)?;
    let version = version.parse::<u32>().map_err(|_| malformed())?;
    Ok((version, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> SecretPath {
        SecretPath::new(p).expect("valid path")
    }

    #[test]
    fn secret_key_generate() {
        let key1 = SecretKey::generate();
        let key2 = SecretKey::generate();

        // Keys should be different (with overwhelming probability)
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn secret_key_from_bytes_wrong_length() {
        assert!(SecretKey::from_bytes(&[0u8; 16]).is_err());
        assert!(SecretKey::from_bytes(&[0u8; 64]).is_err());

        let key = SecretKey::from_bytes(&[42u8; KEY_SIZE]).expect("should create key");
        assert_eq!(key.as_bytes(), &[42u8; KEY_SIZE]);
    }

    #[test]
    fn secret_key_debug_redacts() {
        let key = SecretKey::generate();
        let debug_str = format!("{key:?}");
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn secret_key_derive_for_path() {
        let master = SecretKey::generate();

        let derived1 = master.derive_for_path(&path("a/one"));
        let derived2 = master.derive_for_path(&path("a/two"));
        let derived1_again = master.derive_for_path(&path("a/one"));

        assert_eq!(derived1.as_bytes(), derived1_again.as_bytes());
        assert_ne!(derived1.as_bytes(), derived2.as_bytes());
        assert_ne!(derived1.as_bytes(), master.as_bytes());
    }

    #[test]
    fn raw_encrypt_decrypt_with_aad() {
        let key = SecretKey::generate();
        let ciphertext = encrypt(&key, b"hello, world!", b"ctx").expect("encrypt");

        assert_eq!(ciphertext.len(), NONCE_SIZE + 13 + TAG_SIZE);
        assert_eq!(
            decrypt(&key, &ciphertext, b"ctx").expect("decrypt"),
            b"hello, world!"
        );
        assert!(decrypt(&key, &ciphertext, b"other").is_err());
    }

    #[test]
    fn raw_decrypt_too_short_fails() {
        let key = SecretKey::generate();
        let short_data = vec![0u8; NONCE_SIZE + TAG_SIZE - 1];
        assert!(decrypt(&key, &short_data, b"").is_err());
    }

    #[test]
    fn service_roundtrip() {
        let service = EncryptionService::generate();
        let p = path("database/production/main");

        let sealed = service
            .encrypt(&p, &SecretValue::new("s3cret"))
            .expect("encrypt");
        assert!(EncryptionService::is_ciphertext(sealed.expose()));
        assert!(sealed.expose().starts_with("enc:v1:"));
        assert!(!sealed.expose().contains("s3cret"));

        let opened = service.decrypt(&p, &sealed).expect("decrypt");
        assert_eq!(opened.expose(), "s3cret");
    }

    #[test]
    fn service_produces_different_ciphertexts() {
        let service = EncryptionService::generate();
        let p = path("a/b");
        let value = SecretValue::new("same message");

        let ct1 = service.encrypt(&p, &value).expect("encrypt 1");
        let ct2 = service.encrypt(&p, &value).expect("encrypt 2");
        assert_ne!(ct1.expose(), ct2.expose());
    }

    #[test]
    fn ciphertext_is_bound_to_path() {
        let service = EncryptionService::generate();
        let sealed = service
            .encrypt(&path("a/b"), &SecretValue::new("v"))
            .expect("encrypt");

        let result = service.decrypt(&path("a/c"), &sealed);
        assert!(matches!(result, Err(Error::Encryption { .. })));
    }

    #[test]
    fn every_flipped_bit_fails_authentication() {
        let service = EncryptionService::generate();
        let p = path("a/b");
        let sealed = service
            .encrypt(&p, &SecretValue::new("payload"))
            .expect("encrypt");
        let (version, payload) = parse_ciphertext(sealed.expose()).expect("parse");
        let raw = STANDARD.decode(payload).expect("base64");

        for byte in 0..raw.len() {
            for bit in 0..8 {
                let mut tampered = raw.clone();
                tampered[byte] ^= 1 << bit;
                let value =
                    SecretValue::new(format!("enc:v{version}:{}", STANDARD.encode(&tampered)));
                let result = service.decrypt(&p, &value);
                assert!(
                    matches!(result, Err(Error::Encryption { .. })),
                    "bit {bit} of byte {byte} went undetected"
                );
            }
        }
    }

    #[test]
    fn malformed_values_are_rejected() {
        let service = EncryptionService::generate();
        let p = path("a/b");
        for bad in ["plaintext", "enc:v", "enc:vx:abc", "enc:v1:***"] {
            let result = service.decrypt(&p, &SecretValue::new(bad));
            assert!(
                matches!(result, Err(Error::Encryption { .. })),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn unknown_key_version_is_rejected() {
        let service = EncryptionService::generate();
        let p = path("a/b");
        let sealed = service.encrypt(&p, &SecretValue::new("v")).expect("encrypt");
        let forged = SecretValue::new(sealed.expose().replacen("enc:v1:", "enc:v9:", 1));
        assert!(service.decrypt(&p, &forged).is_err());
    }

    #[test]
    fn rotation_keeps_old_ciphertexts_readable() {
        let service = EncryptionService::generate();
        let p = path("a/b");
        let old = service.encrypt(&p, &SecretValue::new("old")).expect("encrypt");

        assert_eq!(service.rotate_key(), 2);
        assert_eq!(service.key_version(), 2);

        let new = service.encrypt(&p, &SecretValue::new("new")).expect("encrypt");
        assert!(new.expose().starts_with("enc:v2:"));
        assert_eq!(service.decrypt(&p, &old).expect("decrypt old").expose(), "old");
        assert_eq!(service.decrypt(&p, &new).expect("decrypt new").expose(), "new");
    }

    #[test]
    fn rotation_notifies_subscribers() {
        let service = EncryptionService::generate();
        let mut rx = service.subscribe();
        assert_eq!(*rx.borrow_and_update(), 1);

        service.rotate_key();

        assert!(rx.has_changed().expect("sender alive"));
        assert_eq!(*rx.borrow_and_update(), 2);
    }

    #[test]
    fn rotation_without_subscribers_still_advances() {
        let service = EncryptionService::generate();
        service.rotate_key();
        service.rotate_key();
        assert_eq!(service.key_version(), 3);
        assert_eq!(*service.subscribe().borrow(), 3);
    }

    #[test]
    fn service_debug_hides_keys() {
        let service = EncryptionService::new(SecretKey::from_bytes(&[7u8; KEY_SIZE]).expect("key"));
        let debug_str = format!("{service:?}");
        assert!(debug_str.contains("active_version: 1"));
        assert!(debug_str.contains("keys: 1"));
        assert!(!debug_str.contains("bytes"));
    }
}
