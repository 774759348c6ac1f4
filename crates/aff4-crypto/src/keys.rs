//! Stream key material and its wrapping.
//!
//! A stream's master key never touches disk in the clear. It is stored
//! either wrapped under a passphrase-derived key (PBKDF2-HMAC-SHA256) or
//! sealed to one or more X25519 recipients. Both forms carry the same
//! 48-byte key material, so a stream may hold several of them at once.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use aff4_types::Urn;
use rand::RngCore;

use crate::cipher::{cbc_decrypt, cbc_encrypt, CipherKind, AES_BLOCK};
use crate::error::{CryptoError, CryptoResult};

/// Serialized length of [`KeyMaterial`]: 32 key bytes then 16 IV bytes.
pub const KEY_MATERIAL_LEN: usize = 48;

/// Default PBKDF2 iteration count.
pub const DEFAULT_ITERATIONS: u32 = 10_000;

/// Length of the per-stream password salt.
pub const SALT_LEN: usize = 16;

/// An AES-256 key and base IV.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    key: [u8; 32],
    iv: [u8; 16],
}

impl KeyMaterial {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut key = [0u8; 32];
        let mut iv = [0u8; 16];
        rng.fill_bytes(&mut key);
        rng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    pub fn from_parts(key: [u8; 32], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_MATERIAL_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {KEY_MATERIAL_LEN} bytes of key material, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; 32];
        let mut iv = [0u8; 16];
        key.copy_from_slice(&bytes[..32]);
        iv.copy_from_slice(&bytes[32..]);
        Ok(Self { key, iv })
    }

    pub fn to_bytes(&self) -> [u8; KEY_MATERIAL_LEN] {
        let mut out = [0u8; KEY_MATERIAL_LEN];
        out[..32].copy_from_slice(&self.key);
        out[32..].copy_from_slice(&self.iv);
        out
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    /// Encryption of one zero block under this key.
    ///
    /// Stored next to a wrapped key so an unwrap can be checked before any
    /// stream data is trusted.
    pub fn nonce(&self) -> CryptoResult<[u8; AES_BLOCK]> {
        let mut block = [0u8; AES_BLOCK];
        cbc_encrypt(&self.key, &self.iv, &mut block)?;
        Ok(block)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial(<redacted>)")
    }
}

/// A passphrase-wrapped key and its verification nonce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrappedKey {
    pub wrapped: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// PBKDF2 parameters of a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasswordWrap {
    pub salt: Vec<u8>,
    pub iterations: u32,
}

impl PasswordWrap {
    /// Fresh random salt with the given iteration count.
    pub fn generate(iterations: u32) -> Self {
        let mut salt = vec![0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self { salt, iterations }
    }

    fn kek(&self, passphrase: &str) -> [u8; 32] {
        let mut kek = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<sha2::Sha256>(
            passphrase.as_bytes(),
            &self.salt,
            self.iterations.max(1),
            &mut kek,
        );
        kek
    }

    fn kek_iv(&self) -> [u8; 16] {
        let mut iv = [0u8; 16];
        let n = self.salt.len().min(16);
        iv[..n].copy_from_slice(&self.salt[..n]);
        iv
    }

    pub fn wrap(&self, passphrase: &str, material: &KeyMaterial) -> CryptoResult<WrappedKey> {
        let mut wrapped = material.to_bytes();
        cbc_encrypt(&self.kek(passphrase), &self.kek_iv(), &mut wrapped)?;
        Ok(WrappedKey {
            wrapped: wrapped.to_vec(),
            nonce: material.nonce()?.to_vec(),
        })
    }

    /// Unwrap and check the nonce. A wrong passphrase fails here with
    /// [`CryptoError::BadPassphrase`].
    pub fn unwrap_key(&self, passphrase: &str, wrapped: &WrappedKey) -> CryptoResult<KeyMaterial> {
        if wrapped.wrapped.len() != KEY_MATERIAL_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "wrapped key is {} bytes",
                wrapped.wrapped.len()
            )));
        }
        let mut plain = [0u8; KEY_MATERIAL_LEN];
        plain.copy_from_slice(&wrapped.wrapped);
        cbc_decrypt(&self.kek(passphrase), &self.kek_iv(), &mut plain)?;
        let material = KeyMaterial::from_bytes(&plain)?;
        if material.nonce()?[..] != wrapped.nonce[..] {
            return Err(CryptoError::BadPassphrase);
        }
        Ok(material)
    }
}

/// Public half of a sealed-key recipient.
#[derive(Clone, PartialEq, Eq)]
pub struct RecipientKey(crypto_box::PublicKey);

/// Private half of a sealed-key recipient.
pub struct DecryptionKey(crypto_box::SecretKey);

impl RecipientKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(crypto_box::PublicKey::from(bytes))
    }

    pub fn from_hex(text: &str) -> CryptoResult<Self> {
        Ok(Self::from_bytes(decode_key_hex(text)?))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Seal `material` to this recipient.
    ///
    /// The stored form is the recipient's public key followed by the sealed
    /// box, so a reader can find the entry meant for its own key.
    pub fn seal(&self, material: &KeyMaterial) -> CryptoResult<Vec<u8>> {
        let sealed = self
            .0
            .seal(&mut rand::rngs::OsRng, &material.to_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let mut out = Vec::with_capacity(32 + sealed.len());
        out.extend_from_slice(self.as_bytes());
        out.extend_from_slice(&sealed);
        Ok(out)
    }
}

impl DecryptionKey {
    pub fn generate() -> Self {
        Self(crypto_box::SecretKey::generate(&mut rand::rngs::OsRng))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(crypto_box::SecretKey::from(bytes))
    }

    pub fn from_hex(text: &str) -> CryptoResult<Self> {
        Ok(Self::from_bytes(decode_key_hex(text)?))
    }

    pub fn recipient(&self) -> RecipientKey {
        RecipientKey(self.0.public_key())
    }

    /// Open a sealed key produced by [`RecipientKey::seal`]. Returns `None`
    /// when the entry was sealed to another recipient.
    pub fn unseal(&self, sealed: &[u8]) -> Option<CryptoResult<KeyMaterial>> {
        let (recipient, sealed_box) = sealed.split_at_checked(32)?;
        if recipient != self.recipient().as_bytes() {
            return None;
        }
        Some(
            self.0
                .unseal(sealed_box)
                .map_err(|_| CryptoError::NoMatchingKey)
                .and_then(|plain| KeyMaterial::from_bytes(&plain)),
        )
    }
}

impl fmt::Debug for RecipientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecipientKey({})", hex::encode(self.as_bytes()))
    }
}

impl fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DecryptionKey(<redacted>)")
    }
}

fn decode_key_hex(text: &str) -> CryptoResult<[u8; 32]> {
    let bytes = hex::decode(text.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("expected a 32-byte key".into()))
}

/// Live stream keys, keyed by (subject, cipher).
///
/// The cache is not a secure store: owners evict their key on close so the
/// next open has to unwrap it again.
#[derive(Default)]
pub struct KeyCache {
    keys: Mutex<HashMap<(Urn, CipherKind), KeyMaterial>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subject: &Urn, cipher: CipherKind) -> Option<KeyMaterial> {
        self.keys
            .lock()
            .expect("lock poisoned")
            .get(&(subject.clone(), cipher))
            .cloned()
    }

    pub fn insert(&self, subject: &Urn, cipher: CipherKind, material: KeyMaterial) {
        self.keys
            .lock()
            .expect("lock poisoned")
            .insert((subject.clone(), cipher), material);
    }

    /// The cached key, generating one on first use.
    pub fn get_or_generate(&self, subject: &Urn, cipher: CipherKind) -> KeyMaterial {
        self.keys
            .lock()
            .expect("lock poisoned")
            .entry((subject.clone(), cipher))
            .or_insert_with(|| {
                tracing::debug!(%subject, %cipher, "generated stream key");
                KeyMaterial::generate()
            })
            .clone()
    }

    /// Drop every key of `subject`. Returns how many were removed.
    pub fn evict(&self, subject: &Urn) -> usize {
        let mut keys = self.keys.lock().expect("lock poisoned");
        let before = keys.len();
        keys.retain(|(s, _), _| s != subject);
        before - keys.len()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCache").field("keys", &self.len()).finish()
    }
}
