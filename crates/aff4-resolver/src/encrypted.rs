//! Encrypted streams.
//!
//! Plaintext is cut into fixed blocks, each encrypted with AES-256-CBC under
//! an IV derived from the stream IV and the block number, and written to a
//! backing image stream `{urn}/data`. The final block is zero padded; the
//! true length is kept in `aff4:size`.
//!
//! The stream key is stored only in wrapped form: under a passphrase, sealed
//! to public-key recipients, or both.

use std::fmt;

use aff4_crypto::{
    BlockCipher, CipherKind, CryptoError, KeyMaterial, PasswordWrap, WrappedKey,
};
use aff4_store::TripleStore;
use aff4_types::predicates::{
    CIPHER, CRYPTO_BLOCKSIZE, KEY_NONCE, PASSWORD_ITERATIONS, PASSWORD_SALT, SEALED_KEY, SIZE,
    STORED, TARGET, WRAPPED_KEY,
};
use aff4_types::{Urn, Value};
use tracing::{debug, info};

use crate::error::{Aff4Error, Aff4Result};
use crate::object::{OpenMode, Stream};
use crate::resolver::Resolver;

const DATA_MEMBER: &str = "data";

pub struct EncryptedStream {
    urn: Urn,
    target: Urn,
    cipher: BlockCipher,
    size: u64,
    writable: bool,
    /// Plaintext not yet filling a whole block.
    pending: Vec<u8>,
    next_block: u64,
    /// Last block decrypted on the read path.
    cached: Option<(u64, Vec<u8>)>,
    position: u64,
}

impl EncryptedStream {
    /// A new stream with a fresh key, wrapped for the resolver's passphrase
    /// and recipients.
    pub(crate) fn create(resolver: &Resolver, urn: &Urn) -> Aff4Result<Self> {
        let volume = resolver.store().resolve_urn(urn, STORED)?;
        let block_size = resolver.config().encryption_block_size;
        let kind = CipherKind::default();
        let passphrase = resolver.passphrase();
        let recipients = resolver.recipients();
        if passphrase.is_none() && recipients.is_empty() {
            return Err(Aff4Error::InvalidArgument(format!(
                "encrypted stream {urn} needs a passphrase or a recipient key"
            )));
        }

        let material = resolver.keys().get_or_generate(urn, kind);
        let cipher = BlockCipher::new(material.clone(), block_size as usize)?;
        if let Some(passphrase) = passphrase {
            let wrap = PasswordWrap::generate(resolver.config().password_iterations);
            let wrapped = wrap.wrap(&passphrase, &material)?;
            resolver.set(urn, PASSWORD_SALT, wrap.salt)?;
            resolver.set(urn, PASSWORD_ITERATIONS, wrap.iterations as i32)?;
            resolver.set(urn, WRAPPED_KEY, wrapped.wrapped)?;
            resolver.set(urn, KEY_NONCE, wrapped.nonce)?;
        }
        for recipient in &recipients {
            resolver.add(urn, SEALED_KEY, recipient.seal(&material)?)?;
        }

        let target = urn.join(DATA_MEMBER);
        let image = resolver.create_image(&volume, Some(target.clone()))?;
        resolver.cache_return(&image);
        resolver.set(urn, TARGET, &target)?;
        resolver.set(urn, CIPHER, kind.name())?;
        resolver.set(urn, CRYPTO_BLOCKSIZE, block_size as i32)?;
        debug!(stream = %urn, recipients = recipients.len(), "encrypted stream created");
        Ok(Self {
            urn: urn.clone(),
            target,
            cipher,
            size: 0,
            writable: true,
            pending: Vec::with_capacity(block_size as usize),
            next_block: 0,
            cached: None,
            position: 0,
        })
    }

    /// Open a stored stream, recovering its key.
    pub(crate) fn open(resolver: &Resolver, urn: &Urn, mode: OpenMode) -> Aff4Result<Self> {
        if mode == OpenMode::Write {
            return Err(Aff4Error::InvalidArgument(format!(
                "encrypted stream {urn} is already written"
            )));
        }
        let store = resolver.store();
        let kind: CipherKind = store.resolve_string(urn, CIPHER)?.parse()?;
        let block_size = store.resolve_u64(urn, CRYPTO_BLOCKSIZE)? as usize;
        let material = match resolver.keys().get(urn, kind) {
            Some(material) => material,
            None => {
                let material = recover_key(resolver, urn)?;
                resolver.keys().insert(urn, kind, material.clone());
                material
            }
        };
        Ok(Self {
            urn: urn.clone(),
            target: store.resolve_urn(urn, TARGET)?,
            cipher: BlockCipher::new(material, block_size)?,
            size: store.resolve_u64(urn, SIZE)?,
            writable: false,
            pending: Vec::new(),
            next_block: 0,
            cached: None,
            position: 0,
        })
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn target(&self) -> &Urn {
        &self.target
    }

    fn block_size(&self) -> usize {
        self.cipher.block_size()
    }

    fn write_block(&mut self, resolver: &Resolver, mut block: Vec<u8>) -> Aff4Result<()> {
        self.cipher.encrypt_chunk(self.next_block, &mut block)?;
        resolver.write_stream(&self.target, &block)?;
        self.next_block += 1;
        Ok(())
    }

    fn read_block(&mut self, resolver: &Resolver, index: u64) -> Aff4Result<&[u8]> {
        if self.cached.as_ref().map(|(i, _)| *i) != Some(index) {
            let bs = self.block_size();
            let mut block = vec![0u8; bs];
            let mut filled = 0;
            while filled < bs {
                let at = index * bs as u64 + filled as u64;
                let n = resolver.read_stream_at(&self.target, at, &mut block[filled..])?;
                if n == 0 {
                    return Err(Aff4Error::CorruptArchive(format!(
                        "encrypted stream {} is missing block {index}",
                        self.urn
                    )));
                }
                filled += n;
            }
            self.cipher.decrypt_chunk(index, &mut block)?;
            self.cached = Some((index, block));
        }
        Ok(self.cached.as_ref().map(|(_, b)| b.as_slice()).unwrap_or_default())
    }

    /// Pad and write the last block, record the size and forget the key.
    pub fn close(&mut self, resolver: &Resolver) -> Aff4Result<()> {
        if self.writable {
            if !self.pending.is_empty() {
                let mut block = std::mem::take(&mut self.pending);
                block.resize(self.block_size(), 0);
                self.write_block(resolver, block)?;
            }
            resolver.set(&self.urn, SIZE, self.size)?;
            resolver.close_urn(&self.target)?;
            self.writable = false;
            info!(stream = %self.urn, size = self.size, blocks = self.next_block, "encrypted stream closed");
        }
        resolver.keys().evict(&self.urn);
        self.cached = None;
        Ok(())
    }
}

/// Unwrap the stream key with the passphrase, else with any decryption
/// key matching a sealed copy.
fn recover_key(resolver: &Resolver, urn: &Urn) -> Aff4Result<KeyMaterial> {
    let store = resolver.store();
    // A rejected passphrase is only reported once the sealed keys fail too.
    let mut passphrase_error = None;
    if let Ok(wrapped) = store.resolve_bytes(urn, WRAPPED_KEY) {
        if let Some(passphrase) = resolver.passphrase() {
            let iterations = store.resolve_u64(urn, PASSWORD_ITERATIONS)?;
            let wrap = PasswordWrap {
                salt: store.resolve_bytes(urn, PASSWORD_SALT)?,
                iterations: u32::try_from(iterations).map_err(|_| {
                    Aff4Error::CorruptArchive(format!("{urn} has {iterations} password iterations"))
                })?,
            };
            let wrapped = WrappedKey {
                wrapped,
                nonce: store.resolve_bytes(urn, KEY_NONCE)?,
            };
            match wrap.unwrap_key(&passphrase, &wrapped) {
                Ok(key) => return Ok(key),
                Err(e) => {
                    debug!(stream = %urn, error = %e, "passphrase did not unwrap the key");
                    passphrase_error = Some(e);
                }
            }
        }
    }
    for sealed in store.resolve_all(urn, SEALED_KEY) {
        let Value::Binary(sealed) = sealed else {
            continue;
        };
        if let Some(opened) = resolver.find_with_decryption_keys(|key| key.unseal(&sealed)) {
            return Ok(opened?);
        }
    }
    Err(passphrase_error.unwrap_or(CryptoError::NoMatchingKey).into())
}

impl Stream for EncryptedStream {
    fn size(&self, _: &Resolver) -> Aff4Result<u64> {
        Ok(self.size)
    }

    fn read_at(&mut self, resolver: &Resolver, offset: u64, buf: &mut [u8]) -> Aff4Result<usize> {
        if self.writable {
            return Err(Aff4Error::InvalidArgument(format!(
                "encrypted stream {} cannot be read while it is written",
                self.urn
            )));
        }
        let bs = self.block_size() as u64;
        let end = self.size.min(offset.saturating_add(buf.len() as u64));
        let mut pos = offset;
        while pos < end {
            let index = pos / bs;
            let within = (pos % bs) as usize;
            let take = ((bs - within as u64).min(end - pos)) as usize;
            let at = (pos - offset) as usize;
            let block = self.read_block(resolver, index)?;
            buf[at..at + take].copy_from_slice(&block[within..within + take]);
            pos += take as u64;
        }
        Ok(end.saturating_sub(offset) as usize)
    }

    fn write(&mut self, resolver: &Resolver, mut data: &[u8]) -> Aff4Result<usize> {
        if !self.writable {
            return Err(Aff4Error::InvalidArgument(format!(
                "encrypted stream {} is read-only",
                self.urn
            )));
        }
        let written = data.len();
        let bs = self.block_size();
        while !data.is_empty() {
            let take = (bs - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() == bs {
                let block = std::mem::replace(&mut self.pending, Vec::with_capacity(bs));
                self.write_block(resolver, block)?;
            }
        }
        self.size += written as u64;
        self.position = self.size;
        Ok(written)
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) {
        self.position = position;
    }
}

impl fmt::Debug for EncryptedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedStream")
            .field("urn", &self.urn)
            .field("target", &self.target)
            .field("size", &self.size)
            .field("writable", &self.writable)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use aff4_crypto::DecryptionKey;
    use std::path::{Path, PathBuf};

    fn resolver() -> Resolver {
        Resolver::new(ResolverConfig {
            lock_files: false,
            password_iterations: 100,
            passphrase_env: "AFF4_TEST_UNSET_PASSPHRASE".into(),
            ..ResolverConfig::default()
        })
    }

    fn secret(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 13 % 256) as u8).collect()
    }

    fn write_encrypted(dir: &Path, setup: impl FnOnce(&Resolver), data: &[u8]) -> (PathBuf, Urn) {
        let path = dir.join("secret.aff4");
        let r = resolver();
        setup(&r);
        let volume = r.create_volume(&path).unwrap();
        let stream = r.create_encrypted(volume.urn(), None).unwrap();
        r.write_stream(stream.urn(), data).unwrap();
        let urn = stream.urn().clone();
        r.close(&volume).unwrap();
        (path, urn)
    }

    #[test]
    fn passphrase_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let data = secret(10_000);
        let (path, urn) = write_encrypted(dir.path(), |r| r.set_passphrase("hunter2"), &data);

        let r = resolver();
        r.set_passphrase("hunter2");
        r.open_volume(&path, OpenMode::Read).unwrap();
        assert_eq!(r.stream_size(&urn).unwrap(), 10_000);
        let mut buf = vec![0u8; 10_000];
        assert_eq!(r.read_stream_at(&urn, 0, &mut buf).unwrap(), 10_000);
        assert_eq!(buf, data);

        let mut tail = vec![0u8; 100];
        assert_eq!(r.read_stream_at(&urn, 9_950, &mut tail).unwrap(), 50);
        assert_eq!(&tail[..50], &data[9_950..]);
    }

    #[test]
    fn ciphertext_hides_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![b'Z'; 8192];
        let (path, urn) = write_encrypted(dir.path(), |r| r.set_passphrase("pw"), &data);
        let r = resolver();
        r.open_volume(&path, OpenMode::Read).unwrap();
        let target = urn.join(DATA_MEMBER);
        let mut raw = vec![0u8; 8192];
        r.read_stream_at(&target, 0, &mut raw).unwrap();
        assert_ne!(raw, data);
        // Equal plaintext blocks encrypt differently.
        assert_ne!(raw[..4096], raw[4096..]);
        assert!(r.store().resolve_bytes(&urn, WRAPPED_KEY).is_ok());
    }

    #[test]
    fn wrong_passphrase_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (path, urn) = write_encrypted(dir.path(), |r| r.set_passphrase("right"), b"data");
        let r = resolver();
        r.set_passphrase("wrong");
        r.open_volume(&path, OpenMode::Read).unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(
            r.read_stream_at(&urn, 0, &mut buf),
            Err(Aff4Error::Crypto(CryptoError::BadPassphrase))
        ));
    }

    #[test]
    fn sealed_keys_open_with_matching_secret() {
        let dir = tempfile::tempdir().unwrap();
        let key = DecryptionKey::from_bytes([7u8; 32]);
        let recipient = key.recipient();
        let (path, urn) = write_encrypted(dir.path(), |r| r.add_recipient(recipient), b"sealed bytes");

        let r = resolver();
        r.add_decryption_key(DecryptionKey::generate());
        r.open_volume(&path, OpenMode::Read).unwrap();
        let mut buf = [0u8; 12];
        assert!(matches!(
            r.read_stream_at(&urn, 0, &mut buf),
            Err(Aff4Error::Crypto(CryptoError::NoMatchingKey))
        ));

        r.add_decryption_key(DecryptionKey::from_bytes([7u8; 32]));
        assert_eq!(r.read_stream_at(&urn, 0, &mut buf).unwrap(), 12);
        assert_eq!(&buf, b"sealed bytes");
    }

    #[test]
    fn sealed_key_opens_after_wrong_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let recipient = DecryptionKey::from_bytes([9u8; 32]).recipient();
        let (path, urn) = write_encrypted(
            dir.path(),
            |r| {
                r.set_passphrase("right");
                r.add_recipient(recipient);
            },
            b"either key",
        );

        let r = resolver();
        r.set_passphrase("wrong");
        r.add_decryption_key(DecryptionKey::from_bytes([9u8; 32]));
        r.open_volume(&path, OpenMode::Read).unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(r.read_stream_at(&urn, 0, &mut buf).unwrap(), 10);
        assert_eq!(&buf, b"either key");

        // Neither path works: the passphrase failure is what gets reported.
        let r = resolver();
        r.set_passphrase("wrong");
        r.add_decryption_key(DecryptionKey::generate());
        r.open_volume(&path, OpenMode::Read).unwrap();
        assert!(matches!(
            r.read_stream_at(&urn, 0, &mut buf),
            Err(Aff4Error::Crypto(CryptoError::BadPassphrase))
        ));
    }

    #[test]
    fn creation_needs_a_wrapping_key() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver();
        let volume = r.create_volume(&dir.path().join("v.aff4")).unwrap();
        assert!(matches!(
            r.create_encrypted(volume.urn(), None),
            Err(Aff4Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn key_is_dropped_with_an_idle_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (path, urn) = write_encrypted(dir.path(), |r| r.set_passphrase("pw"), b"idle");
        let r = Resolver::new(ResolverConfig {
            lock_files: false,
            password_iterations: 100,
            passphrase_env: "AFF4_TEST_UNSET_PASSPHRASE".into(),
            cache_capacity: 0,
            ..ResolverConfig::default()
        });
        r.set_passphrase("pw");
        r.open_volume(&path, OpenMode::Read).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(r.read_stream_at(&urn, 0, &mut buf).unwrap(), 4);
        assert!(!r.is_cached(&urn));
        assert!(r.keys().is_empty());

        // Reopening recovers the key again.
        assert_eq!(r.read_stream_at(&urn, 0, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"idle");
    }

    #[test]
    fn key_is_evicted_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let r = resolver();
        r.set_passphrase("pw");
        let volume = r.create_volume(&dir.path().join("v.aff4")).unwrap();
        let stream = r.create_encrypted(volume.urn(), None).unwrap();
        assert_eq!(r.keys().len(), 1);
        r.close(&stream).unwrap();
        assert!(r.keys().is_empty());
        r.close(&volume).unwrap();
    }
}
