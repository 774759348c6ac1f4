use std::fmt;
use std::str::FromStr;

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::KeyMaterial;

/// AES block length in bytes.
pub const AES_BLOCK: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Cipher suites an encrypted stream can declare in `aff4:cipher`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherKind {
    #[default]
    #[serde(rename = "aes256-cbc")]
    Aes256Cbc,
}

impl CipherKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Aes256Cbc => "aes256-cbc",
        }
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherKind {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes256-cbc" => Ok(Self::Aes256Cbc),
            other => Err(CryptoError::UnknownCipher(other.to_string())),
        }
    }
}

/// Encrypt `data` in place with AES-256-CBC, no padding.
pub(crate) fn cbc_encrypt(key: &[u8; 32], iv: &[u8; 16], data: &mut [u8]) -> CryptoResult<()> {
    check_aligned(data.len())?;
    let len = data.len();
    Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
        .encrypt_padded_mut::<NoPadding>(data, len)
        .map_err(|_| CryptoError::BlockAlignment { len, block: AES_BLOCK })?;
    Ok(())
}

/// Decrypt `data` in place with AES-256-CBC, no padding.
pub(crate) fn cbc_decrypt(key: &[u8; 32], iv: &[u8; 16], data: &mut [u8]) -> CryptoResult<()> {
    check_aligned(data.len())?;
    let len = data.len();
    Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?
        .decrypt_padded_mut::<NoPadding>(data)
        .map_err(|_| CryptoError::BlockAlignment { len, block: AES_BLOCK })?;
    Ok(())
}

fn check_aligned(len: usize) -> CryptoResult<()> {
    if len % AES_BLOCK != 0 {
        return Err(CryptoError::BlockAlignment { len, block: AES_BLOCK });
    }
    Ok(())
}

/// Chunked AES-256-CBC over fixed-size stream blocks.
///
/// Every chunk is encrypted independently with `IV = base_iv XOR index`
/// (index little-endian in the low eight bytes), so identical plaintext at
/// different positions never produces identical ciphertext and a chunk
/// moved to another position decrypts to garbage.
pub struct BlockCipher {
    material: KeyMaterial,
    block_size: usize,
}

impl BlockCipher {
    /// `block_size` must be a non-zero multiple of the AES block.
    pub fn new(material: KeyMaterial, block_size: usize) -> CryptoResult<Self> {
        if block_size == 0 {
            return Err(CryptoError::BlockAlignment { len: 0, block: AES_BLOCK });
        }
        check_aligned(block_size)?;
        Ok(Self {
            material,
            block_size,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The IV of chunk `index`.
    pub fn chunk_iv(&self, index: u64) -> [u8; 16] {
        let mut iv = *self.material.iv();
        for (slot, byte) in iv.iter_mut().zip(index.to_le_bytes()) {
            *slot ^= byte;
        }
        iv
    }

    /// Encrypt one whole block in place.
    pub fn encrypt_chunk(&self, index: u64, block: &mut [u8]) -> CryptoResult<()> {
        self.check_block(block.len())?;
        cbc_encrypt(self.material.key(), &self.chunk_iv(index), block)
    }

    /// Decrypt one whole block in place.
    pub fn decrypt_chunk(&self, index: u64, block: &mut [u8]) -> CryptoResult<()> {
        self.check_block(block.len())?;
        cbc_decrypt(self.material.key(), &self.chunk_iv(index), block)
    }

    fn check_block(&self, len: usize) -> CryptoResult<()> {
        if len != self.block_size {
            return Err(CryptoError::BlockAlignment {
                len,
                block: self.block_size,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for BlockCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCipher")
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_unaligned_block_size() {
        assert!(BlockCipher::new(KeyMaterial::generate(), 100).is_err());
        assert!(BlockCipher::new(KeyMaterial::generate(), 0).is_err());
        assert!(BlockCipher::new(KeyMaterial::generate(), 4096).is_ok());
    }

    #[test]
    fn chunk_iv_xors_index() {
        let cipher = BlockCipher::new(KeyMaterial::from_parts([7; 32], [0; 16]), 16).unwrap();
        assert_eq!(cipher.chunk_iv(0), [0; 16]);
        let iv = cipher.chunk_iv(0x0102);
        assert_eq!(&iv[..3], &[0x02, 0x01, 0x00]);
        assert_eq!(&iv[8..], &[0; 8]);
    }

    #[test]
    fn same_plaintext_differs_by_position() {
        let cipher = BlockCipher::new(KeyMaterial::generate(), 32).unwrap();
        let mut a = [0x41u8; 32];
        let mut b = [0x41u8; 32];
        cipher.encrypt_chunk(0, &mut a).unwrap();
        cipher.encrypt_chunk(1, &mut b).unwrap();
        assert_ne!(a, b);

        cipher.decrypt_chunk(1, &mut a).unwrap();
        assert_ne!(a, [0x41u8; 32]);
    }

    #[test]
    fn wrong_length_block_is_rejected() {
        let cipher = BlockCipher::new(KeyMaterial::generate(), 32).unwrap();
        let mut short = [0u8; 16];
        assert!(matches!(
            cipher.encrypt_chunk(0, &mut short),
            Err(CryptoError::BlockAlignment { len: 16, block: 32 })
        ));
    }

    #[test]
    fn cipher_names_roundtrip() {
        assert_eq!("aes256-cbc".parse::<CipherKind>().unwrap(), CipherKind::Aes256Cbc);
        assert!("rot13".parse::<CipherKind>().is_err());
    }

    proptest! {
        #[test]
        fn chunk_roundtrip(data in proptest::collection::vec(any::<u8>(), 64), index in any::<u64>()) {
            let cipher = BlockCipher::new(KeyMaterial::generate(), 64).unwrap();
            let mut block = data.clone();
            cipher.encrypt_chunk(index, &mut block).unwrap();
            prop_assert_ne!(&block, &data);
            cipher.decrypt_chunk(index, &mut block).unwrap();
            prop_assert_eq!(block, data);
        }
    }
}
