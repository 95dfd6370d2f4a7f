//! Transparent encryption of node payloads.
//!
//! Records are stored as one clear tag byte followed by the node payload;
//! when encryption is enabled the payload is AES-128-ECB ciphertext with
//! PKCS#7 padding, so a payload of `n` bytes always occupies
//! `n + 16 - (n % 16)` bytes on disk. The tag byte is never encrypted, so
//! node classification works without touching the cipher.

use std::fs;
use std::path::Path;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};

use crate::error::{Result, StoreError};

type Aes128EcbEnc = ecb::Encryptor<aes::Aes128>;
type Aes128EcbDec = ecb::Decryptor<aes::Aes128>;

/// Cipher block size in bytes.
pub const BLOCK_LEN: usize = 16;

/// Length of the key material in bytes.
pub const KEY_LEN: usize = 16;

/// Stored length of a plaintext of `len` bytes after padding.
///
/// PKCS#7 always appends at least one byte, so an exact multiple of the
/// block size still grows by a full block.
pub fn padded_len(len: usize) -> usize {
    len + BLOCK_LEN - (len % BLOCK_LEN)
}

/// Process-wide node payload cipher, constructed once per store.
#[derive(Clone)]
pub struct NodeCipher {
    key: [u8; KEY_LEN],
}

impl NodeCipher {
    /// Wraps raw key material.
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Loads a hex-encoded key from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("key file {}: {e}", path.display())))?;
        let bytes = hex::decode(text.trim())
            .map_err(|e| StoreError::Config(format!("key file {}: {e}", path.display())))?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| StoreError::Config(format!("key file {} must hold {KEY_LEN} bytes", path.display())))?;
        Ok(Self::new(key))
    }

    /// Encrypts a node payload (the bytes after the tag byte).
    pub fn encrypt(&self, payload: &[u8]) -> Vec<u8> {
        Aes128EcbEnc::new(&self.key.into()).encrypt_padded_vec_mut::<Pkcs7>(payload)
    }

    /// Decrypts a node payload, rejecting corrupt ciphertext.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Aes128EcbDec::new(&self.key.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| StoreError::Cipher("bad key or corrupt ciphertext"))
    }

    /// Seals an encoded record, leaving the leading tag byte in the clear.
    pub fn seal_record(&self, encoded: &[u8]) -> Result<Vec<u8>> {
        let (tag, payload) = split_record(encoded)?;
        let mut stored = Vec::with_capacity(1 + padded_len(payload.len()));
        stored.push(tag);
        stored.extend_from_slice(&self.encrypt(payload));
        Ok(stored)
    }

    /// Opens a stored record back into tag byte + plaintext payload.
    pub fn open_record(&self, stored: &[u8]) -> Result<Vec<u8>> {
        let (tag, ciphertext) = split_record(stored)?;
        let payload = self.decrypt(ciphertext)?;
        let mut record = Vec::with_capacity(1 + payload.len());
        record.push(tag);
        record.extend_from_slice(&payload);
        Ok(record)
    }
}

fn split_record(record: &[u8]) -> Result<(u8, &[u8])> {
    match record.split_first() {
        Some((&tag, payload)) => Ok((tag, payload)),
        None => Err(StoreError::Corruption("empty node record")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> NodeCipher {
        NodeCipher::new([7u8; KEY_LEN])
    }

    #[test]
    fn roundtrip_various_lengths() {
        for len in [1usize, 15, 16, 17, 100, 256] {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let ct = cipher().encrypt(&payload);
            assert_eq!(ct.len(), padded_len(len));
            assert_ne!(ct, payload);
            assert_eq!(cipher().decrypt(&ct).unwrap(), payload);
        }
    }

    #[test]
    fn padded_len_rounds_to_next_block() {
        assert_eq!(padded_len(0), 16);
        assert_eq!(padded_len(15), 16);
        assert_eq!(padded_len(16), 32);
        assert_eq!(padded_len(17), 32);
    }

    #[test]
    fn seal_keeps_tag_clear() {
        let record = [&[0x80u8][..], &[42u8; 36][..]].concat();
        let stored = cipher().seal_record(&record).unwrap();
        assert_eq!(stored[0], 0x80);
        assert_eq!(stored.len(), 1 + padded_len(36));
        assert_eq!(cipher().open_record(&stored).unwrap(), record);
    }

    #[test]
    fn rejects_unaligned_ciphertext() {
        assert!(matches!(
            cipher().decrypt(&[0u8; 17]),
            Err(StoreError::Cipher(_))
        ));
    }

    #[test]
    fn wrong_key_never_reveals_plaintext() {
        let payload = [9u8; 48];
        let ct = cipher().encrypt(&payload);
        let other = NodeCipher::new([8u8; KEY_LEN]);
        match other.decrypt(&ct) {
            Ok(p) => assert_ne!(p, payload),
            Err(StoreError::Cipher(_)) => {}
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }

    #[test]
    fn loads_hex_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.key");
        std::fs::write(&path, "000102030405060708090a0b0c0d0e0f\n").unwrap();
        let c = NodeCipher::load(&path).unwrap();
        let payload = b"sixteen byte msg";
        assert_eq!(c.decrypt(&c.encrypt(payload)).unwrap(), payload);

        std::fs::write(&path, "0001").unwrap();
        assert!(matches!(
            NodeCipher::load(&path),
            Err(StoreError::Config(_))
        ));
    }
}
