//! Decryption port: the cipher the pipeline calls once per input file.
//!
//! The pipeline only sees [`Decryptor`]; [`TripleDesCbc`] is the stock
//! implementation (3DES in CBC mode, PKCS#7 padding, base64 or raw input).

use base64::{Engine as _, engine::general_purpose::STANDARD};
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use des::{TdesEde2, TdesEde3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const BLOCK_SIZE: usize = 8;

#[derive(Error, Debug)]
pub enum DecryptError {
    #[error("invalid key length {0}, expected 16 or 24 bytes")]
    KeyLength(usize),

    #[error("invalid iv length {0}, expected 8 bytes")]
    IvLength(usize),

    #[error("ciphertext is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("ciphertext length {0} is not a positive multiple of 8")]
    BlockLength(usize),

    #[error("bad padding")]
    Padding,
}

/// How ciphertext is stored on disk.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiphertextEncoding {
    #[default]
    Base64,
    Raw,
}

/// Turns one file's ciphertext into plaintext. Must be callable from many
/// worker threads at once.
pub trait Decryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError>;
}

#[derive(Clone)]
enum TdesKey {
    TwoKey([u8; 16]),
    ThreeKey([u8; 24]),
}

#[derive(Clone)]
pub struct TripleDesCbc {
    key: TdesKey,
    iv: [u8; BLOCK_SIZE],
    encoding: CiphertextEncoding,
}

impl TripleDesCbc {
    pub fn new(key: &[u8], iv: &[u8], encoding: CiphertextEncoding) -> Result<Self, DecryptError> {
        let key = match key.len() {
            16 => TdesKey::TwoKey(key.try_into().map_err(|_| DecryptError::KeyLength(key.len()))?),
            24 => TdesKey::ThreeKey(key.try_into().map_err(|_| DecryptError::KeyLength(key.len()))?),
            n => return Err(DecryptError::KeyLength(n)),
        };
        let iv = iv.try_into().map_err(|_| DecryptError::IvLength(iv.len()))?;

        Ok(Self { key, iv, encoding })
    }

    fn decode(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
        match self.encoding {
            CiphertextEncoding::Raw => Ok(ciphertext.to_vec()),
            CiphertextEncoding::Base64 => {
                // encoders often wrap lines or leave a trailing newline
                let compact: Vec<u8> = ciphertext
                    .iter()
                    .copied()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect();
                Ok(STANDARD.decode(compact)?)
            }
        }
    }
}

impl Decryptor for TripleDesCbc {
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
        let raw = self.decode(ciphertext)?;
        if raw.is_empty() || raw.len() % BLOCK_SIZE != 0 {
            return Err(DecryptError::BlockLength(raw.len()));
        }

        let plain = match &self.key {
            TdesKey::TwoKey(k) => cbc::Decryptor::<TdesEde2>::new_from_slices(k, &self.iv)
                .map_err(|_| DecryptError::KeyLength(k.len()))?
                .decrypt_padded_vec_mut::<Pkcs7>(&raw),
            TdesKey::ThreeKey(k) => cbc::Decryptor::<TdesEde3>::new_from_slices(k, &self.iv)
                .map_err(|_| DecryptError::KeyLength(k.len()))?
                .decrypt_padded_vec_mut::<Pkcs7>(&raw),
        };

        plain.map_err(|_| DecryptError::Padding)
    }
}
