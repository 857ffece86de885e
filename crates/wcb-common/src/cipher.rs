//! Payload encryption for the bridge protocol.
//!
//! Every payload published to the relay is sealed with AES-256-CBC (PKCS#7
//! padding) under the connection key and authenticated with
//! HMAC-SHA256 over `ciphertext ‖ iv`, keyed with the same key. The result is
//! carried as a hex-encoded [`Envelope`].
//!
//! The tag is checked in constant time before any block is decrypted, so
//! tampered or corrupted envelopes never yield plaintext.

use crate::types::{SymmetricKey, IV_LEN, KEY_LEN};
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Wire-visible encrypted payload: `{"data", "hmac", "iv"}`, all lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// AES-256-CBC ciphertext.
    pub data: String,
    /// HMAC-SHA256 over `ciphertext ‖ iv`.
    pub hmac: String,
    /// Initialization vector used for this envelope.
    pub iv: String,
}

/// Errors from sealing or opening an [`Envelope`].
#[derive(Debug, Error, PartialEq)]
pub enum CipherError {
    /// A hex field could not be decoded.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    /// Key material was not 32 bytes.
    #[error("invalid key length: expected {KEY_LEN}, got {0}")]
    InvalidKeyLength(usize),
    /// The IV was not 16 bytes.
    #[error("invalid iv length: expected {IV_LEN}, got {0}")]
    InvalidIvLength(usize),
    /// Ciphertext is not a whole number of blocks.
    #[error("ciphertext length {0} is not a multiple of the block size")]
    InvalidCiphertextLength(usize),
    /// The authentication tag does not match `ciphertext ‖ iv`.
    #[error("integrity check failed")]
    IntegrityMismatch,
    /// Decrypted bytes do not end in valid PKCS#7 padding.
    #[error("invalid padding")]
    BadPadding,
}

/// Draw a fresh random IV from the OS random source.
#[must_use]
pub fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

fn tag_mac(key: &SymmetricKey, ciphertext: &[u8], iv: &[u8]) -> Result<HmacSha256, CipherError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|_| CipherError::InvalidKeyLength(KEY_LEN))?;
    mac.update(ciphertext);
    mac.update(iv);
    Ok(mac)
}

/// Seal `plaintext` under `key` with the given IV.
///
/// Padding is always applied: a block-aligned plaintext gains one full block
/// of `0x10` bytes.
///
/// # Examples
///
/// ```
/// use wcb_common::cipher;
/// use wcb_common::SymmetricKey;
///
/// let key = SymmetricKey::from_bytes([0u8; 32]);
/// let envelope = cipher::encrypt(b"test data", &key, &[0u8; 16]).unwrap();
/// assert_eq!(envelope.data, "39c7737429628697218b008f2c06e81f");
/// ```
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if the MAC cannot be keyed.
pub fn encrypt(
    plaintext: &[u8],
    key: &SymmetricKey,
    iv: &[u8; IV_LEN],
) -> Result<Envelope, CipherError> {
    let key_bytes = Zeroizing::new(*key.as_bytes());
    let ciphertext = Aes256CbcEnc::new(&(*key_bytes).into(), &(*iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let tag = tag_mac(key, &ciphertext, iv)?.finalize().into_bytes();

    Ok(Envelope {
        data: hex::encode(&ciphertext),
        hmac: hex::encode(tag),
        iv: hex::encode(iv),
    })
}

/// Open an envelope sealed by [`encrypt`].
///
/// # Errors
///
/// Fails closed: returns [`CipherError`] for malformed hex, wrong IV length,
/// a tag mismatch or invalid padding, and never returns partially decrypted
/// bytes.
pub fn decrypt(envelope: &Envelope, key: &SymmetricKey) -> Result<Vec<u8>, CipherError> {
    let ciphertext = hex::decode(&envelope.data)?;
    let iv_bytes = hex::decode(&envelope.iv)?;
    let tag = hex::decode(&envelope.hmac)?;

    let iv: [u8; IV_LEN] = iv_bytes
        .as_slice()
        .try_into()
        .map_err(|_| CipherError::InvalidIvLength(iv_bytes.len()))?;

    tag_mac(key, &ciphertext, &iv)?
        .verify_slice(&tag)
        .map_err(|_| CipherError::IntegrityMismatch)?;

    if ciphertext.is_empty() {
        return Ok(Vec::new());
    }
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CipherError::InvalidCiphertextLength(ciphertext.len()));
    }

    let key_bytes = Zeroizing::new(*key.as_bytes());
    Aes256CbcDec::new(&(*key_bytes).into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CipherError::BadPadding)
}
