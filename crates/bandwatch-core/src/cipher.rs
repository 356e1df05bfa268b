//! The single block encryption the authentication handshake needs.
//!
//! AES-128, one block, ECB, no padding. The protocol never decrypts.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Block};

use crate::error::{BandwatchError, Result};

/// Key and block size in bytes.
pub const BLOCK_LEN: usize = 16;

/// Encrypt one 16-byte `block` under a 16-byte `key`.
///
/// # Errors
///
/// Returns [`BandwatchError::InvalidInput`] if either input is not exactly
/// [`BLOCK_LEN`] bytes.
pub fn encrypt(key: &[u8], block: &[u8]) -> Result<[u8; BLOCK_LEN]> {
    if key.len() != BLOCK_LEN {
        return Err(BandwatchError::InvalidInput(format!(
            "cipher key must be {BLOCK_LEN} bytes, got {}",
            key.len()
        )));
    }
    if block.len() != BLOCK_LEN {
        return Err(BandwatchError::InvalidInput(format!(
            "cipher block must be {BLOCK_LEN} bytes, got {}",
            block.len()
        )));
    }

    let cipher = Aes128::new_from_slice(key)
        .map_err(|e| BandwatchError::InvalidInput(format!("cipher key rejected: {e}")))?;
    let mut buf = Block::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);

    let mut out = [0u8; BLOCK_LEN];
    out.copy_from_slice(&buf);
    Ok(out)
}
