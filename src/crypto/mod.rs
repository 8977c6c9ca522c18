//! Cryptographic building blocks: key derivation, the 96-byte header and the
//! payload cipher.

pub mod cipher;
pub mod header;
pub mod kdf;

pub use cipher::{PayloadCipher, TagComputer};
pub use header::Header;
pub use kdf::{DerivationTask, DerivedKeyMaterial, derive, derive_key_material, hash, spawn_derive};

use getrandom::fill;

use crate::error::{Error, Result};

/// Length of the salt (32 bytes).
pub const SALT_LEN: usize = 32;
/// Length of each derived key half (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of the derived key material: cipher key followed by MAC key.
pub const DK_LEN: usize = 2 * KEY_LEN;
/// Length of an HMAC-SHA-256 tag.
pub const TAG_LEN: usize = 32;
/// Length of the truncated SHA-256 header checksum.
pub const CHECKSUM_LEN: usize = 16;

/// Fill buffer with cryptographically secure random bytes
fn secure_random(buf: &mut [u8]) -> Result<()> {
    fill(buf).map_err(|_| Error::RandomSource)
}

/// Generate salt
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    secure_random(&mut salt)?;
    Ok(salt)
}
