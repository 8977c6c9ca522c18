//! Encrypted containers.
//!
//! ```text
//! HEADER (96) | CIPHERTEXT (n) | TAG (32)
//! ```
//!
//! The payload is AES-256-CTR encrypted with the first half of the derived
//! key; the tag is HMAC-SHA-256 over header and ciphertext keyed with the
//! second half.

pub mod stream;

pub use stream::{
    CHUNK_SIZE, Decryptor, Encryptor, decrypt_stream, decrypt_stream_with_budget, encrypt_stream,
    encrypt_stream_with_budget, encrypt_stream_with_params,
};

use tracing::warn;
use zeroize::Zeroizing;

use crate::crypto::cipher::tag;
use crate::crypto::{self, Header, PayloadCipher, SALT_LEN, TAG_LEN, TagComputer};
use crate::error::{Error, Result};
use crate::params::{Budget, CostParameters, CostPolicy};
use crate::record::{open_header, seal_header};

/// Header plus trailing tag: the smallest valid container.
pub const MIN_CONTAINER_LEN: usize = Header::LEN + TAG_LEN;

/// Where decryption gets its resource limits from.
///
/// A policy is only measured once the header has been read and its checksum
/// verified.
#[derive(Debug, Clone, Copy)]
pub enum Limits {
    Policy(CostPolicy),
    Budget(Budget),
}

impl Limits {
    pub(crate) fn resolve(&self) -> Result<Budget> {
        match self {
            Limits::Policy(policy) => Budget::measure(policy),
            Limits::Budget(budget) => Ok(*budget),
        }
    }
}

/// Encrypts `plaintext` with parameters chosen for `policy`.
pub fn encrypt_buffer(plaintext: &[u8], password: &[u8], policy: &CostPolicy) -> Result<Vec<u8>> {
    encrypt_buffer_with_budget(plaintext, password, &Budget::measure(policy)?)
}

/// Encrypts `plaintext` with parameters chosen for an already measured budget.
pub fn encrypt_buffer_with_budget(
    plaintext: &[u8],
    password: &[u8],
    budget: &Budget,
) -> Result<Vec<u8>> {
    encrypt_buffer_with_params(plaintext, password, &budget.select())
}

/// Encrypts `plaintext` with explicit parameters and a fresh salt.
pub fn encrypt_buffer_with_params(
    plaintext: &[u8],
    password: &[u8],
    params: &CostParameters,
) -> Result<Vec<u8>> {
    let salt = crypto::generate_salt()?;
    encrypt_with_salt(plaintext, password, params, &salt)
}

pub(crate) fn encrypt_with_salt(
    plaintext: &[u8],
    password: &[u8],
    params: &CostParameters,
    salt: &[u8; SALT_LEN],
) -> Result<Vec<u8>> {
    let (header, dk) = seal_header(password, params, salt)?;

    let mut out = Vec::with_capacity(MIN_CONTAINER_LEN + plaintext.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(plaintext);
    PayloadCipher::new(dk.cipher_key()).apply(&mut out[Header::LEN..]);

    let signature = tag(dk.mac_key(), &out);
    out.extend_from_slice(&signature);
    Ok(out)
}

/// Decrypts a complete container, checking the stored parameters against
/// `policy`.
///
/// # Errors
///
/// Wrong magic or version and short input fail before any derivation. A wrong
/// password is [`Error::IncorrectPassword`]; a tampered payload or tag is
/// [`Error::AuthenticationMismatch`].
pub fn decrypt_buffer(
    container: &[u8],
    password: &[u8],
    policy: &CostPolicy,
) -> Result<Zeroizing<Vec<u8>>> {
    decrypt(container, password, Limits::Policy(*policy))
}

/// Like [`decrypt_buffer`] with an already measured budget.
pub fn decrypt_buffer_with_budget(
    container: &[u8],
    password: &[u8],
    budget: &Budget,
) -> Result<Zeroizing<Vec<u8>>> {
    decrypt(container, password, Limits::Budget(*budget))
}

fn decrypt(container: &[u8], password: &[u8], limits: Limits) -> Result<Zeroizing<Vec<u8>>> {
    Header::check_prefix(container)?;
    if container.len() < MIN_CONTAINER_LEN {
        return Err(Error::TruncatedInput);
    }

    let header = Header::parse(container)?;
    let budget = limits.resolve()?;
    let dk = open_header(&header, password, Some(&budget))?;

    let (signed, expected) = container.split_at(container.len() - TAG_LEN);
    let mut mac = TagComputer::new(dk.mac_key());
    mac.update(signed);
    if !mac.verify(expected) {
        warn!("container tag mismatch");
        return Err(Error::AuthenticationMismatch);
    }

    let mut plaintext = Zeroizing::new(signed[Header::LEN..].to_vec());
    PayloadCipher::new(dk.cipher_key()).apply(&mut plaintext);
    Ok(plaintext)
}
