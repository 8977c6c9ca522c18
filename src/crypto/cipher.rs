//! AES-256-CTR payload encryption and the running HMAC-SHA-256 tag.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{KEY_LEN, TAG_LEN};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Counter-mode keystream starting at block zero.
///
/// Encryption and decryption are the same operation. The expanded AES key
/// schedule is wiped on drop.
pub struct PayloadCipher {
    inner: Aes256Ctr,
}

impl PayloadCipher {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            inner: Aes256Ctr::new(key.into(), &[0u8; 16].into()),
        }
    }

    /// XORs the keystream into `data` in place.
    pub fn apply(&mut self, data: &mut [u8]) {
        self.inner.apply_keystream(data);
    }
}

/// Incremental HMAC-SHA-256.
#[derive(Clone)]
pub struct TagComputer {
    mac: HmacSha256,
}

impl TagComputer {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            mac: <HmacSha256 as Mac>::new_from_slice(key)
                .expect("HMAC accepts keys of any length"),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.mac.update(data);
    }

    pub fn finalize(self) -> [u8; TAG_LEN] {
        self.mac.finalize().into_bytes().into()
    }

    /// Compares the tag against `expected` in constant time.
    pub fn verify(self, expected: &[u8]) -> bool {
        self.finalize()[..].ct_eq(expected).into()
    }
}

/// One-shot HMAC-SHA-256 of `data`.
pub fn tag(key: &[u8; KEY_LEN], data: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = TagComputer::new(key);
    mac.update(data);
    mac.finalize()
}
