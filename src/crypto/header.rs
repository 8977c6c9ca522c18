//! The 96-byte scrypt header.
//!
//! ```text
//! MAGIC (6) | VERSION (1) | LOG_N (1) | R (4, BE) | P (4, BE) | SALT (32) | CHECKSUM (16) | SIGNATURE (32)
//! ```
//!
//! The checksum is the truncated SHA-256 of the first 48 bytes, the signature
//! an HMAC-SHA-256 of the first 64 bytes keyed with the derived MAC key.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::cipher::tag;
use super::{CHECKSUM_LEN, DerivedKeyMaterial, SALT_LEN, TAG_LEN};
use crate::error::{Error, Result};
use crate::params::CostParameters;

pub const MAGIC: &[u8; MAGIC_LEN] = b"scrypt";
pub const VERSION_V0: u8 = 0;

pub const MAGIC_LEN: usize = 6;
pub const VER_LEN: usize = 1;
/// Every format version starts with magic and version.
pub const PREFIX_LEN: usize = MAGIC_LEN + VER_LEN;

const LOG_N_OFFSET: usize = PREFIX_LEN;
const R_OFFSET: usize = LOG_N_OFFSET + 1;
const P_OFFSET: usize = R_OFFSET + 4;
const SALT_OFFSET: usize = P_OFFSET + 4;
const CHECKSUM_OFFSET: usize = SALT_OFFSET + SALT_LEN;
const SIGNATURE_OFFSET: usize = CHECKSUM_OFFSET + CHECKSUM_LEN;
const HEADER_LEN: usize = SIGNATURE_OFFSET + TAG_LEN;

#[derive(Clone, PartialEq, Eq)]
pub struct Header {
    bytes: [u8; HEADER_LEN],
}

impl Header {
    pub const LEN: usize = HEADER_LEN;

    /// Builds and signs a header for `params` and `salt`.
    pub fn seal(params: &CostParameters, salt: &[u8; SALT_LEN], dk: &DerivedKeyMaterial) -> Self {
        let mut bytes = [0u8; Self::LEN];

        bytes[..MAGIC_LEN].copy_from_slice(MAGIC);
        bytes[MAGIC_LEN] = VERSION_V0;
        bytes[LOG_N_OFFSET] = params.log_n();
        bytes[R_OFFSET..P_OFFSET].copy_from_slice(&params.r().to_be_bytes());
        bytes[P_OFFSET..SALT_OFFSET].copy_from_slice(&params.p().to_be_bytes());
        bytes[SALT_OFFSET..CHECKSUM_OFFSET].copy_from_slice(salt);

        let checksum = checksum(&bytes);
        bytes[CHECKSUM_OFFSET..SIGNATURE_OFFSET].copy_from_slice(&checksum);

        let signature = tag(dk.mac_key(), &bytes[..SIGNATURE_OFFSET]);
        bytes[SIGNATURE_OFFSET..].copy_from_slice(&signature);

        Self { bytes }
    }

    /// Checks magic and version, the part every format version shares.
    ///
    /// # Errors
    ///
    /// [`Error::TruncatedInput`] for fewer than 7 bytes,
    /// [`Error::FormatMismatch`] for wrong magic,
    /// [`Error::UnsupportedVersion`] for a version other than 0.
    pub fn check_prefix(data: &[u8]) -> Result<()> {
        if data.len() < PREFIX_LEN {
            return Err(Error::TruncatedInput);
        }
        if &data[..MAGIC_LEN] != MAGIC {
            return Err(Error::FormatMismatch);
        }
        let version = data[MAGIC_LEN];
        if version != VERSION_V0 {
            return Err(Error::UnsupportedVersion(version));
        }
        Ok(())
    }

    /// Parses the first 96 bytes of `data` and verifies the checksum.
    ///
    /// Does not need the password; the signature is checked separately with
    /// [`Header::verify_signature`].
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::check_prefix(data)?;

        let bytes: [u8; Self::LEN] = data
            .get(..Self::LEN)
            .and_then(|header| header.try_into().ok())
            .ok_or(Error::TruncatedInput)?;

        let expected = checksum(&bytes);
        if !bool::from(expected[..].ct_eq(&bytes[CHECKSUM_OFFSET..SIGNATURE_OFFSET])) {
            return Err(Error::MalformedRecord);
        }

        Ok(Self { bytes })
    }

    pub fn log_n(&self) -> u8 {
        self.bytes[LOG_N_OFFSET]
    }

    pub fn r(&self) -> u32 {
        u32::from_be_bytes(self.field(R_OFFSET))
    }

    pub fn p(&self) -> u32 {
        u32::from_be_bytes(self.field(P_OFFSET))
    }

    /// The stored cost parameters.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCostParameters`] if the stored values are out of range.
    pub fn params(&self) -> Result<CostParameters> {
        CostParameters::new(self.log_n(), self.r(), self.p())
    }

    pub fn salt(&self) -> [u8; SALT_LEN] {
        self.field(SALT_OFFSET)
    }

    /// `true` if the stored signature matches key material derived from the
    /// correct password. Constant time.
    pub fn verify_signature(&self, dk: &DerivedKeyMaterial) -> bool {
        let expected = tag(dk.mac_key(), &self.bytes[..SIGNATURE_OFFSET]);
        expected[..].ct_eq(&self.bytes[SIGNATURE_OFFSET..]).into()
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.bytes
    }

    fn field<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[offset..offset + N]);
        out
    }
}

impl std::fmt::Debug for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Header")
            .field("log_n", &self.log_n())
            .field("r", &self.r())
            .field("p", &self.p())
            .field("salt", &hex::encode(self.salt()))
            .finish()
    }
}

fn checksum(bytes: &[u8; HEADER_LEN]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(&bytes[..CHECKSUM_OFFSET]);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}
