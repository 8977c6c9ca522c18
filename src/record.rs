//! Password verification records.
//!
//! A record is a bare 96-byte header: it stores the cost parameters and salt,
//! and its signature can only be reproduced with the right password.

use tracing::{debug, warn};

use crate::crypto::{self, DerivedKeyMaterial, Header, SALT_LEN};
use crate::error::{Error, Result};
use crate::params::{Budget, CostParameters, CostPolicy};

/// A sealed 96-byte verification record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRecord {
    header: Header,
}

impl VerificationRecord {
    pub const LEN: usize = Header::LEN;

    /// Parses a stored record and checks its checksum.
    ///
    /// # Errors
    ///
    /// Fails on wrong magic, an unsupported version, a length other than 96
    /// bytes or a checksum mismatch.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = Header::parse(data)?;
        if data.len() != Self::LEN {
            return Err(Error::FormatMismatch);
        }
        Ok(Self { header })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn as_bytes(&self) -> &[u8; Header::LEN] {
        self.header.as_bytes()
    }

    pub fn params(&self) -> Result<CostParameters> {
        self.header.params()
    }

    /// `true` if `password` is the one the record was built from.
    ///
    /// # Errors
    ///
    /// Only for invalid stored parameters or a failed derivation; a wrong
    /// password is `Ok(false)`.
    pub fn verify(&self, password: &[u8]) -> Result<bool> {
        match open_header(&self.header, password, None) {
            Ok(_) => Ok(true),
            Err(Error::IncorrectPassword) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Derives fresh key material for `password` and seals a new header.
pub(crate) fn seal_header(
    password: &[u8],
    params: &CostParameters,
    salt: &[u8; SALT_LEN],
) -> Result<(Header, DerivedKeyMaterial)> {
    let dk = crypto::derive_key_material(password, salt, params)?;
    let header = Header::seal(params, salt, &dk);
    Ok((header, dk))
}

/// Re-derives the key material for a parsed header and checks the password.
///
/// With a budget, the stored parameters must fit in it before any work is
/// done.
pub(crate) fn open_header(
    header: &Header,
    password: &[u8],
    budget: Option<&Budget>,
) -> Result<DerivedKeyMaterial> {
    let params = header.params()?;
    if let Some(budget) = budget {
        budget.check(&params)?;
    }

    let dk = crypto::derive_key_material(password, &header.salt(), &params)?;
    if !header.verify_signature(&dk) {
        warn!("header signature mismatch");
        return Err(Error::IncorrectPassword);
    }
    Ok(dk)
}

/// Builds a record for `password` with explicit parameters.
pub fn build_with_params(
    password: &[u8],
    params: &CostParameters,
) -> Result<(VerificationRecord, DerivedKeyMaterial)> {
    let salt = crypto::generate_salt()?;
    let (header, dk) = seal_header(password, params, &salt)?;
    debug!(log_n = params.log_n(), r = params.r(), p = params.p(), "built verification record");
    Ok((VerificationRecord { header }, dk))
}

/// Builds a record with parameters chosen for an already measured budget.
pub fn build_with_budget(
    password: &[u8],
    budget: &Budget,
) -> Result<(VerificationRecord, DerivedKeyMaterial)> {
    build_with_params(password, &budget.select())
}

/// Measures the host, picks parameters for `policy` and builds a record.
pub fn build_verification_record(
    password: &[u8],
    policy: &CostPolicy,
) -> Result<(VerificationRecord, DerivedKeyMaterial)> {
    build_with_budget(password, &Budget::measure(policy)?)
}

/// Checks `password` against a stored 96-byte record.
///
/// # Errors
///
/// Malformed records (wrong magic or version, truncated, checksum mismatch,
/// invalid parameters) are errors. A wrong password is `Ok(false)`.
pub fn verify(record: &[u8], password: &[u8]) -> Result<bool> {
    VerificationRecord::from_bytes(record)?.verify(password)
}
