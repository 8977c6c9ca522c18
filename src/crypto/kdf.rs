use std::fmt;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use super::{KEY_LEN, SALT_LEN};
use crate::error::{Error, Result};
use crate::params::{CostParameters, memlimit};

#[cfg(test)]
thread_local! {
    /// Number of scrypt derivations started on this thread.
    pub(crate) static DERIVATIONS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// 64 bytes of scrypt output: a cipher key followed by a MAC key.
///
/// Zeroized on drop.
pub struct DerivedKeyMaterial {
    keys: [[u8; KEY_LEN]; 2],
}

impl DerivedKeyMaterial {
    /// AES-256 key for the payload cipher.
    pub fn cipher_key(&self) -> &[u8; KEY_LEN] {
        &self.keys[0]
    }

    /// HMAC-SHA-256 key for the header signature and payload tag.
    pub fn mac_key(&self) -> &[u8; KEY_LEN] {
        &self.keys[1]
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.keys.as_flattened()
    }
}

impl Drop for DerivedKeyMaterial {
    fn drop(&mut self) {
        self.keys.as_flattened_mut().zeroize();
    }
}

impl fmt::Debug for DerivedKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeyMaterial")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

fn scrypt_params(params: &CostParameters) -> Result<scrypt::Params> {
    if u32::from(params.log_n()) >= usize::BITS {
        return Err(Error::InvalidCostParameters(format!(
            "N = 2^{} does not fit in a machine word",
            params.log_n()
        )));
    }
    scrypt::Params::new(
        params.log_n(),
        params.r(),
        params.p(),
        scrypt::Params::RECOMMENDED_LEN,
    )
    .map_err(|e| Error::InvalidCostParameters(e.to_string()))
}

// scrypt allocates 128·r·N bytes for V, 128·r·p for B and 256·r for XY.
// Failing that allocation aborts the process, so refuse up front.
fn check_resources(params: &CostParameters) -> Result<()> {
    let r = u64::from(params.r());
    let needed = params
        .memory_required()
        .saturating_add(128u64.saturating_mul(r).saturating_mul(u64::from(params.p())))
        .saturating_add(256u64.saturating_mul(r));
    let limit = memlimit::memory_limit()
        .unwrap_or(u64::MAX)
        .min(isize::MAX as u64);
    if needed > limit {
        warn!(needed, limit, "scrypt parameters exceed platform memory");
        return Err(Error::Derivation);
    }
    Ok(())
}

/// Runs scrypt over `password` and `salt`, filling `output`.
///
/// # Errors
///
/// [`Error::InvalidCostParameters`] if scrypt rejects the parameters on this
/// platform, [`Error::Derivation`] if the output length is unusable or the
/// parameters need more memory than the platform has.
pub fn derive(
    password: &[u8],
    salt: &[u8],
    params: &CostParameters,
    output: &mut [u8],
) -> Result<()> {
    let scrypt_params = scrypt_params(params)?;
    check_resources(params)?;

    #[cfg(test)]
    DERIVATIONS.with(|count| count.set(count.get() + 1));

    debug!(
        log_n = params.log_n(),
        r = params.r(),
        p = params.p(),
        len = output.len(),
        "deriving scrypt key"
    );
    scrypt::scrypt(password, salt, &scrypt_params, output).map_err(|_| Error::Derivation)
}

/// Derives the 64-byte cipher/MAC key material for a header.
pub fn derive_key_material(
    password: &[u8],
    salt: &[u8; SALT_LEN],
    params: &CostParameters,
) -> Result<DerivedKeyMaterial> {
    let mut dk = DerivedKeyMaterial {
        keys: [[0u8; KEY_LEN]; 2],
    };
    derive(password, salt, params, dk.keys.as_flattened_mut())?;
    Ok(dk)
}

/// Raw scrypt hash of arbitrary length.
pub fn hash(
    password: &[u8],
    salt: &[u8],
    params: &CostParameters,
    len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let mut out = Zeroizing::new(vec![0u8; len]);
    derive(password, salt, params, &mut out)?;
    Ok(out)
}

/// A key derivation running on a worker thread.
///
/// Dropping the task detaches the thread; its result is discarded when the
/// derivation completes.
pub struct DerivationTask {
    handle: JoinHandle<Result<DerivedKeyMaterial>>,
}

impl DerivationTask {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Blocks until the derivation completes.
    pub fn join(self) -> Result<DerivedKeyMaterial> {
        self.handle.join().map_err(|_| Error::Derivation)?
    }
}

/// Starts [`derive_key_material`] on a dedicated thread.
pub fn spawn_derive(
    password: Zeroizing<Vec<u8>>,
    salt: [u8; SALT_LEN],
    params: CostParameters,
) -> DerivationTask {
    let handle = thread::spawn(move || derive_key_material(&password, &salt, &params));
    DerivationTask { handle }
}
