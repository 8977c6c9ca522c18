//! Password-based encryption and password verification records built on
//! scrypt, compatible with the classic `scrypt` file format.
//!
//! Cost parameters are picked from a memory and CPU-time budget measured on
//! the running host ([`params`]). The derived 64 bytes are split into an
//! AES-256-CTR key and an HMAC-SHA-256 key ([`crypto`]), used either to sign
//! a bare 96-byte header ([`record`]) or to encrypt and authenticate a payload
//! ([`container`]).
//!
//! ```no_run
//! use scryptenc::{CostPolicy, decrypt_buffer, encrypt_buffer};
//!
//! let container = encrypt_buffer(b"secret", b"password", &CostPolicy::default())?;
//! let plaintext = decrypt_buffer(&container, b"password", &CostPolicy::for_decryption())?;
//! assert_eq!(&plaintext[..], b"secret");
//! # Ok::<(), scryptenc::Error>(())
//! ```

pub mod container;
pub mod crypto;
pub mod error;
pub mod params;
pub mod record;
pub mod storage;

pub use crate::container::{
    Decryptor, Encryptor, Limits, decrypt_buffer, decrypt_buffer_with_budget, decrypt_stream,
    decrypt_stream_with_budget, encrypt_buffer, encrypt_buffer_with_budget,
    encrypt_buffer_with_params, encrypt_stream, encrypt_stream_with_budget,
    encrypt_stream_with_params,
};
pub use crate::crypto::{DerivedKeyMaterial, Header, hash, spawn_derive};
pub use crate::error::{Error, Result};
pub use crate::params::{
    Budget, CostParameters, CostPolicy, pick_parameters, select_parameters, validate_parameters,
};
pub use crate::record::{VerificationRecord, build_verification_record, verify};
pub use crate::storage::AtomicFile;
