use thiserror::Error;

/// Errors produced while selecting parameters, deriving keys or processing
/// records and containers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to determine the amount of available memory")]
    MemoryQuery,

    #[error("invalid scrypt parameters: {0}")]
    InvalidCostParameters(String),

    #[error("key derivation failed")]
    Derivation,

    #[error("OS random generator unavailable")]
    RandomSource,

    #[error("header checksum mismatch; the data is corrupt")]
    MalformedRecord,

    #[error("decrypting file would take too much memory")]
    ExcessiveMemory,

    #[error("decrypting file would take too much CPU time")]
    ExcessiveTime,

    #[error("input is not valid scrypt-encrypted data")]
    FormatMismatch,

    #[error("unrecognized scrypt format version: {0}")]
    UnsupportedVersion(u8),

    #[error("input is truncated")]
    TruncatedInput,

    #[error("password is incorrect")]
    IncorrectPassword,

    #[error("input is not valid scrypt-encrypted data or has been tampered with")]
    AuthenticationMismatch,

    #[error("unable to read input: {0}")]
    Read(#[source] std::io::Error),

    #[error("unable to write output: {0}")]
    Write(#[source] std::io::Error),
}

impl Error {
    /// Numeric status matching the classic `scrypt` utility's return codes.
    pub fn code(&self) -> i32 {
        match self {
            Error::MemoryQuery => 1,
            Error::Derivation => 3,
            Error::RandomSource => 4,
            Error::InvalidCostParameters(_)
            | Error::MalformedRecord
            | Error::FormatMismatch
            | Error::TruncatedInput
            | Error::AuthenticationMismatch => 7,
            Error::UnsupportedVersion(_) => 8,
            Error::ExcessiveMemory => 9,
            Error::ExcessiveTime => 10,
            Error::IncorrectPassword => 11,
            Error::Write(_) => 12,
            Error::Read(_) => 13,
        }
    }

    /// `true` for failures caused by the supplied password or tampered data
    /// rather than by malformed input or the environment.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Error::IncorrectPassword | Error::AuthenticationMismatch
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
