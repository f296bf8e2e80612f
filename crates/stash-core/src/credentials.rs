//! Password salting and hashing.
//!
//! The record store only ever sees the [`PasswordHasher`] trait: a salt
//! generator and a deterministic `hash(raw, salt) -> digest` function. Both salts
//! and digests travel as base64 strings so they can sit in the JSON snapshot
//! unchanged.
//!
//! [`ScryptHasher`] is the production implementation.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::TryRngCore;
use rand::rngs::OsRng;
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

/// Length of a freshly generated salt, in bytes (before base64 encoding).
pub const SALT_LEN: usize = 24;

/// Length of a derived digest, in bytes (before base64 encoding).
pub const DIGEST_LEN: usize = 32;

/// Default scrypt cost parameter (N = 2^14 = 16384).
pub const DEFAULT_LOG_N: u8 = 14;

/// Default scrypt block size.
pub const DEFAULT_BLOCK_SIZE: u32 = 8;

/// Default scrypt parallelization parameter.
pub const DEFAULT_PARALLELISM: u32 = 1;

/// Errors from salt generation or password hashing.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// The operating system RNG could not supply entropy.
    #[error("insufficient entropy while creating salt: {0}")]
    Entropy(String),

    /// The stored salt is not valid base64.
    #[error("invalid salt encoding: {0}")]
    InvalidSalt(#[from] base64::DecodeError),

    /// The scrypt parameters were rejected.
    #[error("invalid scrypt parameters: {0}")]
    InvalidParams(String),

    /// Key derivation itself failed.
    #[error("password hashing failed: {0}")]
    Derivation(String),
}

/// Derives salted password digests.
///
/// Implementations must be deterministic: the same raw password and salt always
/// produce the same digest.
pub trait PasswordHasher: Send + Sync + fmt::Debug {
    /// Generate a fresh random salt.
    fn derive_salt(&self) -> Result<String, CredentialError>;

    /// Hash `raw` with `salt`.
    fn hash(&self, raw: &str, salt: &str) -> Result<String, CredentialError>;

    /// Check `raw` against a stored digest in constant time.
    ///
    /// Hashing failures count as a mismatch.
    fn verify(&self, raw: &str, salt: &str, digest: &str) -> bool {
        match self.hash(raw, salt) {
            Ok(candidate) => candidate.as_bytes().ct_eq(digest.as_bytes()).into(),
            Err(e) => {
                tracing::debug!(error = %e, "Password hashing failed during verification");
                false
            }
        }
    }
}

/// Scrypt-based [`PasswordHasher`].
///
/// Salts are 24 random bytes from the OS RNG; digests are 32-byte scrypt outputs.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ScryptHasher {
    log_n: u8,
    r: u32,
    p: u32,
}

impl fmt::Debug for ScryptHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScryptHasher(N=2^{}, r={}, p={})", self.log_n, self.r, self.p)
    }
}

impl Default for ScryptHasher {
    fn default() -> Self {
        Self {
            log_n: DEFAULT_LOG_N,
            r: DEFAULT_BLOCK_SIZE,
            p: DEFAULT_PARALLELISM,
        }
    }
}

impl ScryptHasher {
    /// Create a hasher with a custom cost parameter (N = 2^`log_n`).
    ///
    /// Low costs are only meant for tests; digests produced with different
    /// costs are not interchangeable.
    pub fn with_cost(log_n: u8) -> Self {
        Self {
            log_n,
            ..Self::default()
        }
    }

    /// The scrypt cost parameter as log2(N).
    pub fn log_n(&self) -> u8 {
        self.log_n
    }
}

impl PasswordHasher for ScryptHasher {
    fn derive_salt(&self) -> Result<String, CredentialError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|e| CredentialError::Entropy(e.to_string()))?;
        Ok(STANDARD.encode(salt))
    }

    fn hash(&self, raw: &str, salt: &str) -> Result<String, CredentialError> {
        let salt = STANDARD.decode(salt)?;
        let params = scrypt::Params::new(self.log_n, self.r, self.p, DIGEST_LEN)
            .map_err(|e| CredentialError::InvalidParams(e.to_string()))?;

        let mut digest = Zeroizing::new([0u8; DIGEST_LEN]);
        scrypt::scrypt(raw.as_bytes(), &salt, &params, digest.as_mut())
            .map_err(|e| CredentialError::Derivation(e.to_string()))?;

        Ok(STANDARD.encode(digest.as_ref()))
    }
}
