//! Error types for the identity layer.

use thiserror::Error;

/// Errors from identity generation, persistence, and loading.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Key material could not be read or written.
    #[error("identity storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// A key file existed but did not contain valid key material.
    #[error("invalid key material in {file}: expected {expected} bytes, found {found}")]
    InvalidKey {
        /// The offending file name.
        file: String,
        /// Expected byte length.
        expected: usize,
        /// Actual byte length on disk.
        found: usize,
    },

    /// The identity manifest could not be serialized or parsed.
    #[error("identity manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// No identity exists at the given location.
    #[error("no identity found for agent '{0}'")]
    NotFound(String),
}

/// Errors from encryption, decryption, and envelope parsing.
///
/// A failed decryption is terminal for that message: it cannot become valid
/// on retry, so callers must drop the message rather than requeue it.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("encryption failed")]
    Encrypt,

    /// AEAD tag verification failed; the payload was tampered with or the
    /// wrong key was used. No plaintext is ever returned in this case.
    #[error("decryption failed: authentication tag mismatch")]
    Decrypt,

    /// The envelope bytes are too short to contain a nonce and tag.
    #[error("malformed envelope: {len} bytes is shorter than nonce + tag ({min})")]
    Malformed {
        /// Observed envelope length.
        len: usize,
        /// Minimum valid length.
        min: usize,
    },

    /// A peer public key had the wrong length.
    #[error("invalid peer public key: expected 32 bytes, found {0}")]
    InvalidPeerKey(usize),
}
