//! Swarmlink identity layer — keys, signatures, and encrypted channels.
//!
//! Every agent owns two independent keypairs: an Ed25519 signing keypair and
//! an X25519 key-exchange keypair. Both are generated once, persisted to disk
//! with owner-only permissions, and loaded on subsequent runs.
//!
//! ## Architecture
//!
//! - **IdentityStore**: Generates/loads keypairs, signs and verifies payloads,
//!   exports public material as raw bytes, hex, or PEM
//! - **EncryptionChannel**: Derives a per-peer shared secret via X25519 and
//!   performs AES-256-GCM authenticated encryption
//! - **EncryptedEnvelope**: Wire form of an encrypted payload
//!   (nonce ‖ tag ‖ ciphertext)

pub mod channel;
pub mod error;
pub mod store;

pub use channel::{derive_shared_secret, EncryptedEnvelope, EncryptionChannel};
pub use error::{CryptoError, IdentityError};
pub use store::{IdentityManifest, IdentityStore, PrivateKeyExport};
