//! IdentityStore — per-agent keypair generation, persistence, and signatures.
//!
//! On-disk layout under the identity directory (mode 0700):
//!
//! - `signing.key` / `signing.pub` — raw 32-byte Ed25519 seed / public key
//! - `exchange.key` / `exchange.pub` — raw 32-byte X25519 private / public key
//! - `identity.json` — manifest recording agent id, key type, and version
//!
//! Private key files are written with owner-only (0600) permissions on Unix.
//! Private material never leaves the owning process except through the
//! explicit, audited [`IdentityStore::export_private`] call.

use crate::error::IdentityError;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use x25519_dalek::{PublicKey as ExchangePublic, StaticSecret};
use zeroize::Zeroizing;

const SIGNING_KEY_FILE: &str = "signing.key";
const SIGNING_PUB_FILE: &str = "signing.pub";
const EXCHANGE_KEY_FILE: &str = "exchange.key";
const EXCHANGE_PUB_FILE: &str = "exchange.pub";
const MANIFEST_FILE: &str = "identity.json";

/// Key scheme identifier recorded in the manifest.
pub const KEY_TYPE: &str = "ed25519+x25519";

/// Current identity manifest version.
pub const IDENTITY_VERSION: u32 = 1;

/// SECURITY: Restrict file permissions to owner-only (0600) on Unix.
#[cfg(unix)]
fn restrict_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_file_permissions(_path: &Path) {}

/// SECURITY: Restrict directory permissions to owner-only (0700) on Unix.
#[cfg(unix)]
fn restrict_dir_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_path: &Path) {}

/// Manifest persisted alongside the key files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityManifest {
    /// The owning agent's stable identifier.
    pub agent_id: String,
    /// Key scheme, currently always `"ed25519+x25519"`.
    pub key_type: String,
    /// Manifest format version.
    pub version: u32,
    /// When the identity was generated.
    pub created_at: DateTime<Utc>,
}

/// Raw private key material returned by [`IdentityStore::export_private`].
///
/// Both fields are zeroized on drop.
pub struct PrivateKeyExport {
    /// The Ed25519 signing seed.
    pub signing_seed: Zeroizing<[u8; 32]>,
    /// The X25519 exchange private key.
    pub exchange_secret: Zeroizing<[u8; 32]>,
}

/// A single agent's cryptographic identity.
///
/// Exactly one identity exists per agent id. Regenerating an identity
/// invalidates every shared secret previously derived from it and makes
/// old signatures unverifiable against the new keys.
pub struct IdentityStore {
    agent_id: String,
    dir: PathBuf,
    signing: SigningKey,
    exchange: StaticSecret,
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore")
            .field("agent_id", &self.agent_id)
            .field("dir", &self.dir)
            .field("signing_public", &self.signing_public_hex())
            .field("exchange_public", &self.exchange_public_hex())
            .finish()
    }
}

impl IdentityStore {
    /// True iff both private key files exist under `dir`.
    pub fn has_identity(dir: &Path) -> bool {
        dir.join(SIGNING_KEY_FILE).exists() && dir.join(EXCHANGE_KEY_FILE).exists()
    }

    /// Generate a fresh identity and persist it under `dir`.
    ///
    /// Fails with [`IdentityError::Storage`] if the directory cannot be
    /// created or written.
    pub fn generate(agent_id: impl Into<String>, dir: impl Into<PathBuf>) -> Result<Self, IdentityError> {
        let agent_id = agent_id.into();
        let dir = dir.into();

        std::fs::create_dir_all(&dir)?;
        restrict_dir_permissions(&dir);

        let signing = SigningKey::generate(&mut OsRng);
        let exchange = StaticSecret::random_from_rng(OsRng);

        let store = Self {
            agent_id,
            dir,
            signing,
            exchange,
        };
        store.persist()?;

        info!(agent_id = %store.agent_id, dir = %store.dir.display(), "Generated new identity");
        Ok(store)
    }

    /// Load an existing identity from `dir`.
    pub fn load(agent_id: impl Into<String>, dir: impl Into<PathBuf>) -> Result<Self, IdentityError> {
        let agent_id = agent_id.into();
        let dir = dir.into();

        if !Self::has_identity(&dir) {
            return Err(IdentityError::NotFound(agent_id));
        }

        let signing_seed = read_key_file(&dir.join(SIGNING_KEY_FILE))?;
        let exchange_secret = read_key_file(&dir.join(EXCHANGE_KEY_FILE))?;

        Ok(Self {
            agent_id,
            dir,
            signing: SigningKey::from_bytes(&signing_seed),
            exchange: StaticSecret::from(*exchange_secret),
        })
    }

    /// Load the identity if present, otherwise generate and persist one.
    pub fn load_or_generate(
        agent_id: impl Into<String>,
        dir: impl Into<PathBuf>,
    ) -> Result<Self, IdentityError> {
        let agent_id = agent_id.into();
        let dir = dir.into();
        if Self::has_identity(&dir) {
            Self::load(agent_id, dir)
        } else {
            Self::generate(agent_id, dir)
        }
    }

    /// Delete the on-disk key material and generate a fresh identity in place.
    ///
    /// All shared secrets previously derived from the old exchange key become
    /// unusable, and old signatures no longer verify against this identity.
    pub fn regenerate(&mut self) -> Result<(), IdentityError> {
        for file in [
            SIGNING_KEY_FILE,
            SIGNING_PUB_FILE,
            EXCHANGE_KEY_FILE,
            EXCHANGE_PUB_FILE,
            MANIFEST_FILE,
        ] {
            let path = self.dir.join(file);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }

        self.signing = SigningKey::generate(&mut OsRng);
        self.exchange = StaticSecret::random_from_rng(OsRng);
        self.persist()?;

        warn!(agent_id = %self.agent_id, "Identity regenerated; previously derived shared secrets are now invalid");
        Ok(())
    }

    /// The owning agent's identifier.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Read the persisted manifest.
    pub fn manifest(&self) -> Result<IdentityManifest, IdentityError> {
        let raw = std::fs::read_to_string(self.dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Sign a message with the Ed25519 signing key.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }

    /// Verify a signature made by this identity's signing key.
    ///
    /// Never errors: tampering, a malformed signature, or a wrong key all
    /// return `false`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        verify_with(&self.signing.verifying_key().to_bytes(), message, signature)
    }

    /// Verify a signature against a peer's signing public key.
    pub fn verify_from(&self, message: &[u8], signature: &[u8], peer_signing_public: &[u8; 32]) -> bool {
        verify_with(peer_signing_public, message, signature)
    }

    /// The Ed25519 public key as raw bytes.
    pub fn signing_public(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    /// The X25519 public key as raw bytes.
    pub fn exchange_public(&self) -> [u8; 32] {
        ExchangePublic::from(&self.exchange).to_bytes()
    }

    /// The Ed25519 public key as a lowercase hex string.
    pub fn signing_public_hex(&self) -> String {
        hex::encode(self.signing_public())
    }

    /// The X25519 public key as a lowercase hex string.
    pub fn exchange_public_hex(&self) -> String {
        hex::encode(self.exchange_public())
    }

    /// The Ed25519 public key as a PEM-style text block.
    pub fn signing_public_pem(&self) -> String {
        pem_block("SWARMLINK ED25519 PUBLIC KEY", &self.signing_public())
    }

    /// The X25519 public key as a PEM-style text block.
    pub fn exchange_public_pem(&self) -> String {
        pem_block("SWARMLINK X25519 PUBLIC KEY", &self.exchange_public())
    }

    /// Export the raw private key material.
    ///
    /// This is an explicit, audited operation: every call emits a warning
    /// log line naming the agent.
    pub fn export_private(&self) -> PrivateKeyExport {
        warn!(agent_id = %self.agent_id, "AUDIT: private key material exported");
        PrivateKeyExport {
            signing_seed: Zeroizing::new(self.signing.to_bytes()),
            exchange_secret: Zeroizing::new(self.exchange.to_bytes()),
        }
    }

    /// The X25519 private key, for shared-secret derivation within this crate.
    pub(crate) fn exchange_secret(&self) -> &StaticSecret {
        &self.exchange
    }

    fn persist(&self) -> Result<(), IdentityError> {
        write_private_file(&self.dir.join(SIGNING_KEY_FILE), &self.signing.to_bytes())?;
        write_private_file(&self.dir.join(EXCHANGE_KEY_FILE), &self.exchange.to_bytes())?;
        std::fs::write(self.dir.join(SIGNING_PUB_FILE), self.signing_public())?;
        std::fs::write(self.dir.join(EXCHANGE_PUB_FILE), self.exchange_public())?;

        let manifest = IdentityManifest {
            agent_id: self.agent_id.clone(),
            key_type: KEY_TYPE.to_string(),
            version: IDENTITY_VERSION,
            created_at: Utc::now(),
        };
        std::fs::write(
            self.dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;
        Ok(())
    }
}

fn write_private_file(path: &Path, bytes: &[u8]) -> Result<(), IdentityError> {
    std::fs::write(path, bytes)?;
    restrict_file_permissions(path);
    Ok(())
}

fn read_key_file(path: &Path) -> Result<Zeroizing<[u8; 32]>, IdentityError> {
    let raw = Zeroizing::new(std::fs::read(path)?);
    let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| IdentityError::InvalidKey {
        file: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        expected: 32,
        found: raw.len(),
    })?;
    Ok(Zeroizing::new(bytes))
}

fn verify_with(public: &[u8; 32], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    key.verify(message, &Signature::from_bytes(&sig_bytes)).is_ok()
}

fn pem_block(label: &str, bytes: &[u8]) -> String {
    use base64::Engine;
    let body = base64::engine::general_purpose::STANDARD.encode(bytes);
    let mut out = format!("-----BEGIN {label}-----\n");
    for chunk in body.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}
