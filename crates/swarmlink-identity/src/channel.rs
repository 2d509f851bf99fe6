//! EncryptionChannel — X25519 key agreement + AES-256-GCM payload encryption.
//!
//! The channel derives a 32-byte symmetric key from the local exchange
//! private key and a peer's exchange public key (Diffie-Hellman followed by
//! SHA-256), then seals payloads with AES-256-GCM. The wire form of a sealed
//! payload is `nonce(12) ‖ tag(16) ‖ ciphertext`.
//!
//! Derivation is symmetric: both peers compute an identical key from their
//! own private key and the other's public key. The secret is recomputed per
//! operation and never cached across peer key rotation.

use crate::error::CryptoError;
use crate::store::IdentityStore;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use x25519_dalek::{PublicKey as ExchangePublic, StaticSecret};
use zeroize::Zeroizing;

/// Nonce length in bytes (AES-GCM standard).
pub const NONCE_LEN: usize = 12;

/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// An authenticated-encrypted payload.
///
/// Wire layout: `nonce ‖ tag ‖ ciphertext`. The nonce is random per message
/// and must never repeat under the same key; decryption fails closed when
/// the tag does not verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// Random per-message nonce.
    pub nonce: [u8; NONCE_LEN],
    /// GCM authentication tag.
    pub tag: [u8; TAG_LEN],
    /// The encrypted payload.
    pub ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Concatenate into the wire form `nonce ‖ tag ‖ ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse the wire form. Fails on inputs shorter than nonce + tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Malformed {
                len: bytes.len(),
                min: NONCE_LEN + TAG_LEN,
            });
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[..NONCE_LEN]);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&bytes[NONCE_LEN..NONCE_LEN + TAG_LEN]);
        Ok(Self {
            nonce,
            tag,
            ciphertext: bytes[NONCE_LEN + TAG_LEN..].to_vec(),
        })
    }
}

/// Derive the shared symmetric key for a peer.
///
/// X25519 Diffie-Hellman over the two exchange keys, then SHA-256 to
/// produce a uniform 32-byte key. Deterministic given the inputs, and
/// identical regardless of which side computes it.
pub fn derive_shared_secret(
    own_exchange_private: &StaticSecret,
    peer_exchange_public: &[u8; 32],
) -> Zeroizing<[u8; 32]> {
    let peer = ExchangePublic::from(*peer_exchange_public);
    let shared = own_exchange_private.diffie_hellman(&peer);
    let digest = Sha256::digest(shared.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&digest);
    key
}

/// Encrypt a payload under a derived 32-byte key.
///
/// A fresh random nonce is generated per call.
pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<EncryptedEnvelope, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    // aes-gcm appends the tag to the ciphertext; split it back out so the
    // envelope carries the spec'd nonce ‖ tag ‖ ciphertext layout.
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encrypt)?;
    let split = sealed.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&sealed[split..]);
    sealed.truncate(split);

    Ok(EncryptedEnvelope {
        nonce,
        tag,
        ciphertext: sealed,
    })
}

/// Decrypt an envelope under a derived 32-byte key.
///
/// Fails with [`CryptoError::Decrypt`] if the tag does not verify. There is
/// no partial result and no retry: a failed decryption is terminal for that
/// message.
pub fn decrypt(envelope: &EncryptedEnvelope, key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut sealed = Vec::with_capacity(envelope.ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(&envelope.ciphertext);
    sealed.extend_from_slice(&envelope.tag);
    cipher
        .decrypt(Nonce::from_slice(&envelope.nonce), sealed.as_slice())
        .map_err(|_| CryptoError::Decrypt)
}

/// A secure channel bound to one agent's identity.
///
/// Holds a reference to the [`IdentityStore`] for key agreement and
/// signatures; it stores no long-term secrets of its own.
#[derive(Debug, Clone)]
pub struct EncryptionChannel {
    store: Arc<IdentityStore>,
}

impl EncryptionChannel {
    /// Create a channel over an existing identity.
    pub fn new(store: Arc<IdentityStore>) -> Self {
        Self { store }
    }

    /// Derive the shared key for a peer's exchange public key.
    pub fn shared_secret(&self, peer_exchange_public: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        derive_shared_secret(self.store.exchange_secret(), peer_exchange_public)
    }

    /// Encrypt a payload for a peer (derive + encrypt).
    pub fn encrypt_for_peer(
        &self,
        plaintext: &[u8],
        peer_exchange_public: &[u8; 32],
    ) -> Result<EncryptedEnvelope, CryptoError> {
        let key = self.shared_secret(peer_exchange_public);
        encrypt(plaintext, &key)
    }

    /// Decrypt an envelope from a peer (derive + decrypt).
    pub fn decrypt_from_peer(
        &self,
        envelope: &EncryptedEnvelope,
        peer_exchange_public: &[u8; 32],
    ) -> Result<Vec<u8>, CryptoError> {
        let key = self.shared_secret(peer_exchange_public);
        decrypt(envelope, &key)
    }

    /// Sign an arbitrary payload with the identity's signing key.
    pub fn sign_payload(&self, payload: &[u8]) -> [u8; 64] {
        self.store.sign(payload)
    }

    /// Verify a payload signature against a peer's signing public key.
    pub fn verify_payload(
        &self,
        payload: &[u8],
        signature: &[u8],
        peer_signing_public: &[u8; 32],
    ) -> bool {
        self.store.verify_from(payload, signature, peer_signing_public)
    }
}
