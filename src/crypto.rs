//! src/crypto.rs
//!
//! Node identity and signing. Unlike the gossip datagrams (best-effort UDP,
//! unsigned per the wire format), this identity is used to sign `Task`
//! submissions routed through the leader and to authenticate the server side
//! of a `RegisterAck` for audit logging, so an operator can later prove which
//! node produced a given completed task.

use crate::error::{Error, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;

/// The cryptographic identity of a single node.
#[derive(Debug)]
pub struct Identity {
    keypair: SigningKey,
    pub node_id: String,
}

impl Identity {
    /// Generates a new, random identity.
    pub fn new() -> Self {
        let mut csprng = OsRng;
        let mut secret_key_bytes = [0u8; 32];
        csprng.fill_bytes(&mut secret_key_bytes);
        let keypair = SigningKey::from_bytes(&secret_key_bytes);
        let node_id = hex::encode(keypair.verifying_key().to_bytes());
        Self { keypair, node_id }
    }

    /// Loads an identity from a file, or creates a new one if the file doesn't exist.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        match fs::read(path.as_ref()) {
            Ok(bytes) => {
                let keypair_bytes: [u8; 32] =
                    bytes.try_into().map_err(|_| Error::InvalidKeyFile)?;
                let keypair = SigningKey::from_bytes(&keypair_bytes);
                let node_id = hex::encode(keypair.verifying_key().to_bytes());
                Ok(Self { keypair, node_id })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let identity = Self::new();
                fs::write(path.as_ref(), identity.keypair.to_bytes())?;
                Ok(identity)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.keypair.verifying_key()
    }

    /// Signs an arbitrary serializable payload, returning the canonical bytes
    /// that were signed and the signature over them.
    pub fn sign<T: Serialize>(&self, payload: &T) -> Result<(Vec<u8>, Signature)> {
        let bytes = bincode::serialize(payload)?;
        let sig = self.keypair.sign(&bytes);
        Ok((bytes, sig))
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

/// Verifies that `signature` over `bytes` was produced by `public_key`.
pub fn verify(public_key: &VerifyingKey, bytes: &[u8], signature: &Signature) -> Result<()> {
    public_key
        .verify(bytes, signature)
        .map_err(Error::Crypto)
}
