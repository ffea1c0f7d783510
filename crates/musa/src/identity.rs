//! # Network Identity
//!
//! The process keypair and the peer id derived from it. Created once at
//! startup, never persisted by the daemon.
//!
//! Key material travels as the libp2p protobuf key encoding wrapped in
//! standard, unpadded base64, the same representation `musa keygen` prints.

use std::fmt;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use libp2p::identity::{DecodingError, Keypair};
use libp2p::PeerId;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::config::Config;

/// Failure to establish the process identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The operating system could not supply key entropy.
    #[error("generate new private key: {0}")]
    Entropy(#[source] rand::Error),

    /// The configured key is not valid unpadded standard base64.
    #[error("decode base64 private key: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The decoded bytes are not a libp2p private key.
    #[error("unmarshal private key: {0}")]
    KeyFormat(#[source] DecodingError),
}

/// Where the identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    Generated,
    Configured,
}

impl fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generated => f.write_str("generated"),
            Self::Configured => f.write_str("configured"),
        }
    }
}

/// A private key and its peer id.
#[derive(Clone)]
pub struct Identity {
    keypair: Keypair,
    peer_id: PeerId,
    source: IdentitySource,
}

impl Identity {
    /// Decode the configured key, or generate a fresh one when none is set.
    pub fn resolve(config: &Config) -> Result<Self, IdentityError> {
        match config.private_key() {
            Some(encoded) => Self::decode(encoded),
            None => Self::generate(),
        }
    }

    /// Generate a fresh ed25519 identity from the OS random source.
    pub fn generate() -> Result<Self, IdentityError> {
        let mut seed = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(IdentityError::Entropy)?;

        // `ed25519_from_bytes` zeroizes the seed it is given.
        let keypair = Keypair::ed25519_from_bytes(seed).map_err(IdentityError::KeyFormat)?;
        Ok(Self::from_keypair(keypair, IdentitySource::Generated))
    }

    /// Decode an unpadded standard base64 protobuf-encoded private key.
    pub fn decode(encoded: &str) -> Result<Self, IdentityError> {
        let bytes = STANDARD_NO_PAD.decode(encoded.trim())?;
        let keypair = Keypair::from_protobuf_encoding(&bytes).map_err(IdentityError::KeyFormat)?;
        Ok(Self::from_keypair(keypair, IdentitySource::Configured))
    }

    /// The private key in the form [`Identity::decode`] accepts.
    pub fn encode(&self) -> Result<String, IdentityError> {
        let bytes = self
            .keypair
            .to_protobuf_encoding()
            .map_err(IdentityError::KeyFormat)?;
        Ok(STANDARD_NO_PAD.encode(bytes))
    }

    fn from_keypair(keypair: Keypair, source: IdentitySource) -> Self {
        let peer_id = keypair.public().to_peer_id();
        Self {
            keypair,
            peer_id,
            source,
        }
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn source(&self) -> IdentitySource {
        self.source
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("peer_id", &self.peer_id)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key(key: &str) -> Config {
        Config {
            private_key: Some(key.to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn test_missing_key_generates_identity() {
        let identity = Identity::resolve(&Config::default()).unwrap();
        assert_eq!(identity.source(), IdentitySource::Generated);
        assert_eq!(identity.keypair().public().to_peer_id(), identity.peer_id());
    }

    #[test]
    fn test_generated_identities_differ() {
        let first = Identity::generate().unwrap();
        let second = Identity::generate().unwrap();
        assert_ne!(first.peer_id(), second.peer_id());
    }

    #[test]
    fn test_decoding_is_deterministic() {
        let encoded = Identity::generate().unwrap().encode().unwrap();

        let first = Identity::resolve(&config_with_key(&encoded)).unwrap();
        let second = Identity::resolve(&config_with_key(&encoded)).unwrap();

        assert_eq!(first.source(), IdentitySource::Configured);
        assert_eq!(first.peer_id(), second.peer_id());
    }

    #[test]
    fn test_encoding_is_unpadded() {
        let encoded = Identity::generate().unwrap().encode().unwrap();
        assert!(!encoded.ends_with('='));
    }

    #[test]
    fn test_round_trip_keeps_peer_id() {
        let original = Identity::generate().unwrap();
        let decoded = Identity::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(original.peer_id(), decoded.peer_id());
    }

    #[test]
    fn test_malformed_base64_is_decode_error() {
        let err = Identity::resolve(&config_with_key("not base64!!")).unwrap_err();
        assert!(matches!(err, IdentityError::Decode(_)), "got {err:?}");
    }

    #[test]
    fn test_padded_base64_is_rejected() {
        let padded = format!("{}=", Identity::generate().unwrap().encode().unwrap());
        let err = Identity::decode(&padded).unwrap_err();
        assert!(matches!(err, IdentityError::Decode(_)), "got {err:?}");
    }

    #[test]
    fn test_malformed_key_bytes_are_key_format_error() {
        let garbage = STANDARD_NO_PAD.encode(b"definitely not a protobuf key");
        let err = Identity::decode(&garbage).unwrap_err();
        assert!(matches!(err, IdentityError::KeyFormat(_)), "got {err:?}");
    }

    #[test]
    fn test_debug_hides_key_material() {
        let identity = Identity::generate().unwrap();
        let encoded = identity.encode().unwrap();
        let debug = format!("{identity:?}");
        assert!(debug.contains(&identity.peer_id().to_string()));
        assert!(!debug.contains(&encoded));
    }
}
