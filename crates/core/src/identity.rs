//! Destination identifiers and public identities.
//!
//! Destination hashes are 16 bytes. Textual forms may carry the decorative
//! `<`, `>` and `:` characters used by pretty-printed hashes; they are
//! stripped before hex decoding.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::Error;

/// Length in bytes of a destination identifier.
pub const NODE_ID_LEN: usize = 16;

/// Length in bytes of the aspect name hash mixed into derived destinations.
const NAME_HASH_LEN: usize = 10;

/// Fixed-length destination identifier of a remote node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    pub const fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Build an identifier from a raw byte slice of exactly [`NODE_ID_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let fixed: [u8; NODE_ID_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidDestination(format!("expected {NODE_ID_LEN} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(fixed))
    }

    /// Parse a textual identifier, ignoring `<`, `>` and `:` decorations.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let cleaned: String = input.trim().chars().filter(|c| !matches!(c, '<' | '>' | ':')).collect();
        if cleaned.is_empty() {
            return Err(Error::InvalidDestination("empty destination".into()));
        }

        let bytes = hex::decode(&cleaned).map_err(|e| Error::InvalidDestination(format!("{input}: {e}")))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, used in log lines and synthetic names.
    pub fn short_hex(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId(<{}>)", self.to_hex())
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        NodeId::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Public identity of a network endpoint.
///
/// The identity hash is the truncated SHA-256 of the public key.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    hash: [u8; NODE_ID_LEN],
    public_key: Vec<u8>,
}

impl Identity {
    pub fn from_public_key(public_key: impl Into<Vec<u8>>) -> Self {
        let public_key = public_key.into();
        let digest = Sha256::digest(&public_key);
        let mut hash = [0u8; NODE_ID_LEN];
        hash.copy_from_slice(&digest[..NODE_ID_LEN]);
        Self { hash, public_key }
    }

    pub fn hash(&self) -> &[u8; NODE_ID_LEN] {
        &self.hash
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Derive the destination this identity owns under `app_name.aspect...`.
    ///
    /// `SHA-256(SHA-256(name)[..10] || identity_hash)[..16]`
    pub fn destination_hash(&self, app_name: &str, aspects: &[&str]) -> NodeId {
        let mut name = app_name.to_string();
        for aspect in aspects {
            name.push('.');
            name.push_str(aspect);
        }

        let name_hash = Sha256::digest(name.as_bytes());
        let mut hasher = Sha256::new();
        hasher.update(&name_hash[..NAME_HASH_LEN]);
        hasher.update(self.hash);
        let digest = hasher.finalize();

        let mut id = [0u8; NODE_ID_LEN];
        id.copy_from_slice(&digest[..NODE_ID_LEN]);
        NodeId(id)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity(<{}>)", hex::encode(self.hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "00112233445566778899aabbccddeeff";

    #[test]
    fn test_parse_plain_hex() {
        let id = NodeId::parse(HEX).unwrap();
        assert_eq!(id.to_hex(), HEX);
        assert_eq!(id.as_bytes()[0], 0x00);
        assert_eq!(id.as_bytes()[15], 0xff);
    }

    #[test]
    fn test_parse_strips_decorations() {
        let id = NodeId::parse("<00:11:22:33:44:55:66:77:88:99:aa:bb:cc:dd:ee:ff>").unwrap();
        assert_eq!(id.to_hex(), HEX);
    }

    #[test]
    fn test_parse_uppercase() {
        let id = NodeId::parse(&HEX.to_uppercase()).unwrap();
        assert_eq!(id.to_string(), HEX);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(matches!(NodeId::parse("0011"), Err(Error::InvalidDestination(_))));
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        assert!(matches!(NodeId::parse("zz112233445566778899aabbccddeeff"), Err(Error::InvalidDestination(_))));
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(NodeId::parse("<>"), Err(Error::InvalidDestination(_))));
    }

    #[test]
    fn test_short_hex() {
        let id = NodeId::parse(HEX).unwrap();
        assert_eq!(id.short_hex(), "00112233");
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = NodeId::parse(HEX).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{HEX}\""));
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_identity_hash_stability() {
        let a = Identity::from_public_key(vec![1, 2, 3]);
        let b = Identity::from_public_key(vec![1, 2, 3]);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), Identity::from_public_key(vec![3, 2, 1]).hash());
    }

    #[test]
    fn test_destination_hash_depends_on_aspects() {
        let identity = Identity::from_public_key(vec![7; 64]);
        let delivery = identity.destination_hash("lxmf", &["delivery"]);
        let node = identity.destination_hash("nomadnetwork", &["node"]);
        assert_ne!(delivery, node);
        assert_eq!(delivery, identity.destination_hash("lxmf", &["delivery"]));
    }
}
