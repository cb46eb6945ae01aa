//! WireGuard key material
//!
//! Public keys double as node identities; private and preshared keys
//! never leave the process except on stdin to the `wg` tool.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::StaticSecret;

use crate::error::{Error, Result};

/// Length of every WireGuard key in bytes
pub const KEY_LEN: usize = 32;

fn decode_key(s: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = BASE64
        .decode(s.trim())
        .map_err(|e| Error::InvalidKey(format!("bad base64: {}", e)))?;
    if bytes.len() != KEY_LEN {
        return Err(Error::InvalidKey(format!(
            "invalid key length: {} (expected {})",
            bytes.len(),
            KEY_LEN
        )));
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes);
    Ok(key)
}

macro_rules! key_type {
    ($name:ident) => {
        impl $name {
            /// Build from raw key bytes
            pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }

            /// Raw key bytes
            pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
                &self.0
            }

            /// Standard base64 form used by WireGuard tooling
            pub fn to_base64(&self) -> String {
                BASE64.encode(self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                decode_key(s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_base64())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// A node's public key, its identity in the mesh
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; KEY_LEN]);

key_type!(PublicKey);

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

/// This node's X25519 private key
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey([u8; KEY_LEN]);

key_type!(PrivateKey);

impl PrivateKey {
    /// Generate a new clamped private key from the OS RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        // Curve25519 clamping, same as `wg genkey`
        bytes[0] &= 248;
        bytes[31] &= 127;
        bytes[31] |= 64;
        Self(bytes)
    }

    /// Load a private key from a file (base64 encoded, surrounding whitespace ignored)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// Derive the matching public key
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(*x25519_dalek::PublicKey::from(&secret).as_bytes())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Symmetric secret mixed into the handshake of every mesh peer
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PresharedKey([u8; KEY_LEN]);

key_type!(PresharedKey);

impl PresharedKey {
    /// Generate a random preshared key, same as `wg genpsk`
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// An all-zero key is how the kernel reports "no preshared key"
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for PresharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PresharedKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_public_key_derivation_matches_x25519() {
        let private = PrivateKey::generate();
        let secret = StaticSecret::from(*private.as_bytes());
        let expected = x25519_dalek::PublicKey::from(&secret);
        assert_eq!(private.public_key().as_bytes(), expected.as_bytes());
    }

    #[test]
    fn test_generated_keys_are_clamped_and_unique() {
        let a = PrivateKey::generate();
        let b = PrivateKey::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_bytes()[0] & 7, 0);
        assert_eq!(a.as_bytes()[31] & 0xc0, 0x40);
    }

    #[test]
    fn test_parse_base64() {
        let key = PublicKey::from_bytes([7u8; KEY_LEN]);
        let text = key.to_base64();
        assert_eq!(text.len(), 44);
        assert_eq!(text.parse::<PublicKey>().unwrap(), key);
        assert_eq!(format!(" {}\n", text).parse::<PublicKey>().unwrap(), key);
    }

    #[test]
    fn test_parse_rejects_bad_keys() {
        assert!(matches!("not base64!".parse::<PublicKey>(), Err(Error::InvalidKey(_))));
        let short = BASE64.encode([1u8; 16]);
        assert!(matches!(short.parse::<PresharedKey>(), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let private = PrivateKey::generate();
        let printed = format!("{:?}", private);
        assert!(!printed.contains(&private.to_base64()));
        assert!(!format!("{:?}", PresharedKey::generate()).contains('='));
    }

    #[test]
    fn test_serde_as_base64_string() {
        let key = PublicKey::from_bytes([9u8; KEY_LEN]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key.to_base64()));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_private_key_from_file() {
        let private = PrivateKey::generate();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", private.to_base64()).unwrap();
        let loaded = PrivateKey::from_file(file.path()).unwrap();
        assert_eq!(loaded, private);
    }

    #[test]
    fn test_zero_preshared_key() {
        assert!(PresharedKey::from_bytes([0u8; KEY_LEN]).is_zero());
        assert!(!PresharedKey::generate().is_zero());
    }
}
