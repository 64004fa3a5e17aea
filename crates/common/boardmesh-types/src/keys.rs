//! Key and signature parsing: `ed25519:<base64-or-hex>` keys and base64
//! signatures, per the wire format in the data model.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH,
    SECRET_KEY_LENGTH,
};
use serde::{Deserialize, Serialize};

use crate::error::BoardError;

const KEY_PREFIX: &str = "ed25519:";

/// Decode the body of a `ed25519:<...>` key string, auto-detecting hex vs.
/// base64 (standard or unpadded "raw").
fn decode_key_body(body: &str) -> Result<Vec<u8>, BoardError> {
    if body.len() % 2 == 0 && body.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex::decode(body) {
            return Ok(bytes);
        }
    }
    if let Ok(bytes) = STANDARD.decode(body) {
        return Ok(bytes);
    }
    if let Ok(bytes) = STANDARD_NO_PAD.decode(body) {
        return Ok(bytes);
    }
    Err(BoardError::InvalidKeyFormat(format!(
        "could not decode key body as hex or base64: {body}"
    )))
}

fn strip_prefix(s: &str) -> Result<&str, BoardError> {
    s.strip_prefix(KEY_PREFIX)
        .ok_or_else(|| BoardError::InvalidKeyFormat(format!("missing '{KEY_PREFIX}' prefix")))
}

/// An Ed25519 public key, serialized as `ed25519:<base64-or-hex 32 bytes>`.
#[derive(Clone, Debug)]
pub struct PublicKey(VerifyingKey);

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bytes() == other.0.to_bytes()
    }
}
impl Eq for PublicKey {}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bytes().hash(state);
    }
}

impl PublicKey {
    pub fn from_verifying_key(key: VerifyingKey) -> Self {
        PublicKey(key)
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, BoardError> {
        let body = strip_prefix(s)?;
        let bytes = decode_key_body(body)?;
        let arr: [u8; PUBLIC_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
            BoardError::InvalidKeyBytes(format!(
                "expected {PUBLIC_KEY_LENGTH} bytes, got {}",
                bytes.len()
            ))
        })?;
        let key = VerifyingKey::from_bytes(&arr)
            .map_err(|e| BoardError::InvalidKeyBytes(e.to_string()))?;
        Ok(PublicKey(key))
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), BoardError> {
        self.0
            .verify(message, &signature.0)
            .map_err(|_| BoardError::SignatureInvalid)
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{KEY_PREFIX}{}", STANDARD.encode(self.0.to_bytes()))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        PublicKey::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// An Ed25519 private key: either a 32-byte seed or a 64-byte expanded key.
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    pub fn generate() -> Self {
        PrivateKey(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    pub fn parse(s: &str) -> Result<Self, BoardError> {
        let body = strip_prefix(s)?;
        let bytes = decode_key_body(body)?;
        let signing_key = match bytes.len() {
            SECRET_KEY_LENGTH => {
                let arr: [u8; SECRET_KEY_LENGTH] = bytes.as_slice().try_into().unwrap();
                SigningKey::from_bytes(&arr)
            }
            64 => {
                // Expanded form: seed || public key. We only need the seed.
                let arr: [u8; SECRET_KEY_LENGTH] = bytes[..SECRET_KEY_LENGTH].try_into().unwrap();
                SigningKey::from_bytes(&arr)
            }
            other => {
                return Err(BoardError::InvalidKeyBytes(format!(
                    "expected 32 or 64 bytes, got {other}"
                )))
            }
        };
        Ok(PrivateKey(signing_key))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message))
    }

    pub fn to_seed_string(&self) -> String {
        format!("{KEY_PREFIX}{}", STANDARD.encode(self.0.to_bytes()))
    }
}

/// A base64-encoded 64-byte Ed25519 signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature(DalekSignature);

impl Signature {
    pub fn parse(s: &str) -> Result<Self, BoardError> {
        let bytes = STANDARD
            .decode(s)
            .or_else(|_| STANDARD_NO_PAD.decode(s))
            .map_err(|e| BoardError::InvalidKeyFormat(format!("invalid base64 signature: {e}")))?;
        let arr: [u8; 64] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| BoardError::InvalidKeyBytes(format!("expected 64 bytes, got {}", bytes.len())))?;
        Ok(Signature(DalekSignature::from_bytes(&arr)))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0.to_bytes())
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Signature::parse(&s).map_err(serde::de::Error::custom)
    }
}
