use crate::crypto::{ALG_ED25519, Algorithm, ED25519_SIGNATURE_SIZE, SigningKey};
use crate::error::*;
use crate::secure_file;
use crate::vblock::PackedPublicKey;

use ct_codecs::{Encoder, Hex};
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;
use std::{fmt, str};

pub(crate) const ED25519_SK_ID: u8 = 0x81;

/// A public verification key with its key version.
///
/// The key blob format on disk is the packed key encoding used inside
/// keyblocks, so a `.vbpubk` file can be embedded as-is.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct PublicKey {
    pub pk: ed25519_compact::PublicKey,
    pub key_version: u32,
}

impl PublicKey {
    /// Unpack an Ed25519 key from its packed form.
    pub fn from_packed(packed: &PackedPublicKey) -> Result<Self, VbError> {
        if packed.algorithm != ALG_ED25519 {
            return Err(VbError::UnsupportedKeyType);
        }
        Ok(Self {
            pk: ed25519_compact::PublicKey::from_slice(&packed.key_data)?,
            key_version: packed.key_version,
        })
    }

    /// Return the packed form of the key.
    pub fn to_packed(&self) -> PackedPublicKey {
        PackedPublicKey {
            algorithm: ALG_ED25519,
            key_version: self.key_version,
            key_data: self.pk.as_ref().to_vec(),
        }
    }

    /// Create a public key from a packed key blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VbError> {
        let packed = PackedPublicKey::parse(bytes)?;
        if packed.byte_len() != bytes.len() {
            return Err(VbError::ParseError);
        }
        Self::from_packed(&packed)
    }

    /// Return the key as a packed key blob.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_packed().to_bytes()
    }

    /// Deserialize a PEM-encoded public key.
    pub fn from_pem(pem: &str, key_version: u32) -> Result<Self, VbError> {
        let pk = ed25519_compact::PublicKey::from_pem(pem)?;
        Ok(Self { pk, key_version })
    }

    /// Deserialize a DER-encoded public key.
    pub fn from_der(der: &[u8], key_version: u32) -> Result<Self, VbError> {
        let pk = ed25519_compact::PublicKey::from_der(der)?;
        Ok(Self { pk, key_version })
    }

    /// Serialize the public key using PEM encoding.
    pub fn to_pem(&self) -> String {
        self.pk.to_pem()
    }

    /// Read a public key blob from a file.
    pub fn from_file(file: impl AsRef<Path>) -> Result<Self, VbError> {
        let mut fp = File::open(file)?;
        let mut bytes = vec![];
        fp.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// Save the public key blob to a file.
    pub fn to_file(&self, file: impl AsRef<Path>) -> Result<(), VbError> {
        let mut fp = File::create(file)?;
        fp.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Try to guess the public key format.
    ///
    /// PEM and DER keys carry no version, they get key version 1.
    pub fn from_any(data: &[u8]) -> Result<Self, VbError> {
        if let Ok(pk) = Self::from_bytes(data) {
            return Ok(pk);
        }
        if let Ok(pk) = Self::from_der(data, 1) {
            return Ok(pk);
        }
        let s = str::from_utf8(data).map_err(|_| VbError::ParseError)?;
        if let Ok(pk) = Self::from_pem(s, 1) {
            return Ok(pk);
        }
        Err(VbError::ParseError)
    }

    /// Load a key from a file, trying to guess its format.
    pub fn from_any_file(file: impl AsRef<Path>) -> Result<Self, VbError> {
        let mut fp = File::open(file)?;
        let mut bytes = vec![];
        fp.read_to_end(&mut bytes)?;
        Self::from_any(&bytes)
    }

    /// Short digest identifying the key in logs.
    pub fn key_digest(&self) -> String {
        let digest = crate::crypto::sha256(self.pk.as_ref());
        Hex::encode_to_string(&digest[..8]).unwrap_or_default()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PublicKey {{ [{}] - key_version: {} }}",
            Hex::encode_to_string(self.pk.as_ref()).unwrap_or_default(),
            self.key_version
        )
    }
}

/// A private signing key.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct PrivateKey {
    pub sk: ed25519_compact::SecretKey,
}

impl PrivateKey {
    /// Create a private key from a key blob.
    pub fn from_bytes(sk: &[u8]) -> Result<Self, VbError> {
        let (id, raw) = sk.split_first().ok_or(VbError::ParseError)?;
        if *id != ED25519_SK_ID {
            return Err(VbError::UnsupportedKeyType);
        }
        Ok(Self {
            sk: ed25519_compact::SecretKey::from_slice(raw)?,
        })
    }

    /// Return the private key as a key blob.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![ED25519_SK_ID];
        bytes.extend_from_slice(self.sk.as_ref());
        bytes
    }

    /// Deserialize a PEM-encoded private key.
    pub fn from_pem(pem: &str) -> Result<Self, VbError> {
        let sk = ed25519_compact::SecretKey::from_pem(pem)?;
        Ok(Self { sk })
    }

    /// Deserialize a DER-encoded private key.
    pub fn from_der(der: &[u8]) -> Result<Self, VbError> {
        let sk = ed25519_compact::SecretKey::from_der(der)?;
        Ok(Self { sk })
    }

    /// Serialize the private key using PEM encoding.
    pub fn to_pem(&self) -> String {
        self.sk.to_pem()
    }

    /// Read a private key blob from a file.
    pub fn from_file(file: impl AsRef<Path>) -> Result<Self, VbError> {
        let bytes = secure_file::read_secure(file.as_ref())?;
        Self::from_bytes(&bytes)
    }

    /// Load a private key from a file, accepting the blob, DER and PEM forms.
    pub fn from_any_file(file: impl AsRef<Path>) -> Result<Self, VbError> {
        let bytes = secure_file::read_secure(file.as_ref())?;
        if let Ok(sk) = Self::from_bytes(&bytes) {
            return Ok(sk);
        }
        if let Ok(sk) = Self::from_der(&bytes) {
            return Ok(sk);
        }
        let s = str::from_utf8(&bytes).map_err(|_| VbError::ParseError)?;
        Self::from_pem(s)
    }

    /// Save a private key blob to a file readable by the owner only.
    pub fn to_file(&self, file: impl AsRef<Path>) -> Result<(), VbError> {
        secure_file::write_secure(file.as_ref(), &self.to_bytes())
    }

    /// Public half of this key.
    pub fn public_key(&self, key_version: u32) -> PublicKey {
        PublicKey {
            pk: self.sk.public_key(),
            key_version,
        }
    }
}

impl SigningKey for PrivateKey {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Ed25519
    }

    fn signature_size(&self) -> usize {
        ED25519_SIGNATURE_SIZE
    }

    fn public_key_data(&self) -> Vec<u8> {
        self.sk.public_key().as_ref().to_vec()
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, TrustError> {
        Ok(self.sk.sign(data, None).to_vec())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey {{ [{}] }}", self.public_key(0).key_digest())
    }
}

/// A key pair.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct KeyPair {
    /// The public key.
    pub pk: PublicKey,
    /// The private key.
    pub sk: PrivateKey,
}

impl KeyPair {
    /// Generate a new key pair.
    pub fn generate(key_version: u32) -> Self {
        let kp = ed25519_compact::KeyPair::from_seed(ed25519_compact::Seed::generate());
        KeyPair {
            pk: PublicKey {
                pk: kp.pk,
                key_version,
            },
            sk: PrivateKey { sk: kp.sk },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generate() {
        let kp1 = KeyPair::generate(1);
        let kp2 = KeyPair::generate(1);
        assert_ne!(kp1.pk.pk.as_ref(), kp2.pk.pk.as_ref());
        assert_eq!(kp1.sk.public_key(1), kp1.pk);
    }

    #[test]
    fn test_public_key_to_from_bytes() {
        let kp = KeyPair::generate(3);
        let bytes = kp.pk.to_bytes();
        assert_eq!(bytes.len(), PackedPublicKey::HEADER_SIZE + 32);

        let pk2 = PublicKey::from_bytes(&bytes).unwrap();
        assert_eq!(pk2, kp.pk);
        assert_eq!(pk2.key_version, 3);
    }

    #[test]
    fn test_public_key_trailing_bytes_rejected() {
        let kp = KeyPair::generate(1);
        let mut bytes = kp.pk.to_bytes();
        bytes.push(0);
        assert!(matches!(
            PublicKey::from_bytes(&bytes),
            Err(VbError::ParseError)
        ));
    }

    #[test]
    fn test_public_key_unsupported_algorithm() {
        let packed = PackedPublicKey {
            algorithm: 42,
            key_version: 1,
            key_data: vec![0u8; 32],
        };
        let result = PublicKey::from_bytes(&packed.to_bytes());
        assert!(matches!(result, Err(VbError::UnsupportedKeyType)));
    }

    #[test]
    fn test_public_key_to_from_pem() {
        let kp = KeyPair::generate(1);
        let pem = kp.pk.to_pem();
        assert!(pem.contains("PUBLIC KEY"));
        let pk2 = PublicKey::from_pem(&pem, 1).unwrap();
        assert_eq!(pk2.pk.as_ref(), kp.pk.pk.as_ref());
    }

    #[test]
    fn test_public_key_from_any() {
        let kp = KeyPair::generate(2);
        let pk = PublicKey::from_any(&kp.pk.to_bytes()).unwrap();
        assert_eq!(pk.key_version, 2);

        let pk = PublicKey::from_any(kp.pk.to_pem().as_bytes()).unwrap();
        assert_eq!(pk.pk.as_ref(), kp.pk.pk.as_ref());
        assert_eq!(pk.key_version, 1);

        assert!(PublicKey::from_any(b"not a valid key").is_err());
    }

    #[test]
    fn test_private_key_to_from_bytes() {
        let kp = KeyPair::generate(1);
        let bytes = kp.sk.to_bytes();
        assert_eq!(bytes[0], ED25519_SK_ID);
        let sk2 = PrivateKey::from_bytes(&bytes).unwrap();
        assert_eq!(sk2.sk.as_ref(), kp.sk.sk.as_ref());
    }

    #[test]
    fn test_private_key_invalid_type() {
        let bytes = vec![0xFF, 1, 2, 3, 4];
        assert!(matches!(
            PrivateKey::from_bytes(&bytes),
            Err(VbError::UnsupportedKeyType)
        ));
        assert!(matches!(
            PrivateKey::from_bytes(&[]),
            Err(VbError::ParseError)
        ));
    }

    #[test]
    fn test_private_key_to_from_pem() {
        let kp = KeyPair::generate(1);
        let pem = kp.sk.to_pem();
        assert!(pem.contains("PRIVATE KEY"));
        let sk2 = PrivateKey::from_pem(&pem).unwrap();
        assert_eq!(sk2.sk.as_ref(), kp.sk.sk.as_ref());
    }

    #[test]
    fn test_key_files_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let kp = KeyPair::generate(5);
        let sk_path = dir.path().join("data.vbprivk");
        let pk_path = dir.path().join("data.vbpubk");

        kp.sk.to_file(&sk_path).unwrap();
        kp.pk.to_file(&pk_path).unwrap();

        let sk = PrivateKey::from_file(&sk_path).unwrap();
        let pk = PublicKey::from_file(&pk_path).unwrap();
        assert_eq!(sk, kp.sk);
        assert_eq!(pk, kp.pk);

        let sk = PrivateKey::from_any_file(&sk_path).unwrap();
        assert_eq!(sk, kp.sk);
    }

    #[test]
    fn test_signing_key_public_data() {
        let kp = KeyPair::generate(1);
        assert_eq!(kp.sk.public_key_data(), kp.pk.to_packed().key_data);
        assert_eq!(kp.sk.algorithm(), Algorithm::Ed25519);
    }

    #[test]
    fn test_private_key_debug_hides_secret() {
        let kp = KeyPair::generate(1);
        let debug_str = format!("{:?}", kp.sk);
        assert!(debug_str.contains("PrivateKey"));
        let secret_hex = Hex::encode_to_string(kp.sk.sk.as_ref()).unwrap();
        assert!(!debug_str.contains(&secret_hex));
    }
}
