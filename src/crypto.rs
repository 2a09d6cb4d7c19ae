/*!
Encryption of stored access tokens
*/
use ring::aead::BoundKey;

use crate::{Error, Result};

/// ring requires an implementor of `NonceSequence`,
/// which is a wrapping trait around `ring::aead::Nonce`.
/// We have to make a wrapper that can pass ownership
/// of the nonce exactly once.
struct OneNonceSequence {
    inner: Option<ring::aead::Nonce>,
}
impl OneNonceSequence {
    fn new(inner: ring::aead::Nonce) -> Self {
        Self { inner: Some(inner) }
    }
}

impl ring::aead::NonceSequence for OneNonceSequence {
    fn advance(&mut self) -> std::result::Result<ring::aead::Nonce, ring::error::Unspecified> {
        self.inner.take().ok_or(ring::error::Unspecified)
    }
}

/// A hex encoded ciphertext and the hex encoded nonce it was sealed with
#[derive(Debug, Clone, PartialEq)]
pub struct Enc {
    pub value: String,
    pub nonce: String,
}

/// Return a `Vec` of secure random bytes of size `n`
fn rand_bytes(n: usize) -> Result<Vec<u8>> {
    use ring::rand::SecureRandom;
    let mut buf = vec![0; n];
    let sysrand = ring::rand::SystemRandom::new();
    sysrand
        .fill(&mut buf)
        .map_err(|_| Error::Crypto("error getting random bytes".into()))?;
    Ok(buf)
}

/// Seals UTF-8 strings with AES_256_GCM under a single 32 byte key.
#[derive(Clone)]
pub struct Cipher {
    key: Vec<u8>,
}

impl Cipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(Error::Crypto(format!(
                "encryption key must be 32 bytes, got {}",
                key.len()
            )));
        }
        Ok(Self { key: key.to_vec() })
    }

    /// Encrypt `s` using a freshly generated 12-byte nonce
    pub fn encrypt(&self, s: &str) -> Result<Enc> {
        let nonce = rand_bytes(12)?;
        let alg = &ring::aead::AES_256_GCM;
        let seq = ring::aead::Nonce::try_assume_unique_for_key(&nonce)
            .map_err(|_| Error::Crypto("encryption nonce not unique".into()))?;
        let key = ring::aead::UnboundKey::new(alg, &self.key)
            .map_err(|_| Error::Crypto("error building sealing key".into()))?;
        let mut key = ring::aead::SealingKey::new(key, OneNonceSequence::new(seq));
        let mut in_out = s.as_bytes().to_vec();
        key.seal_in_place_append_tag(ring::aead::Aad::empty(), &mut in_out)
            .map_err(|_| Error::Crypto("failed encrypting bytes".into()))?;
        Ok(Enc {
            value: hex::encode(&in_out),
            nonce: hex::encode(&nonce),
        })
    }

    pub fn decrypt(&self, enc: &Enc) -> Result<String> {
        let nonce = hex::decode(&enc.nonce)
            .map_err(|e| Error::Crypto(format!("nonce hex decode error {}", e)))?;
        let mut value = hex::decode(&enc.value)
            .map_err(|e| Error::Crypto(format!("value hex decode error {}", e)))?;
        let alg = &ring::aead::AES_256_GCM;
        let seq = ring::aead::Nonce::try_assume_unique_for_key(&nonce)
            .map_err(|_| Error::Crypto("decryption nonce not unique".into()))?;
        let key = ring::aead::UnboundKey::new(alg, &self.key)
            .map_err(|_| Error::Crypto("error building opening key".into()))?;
        let mut key = ring::aead::OpeningKey::new(key, OneNonceSequence::new(seq));
        let out = key
            .open_in_place(ring::aead::Aad::empty(), &mut value)
            .map_err(|_| Error::Crypto("failed decrypting bytes".into()))?;
        String::from_utf8(out.to_vec()).map_err(|e| Error::Crypto(format!("utf8 error {}", e)))
    }
}
