use num_bigint::BigInt;
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("RSA key generation failed: {0}")]
    KeyGen(rsa::Error),
    #[error("RSA decryption failed")]
    Decrypt,
    #[error("public key DER encoding failed")]
    Der,
    #[error("shared secret must be 16 bytes, got {0}")]
    BadSecret(usize),
    #[error("verify token mismatch")]
    TokenMismatch,
}

/// The server's RSA-2048 keypair, generated once at startup and shared by
/// every login exchange.
pub struct ServerKeyPair {
    private: RsaPrivateKey,
    public_der: Vec<u8>,
}

impl ServerKeyPair {
    pub fn generate() -> Result<Self, CryptoError> {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 2048).map_err(CryptoError::KeyGen)?;
        let public = RsaPublicKey::from(&private);
        // SubjectPublicKeyInfo DER, the same bytes i2d_PUBKEY emits.
        let public_der = public
            .to_public_key_der()
            .map_err(|_| CryptoError::Der)?
            .as_bytes()
            .to_vec();
        Ok(Self { private, public_der })
    }

    /// DER-encoded public key as sent in the encryption request.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_der
    }

    /// Decrypt an RSA/PKCS#1 v1.5 blob from the encryption response.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.private
            .decrypt(Pkcs1v15Encrypt, data)
            .map_err(|_| CryptoError::Decrypt)
    }
}

/// Generate a random verify token for the encryption request.
pub fn generate_verify_token() -> [u8; 16] {
    let mut token = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut token);
    token
}

/// Generate a random 20-hex-digit server id.
pub fn generate_server_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..20)
        .map(|_| format!("{:x}", rng.gen_range(0..16)))
        .collect()
}

/// Constant-time byte equality. The echoed verify token is attacker
/// controlled; an early-exit memcmp would leak the match prefix length.
pub fn verify_token_matches(expected: &[u8], received: &[u8]) -> bool {
    if expected.len() != received.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in expected.iter().zip(received.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

/// Compute the server hash sent to the session server:
/// SHA-1 over (server_id ASCII, shared secret, public key DER), rendered
/// the way Java's `BigInteger(digest).toString(16)` renders it — signed
/// two's-complement, lowercase hex, leading zeros stripped, `-` prefix for
/// negative values.
pub fn server_hash(server_id: &str, shared_secret: &[u8], public_key_der: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(server_id.as_bytes());
    hasher.update(shared_secret);
    hasher.update(public_key_der);
    let digest = hasher.finalize();
    BigInt::from_signed_bytes_be(&digest).to_str_radix(16)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The classic hash vectors: digests of the bare strings, no secret or key.
    #[test]
    fn test_server_hash_java_formatting() {
        assert_eq!(
            server_hash("Notch", &[], &[]),
            "4ed1f46bbe04bc756bcb17c0c7ce3e4632f06a48"
        );
        assert_eq!(
            server_hash("jeb_", &[], &[]),
            "-7c9d5b0044c130109a5d7b5fb5c317c02b4e28c1"
        );
        assert_eq!(
            server_hash("simon", &[], &[]),
            "88e16a1019277b15d58faf0541e11910eb756f6"
        );
    }

    #[test]
    fn test_verify_token_compare() {
        let token = [7u8; 16];
        assert!(verify_token_matches(&token, &[7u8; 16]));
        assert!(!verify_token_matches(&token, &[8u8; 16]));
        assert!(!verify_token_matches(&token, &[7u8; 15]));
    }

    #[test]
    fn test_server_id_shape() {
        let id = generate_server_id();
        assert_eq!(id.len(), 20);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    // Keygen is slow; one test exercises DER shape and decrypt together.
    #[test]
    fn test_keypair_decrypt_roundtrip() {
        use rsa::pkcs8::DecodePublicKey;
        let pair = ServerKeyPair::generate().unwrap();
        // DER SubjectPublicKeyInfo starts with a SEQUENCE tag.
        assert_eq!(pair.public_key_der()[0], 0x30);

        let public = rsa::RsaPublicKey::from_public_key_der(pair.public_key_der()).unwrap();
        let secret = [0x42u8; 16];
        let encrypted = public
            .encrypt(&mut rand::rngs::OsRng, Pkcs1v15Encrypt, &secret)
            .unwrap();
        assert_eq!(pair.decrypt(&encrypted).unwrap(), secret);
    }
}
