//! Signed posts
//!
//! A tripcode post carries a hex ed25519 public key and a hex signature over the
//! SHA-512 digest of the article body.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha512};

/// Sign a body, returning `(pubkey_hex, signature_hex)`
pub fn sign_body(key: &SigningKey, body: &[u8]) -> (String, String) {
    let digest = Sha512::digest(body);
    let signature = key.sign(&digest);
    (
        hex::encode(key.verifying_key().to_bytes()),
        hex::encode(signature.to_bytes()),
    )
}

/// Check a hex signature against a body
///
/// Malformed hex or key material is treated as a failed verification.
pub fn verify_body(pubkey_hex: &str, signature_hex: &str, body: &[u8]) -> bool {
    let Ok(pubkey) = <[u8; 32]>::try_from(hex::decode(pubkey_hex).unwrap_or_default()) else {
        return false;
    };
    let Ok(signature) = <[u8; 64]>::try_from(hex::decode(signature_hex).unwrap_or_default())
    else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&pubkey) else {
        return false;
    };

    let digest = Sha512::digest(body);
    key.verify(&digest, &Signature::from_bytes(&signature))
        .is_ok()
}
