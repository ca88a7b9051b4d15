//! OpenPGP keypair generation and single-recipient encryption of short
//! strings. Keys and ciphertext cross process boundaries base64-framed so
//! they can travel inside JSON bodies and flat files.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pgp::composed::{
    Deserializable, KeyType, Message, SecretKeyParamsBuilder, SignedPublicKey, SignedSecretKey,
};
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::ser::Serialize;
use pgp::types::{CompressionAlgorithm, SecretKeyTrait};
use smallvec::smallvec;

use crate::CryptoError;

/// User id baked into every generated entity.
const KEY_IDENTITY: &str = "aaf.sms.init";

/// Generate a fresh OpenPGP entity and return `(public, private)` halves,
/// each serialized as raw packets and base64-framed.
///
/// The entity is RSA-2048 with SHA-256 self-signatures over the user id and
/// key material, matching what the quorum protocol expects on both sides of
/// a registration.
pub fn generate_keypair() -> Result<(String, String), CryptoError> {
    let mut key_params = SecretKeyParamsBuilder::default();
    key_params
        .key_type(KeyType::Rsa(2048))
        .can_create_certificates(true)
        .can_sign(true)
        .can_encrypt(true)
        .primary_user_id(KEY_IDENTITY.into())
        .preferred_symmetric_algorithms(smallvec![SymmetricKeyAlgorithm::AES256])
        .preferred_hash_algorithms(smallvec![HashAlgorithm::SHA2_256])
        .preferred_compression_algorithms(smallvec![CompressionAlgorithm::ZLIB]);
    let params = key_params.build().map_err(|_| CryptoError::KeyGen)?;

    let secret_key = params.generate()?;
    let signed_secret = secret_key.sign(String::new)?;
    let signed_public = signed_secret.public_key().sign(&signed_secret, String::new)?;

    let priv_b64 = BASE64.encode(signed_secret.to_bytes()?);
    let pub_b64 = BASE64.encode(signed_public.to_bytes()?);
    Ok((pub_b64, priv_b64))
}

/// Encrypt `data` to the single recipient identified by `pub_b64`.
///
/// Output is the base64 framing of the raw OpenPGP packets.
pub fn encrypt(data: &str, pub_b64: &str) -> Result<String, CryptoError> {
    let pub_bytes = BASE64.decode(pub_b64)?;
    let public = SignedPublicKey::from_bytes(Cursor::new(pub_bytes))?;

    let msg = Message::new_literal_bytes("", data.as_bytes());
    let mut rng = rand::thread_rng();
    let encrypted = msg.encrypt_to_keys(&mut rng, SymmetricKeyAlgorithm::AES128, &[&public])?;

    Ok(BASE64.encode(encrypted.to_bytes()?))
}

/// Reverse of [`encrypt`]: recover the plaintext string from a base64-framed
/// OpenPGP message using the base64-framed private half.
pub fn decrypt(ct_b64: &str, priv_b64: &str) -> Result<String, CryptoError> {
    let priv_bytes = BASE64.decode(priv_b64)?;
    let secret = SignedSecretKey::from_bytes(Cursor::new(priv_bytes))?;

    let ct = BASE64.decode(ct_b64)?;
    let msg = Message::from_bytes(Cursor::new(ct))?;

    let (mut decrypted, _key_ids) = msg.decrypt(String::new, &[&secret])?;
    let inner = decrypted
        .next()
        .ok_or(CryptoError::EmptyMessage)??;
    let content = inner.get_content()?.ok_or(CryptoError::EmptyMessage)?;

    String::from_utf8(content).map_err(|_| CryptoError::EmptyMessage)
}
