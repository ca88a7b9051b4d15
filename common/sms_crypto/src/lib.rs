//! Crypto primitives shared by the SMS service and its quorum clients:
//! OpenPGP keypair generation and short-string encryption for shard
//! wrapping, plus mutual-TLS server config assembly.

pub mod files;
pub mod pgp;
pub mod tls;

/// Errors surfaced by the crypto primitives.
///
/// Variants intentionally carry no key or shard material; callers log these
/// as-is.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Reading key or certificate material from disk failed.
    #[error("unable to read {path}")]
    Read {
        /// Path that could not be read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Persisting key or credential material to disk failed.
    #[error("unable to write {path}")]
    Write {
        /// Path that could not be written.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Input was not valid base64.
    #[error("invalid base64 framing")]
    Base64(#[from] base64::DecodeError),

    /// An OpenPGP packet operation failed.
    #[error("openpgp operation failed")]
    Pgp(#[source] ::pgp::errors::Error),

    /// Keypair generation parameters were rejected.
    #[error("key generation failed")]
    KeyGen,

    /// A decrypted OpenPGP message carried no literal data.
    #[error("empty openpgp message")]
    EmptyMessage,

    /// PEM contents could not be parsed into certificates or a key.
    #[error("malformed pem in {0}")]
    MalformedPem(String),

    /// The CA bundle produced no usable certificates.
    #[error("no ca certificates found in {0}")]
    EmptyCaBundle(String),

    /// The server private key could not be decrypted with the configured
    /// password.
    #[error("server key decryption failed")]
    KeyDecrypt,

    /// TLS configuration assembly was rejected by rustls.
    #[error("tls config assembly failed")]
    Tls(#[source] rustls::Error),
}

impl From<::pgp::errors::Error> for CryptoError {
    fn from(e: ::pgp::errors::Error) -> Self {
        CryptoError::Pgp(e)
    }
}

impl From<rustls::Error> for CryptoError {
    fn from(e: rustls::Error) -> Self {
        CryptoError::Tls(e)
    }
}
