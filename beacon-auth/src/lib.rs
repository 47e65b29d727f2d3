//! Request signing for Beacon's outbound service calls.
//!
//! Calls to the similarity service are authenticated with a shared secret. The request body is
//! signed with an HMAC and the signature is transmitted in the `Authorization` header:
//!
//! ```text
//! Authorization: Rpcsignature rpc0:<hex encoded signature>
//! ```
//!
//! The receiving side recomputes the signature over the raw body and compares it in constant
//! time.
//!
//! ```
//! use beacon_auth::SharedSecret;
//!
//! let secret: SharedSecret = "top-secret".parse().unwrap();
//! let signature = secret.sign(b"{}");
//! assert!(secret.verify(b"{}", &signature.to_header()).is_ok());
//! ```

#![warn(missing_docs)]

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;

/// The authorization scheme used for signed service requests.
pub const SIGNATURE_SCHEME: &str = "Rpcsignature";

/// The version prefix of the signature payload.
pub const SIGNATURE_VERSION: &str = "rpc0";

/// Errors raised when verifying a request signature.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SignatureError {
    /// The header does not use the expected authorization scheme or version.
    #[error("unsupported signature scheme")]
    UnsupportedScheme,
    /// The signature is not valid hex.
    #[error("malformed signature encoding")]
    BadEncoding,
    /// The signature does not match the body.
    #[error("invalid signature")]
    BadSignature,
}

/// A secret shared between Beacon and an upstream service.
#[derive(Clone, Eq, PartialEq)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    /// Creates a secret from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns `true` if the secret is empty and cannot be used for signing.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn mac(&self) -> Hmac<Sha256> {
        Hmac::new_from_slice(&self.0).expect("HMAC takes variable keys")
    }

    /// Signs the given request body.
    pub fn sign(&self, body: &[u8]) -> RpcSignature {
        let mut mac = self.mac();
        mac.update(body);
        RpcSignature(HEXLOWER.encode(&mac.finalize().into_bytes()))
    }

    /// Verifies an `Authorization` header value against the given request body.
    pub fn verify(&self, body: &[u8], header: &str) -> Result<(), SignatureError> {
        let signature = RpcSignature::from_header(header)?;
        let code = HEXLOWER
            .decode(signature.0.as_bytes())
            .map_err(|_| SignatureError::BadEncoding)?;

        let mut mac = self.mac();
        mac.update(body);
        mac.verify_slice(&code)
            .map_err(|_| SignatureError::BadSignature)
    }
}

impl FromStr for SharedSecret {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.as_bytes().to_vec()))
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(\"********\")")
    }
}

impl Serialize for SharedSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(&self.0))
    }
}

impl<'de> Deserialize<'de> for SharedSecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self(s.into_bytes()))
    }
}

/// A hex encoded HMAC-SHA256 signature of a request body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RpcSignature(String);

impl RpcSignature {
    /// Returns the hex encoded signature.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Formats the signature as `Authorization` header value.
    pub fn to_header(&self) -> String {
        format!("{SIGNATURE_SCHEME} {SIGNATURE_VERSION}:{}", self.0)
    }

    /// Parses a signature from an `Authorization` header value.
    pub fn from_header(header: &str) -> Result<Self, SignatureError> {
        let payload = header
            .strip_prefix(SIGNATURE_SCHEME)
            .map(str::trim_start)
            .and_then(|rest| rest.strip_prefix(SIGNATURE_VERSION))
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or(SignatureError::UnsupportedScheme)?;

        Ok(Self(payload.to_owned()))
    }
}

impl fmt::Display for RpcSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_known_vector() {
        let secret = SharedSecret::new("key");
        let signature = secret.sign(b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            signature.as_str(),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_header_format() {
        let secret = SharedSecret::new("key");
        let header = secret.sign(b"{}").to_header();
        assert!(header.starts_with("Rpcsignature rpc0:"));
        assert_eq!(header.len(), "Rpcsignature rpc0:".len() + 64);
    }

    #[test]
    fn test_verify_roundtrip() {
        let secret = SharedSecret::new("seer-secret");
        let body = br#"{"project_id":1,"hash_list":["abc"]}"#;
        let header = secret.sign(body).to_header();

        assert_eq!(secret.verify(body, &header), Ok(()));
    }

    #[test]
    fn test_verify_tampered_body() {
        let secret = SharedSecret::new("seer-secret");
        let header = secret.sign(b"original").to_header();

        assert_eq!(
            secret.verify(b"tampered", &header),
            Err(SignatureError::BadSignature)
        );
    }

    #[test]
    fn test_verify_wrong_secret() {
        let header = SharedSecret::new("a").sign(b"body").to_header();

        assert_eq!(
            SharedSecret::new("b").verify(b"body", &header),
            Err(SignatureError::BadSignature)
        );
    }

    #[test]
    fn test_verify_bad_header() {
        let secret = SharedSecret::new("a");
        assert_eq!(
            secret.verify(b"body", "Bearer abc"),
            Err(SignatureError::UnsupportedScheme)
        );
        assert_eq!(
            secret.verify(b"body", "Rpcsignature rpc0:not-hex"),
            Err(SignatureError::BadEncoding)
        );
    }

    #[test]
    fn test_secret_is_redacted() {
        let secret = SharedSecret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "SharedSecret(\"********\")");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"hunter2\"");
    }
}
