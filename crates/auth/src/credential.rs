//! Signed credential codec.
//!
//! Wire format: `base64(permission word) "_" base64(HMAC-SHA256(permission word))`,
//! both parts in the standard alphabet without padding. The standard alphabet
//! never contains `_`, so the delimiter is unambiguous. The payload is only
//! integrity protected; anyone holding a credential can read its grants.

use base64::{Engine, engine::general_purpose::STANDARD_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::permissions::PermissionSet;

pub const DELIMITER: char = '_';

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("malformed credential: {0}")]
    Malformed(&'static str),

    #[error("credential signature was not verified")]
    SignatureMismatch,

    #[error("signing key must not be empty")]
    EmptyKey,
}

/// HMAC key shared by the issuer and the gateway.
///
/// The keyed MAC state is prepared once; signing and verifying clone it.
#[derive(Clone)]
pub struct SigningKey {
    mac: HmacSha256,
}

impl SigningKey {
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, CredentialError> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(CredentialError::EmptyKey);
        }
        let mac = HmacSha256::new_from_slice(key).map_err(|_| CredentialError::EmptyKey)?;
        Ok(Self { mac })
    }

    fn tag(&self, message: &[u8]) -> [u8; 32] {
        let mut mac = self.mac.clone();
        mac.update(message);
        let mut tag = [0u8; 32];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        tag
    }

    /// Encode and sign `permissions`. Deterministic for a given key.
    pub fn sign(&self, permissions: &PermissionSet) -> String {
        let payload = permissions.to_bytes();
        let tag = self.tag(&payload);

        let mut credential = STANDARD_NO_PAD.encode(payload);
        credential.push(DELIMITER);
        STANDARD_NO_PAD.encode_string(tag, &mut credential);
        credential
    }

    /// Verify `credential` and recover the permissions it carries.
    ///
    /// Any change to the payload or the tag, truncation included, fails with
    /// [`CredentialError::SignatureMismatch`] or [`CredentialError::Malformed`].
    pub fn verify(&self, credential: &str) -> Result<PermissionSet, CredentialError> {
        let (payload, tag) = credential
            .split_once(DELIMITER)
            .ok_or(CredentialError::Malformed("expected '<payload>_<signature>'"))?;

        let payload = STANDARD_NO_PAD
            .decode(payload)
            .map_err(|_| CredentialError::Malformed("payload is not valid base64"))?;
        let expected = STANDARD_NO_PAD
            .decode(tag)
            .map_err(|_| CredentialError::Malformed("signature is not valid base64"))?;

        let computed = self.tag(&payload);
        if !bool::from(computed.as_slice().ct_eq(expected.as_slice())) {
            return Err(CredentialError::SignatureMismatch);
        }

        PermissionSet::from_bytes(&payload)
            .map_err(|_| CredentialError::Malformed("payload has the wrong length"))
    }
}

impl core::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SigningKey([REDACTED])")
    }
}
