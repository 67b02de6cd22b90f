use std::{fmt, str::FromStr};

use digest::Digest;
use hmac::{digest::KeyInit, Hmac, Mac};
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::{key, Error, Result};

/// Authentication protocol.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum AuthProtocol {
    /// HMAC-MD5-96 (RFC 3414)
    Md5,
    /// HMAC-SHA-96 (RFC 3414)
    Sha1,
    /// HMAC-SHA-512-384 (RFC 7860)
    Sha512,
}

/// Fixed parameters of an authentication protocol.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AuthDigestSpec {
    pub protocol: AuthProtocol,
    /// Natural digest output, also the localized key length.
    pub digest_len: usize,
    /// Bytes of the HMAC carried in msgAuthenticationParameters.
    pub tag_len: usize,
}

/// Either a localized key or a secret still to be localized.
#[derive(Clone, Copy)]
pub enum KeyMaterial<'a> {
    Key(&'a [u8]),
    Secret { secret: &'a [u8], engine_id: &'a [u8] },
}

impl fmt::Debug for KeyMaterial<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMaterial::Key(_) => f.write_str("Key([REDACTED])"),
            KeyMaterial::Secret { engine_id, .. } => f
                .debug_struct("Secret")
                .field("secret", &"[REDACTED]")
                .field("engine_id", engine_id)
                .finish(),
        }
    }
}

impl AuthProtocol {
    pub const fn spec(self) -> AuthDigestSpec {
        let (digest_len, tag_len) = match self {
            AuthProtocol::Md5 => (16, 12),
            AuthProtocol::Sha1 => (20, 12),
            AuthProtocol::Sha512 => (64, 48),
        };
        AuthDigestSpec {
            protocol: self,
            digest_len,
            tag_len,
        }
    }

    pub const fn digest_len(self) -> usize {
        self.spec().digest_len
    }

    pub const fn tag_len(self) -> usize {
        self.spec().tag_len
    }

    /// Plain (unkeyed) digest of `data`.
    pub fn raw_hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            AuthProtocol::Md5 => md5::Md5::digest(data).to_vec(),
            AuthProtocol::Sha1 => sha1::Sha1::digest(data).to_vec(),
            AuthProtocol::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }

    /// Full, untruncated HMAC of `data`.
    pub fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        match self {
            AuthProtocol::Md5 => compute_mac::<Hmac<md5::Md5>>(key, data),
            AuthProtocol::Sha1 => compute_mac::<Hmac<sha1::Sha1>>(key, data),
            AuthProtocol::Sha512 => compute_mac::<Hmac<sha2::Sha512>>(key, data),
        }
    }

    /// Truncated HMAC over the whole message, authentication field zeroed.
    pub fn sign(self, material: KeyMaterial<'_>, message: &[u8]) -> Result<Vec<u8>> {
        let mut tag = match material {
            KeyMaterial::Key(key) => self.hmac(key, message)?,
            KeyMaterial::Secret { secret, engine_id } => {
                let key = key::derive(self, secret, engine_id)?;
                self.hmac(key.as_bytes(), message)?
            }
        };
        tag.truncate(self.tag_len());
        trace!(target: "snmp_usm::auth", protocol = ?self, len = message.len(), "message signed");
        Ok(tag)
    }

    /// Recomputes the tag over `message` and compares it with `claimed`.
    ///
    /// A mismatch, including a `claimed` of the wrong length, is `Ok(false)`.
    /// The caller must have zeroed the authentication field of `message`.
    pub fn verify(self, material: KeyMaterial<'_>, claimed: &[u8], message: &[u8]) -> Result<bool> {
        let computed = Zeroizing::new(self.sign(material, message)?);
        if computed.len() != claimed.len() {
            debug!(target: "snmp_usm::auth", expected = computed.len(), actual = claimed.len(), "tag length mismatch");
            return Ok(false);
        }
        let diff = computed
            .iter()
            .zip(claimed)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        if diff != 0 {
            debug!(target: "snmp_usm::auth", protocol = ?self, "tag mismatch");
        }
        Ok(diff == 0)
    }
}

impl FromStr for AuthProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(AuthProtocol::Md5),
            "sha" | "sha1" => Ok(AuthProtocol::Sha1),
            "sha512" => Ok(AuthProtocol::Sha512),
            _ => Err(Error::UnknownProtocol(s.to_owned())),
        }
    }
}

impl fmt::Display for AuthProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthProtocol::Md5 => "MD5",
            AuthProtocol::Sha1 => "SHA1",
            AuthProtocol::Sha512 => "SHA512",
        })
    }
}

fn compute_mac<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <M as KeyInit>::new_from_slice(key).map_err(|e| Error::Crypto(e.to_string()))?;
    Mac::update(&mut mac, data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_never_exceeds_digest() {
        for protocol in [AuthProtocol::Md5, AuthProtocol::Sha1, AuthProtocol::Sha512] {
            let spec = protocol.spec();
            assert!(spec.tag_len <= spec.digest_len);
            assert_eq!(protocol.raw_hash(b"abc").len(), spec.digest_len);
        }
    }

    #[test]
    fn parse_names() {
        assert_eq!("SHA".parse::<AuthProtocol>().unwrap(), AuthProtocol::Sha1);
        assert_eq!("md5".parse::<AuthProtocol>().unwrap(), AuthProtocol::Md5);
        assert_eq!("Sha512".parse::<AuthProtocol>().unwrap(), AuthProtocol::Sha512);
        assert!("sha256".parse::<AuthProtocol>().is_err());
    }

    #[test]
    fn wrong_length_tag_is_mismatch() {
        let key = [0x0bu8; 16];
        let tag = AuthProtocol::Md5.sign(KeyMaterial::Key(&key), b"data").unwrap();
        assert!(AuthProtocol::Md5
            .verify(KeyMaterial::Key(&key), &tag, b"data")
            .unwrap());
        assert!(!AuthProtocol::Md5
            .verify(KeyMaterial::Key(&key), &tag[..11], b"data")
            .unwrap());
        assert!(!AuthProtocol::Md5
            .verify(KeyMaterial::Key(&key), &[], b"data")
            .unwrap());
    }

    #[test]
    fn weak_secret_propagates() {
        let material = KeyMaterial::Secret {
            secret: b"short",
            engine_id: &[0x80, 0, 0, 0],
        };
        assert_eq!(
            AuthProtocol::Sha1.sign(material, b"data").unwrap_err(),
            Error::WeakSecret { len: 5, min: 8 }
        );
    }
}
