//! Password-to-key localization (RFC 3414 A.2).

use std::fmt;

use digest::Digest;
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{auth::AuthProtocol, Error, Result};

/// Shortest secret accepted by [`password_to_key`].
pub const MIN_SECRET_LEN: usize = 8;

const EXPANSION_LEN: usize = 1_048_576;
const CHUNK_LEN: usize = 64;

/// Engine-independent stage: hashes one megabyte of the secret repeated
/// cyclically.
///
/// The result (Ku) can be kept and passed to [`localize`] for every engine
/// polled with the same credential.
pub fn password_to_key(protocol: AuthProtocol, secret: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if secret.len() < MIN_SECRET_LEN {
        debug!(target: "snmp_usm::key", len = secret.len(), min = MIN_SECRET_LEN, "secret too short");
        return Err(Error::WeakSecret {
            len: secret.len(),
            min: MIN_SECRET_LEN,
        });
    }
    let master = match protocol {
        AuthProtocol::Md5 => expand::<md5::Md5>(secret),
        AuthProtocol::Sha1 => expand::<sha1::Sha1>(secret),
        AuthProtocol::Sha512 => expand::<sha2::Sha512>(secret),
    };
    Ok(master)
}

/// Binds a master key to one authoritative engine: `H(Ku || engineID || Ku)`.
pub fn localize(protocol: AuthProtocol, master: &[u8], engine_id: &[u8]) -> LocalizedKey {
    let key = match protocol {
        AuthProtocol::Md5 => bind::<md5::Md5>(master, engine_id),
        AuthProtocol::Sha1 => bind::<sha1::Sha1>(master, engine_id),
        AuthProtocol::Sha512 => bind::<sha2::Sha512>(master, engine_id),
    };
    trace!(target: "snmp_usm::key", ?protocol, engine_id_len = engine_id.len(), "key localized");
    LocalizedKey { key, protocol }
}

/// Both stages in one call.
pub fn derive(protocol: AuthProtocol, secret: &[u8], engine_id: &[u8]) -> Result<LocalizedKey> {
    let master = password_to_key(protocol, secret)?;
    Ok(localize(protocol, &master, engine_id))
}

fn expand<D: Digest>(secret: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut hasher = D::new();
    let mut chunk = Zeroizing::new([0u8; CHUNK_LEN]);
    let mut index = 0;
    for _ in 0..EXPANSION_LEN / CHUNK_LEN {
        for byte in chunk.iter_mut() {
            *byte = secret[index];
            index += 1;
            if index == secret.len() {
                index = 0;
            }
        }
        hasher.update(&chunk[..]);
    }
    Zeroizing::new(hasher.finalize().to_vec())
}

fn bind<D: Digest>(master: &[u8], engine_id: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();
    hasher.update(master);
    hasher.update(engine_id);
    hasher.update(master);
    hasher.finalize().to_vec()
}

/// A key bound to one engine id. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LocalizedKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: AuthProtocol,
}

impl LocalizedKey {
    pub fn from_secret(protocol: AuthProtocol, secret: &[u8], engine_id: &[u8]) -> Result<Self> {
        derive(protocol, secret, engine_id)
    }

    /// Wraps key bytes obtained elsewhere (already localized, possibly
    /// extended).
    pub fn from_bytes(protocol: AuthProtocol, key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            protocol,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    pub fn protocol(&self) -> AuthProtocol {
        self.protocol
    }

    /// Copies the key into an allocation of at least `capacity` bytes, so
    /// appending up to that length never reallocates.
    pub(crate) fn with_capacity(&self, capacity: usize) -> Self {
        let mut key = Vec::with_capacity(capacity.max(self.key.len()));
        key.extend_from_slice(&self.key);
        Self {
            key,
            protocol: self.protocol,
        }
    }

    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.key.extend_from_slice(bytes);
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        if len < self.key.len() {
            self.key[len..].zeroize();
            self.key.truncate(len);
        }
    }
}

impl fmt::Debug for LocalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalizedKey")
            .field("protocol", &self.protocol)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_floor() {
        assert_eq!(
            password_to_key(AuthProtocol::Md5, b"1234567").unwrap_err(),
            Error::WeakSecret { len: 7, min: 8 }
        );
        assert!(password_to_key(AuthProtocol::Md5, b"12345678").is_ok());
    }

    #[test]
    fn debug_hides_key() {
        let key = LocalizedKey::from_bytes(AuthProtocol::Sha1, vec![0xaa; 20]);
        let printed = format!("{:?}", key);
        assert!(printed.contains("[REDACTED]"));
        assert!(!printed.contains("170"));
    }

    #[test]
    fn reserved_key_grows_in_place() {
        let key = LocalizedKey::from_bytes(AuthProtocol::Md5, vec![1; 16]);
        let mut grown = key.with_capacity(32);
        let start = grown.as_bytes().as_ptr();
        grown.extend_from_slice(&[2; 16]);
        assert_eq!(grown.as_bytes().as_ptr(), start);
        assert_eq!(&grown.as_bytes()[..16], key.as_bytes());
        assert_eq!(grown.len(), 32);
    }

    #[test]
    fn truncate_shrinks() {
        let mut key = LocalizedKey::from_bytes(AuthProtocol::Md5, vec![1; 16]);
        key.truncate(8);
        assert_eq!(key.as_bytes(), &[1; 8]);
        key.truncate(32);
        assert_eq!(key.len(), 8);
    }
}
