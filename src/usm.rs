//! User-based Security Model state (RFC 3414 §2.4, §3).
//!
//! ```text
//! UsmSecurityParameters ::= SEQUENCE {
//!     msgAuthoritativeEngineID     OCTET STRING,
//!     msgAuthoritativeEngineBoots  INTEGER (0..2147483647),
//!     msgAuthoritativeEngineTime   INTEGER (0..2147483647),
//!     msgUserName                  OCTET STRING (SIZE(0..32)),
//!     msgAuthenticationParameters  OCTET STRING,
//!     msgPrivacyParameters         OCTET STRING
//! }
//! ```
//!
//! On the wire the sequence is itself wrapped in an OCTET STRING.

use std::{fmt, ops};

use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::{
    asn1::{self, AsnReader},
    auth::{AuthProtocol, KeyMaterial},
    key::{self, LocalizedKey, MIN_SECRET_LEN},
    pdu::Buf,
    privacy::{KeyExtension, PrivProtocol, PrivacyProtocol},
    AuthErrorKind, Error, Result,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SecurityLevel {
    /// Authoritative engine not known yet.
    Discovering,
    NoAuthNoPriv,
    AuthNoPriv,
    AuthPriv,
}

impl SecurityLevel {
    pub fn is_authenticated(self) -> bool {
        matches!(self, SecurityLevel::AuthNoPriv | SecurityLevel::AuthPriv)
    }

    pub fn is_private(self) -> bool {
        self == SecurityLevel::AuthPriv
    }
}

/// Keys localized for the current engine. Owned by the caller and wiped on
/// drop.
#[derive(Debug, Clone, Default)]
pub struct UsmKeys {
    pub auth: Option<LocalizedKey>,
    pub privacy: Option<LocalizedKey>,
}

/// Security state of one manager/agent association.
///
/// Not meant to be shared between concurrent exchanges: encode and decode
/// use the parameter fields as scratch space.
pub struct SecurityParameters {
    engine_id: Vec<u8>,
    engine_boots: u32,
    engine_time: u32,
    security_name: Vec<u8>,
    auth_protocol: Option<AuthProtocol>,
    auth_secret: Zeroizing<Vec<u8>>,
    priv_protocol: Option<PrivProtocol>,
    priv_secret: Zeroizing<Vec<u8>>,
    key_extension: KeyExtension,
    privacy: Option<PrivacyProtocol>,
    auth_params: Vec<u8>,
    priv_params: Vec<u8>,
}

impl Default for SecurityParameters {
    fn default() -> Self {
        Self::new(b"")
    }
}

impl fmt::Debug for SecurityParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityParameters")
            .field("engine_id", &self.engine_id)
            .field("engine_boots", &self.engine_boots)
            .field("engine_time", &self.engine_time)
            .field("security_name", &String::from_utf8_lossy(&self.security_name))
            .field("auth_protocol", &self.auth_protocol)
            .field("priv_protocol", &self.priv_protocol)
            .field("key_extension", &self.key_extension)
            .field("auth_params", &self.auth_params)
            .field("priv_params", &self.priv_params)
            .finish_non_exhaustive()
    }
}

impl SecurityParameters {
    pub fn new(security_name: &[u8]) -> Self {
        Self {
            engine_id: Vec::new(),
            engine_boots: 0,
            engine_time: 0,
            security_name: security_name.to_vec(),
            auth_protocol: None,
            auth_secret: Zeroizing::new(Vec::new()),
            priv_protocol: None,
            priv_secret: Zeroizing::new(Vec::new()),
            key_extension: KeyExtension::default(),
            privacy: None,
            auth_params: Vec::new(),
            priv_params: Vec::new(),
        }
    }

    pub fn with_authentication(mut self, protocol: AuthProtocol, secret: &[u8]) -> Self {
        self.auth_protocol = Some(protocol);
        self.auth_secret = Zeroizing::new(secret.to_vec());
        self.rebuild_privacy();
        self
    }

    pub fn with_privacy(mut self, protocol: PrivProtocol, secret: &[u8]) -> Self {
        self.priv_protocol = Some(protocol);
        self.priv_secret = Zeroizing::new(secret.to_vec());
        self.rebuild_privacy();
        self
    }

    /// Extension used by AES when the localized key is too short.
    pub fn with_key_extension(mut self, key_extension: KeyExtension) -> Self {
        self.key_extension = key_extension;
        if let Some(privacy) = self.privacy.as_mut() {
            privacy.set_key_extension(key_extension);
        }
        self
    }

    /// Note: the engine id is the raw identifier bytes, not a hex string.
    pub fn with_engine_id(mut self, engine_id: &[u8]) -> Self {
        self.set_engine_id(engine_id);
        self
    }

    pub fn with_engine_boots_and_time(mut self, engine_boots: u32, engine_time: u32) -> Self {
        self.set_engine_boots_and_time(engine_boots, engine_time);
        self
    }

    pub fn set_engine_id(&mut self, engine_id: &[u8]) {
        self.engine_id = engine_id.to_vec();
    }

    pub fn set_engine_boots_and_time(&mut self, engine_boots: u32, engine_time: u32) {
        self.engine_boots = engine_boots;
        self.engine_time = engine_time;
    }

    fn rebuild_privacy(&mut self) {
        self.privacy = match (self.priv_protocol, self.auth_protocol) {
            (Some(protocol), Some(auth)) => {
                Some(PrivacyProtocol::new(protocol, auth).with_key_extension(self.key_extension))
            }
            _ => None,
        };
    }

    pub fn engine_id(&self) -> &[u8] {
        &self.engine_id
    }

    pub fn engine_boots(&self) -> u32 {
        self.engine_boots
    }

    pub fn engine_time(&self) -> u32 {
        self.engine_time
    }

    pub fn security_name(&self) -> &[u8] {
        &self.security_name
    }

    pub fn auth_protocol(&self) -> Option<AuthProtocol> {
        self.auth_protocol
    }

    pub fn priv_protocol(&self) -> Option<PrivProtocol> {
        self.priv_protocol
    }

    pub fn privacy(&self) -> Option<&PrivacyProtocol> {
        self.privacy.as_ref()
    }

    pub fn key_extension(&self) -> KeyExtension {
        self.key_extension
    }

    /// Current msgAuthenticationParameters: empty, a received tag or the tag
    /// from the last [`authenticate_outgoing`](Self::authenticate_outgoing).
    pub fn auth_params(&self) -> &[u8] {
        &self.auth_params
    }

    pub fn priv_params(&self) -> &[u8] {
        &self.priv_params
    }

    /// Privacy without authentication counts as NoAuthNoPriv here;
    /// [`validate`](Self::validate) rejects that combination.
    pub fn level(&self) -> SecurityLevel {
        if self.engine_id.is_empty() {
            return SecurityLevel::Discovering;
        }
        match (self.auth_protocol, self.privacy.is_some()) {
            (None, _) => SecurityLevel::NoAuthNoPriv,
            (Some(_), false) => SecurityLevel::AuthNoPriv,
            (Some(_), true) => SecurityLevel::AuthPriv,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.priv_protocol.is_some() && self.auth_protocol.is_none() {
            debug!(target: "snmp_usm::usm", "privacy selected without authentication");
            return Err(AuthErrorKind::PrivacyWithoutAuth.into());
        }
        if self.auth_protocol.is_some() {
            if self.security_name.is_empty() {
                return Err(AuthErrorKind::SecurityNameMissing.into());
            }
            check_secret(&self.auth_secret, AuthErrorKind::AuthSecretMissing)?;
        }
        if self.priv_protocol.is_some() {
            check_secret(&self.priv_secret, AuthErrorKind::PrivSecretMissing)?;
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Derives the keys for the current engine id.
    pub fn localize_keys(&self) -> Result<UsmKeys> {
        self.validate()?;
        if self.auth_protocol.is_some() && self.engine_id.is_empty() {
            return Err(AuthErrorKind::SecurityNotReady.into());
        }
        let auth = self
            .auth_protocol
            .map(|protocol| key::derive(protocol, &self.auth_secret, &self.engine_id))
            .transpose()?;
        let privacy = self
            .privacy
            .as_ref()
            .map(|privacy| privacy.localize_key(&self.priv_secret, &self.engine_id))
            .transpose()?;
        Ok(UsmKeys { auth, privacy })
    }

    /// Signs `message` (authentication field zeroed) and stores the tag as
    /// the authentication parameters. The message must be re-serialized, or
    /// finished through [`UnsignedMessage::finalize_signature`], to carry it.
    pub fn authenticate_outgoing(&mut self, material: KeyMaterial<'_>, message: &[u8]) -> Result<()> {
        let protocol = self
            .auth_protocol
            .ok_or(Error::AuthFailure(AuthErrorKind::SecurityNotProvided))?;
        self.auth_params = protocol.sign(material, message)?;
        Ok(())
    }

    /// `Ok(false)` when the tag does not match.
    pub fn authenticate_incoming(
        &self,
        material: KeyMaterial<'_>,
        claimed: &[u8],
        message: &[u8],
    ) -> Result<bool> {
        let protocol = self
            .auth_protocol
            .ok_or(Error::AuthFailure(AuthErrorKind::SecurityNotProvided))?;
        protocol.verify(material, claimed, message)
    }

    /// Encrypts a serialized ScopedPdu and keeps the privacy parameters for
    /// the next [`encode`](Self::encode).
    pub fn encrypt_scoped_pdu(&mut self, plaintext: &[u8], keys: &UsmKeys) -> Result<Vec<u8>> {
        let privacy = self
            .privacy
            .as_ref()
            .ok_or(Error::AuthFailure(AuthErrorKind::SecurityNotProvided))?;
        let key = keys
            .privacy
            .as_ref()
            .ok_or(Error::AuthFailure(AuthErrorKind::SecurityNotReady))?;
        let (ciphertext, params) =
            privacy.encrypt(plaintext, key.as_bytes(), self.engine_boots, self.engine_time)?;
        self.priv_params = params;
        Ok(ciphertext)
    }

    /// Decrypts with the privacy parameters of the last decoded header.
    pub fn decrypt_scoped_pdu(&self, ciphertext: &[u8], keys: &UsmKeys) -> Result<Vec<u8>> {
        self.decrypt_with(ciphertext, keys, self)
    }

    /// Decrypts with the engine counters and privacy parameters of `received`
    /// and the protocol configured here.
    pub(crate) fn decrypt_with(
        &self,
        ciphertext: &[u8],
        keys: &UsmKeys,
        received: &SecurityParameters,
    ) -> Result<Vec<u8>> {
        let privacy = self
            .privacy
            .as_ref()
            .ok_or(Error::AuthFailure(AuthErrorKind::SecurityNotProvided))?;
        let key = keys
            .privacy
            .as_ref()
            .ok_or(Error::AuthFailure(AuthErrorKind::SecurityNotReady))?;
        privacy.decrypt(
            ciphertext,
            key.as_bytes(),
            received.engine_boots,
            received.engine_time,
            &received.priv_params,
        )
    }

    /// Writes the USM block. An enabled but not yet computed tag is written
    /// as zeros of the tag length; privacy parameters are likewise sized to
    /// the active protocol.
    pub fn encode(&self, buf: &mut Buf) -> Result<()> {
        let level = self.level();
        let auth_params = match self.auth_protocol {
            Some(protocol) if level.is_authenticated() => {
                let tag_len = protocol.tag_len();
                if self.auth_params.is_empty() {
                    vec![0; tag_len]
                } else if self.auth_params.len() == tag_len {
                    self.auth_params.clone()
                } else {
                    return Err(Error::TagLength {
                        expected: tag_len,
                        actual: self.auth_params.len(),
                    });
                }
            }
            _ => Vec::new(),
        };
        let priv_params = match self.privacy.as_ref() {
            Some(privacy) if level.is_private() => {
                let params_len = privacy.spec().params_len;
                if self.priv_params.is_empty() {
                    vec![0; params_len]
                } else if self.priv_params.len() == params_len {
                    self.priv_params.clone()
                } else {
                    return Err(Error::InvalidPrivParams {
                        expected: params_len,
                        actual: self.priv_params.len(),
                    });
                }
            }
            _ => Vec::new(),
        };
        buf.push_constructed(asn1::TYPE_OCTETSTRING, |buf| {
            buf.push_sequence(|buf| {
                buf.push_octet_string(&priv_params);
                buf.push_octet_string(&auth_params);
                buf.push_octet_string(&self.security_name);
                buf.push_integer(self.engine_time.into());
                buf.push_integer(self.engine_boots.into());
                buf.push_octet_string(&self.engine_id);
            });
        });
        Ok(())
    }

    /// Reads the USM block at `offset` into this context and zeroes the
    /// authentication parameters inside `buf`, so that `buf` becomes the
    /// exact input the sender signed. The received tag is kept in
    /// [`auth_params`](Self::auth_params).
    ///
    /// Returns the offset just past the block.
    pub fn decode(&mut self, buf: &mut [u8], offset: usize) -> Result<usize> {
        let fields = UsmFields::parse(buf, offset).inspect_err(|e| {
            debug!(target: "snmp_usm::usm", offset, error = %e, "malformed USM block");
        })?;
        let engine_boots = u32::try_from(fields.engine_boots)?;
        let engine_time = u32::try_from(fields.engine_time)?;
        self.engine_id = fields.engine_id.to_vec();
        self.engine_boots = engine_boots;
        self.engine_time = engine_time;
        self.security_name = fields.security_name.to_vec();
        self.auth_params = fields.auth_params.to_vec();
        self.priv_params = fields.priv_params.to_vec();
        let auth_range = fields.auth_range.clone();
        let end = fields.end;
        buf[auth_range].fill(0);
        trace!(target: "snmp_usm::usm", auth_len = self.auth_params.len(), priv_len = self.priv_params.len(), "USM block decoded");
        Ok(end)
    }

    /// Byte range of the authentication parameters of the USM block at
    /// `offset`.
    pub fn auth_params_range(bytes: &[u8], offset: usize) -> Result<ops::Range<usize>> {
        UsmFields::parse(bytes, offset).map(|fields| fields.auth_range)
    }

    /// Signs a message built with a zeroed authentication field. Messages
    /// without authentication pass through unchanged.
    pub fn sign_message(&mut self, unsigned: UnsignedMessage, keys: &UsmKeys) -> Result<SignedMessage> {
        if !self.level().is_authenticated() {
            return unsigned.finalize_signature(&[]);
        }
        let key = keys
            .auth
            .as_ref()
            .ok_or(Error::AuthFailure(AuthErrorKind::SecurityNotReady))?;
        self.authenticate_outgoing(KeyMaterial::Key(key.as_bytes()), unsigned.as_bytes())?;
        unsigned.finalize_signature(&self.auth_params)
    }

    /// Takes the engine counters and parameter fields of a decoded header.
    /// The engine id is only taken when none is configured; engine boots
    /// never decreases.
    pub(crate) fn adopt_received(&mut self, received: &SecurityParameters) {
        if self.engine_id.is_empty() {
            self.engine_id = received.engine_id.clone();
        }
        if received.engine_boots >= self.engine_boots {
            self.engine_boots = received.engine_boots;
            self.engine_time = received.engine_time;
        }
        self.auth_params = received.auth_params.clone();
        self.priv_params = received.priv_params.clone();
    }

    /// Clears the per-message parameter fields.
    pub fn clear_params(&mut self) {
        self.auth_params.clear();
        self.priv_params.clear();
    }

    /// Forgets the authoritative engine, keeping the user configuration.
    pub fn reset_engine(&mut self) {
        self.engine_id.clear();
        self.engine_boots = 0;
        self.engine_time = 0;
        self.clear_params();
    }

    /// Clears every field, configuration included.
    pub fn reset(&mut self) {
        *self = SecurityParameters::default();
    }
}

fn check_secret(secret: &[u8], missing: AuthErrorKind) -> Result<()> {
    if secret.is_empty() {
        return Err(missing.into());
    }
    if secret.len() < MIN_SECRET_LEN {
        return Err(Error::WeakSecret {
            len: secret.len(),
            min: MIN_SECRET_LEN,
        });
    }
    Ok(())
}

struct UsmFields<'a> {
    engine_id: &'a [u8],
    engine_boots: i64,
    engine_time: i64,
    security_name: &'a [u8],
    auth_params: &'a [u8],
    auth_range: ops::Range<usize>,
    priv_params: &'a [u8],
    end: usize,
}

impl<'a> UsmFields<'a> {
    fn parse(bytes: &'a [u8], offset: usize) -> Result<Self> {
        let mut rdr = AsnReader::at(bytes, offset)?;
        let mut wrapper = rdr.read_nested(asn1::TYPE_OCTETSTRING)?;
        let end = rdr.position();
        wrapper.read_asn_sequence(|seq| {
            let engine_id = seq.read_asn_octetstring()?;
            let engine_boots = seq.read_asn_integer()?;
            let engine_time = seq.read_asn_integer()?;
            let security_name = seq.read_asn_octetstring()?;
            let (auth_start, auth_params) = seq.read_raw_positioned(asn1::TYPE_OCTETSTRING)?;
            let priv_params = seq.read_asn_octetstring()?;
            Ok(UsmFields {
                engine_id,
                engine_boots,
                engine_time,
                security_name,
                auth_params,
                auth_range: auth_start..auth_start + auth_params.len(),
                priv_params,
                end,
            })
        })
    }
}

/// A serialized message whose authentication field is still zero.
#[derive(Debug, Clone)]
pub struct UnsignedMessage {
    bytes: Vec<u8>,
    auth_params: ops::Range<usize>,
}

impl UnsignedMessage {
    pub fn new(bytes: Vec<u8>, auth_params: ops::Range<usize>) -> Result<Self> {
        if auth_params.end > bytes.len() || auth_params.start > auth_params.end {
            return Err(Error::InvalidBuffer {
                len: bytes.len(),
                block: auth_params.len(),
            });
        }
        Ok(Self { bytes, auth_params })
    }

    /// The bytes to sign.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn auth_params_range(&self) -> ops::Range<usize> {
        self.auth_params.clone()
    }

    /// Places `tag` into the authentication field. The tag must fill the
    /// field exactly.
    pub fn finalize_signature(mut self, tag: &[u8]) -> Result<SignedMessage> {
        if tag.len() != self.auth_params.len() {
            return Err(Error::TagLength {
                expected: self.auth_params.len(),
                actual: tag.len(),
            });
        }
        self.bytes[self.auth_params.clone()].copy_from_slice(tag);
        Ok(SignedMessage(self.bytes))
    }
}

/// A message ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage(Vec<u8>);

impl SignedMessage {
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl ops::Deref for SignedMessage {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGINE_ID: [u8; 8] = [0x80, 0, 0, 0, 1, 2, 3, 4];

    #[test]
    fn key_extension_keeps_salt_counter() {
        let security = SecurityParameters::new(b"user")
            .with_authentication(AuthProtocol::Sha1, b"authpassword")
            .with_privacy(PrivProtocol::Aes256, b"privpassword")
            .with_engine_id(&ENGINE_ID);
        let keys = security.localize_keys().unwrap();
        let mut security = security;
        security.encrypt_scoped_pdu(b"first", &keys).unwrap();
        let first = u64::from_be_bytes(security.priv_params().try_into().unwrap());
        let mut security = security.with_key_extension(KeyExtension::Blumenthal);
        assert_eq!(
            security.privacy().map(PrivacyProtocol::key_extension),
            Some(KeyExtension::Blumenthal)
        );
        security.encrypt_scoped_pdu(b"second", &keys).unwrap();
        let second = u64::from_be_bytes(security.priv_params().try_into().unwrap());
        assert_eq!(second, if first == u64::MAX { 1 } else { first + 1 });
    }

    #[test]
    fn adopted_boots_never_decrease() {
        let mut security = SecurityParameters::new(b"user")
            .with_engine_id(&ENGINE_ID)
            .with_engine_boots_and_time(5, 500);
        let older = SecurityParameters::new(b"user")
            .with_engine_id(&ENGINE_ID)
            .with_engine_boots_and_time(1, 900);
        security.adopt_received(&older);
        assert_eq!((security.engine_boots(), security.engine_time()), (5, 500));
        let newer = older.with_engine_boots_and_time(6, 3);
        security.adopt_received(&newer);
        assert_eq!((security.engine_boots(), security.engine_time()), (6, 3));
    }

    #[test]
    fn levels() {
        let params = SecurityParameters::new(b"user");
        assert_eq!(params.level(), SecurityLevel::Discovering);
        let params = params.with_engine_id(&ENGINE_ID);
        assert_eq!(params.level(), SecurityLevel::NoAuthNoPriv);
        let params = params.with_authentication(AuthProtocol::Sha1, b"authpassword");
        assert_eq!(params.level(), SecurityLevel::AuthNoPriv);
        let params = params.with_privacy(PrivProtocol::Aes128, b"privpassword");
        assert_eq!(params.level(), SecurityLevel::AuthPriv);
        assert!(params.is_valid());
    }

    #[test]
    fn validation() {
        let params = SecurityParameters::new(b"user").with_privacy(PrivProtocol::Aes128, b"privpassword");
        assert_eq!(
            params.validate(),
            Err(Error::AuthFailure(AuthErrorKind::PrivacyWithoutAuth))
        );
        let params = SecurityParameters::new(b"").with_authentication(AuthProtocol::Md5, b"authpassword");
        assert_eq!(
            params.validate(),
            Err(Error::AuthFailure(AuthErrorKind::SecurityNameMissing))
        );
        let params = SecurityParameters::new(b"user").with_authentication(AuthProtocol::Md5, b"");
        assert_eq!(
            params.validate(),
            Err(Error::AuthFailure(AuthErrorKind::AuthSecretMissing))
        );
        let params = SecurityParameters::new(b"user")
            .with_authentication(AuthProtocol::Md5, b"authpassword")
            .with_privacy(PrivProtocol::Des, b"");
        assert_eq!(
            params.validate(),
            Err(Error::AuthFailure(AuthErrorKind::PrivSecretMissing))
        );
        let params = SecurityParameters::new(b"user").with_authentication(AuthProtocol::Md5, b"short");
        assert_eq!(params.validate(), Err(Error::WeakSecret { len: 5, min: 8 }));
        assert!(SecurityParameters::new(b"").is_valid());
    }

    #[test]
    fn encode_placeholders() {
        let params = SecurityParameters::new(b"u")
            .with_authentication(AuthProtocol::Sha512, b"authpassword")
            .with_privacy(PrivProtocol::Aes256, b"privpassword")
            .with_engine_id(&ENGINE_ID)
            .with_engine_boots_and_time(1, 2);
        let mut buf = Buf::default();
        params.encode(&mut buf).unwrap();
        let mut decoded = SecurityParameters::default();
        let mut bytes = buf.to_vec();
        let end = decoded.decode(&mut bytes, 0).unwrap();
        assert_eq!(end, bytes.len());
        assert_eq!(decoded.auth_params(), &[0; 48][..]);
        assert_eq!(decoded.priv_params(), &[0; 8][..]);
        assert_eq!(decoded.engine_id(), &ENGINE_ID);
        assert_eq!(decoded.engine_boots(), 1);
        assert_eq!(decoded.engine_time(), 2);
        assert_eq!(decoded.security_name(), b"u");
    }

    #[test]
    fn discovery_block_is_empty() {
        let mut buf = Buf::default();
        SecurityParameters::new(b"")
            .with_authentication(AuthProtocol::Md5, b"authpassword")
            .encode(&mut buf)
            .unwrap();
        assert_eq!(
            &buf[..],
            &[0x04, 0x10, 0x30, 0x0e, 0x04, 0x00, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x04, 0x00, 0x04, 0x00, 0x04, 0x00]
        );
    }

    #[test]
    fn decode_zeroes_tag_in_place() {
        let mut params = SecurityParameters::new(b"user")
            .with_authentication(AuthProtocol::Md5, b"authpassword")
            .with_engine_id(&ENGINE_ID);
        let tag = [0xabu8; 12];
        params.auth_params = tag.to_vec();
        let mut buf = Buf::default();
        params.encode(&mut buf).unwrap();
        let mut bytes = vec![0xff, 0xff];
        bytes.extend_from_slice(&buf);
        let range = SecurityParameters::auth_params_range(&bytes, 2).unwrap();
        assert_eq!(&bytes[range.clone()], &tag);

        let mut decoded = SecurityParameters::default();
        decoded.decode(&mut bytes, 2).unwrap();
        assert_eq!(decoded.auth_params(), &tag);
        assert!(bytes[range].iter().all(|b| *b == 0));
        assert_eq!(&bytes[..2], &[0xff, 0xff]);
    }

    #[test]
    fn decode_rejects_bad_tags() {
        let mut bytes = [0x30, 0x00];
        let err = SecurityParameters::default().decode(&mut bytes, 0).unwrap_err();
        assert_eq!(
            err,
            Error::AsnWrongType {
                expected: asn1::TYPE_OCTETSTRING,
                found: 0x30
            }
        );
        let mut bytes = [0x04, 0x10, 0x30, 0x0e];
        let err = SecurityParameters::default().decode(&mut bytes, 0).unwrap_err();
        assert_eq!(
            err,
            Error::Truncated {
                declared: 16,
                remaining: 2
            }
        );
        assert!(err.is_decoding());
    }

    #[test]
    fn finalize_requires_exact_tag() {
        let unsigned = UnsignedMessage::new(vec![0; 20], 4..16).unwrap();
        assert_eq!(
            unsigned.clone().finalize_signature(&[1; 11]).unwrap_err(),
            Error::TagLength {
                expected: 12,
                actual: 11
            }
        );
        let signed = unsigned.finalize_signature(&[1; 12]).unwrap();
        assert_eq!(&signed[4..16], &[1; 12]);
        assert_eq!(&signed[..4], &[0; 4]);
        assert!(UnsignedMessage::new(vec![0; 4], 2..8).is_err());
    }

    #[test]
    fn reset_variants() {
        let mut params = SecurityParameters::new(b"user")
            .with_authentication(AuthProtocol::Sha1, b"authpassword")
            .with_engine_id(&ENGINE_ID)
            .with_engine_boots_and_time(5, 6);
        params.reset_engine();
        assert!(params.engine_id().is_empty());
        assert_eq!(params.engine_boots(), 0);
        assert_eq!(params.auth_protocol(), Some(AuthProtocol::Sha1));
        params.reset();
        assert_eq!(params.auth_protocol(), None);
        assert!(params.security_name().is_empty());
    }

    #[test]
    fn keys_need_engine() {
        let params = SecurityParameters::new(b"user").with_authentication(AuthProtocol::Md5, b"authpassword");
        assert_eq!(
            params.localize_keys().unwrap_err(),
            Error::AuthFailure(AuthErrorKind::SecurityNotReady)
        );
        let keys = params.with_engine_id(&ENGINE_ID).localize_keys().unwrap();
        assert_eq!(keys.auth.map(|k| k.len()), Some(16));
        assert!(keys.privacy.is_none());
    }
}
