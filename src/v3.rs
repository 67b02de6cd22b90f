//! SNMPv3 message framing around the USM block (RFC 3412 §6).
//!
//! ```text
//! SNMPv3Message ::= SEQUENCE {
//!     msgVersion            INTEGER (3),
//!     msgGlobalData         HeaderData,
//!     msgSecurityParameters OCTET STRING,
//!     msgData               ScopedPduData
//! }
//! ScopedPduData ::= CHOICE {
//!     plaintext    ScopedPDU,
//!     encryptedPDU OCTET STRING
//! }
//! ```

use tracing::{debug, trace};

use crate::{
    asn1::{self, AsnReader},
    auth::KeyMaterial,
    pdu::{Buf, ScopedPdu},
    snmp::{self, V3_MSG_FLAGS_AUTH, V3_MSG_FLAGS_PRIVACY, V3_MSG_FLAGS_REPORTABLE},
    usm::{SecurityLevel, SecurityParameters, UnsignedMessage, UsmKeys},
    AuthErrorKind, Error, Result,
};

pub const DEFAULT_MAX_SIZE: i32 = 65507;
/// Smallest msgMaxSize an engine may announce.
pub const MIN_MAX_SIZE: i32 = 484;

/// msgGlobalData.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderData {
    pub msg_id: i32,
    pub max_size: i32,
    pub flags: u8,
    pub security_model: i64,
}

impl HeaderData {
    pub fn new(msg_id: i32, max_size: i32, flags: u8) -> Self {
        Self {
            msg_id,
            max_size,
            flags,
            security_model: snmp::SECURITY_MODEL_USM,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.flags & V3_MSG_FLAGS_AUTH != 0
    }

    pub fn is_private(&self) -> bool {
        self.flags & V3_MSG_FLAGS_PRIVACY != 0
    }

    pub fn is_reportable(&self) -> bool {
        self.flags & V3_MSG_FLAGS_REPORTABLE != 0
    }

    fn encode(&self, buf: &mut Buf) {
        buf.push_sequence(|buf| {
            buf.push_integer(self.security_model);
            buf.push_octet_string(&[self.flags]);
            buf.push_integer(self.max_size.into());
            buf.push_integer(self.msg_id.into());
        });
    }

    fn decode(rdr: &mut AsnReader<'_>) -> Result<Self> {
        rdr.read_asn_sequence(|rdr| {
            let msg_id = i32::try_from(rdr.read_asn_integer()?)?;
            let max_size = i32::try_from(rdr.read_asn_integer()?)?;
            let flags = rdr
                .read_asn_octetstring()?
                .first()
                .copied()
                .unwrap_or_default();
            let security_model = rdr.read_asn_integer()?;
            Ok(HeaderData {
                msg_id,
                max_size,
                flags,
                security_model,
            })
        })
    }
}

/// A decoded, verified and decrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub header: HeaderData,
    pub security_level: SecurityLevel,
    pub scoped_pdu: ScopedPdu,
}

fn check_header_values(msg_id: i32, max_size: i32) -> Result<()> {
    if msg_id < 0 || max_size < MIN_MAX_SIZE {
        return Err(Error::ValueOutOfRange);
    }
    Ok(())
}

fn assemble(header: &HeaderData, usm: &Buf, scoped_pdu: &[u8], encrypted: bool) -> Vec<u8> {
    let mut buf = Buf::default();
    buf.push_sequence(|buf| {
        if encrypted {
            buf.push_octet_string(scoped_pdu);
        } else {
            buf.push_chunk(scoped_pdu);
        }
        buf.push_chunk(usm);
        header.encode(buf);
        buf.push_integer(snmp::VERSION_3);
    });
    buf.to_vec()
}

/// Offset of msgSecurityParameters.
fn usm_offset(bytes: &[u8]) -> Result<usize> {
    let mut msg = AsnReader::from_bytes(bytes).read_nested(asn1::TYPE_SEQUENCE)?;
    msg.read_asn_integer()?;
    msg.read_raw(asn1::TYPE_SEQUENCE)?;
    Ok(msg.position())
}

/// First phase of an outgoing message: encrypts the ScopedPdu when the
/// context is AuthPriv and serializes everything with a zeroed
/// authentication field.
pub fn prepare_message(
    msg_id: i32,
    max_size: i32,
    reportable: bool,
    security: &mut SecurityParameters,
    keys: &UsmKeys,
    scoped_pdu: &ScopedPdu,
) -> Result<UnsignedMessage> {
    check_header_values(msg_id, max_size)?;
    security.validate()?;
    let level = security.level();
    if level == SecurityLevel::Discovering {
        return Err(Error::AuthFailure(AuthErrorKind::SecurityNotReady));
    }
    security.clear_params();

    let mut flags = if reportable { V3_MSG_FLAGS_REPORTABLE } else { 0 };
    if level.is_authenticated() {
        flags |= V3_MSG_FLAGS_AUTH;
    }
    let mut payload = scoped_pdu.to_bytes();
    if level.is_private() {
        flags |= V3_MSG_FLAGS_PRIVACY;
        payload = security.encrypt_scoped_pdu(&payload, keys)?;
    }

    let mut usm = Buf::default();
    security.encode(&mut usm)?;
    let header = HeaderData::new(msg_id, max_size, flags);
    let bytes = assemble(&header, &usm, &payload, level.is_private());
    let auth_params = SecurityParameters::auth_params_range(&bytes, usm_offset(&bytes)?)?;
    trace!(target: "snmp_usm::v3", msg_id, ?level, len = bytes.len(), "message prepared");
    UnsignedMessage::new(bytes, auth_params)
}

/// Builds a complete outgoing message, signed when the context
/// authenticates.
pub fn encode_message(
    msg_id: i32,
    max_size: i32,
    reportable: bool,
    security: &mut SecurityParameters,
    keys: &UsmKeys,
    scoped_pdu: &ScopedPdu,
) -> Result<Vec<u8>> {
    let unsigned = prepare_message(msg_id, max_size, reportable, security, keys, scoped_pdu)?;
    security
        .sign_message(unsigned, keys)
        .map(|signed| signed.into_bytes())
}

/// Engine discovery request: reportable, noAuthNoPriv, every USM field
/// empty.
pub fn encode_discovery(msg_id: i32, max_size: i32, scoped_pdu: &ScopedPdu) -> Result<Vec<u8>> {
    check_header_values(msg_id, max_size)?;
    let mut usm = Buf::default();
    SecurityParameters::default().encode(&mut usm)?;
    let header = HeaderData::new(msg_id, max_size, V3_MSG_FLAGS_REPORTABLE);
    Ok(assemble(&header, &usm, &scoped_pdu.to_bytes(), false))
}

/// Parses an incoming message against the configured context.
///
/// The authentication parameters inside `buf` are zeroed as a side effect.
/// The context is only updated once the whole message is accepted: it then
/// adopts the sender's engine id if none was configured, and its engine
/// boots and time unless boots would go backwards. An unauthenticated
/// message is only accepted when the context does not authenticate or does
/// not know its engine yet. Authenticated messages from an earlier boot
/// cycle are rejected.
pub fn decode_message(
    buf: &mut [u8],
    security: &mut SecurityParameters,
    keys: Option<&UsmKeys>,
) -> Result<IncomingMessage> {
    let (header, usm_offset) = {
        let mut msg = AsnReader::from_bytes(buf).read_nested(asn1::TYPE_SEQUENCE)?;
        let version = msg.read_asn_integer()?;
        if version != snmp::VERSION_3 {
            debug!(target: "snmp_usm::v3", version, "not an SNMPv3 message");
            return Err(Error::UnsupportedVersion);
        }
        (HeaderData::decode(&mut msg)?, msg.position())
    };
    if header.security_model != snmp::SECURITY_MODEL_USM {
        debug!(target: "snmp_usm::v3", model = header.security_model, "unsupported security model");
        return Err(Error::AuthFailure(AuthErrorKind::UnsupportedUSM));
    }
    if header.is_private() && !header.is_authenticated() {
        return Err(Error::AuthFailure(AuthErrorKind::PrivacyWithoutAuth));
    }

    let mut received = SecurityParameters::default();
    let pdu_offset = received.decode(buf, usm_offset)?;

    let engine_unknown = security.engine_id().is_empty();
    // unauthenticated reports may carry an empty engine id
    if !engine_unknown
        && received.engine_id() != security.engine_id()
        && (header.is_authenticated() || !received.engine_id().is_empty())
    {
        debug!(target: "snmp_usm::v3", "engine id mismatch");
        return Err(Error::AuthFailure(AuthErrorKind::EngineIdMismatch));
    }

    let security_level = if header.is_authenticated() {
        if security.auth_protocol().is_none() {
            return Err(Error::AuthFailure(AuthErrorKind::SecurityNotProvided));
        }
        if received.security_name() != security.security_name() {
            debug!(target: "snmp_usm::v3", "username mismatch");
            return Err(Error::AuthFailure(AuthErrorKind::UsernameMismatch));
        }
        let key = keys
            .and_then(|keys| keys.auth.as_ref())
            .ok_or(Error::AuthFailure(AuthErrorKind::SecurityNotReady))?;
        let verified = security.authenticate_incoming(
            KeyMaterial::Key(key.as_bytes()),
            received.auth_params(),
            buf,
        )?;
        if !verified {
            return Err(Error::AuthFailure(AuthErrorKind::SignatureMismatch));
        }
        if !engine_unknown && received.engine_boots() < security.engine_boots() {
            debug!(
                target: "snmp_usm::v3",
                received = received.engine_boots(),
                known = security.engine_boots(),
                "engine boots went backwards"
            );
            return Err(Error::AuthFailure(AuthErrorKind::EngineBootsMismatch));
        }
        if header.is_private() {
            SecurityLevel::AuthPriv
        } else {
            SecurityLevel::AuthNoPriv
        }
    } else {
        // only discovery may skip authentication for an authenticating user
        if security.auth_protocol().is_some() && !engine_unknown {
            debug!(target: "snmp_usm::v3", "unauthenticated message for an authenticated user");
            return Err(Error::AuthFailure(AuthErrorKind::NotAuthenticated));
        }
        SecurityLevel::NoAuthNoPriv
    };

    let scoped_pdu = {
        let mut rdr = AsnReader::at(buf, pdu_offset)?;
        if header.is_private() {
            let keys = keys.ok_or(Error::AuthFailure(AuthErrorKind::SecurityNotReady))?;
            let encrypted = rdr.read_asn_octetstring()?;
            let plaintext = security.decrypt_with(encrypted, keys, &received)?;
            ScopedPdu::decode(&plaintext)?
        } else {
            ScopedPdu::decode(rdr.read_tlv()?)?
        }
    };
    if security.privacy().is_some()
        && !header.is_private()
        && scoped_pdu.data.first() == Some(&snmp::MSG_RESPONSE)
    {
        debug!(target: "snmp_usm::v3", "plaintext response for a privacy user");
        return Err(Error::AuthFailure(AuthErrorKind::ReplyNotEncrypted));
    }
    security.adopt_received(&received);
    trace!(target: "snmp_usm::v3", msg_id = header.msg_id, ?security_level, "message decoded");
    Ok(IncomingMessage {
        header,
        security_level,
        scoped_pdu,
    })
}
