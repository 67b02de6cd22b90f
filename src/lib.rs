#![allow(unknown_lints, clippy::doc_markdown)]
//! SNMPv3 User-based Security Model (RFC 3414, RFC 3826, RFC 7860).
//!
//! The crate covers the security layer of an SNMPv3 message:
//!
//! - password-to-key localization ([`key`])
//! - HMAC-MD5-96, HMAC-SHA-96 and HMAC-SHA-512-384 authentication ([`auth`])
//! - DES-CBC, 3DES-EDE-CBC and AES-CFB-128 privacy ([`privacy`])
//! - the USM header and its sign/verify/encrypt/decrypt orchestration ([`usm`])
//! - SNMPv3 message framing around the USM block ([`v3`])
//!
//! PDU contents are treated as opaque BER; building and parsing varbinds is
//! left to the caller.
//!
//! ```no_run
//! use snmp_usm::{v3, AuthProtocol, PrivProtocol, ScopedPdu, SecurityParameters};
//!
//! # fn main() -> snmp_usm::Result<()> {
//! let mut security = SecurityParameters::new(b"admin")
//!     .with_authentication(AuthProtocol::Sha1, b"authpassword")
//!     .with_privacy(PrivProtocol::Aes128, b"privpassword")
//!     .with_engine_id(&[0x80, 0x00, 0x1f, 0x88, 0x04])
//!     .with_engine_boots_and_time(3, 1200);
//! security.validate()?;
//! let keys = security.localize_keys()?;
//! let scoped = ScopedPdu::new(security.engine_id(), b"", vec![0xa0, 0x00]);
//! let message = v3::encode_message(1, v3::DEFAULT_MAX_SIZE, true, &mut security, &keys, &scoped)?;
//! # let _ = message;
//! # Ok(())
//! # }
//! ```

pub mod asn1;
pub mod auth;
pub mod key;
pub mod pdu;
pub mod privacy;
pub mod usm;
pub mod v3;


pub use auth::{AuthDigestSpec, AuthProtocol, KeyMaterial};
pub use key::{LocalizedKey, MIN_SECRET_LEN};
pub use pdu::{Buf, ScopedPdu};
pub use privacy::{KeyExtension, PrivProtocol, PrivacyProtocol, PrivacySpec, SaltCounter};
pub use usm::{SecurityLevel, SecurityParameters, SignedMessage, UnsignedMessage, UsmKeys};

pub mod snmp {
    pub const VERSION_3: i64 = 3;
    pub const SECURITY_MODEL_USM: i64 = 3;

    pub const MSG_RESPONSE: u8 = 0xa2;

    pub const V3_MSG_FLAGS_AUTH: u8 = 0x01;
    pub const V3_MSG_FLAGS_PRIVACY: u8 = 0x02;
    pub const V3_MSG_FLAGS_REPORTABLE: u8 = 0x04;
}

/// Reasons a message or a security context was refused.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum AuthErrorKind {
    #[error("Privacy requires authentication")]
    PrivacyWithoutAuth,
    #[error("Security name not provided")]
    SecurityNameMissing,
    #[error("Authentication secret not provided")]
    AuthSecretMissing,
    #[error("Privacy secret not provided")]
    PrivSecretMissing,
    #[error("Security parameters not ready")]
    SecurityNotReady,
    #[error("Security parameters not provided")]
    SecurityNotProvided,
    #[error("Unsupported USM")]
    UnsupportedUSM,
    #[error("Username mismatch")]
    UsernameMismatch,
    #[error("Engine ID mismatch")]
    EngineIdMismatch,
    #[error("Engine boots counter mismatch")]
    EngineBootsMismatch,
    #[error("HMAC signature mismatch")]
    SignatureMismatch,
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Not an encrypted reply")]
    ReplyNotEncrypted,
}

/// USM error type.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum Error {
    /// Secret shorter than [`MIN_SECRET_LEN`].
    #[error("secret is {len} bytes, at least {min} required")]
    WeakSecret { len: usize, min: usize },
    /// Key shorter than the protocol minimum.
    #[error("key is {actual} bytes, at least {expected} required")]
    ShortKey { expected: usize, actual: usize },
    /// Buffer not aligned to the cipher block, or a range outside the buffer.
    #[error("buffer of {len} bytes does not fit {block}-byte blocks")]
    InvalidBuffer { len: usize, block: usize },
    /// Authentication parameters of the wrong length for the protocol.
    #[error("authentication parameters are {actual} bytes, expected {expected}")]
    TagLength { expected: usize, actual: usize },
    /// Privacy parameters of the wrong length.
    #[error("privacy parameters are {actual} bytes, expected {expected}")]
    InvalidPrivParams { expected: usize, actual: usize },
    /// The block cipher rejected its input.
    #[error("privacy operation failed: {0}")]
    PrivacyOperation(String),
    /// The digest backend rejected its input.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// ASN.1 parsing error.
    #[error("ASN.1 parsing error")]
    AsnParse,
    /// ASN.1 invalid length.
    #[error("ASN.1 invalid length")]
    AsnInvalidLen,
    /// ASN.1 wrong type.
    #[error("ASN.1 wrong type: expected {expected:#04x}, found {found:#04x}")]
    AsnWrongType { expected: u8, found: u8 },
    /// ASN.1 unexpected end of data.
    #[error("ASN.1 unexpected end of data")]
    AsnEof,
    /// ASN.1 integer overflow.
    #[error("ASN.1 integer overflow")]
    AsnIntOverflow,
    /// A declared length runs past the end of the buffer.
    #[error("truncated message: {declared} bytes declared, {remaining} remaining")]
    Truncated { declared: usize, remaining: usize },

    /// Message version is not SNMPv3.
    #[error("Unsupported SNMP version")]
    UnsupportedVersion,
    /// Value out of range.
    #[error("Value out of range")]
    ValueOutOfRange,
    /// Protocol name not recognized.
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
    #[error("Authentication failure: {0}")]
    AuthFailure(AuthErrorKind),
}

impl Error {
    /// Malformed or short wire data.
    pub fn is_decoding(&self) -> bool {
        matches!(
            self,
            Error::AsnParse
                | Error::AsnInvalidLen
                | Error::AsnWrongType { .. }
                | Error::AsnEof
                | Error::AsnIntOverflow
                | Error::Truncated { .. }
        )
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Error {
        Error::ValueOutOfRange
    }
}

impl From<AuthErrorKind> for Error {
    fn from(kind: AuthErrorKind) -> Error {
        Error::AuthFailure(kind)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
