//! Privacy protocols: DES-CBC (RFC 3414 §8), 3DES-EDE-CBC
//! (draft-reeder-snmpv3-usm-3desede) and AES-CFB-128 (RFC 3826, with the
//! 192/256-bit variants of draft-blumenthal-aes-usm).

use std::{fmt, str::FromStr};

use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cfb_mode::cipher::AsyncStreamCipher;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, trace};

use crate::{
    auth::AuthProtocol,
    key::{self, LocalizedKey},
    Error, Result,
};

const PRIV_PARAMS_LEN: usize = 8;
const CBC_BLOCK_LEN: usize = 8;
const AES_BLOCK_LEN: usize = 16;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PrivProtocol {
    Des,
    TripleDes,
    Aes128,
    Aes192,
    Aes256,
}

/// Fixed parameters of a privacy protocol.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PrivacySpec {
    pub protocol: PrivProtocol,
    /// Localized key bytes the protocol consumes.
    pub min_key_len: usize,
    /// Longer keys are truncated to this length.
    pub max_key_len: usize,
    /// Length of msgPrivacyParameters.
    pub params_len: usize,
    /// CBC variants pad to a multiple of this; CFB output length equals input.
    pub block_len: usize,
}

impl PrivProtocol {
    pub const fn spec(self) -> PrivacySpec {
        let (key_len, block_len) = match self {
            PrivProtocol::Des => (16, CBC_BLOCK_LEN),
            PrivProtocol::TripleDes => (32, CBC_BLOCK_LEN),
            PrivProtocol::Aes128 => (16, AES_BLOCK_LEN),
            PrivProtocol::Aes192 => (24, AES_BLOCK_LEN),
            PrivProtocol::Aes256 => (32, AES_BLOCK_LEN),
        };
        PrivacySpec {
            protocol: self,
            min_key_len: key_len,
            max_key_len: key_len,
            params_len: PRIV_PARAMS_LEN,
            block_len,
        }
    }

    pub const fn key_len(self) -> usize {
        self.spec().min_key_len
    }

    pub const fn is_cbc(self) -> bool {
        matches!(self, PrivProtocol::Des | PrivProtocol::TripleDes)
    }

    /// Tells if a key localized with `auth` is too short for this protocol.
    pub const fn needs_extension(self, auth: AuthProtocol) -> bool {
        auth.digest_len() < self.key_len()
    }

    fn salt_max(self) -> u64 {
        if self.is_cbc() {
            u64::from(u32::MAX)
        } else {
            u64::MAX
        }
    }
}

impl FromStr for PrivProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "des" => Ok(PrivProtocol::Des),
            "3des" | "tripledes" => Ok(PrivProtocol::TripleDes),
            "aes" | "aes128" => Ok(PrivProtocol::Aes128),
            "aes192" => Ok(PrivProtocol::Aes192),
            "aes256" => Ok(PrivProtocol::Aes256),
            _ => Err(Error::UnknownProtocol(s.to_owned())),
        }
    }
}

impl fmt::Display for PrivProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PrivProtocol::Des => "DES",
            PrivProtocol::TripleDes => "3DES",
            PrivProtocol::Aes128 => "AES128",
            PrivProtocol::Aes192 => "AES192",
            PrivProtocol::Aes256 => "AES256",
        })
    }
}

/// How an AES key is lengthened when the localized key is too short.
///
/// TripleDES always uses its own extension.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum KeyExtension {
    /// Re-localize the previous output (draft-reeder-snmpv3-usm-3desede).
    #[default]
    Reeder,
    /// Append `H(key so far)` (draft-blumenthal-aes-usm-04, net-snmp).
    Blumenthal,
}

/// Per-instance salt source.
///
/// Starts at a random value in `1..=max`, advances by one per call and wraps
/// from `max` back to 1. Zero is never produced.
pub struct SaltCounter {
    value: Mutex<u64>,
    max: u64,
}

impl SaltCounter {
    pub fn new(max: u64) -> Self {
        let max = max.max(1);
        let start = rand::rng().random_range(1..=max);
        Self::starting_at(start, max)
    }

    pub fn starting_at(value: u64, max: u64) -> Self {
        let max = max.max(1);
        let value = if value == 0 || value > max { 1 } else { value };
        Self {
            value: Mutex::new(value),
            max,
        }
    }

    pub fn next(&self) -> u64 {
        let mut value = self.value.lock();
        let current = *value;
        *value = if current >= self.max { 1 } else { current + 1 };
        current
    }
}

impl fmt::Debug for SaltCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaltCounter").field("max", &self.max).finish()
    }
}

/// A privacy protocol bound to the authentication protocol it is localized
/// with, owning its salt counter.
///
/// `encrypt` takes `&self`; one instance may serve concurrent callers and
/// every call still gets a distinct salt.
#[derive(Debug)]
pub struct PrivacyProtocol {
    protocol: PrivProtocol,
    auth_protocol: AuthProtocol,
    key_extension: KeyExtension,
    salt: SaltCounter,
}

impl PrivacyProtocol {
    pub fn new(protocol: PrivProtocol, auth_protocol: AuthProtocol) -> Self {
        Self {
            protocol,
            auth_protocol,
            key_extension: KeyExtension::default(),
            salt: SaltCounter::new(protocol.salt_max()),
        }
    }

    pub fn with_key_extension(mut self, key_extension: KeyExtension) -> Self {
        self.key_extension = key_extension;
        self
    }

    pub fn set_key_extension(&mut self, key_extension: KeyExtension) {
        self.key_extension = key_extension;
    }

    /// Replaces the salt counter, e.g. one resumed from a known value.
    pub fn with_salt(mut self, salt: SaltCounter) -> Self {
        self.salt = salt;
        self
    }

    pub fn protocol(&self) -> PrivProtocol {
        self.protocol
    }

    pub fn auth_protocol(&self) -> AuthProtocol {
        self.auth_protocol
    }

    pub fn key_extension(&self) -> KeyExtension {
        self.key_extension
    }

    pub fn spec(&self) -> PrivacySpec {
        self.protocol.spec()
    }

    /// Localizes `secret` to `engine_id` and extends the result when the
    /// authentication digest is shorter than the cipher key.
    pub fn localize_key(&self, secret: &[u8], engine_id: &[u8]) -> Result<LocalizedKey> {
        let key = key::derive(self.auth_protocol, secret, engine_id)?;
        self.extend_short_key(key, engine_id)
    }

    /// Lengthens an already localized key to the protocol key length.
    /// Keys that are long enough are returned unchanged.
    pub fn extend_short_key(&self, key: LocalizedKey, engine_id: &[u8]) -> Result<LocalizedKey> {
        let need = self.protocol.key_len();
        if key.len() >= need {
            return Ok(key);
        }
        match (self.protocol, self.key_extension) {
            (PrivProtocol::TripleDes, _) => extend_des3(self.auth_protocol, key, engine_id, need),
            (PrivProtocol::Des, _) => Ok(key),
            (_, KeyExtension::Reeder) => extend_reeder(self.auth_protocol, key, engine_id, need),
            (_, KeyExtension::Blumenthal) => Ok(extend_blumenthal(self.auth_protocol, key, need)),
        }
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        let expected = self.protocol.key_len();
        if key.len() < expected {
            debug!(target: "snmp_usm::privacy", protocol = ?self.protocol, expected, actual = key.len(), "privacy key too short");
            return Err(Error::ShortKey {
                expected,
                actual: key.len(),
            });
        }
        Ok(())
    }

    /// Encrypts a serialized ScopedPdu, returning the ciphertext and the
    /// privacy parameters to place on the wire.
    ///
    /// CBC variants zero-pad `plaintext` to the block length; CFB output has
    /// the plaintext length.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        key: &[u8],
        engine_boots: u32,
        engine_time: u32,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        self.check_key(key)?;
        let result = match self.protocol {
            PrivProtocol::Des => {
                let salt = self.cbc_salt(engine_boots)?;
                let iv = xor_iv(&key[8..16], &salt);
                let mut buf = zero_padded(plaintext);
                cbc_encrypt::<cbc::Encryptor<des::Des>>(&key[..8], &iv, &mut buf)?;
                (buf, salt.to_vec())
            }
            PrivProtocol::TripleDes => {
                let salt = self.cbc_salt(engine_boots)?;
                let mut params = self.auth_protocol.raw_hash(&salt);
                params.truncate(PRIV_PARAMS_LEN);
                let iv = xor_iv(&key[24..32], &params);
                let mut buf = zero_padded(plaintext);
                cbc_encrypt::<cbc::Encryptor<des::TdesEde3>>(&key[..24], &iv, &mut buf)?;
                (buf, params)
            }
            PrivProtocol::Aes128 | PrivProtocol::Aes192 | PrivProtocol::Aes256 => {
                let salt = self.salt.next().to_be_bytes();
                let iv = aes_iv(engine_boots, engine_time, &salt);
                let mut buf = plaintext.to_vec();
                self.aes(&key[..self.protocol.key_len()], &iv, &mut buf, true)?;
                (buf, salt.to_vec())
            }
        };
        trace!(target: "snmp_usm::privacy", protocol = ?self.protocol, len = result.0.len(), "payload encrypted");
        Ok(result)
    }

    /// Reverses [`encrypt`](Self::encrypt). CBC output keeps the padding;
    /// strip it by the length recorded inside the plaintext.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &[u8],
        engine_boots: u32,
        engine_time: u32,
        priv_params: &[u8],
    ) -> Result<Vec<u8>> {
        self.check_key(key)?;
        if priv_params.len() != PRIV_PARAMS_LEN {
            debug!(target: "snmp_usm::privacy", expected = PRIV_PARAMS_LEN, actual = priv_params.len(), "invalid privacy parameters length");
            return Err(Error::InvalidPrivParams {
                expected: PRIV_PARAMS_LEN,
                actual: priv_params.len(),
            });
        }
        let mut buf = ciphertext.to_vec();
        match self.protocol {
            PrivProtocol::Des => {
                let iv = xor_iv(&key[8..16], priv_params);
                cbc_decrypt::<cbc::Decryptor<des::Des>>(&key[..8], &iv, &mut buf)?;
            }
            PrivProtocol::TripleDes => {
                let iv = xor_iv(&key[24..32], priv_params);
                cbc_decrypt::<cbc::Decryptor<des::TdesEde3>>(&key[..24], &iv, &mut buf)?;
            }
            PrivProtocol::Aes128 | PrivProtocol::Aes192 | PrivProtocol::Aes256 => {
                let iv = aes_iv(engine_boots, engine_time, priv_params);
                self.aes(&key[..self.protocol.key_len()], &iv, &mut buf, false)?;
            }
        }
        Ok(buf)
    }

    /// engineBoots || 32-bit counter, both big-endian.
    fn cbc_salt(&self, engine_boots: u32) -> Result<[u8; 8]> {
        let counter = u32::try_from(self.salt.next())?;
        let mut salt = [0u8; 8];
        salt[..4].copy_from_slice(&engine_boots.to_be_bytes());
        salt[4..].copy_from_slice(&counter.to_be_bytes());
        Ok(salt)
    }

    fn aes(&self, key: &[u8], iv: &[u8], buf: &mut [u8], encrypt: bool) -> Result<()> {
        match (self.protocol, encrypt) {
            (PrivProtocol::Aes128, true) => cfb_encrypt::<cfb_mode::Encryptor<aes::Aes128>>(key, iv, buf),
            (PrivProtocol::Aes128, false) => cfb_decrypt::<cfb_mode::Decryptor<aes::Aes128>>(key, iv, buf),
            (PrivProtocol::Aes192, true) => cfb_encrypt::<cfb_mode::Encryptor<aes::Aes192>>(key, iv, buf),
            (PrivProtocol::Aes192, false) => cfb_decrypt::<cfb_mode::Decryptor<aes::Aes192>>(key, iv, buf),
            (PrivProtocol::Aes256, true) => cfb_encrypt::<cfb_mode::Encryptor<aes::Aes256>>(key, iv, buf),
            (PrivProtocol::Aes256, false) => cfb_decrypt::<cfb_mode::Decryptor<aes::Aes256>>(key, iv, buf),
            _ => Err(Error::PrivacyOperation(format!("{} is not an AES protocol", self.protocol))),
        }
    }
}

/// Re-localizes the previous output until `need` bytes are collected.
fn extend_reeder(
    auth: AuthProtocol,
    key: LocalizedKey,
    engine_id: &[u8],
    need: usize,
) -> Result<LocalizedKey> {
    let mut key = key.with_capacity(need);
    let mut previous = key.clone();
    while key.len() < need {
        let next = key::derive(auth, previous.as_bytes(), engine_id)?;
        let copy_len = (need - key.len()).min(next.len());
        key.extend_from_slice(&next.as_bytes()[..copy_len]);
        previous = next;
    }
    Ok(key)
}

fn extend_blumenthal(auth: AuthProtocol, key: LocalizedKey, need: usize) -> LocalizedKey {
    let mut key = key.with_capacity(need);
    while key.len() < need {
        let hash = zeroize::Zeroizing::new(auth.raw_hash(key.as_bytes()));
        let copy_len = (need - key.len()).min(hash.len());
        key.extend_from_slice(&hash[..copy_len]);
    }
    key
}

/// Appends whole localized-digest chunks, then truncates.
fn extend_des3(
    auth: AuthProtocol,
    key: LocalizedKey,
    engine_id: &[u8],
    need: usize,
) -> Result<LocalizedKey> {
    let mut key = key.with_capacity(need + auth.digest_len());
    let mut previous = key.clone();
    while key.len() < need {
        let next = key::derive(auth, previous.as_bytes(), engine_id)?;
        key.extend_from_slice(next.as_bytes());
        previous = next;
    }
    key.truncate(need);
    Ok(key)
}

fn xor_iv(pre_iv: &[u8], salt: &[u8]) -> [u8; 8] {
    let mut iv = [0u8; 8];
    for (out, (a, b)) in iv.iter_mut().zip(pre_iv.iter().zip(salt)) {
        *out = a ^ b;
    }
    iv
}

fn aes_iv(engine_boots: u32, engine_time: u32, salt: &[u8]) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&engine_boots.to_be_bytes());
    iv[4..8].copy_from_slice(&engine_time.to_be_bytes());
    iv[8..].copy_from_slice(salt);
    iv
}

fn zero_padded(plaintext: &[u8]) -> Vec<u8> {
    let mut buf = plaintext.to_vec();
    buf.resize(plaintext.len().div_ceil(CBC_BLOCK_LEN) * CBC_BLOCK_LEN, 0);
    buf
}

fn check_alignment(buf: &[u8]) -> Result<()> {
    if buf.len() % CBC_BLOCK_LEN != 0 {
        debug!(target: "snmp_usm::privacy", len = buf.len(), block = CBC_BLOCK_LEN, "buffer not block aligned");
        return Err(Error::InvalidBuffer {
            len: buf.len(),
            block: CBC_BLOCK_LEN,
        });
    }
    Ok(())
}

fn cbc_encrypt<C: BlockEncryptMut + KeyIvInit>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    check_alignment(buf)?;
    let len = buf.len();
    C::new_from_slices(key, iv)
        .map_err(|e| Error::PrivacyOperation(e.to_string()))?
        .encrypt_padded_mut::<NoPadding>(buf, len)
        .map_err(|e| Error::PrivacyOperation(e.to_string()))?;
    Ok(())
}

fn cbc_decrypt<C: BlockDecryptMut + KeyIvInit>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    check_alignment(buf)?;
    C::new_from_slices(key, iv)
        .map_err(|e| Error::PrivacyOperation(e.to_string()))?
        .decrypt_padded_mut::<NoPadding>(buf)
        .map_err(|e| Error::PrivacyOperation(e.to_string()))?;
    Ok(())
}

fn cfb_encrypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: KeyIvInit + AsyncStreamCipher + BlockEncryptMut,
{
    C::new_from_slices(key, iv)
        .map_err(|e| Error::PrivacyOperation(e.to_string()))?
        .encrypt(buf);
    Ok(())
}

fn cfb_decrypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: KeyIvInit + AsyncStreamCipher + BlockDecryptMut,
{
    C::new_from_slices(key, iv)
        .map_err(|e| Error::PrivacyOperation(e.to_string()))?
        .decrypt(buf);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_wraps_to_one() {
        let salt = SaltCounter::starting_at(u64::from(u32::MAX) - 1, u64::from(u32::MAX));
        assert_eq!(salt.next(), u64::from(u32::MAX) - 1);
        assert_eq!(salt.next(), u64::from(u32::MAX));
        assert_eq!(salt.next(), 1);
        assert_eq!(salt.next(), 2);
    }

    #[test]
    fn salt_never_zero() {
        let salt = SaltCounter::starting_at(0, 3);
        let values: Vec<u64> = (0..7).map(|_| salt.next()).collect();
        assert_eq!(values, [1, 2, 3, 1, 2, 3, 1]);
        let random = SaltCounter::new(u64::MAX);
        assert_ne!(random.next(), 0);
    }

    #[test]
    fn extension_pairs() {
        assert!(PrivProtocol::Aes192.needs_extension(AuthProtocol::Sha1));
        assert!(PrivProtocol::Aes256.needs_extension(AuthProtocol::Md5));
        assert!(PrivProtocol::TripleDes.needs_extension(AuthProtocol::Sha1));
        assert!(!PrivProtocol::Aes128.needs_extension(AuthProtocol::Md5));
        assert!(!PrivProtocol::Des.needs_extension(AuthProtocol::Md5));
        assert!(!PrivProtocol::TripleDes.needs_extension(AuthProtocol::Sha512));
    }

    #[test]
    fn cbc_rejects_unaligned() {
        let mut buf = [0u8; 12];
        assert_eq!(
            cbc_encrypt::<cbc::Encryptor<des::Des>>(&[1; 8], &[2; 8], &mut buf),
            Err(Error::InvalidBuffer { len: 12, block: 8 })
        );
        let privacy = PrivacyProtocol::new(PrivProtocol::Des, AuthProtocol::Md5);
        assert_eq!(
            privacy.decrypt(&[0; 12], &[7; 16], 1, 1, &[0; 8]),
            Err(Error::InvalidBuffer { len: 12, block: 8 })
        );
    }

    #[test]
    fn des_pads_and_emits_salt() {
        let privacy = PrivacyProtocol::new(PrivProtocol::Des, AuthProtocol::Md5)
            .with_salt(SaltCounter::starting_at(0x0102_0304, u64::from(u32::MAX)));
        let key = [0x5au8; 16];
        let (ciphertext, params) = privacy.encrypt(b"0123456789", &key, 7, 0).unwrap();
        assert_eq!(ciphertext.len(), 16);
        assert_eq!(params, [0, 0, 0, 7, 1, 2, 3, 4]);
        let plaintext = privacy.decrypt(&ciphertext, &key, 7, 0, &params).unwrap();
        assert_eq!(&plaintext[..10], b"0123456789");
        assert_eq!(&plaintext[10..], &[0; 6]);
    }

    #[test]
    fn des3_params_are_hashed_salt() {
        let privacy = PrivacyProtocol::new(PrivProtocol::TripleDes, AuthProtocol::Sha1)
            .with_salt(SaltCounter::starting_at(9, u64::from(u32::MAX)));
        let key = [0x33u8; 32];
        let (_, params) = privacy.encrypt(b"payload", &key, 2, 0).unwrap();
        let expected = AuthProtocol::Sha1.raw_hash(&[0, 0, 0, 2, 0, 0, 0, 9]);
        assert_eq!(params, &expected[..8]);
    }

    #[test]
    fn short_key_rejected() {
        let privacy = PrivacyProtocol::new(PrivProtocol::TripleDes, AuthProtocol::Md5);
        assert_eq!(
            privacy.encrypt(b"data", &[0; 16], 1, 1).unwrap_err(),
            Error::ShortKey {
                expected: 32,
                actual: 16
            }
        );
        let privacy = PrivacyProtocol::new(PrivProtocol::Aes256, AuthProtocol::Sha1);
        assert_eq!(
            privacy.decrypt(b"data", &[0; 20], 1, 1, &[0; 8]).unwrap_err(),
            Error::ShortKey {
                expected: 32,
                actual: 20
            }
        );
    }

    #[test]
    fn bad_params_length() {
        let privacy = PrivacyProtocol::new(PrivProtocol::Aes128, AuthProtocol::Sha1);
        assert_eq!(
            privacy.decrypt(b"data", &[0; 16], 1, 1, &[0; 7]).unwrap_err(),
            Error::InvalidPrivParams {
                expected: 8,
                actual: 7
            }
        );
    }

    #[test]
    fn extended_key_lengths() {
        let engine_id = [0x80, 0, 0, 0, 1, 2, 3, 4];
        for (protocol, extension) in [
            (PrivProtocol::Aes192, KeyExtension::Reeder),
            (PrivProtocol::Aes256, KeyExtension::Reeder),
            (PrivProtocol::Aes256, KeyExtension::Blumenthal),
            (PrivProtocol::TripleDes, KeyExtension::Reeder),
        ] {
            let privacy =
                PrivacyProtocol::new(protocol, AuthProtocol::Md5).with_key_extension(extension);
            let short = key::derive(AuthProtocol::Md5, b"privpassword", &engine_id).unwrap();
            let extended = privacy.extend_short_key(short.clone(), &engine_id).unwrap();
            assert_eq!(extended.len(), protocol.key_len());
            assert_eq!(&extended.as_bytes()[..16], short.as_bytes());
        }
    }

    #[test]
    fn extension_methods_differ() {
        let engine_id = [0x80, 0, 0, 0, 1, 2, 3, 4];
        let short = key::derive(AuthProtocol::Sha1, b"privpassword", &engine_id).unwrap();
        let reeder = PrivacyProtocol::new(PrivProtocol::Aes256, AuthProtocol::Sha1)
            .extend_short_key(short.clone(), &engine_id)
            .unwrap();
        let blumenthal = PrivacyProtocol::new(PrivProtocol::Aes256, AuthProtocol::Sha1)
            .with_key_extension(KeyExtension::Blumenthal)
            .extend_short_key(short.clone(), &engine_id)
            .unwrap();
        assert_eq!(reeder.as_bytes()[..20], blumenthal.as_bytes()[..20]);
        assert_ne!(reeder.as_bytes()[20..], blumenthal.as_bytes()[20..]);
        let expected_tail = AuthProtocol::Sha1.raw_hash(short.as_bytes());
        assert_eq!(&blumenthal.as_bytes()[20..], &expected_tail[..12]);
    }
}
