use core::fmt;
use std::mem;

use crate::{Error, Result};

pub const PRIMITIVE: u8 = 0b0000_0000;
pub const CONSTRUCTED: u8 = 0b0010_0000;

pub const CLASS_UNIVERSAL: u8 = 0b0000_0000;

pub const TYPE_INTEGER: u8 = CLASS_UNIVERSAL | PRIMITIVE | 2;
pub const TYPE_OCTETSTRING: u8 = CLASS_UNIVERSAL | PRIMITIVE | 4;
pub const TYPE_SEQUENCE: u8 = CLASS_UNIVERSAL | CONSTRUCTED | 16;

const USIZE_LEN: usize = mem::size_of::<usize>();

/// BER decoder over a borrowed buffer.
///
/// Supports:
///
/// - the types found in SNMPv3 message headers.
/// - position tracking relative to the start of the outermost buffer, so
///   a caller can find where a field sits in the original bytes.
///
/// Does not support:
///
/// - extended tag IDs.
/// - indefinite lengths (disallowed by DER).
/// - INTEGER values not representable by i64.
pub struct AsnReader<'a> {
    inner: &'a [u8],
    pos: usize,
}

impl<'a> Clone for AsnReader<'a> {
    fn clone(&self) -> AsnReader<'a> {
        AsnReader {
            inner: self.inner,
            pos: self.pos,
        }
    }
}

impl fmt::Debug for AsnReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AsnReader")
            .field("pos", &self.pos)
            .field("bytes_left", &self.inner.len())
            .finish()
    }
}

impl<'a> AsnReader<'a> {
    pub fn from_bytes(bytes: &'a [u8]) -> AsnReader<'a> {
        AsnReader {
            inner: bytes,
            pos: 0,
        }
    }

    /// Reader over `bytes[offset..]` that reports positions relative to
    /// the start of `bytes`.
    pub fn at(bytes: &'a [u8], offset: usize) -> Result<AsnReader<'a>> {
        let inner = bytes.get(offset..).ok_or(Error::AsnEof)?;
        Ok(AsnReader { inner, pos: offset })
    }

    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn bytes_left(&self) -> usize {
        self.inner.len()
    }

    fn advance(&mut self, n: usize) -> &'a [u8] {
        let (head, tail) = self.inner.split_at(n);
        self.inner = tail;
        self.pos += n;
        head
    }

    pub fn peek_byte(&self) -> Result<u8> {
        self.inner.first().copied().ok_or(Error::AsnEof)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let byte = self.peek_byte()?;
        self.advance(1);
        Ok(byte)
    }

    pub fn read_length(&mut self) -> Result<usize> {
        let head = self.read_byte()?;
        if head < 128 {
            // short form
            return Ok(head as usize);
        }
        if head == 0xff {
            return Err(Error::AsnInvalidLen); // reserved for future use
        }
        // long form
        let length_len = (head & 0b0111_1111) as usize;
        if length_len == 0 {
            // Indefinite length. Not allowed in DER.
            return Err(Error::AsnInvalidLen);
        }
        if length_len > USIZE_LEN {
            return Err(Error::AsnInvalidLen);
        }
        if self.inner.len() < length_len {
            return Err(Error::AsnEof);
        }
        let mut bytes = [0u8; USIZE_LEN];
        bytes[(USIZE_LEN - length_len)..].copy_from_slice(self.advance(length_len));
        Ok(usize::from_be_bytes(bytes))
    }

    /// Reads a tag and its length, checking the declared length against the
    /// bytes that remain.
    pub fn read_header(&mut self) -> Result<(u8, usize)> {
        let ident = self.read_byte()?;
        let len = self.read_length()?;
        if len > self.inner.len() {
            return Err(Error::Truncated {
                declared: len,
                remaining: self.inner.len(),
            });
        }
        Ok((ident, len))
    }

    fn read_expected_header(&mut self, expected: u8) -> Result<usize> {
        let found = self.peek_byte()?;
        if found != expected {
            return Err(Error::AsnWrongType { expected, found });
        }
        let (_, len) = self.read_header()?;
        Ok(len)
    }

    pub fn read_raw(&mut self, expected_ident: u8) -> Result<&'a [u8]> {
        self.read_raw_positioned(expected_ident).map(|(_, val)| val)
    }

    /// Like [`read_raw`](Self::read_raw), also returning the offset of the
    /// first content byte.
    pub fn read_raw_positioned(&mut self, expected_ident: u8) -> Result<(usize, &'a [u8])> {
        let len = self.read_expected_header(expected_ident)?;
        let start = self.pos;
        Ok((start, self.advance(len)))
    }

    /// Reads one complete element (tag, length and contents) of any type.
    pub fn read_tlv(&mut self) -> Result<&'a [u8]> {
        let mut probe = self.clone();
        let (_, len) = probe.read_header()?;
        let total = probe.pos - self.pos + len;
        Ok(self.advance(total))
    }

    /// Descends into a constructed element, returning a reader over its
    /// contents that keeps absolute positions.
    pub fn read_nested(&mut self, expected_ident: u8) -> Result<AsnReader<'a>> {
        let (pos, inner) = self.read_raw_positioned(expected_ident)?;
        Ok(AsnReader { inner, pos })
    }

    pub fn read_constructed<F, T>(&mut self, expected_ident: u8, f: F) -> Result<T>
    where
        F: FnOnce(&mut AsnReader<'a>) -> Result<T>,
    {
        let mut reader = self.read_nested(expected_ident)?;
        f(&mut reader)
    }

    //
    // ASN
    //

    pub fn read_asn_integer(&mut self) -> Result<i64> {
        let val = self.read_raw(TYPE_INTEGER)?;
        decode_i64(val)
    }

    pub fn read_asn_octetstring(&mut self) -> Result<&'a [u8]> {
        self.read_raw(TYPE_OCTETSTRING)
    }

    pub fn read_asn_sequence<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut AsnReader<'a>) -> Result<T>,
    {
        self.read_constructed(TYPE_SEQUENCE, f)
    }
}

fn decode_i64(i: &[u8]) -> Result<i64> {
    if i.is_empty() {
        return Err(Error::AsnInvalidLen);
    }
    if i.len() > mem::size_of::<i64>() {
        return Err(Error::AsnIntOverflow);
    }
    let mut bytes = [0u8; 8];
    bytes[(mem::size_of::<i64>() - i.len())..].copy_from_slice(i);

    let mut ret = i64::from_be_bytes(bytes);
    {
        //sign extend
        let shift_amount = (mem::size_of::<i64>() - i.len()) * 8;
        ret = (ret << shift_amount) >> shift_amount;
    }
    Ok(ret)
}
