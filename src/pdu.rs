use std::{fmt, mem, ops};

use crate::{
    asn1::{self, AsnReader},
    Result,
};

const BUFFER_SIZE: usize = 4096;

/// BER writer that fills from the end.
///
/// Elements are pushed last-field-first so that every length is known when
/// its header is written; the encoded bytes are the tail of the buffer.
pub struct Buf {
    len: usize,
    buf: Vec<u8>,
}

impl fmt::Debug for Buf {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_list().entries(&self[..]).finish()
    }
}

impl Default for Buf {
    fn default() -> Buf {
        Buf {
            len: 0,
            buf: vec![0; BUFFER_SIZE],
        }
    }
}

impl ops::Deref for Buf {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.buf[self.buf.len() - self.len..]
    }
}

impl ops::DerefMut for Buf {
    fn deref_mut(&mut self) -> &mut [u8] {
        let start = self.buf.len() - self.len;
        &mut self.buf[start..]
    }
}

impl Buf {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn reset(&mut self) {
        self.len = 0;
    }

    fn reserve(&mut self, additional: usize) {
        if self.buf.len() - self.len >= additional {
            return;
        }
        let capacity = (self.buf.len() * 2).max(self.len + additional);
        let mut grown = vec![0; capacity];
        grown[capacity - self.len..].copy_from_slice(&self[..]);
        self.buf = grown;
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.reserve(chunk.len());
        let offset = self.buf.len() - self.len;
        self.buf[(offset - chunk.len())..offset].copy_from_slice(chunk);
        self.len += chunk.len();
    }

    pub fn push_byte(&mut self, byte: u8) {
        self.push_chunk(&[byte]);
    }

    pub fn push_constructed<F>(&mut self, ident: u8, mut f: F)
    where
        F: FnMut(&mut Self),
    {
        let before_len = self.len;
        f(self);
        let written = self.len - before_len;
        self.push_length(written);
        self.push_byte(ident);
    }

    pub fn push_sequence<F>(&mut self, f: F)
    where
        F: FnMut(&mut Self),
    {
        self.push_constructed(asn1::TYPE_SEQUENCE, f);
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn push_length(&mut self, len: usize) {
        if len < 128 {
            // short form
            self.push_byte(len as u8);
        } else {
            // long form
            let num_leading_nulls = (len.leading_zeros() / 8) as usize;
            let length_len = mem::size_of::<usize>() - num_leading_nulls;
            self.push_chunk(&len.to_be_bytes()[num_leading_nulls..]);
            self.push_byte(length_len as u8 | 0b1000_0000);
        }
    }

    pub fn push_integer(&mut self, n: i64) {
        let bytes = n.to_be_bytes();
        // shortest two's complement form
        let mut start = 0;
        while start < bytes.len() - 1 {
            let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
                || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
            if !redundant {
                break;
            }
            start += 1;
        }
        self.push_chunk(&bytes[start..]);
        self.push_length(bytes.len() - start);
        self.push_byte(asn1::TYPE_INTEGER);
    }

    pub fn push_octet_string(&mut self, bytes: &[u8]) {
        self.push_chunk(bytes);
        self.push_length(bytes.len());
        self.push_byte(asn1::TYPE_OCTETSTRING);
    }
}

/// Context-scoped PDU: the unit protected by privacy.
///
/// ```text
/// ScopedPDU ::= SEQUENCE {
///     contextEngineID  OCTET STRING,
///     contextName      OCTET STRING,
///     data             ANY
/// }
/// ```
///
/// `data` holds the complete BER element of the PDU (tag included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedPdu {
    pub context_engine_id: Vec<u8>,
    pub context_name: Vec<u8>,
    pub data: Vec<u8>,
}

impl ScopedPdu {
    pub fn new(context_engine_id: &[u8], context_name: &[u8], data: Vec<u8>) -> Self {
        Self {
            context_engine_id: context_engine_id.to_vec(),
            context_name: context_name.to_vec(),
            data,
        }
    }

    pub fn encode(&self, buf: &mut Buf) {
        buf.push_sequence(|buf| {
            buf.push_chunk(&self.data);
            buf.push_octet_string(&self.context_name);
            buf.push_octet_string(&self.context_engine_id);
        });
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Buf::default();
        self.encode(&mut buf);
        buf.to_vec()
    }

    /// Parses the first SEQUENCE in `bytes`; anything after it (CBC padding)
    /// is ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        AsnReader::from_bytes(bytes).read_asn_sequence(|rdr| {
            let context_engine_id = rdr.read_asn_octetstring()?.to_vec();
            let context_name = rdr.read_asn_octetstring()?.to_vec();
            let data = rdr.read_tlv()?.to_vec();
            Ok(ScopedPdu {
                context_engine_id,
                context_name,
                data,
            })
        })
    }
}
