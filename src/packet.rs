use std::fmt;

use crate::{Error, Result};

/// An owned buffer holding one raw IP packet.
///
/// The buffer may be larger than the packet itself; only the first `len`
/// bytes are valid and only those are ever written to the device.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    buf: Vec<u8>,
    len: usize,
}

impl Packet {
    /// Wraps `buf`, treating all of it as packet data.
    pub fn new(buf: Vec<u8>) -> Self {
        let len = buf.len();
        Self { buf, len }
    }

    /// Wraps `buf` where only the first `len` bytes are packet data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if `len` exceeds the buffer length.
    pub fn from_buffer(buf: Vec<u8>, len: usize) -> Result<Self> {
        if len > buf.len() {
            return Err(Error::InvalidPacket {
                len,
                capacity: buf.len(),
            });
        }
        Ok(Self { buf, len })
    }

    /// The valid packet bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the underlying buffer.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Consumes the packet, returning only the valid bytes.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.buf.truncate(self.len);
        self.buf
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len)
            .field("capacity", &self.buf.len())
            .finish()
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl From<Vec<u8>> for Packet {
    fn from(buf: Vec<u8>) -> Self {
        Self::new(buf)
    }
}

impl From<&[u8]> for Packet {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}
