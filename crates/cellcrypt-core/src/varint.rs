//! Variable-length integers and length-prefixed byte strings.
//!
//! Layout: values in `-112..=127` are a single byte. Anything else is a
//! marker byte carrying the sign and the number of magnitude bytes, followed
//! by the magnitude in big-endian order (negative values store `!value`).

use crate::error::CryptoError;

/// Append a vint.
pub fn write_vint(out: &mut Vec<u8>, value: i32) {
    write_vlong(out, i64::from(value));
}

/// Append a vlong.
pub fn write_vlong(out: &mut Vec<u8>, value: i64) {
    if (-112..=127).contains(&value) {
        out.push(value as u8);
        return;
    }

    let mut magnitude = value;
    let mut marker: i64 = -112;
    if magnitude < 0 {
        magnitude ^= -1;
        marker = -120;
    }

    let mut tmp = magnitude;
    while tmp != 0 {
        tmp >>= 8;
        marker -= 1;
    }
    out.push(marker as u8);

    let count = if marker < -120 {
        -(marker + 120)
    } else {
        -(marker + 112)
    };
    for idx in (0..count).rev() {
        out.push(((magnitude >> (idx * 8)) & 0xff) as u8);
    }
}

/// A length as a vint value. Lengths past `i32::MAX` have no encoding.
pub fn vint_len(len: usize) -> Result<i32, CryptoError> {
    i32::try_from(len)
        .map_err(|_| CryptoError::Malformed(format!("length {len} does not fit in a vint")))
}

/// Append `[vint len][bytes]`.
pub fn write_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), CryptoError> {
    write_vint(out, vint_len(bytes.len())?);
    out.extend_from_slice(bytes);
    Ok(())
}

/// Total encoded size (marker included) implied by the first byte.
fn encoded_size(first: i8) -> usize {
    if first >= -112 {
        1
    } else if first < -120 {
        (-119 - i32::from(first)) as usize
    } else {
        (-111 - i32::from(first)) as usize
    }
}

fn is_negative(first: i8) -> bool {
    first < -120 || (-112..0).contains(&first)
}

/// Forward-only reader over a byte slice.
///
/// Every read that runs past the end returns [`CryptoError::DataTooShort`]
/// and leaves the position unchanged.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Everything not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn read_u8(&mut self) -> Result<u8, CryptoError> {
        let byte = *self.data.get(self.pos).ok_or(CryptoError::DataTooShort)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bool(&mut self) -> Result<bool, CryptoError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CryptoError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CryptoError::DataTooShort)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_vlong(&mut self) -> Result<i64, CryptoError> {
        let start = self.pos;
        let first = self.read_u8()? as i8;
        let size = encoded_size(first);
        if size == 1 {
            return Ok(i64::from(first));
        }

        let mut value: i64 = 0;
        for _ in 0..size - 1 {
            match self.read_u8() {
                Ok(byte) => value = (value << 8) | i64::from(byte),
                Err(e) => {
                    self.pos = start;
                    return Err(e);
                }
            }
        }
        Ok(if is_negative(first) { value ^ -1 } else { value })
    }

    pub fn read_vint(&mut self) -> Result<i32, CryptoError> {
        let value = self.read_vlong()?;
        i32::try_from(value)
            .map_err(|_| CryptoError::Malformed(format!("vint out of range: {value}")))
    }

    /// Read a `[vint len][bytes]` pair.
    pub fn read_len_prefixed(&mut self) -> Result<&'a [u8], CryptoError> {
        let start = self.pos;
        let len = self.read_vint()?;
        if len < 0 {
            self.pos = start;
            return Err(CryptoError::Malformed(format!("negative length prefix: {len}")));
        }
        self.read_bytes(len as usize).inspect_err(|_| self.pos = start)
    }
}
