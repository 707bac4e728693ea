//! Variable-length integer encoding utilities.
//!
//! Seven bits per byte with a continuation bit, least significant group
//! first. Posting streams in the byte arena and the flushed segment files
//! both use this encoding.

use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use crate::error::{PennantError, Result};

/// Encode a u32 into `buf`, returning the number of bytes used.
#[inline]
pub fn encode_u32_into(value: u32, buf: &mut [u8; 5]) -> usize {
    let mut val = value;
    let mut len = 0;
    while val & !0x7F != 0 {
        buf[len] = ((val & 0x7F) as u8) | 0x80;
        val >>= 7;
        len += 1;
    }
    buf[len] = val as u8;
    len + 1
}

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(10);
    let mut val = value;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80;
        }

        bytes.push(byte);

        if val == 0 {
            break;
        }
    }

    bytes
}

/// Decode a u64 value from variable-length encoding.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;
    let mut bytes_read = 0;

    for &byte in bytes {
        bytes_read += 1;

        if shift >= 64 {
            return Err(PennantError::other("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, bytes_read));
        }

        shift += 7;
    }

    Err(PennantError::other("Incomplete VarInt"))
}

/// Write a variable-length encoded u32 to a writer.
pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<usize> {
    let mut buf = [0u8; 5];
    let len = encode_u32_into(value, &mut buf);
    writer.write_all(&buf[..len])?;
    Ok(len)
}

/// Read a variable-length encoded u32 from a reader.
pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut result = 0u32;
    let mut shift = 0;

    loop {
        let byte = reader.read_u8()?;

        if shift >= 32 {
            return Err(PennantError::other("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u32) << shift;

        if (byte & 0x80) == 0 {
            return Ok(result);
        }

        shift += 7;
    }
}

/// Read a variable-length encoded u64 from a reader.
pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        let byte = reader.read_u8()?;

        if shift >= 64 {
            return Err(PennantError::other("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok(result);
        }

        shift += 7;
    }
}
