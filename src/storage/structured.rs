//! Structured file I/O for binary data serialization.
//!
//! Every file a flush produces is written through a [`StructWriter`], which
//! keeps a running CRC32 of the payload and appends it on close so a
//! [`StructReader`] can verify the file.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{PennantError, Result};
use crate::storage::{StorageInput, StorageOutput};
use crate::util::varint::{decode_u64, encode_u64};

/// A structured file writer for binary data.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured file writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: Hasher::new(),
            position: 0,
        }
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.update_checksum(&[value]);
        self.position += 1;
        Ok(())
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.update_checksum(&value.to_le_bytes());
        self.position += 4;
        Ok(())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.update_checksum(&value.to_le_bytes());
        self.position += 8;
        Ok(())
    }

    /// Write a variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let encoded = encode_u64(value);
        self.write_raw(&encoded)
    }

    /// Write a f64 value (little-endian).
    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.writer.write_f64::<LittleEndian>(value)?;
        self.update_checksum(&value.to_le_bytes());
        self.position += 8;
        Ok(())
    }

    /// Write a string with length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write raw bytes with length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.write_raw(value)
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.update_checksum(value);
        self.position += value.len() as u64;
        Ok(())
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get the checksum of everything written so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn update_checksum(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Push buffered bytes to the underlying storage.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush_and_sync()
    }

    /// Append the checksum, then flush and close the writer.
    pub fn close(mut self) -> Result<()> {
        let checksum = self.checksum();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush_and_sync()?;
        self.writer.close()?;
        Ok(())
    }

    /// Close the underlying output without appending a checksum.
    ///
    /// Used when a partially written file is being discarded.
    pub fn discard(mut self) -> Result<()> {
        self.writer.close()
    }
}

/// Raw bytes written through `io::Write` are checksummed like
/// [`StructWriter::write_raw`], so buffers can stream straight in.
impl<W: StorageOutput> std::io::Write for StructWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.update_checksum(&buf[..n]);
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// A structured file reader for binary data.
pub struct StructReader<R: StorageInput> {
    reader: R,
    hasher: Hasher,
    position: u64,
    file_size: u64,
}

impl<R: StorageInput> StructReader<R> {
    /// Create a new structured file reader.
    pub fn new(reader: R) -> Result<Self> {
        let file_size = reader.size()?;
        Ok(StructReader {
            reader,
            hasher: Hasher::new(),
            position: 0,
            file_size,
        })
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.reader.read_u8()?;
        self.update_checksum(&[value]);
        self.position += 1;
        Ok(value)
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.reader.read_u32::<LittleEndian>()?;
        self.update_checksum(&value.to_le_bytes());
        self.position += 4;
        Ok(value)
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let value = self.reader.read_u64::<LittleEndian>()?;
        self.update_checksum(&value.to_le_bytes());
        self.position += 8;
        Ok(value)
    }

    /// Read a variable-length integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut bytes = Vec::new();
        loop {
            let byte = self.reader.read_u8()?;
            bytes.push(byte);
            if byte & 0x80 == 0 {
                break;
            }
        }

        let (value, _) = decode_u64(&bytes)?;
        self.update_checksum(&bytes);
        self.position += bytes.len() as u64;
        Ok(value)
    }

    /// Read a f64 value (little-endian).
    pub fn read_f64(&mut self) -> Result<f64> {
        let value = self.reader.read_f64::<LittleEndian>()?;
        self.update_checksum(&value.to_le_bytes());
        self.position += 8;
        Ok(value)
    }

    /// Read a string with length prefix.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| PennantError::storage(format!("Invalid UTF-8: {e}")))
    }

    /// Read bytes with length prefix.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.read_varint()? as usize;
        self.read_raw(length)
    }

    /// Read exact number of raw bytes.
    pub fn read_raw(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; length];
        self.reader.read_exact(&mut bytes)?;
        self.update_checksum(&bytes);
        self.position += length as u64;
        Ok(bytes)
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Check if only the trailing checksum remains.
    pub fn is_eof(&self) -> bool {
        self.position >= self.file_size.saturating_sub(4)
    }

    fn update_checksum(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Verify file integrity by checking the trailing checksum.
    pub fn verify_checksum(&mut self) -> Result<bool> {
        if self.position + 4 > self.file_size {
            return Err(PennantError::storage("File too short for checksum"));
        }

        let stored_checksum = self.reader.read_u32::<LittleEndian>()?;
        Ok(stored_checksum == self.hasher.clone().finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_write_and_read_back() {
        let storage = MemoryStorage::new_default();

        let output = storage.create_output("_0.tis").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_u8(7).unwrap();
        writer.write_u32(0xDEADBEEF).unwrap();
        writer.write_varint(300).unwrap();
        writer.write_string("apple").unwrap();
        writer.write_bytes(&[1, 2, 3]).unwrap();
        writer.write_f64(1.5).unwrap();
        let written = writer.position();
        writer.close().unwrap();

        let input = storage.open_input("_0.tis").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_varint().unwrap(), 300);
        assert_eq!(reader.read_string().unwrap(), "apple");
        assert_eq!(reader.read_bytes().unwrap(), vec![1, 2, 3]);
        assert_eq!(reader.read_f64().unwrap(), 1.5);
        assert_eq!(reader.position(), written);
        assert!(reader.is_eof());
        assert!(reader.verify_checksum().unwrap());
    }

    #[test]
    fn test_checksum_covers_whole_payload() {
        let storage = MemoryStorage::new_default();

        let mut writer = StructWriter::new(storage.create_output("a").unwrap());
        writer.write_raw(b"abc").unwrap();
        let partial = writer.checksum();
        writer.write_raw(b"def").unwrap();
        assert_ne!(writer.checksum(), partial);
        assert_eq!(writer.checksum(), crc32fast::hash(b"abcdef"));
        writer.close().unwrap();
    }

    #[test]
    fn test_streamed_bytes_are_checksummed() {
        use std::io::Write;

        let storage = MemoryStorage::new_default();
        let mut writer = StructWriter::new(storage.create_output("_0.fdt").unwrap());
        writer.write_varint(2).unwrap();
        writer.write_all(b"streamed").unwrap();
        assert_eq!(writer.position(), 9);
        writer.close().unwrap();

        let mut reader = StructReader::new(storage.open_input("_0.fdt").unwrap()).unwrap();
        assert_eq!(reader.read_varint().unwrap(), 2);
        assert_eq!(reader.read_raw(8).unwrap(), b"streamed".to_vec());
        assert!(reader.verify_checksum().unwrap());
    }

    #[test]
    fn test_verify_fails_on_truncated_file() {
        let storage = MemoryStorage::new_default();

        let mut writer = StructWriter::new(storage.create_output("a").unwrap());
        writer.write_raw(b"xy").unwrap();
        writer.discard().unwrap();

        let mut reader = StructReader::new(storage.open_input("a").unwrap()).unwrap();
        reader.read_raw(2).unwrap();
        assert!(reader.verify_checksum().is_err());
    }
}
