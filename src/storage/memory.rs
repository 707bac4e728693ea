//! In-memory storage implementation for testing and caching.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::{Storage, StorageError, StorageInput, StorageOutput};

type FileMap = Arc<Mutex<HashMap<String, Box<[u8]>>>>;

/// Configuration for [`MemoryStorage`].
#[derive(Debug, Clone)]
pub struct MemoryStorageConfig {
    /// Initial capacity of the file map.
    pub initial_capacity: usize,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        MemoryStorageConfig {
            initial_capacity: 16,
        }
    }
}

/// An in-memory storage implementation.
///
/// Files are committed to the shared map when their output is closed or
/// dropped.
#[derive(Debug)]
pub struct MemoryStorage {
    files: FileMap,
    closed: bool,
}

impl MemoryStorage {
    /// Create a new memory storage.
    pub fn new(config: MemoryStorageConfig) -> Self {
        MemoryStorage {
            files: Arc::new(Mutex::new(HashMap::with_capacity(config.initial_capacity))),
            closed: false,
        }
    }

    /// Create a new memory storage with default configuration.
    pub fn new_default() -> Self {
        Self::new(MemoryStorageConfig::default())
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed {
            Err(StorageError::StorageClosed.into())
        } else {
            Ok(())
        }
    }

    /// Get the number of files stored.
    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    /// Get the total size of all files.
    pub fn total_size(&self) -> u64 {
        self.files.lock().values().map(|data| data.len() as u64).sum()
    }

    /// Get a copy of a file's contents.
    pub fn read_all(&self, name: &str) -> Result<Vec<u8>> {
        let files = self.files.lock();
        files
            .get(name)
            .map(|data| data.to_vec())
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()).into())
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        self.check_closed()?;
        let data = self.read_all(name)?;
        Ok(Box::new(MemoryInput::new(data)))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        self.check_closed()?;
        Ok(Box::new(MemoryOutput::new(
            name.to_string(),
            Arc::clone(&self.files),
        )))
    }

    fn file_exists(&self, name: &str) -> bool {
        !self.closed && self.files.lock().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.check_closed()?;
        self.files.lock().remove(name);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        self.check_closed()?;
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.check_closed()?;
        let files = self.files.lock();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;
        Ok(data.len() as u64)
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.check_closed()?;
        let mut files = self.files.lock();
        let data = files
            .remove(old_name)
            .ok_or_else(|| StorageError::FileNotFound(old_name.to_string()))?;
        files.insert(new_name.to_string(), data);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.check_closed()
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// A memory-based input implementation.
#[derive(Debug)]
pub struct MemoryInput {
    cursor: Cursor<Vec<u8>>,
    size: u64,
}

impl MemoryInput {
    fn new(data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        MemoryInput {
            cursor: Cursor::new(data),
            size,
        }
    }
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A memory-based output implementation.
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    buffer: Cursor<Vec<u8>>,
    files: FileMap,
    closed: bool,
}

impl MemoryOutput {
    fn new(name: String, files: FileMap) -> Self {
        MemoryOutput {
            name,
            buffer: Cursor::new(Vec::new()),
            files,
            closed: false,
        }
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::other("Output is closed"));
        }
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryOutput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        if self.closed {
            return Err(std::io::Error::other("Output is closed"));
        }
        self.buffer.seek(pos)
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn position(&self) -> Result<u64> {
        Ok(self.buffer.position())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            let data = std::mem::take(self.buffer.get_mut()).into_boxed_slice();
            self.files.lock().insert(self.name.clone(), data);
            self.closed = true;
        }
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_read_file() {
        let storage = MemoryStorage::new_default();

        let mut output = storage.create_output("_0.fdt").unwrap();
        output.write_all(b"Hello, World!").unwrap();
        assert_eq!(output.position().unwrap(), 13);
        output.close().unwrap();

        let mut input = storage.open_input("_0.fdt").unwrap();
        let mut buffer = Vec::new();
        input.read_to_end(&mut buffer).unwrap();

        assert_eq!(buffer, b"Hello, World!");
        assert_eq!(input.size().unwrap(), 13);
    }

    #[test]
    fn test_file_visible_only_after_close() {
        let storage = MemoryStorage::new_default();

        let mut output = storage.create_output("_0.fdx").unwrap();
        output.write_all(b"abc").unwrap();
        assert!(!storage.file_exists("_0.fdx"));

        drop(output);
        assert!(storage.file_exists("_0.fdx"));
        assert_eq!(storage.total_size(), 3);
    }

    #[test]
    fn test_file_operations() {
        let storage = MemoryStorage::new_default();

        let mut output = storage.create_output("a.bin").unwrap();
        output.write_all(b"Test content").unwrap();
        output.close().unwrap();

        assert_eq!(storage.file_size("a.bin").unwrap(), 12);
        assert_eq!(storage.list_files().unwrap(), vec!["a.bin"]);

        storage.rename_file("a.bin", "b.bin").unwrap();
        assert!(!storage.file_exists("a.bin"));
        assert!(storage.file_exists("b.bin"));

        storage.delete_file("b.bin").unwrap();
        assert_eq!(storage.file_count(), 0);
        assert!(storage.open_input("b.bin").is_err());
    }

    #[test]
    fn test_storage_close() {
        let mut storage = MemoryStorage::new_default();
        storage.close().unwrap();
        assert!(storage.create_output("x").is_err());
    }
}
