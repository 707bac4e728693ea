//! Storage abstraction layer for Pennant.
//!
//! Flushed segments and doc stores are written through the [`Storage`]
//! trait, which plays the role of the directory handle carried by a
//! segment write state. File and memory backends can be swapped without
//! touching the buffering pipeline.
//!
//! # Example
//!
//! ```
//! use pennant::storage::{StorageConfig, StorageFactory};
//! use pennant::storage::memory::MemoryStorageConfig;
//! use std::io::Write;
//!
//! # fn main() -> pennant::error::Result<()> {
//! let storage = StorageFactory::create(StorageConfig::Memory(MemoryStorageConfig::default()))?;
//!
//! let mut output = storage.create_output("_0.fnm")?;
//! output.write_all(b"fields")?;
//! output.close()?;
//!
//! assert!(storage.file_exists("_0.fnm"));
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use crate::error::{PennantError, Result};

pub mod file;
pub mod memory;
pub mod structured;

/// A trait for storage backends that can store and retrieve named files.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open an existing file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create a file for writing, truncating any existing file.
    ///
    /// The file becomes visible to readers once the returned output is
    /// closed.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file. Deleting a missing file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all files, sorted by name.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Get the size of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Rename a file.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Make all closed outputs durable.
    fn sync(&self) -> Result<()>;

    /// Close the storage; later operations fail.
    fn close(&mut self) -> Result<()>;
}

/// A trait for reading data from storage.
pub trait StorageInput: Read + Seek + Send + std::fmt::Debug {
    /// Get the total size of the input.
    fn size(&self) -> Result<u64>;

    /// Close the input.
    fn close(&mut self) -> Result<()>;
}

/// A trait for writing data to storage.
pub trait StorageOutput: Write + Seek + Send + std::fmt::Debug {
    /// Flush buffered bytes and sync them to the backend.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Current write position.
    fn position(&self) -> Result<u64>;

    /// Close the output.
    fn close(&mut self) -> Result<()>;
}

impl StorageOutput for Box<dyn StorageOutput> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }

    fn position(&self) -> Result<u64> {
        self.as_ref().position()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

impl StorageInput for Box<dyn StorageInput> {
    fn size(&self) -> Result<u64> {
        self.as_ref().size()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

/// Configuration for storage backends.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Disk-backed storage rooted at a directory.
    File(file::FileStorageConfig),

    /// In-memory storage.
    Memory(memory::MemoryStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(memory::MemoryStorageConfig::default())
    }
}

/// A factory for creating storage instances.
pub struct StorageFactory;

impl StorageFactory {
    /// Create the storage described by `config`.
    pub fn create(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        match config {
            StorageConfig::Memory(mem_config) => {
                Ok(Arc::new(memory::MemoryStorage::new(mem_config)))
            }
            StorageConfig::File(file_config) => {
                let path = file_config.path.clone();
                Ok(Arc::new(file::FileStorage::new(&path, file_config)?))
            }
        }
    }
}

/// Error types specific to storage operations.
#[derive(Debug, Clone)]
pub enum StorageError {
    FileNotFound(String),

    IoError(String),

    StorageClosed,
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::FileNotFound(name) => write!(f, "File not found: {name}"),
            StorageError::IoError(msg) => write!(f, "I/O error: {msg}"),
            StorageError::StorageClosed => write!(f, "Storage is closed"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for PennantError {
    fn from(err: StorageError) -> Self {
        PennantError::storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::FileStorageConfig;
    use crate::storage::memory::MemoryStorageConfig;

    #[test]
    fn test_storage_config_default() {
        match StorageConfig::default() {
            StorageConfig::Memory(mem_config) => {
                assert_eq!(mem_config.initial_capacity, 16);
            }
            _ => panic!("Expected Memory config"),
        }
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::FileNotFound("_0.frq".to_string());
        assert_eq!(err.to_string(), "File not found: _0.frq");

        let err = StorageError::StorageClosed;
        assert_eq!(err.to_string(), "Storage is closed");

        let err: PennantError = StorageError::IoError("disk full".to_string()).into();
        assert_eq!(err.to_string(), "Storage error: I/O error: disk full");
    }

    #[test]
    fn test_storage_factory_memory() {
        let config = StorageConfig::Memory(MemoryStorageConfig::default());
        let storage = StorageFactory::create(config).unwrap();
        assert!(!storage.file_exists("_0.fdt"));
    }

    #[test]
    fn test_storage_factory_file() {
        use tempfile::TempDir;

        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig::File(FileStorageConfig::new(temp_dir.path()));
        let storage = StorageFactory::create(config).unwrap();

        let mut output = storage.create_output("_0.tis").unwrap();
        output.write_all(b"terms").unwrap();
        output.close().unwrap();

        let mut input = storage.open_input("_0.tis").unwrap();
        let mut buffer = Vec::new();
        input.read_to_end(&mut buffer).unwrap();
        assert_eq!(buffer, b"terms");
    }
}
