//! Configuration for the documents writer.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PennantError, Result};
use crate::index::arena::byte_pool::LEVEL_SIZES;

/// Default RAM budget: 16 MiB.
pub const DEFAULT_RAM_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Default cap on concurrently active thread states.
pub const DEFAULT_MAX_THREAD_STATES: usize = 5;

/// Configuration for [`DocumentsWriter`](crate::index::writer::DocumentsWriter).
///
/// Every fraction is relative to `ram_buffer_size`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentsWriterConfig {
    /// RAM budget in bytes. `None` disables RAM-based flushing.
    pub ram_buffer_size: Option<usize>,

    /// Flush once this many documents are buffered. Ignored while
    /// RAM-based flushing is enabled.
    pub max_buffered_docs: Option<usize>,

    /// Flush once this many delete terms, doc ids and queries are buffered.
    pub max_buffered_delete_terms: Option<usize>,

    /// Maximum number of thread states before sessions share them.
    pub max_thread_states: usize,

    /// Out-of-order bytes held by the wait queue that pause producers.
    pub wait_queue_pause_fraction: f64,

    /// Held bytes at which paused producers resume.
    pub wait_queue_resume_fraction: f64,

    /// Allocated bytes above which the RAM balancer starts freeing blocks.
    pub free_trigger_fraction: f64,

    /// Allocated bytes the RAM balancer frees down to.
    pub free_level_fraction: f64,

    /// Size of byte blocks in bytes.
    pub byte_block_size: usize,

    /// Size of int blocks in `u32` entries.
    pub int_block_size: usize,

    /// Size of char blocks in UTF-16 code units.
    pub char_block_size: usize,

    /// Size of per-document buffer blocks in bytes.
    pub per_doc_block_size: usize,

    /// Posting records moved per refill or release of the shared free list.
    pub postings_free_chunk: usize,

    /// Prefix of generated segment names.
    pub segment_prefix: String,
}

impl Default for DocumentsWriterConfig {
    fn default() -> Self {
        DocumentsWriterConfig {
            ram_buffer_size: Some(DEFAULT_RAM_BUFFER_SIZE),
            max_buffered_docs: None,
            max_buffered_delete_terms: None,
            max_thread_states: DEFAULT_MAX_THREAD_STATES,
            wait_queue_pause_fraction: 0.10,
            wait_queue_resume_fraction: 0.05,
            free_trigger_fraction: 1.05,
            free_level_fraction: 0.95,
            byte_block_size: 32 * 1024,
            int_block_size: 8 * 1024,
            char_block_size: 16 * 1024,
            per_doc_block_size: 1024,
            postings_free_chunk: 256,
            segment_prefix: "_".to_string(),
        }
    }
}

impl DocumentsWriterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the RAM budget; `None` disables RAM-based flushing.
    pub fn with_ram_buffer_size(mut self, bytes: Option<usize>) -> Self {
        self.ram_buffer_size = bytes;
        self
    }

    pub fn with_max_buffered_docs(mut self, docs: Option<usize>) -> Self {
        self.max_buffered_docs = docs;
        self
    }

    pub fn with_max_buffered_delete_terms(mut self, terms: Option<usize>) -> Self {
        self.max_buffered_delete_terms = terms;
        self
    }

    pub fn with_max_thread_states(mut self, states: usize) -> Self {
        self.max_thread_states = states;
        self
    }

    pub fn with_wait_queue_fractions(mut self, pause: f64, resume: f64) -> Self {
        self.wait_queue_pause_fraction = pause;
        self.wait_queue_resume_fraction = resume;
        self
    }

    pub fn with_free_fractions(mut self, trigger: f64, level: f64) -> Self {
        self.free_trigger_fraction = trigger;
        self.free_level_fraction = level;
        self
    }

    /// Set all block sizes at once. Handy for exercising block boundaries.
    pub fn with_block_sizes(
        mut self,
        byte_block: usize,
        int_block: usize,
        char_block: usize,
        per_doc_block: usize,
    ) -> Self {
        self.byte_block_size = byte_block;
        self.int_block_size = int_block;
        self.char_block_size = char_block;
        self.per_doc_block_size = per_doc_block;
        self
    }

    pub fn with_segment_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.segment_prefix = prefix.into();
        self
    }

    /// Whether RAM-based flushing is active.
    pub fn flush_by_ram(&self) -> bool {
        self.ram_buffer_size.is_some()
    }

    /// Document-count flush threshold, honored only without a RAM budget.
    pub fn flush_by_count(&self) -> Option<usize> {
        if self.flush_by_ram() {
            None
        } else {
            self.max_buffered_docs
        }
    }

    /// Wait-queue pause threshold in bytes.
    pub fn wait_queue_pause_bytes(&self) -> usize {
        self.fraction_of_budget(self.wait_queue_pause_fraction)
            .unwrap_or(4 * 1024 * 1024)
    }

    /// Wait-queue resume threshold in bytes.
    pub fn wait_queue_resume_bytes(&self) -> usize {
        self.fraction_of_budget(self.wait_queue_resume_fraction)
            .unwrap_or(2 * 1024 * 1024)
    }

    /// Allocated bytes that trigger freeing, if RAM flushing is active.
    pub fn free_trigger_bytes(&self) -> Option<usize> {
        self.fraction_of_budget(self.free_trigger_fraction)
    }

    /// Allocated bytes the balancer frees down to, if RAM flushing is active.
    pub fn free_level_bytes(&self) -> Option<usize> {
        self.fraction_of_budget(self.free_level_fraction)
    }

    fn fraction_of_budget(&self, fraction: f64) -> Option<usize> {
        self.ram_buffer_size
            .map(|budget| (budget as f64 * fraction) as usize)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        for (name, size) in [
            ("byte_block_size", self.byte_block_size),
            ("int_block_size", self.int_block_size),
            ("char_block_size", self.char_block_size),
            ("per_doc_block_size", self.per_doc_block_size),
        ] {
            if !size.is_power_of_two() {
                return Err(PennantError::invalid_config(format!(
                    "{name} must be a power of two, got {size}"
                )));
            }
        }

        let max_level = LEVEL_SIZES.iter().copied().max().unwrap_or(0);
        if self.byte_block_size < max_level {
            return Err(PennantError::invalid_config(format!(
                "byte_block_size must be at least {max_level}"
            )));
        }

        if self.byte_block_size > (1 << 24) {
            return Err(PennantError::invalid_config(
                "byte_block_size must not exceed 16 MiB",
            ));
        }

        if self.max_thread_states == 0 {
            return Err(PennantError::invalid_config(
                "max_thread_states must be greater than 0",
            ));
        }

        if self.postings_free_chunk == 0 {
            return Err(PennantError::invalid_config(
                "postings_free_chunk must be greater than 0",
            ));
        }

        if self.max_buffered_docs == Some(0) {
            return Err(PennantError::invalid_config(
                "max_buffered_docs must be greater than 0",
            ));
        }

        if self.ram_buffer_size == Some(0) {
            return Err(PennantError::invalid_config(
                "ram_buffer_size must be greater than 0",
            ));
        }

        if self.wait_queue_resume_fraction > self.wait_queue_pause_fraction {
            return Err(PennantError::invalid_config(
                "wait_queue_resume_fraction must not exceed wait_queue_pause_fraction",
            ));
        }

        if self.free_level_fraction > self.free_trigger_fraction {
            return Err(PennantError::invalid_config(
                "free_level_fraction must not exceed free_trigger_fraction",
            ));
        }

        Ok(())
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DocumentsWriterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DocumentsWriterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_thread_states, 5);
        assert_eq!(config.byte_block_size, 32768);
        assert_eq!(config.wait_queue_pause_bytes(), DEFAULT_RAM_BUFFER_SIZE / 10);
        assert_eq!(config.wait_queue_resume_bytes(), DEFAULT_RAM_BUFFER_SIZE / 20);
    }

    #[test]
    fn test_count_threshold_ignored_with_ram_budget() {
        let config = DocumentsWriterConfig::default().with_max_buffered_docs(Some(10));
        assert_eq!(config.flush_by_count(), None);

        let config = config.with_ram_buffer_size(None);
        assert_eq!(config.flush_by_count(), Some(10));
        assert_eq!(config.free_trigger_bytes(), None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_block = DocumentsWriterConfig::default().with_block_sizes(1000, 8192, 16384, 1024);
        assert!(bad_block.validate().is_err());

        let tiny_block = DocumentsWriterConfig::default().with_block_sizes(128, 8192, 16384, 1024);
        assert!(tiny_block.validate().is_err());

        let no_states = DocumentsWriterConfig::default().with_max_thread_states(0);
        assert!(no_states.validate().is_err());

        let inverted = DocumentsWriterConfig::default().with_wait_queue_fractions(0.05, 0.10);
        assert!(inverted.validate().is_err());

        let inverted = DocumentsWriterConfig::default().with_free_fractions(0.9, 1.0);
        assert!(inverted.validate().is_err());

        let zero_docs = DocumentsWriterConfig::default().with_max_buffered_docs(Some(0));
        assert!(zero_docs.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_with_defaults() {
        let config = DocumentsWriterConfig::from_json(r#"{"max_thread_states": 2}"#).unwrap();
        assert_eq!(config.max_thread_states, 2);
        assert_eq!(config.segment_prefix, "_");

        let json = config.to_json().unwrap();
        let parsed = DocumentsWriterConfig::from_json(&json).unwrap();
        assert_eq!(parsed.max_thread_states, 2);

        assert!(DocumentsWriterConfig::from_json(r#"{"max_thread_states": 0}"#).is_err());
    }
}
