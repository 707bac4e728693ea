//! Document buffering and segment flushing.
//!
//! [`writer::DocumentsWriter`] is the entry point. The default indexing
//! chain ([`doc_field_processor`]) inverts fields into per-thread postings
//! hashes backed by the block [`arena`], and writes stored fields and term
//! vectors to a doc store shared by consecutive segments.

pub mod arena;
pub mod config;
pub mod consumer;
pub mod deletes;
pub mod doc_field_processor;
pub mod field_infos;
pub mod files;
pub mod freq_prox;
pub mod postings_hash;
pub mod ram;
pub mod stored_fields;
pub mod term_vectors;
pub mod terms_hash;
pub mod thread_pool;
pub mod wait_queue;
pub mod writer;

pub use config::DocumentsWriterConfig;
pub use deletes::{BitmapDeleteTarget, DeleteQuery, DeleteTarget, TermsDeleteQuery};
pub use thread_pool::Session;
pub use writer::{DocumentsWriter, FlushedSegment};
