//! # Pennant
//!
//! Concurrent document buffering for an inverted index.
//!
//! Many producer threads add documents to one [`DocumentsWriter`]. Each
//! document is inverted into in-memory postings on a per-thread state,
//! while stored fields and term vectors stream to a shared doc store in doc
//! id order. When the RAM budget or document count is reached, the buffer
//! is flushed as a segment of postings files.
//!
//! ## Features
//!
//! - Gap-free doc ids across concurrent producers
//! - Pooled block arena with RAM accounting and balancing
//! - Buffered term, query and doc id deletes with per-delete doc limits
//! - Doc stores shared across segments
//! - Pluggable storage backends

pub mod document;
pub mod error;
pub mod index;
pub mod storage;
pub mod util;

pub use document::{Document, Field, FieldValue, Term, Token};
pub use error::{PennantError, Result};
pub use index::{DocumentsWriter, DocumentsWriterConfig, FlushedSegment, Session};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
