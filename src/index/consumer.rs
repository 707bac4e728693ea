//! Contracts of the indexing chain driven by the documents writer.
//!
//! The writer owns one global [`DocConsumer`] and one
//! [`DocConsumerPerThread`] per thread state. Each document runs through
//! `start_document`, `process_fields` and `finish_document` on a leased
//! per-thread consumer with no writer lock held. The [`DocWriter`] returned
//! at the end is handed to the wait queue, which finishes artifacts in doc
//! id order.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::document::Field;
use crate::error::Result;
use crate::storage::Storage;

/// Number of UTF-16 units of a skipped term kept for the warning.
pub const MAX_TERM_PREFIX_UNITS: usize = 30;

/// Per-document context shared by all stages of the chain.
#[derive(Debug, Clone)]
pub struct DocState {
    /// Id of the document within the buffered segment.
    pub doc_id: u32,
    /// Segment holding the stored fields and term vectors.
    pub doc_store_segment: Arc<str>,
    /// Docs already in the doc store before this segment's first doc.
    pub doc_store_offset: usize,
    /// Prefix of the first term skipped for being too long.
    pub max_term_prefix: Option<String>,
}

impl DocState {
    pub fn new(doc_id: u32, doc_store_segment: Arc<str>, doc_store_offset: usize) -> Self {
        DocState {
            doc_id,
            doc_store_segment,
            doc_store_offset,
            max_term_prefix: None,
        }
    }

    /// Position of the document in the doc store.
    pub fn store_doc_id(&self) -> usize {
        self.doc_store_offset + self.doc_id as usize
    }

    /// Remembers the first over-long term of the document.
    pub fn note_skipped_term(&mut self, text: &[u16]) {
        if self.max_term_prefix.is_none() {
            let end = text.len().min(MAX_TERM_PREFIX_UNITS);
            self.max_term_prefix = Some(String::from_utf16_lossy(&text[..end]));
        }
    }
}

/// Everything a flush or doc store close writes into.
#[derive(Debug)]
pub struct SegmentWriteState {
    pub storage: Arc<dyn Storage>,
    pub segment_name: String,
    pub doc_store_segment_name: Option<String>,
    /// Docs in the segment being flushed.
    pub num_docs: usize,
    /// Docs in the doc store, counting earlier segments sharing it.
    pub num_docs_in_store: usize,
    /// Files completed by this flush or close.
    pub flushed_files: BTreeSet<String>,
}

impl SegmentWriteState {
    pub fn new(
        storage: Arc<dyn Storage>,
        segment_name: impl Into<String>,
        doc_store_segment_name: Option<String>,
        num_docs: usize,
        num_docs_in_store: usize,
    ) -> Self {
        SegmentWriteState {
            storage,
            segment_name: segment_name.into(),
            doc_store_segment_name,
            num_docs,
            num_docs_in_store,
            flushed_files: BTreeSet::new(),
        }
    }

    pub fn segment_file_name(&self, extension: &str) -> String {
        format!("{}.{extension}", self.segment_name)
    }
}

/// A finished document's pending output.
pub trait DocWriter: Send {
    fn doc_id(&self) -> u32;

    /// Writes the document. Called exactly once, in doc id order.
    fn finish(self: Box<Self>) -> Result<()>;

    /// Discards the document without writing it.
    fn abort(self: Box<Self>);

    /// Bytes held until the document is finished.
    fn size_in_bytes(&self) -> usize;
}

/// Placeholder for a document with no doc store output. Writers catch up
/// on skipped ids the next time they write.
#[derive(Debug, Clone, Copy)]
pub struct SkipDocWriter {
    pub doc_id: u32,
}

impl DocWriter for SkipDocWriter {
    fn doc_id(&self) -> u32 {
        self.doc_id
    }

    fn finish(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    fn abort(self: Box<Self>) {}

    fn size_in_bytes(&self) -> usize {
        0
    }
}

/// Two artifacts of the same document.
pub struct BothDocWriter {
    pub one: Box<dyn DocWriter>,
    pub two: Box<dyn DocWriter>,
}

impl DocWriter for BothDocWriter {
    fn doc_id(&self) -> u32 {
        self.one.doc_id()
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let BothDocWriter { one, two } = *self;
        let first = one.finish();
        let second = two.finish();
        first.and(second)
    }

    fn abort(self: Box<Self>) {
        let BothDocWriter { one, two } = *self;
        one.abort();
        two.abort();
    }

    fn size_in_bytes(&self) -> usize {
        self.one.size_in_bytes() + self.two.size_in_bytes()
    }
}

/// Combines optional artifacts of one document.
pub fn combine(
    one: Option<Box<dyn DocWriter>>,
    two: Option<Box<dyn DocWriter>>,
) -> Option<Box<dyn DocWriter>> {
    match (one, two) {
        (Some(one), Some(two)) => Some(Box::new(BothDocWriter { one, two })),
        (one, None) => one,
        (None, two) => two,
    }
}

/// The global half of an indexing chain.
pub trait DocConsumer: Send + Sync {
    type PerThread: DocConsumerPerThread;

    /// Creates the consumer of a new thread state.
    fn add_thread(&self) -> Result<Self::PerThread>;

    /// Writes the buffered documents of all thread states as one segment.
    /// Thread state buffers are reset afterwards.
    fn flush(&self, threads: &mut [&mut Self::PerThread], state: &mut SegmentWriteState)
        -> Result<()>;

    /// Closes the shared doc store.
    fn close_doc_store(&self, state: &mut SegmentWriteState) -> Result<()>;

    /// Discards open doc store output.
    fn abort(&self);

    /// Releases recyclable memory. Returns whether anything was freed.
    fn free_ram(&self) -> bool;
}

/// The per-thread half of an indexing chain.
pub trait DocConsumerPerThread: Send {
    fn start_document(&mut self, doc_state: &DocState);

    /// Consumes the document's fields. A non-aborting error only affects
    /// this document.
    fn process_fields(&mut self, doc_state: &mut DocState, fields: &mut [Field]) -> Result<()>;

    fn finish_document(&mut self, doc_state: &DocState) -> Result<Option<Box<dyn DocWriter>>>;

    /// Drops the partial output of a failed document.
    fn abort_document(&mut self, doc_state: &DocState);

    /// Discards everything buffered since the last flush.
    fn abort(&mut self);

    fn process_document(
        &mut self,
        doc_state: &mut DocState,
        fields: &mut [Field],
    ) -> Result<Option<Box<dyn DocWriter>>> {
        self.start_document(doc_state);
        self.process_fields(doc_state, fields)?;
        self.finish_document(doc_state)
    }
}
