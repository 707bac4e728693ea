//! The documents writer.
//!
//! [`DocumentsWriter`] buffers documents added concurrently by many
//! producers and flushes them as segments. Each document gets a gap-free
//! doc id and is inverted on a leased thread state without holding the
//! writer lock. Finished documents are written to the shared doc stores in
//! doc id order through the wait queue.
//!
//! The writer never flushes on its own. `add_document`, `update_document`
//! and the delete buffering calls return `true` when the caller must call
//! [`DocumentsWriter::flush`]; until it does, new documents block.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pennant::document::Document;
//! use pennant::index::config::DocumentsWriterConfig;
//! use pennant::index::writer::DocumentsWriter;
//! use pennant::storage::memory::MemoryStorage;
//!
//! let storage = Arc::new(MemoryStorage::new_default());
//! let writer = DocumentsWriter::new(storage, DocumentsWriterConfig::default()).unwrap();
//! let session = writer.session();
//!
//! let doc = Document::builder()
//!     .add_text("body", "hello buffered world", true)
//!     .build();
//! if writer.add_document(&session, doc).unwrap() {
//!     writer.flush(false).unwrap();
//! }
//! writer.flush(true).unwrap();
//! let segments = writer.take_flushed_segments();
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::document::{Document, Term};
use crate::error::{PennantError, Result};
use crate::index::arena::{Arena, ArenaStats, PoolKind, PoolStats};
use crate::index::config::DocumentsWriterConfig;
use crate::index::consumer::{
    DocConsumer, DocConsumerPerThread, DocState, DocWriter, SegmentWriteState, SkipDocWriter,
};
use crate::index::deletes::{BufferedDeletes, DeleteQuery, DeleteTarget};
use crate::index::doc_field_processor::DocFieldProcessor;
use crate::index::field_infos::FieldInfos;
use crate::index::files::FileTracker;
use crate::index::ram::RamPolicy;
use crate::index::thread_pool::{Session, ThreadLease, ThreadStatePool};
use crate::index::wait_queue::WaitQueue;
use crate::storage::Storage;

/// A segment written by a flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushedSegment {
    pub name: String,
    pub num_docs: usize,
    /// Segment whose doc store holds this segment's stored fields and term
    /// vectors.
    pub doc_store_segment: Option<String>,
    /// Position of this segment's first document in the doc store.
    pub doc_store_offset: usize,
    /// Whether the doc store was closed by this flush.
    pub doc_store_closed: bool,
    pub files: BTreeSet<String>,
}

/// Handles a chain factory receives to build its consumers.
pub struct IndexingChainContext<'a> {
    pub storage: &'a Arc<dyn Storage>,
    pub files: &'a Arc<FileTracker>,
    pub arena: &'a Arc<Arena>,
    pub config: &'a DocumentsWriterConfig,
}

struct WriterState<P> {
    segment: Option<Arc<str>>,
    doc_store_segment: Option<Arc<str>>,
    doc_store_offset: usize,
    segment_counter: u64,

    next_doc_id: u32,
    num_docs_in_ram: usize,
    num_docs_in_store: usize,
    flushed_doc_count: usize,

    pause_threads: usize,
    flush_pending: bool,
    buffer_is_full: bool,
    aborting: bool,
    /// Bumped by every abort; waiters compare it to notice their document
    /// was discarded.
    abort_epoch: u64,
    closed: bool,

    deletes_in_ram: BufferedDeletes,
    deletes_flushed: BufferedDeletes,

    wait_queue: WaitQueue,
    pool: ThreadStatePool<P>,
    flushed_segments: Vec<FlushedSegment>,
}

impl<P> WriterState<P> {
    fn new(config: &DocumentsWriterConfig) -> Self {
        WriterState {
            segment: None,
            doc_store_segment: None,
            doc_store_offset: 0,
            segment_counter: 0,
            next_doc_id: 0,
            num_docs_in_ram: 0,
            num_docs_in_store: 0,
            flushed_doc_count: 0,
            pause_threads: 0,
            flush_pending: false,
            buffer_is_full: false,
            aborting: false,
            abort_epoch: 0,
            closed: false,
            deletes_in_ram: BufferedDeletes::new(),
            deletes_flushed: BufferedDeletes::new(),
            wait_queue: WaitQueue::new(
                config.wait_queue_pause_bytes(),
                config.wait_queue_resume_bytes(),
            ),
            pool: ThreadStatePool::new(config.max_thread_states),
            flushed_segments: Vec::new(),
        }
    }

    fn deletes_bytes(&self) -> usize {
        self.deletes_in_ram.bytes_used() + self.deletes_flushed.bytes_used()
    }

    /// Claims the pending flush. Returns false if one was already pending.
    fn set_flush_pending(&mut self) -> bool {
        if self.flush_pending {
            false
        } else {
            self.flush_pending = true;
            true
        }
    }

    fn push_deletes(&mut self) {
        self.deletes_flushed.update(&mut self.deletes_in_ram);
    }
}

type StateGuard<'a, P> = MutexGuard<'a, WriterState<P>>;

/// Buffers concurrently added documents and flushes them as segments.
pub struct DocumentsWriter<C: DocConsumer = DocFieldProcessor> {
    config: DocumentsWriterConfig,
    storage: Arc<dyn Storage>,
    arena: Arc<Arena>,
    files: Arc<FileTracker>,
    ram: RamPolicy,
    consumer: C,
    state: Mutex<WriterState<C::PerThread>>,
    cond: Condvar,
}

impl<C: DocConsumer> fmt::Debug for DocumentsWriter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DocumentsWriter")
            .field("segment", &state.segment)
            .field("doc_store_segment", &state.doc_store_segment)
            .field("num_docs_in_ram", &state.num_docs_in_ram)
            .field("flushed_doc_count", &state.flushed_doc_count)
            .field("thread_states", &state.pool.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl DocumentsWriter<DocFieldProcessor> {
    /// Creates a writer with the default indexing chain.
    pub fn new(storage: Arc<dyn Storage>, config: DocumentsWriterConfig) -> Result<Self> {
        Self::with_consumer(storage, config, |ctx| {
            Ok(DocFieldProcessor::new(
                Arc::clone(ctx.storage),
                Arc::clone(ctx.files),
                Arc::clone(ctx.arena),
                ctx.config,
            ))
        })
    }

    pub fn field_infos(&self) -> &Arc<FieldInfos> {
        self.consumer.field_infos()
    }
}

impl<C: DocConsumer> DocumentsWriter<C> {
    /// Creates a writer whose indexing chain is built once by `build`.
    pub fn with_consumer<F>(
        storage: Arc<dyn Storage>,
        config: DocumentsWriterConfig,
        build: F,
    ) -> Result<Self>
    where
        F: FnOnce(&IndexingChainContext<'_>) -> Result<C>,
    {
        config.validate()?;
        let arena = Arc::new(Arena::new(&config));
        let files = Arc::new(FileTracker::new());
        let consumer = build(&IndexingChainContext {
            storage: &storage,
            files: &files,
            arena: &arena,
            config: &config,
        })?;

        Ok(DocumentsWriter {
            ram: RamPolicy::new(&config),
            state: Mutex::new(WriterState::new(&config)),
            cond: Condvar::new(),
            config,
            storage,
            arena,
            files,
            consumer,
        })
    }

    pub fn config(&self) -> &DocumentsWriterConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    /// Opens a new producer session.
    pub fn session(&self) -> Session {
        Session::new()
    }

    /// Adds one document. Returns whether the caller must flush now.
    ///
    /// A document that fails without corrupting shared state is marked
    /// deleted and its error returned; everything else buffered survives.
    /// Any other failure aborts the whole buffer.
    pub fn add_document(&self, session: &Session, doc: Document) -> Result<bool> {
        self.update(session, doc, None)
    }

    /// Adds one document and deletes every earlier document containing
    /// `delete_term`.
    pub fn update_document(&self, session: &Session, doc: Document, delete_term: Term) -> Result<bool> {
        self.update(session, doc, Some(delete_term))
    }

    fn update(&self, session: &Session, doc: Document, delete_term: Option<Term>) -> Result<bool> {
        let mut lease = self.lease(session, delete_term)?;

        let mut fields = doc.into_fields();
        let processed = lease
            .consumer
            .process_document(&mut lease.doc_state, &mut fields);
        drop(fields);

        match processed {
            Ok(doc_writer) => self.finish_document(lease, doc_writer),
            Err(err) => Err(self.fail_document(lease, err)),
        }
    }

    /// Binds the session, waits for its thread state and assigns the next
    /// doc id.
    fn lease(&self, session: &Session, delete_term: Option<Term>) -> Result<ThreadLease<C::PerThread>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PennantError::AlreadyClosed);
        }
        let slot = state.pool.bind(*session, || self.consumer.add_thread())?;
        self.wait_ready(&mut state, Some(slot))?;
        self.init_segment_name(&mut state);

        let st = &mut *state;
        let doc_id = st.next_doc_id;
        let doc_store_segment = match &st.doc_store_segment {
            Some(name) => Arc::clone(name),
            None => return Err(PennantError::internal("doc store segment not assigned")),
        };
        let mut lease = st
            .pool
            .lease(slot, DocState::new(doc_id, doc_store_segment, st.doc_store_offset))?;

        if let Some(term) = delete_term {
            let limit = st.flushed_doc_count + doc_id as usize;
            st.deletes_in_ram.add_term(term, limit);
            lease.flush_after = self.time_to_flush_deletes(st);
        }

        st.next_doc_id += 1;
        st.num_docs_in_ram += 1;

        // Commit to the flush now so a count-triggered segment gets exactly
        // the configured number of documents.
        if !st.flush_pending && self.ram.flush_by_count(st.num_docs_in_ram) {
            st.flush_pending = true;
            lease.flush_after = true;
        }
        Ok(lease)
    }

    /// Blocks until `slot` is idle and no pause, flush or abort is pending.
    fn wait_ready(&self, state: &mut StateGuard<'_, C::PerThread>, slot: Option<usize>) -> Result<()> {
        loop {
            if state.closed {
                return Err(PennantError::AlreadyClosed);
            }
            let busy = slot.is_some_and(|slot| !state.pool.is_idle(slot));
            if !busy && state.pause_threads == 0 && !state.flush_pending && !state.aborting {
                return Ok(());
            }
            self.cond.wait(state);
        }
    }

    fn init_segment_name(&self, state: &mut WriterState<C::PerThread>) {
        if state.segment.is_none() {
            debug_assert_eq!(state.num_docs_in_ram, 0);
            let name = segment_name(&self.config.segment_prefix, state.segment_counter);
            state.segment_counter += 1;
            state.segment = Some(Arc::from(name));
        }
        if state.doc_store_segment.is_none() {
            debug_assert_eq!(state.num_docs_in_store, 0);
            state.doc_store_segment = state.segment.clone();
        }
    }

    fn finish_document(
        &self,
        mut lease: ThreadLease<C::PerThread>,
        doc_writer: Option<Box<dyn DocWriter>>,
    ) -> Result<bool> {
        self.balance_ram();

        let mut state = self.state.lock();
        let doc_id = lease.doc_id();
        if state.aborting {
            if let Some(doc_writer) = doc_writer {
                doc_writer.abort();
            }
            state.pool.restore(lease.slot, lease.consumer);
            self.cond.notify_all();
            log::debug!("discarded document {doc_id} during abort");
            return Err(PennantError::Aborted);
        }

        let doc: Box<dyn DocWriter> = match doc_writer {
            Some(doc_writer) => doc_writer,
            None => Box::new(SkipDocWriter { doc_id }),
        };
        debug_assert_eq!(doc.doc_id(), doc_id);

        match self.enqueue(&mut state, doc) {
            Ok(true) => {
                let epoch = state.abort_epoch;
                while state.abort_epoch == epoch && !state.wait_queue.should_resume() {
                    self.cond.wait(&mut state);
                }
                if state.abort_epoch != epoch {
                    state.pool.restore(lease.slot, lease.consumer);
                    self.cond.notify_all();
                    log::debug!("document {doc_id} was discarded by an abort while paused");
                    return Err(PennantError::Aborted);
                }
            }
            Ok(false) => {}
            Err(err) => {
                state.pool.restore(lease.slot, lease.consumer);
                self.cond.notify_all();
                let err = err.into_aborting();
                log::warn!("writing document {doc_id} failed, aborting: {err}");
                self.abort_locked(&mut state);
                return Err(err);
            }
        }

        if state.buffer_is_full && !state.flush_pending {
            state.flush_pending = true;
            lease.flush_after = true;
        }
        state.pool.restore(lease.slot, lease.consumer);
        self.cond.notify_all();

        Ok(lease.flush_after || self.time_to_flush_deletes(&mut state))
    }

    /// Handles a document whose processing failed and returns its error.
    fn fail_document(&self, mut lease: ThreadLease<C::PerThread>, err: PennantError) -> PennantError {
        lease.consumer.abort_document(&lease.doc_state);

        let mut state = self.state.lock();
        let doc_id = lease.doc_id();

        if err.is_aborting() || state.aborting {
            state.pool.restore(lease.slot, lease.consumer);
            self.cond.notify_all();
            if !state.aborting {
                log::warn!("document {doc_id} hit an aborting error: {err}");
                self.abort_locked(&mut state);
            }
            return err;
        }

        if let Err(write_err) = self.enqueue(&mut state, Box::new(SkipDocWriter { doc_id })) {
            state.pool.restore(lease.slot, lease.consumer);
            self.cond.notify_all();
            self.abort_locked(&mut state);
            return write_err.into_aborting();
        }

        state.pool.restore(lease.slot, lease.consumer);
        if lease.flush_after {
            state.flush_pending = false;
        }
        self.cond.notify_all();

        let absolute = state.flushed_doc_count + doc_id as usize;
        state.deletes_in_ram.add_doc_id(absolute);
        log::warn!("document {doc_id} failed and was marked deleted: {err}");
        err
    }

    /// Hands a finished document to the wait queue, counting the documents
    /// this writes to the doc store.
    fn enqueue(&self, state: &mut WriterState<C::PerThread>, doc: Box<dyn DocWriter>) -> Result<bool> {
        let before = state.wait_queue.next_write_doc_id();
        let result = state.wait_queue.add(doc);
        let written = state.wait_queue.next_write_doc_id() - before;
        state.num_docs_in_store += written as usize;
        result
    }

    fn balance_ram(&self) {
        let deletes = {
            let state = self.state.lock();
            let deletes = state.deletes_bytes();
            if !self.ram.should_balance(
                self.arena.bytes_used(),
                self.arena.bytes_allocated(),
                deletes,
                state.buffer_is_full,
            ) {
                return;
            }
            deletes
        };

        let outcome = self
            .ram
            .balance(&self.arena, deletes, || self.consumer.free_ram());
        if outcome.buffer_is_full {
            self.state.lock().buffer_is_full = true;
        }
    }

    fn time_to_flush_deletes(&self, state: &mut WriterState<C::PerThread>) -> bool {
        let full = state.buffer_is_full
            || self.ram.deletes_full(
                state.deletes_bytes(),
                self.arena.bytes_used(),
                state.deletes_in_ram.size(),
            );
        full && state.set_flush_pending()
    }

    /// Buffers a delete of every document containing `term` added so far.
    /// Returns whether the caller must flush now.
    pub fn buffer_delete_term(&self, term: Term) -> Result<bool> {
        self.buffer_delete_terms([term])
    }

    pub fn buffer_delete_terms<I>(&self, terms: I) -> Result<bool>
    where
        I: IntoIterator<Item = Term>,
    {
        let mut state = self.state.lock();
        self.wait_ready(&mut state, None)?;
        let st = &mut *state;
        let limit = st.flushed_doc_count + st.num_docs_in_ram;
        for term in terms {
            st.deletes_in_ram.add_term(term, limit);
        }
        Ok(self.time_to_flush_deletes(st))
    }

    /// Buffers a delete of every document matching `query` added so far.
    pub fn buffer_delete_query(&self, query: Arc<dyn DeleteQuery>) -> Result<bool> {
        self.buffer_delete_queries([query])
    }

    pub fn buffer_delete_queries<I>(&self, queries: I) -> Result<bool>
    where
        I: IntoIterator<Item = Arc<dyn DeleteQuery>>,
    {
        let mut state = self.state.lock();
        self.wait_ready(&mut state, None)?;
        let st = &mut *state;
        let limit = st.flushed_doc_count + st.num_docs_in_ram;
        for query in queries {
            st.deletes_in_ram.add_query(query, limit);
        }
        Ok(self.time_to_flush_deletes(st))
    }

    /// Waits until every thread state is idle and keeps new documents out
    /// until the matching [`DocumentsWriter::resume_all_threads`].
    pub fn pause_all_threads(&self) {
        let mut state = self.state.lock();
        self.pause_locked(&mut state);
    }

    pub fn resume_all_threads(&self) {
        let mut state = self.state.lock();
        state.pause_threads = state.pause_threads.saturating_sub(1);
        if state.pause_threads == 0 {
            self.cond.notify_all();
        }
    }

    fn pause_locked(&self, state: &mut StateGuard<'_, C::PerThread>) {
        state.pause_threads += 1;
        while !state.pool.all_idle() {
            self.cond.wait(state);
        }
    }

    /// Writes every buffered document as a new segment and moves buffered
    /// deletes to the flushed generation. With `close_doc_store` the shared
    /// doc store is closed too. Returns the number of documents flushed.
    ///
    /// A failed flush aborts the buffer.
    pub fn flush(&self, close_doc_store: bool) -> Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PennantError::AlreadyClosed);
        }
        while state.aborting {
            self.cond.wait(&mut state);
        }

        self.pause_locked(&mut state);
        let result = self.flush_locked(&mut state, close_doc_store);
        state.pause_threads -= 1;
        self.cond.notify_all();
        result
    }

    fn flush_locked(&self, state: &mut StateGuard<'_, C::PerThread>, close_doc_store: bool) -> Result<usize> {
        debug_assert!(state.pool.all_idle());

        if state.num_docs_in_ram == 0 {
            state.push_deletes();
            state.flush_pending = false;
            if close_doc_store {
                if let Err(err) = self.close_open_doc_store(state) {
                    self.abort_locked(state);
                    return Err(err);
                }
            }
            return Ok(0);
        }

        debug_assert_eq!(state.next_doc_id as usize, state.num_docs_in_ram);
        debug_assert_eq!(state.wait_queue.num_waiting(), 0);
        debug_assert_eq!(state.wait_queue.waiting_bytes(), 0);

        let segment = match &state.segment {
            Some(segment) => segment.to_string(),
            None => return Err(PennantError::internal("buffered documents without a segment")),
        };
        let doc_store_segment = state.doc_store_segment.as_deref().map(str::to_string);
        let doc_store_offset = state.doc_store_offset;
        let num_docs = state.num_docs_in_ram;

        let mut write_state = SegmentWriteState::new(
            Arc::clone(&self.storage),
            segment.clone(),
            doc_store_segment.clone(),
            num_docs,
            state.num_docs_in_store,
        );
        state.doc_store_offset = state.num_docs_in_store;
        log::debug!("flush postings as segment {segment} num_docs={num_docs}");

        if let Err(err) = self.write_segment(state, &mut write_state, close_doc_store) {
            log::warn!("flush of segment {segment} failed, aborting: {err}");
            self.abort_locked(state);
            return Err(err.into_aborting());
        }

        let st = &mut **state;
        st.flushed_doc_count += num_docs;
        st.push_deletes();
        st.flushed_segments.push(FlushedSegment {
            name: segment.clone(),
            num_docs,
            doc_store_segment,
            doc_store_offset,
            doc_store_closed: close_doc_store,
            files: write_state.flushed_files,
        });
        self.after_flush(st);

        let stats = self.arena.stats();
        log::debug!(
            "flushed segment {segment}: allocated {} bytes, {} free byte blocks, {} free char blocks",
            stats.allocated_bytes(),
            stats.byte.free_blocks,
            stats.char.free_blocks
        );
        Ok(num_docs)
    }

    fn write_segment(
        &self,
        state: &mut WriterState<C::PerThread>,
        write_state: &mut SegmentWriteState,
        close_doc_store: bool,
    ) -> Result<()> {
        if close_doc_store {
            self.close_doc_store_into(state, write_state)?;
            write_state.num_docs_in_store = 0;
        }
        let mut threads: Vec<&mut C::PerThread> = state.pool.consumers_mut().collect();
        self.consumer.flush(&mut threads, write_state)
    }

    fn close_open_doc_store(&self, state: &mut WriterState<C::PerThread>) -> Result<()> {
        let Some(name) = state.doc_store_segment.as_deref().map(str::to_string) else {
            return Ok(());
        };
        let mut write_state = SegmentWriteState::new(
            Arc::clone(&self.storage),
            name.clone(),
            Some(name),
            0,
            state.num_docs_in_store,
        );
        self.close_doc_store_into(state, &mut write_state)
    }

    fn close_doc_store_into(
        &self,
        state: &mut WriterState<C::PerThread>,
        write_state: &mut SegmentWriteState,
    ) -> Result<()> {
        self.files.clear_closed();
        self.consumer.close_doc_store(write_state)?;
        debug_assert!(!self.files.has_open_files());

        if let Some(name) = state.doc_store_segment.take() {
            log::info!(
                "closed doc store {name} with {} docs",
                write_state.num_docs_in_store
            );
        }
        state.doc_store_offset = 0;
        state.num_docs_in_store = 0;
        Ok(())
    }

    /// Resets the per-segment state once buffered documents are gone.
    fn after_flush(&self, state: &mut WriterState<C::PerThread>) {
        state.pool.clear_bindings();
        state.wait_queue.reset();
        state.segment = None;
        state.num_docs_in_ram = 0;
        state.next_doc_id = 0;
        state.buffer_is_full = false;
        state.flush_pending = false;
        self.arena.reset_postings_used();
    }

    /// Discards every buffered document, the open doc store and the deletes
    /// buffered since the last flush. Returns the files left behind, which
    /// the caller should delete.
    pub fn abort(&self) -> Vec<String> {
        let mut state = self.state.lock();
        if state.aborting {
            while state.aborting {
                self.cond.wait(&mut state);
            }
        } else {
            self.abort_locked(&mut state);
        }
        drop(state);
        self.files.aborted_files()
    }

    fn abort_locked(&self, state: &mut StateGuard<'_, C::PerThread>) {
        state.aborting = true;
        state.abort_epoch += 1;
        log::debug!("now abort");

        let discarded = state.wait_queue.abort();
        self.pause_locked(state);

        self.files.abort();
        let st = &mut **state;
        st.deletes_in_ram.clear();
        for consumer in st.pool.consumers_mut() {
            consumer.abort();
        }
        self.consumer.abort();
        st.doc_store_segment = None;
        st.num_docs_in_store = 0;
        st.doc_store_offset = 0;
        self.after_flush(st);

        st.pause_threads -= 1;
        st.aborting = false;
        self.cond.notify_all();
        log::debug!(
            "done abort: {discarded} waiting documents discarded, files {:?} left behind",
            self.files.aborted_files()
        );
    }

    /// Rejects every later call and wakes blocked producers with
    /// [`PennantError::AlreadyClosed`].
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Whether an abort is waiting for in-flight documents.
    pub fn is_aborting(&self) -> bool {
        self.state.lock().aborting
    }

    /// Applies flushed deletes to `targets`, which hold consecutive doc id
    /// ranges of the flushed segments in flush order. Returns whether any
    /// document was deleted.
    pub fn apply_deletes(&self, targets: &mut [&mut dyn DeleteTarget]) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.deletes_flushed.any() {
            return Ok(false);
        }
        log::debug!(
            "apply {} term, {} query and {} doc id deletes to {} segments",
            state.deletes_flushed.num_terms(),
            state.deletes_flushed.num_queries(),
            state.deletes_flushed.num_doc_ids(),
            targets.len()
        );
        let any = state.deletes_flushed.apply(targets)?;
        state.deletes_flushed.clear();
        Ok(any)
    }

    /// Whether flushed deletes wait to be applied.
    pub fn has_deletes(&self) -> bool {
        self.state.lock().deletes_flushed.any()
    }

    /// Whether buffered deletes are heavy enough to apply now.
    pub fn should_apply_deletes(&self) -> bool {
        let state = self.state.lock();
        self.ram
            .should_apply_deletes(state.deletes_bytes(), state.deletes_in_ram.size())
    }

    /// Buffered deletes not yet flushed.
    pub fn with_deletes_in_ram<R>(&self, f: impl FnOnce(&BufferedDeletes) -> R) -> R {
        f(&self.state.lock().deletes_in_ram)
    }

    pub fn with_deletes_flushed<R>(&self, f: impl FnOnce(&BufferedDeletes) -> R) -> R {
        f(&self.state.lock().deletes_flushed)
    }

    /// Bytes in active use, buffered deletes included.
    pub fn ram_used(&self) -> usize {
        let deletes = self.state.lock().deletes_bytes();
        self.arena.bytes_used() + deletes
    }

    pub fn bytes_allocated(&self) -> usize {
        self.arena.bytes_allocated()
    }

    pub fn bytes_used(&self) -> usize {
        self.arena.bytes_used()
    }

    pub fn deletes_ram_used(&self) -> usize {
        self.state.lock().deletes_bytes()
    }

    pub fn arena_stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    pub fn pool_stats(&self, kind: PoolKind) -> PoolStats {
        self.arena.pool_stats(kind)
    }

    pub fn num_docs_in_ram(&self) -> usize {
        self.state.lock().num_docs_in_ram
    }

    pub fn num_docs_in_store(&self) -> usize {
        self.state.lock().num_docs_in_store
    }

    pub fn flushed_doc_count(&self) -> usize {
        self.state.lock().flushed_doc_count
    }

    /// Name of the segment being buffered, if any document is.
    pub fn segment(&self) -> Option<String> {
        self.state.lock().segment.as_deref().map(str::to_string)
    }

    pub fn doc_store_segment(&self) -> Option<String> {
        self.state.lock().doc_store_segment.as_deref().map(str::to_string)
    }

    pub fn doc_store_offset(&self) -> usize {
        self.state.lock().doc_store_offset
    }

    pub fn num_thread_states(&self) -> usize {
        self.state.lock().pool.len()
    }

    pub fn buffer_is_full(&self) -> bool {
        self.state.lock().buffer_is_full
    }

    pub fn open_files(&self) -> Vec<String> {
        self.files.open_files()
    }

    pub fn closed_files(&self) -> Vec<String> {
        self.files.closed_files()
    }

    /// Files left behind by the last abort.
    pub fn aborted_files(&self) -> Vec<String> {
        self.files.aborted_files()
    }

    /// Segments flushed since the last call.
    pub fn take_flushed_segments(&self) -> Vec<FlushedSegment> {
        std::mem::take(&mut self.state.lock().flushed_segments)
    }

    /// Visits the consumer of every idle thread state.
    pub fn inspect_thread_states<F>(&self, mut f: F)
    where
        F: FnMut(&C::PerThread),
    {
        let state = self.state.lock();
        for consumer in state.pool.consumers() {
            f(consumer);
        }
    }
}

/// `prefix` followed by `counter` in base 36.
fn segment_name(prefix: &str, mut counter: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut digits = Vec::new();
    loop {
        digits.push(char::from(DIGITS[(counter % 36) as usize]));
        counter /= 36;
        if counter == 0 {
            break;
        }
    }
    let mut name = String::with_capacity(prefix.len() + digits.len());
    name.push_str(prefix);
    name.extend(digits.iter().rev());
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Field, FieldValue, TermVectorMode, Token};
    use crate::index::deletes::{BitmapDeleteTarget, TermsDeleteQuery};
    use crate::index::stored_fields::read_stored_fields;
    use crate::storage::memory::MemoryStorage;

    fn writer(config: DocumentsWriterConfig) -> (Arc<MemoryStorage>, DocumentsWriter) {
        let storage = Arc::new(MemoryStorage::new_default());
        let writer = DocumentsWriter::new(storage.clone(), config).unwrap();
        (storage, writer)
    }

    fn doc(id: &str, body: &str) -> Document {
        Document::builder()
            .add_text("id", id, true)
            .add_text("body", body, false)
            .build()
    }

    #[test]
    fn test_segment_names_are_base36() {
        assert_eq!(segment_name("_", 0), "_0");
        assert_eq!(segment_name("_", 35), "_z");
        assert_eq!(segment_name("_", 36), "_10");
        assert_eq!(segment_name("seg", 1297), "seg101");
    }

    #[test]
    fn test_add_and_flush() {
        let (storage, writer) = writer(DocumentsWriterConfig::default());
        let session = writer.session();
        for i in 0..3 {
            let flush = writer
                .add_document(&session, doc(&i.to_string(), "a b c"))
                .unwrap();
            assert!(!flush);
        }
        assert_eq!(writer.num_docs_in_ram(), 3);
        assert_eq!(writer.segment().as_deref(), Some("_0"));
        assert_eq!(writer.num_docs_in_store(), 3);

        assert_eq!(writer.flush(true).unwrap(), 3);
        assert_eq!(writer.num_docs_in_ram(), 0);
        assert_eq!(writer.flushed_doc_count(), 3);
        assert_eq!(writer.segment(), None);
        assert_eq!(writer.doc_store_segment(), None);
        assert_eq!(writer.bytes_used(), 0);

        let segments = writer.take_flushed_segments();
        assert_eq!(segments.len(), 1);
        let segment = &segments[0];
        assert_eq!(segment.name, "_0");
        assert_eq!(segment.num_docs, 3);
        assert!(segment.doc_store_closed);
        assert!(segment.files.contains("_0.fdt"));
        assert!(segment.files.contains("_0.frq"));

        let stored = read_stored_fields(&*storage, "_0").unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[2][0].1, FieldValue::Text("2".to_string()));
    }

    #[test]
    fn test_count_threshold_commits_to_flush() {
        let config = DocumentsWriterConfig::default()
            .with_ram_buffer_size(None)
            .with_max_buffered_docs(Some(2));
        let (_, writer) = writer(config);
        let session = writer.session();

        assert!(!writer.add_document(&session, doc("0", "x")).unwrap());
        assert!(writer.add_document(&session, doc("1", "x")).unwrap());
        assert_eq!(writer.flush(false).unwrap(), 2);
        assert_eq!(writer.flushed_doc_count(), 2);
        assert_eq!(writer.bytes_used(), 0);

        assert!(!writer.add_document(&session, doc("2", "x")).unwrap());
        assert_eq!(writer.segment().as_deref(), Some("_1"));
        assert_eq!(writer.doc_store_segment().as_deref(), Some("_0"));
        assert_eq!(writer.doc_store_offset(), 2);
        assert_eq!(writer.flush(true).unwrap(), 1);

        let segments = writer.take_flushed_segments();
        assert_eq!(segments[1].doc_store_segment.as_deref(), Some("_0"));
        assert_eq!(segments[1].doc_store_offset, 2);
    }

    #[test]
    fn test_update_deletes_only_earlier_docs() {
        let (_, writer) = writer(DocumentsWriterConfig::default());
        let session = writer.session();
        writer.add_document(&session, doc("a", "x")).unwrap();
        writer
            .update_document(&session, doc("a", "y"), Term::new("id", "a"))
            .unwrap();

        writer.with_deletes_in_ram(|deletes| {
            assert_eq!(deletes.term_limit(&Term::new("id", "a")), Some(1));
        });
        writer.flush(true).unwrap();
        assert!(writer.has_deletes());

        let mut target = BitmapDeleteTarget::from_segment(&**writer.storage(), "_0", 2).unwrap();
        assert!(writer.apply_deletes(&mut [&mut target]).unwrap());
        assert!(target.is_deleted(0));
        assert!(!target.is_deleted(1));
        assert!(!writer.has_deletes());
    }

    #[test]
    fn test_delete_limits_track_buffered_docs() {
        let (_, writer) = writer(DocumentsWriterConfig::default());
        let session = writer.session();
        writer.add_document(&session, doc("a", "x")).unwrap();
        writer.add_document(&session, doc("b", "x")).unwrap();
        writer.buffer_delete_term(Term::new("id", "a")).unwrap();
        let query = Arc::new(TermsDeleteQuery::new(vec![Term::new("body", "x")]));
        writer.buffer_delete_query(query.clone()).unwrap();
        writer.flush(false).unwrap();
        writer.add_document(&session, doc("c", "x")).unwrap();
        writer.buffer_delete_term(Term::new("id", "c")).unwrap();

        writer.with_deletes_flushed(|deletes| {
            assert_eq!(deletes.term_limit(&Term::new("id", "a")), Some(2));
            assert_eq!(deletes.query_limit(&query.key()), Some(2));
        });
        writer.with_deletes_in_ram(|deletes| {
            assert_eq!(deletes.term_limit(&Term::new("id", "c")), Some(3));
        });
    }

    #[test]
    fn test_abort_keeps_flushed_deletes() {
        let (_, writer) = writer(DocumentsWriterConfig::default());
        let session = writer.session();
        writer.buffer_delete_term(Term::new("id", "old")).unwrap();
        writer.flush(false).unwrap();

        writer.add_document(&session, doc("a", "x")).unwrap();
        writer.buffer_delete_term(Term::new("id", "a")).unwrap();
        let aborted = writer.abort();

        assert!(aborted.contains(&"_0.fdt".to_string()));
        assert!(aborted.contains(&"_0.fdx".to_string()));
        assert!(writer.open_files().is_empty());
        assert_eq!(writer.num_docs_in_ram(), 0);
        assert_eq!(writer.num_docs_in_store(), 0);
        assert_eq!(writer.doc_store_segment(), None);
        assert_eq!(writer.bytes_used(), 0);
        assert!(writer.has_deletes());
        writer.with_deletes_in_ram(|deletes| assert!(!deletes.any()));
        writer.inspect_thread_states(|thread| assert_eq!(thread.total_postings(), 0));
    }

    #[test]
    fn test_failed_document_is_deleted_alone() {
        let (_, writer) = writer(DocumentsWriterConfig::default());
        let session = writer.session();
        writer.add_document(&session, doc("0", "ok")).unwrap();

        let tokens: Vec<crate::error::Result<Token>> = vec![
            Ok(Token::new("fine").with_offsets(0, 4)),
            Err(PennantError::analysis("tokenizer broke")),
        ];
        let bad = Document::builder()
            .add_field(Field::indexed("body", Box::new(tokens.into_iter())))
            .build();
        let err = writer.add_document(&session, bad).unwrap_err();
        assert!(!err.is_aborting());

        writer.add_document(&session, doc("2", "ok")).unwrap();
        writer.with_deletes_in_ram(|deletes| assert_eq!(deletes.doc_ids(), &[1]));
        assert_eq!(writer.flush(true).unwrap(), 3);
    }

    #[test]
    fn test_closed_writer_rejects_calls() {
        let (_, writer) = writer(DocumentsWriterConfig::default());
        writer.close();
        assert!(writer.is_closed());
        let session = writer.session();
        assert!(matches!(
            writer.add_document(&session, doc("0", "x")),
            Err(PennantError::AlreadyClosed)
        ));
        assert!(matches!(
            writer.buffer_delete_term(Term::new("id", "0")),
            Err(PennantError::AlreadyClosed)
        ));
        assert!(matches!(writer.flush(false), Err(PennantError::AlreadyClosed)));
    }

    #[test]
    fn test_term_vectors_flow_through_doc_store() {
        let (storage, writer) = writer(DocumentsWriterConfig::default());
        let session = writer.session();
        let with_vectors = Document::builder()
            .add_field(
                Field::text("body", "red green red", false)
                    .with_term_vectors(TermVectorMode::WithPositionsOffsets),
            )
            .build();
        writer.add_document(&session, doc("0", "plain")).unwrap();
        writer.add_document(&session, with_vectors).unwrap();
        writer.flush(true).unwrap();

        assert_eq!(storage.file_size("_0.tvx").unwrap(), 4 + 2 * 16);
        let segments = writer.take_flushed_segments();
        assert!(segments[0].files.contains("_0.tvf"));
    }

    #[test]
    fn test_sessions_share_states_beyond_max() {
        let (_, writer) = writer(DocumentsWriterConfig::default().with_max_thread_states(1));
        let a = writer.session();
        let b = writer.session();
        writer.add_document(&a, doc("0", "x")).unwrap();
        writer.add_document(&b, doc("1", "x")).unwrap();
        assert_eq!(writer.num_thread_states(), 1);
    }

    #[test]
    fn test_pause_blocks_until_resume() {
        let (_, writer) = writer(DocumentsWriterConfig::default());
        let writer = Arc::new(writer);
        writer.pause_all_threads();

        let adder = {
            let writer = Arc::clone(&writer);
            std::thread::spawn(move || {
                let session = writer.session();
                writer.add_document(&session, doc("0", "x")).unwrap();
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(writer.num_docs_in_ram(), 0);

        writer.resume_all_threads();
        adder.join().unwrap();
        assert_eq!(writer.num_docs_in_ram(), 1);
    }
}
