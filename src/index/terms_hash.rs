//! Terms hash layer.
//!
//! A [`TermsHashPerField`] turns each token of a field into either a new
//! posting record or a hit on an existing one, and hands the record to its
//! [`TermsHashConsumer`] together with a [`StreamWriter`] over the record's
//! byte streams. Records are pulled from a per-thread free list that is
//! refilled in chunks from a shared [`PostingsFreeList`].
//!
//! The default chain runs two layers per thread. The primary layer owns the
//! char pool and hashes term text; the secondary layer (term vectors) reuses
//! the primary's text and hashes the text start instead.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::index::arena::Arena;
use crate::index::arena::byte_pool::{ByteBlockPool, ByteSliceReader, FIRST_LEVEL_SIZE};
use crate::index::arena::char_pool::CharBlockPool;
use crate::index::arena::int_pool::IntBlockPool;
use crate::index::postings_hash::{Posting, PostingId, PostingsHash, Probe};
use crate::util::utf16::hash_units;

/// What the consumers see of the token being added.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenContext<'a> {
    pub doc_id: u32,
    pub position: u32,
    /// Start offset, already shifted by earlier instances of the field.
    pub start_offset: u32,
    pub end_offset: u32,
    pub payload: Option<&'a [u8]>,
}

/// Receives new and repeated terms of one field.
pub trait TermsHashConsumer: Send {
    type Data: Default + Send + 'static;

    /// Number of byte streams per term.
    fn stream_count(&self) -> usize;

    fn new_term(
        &mut self,
        streams: &mut StreamWriter<'_>,
        data: &mut Self::Data,
        token: &TokenContext<'_>,
    ) -> Result<()>;

    fn add_term(
        &mut self,
        streams: &mut StreamWriter<'_>,
        data: &mut Self::Data,
        token: &TokenContext<'_>,
    ) -> Result<()>;
}

/// Appends to the byte streams of one posting record.
pub struct StreamWriter<'a> {
    bytes: &'a mut ByteBlockPool,
    ints: &'a mut IntBlockPool,
    int_start: u32,
}

impl<'a> StreamWriter<'a> {
    pub fn new(bytes: &'a mut ByteBlockPool, ints: &'a mut IntBlockPool, int_start: u32) -> Self {
        StreamWriter {
            bytes,
            ints,
            int_start,
        }
    }

    pub fn write_byte(&mut self, stream: usize, b: u8) -> Result<()> {
        let addr = self.int_start + stream as u32;
        let mut upto = self.ints.get(addr);
        self.bytes.write_byte(&mut upto, b)?;
        self.ints.set(addr, upto);
        Ok(())
    }

    pub fn write_bytes(&mut self, stream: usize, bytes: &[u8]) -> Result<()> {
        let addr = self.int_start + stream as u32;
        let mut upto = self.ints.get(addr);
        self.bytes.write_bytes(&mut upto, bytes)?;
        self.ints.set(addr, upto);
        Ok(())
    }

    pub fn write_vint(&mut self, stream: usize, value: u32) -> Result<()> {
        let addr = self.int_start + stream as u32;
        let mut upto = self.ints.get(addr);
        self.bytes.write_vint(&mut upto, value)?;
        self.ints.set(addr, upto);
        Ok(())
    }
}

/// Posting records shared by all threads of one layer.
#[derive(Debug)]
pub struct PostingsFreeList<P> {
    arena: Arc<Arena>,
    track_allocations: bool,
    chunk: usize,
    bytes_per_posting: usize,
    state: Mutex<FreeListState<P>>,
}

#[derive(Debug)]
struct FreeListState<P> {
    free: Vec<Posting<P>>,
    allocated: usize,
}

impl<P: Default> PostingsFreeList<P> {
    pub fn new(arena: Arc<Arena>, track_allocations: bool, chunk: usize) -> Self {
        PostingsFreeList {
            arena,
            track_allocations,
            chunk,
            bytes_per_posting: std::mem::size_of::<Posting<P>>() + 4 * std::mem::size_of::<usize>(),
            state: Mutex::new(FreeListState {
                free: Vec::new(),
                allocated: 0,
            }),
        }
    }

    pub fn bytes_per_posting(&self) -> usize {
        self.bytes_per_posting
    }

    /// Records created and not yet freed.
    pub fn allocated(&self) -> usize {
        self.state.lock().allocated
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Moves one chunk of records into `into`, creating records when the
    /// shared list runs dry.
    pub fn refill(&self, into: &mut Vec<Posting<P>>) {
        let mut state = self.state.lock();
        let reused = state.free.len().min(self.chunk);
        let start = state.free.len() - reused;
        into.extend(state.free.drain(start..));

        let extra = self.chunk - reused;
        if extra > 0 {
            into.extend((0..extra).map(|_| Posting::default()));
            state.allocated += extra;
            if self.track_allocations {
                self.arena
                    .postings_allocated((extra * self.bytes_per_posting) as isize);
            }
        }
        if self.track_allocations {
            self.arena.postings_used(self.chunk * self.bytes_per_posting);
        }
    }

    pub fn recycle(&self, records: &mut Vec<Posting<P>>) {
        self.state.lock().free.append(records);
    }

    /// Resets `hash`, returning its records to the shared list.
    pub fn recycle_hash(&self, hash: &mut PostingsHash<P>) {
        let mut state = self.state.lock();
        hash.reset(&mut state.free);
    }

    /// Drops up to one chunk of free records. Returns whether any were
    /// dropped. Untracked lists never free.
    pub fn free_ram(&self) -> bool {
        if !self.track_allocations {
            return false;
        }
        let mut state = self.state.lock();
        let count = state.free.len().min(self.chunk);
        if count == 0 {
            return false;
        }
        let keep = state.free.len() - count;
        state.free.truncate(keep);
        state.free.shrink_to(keep.max(self.chunk));
        state.allocated -= count;
        self.arena
            .postings_allocated(-((count * self.bytes_per_posting) as isize));
        true
    }

    /// Drops every free record.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let count = state.free.len();
        state.free = Vec::new();
        state.allocated -= count;
        if self.track_allocations && count > 0 {
            self.arena
                .postings_allocated(-((count * self.bytes_per_posting) as isize));
        }
    }
}

/// Per-thread pools of one layer.
#[derive(Debug)]
pub struct HashPools<P> {
    pub bytes: ByteBlockPool,
    pub ints: IntBlockPool,
    free: Vec<Posting<P>>,
    shared: Arc<PostingsFreeList<P>>,
}

impl<P: Default> HashPools<P> {
    pub fn new(arena: Arc<Arena>, track_allocations: bool, shared: Arc<PostingsFreeList<P>>) -> Self {
        HashPools {
            bytes: ByteBlockPool::new(Arc::clone(&arena), track_allocations),
            ints: IntBlockPool::new(arena, track_allocations),
            free: Vec::new(),
            shared,
        }
    }

    pub fn shared(&self) -> &Arc<PostingsFreeList<P>> {
        &self.shared
    }

    fn take_posting(&mut self) -> Posting<P> {
        if self.free.is_empty() {
            self.shared.refill(&mut self.free);
        }
        let mut posting = self.free.pop().unwrap_or_default();
        posting.data = P::default();
        posting
    }

    /// Reserves the int pointers and first slices of `stream_count` streams.
    /// Returns `(int_start, byte_start)`.
    fn alloc_streams(&mut self, stream_count: usize) -> Result<(u32, u32)> {
        if !self.ints.has_room(stream_count) {
            self.ints.next_buffer();
        }
        if self.bytes.num_buffers() == 0
            || self.bytes.block_size() - self.bytes.byte_upto() < stream_count * FIRST_LEVEL_SIZE
        {
            self.bytes.next_buffer()?;
        }

        let int_start = self.ints.alloc(stream_count);
        let mut byte_start = 0;
        for stream in 0..stream_count {
            let upto = self.bytes.new_slice(FIRST_LEVEL_SIZE)?;
            if stream == 0 {
                byte_start = upto;
            }
            self.ints.set(int_start + stream as u32, upto);
        }
        Ok((int_start, byte_start))
    }

    /// Reader over stream `stream` of `posting`, up to its write pointer.
    pub fn reader(&self, posting: &Posting<P>, stream: usize) -> ByteSliceReader<'_> {
        let start = posting.byte_start + (stream * FIRST_LEVEL_SIZE) as u32;
        let end = self.ints.get(posting.int_start + stream as u32);
        ByteSliceReader::new(&self.bytes, start, end)
    }

    /// Rewinds both pools. With `recycle_postings` the thread's spare
    /// records go back to the shared list.
    pub fn reset(&mut self, recycle_postings: bool) {
        self.bytes.reset();
        self.ints.reset();
        if recycle_postings {
            self.shared.recycle(&mut self.free);
        }
    }

    /// Returns every block to the arena. Used once a segment's postings are
    /// flushed or aborted, so tracked blocks stop counting as used.
    pub fn release_all(&mut self, recycle_postings: bool) {
        self.bytes.release_all();
        self.ints.release_all();
        if recycle_postings {
            self.shared.recycle(&mut self.free);
        }
    }

    pub fn spare_postings(&self) -> usize {
        self.free.len()
    }
}

/// Result of adding one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added { id: PostingId, text_start: u32, new: bool },
    /// The term did not fit a char block.
    Skipped,
}

/// Postings of one field in one thread.
#[derive(Debug)]
pub struct TermsHashPerField<C: TermsHashConsumer> {
    consumer: C,
    postings: PostingsHash<C::Data>,
}

impl<C: TermsHashConsumer> TermsHashPerField<C> {
    pub fn new(consumer: C) -> Self {
        TermsHashPerField {
            consumer,
            postings: PostingsHash::new(),
        }
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn consumer_mut(&mut self) -> &mut C {
        &mut self.consumer
    }

    pub fn postings(&self) -> &PostingsHash<C::Data> {
        &self.postings
    }

    pub fn num_postings(&self) -> usize {
        self.postings.len()
    }

    /// Adds a token by its sanitized text and hash.
    pub fn add_text(
        &mut self,
        pools: &mut HashPools<C::Data>,
        chars: &mut CharBlockPool,
        text: &[u16],
        code: i32,
        token: &TokenContext<'_>,
    ) -> Result<AddOutcome> {
        let probe = self
            .postings
            .find(code, |p| chars.text_equals(p.text_start, text));

        match probe {
            Probe::Found(id) => {
                self.add_existing(pools, id, token)?;
                let text_start = self.postings.get(id).text_start;
                Ok(AddOutcome::Added {
                    id,
                    text_start,
                    new: false,
                })
            }
            Probe::Vacant(slot) => {
                if !chars.fits_block(text.len()) {
                    return Ok(AddOutcome::Skipped);
                }
                let text_start = chars.append_term(text);
                let chars = &*chars;
                let id = self.add_new(pools, slot, text_start, token, |p| {
                    hash_units(chars.text_at(p.text_start))
                })?;
                Ok(AddOutcome::Added {
                    id,
                    text_start,
                    new: true,
                })
            }
        }
    }

    /// Adds a token whose text already lives in the primary layer's char
    /// pool at `text_start`.
    pub fn add_text_start(
        &mut self,
        pools: &mut HashPools<C::Data>,
        text_start: u32,
        token: &TokenContext<'_>,
    ) -> Result<AddOutcome> {
        let code = text_start as i32;
        match self.postings.find(code, |p| p.text_start == text_start) {
            Probe::Found(id) => {
                self.add_existing(pools, id, token)?;
                Ok(AddOutcome::Added {
                    id,
                    text_start,
                    new: false,
                })
            }
            Probe::Vacant(slot) => {
                let id = self.add_new(pools, slot, text_start, token, |p| p.text_start as i32)?;
                Ok(AddOutcome::Added {
                    id,
                    text_start,
                    new: true,
                })
            }
        }
    }

    fn add_existing(
        &mut self,
        pools: &mut HashPools<C::Data>,
        id: PostingId,
        token: &TokenContext<'_>,
    ) -> Result<()> {
        let posting = self.postings.get_mut(id);
        let mut streams = StreamWriter::new(&mut pools.bytes, &mut pools.ints, posting.int_start);
        self.consumer.add_term(&mut streams, &mut posting.data, token)
    }

    fn add_new<F>(
        &mut self,
        pools: &mut HashPools<C::Data>,
        slot: usize,
        text_start: u32,
        token: &TokenContext<'_>,
        code_of: F,
    ) -> Result<PostingId>
    where
        F: Fn(&Posting<C::Data>) -> i32,
    {
        let stream_count = self.consumer.stream_count();
        let (int_start, byte_start) = pools.alloc_streams(stream_count)?;

        let mut posting = pools.take_posting();
        posting.text_start = text_start;
        posting.int_start = int_start;
        posting.byte_start = byte_start;
        let id = self.postings.insert(slot, posting, code_of);

        let posting = self.postings.get_mut(id);
        let mut streams = StreamWriter::new(&mut pools.bytes, &mut pools.ints, int_start);
        self.consumer.new_term(&mut streams, &mut posting.data, token)?;
        Ok(id)
    }

    /// Returns every record to the shared list.
    pub fn reset(&mut self, shared: &PostingsFreeList<C::Data>) {
        shared.recycle_hash(&mut self.postings);
    }
}
