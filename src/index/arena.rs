//! Pooled block arena.
//!
//! All postings data buffered between flushes lives in fixed-size blocks
//! handed out by one [`Arena`] per documents writer. There are four
//! independent pools:
//!
//! - byte blocks, holding the slice chains of posting streams,
//! - int blocks, holding per-term stream write pointers,
//! - char blocks, holding UTF-16 term text,
//! - per-document blocks, buffering doc store output until it is written
//!   in document order.
//!
//! Blocks released back to the arena go onto a free list and are reused;
//! they are only returned to the system when the RAM balancer trims the
//! free lists. Each pool keeps two counters: bytes allocated and not yet
//! freed, and bytes of tracked blocks currently checked out. Releasing a
//! tracked block uncharges it, so `used <= allocated` holds after every
//! mutation.
//!
//! Posting records are not stored in blocks, but the records pulled from
//! the shared free lists are charged to the arena's postings account so
//! that the RAM balancer sees them.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::index::config::DocumentsWriterConfig;

pub mod byte_pool;
pub mod char_pool;
pub mod int_pool;
pub mod per_doc;

/// The pools of an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolKind {
    Byte,
    Int,
    Char,
    PerDoc,
}

/// RAM counters for one pool or account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Bytes allocated from the system and not yet freed.
    pub allocated_bytes: usize,
    /// Bytes of tracked blocks currently checked out.
    pub used_bytes: usize,
    /// Blocks sitting on the free list.
    pub free_blocks: usize,
}

/// Counters of the whole arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaStats {
    pub byte: PoolStats,
    pub int: PoolStats,
    pub char: PoolStats,
    pub per_doc: PoolStats,
    pub postings: PoolStats,
}

impl ArenaStats {
    pub fn allocated_bytes(&self) -> usize {
        self.byte.allocated_bytes
            + self.int.allocated_bytes
            + self.char.allocated_bytes
            + self.per_doc.allocated_bytes
            + self.postings.allocated_bytes
    }

    pub fn used_bytes(&self) -> usize {
        self.byte.used_bytes
            + self.int.used_bytes
            + self.char.used_bytes
            + self.per_doc.used_bytes
            + self.postings.used_bytes
    }
}

/// Fixed-size block allocator with a free list.
#[derive(Debug)]
pub struct BlockAllocator<T> {
    block_size: usize,
    block_bytes: usize,
    free: Vec<Box<[T]>>,
    allocated_bytes: usize,
    used_bytes: usize,
}

impl<T: Copy + Default> BlockAllocator<T> {
    pub fn new(block_size: usize) -> Self {
        BlockAllocator {
            block_size,
            block_bytes: block_size * std::mem::size_of::<T>(),
            free: Vec::new(),
            allocated_bytes: 0,
            used_bytes: 0,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns a recycled block if one is free, else a new one.
    ///
    /// Recycled blocks keep their previous contents.
    pub fn acquire(&mut self, track_allocation: bool) -> Box<[T]> {
        let block = match self.free.pop() {
            Some(block) => block,
            None => {
                self.allocated_bytes += self.block_bytes;
                vec![T::default(); self.block_size].into_boxed_slice()
            }
        };
        if track_allocation {
            self.used_bytes += self.block_bytes;
        }
        debug_assert!(self.used_bytes <= self.allocated_bytes);
        block
    }

    /// Pushes blocks onto the free list. `tracked` must match the flag the
    /// blocks were acquired with.
    pub fn release<I: IntoIterator<Item = Box<[T]>>>(&mut self, blocks: I, tracked: bool) {
        let before = self.free.len();
        self.free.extend(blocks);
        if tracked {
            let released = (self.free.len() - before) * self.block_bytes;
            debug_assert!(released <= self.used_bytes);
            self.used_bytes = self.used_bytes.saturating_sub(released);
        }
        debug_assert!(self.used_bytes <= self.allocated_bytes);
    }

    /// Drops one free block. Returns false when the free list is empty.
    pub fn free_one(&mut self) -> bool {
        match self.free.pop() {
            Some(_) => {
                self.allocated_bytes -= self.block_bytes;
                debug_assert!(self.used_bytes <= self.allocated_bytes);
                true
            }
            None => false,
        }
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated_bytes: self.allocated_bytes,
            used_bytes: self.used_bytes,
            free_blocks: self.free.len(),
        }
    }
}

#[derive(Debug)]
struct ArenaState {
    bytes: BlockAllocator<u8>,
    ints: BlockAllocator<u32>,
    chars: BlockAllocator<u16>,
    per_doc: BlockAllocator<u8>,
    postings_allocated: usize,
    postings_used: usize,
}

/// The shared block arena of one documents writer.
#[derive(Debug)]
pub struct Arena {
    byte_block_size: usize,
    int_block_size: usize,
    char_block_size: usize,
    per_doc_block_size: usize,
    state: Mutex<ArenaState>,
}

impl Arena {
    pub fn new(config: &DocumentsWriterConfig) -> Self {
        Arena {
            byte_block_size: config.byte_block_size,
            int_block_size: config.int_block_size,
            char_block_size: config.char_block_size,
            per_doc_block_size: config.per_doc_block_size,
            state: Mutex::new(ArenaState {
                bytes: BlockAllocator::new(config.byte_block_size),
                ints: BlockAllocator::new(config.int_block_size),
                chars: BlockAllocator::new(config.char_block_size),
                per_doc: BlockAllocator::new(config.per_doc_block_size),
                postings_allocated: 0,
                postings_used: 0,
            }),
        }
    }

    pub fn byte_block_size(&self) -> usize {
        self.byte_block_size
    }

    pub fn int_block_size(&self) -> usize {
        self.int_block_size
    }

    pub fn char_block_size(&self) -> usize {
        self.char_block_size
    }

    pub fn per_doc_block_size(&self) -> usize {
        self.per_doc_block_size
    }

    pub fn acquire_byte_block(&self, track_allocation: bool) -> Box<[u8]> {
        self.state.lock().bytes.acquire(track_allocation)
    }

    pub fn acquire_int_block(&self, track_allocation: bool) -> Box<[u32]> {
        self.state.lock().ints.acquire(track_allocation)
    }

    /// Char blocks are always charged as used.
    pub fn acquire_char_block(&self) -> Box<[u16]> {
        self.state.lock().chars.acquire(true)
    }

    /// Per-document blocks are never charged as used; the wait queue
    /// accounts for the documents holding them.
    pub fn acquire_per_doc_block(&self) -> Box<[u8]> {
        self.state.lock().per_doc.acquire(false)
    }

    pub fn release_byte_blocks<I>(&self, blocks: I, tracked: bool)
    where
        I: IntoIterator<Item = Box<[u8]>>,
    {
        self.state.lock().bytes.release(blocks, tracked);
    }

    pub fn release_int_blocks<I>(&self, blocks: I, tracked: bool)
    where
        I: IntoIterator<Item = Box<[u32]>>,
    {
        self.state.lock().ints.release(blocks, tracked);
    }

    pub fn release_char_blocks<I: IntoIterator<Item = Box<[u16]>>>(&self, blocks: I) {
        self.state.lock().chars.release(blocks, true);
    }

    pub fn release_per_doc_blocks<I: IntoIterator<Item = Box<[u8]>>>(&self, blocks: I) {
        self.state.lock().per_doc.release(blocks, false);
    }

    /// Charge newly created posting records (negative when freed).
    pub fn postings_allocated(&self, delta: isize) {
        let mut state = self.state.lock();
        state.postings_allocated = state.postings_allocated.saturating_add_signed(delta);
        state.postings_used = state.postings_used.min(state.postings_allocated);
    }

    /// Charge posting records handed to a thread.
    pub fn postings_used(&self, bytes: usize) {
        let mut state = self.state.lock();
        state.postings_used += bytes;
        debug_assert!(state.postings_used <= state.postings_allocated);
    }

    /// Drops one free block of `kind`, or up to `max_blocks` per-doc blocks.
    /// Returns the number of bytes freed.
    pub fn free_blocks(&self, kind: PoolKind, max_blocks: usize) -> usize {
        let mut state = self.state.lock();
        let mut freed = 0;
        for _ in 0..max_blocks {
            let (ok, bytes) = match kind {
                PoolKind::Byte => (state.bytes.free_one(), self.byte_block_size),
                PoolKind::Int => (state.ints.free_one(), self.int_block_size * 4),
                PoolKind::Char => (state.chars.free_one(), self.char_block_size * 2),
                PoolKind::PerDoc => (state.per_doc.free_one(), self.per_doc_block_size),
            };
            if !ok {
                break;
            }
            freed += bytes;
        }
        freed
    }

    /// Whether any pool has a free block to give back.
    pub fn has_free_blocks(&self) -> bool {
        let state = self.state.lock();
        state.bytes.free_count() > 0
            || state.ints.free_count() > 0
            || state.chars.free_count() > 0
            || state.per_doc.free_count() > 0
    }

    /// Clears the postings used counter. Called once all buffered postings
    /// have been flushed or aborted and their records recycled.
    pub fn reset_postings_used(&self) {
        self.state.lock().postings_used = 0;
    }

    pub fn bytes_allocated(&self) -> usize {
        self.stats().allocated_bytes()
    }

    pub fn bytes_used(&self) -> usize {
        self.stats().used_bytes()
    }

    pub fn stats(&self) -> ArenaStats {
        let state = self.state.lock();
        ArenaStats {
            byte: state.bytes.stats(),
            int: state.ints.stats(),
            char: state.chars.stats(),
            per_doc: state.per_doc.stats(),
            postings: PoolStats {
                allocated_bytes: state.postings_allocated,
                used_bytes: state.postings_used,
                free_blocks: 0,
            },
        }
    }

    pub fn pool_stats(&self, kind: PoolKind) -> PoolStats {
        let stats = self.stats();
        match kind {
            PoolKind::Byte => stats.byte,
            PoolKind::Int => stats.int,
            PoolKind::Char => stats.char,
            PoolKind::PerDoc => stats.per_doc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_arena() -> Arena {
        let config = DocumentsWriterConfig::default().with_block_sizes(256, 64, 128, 32);
        Arena::new(&config)
    }

    fn assert_used_within_allocated(arena: &Arena) {
        let stats = arena.stats();
        for pool in [stats.byte, stats.int, stats.char, stats.per_doc, stats.postings] {
            assert!(pool.used_bytes <= pool.allocated_bytes, "{pool:?}");
        }
    }

    #[test]
    fn test_acquire_counts_allocation_and_use() {
        let arena = small_arena();

        let tracked = arena.acquire_byte_block(true);
        let untracked = arena.acquire_byte_block(false);
        assert_eq!(tracked.len(), 256);

        let stats = arena.pool_stats(PoolKind::Byte);
        assert_eq!(stats.allocated_bytes, 512);
        assert_eq!(stats.used_bytes, 256);
        assert_used_within_allocated(&arena);

        arena.release_byte_blocks(vec![tracked], true);
        arena.release_byte_blocks(vec![untracked], false);
        let stats = arena.pool_stats(PoolKind::Byte);
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(stats.allocated_bytes, 512);
        assert_eq!(stats.used_bytes, 0);
    }

    #[test]
    fn test_recycled_block_is_reused() {
        let arena = small_arena();

        // Recycling a tracked block many times never charges it twice.
        for _ in 0..3 {
            let block = arena.acquire_int_block(true);
            arena.release_int_blocks(vec![block], true);
        }
        let again = arena.acquire_int_block(true);

        let stats = arena.pool_stats(PoolKind::Int);
        assert_eq!(stats.allocated_bytes, 64 * 4);
        assert_eq!(stats.free_blocks, 0);
        assert_eq!(stats.used_bytes, 64 * 4);
        assert_used_within_allocated(&arena);

        arena.release_int_blocks(vec![again], true);
        assert_eq!(arena.bytes_used(), 0);
    }

    #[test]
    fn test_freeing_released_blocks_keeps_used_within_allocated() {
        let arena = small_arena();

        let held = arena.acquire_byte_block(true);
        let spare: Vec<_> = (0..2).map(|_| arena.acquire_byte_block(true)).collect();
        arena.release_byte_blocks(spare, true);
        assert_eq!(arena.free_blocks(PoolKind::Byte, 32), 2 * 256);

        let stats = arena.pool_stats(PoolKind::Byte);
        assert_eq!(stats.allocated_bytes, 256);
        assert_eq!(stats.used_bytes, 256);
        assert_used_within_allocated(&arena);
        arena.release_byte_blocks(vec![held], true);
    }

    #[test]
    fn test_free_blocks_returns_memory() {
        let arena = small_arena();

        let blocks: Vec<_> = (0..3).map(|_| arena.acquire_char_block()).collect();
        arena.release_char_blocks(blocks);
        assert!(arena.has_free_blocks());

        assert_eq!(arena.free_blocks(PoolKind::Char, 1), 128 * 2);
        assert_eq!(arena.free_blocks(PoolKind::Char, 32), 2 * 128 * 2);
        assert_eq!(arena.free_blocks(PoolKind::Char, 1), 0);
        assert!(!arena.has_free_blocks());
        assert_eq!(arena.pool_stats(PoolKind::Char).allocated_bytes, 0);
        assert_used_within_allocated(&arena);
    }

    #[test]
    fn test_per_doc_blocks_are_untracked() {
        let arena = small_arena();
        let block = arena.acquire_per_doc_block();
        assert_eq!(block.len(), 32);
        let stats = arena.pool_stats(PoolKind::PerDoc);
        assert_eq!(stats.allocated_bytes, 32);
        assert_eq!(stats.used_bytes, 0);
    }

    #[test]
    fn test_postings_account() {
        let arena = small_arena();
        arena.postings_allocated(100);
        arena.postings_used(60);
        assert_eq!(arena.stats().postings.used_bytes, 60);
        arena.reset_postings_used();
        assert_eq!(arena.stats().postings.used_bytes, 0);
        arena.postings_used(60);
        arena.postings_allocated(-80);
        assert_eq!(arena.stats().postings.allocated_bytes, 20);
        assert_used_within_allocated(&arena);
        assert_eq!(arena.bytes_allocated(), 20);
    }
}
