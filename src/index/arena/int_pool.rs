//! Int block pool.
//!
//! Every term owns a run of consecutive ints, one per stream, holding the
//! current write address of that stream in the byte pool.

use std::sync::Arc;

use crate::index::arena::Arena;

#[derive(Debug)]
pub struct IntBlockPool {
    arena: Arc<Arena>,
    track_allocations: bool,
    block_size: usize,
    block_shift: u32,
    block_mask: usize,
    buffers: Vec<Box<[u32]>>,
    int_upto: usize,
    int_offset: usize,
}

impl IntBlockPool {
    pub fn new(arena: Arc<Arena>, track_allocations: bool) -> Self {
        let block_size = arena.int_block_size();
        IntBlockPool {
            arena,
            track_allocations,
            block_size,
            block_shift: block_size.trailing_zeros(),
            block_mask: block_size - 1,
            buffers: Vec::new(),
            int_upto: block_size,
            int_offset: 0,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether `count` more ints fit in the current buffer.
    pub fn has_room(&self, count: usize) -> bool {
        !self.buffers.is_empty() && self.int_upto + count <= self.block_size
    }

    pub fn next_buffer(&mut self) {
        let block = self.arena.acquire_int_block(self.track_allocations);
        self.buffers.push(block);
        self.int_offset = (self.buffers.len() - 1) * self.block_size;
        self.int_upto = 0;
    }

    /// Reserves `count` consecutive ints and returns the absolute address of
    /// the first. Callers check [`has_room`](Self::has_room) first.
    pub fn alloc(&mut self, count: usize) -> u32 {
        debug_assert!(self.has_room(count));
        let start = self.int_offset + self.int_upto;
        self.int_upto += count;
        start as u32
    }

    pub fn get(&self, addr: u32) -> u32 {
        let addr = addr as usize;
        self.buffers[addr >> self.block_shift][addr & self.block_mask]
    }

    pub fn set(&mut self, addr: u32, value: u32) {
        let addr = addr as usize;
        self.buffers[addr >> self.block_shift][addr & self.block_mask] = value;
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Keeps the first buffer and returns the rest to the arena.
    pub fn reset(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        if self.buffers.len() > 1 {
            self.arena
                .release_int_blocks(self.buffers.drain(1..), self.track_allocations);
        }
        self.int_upto = 0;
        self.int_offset = 0;
    }

    pub fn release_all(&mut self) {
        self.arena
            .release_int_blocks(self.buffers.drain(..), self.track_allocations);
        self.int_upto = self.block_size;
        self.int_offset = 0;
    }
}

impl Drop for IntBlockPool {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::arena::PoolKind;
    use crate::index::config::DocumentsWriterConfig;

    #[test]
    fn test_alloc_and_reset() {
        let config = DocumentsWriterConfig::default().with_block_sizes(256, 8, 128, 32);
        let arena = Arc::new(Arena::new(&config));
        let mut pool = IntBlockPool::new(Arc::clone(&arena), true);

        assert!(!pool.has_room(2));
        pool.next_buffer();
        let a = pool.alloc(2);
        let b = pool.alloc(2);
        pool.set(a, 11);
        pool.set(b + 1, 22);
        assert_eq!((a, b), (0, 2));
        assert_eq!(pool.get(a), 11);
        assert_eq!(pool.get(b + 1), 22);

        pool.alloc(4);
        assert!(!pool.has_room(2));
        pool.next_buffer();
        assert_eq!(pool.alloc(2), 8);

        assert_eq!(arena.pool_stats(PoolKind::Int).used_bytes, 2 * 8 * 4);

        pool.reset();
        assert_eq!(pool.num_buffers(), 1);
        assert_eq!(arena.pool_stats(PoolKind::Int).free_blocks, 1);
        assert_eq!(arena.pool_stats(PoolKind::Int).used_bytes, 8 * 4);
        assert_eq!(pool.alloc(2), 0);

        drop(pool);
        let stats = arena.pool_stats(PoolKind::Int);
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(stats.used_bytes, 0);
    }
}
