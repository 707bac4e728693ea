//! Byte block pool and slice chains.
//!
//! Each term keeps one append-only byte stream per tracked attribute. A
//! stream starts as a small slice; when a write hits the end marker of a
//! slice, a larger slice is allocated at the end of the pool and the last
//! four bytes of the old slice are replaced by a forwarding address. The
//! three data bytes they held are copied to the start of the new slice.
//!
//! A slice's final byte holds `16 | level`. Since blocks are zero-filled
//! before reuse, a non-zero byte under the write pointer always means the
//! end of the current slice has been reached.

use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::error::{PennantError, Result};
use crate::index::arena::Arena;
use crate::util::varint;

/// Size of each slice level.
pub const LEVEL_SIZES: [usize; 10] = [5, 14, 20, 30, 40, 40, 80, 80, 120, 200];

/// Level that follows each level.
pub const NEXT_LEVEL: [usize; 10] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 9];

/// Size of the first slice of every stream.
pub const FIRST_LEVEL_SIZE: usize = LEVEL_SIZES[0];

/// A growable list of byte blocks addressed by absolute offsets.
#[derive(Debug)]
pub struct ByteBlockPool {
    arena: Arc<Arena>,
    track_allocations: bool,
    block_size: usize,
    block_shift: u32,
    block_mask: usize,
    buffers: Vec<Box<[u8]>>,
    /// Write position within the last buffer.
    byte_upto: usize,
    /// Absolute address of the last buffer's first byte.
    byte_offset: usize,
}

impl ByteBlockPool {
    pub fn new(arena: Arc<Arena>, track_allocations: bool) -> Self {
        let block_size = arena.byte_block_size();
        ByteBlockPool {
            arena,
            track_allocations,
            block_size,
            block_shift: block_size.trailing_zeros(),
            block_mask: block_size - 1,
            buffers: Vec::new(),
            byte_upto: block_size,
            byte_offset: 0,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn byte_upto(&self) -> usize {
        self.byte_upto
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Moves to a fresh buffer. Fails with an aborting error once absolute
    /// addresses would no longer fit in 32 bits.
    pub fn next_buffer(&mut self) -> Result<()> {
        let next_offset = self.buffers.len() * self.block_size;
        if next_offset + self.block_size > u32::MAX as usize {
            return Err(PennantError::aborting(
                "byte block pool exceeded the addressable size",
            ));
        }
        let block = self.arena.acquire_byte_block(self.track_allocations);
        self.buffers.push(block);
        self.byte_offset = next_offset;
        self.byte_upto = 0;
        Ok(())
    }

    /// Allocates a new slice of `size` bytes and returns its absolute
    /// address.
    pub fn new_slice(&mut self, size: usize) -> Result<u32> {
        if self.buffers.is_empty() || self.byte_upto > self.block_size - size {
            self.next_buffer()?;
        }
        let upto = self.byte_upto;
        self.byte_upto += size;
        self.current_mut()[upto + size - 1] = 16;
        Ok((upto + self.byte_offset) as u32)
    }

    /// Grows the slice whose end marker sits at `addr`. Returns the
    /// absolute address at which writing continues.
    pub fn alloc_slice(&mut self, addr: u32) -> Result<u32> {
        let (index, upto) = self.locate(addr);
        let level = (self.buffers[index][upto] & 15) as usize;
        let new_level = NEXT_LEVEL[level];
        let new_size = LEVEL_SIZES[new_level];

        if self.byte_upto > self.block_size - new_size {
            self.next_buffer()?;
        }

        let new_upto = self.byte_upto;
        let offset = (new_upto + self.byte_offset) as u32;
        self.byte_upto += new_size;

        let carried = {
            let old = &self.buffers[index];
            [old[upto - 3], old[upto - 2], old[upto - 1]]
        };
        {
            let old = &mut self.buffers[index];
            old[upto - 3..=upto].copy_from_slice(&offset.to_be_bytes());
        }

        let byte_upto = self.byte_upto;
        let current = self.current_mut();
        current[new_upto..new_upto + 3].copy_from_slice(&carried);
        current[byte_upto - 1] = 16 | new_level as u8;

        Ok(offset + 3)
    }

    /// Writes one byte to the stream whose write pointer is `upto`,
    /// growing the slice when needed.
    pub fn write_byte(&mut self, upto: &mut u32, b: u8) -> Result<()> {
        let (index, offset) = self.locate(*upto);
        if self.buffers[index][offset] != 0 {
            *upto = self.alloc_slice(*upto)?;
        }
        let (index, offset) = self.locate(*upto);
        self.buffers[index][offset] = b;
        *upto += 1;
        Ok(())
    }

    pub fn write_bytes(&mut self, upto: &mut u32, bytes: &[u8]) -> Result<()> {
        for &b in bytes {
            self.write_byte(upto, b)?;
        }
        Ok(())
    }

    pub fn write_vint(&mut self, upto: &mut u32, value: u32) -> Result<()> {
        let mut buf = [0u8; 5];
        let len = varint::encode_u32_into(value, &mut buf);
        self.write_bytes(upto, &buf[..len])
    }

    /// Zero-fills the used region, returns all but the first buffer to the
    /// arena and rewinds to the start of the first buffer.
    pub fn reset(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        let last = self.buffers.len() - 1;
        for buffer in &mut self.buffers[..last] {
            buffer.fill(0);
        }
        let byte_upto = self.byte_upto.min(self.block_size);
        self.buffers[last][..byte_upto].fill(0);

        if self.buffers.len() > 1 {
            self.arena
                .release_byte_blocks(self.buffers.drain(1..), self.track_allocations);
        }
        self.byte_upto = 0;
        self.byte_offset = 0;
    }

    /// Returns every buffer to the arena.
    pub fn release_all(&mut self) {
        self.reset();
        self.arena
            .release_byte_blocks(self.buffers.drain(..), self.track_allocations);
        self.byte_upto = self.block_size;
        self.byte_offset = 0;
    }

    pub fn byte_at(&self, addr: u32) -> u8 {
        let (index, offset) = self.locate(addr);
        self.buffers[index][offset]
    }

    fn locate(&self, addr: u32) -> (usize, usize) {
        let addr = addr as usize;
        (addr >> self.block_shift, addr & self.block_mask)
    }

    fn current_mut(&mut self) -> &mut [u8] {
        let last = self.buffers.len() - 1;
        &mut self.buffers[last]
    }
}

impl Drop for ByteBlockPool {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Reads a slice chain from `start` up to the write pointer `end`.
pub struct ByteSliceReader<'a> {
    pool: &'a ByteBlockPool,
    level: usize,
    buffer: usize,
    buffer_offset: usize,
    upto: usize,
    limit: usize,
    end: usize,
}

impl<'a> ByteSliceReader<'a> {
    pub fn new(pool: &'a ByteBlockPool, start: u32, end: u32) -> Self {
        let (start, end) = (start as usize, end as usize);
        debug_assert!(end >= start);
        let buffer = start >> pool.block_shift;
        let buffer_offset = buffer * pool.block_size;
        let upto = start & pool.block_mask;
        let limit = if start + FIRST_LEVEL_SIZE >= end {
            end - buffer_offset
        } else {
            upto + FIRST_LEVEL_SIZE - 4
        };
        ByteSliceReader {
            pool,
            level: 0,
            buffer,
            buffer_offset,
            upto,
            limit,
            end,
        }
    }

    pub fn eof(&self) -> bool {
        self.upto + self.buffer_offset == self.end
    }

    pub fn read_byte(&mut self) -> io::Result<u8> {
        if self.eof() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "end of byte slice",
            ));
        }
        if self.upto == self.limit {
            self.next_slice();
        }
        let b = self.pool.buffers[self.buffer][self.upto];
        self.upto += 1;
        Ok(b)
    }

    fn next_slice(&mut self) {
        let block = &self.pool.buffers[self.buffer];
        let next = u32::from_be_bytes([
            block[self.limit],
            block[self.limit + 1],
            block[self.limit + 2],
            block[self.limit + 3],
        ]) as usize;

        self.level = NEXT_LEVEL[self.level];
        let new_size = LEVEL_SIZES[self.level];

        self.buffer = next >> self.pool.block_shift;
        self.buffer_offset = self.buffer * self.pool.block_size;
        self.upto = next & self.pool.block_mask;

        self.limit = if next + new_size >= self.end {
            self.end - self.buffer_offset
        } else {
            self.upto + new_size - 4
        };
    }

    /// Copies the remaining bytes of the chain to `out`.
    pub fn write_to<W: Write>(&mut self, out: &mut W) -> io::Result<usize> {
        let mut written = 0;
        while !self.eof() {
            if self.upto == self.limit {
                self.next_slice();
            }
            let block = &self.pool.buffers[self.buffer];
            out.write_all(&block[self.upto..self.limit])?;
            written += self.limit - self.upto;
            self.upto = self.limit;
        }
        Ok(written)
    }
}

impl Read for ByteSliceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut n = 0;
        while n < buf.len() && !self.eof() {
            buf[n] = self.read_byte()?;
            n += 1;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::arena::PoolKind;
    use crate::index::config::DocumentsWriterConfig;

    fn pool_with_block(size: usize) -> (Arc<Arena>, ByteBlockPool) {
        let config = DocumentsWriterConfig::default().with_block_sizes(size, 64, 128, 32);
        let arena = Arc::new(Arena::new(&config));
        let pool = ByteBlockPool::new(Arc::clone(&arena), true);
        (arena, pool)
    }

    fn read_all(pool: &ByteBlockPool, start: u32, end: u32) -> Vec<u8> {
        let mut reader = ByteSliceReader::new(pool, start, end);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_new_slice_writes_end_marker() {
        let (_arena, mut pool) = pool_with_block(256);
        let start = pool.new_slice(FIRST_LEVEL_SIZE).unwrap();
        assert_eq!(start, 0);
        assert_eq!(pool.byte_at(4), 16);
        assert_eq!(pool.byte_upto(), FIRST_LEVEL_SIZE);
    }

    #[test]
    fn test_stream_grows_across_levels() {
        let (_arena, mut pool) = pool_with_block(256);
        let start = pool.new_slice(FIRST_LEVEL_SIZE).unwrap();
        let mut upto = start;

        let data: Vec<u8> = (1..=100).collect();
        pool.write_bytes(&mut upto, &data).unwrap();

        assert_eq!(read_all(&pool, start, upto), data);
    }

    #[test]
    fn test_interleaved_streams_stay_separate() {
        let (_arena, mut pool) = pool_with_block(256);
        let a_start = pool.new_slice(FIRST_LEVEL_SIZE).unwrap();
        let b_start = pool.new_slice(FIRST_LEVEL_SIZE).unwrap();
        let (mut a, mut b) = (a_start, b_start);

        for i in 0..60u32 {
            pool.write_vint(&mut a, i * 1000).unwrap();
            pool.write_vint(&mut b, i).unwrap();
        }

        let mut reader = ByteSliceReader::new(&pool, a_start, a);
        for i in 0..60u32 {
            assert_eq!(varint::read_u32(&mut reader).unwrap(), i * 1000);
        }
        assert!(reader.eof());

        let mut reader = ByteSliceReader::new(&pool, b_start, b);
        for i in 0..60u32 {
            assert_eq!(varint::read_u32(&mut reader).unwrap(), i);
        }
        assert!(reader.eof());
    }

    #[test]
    fn test_slices_span_buffers() {
        let (arena, mut pool) = pool_with_block(256);
        let start = pool.new_slice(FIRST_LEVEL_SIZE).unwrap();
        let mut upto = start;

        let data: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8 + 1).collect();
        pool.write_bytes(&mut upto, &data).unwrap();
        assert!(pool.num_buffers() > 1);

        let mut copied = Vec::new();
        ByteSliceReader::new(&pool, start, upto)
            .write_to(&mut copied)
            .unwrap();
        assert_eq!(copied, data);

        let stats = arena.pool_stats(PoolKind::Byte);
        assert_eq!(stats.allocated_bytes, pool.num_buffers() * 256);
        assert!(stats.used_bytes <= stats.allocated_bytes);
    }

    #[test]
    fn test_reset_keeps_first_buffer_zeroed() {
        let (arena, mut pool) = pool_with_block(256);
        let start = pool.new_slice(FIRST_LEVEL_SIZE).unwrap();
        let mut upto = start;
        pool.write_bytes(&mut upto, &[7u8; 600]).unwrap();
        let buffers = pool.num_buffers();

        pool.reset();
        assert_eq!(pool.num_buffers(), 1);
        assert_eq!(arena.pool_stats(PoolKind::Byte).free_blocks, buffers - 1);
        assert_eq!(pool.byte_at(0), 0);
        assert_eq!(pool.byte_at(255), 0);

        // The recycled pool hands out fresh slices from the start again.
        assert_eq!(pool.new_slice(FIRST_LEVEL_SIZE).unwrap(), 0);
    }

    #[test]
    fn test_empty_stream_reads_nothing() {
        let (_arena, mut pool) = pool_with_block(256);
        let start = pool.new_slice(FIRST_LEVEL_SIZE).unwrap();
        assert!(read_all(&pool, start, start).is_empty());
    }
}
