//! Char block pool holding terminated UTF-16 term text.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::index::arena::Arena;
use crate::util::utf16::TERMINATOR;

#[derive(Debug)]
pub struct CharBlockPool {
    arena: Arc<Arena>,
    block_size: usize,
    block_shift: u32,
    block_mask: usize,
    buffers: Vec<Box<[u16]>>,
    char_upto: usize,
    char_offset: usize,
}

impl CharBlockPool {
    pub fn new(arena: Arc<Arena>) -> Self {
        let block_size = arena.char_block_size();
        CharBlockPool {
            arena,
            block_size,
            block_shift: block_size.trailing_zeros(),
            block_mask: block_size - 1,
            buffers: Vec::new(),
            char_upto: block_size,
            char_offset: 0,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether a term of `len` units plus its terminator can ever be stored.
    pub fn fits_block(&self, len: usize) -> bool {
        len < self.block_size
    }

    /// Copies `text` and a terminator into the pool and returns the text's
    /// absolute start. Moves to a new block when the current one is full.
    /// Callers reject text that does not fit a block.
    pub fn append_term(&mut self, text: &[u16]) -> u32 {
        debug_assert!(self.fits_block(text.len()));
        let needed = text.len() + 1;
        if self.buffers.is_empty() || self.char_upto + needed > self.block_size {
            self.next_buffer();
        }
        let upto = self.char_upto;
        let last = self.buffers.len() - 1;
        let buffer = &mut self.buffers[last];
        buffer[upto..upto + text.len()].copy_from_slice(text);
        buffer[upto + text.len()] = TERMINATOR;
        self.char_upto += needed;
        (self.char_offset + upto) as u32
    }

    fn next_buffer(&mut self) {
        self.buffers.push(self.arena.acquire_char_block());
        self.char_offset = (self.buffers.len() - 1) * self.block_size;
        self.char_upto = 0;
    }

    /// The text starting at `start`, without its terminator.
    pub fn text_at(&self, start: u32) -> &[u16] {
        let start = start as usize;
        let buffer = &self.buffers[start >> self.block_shift];
        let from = start & self.block_mask;
        let len = buffer[from..]
            .iter()
            .position(|&unit| unit == TERMINATOR)
            .unwrap_or(buffer.len() - from);
        &buffer[from..from + len]
    }

    /// Whether the text at `start` equals `text`.
    pub fn text_equals(&self, start: u32, text: &[u16]) -> bool {
        self.text_at(start) == text
    }

    /// Unit-wise comparison of two stored terms; a prefix sorts first.
    pub fn compare(&self, a: u32, b: u32) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        self.text_at(a).cmp(self.text_at(b))
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Returns every buffer to the arena.
    pub fn reset(&mut self) {
        self.arena.release_char_blocks(self.buffers.drain(..));
        self.char_upto = self.block_size;
        self.char_offset = 0;
    }
}

impl Drop for CharBlockPool {
    fn drop(&mut self) {
        self.reset();
    }
}
