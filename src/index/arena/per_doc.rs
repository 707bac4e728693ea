//! Growable per-document output buffer backed by per-doc blocks.

use std::io::{self, Write};
use std::sync::Arc;

use crate::index::arena::Arena;

/// Bytes a finished document wants written to a doc store file.
#[derive(Debug)]
pub struct PerDocBuffer {
    arena: Arc<Arena>,
    blocks: Vec<Box<[u8]>>,
    len: usize,
}

impl PerDocBuffer {
    pub fn new(arena: Arc<Arena>) -> Self {
        PerDocBuffer {
            arena,
            blocks: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes held, counted in whole blocks.
    pub fn size_in_bytes(&self) -> usize {
        self.blocks.len() * self.arena.per_doc_block_size()
    }

    /// Copies the buffered bytes to `out`.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        let block_size = self.arena.per_doc_block_size();
        let mut remaining = self.len;
        for block in &self.blocks {
            if remaining == 0 {
                break;
            }
            let n = remaining.min(block_size);
            out.write_all(&block[..n])?;
            remaining -= n;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        // Writing to a Vec cannot fail.
        let _ = self.write_to(&mut out);
        out
    }

    /// Returns all blocks to the arena and empties the buffer.
    pub fn recycle(&mut self) {
        self.arena.release_per_doc_blocks(self.blocks.drain(..));
        self.len = 0;
    }
}

impl Write for PerDocBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let block_size = self.arena.per_doc_block_size();
        let mut written = 0;
        while written < buf.len() {
            let offset = self.len % block_size;
            if offset == 0 && self.len == self.blocks.len() * block_size {
                self.blocks.push(self.arena.acquire_per_doc_block());
            }
            let block = self.blocks.len() - 1;
            let n = (block_size - offset).min(buf.len() - written);
            self.blocks[block][offset..offset + n].copy_from_slice(&buf[written..written + n]);
            self.len += n;
            written += n;
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PerDocBuffer {
    fn drop(&mut self) {
        self.recycle();
    }
}
