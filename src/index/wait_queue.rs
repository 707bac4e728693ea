//! Reorders finished documents into doc id order.
//!
//! Documents finish processing in any order, but the doc stores must be
//! written in doc id order. A document whose predecessors are all written
//! is finished at once, along with any successors already waiting; the
//! others wait in a circular buffer indexed by their distance from the next
//! doc id to write.

use crate::error::Result;
use crate::index::consumer::DocWriter;
use crate::util::array::oversize;

const INITIAL_CAPACITY: usize = 10;

pub struct WaitQueue {
    waiting: Vec<Option<Box<dyn DocWriter>>>,
    next_write_doc_id: u32,
    next_write_loc: usize,
    num_waiting: usize,
    waiting_bytes: usize,
    pause_bytes: usize,
    resume_bytes: usize,
}

impl std::fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitQueue")
            .field("capacity", &self.waiting.len())
            .field("next_write_doc_id", &self.next_write_doc_id)
            .field("num_waiting", &self.num_waiting)
            .field("waiting_bytes", &self.waiting_bytes)
            .finish()
    }
}

impl WaitQueue {
    pub fn new(pause_bytes: usize, resume_bytes: usize) -> Self {
        WaitQueue {
            waiting: (0..INITIAL_CAPACITY).map(|_| None).collect(),
            next_write_doc_id: 0,
            next_write_loc: 0,
            num_waiting: 0,
            waiting_bytes: 0,
            pause_bytes,
            resume_bytes,
        }
    }

    /// Starts a new segment at doc id 0. The queue must be empty.
    pub fn reset(&mut self) {
        debug_assert_eq!(self.num_waiting, 0);
        debug_assert_eq!(self.waiting_bytes, 0);
        self.next_write_doc_id = 0;
        self.next_write_loc = 0;
    }

    pub fn next_write_doc_id(&self) -> u32 {
        self.next_write_doc_id
    }

    pub fn num_waiting(&self) -> usize {
        self.num_waiting
    }

    pub fn waiting_bytes(&self) -> usize {
        self.waiting_bytes
    }

    pub fn capacity(&self) -> usize {
        self.waiting.len()
    }

    /// Producers should block once this turns true.
    pub fn should_pause(&self) -> bool {
        self.waiting_bytes > self.pause_bytes
    }

    /// Paused producers may continue once this turns true.
    pub fn should_resume(&self) -> bool {
        self.waiting_bytes <= self.resume_bytes
    }

    /// Admits a finished document, writing it and any waiting successors if
    /// its turn has come. Returns whether producers should pause.
    ///
    /// A failed write leaves the queue positioned at the failed document;
    /// the caller must abort.
    pub fn add(&mut self, doc: Box<dyn DocWriter>) -> Result<bool> {
        let doc_id = doc.doc_id();
        debug_assert!(doc_id >= self.next_write_doc_id);

        if doc_id == self.next_write_doc_id {
            self.write(doc)?;
            while let Some(next) = self.waiting[self.next_write_loc].take() {
                self.num_waiting -= 1;
                self.waiting_bytes -= next.size_in_bytes();
                self.write(next)?;
            }
        } else {
            let mut gap = (doc_id - self.next_write_doc_id) as usize;
            if gap >= self.waiting.len() {
                self.grow(gap);
                gap = (doc_id - self.next_write_doc_id) as usize;
            }
            let mut loc = self.next_write_loc + gap;
            if loc >= self.waiting.len() {
                loc -= self.waiting.len();
            }
            debug_assert!(self.waiting[loc].is_none());
            self.waiting_bytes += doc.size_in_bytes();
            self.num_waiting += 1;
            self.waiting[loc] = Some(doc);
        }
        Ok(self.should_pause())
    }

    fn write(&mut self, doc: Box<dyn DocWriter>) -> Result<()> {
        doc.finish()?;
        self.next_write_doc_id += 1;
        self.next_write_loc += 1;
        if self.next_write_loc == self.waiting.len() {
            self.next_write_loc = 0;
        }
        Ok(())
    }

    /// Re-lays the slots out from `next_write_loc` so the buffer can hold a
    /// document `gap` ids ahead.
    fn grow(&mut self, gap: usize) {
        let capacity = oversize(gap + 1);
        let mut waiting: Vec<Option<Box<dyn DocWriter>>> = Vec::with_capacity(capacity);
        waiting.extend(self.waiting.drain(self.next_write_loc..));
        waiting.extend(self.waiting.drain(..));
        waiting.resize_with(capacity, || None);
        self.waiting = waiting;
        self.next_write_loc = 0;
    }

    /// Drops every waiting document without writing it.
    pub fn abort(&mut self) -> usize {
        let mut aborted = 0;
        for slot in &mut self.waiting {
            if let Some(doc) = slot.take() {
                doc.abort();
                aborted += 1;
            }
        }
        self.num_waiting = 0;
        self.waiting_bytes = 0;
        aborted
    }
}
