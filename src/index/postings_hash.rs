//! Open-addressing table from term text to posting records.
//!
//! The table stores record ids; the records themselves live in a dense
//! `Vec` owned by the table and are recycled through free lists when the
//! table is reset. Term text is never materialized: callers compare
//! against the char pool through the `matches` closure passed to
//! [`PostingsHash::find`].

use std::cmp::Ordering;

/// Initial and minimum number of hash slots.
pub const MIN_HASH_SIZE: usize = 4;

/// Dense index of a record in its table.
pub type PostingId = u32;

/// One posting record.
#[derive(Debug, Clone, Default)]
pub struct Posting<P> {
    /// Absolute start of the term text in the char pool.
    pub text_start: u32,
    /// Absolute start of the stream write pointers in the int pool.
    pub int_start: u32,
    /// Absolute start of stream 0 in the byte pool. Stream `i` starts
    /// `i * FIRST_LEVEL_SIZE` bytes later.
    pub byte_start: u32,
    /// Consumer-specific data.
    pub data: P,
}

/// Outcome of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Found(PostingId),
    Vacant(usize),
}

#[derive(Debug)]
pub struct PostingsHash<P> {
    slots: Vec<Option<PostingId>>,
    mask: usize,
    records: Vec<Posting<P>>,
}

impl<P> Default for PostingsHash<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PostingsHash<P> {
    pub fn new() -> Self {
        PostingsHash {
            slots: vec![None; MIN_HASH_SIZE],
            mask: MIN_HASH_SIZE - 1,
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn hash_size(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, id: PostingId) -> &Posting<P> {
        &self.records[id as usize]
    }

    pub fn get_mut(&mut self, id: PostingId) -> &mut Posting<P> {
        &mut self.records[id as usize]
    }

    pub fn records(&self) -> &[Posting<P>] {
        &self.records
    }

    /// Probes for a record with hash `code` for which `matches` holds.
    pub fn find<F>(&self, code: i32, mut matches: F) -> Probe
    where
        F: FnMut(&Posting<P>) -> bool,
    {
        let mut code = code;
        let mut pos = self.slot_of(code);
        match self.slots[pos] {
            None => return Probe::Vacant(pos),
            Some(id) if matches(&self.records[id as usize]) => return Probe::Found(id),
            Some(_) => {}
        }

        let inc = (code >> 8).wrapping_add(code) | 1;
        loop {
            code = code.wrapping_add(inc);
            pos = self.slot_of(code);
            match self.slots[pos] {
                None => return Probe::Vacant(pos),
                Some(id) if matches(&self.records[id as usize]) => return Probe::Found(id),
                Some(_) => {}
            }
        }
    }

    /// Stores `posting` in the vacant slot returned by [`find`](Self::find).
    ///
    /// Doubles the table once it is more than half full; `code_of` must
    /// return the same hash `find` was called with for every record.
    pub fn insert<F>(&mut self, slot: usize, posting: Posting<P>, code_of: F) -> PostingId
    where
        F: Fn(&Posting<P>) -> i32,
    {
        debug_assert!(self.slots[slot].is_none());
        let id = self.records.len() as PostingId;
        self.records.push(posting);
        self.slots[slot] = Some(id);

        if self.records.len() > self.slots.len() / 2 {
            self.rehash(self.slots.len() * 2, &code_of);
        }
        id
    }

    fn rehash<F>(&mut self, new_size: usize, code_of: &F)
    where
        F: Fn(&Posting<P>) -> i32,
    {
        let new_mask = new_size - 1;
        let mut slots = vec![None; new_size];
        for id in self.slots.iter().flatten().copied() {
            let mut code = code_of(&self.records[id as usize]);
            let mut pos = (code & new_mask as i32) as usize;
            if slots[pos].is_some() {
                let inc = (code >> 8).wrapping_add(code) | 1;
                while slots[pos].is_some() {
                    code = code.wrapping_add(inc);
                    pos = (code & new_mask as i32) as usize;
                }
            }
            slots[pos] = Some(id);
        }
        self.slots = slots;
        self.mask = new_mask;
    }

    /// Record ids in the order given by `compare`. Ties keep slot order.
    pub fn sorted_ids<F>(&self, mut compare: F) -> Vec<PostingId>
    where
        F: FnMut(&Posting<P>, &Posting<P>) -> Ordering,
    {
        let mut ids: Vec<PostingId> = self.slots.iter().flatten().copied().collect();
        ids.sort_by(|&a, &b| compare(&self.records[a as usize], &self.records[b as usize]));
        ids
    }

    /// Moves every record into `free` and shrinks the table towards the
    /// number of records it held.
    pub fn reset(&mut self, free: &mut Vec<Posting<P>>) {
        let target = self.records.len();
        free.append(&mut self.records);

        let mut new_size = self.slots.len();
        while new_size >= 2 * MIN_HASH_SIZE && new_size / 4 > target {
            new_size /= 2;
        }
        self.slots.clear();
        self.slots.resize(new_size, None);
        self.mask = new_size - 1;
    }

    fn slot_of(&self, code: i32) -> usize {
        (code & self.mask as i32) as usize
    }
}
