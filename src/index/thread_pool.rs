//! Thread states and session bindings.
//!
//! Each thread state owns one per-thread consumer. A [`Session`] is bound
//! to a thread state the first time it adds a document after a flush, and
//! keeps that binding until the next flush or abort. New states are
//! created until `max_thread_states` exist; beyond that sessions share the
//! least-loaded state and take turns with it.
//!
//! A state is idle while its consumer sits in the pool. Leasing it moves
//! the consumer out so the document can be processed without the writer
//! lock; finishing the document puts it back.

use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;

use crate::error::{PennantError, Result};
use crate::index::consumer::DocState;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(0);

/// A producer identity for thread-state affinity.
///
/// Documents added through the same session go to the same thread state
/// until the next flush. Sessions are cheap; use one per producing thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Session {
    id: u64,
}

impl Session {
    pub fn new() -> Self {
        Session {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct ThreadSlot<P> {
    consumer: Option<P>,
    num_sessions: usize,
}

/// The exclusive right to use one thread state for one document.
///
/// Holds the state's consumer while the document is processed. It must be
/// handed back through [`ThreadStatePool::restore`].
#[derive(Debug)]
pub struct ThreadLease<P> {
    pub(crate) slot: usize,
    pub(crate) consumer: P,
    pub(crate) doc_state: DocState,
    /// Set when this document committed the writer to a flush.
    pub(crate) flush_after: bool,
}

impl<P> ThreadLease<P> {
    pub fn doc_id(&self) -> u32 {
        self.doc_state.doc_id
    }
}

/// Thread states of one documents writer.
#[derive(Debug)]
pub struct ThreadStatePool<P> {
    slots: Vec<ThreadSlot<P>>,
    bindings: AHashMap<Session, usize>,
    max_states: usize,
}

impl<P> ThreadStatePool<P> {
    pub fn new(max_states: usize) -> Self {
        ThreadStatePool {
            slots: Vec::new(),
            bindings: AHashMap::new(),
            max_states: max_states.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the state bound to `session`, binding it first if needed.
    ///
    /// An unused state, or the least-loaded one once `max_states` exist, is
    /// preferred over creating a new state.
    pub fn bind<F>(&mut self, session: Session, create: F) -> Result<usize>
    where
        F: FnOnce() -> Result<P>,
    {
        if let Some(&slot) = self.bindings.get(&session) {
            return Ok(slot);
        }

        let least_loaded = self
            .slots
            .iter()
            .enumerate()
            .min_by_key(|(_, slot)| slot.num_sessions)
            .map(|(index, slot)| (index, slot.num_sessions));

        let slot = match least_loaded {
            Some((index, sessions)) if sessions == 0 || self.slots.len() >= self.max_states => {
                self.slots[index].num_sessions += 1;
                index
            }
            _ => {
                let consumer = create()?;
                self.slots.push(ThreadSlot {
                    consumer: Some(consumer),
                    num_sessions: 1,
                });
                self.slots.len() - 1
            }
        };
        self.bindings.insert(session, slot);
        Ok(slot)
    }

    pub fn is_idle(&self, slot: usize) -> bool {
        self.slots
            .get(slot)
            .is_some_and(|slot| slot.consumer.is_some())
    }

    pub fn all_idle(&self) -> bool {
        self.slots.iter().all(|slot| slot.consumer.is_some())
    }

    pub fn num_sessions(&self, slot: usize) -> usize {
        self.slots.get(slot).map_or(0, |slot| slot.num_sessions)
    }

    /// Leases an idle state for the document described by `doc_state`.
    pub fn lease(&mut self, slot: usize, doc_state: DocState) -> Result<ThreadLease<P>> {
        let consumer = self
            .slots
            .get_mut(slot)
            .and_then(|slot| slot.consumer.take())
            .ok_or_else(|| PennantError::internal(format!("thread state {slot} is not idle")))?;
        Ok(ThreadLease {
            slot,
            consumer,
            doc_state,
            flush_after: false,
        })
    }

    /// Returns a leased state to the pool, making it idle.
    pub fn restore(&mut self, slot: usize, consumer: P) {
        debug_assert!(self.slots[slot].consumer.is_none());
        self.slots[slot].consumer = Some(consumer);
    }

    /// Drops every session binding. Thread states and their consumers stay.
    pub fn clear_bindings(&mut self) {
        self.bindings.clear();
        for slot in &mut self.slots {
            slot.num_sessions = 0;
        }
    }

    /// Consumers of all idle states.
    pub fn consumers(&self) -> impl Iterator<Item = &P> {
        self.slots.iter().filter_map(|slot| slot.consumer.as_ref())
    }

    pub fn consumers_mut(&mut self) -> impl Iterator<Item = &mut P> {
        self.slots.iter_mut().filter_map(|slot| slot.consumer.as_mut())
    }
}
