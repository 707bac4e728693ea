//! RAM budget policy.
//!
//! Buffered documents are charged to the arena twice: bytes allocated from
//! the system, and bytes in active use. Buffered deletes are charged on top
//! of both. Once allocation crosses the free trigger, recycled blocks are
//! returned to the system round-robin across the pools until allocation
//! drops to the free level. When nothing is left to free, or when usage
//! alone crosses the budget, the buffer is full and the writer flushes.

use crate::index::arena::{Arena, PoolKind};
use crate::index::config::DocumentsWriterConfig;

/// Per-doc blocks are small, so each round frees up to this many.
const PER_DOC_BLOCKS_PER_ROUND: usize = 32;

/// Usage at the budget counts as full.
fn over_budget(used: usize, deletes: usize, budget: usize) -> bool {
    used + deletes >= budget
}

/// Result of one balancing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceOutcome {
    pub buffer_is_full: bool,
    pub freed_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct RamPolicy {
    ram_buffer_size: Option<usize>,
    max_buffered_docs: Option<usize>,
    max_buffered_delete_terms: Option<usize>,
    free_trigger: usize,
    free_level: usize,
}

impl RamPolicy {
    pub fn new(config: &DocumentsWriterConfig) -> Self {
        RamPolicy {
            ram_buffer_size: config.ram_buffer_size,
            max_buffered_docs: config.flush_by_count(),
            max_buffered_delete_terms: config.max_buffered_delete_terms,
            free_trigger: config.free_trigger_bytes().unwrap_or(usize::MAX),
            free_level: config.free_level_bytes().unwrap_or(usize::MAX),
        }
    }

    pub fn ram_buffer_size(&self) -> Option<usize> {
        self.ram_buffer_size
    }

    /// Whether `num_docs` buffered documents call for a flush by count.
    pub fn flush_by_count(&self, num_docs: usize) -> bool {
        self.max_buffered_docs.is_some_and(|max| num_docs >= max)
    }

    /// Whether a finishing document should run [`RamPolicy::balance`].
    pub fn should_balance(
        &self,
        used: usize,
        allocated: usize,
        deletes: usize,
        buffer_is_full: bool,
    ) -> bool {
        match self.ram_buffer_size {
            Some(budget) if !buffer_is_full => {
                over_budget(used, deletes, budget) || allocated + deletes >= self.free_trigger
            }
            _ => false,
        }
    }

    /// Whether buffered deletes call for a flush. `delete_count` counts
    /// buffered term, query and doc id deletes.
    pub fn deletes_full(&self, deletes: usize, used: usize, delete_count: usize) -> bool {
        self.ram_buffer_size
            .is_some_and(|budget| deletes + used >= budget)
            || self.delete_count_reached(delete_count)
    }

    /// Whether buffered deletes alone are heavy enough to be applied now.
    pub fn should_apply_deletes(&self, deletes: usize, delete_count: usize) -> bool {
        self.ram_buffer_size
            .is_some_and(|budget| deletes >= budget / 2)
            || self.delete_count_reached(delete_count)
    }

    fn delete_count_reached(&self, delete_count: usize) -> bool {
        self.max_buffered_delete_terms
            .is_some_and(|max| delete_count >= max)
    }

    /// Frees recycled blocks until allocation is back under the free level.
    ///
    /// `free_consumer` asks the indexing chain to release its own recycled
    /// state and reports whether it freed anything.
    pub fn balance<F>(&self, arena: &Arena, deletes: usize, mut free_consumer: F) -> BalanceOutcome
    where
        F: FnMut() -> bool,
    {
        let Some(budget) = self.ram_buffer_size else {
            return BalanceOutcome::default();
        };

        let start = arena.bytes_allocated() + deletes;
        if start < self.free_trigger {
            let buffer_is_full = over_budget(arena.bytes_used(), deletes, budget);
            if buffer_is_full {
                log::debug!(
                    "RAM used {} + deletes {deletes} over budget {budget}; buffer is full",
                    arena.bytes_used()
                );
            }
            return BalanceOutcome {
                buffer_is_full,
                freed_bytes: 0,
            };
        }

        log::debug!(
            "RAM allocated {start} over free trigger {}; freeing down to {}",
            self.free_trigger,
            self.free_level
        );

        let mut outcome = BalanceOutcome::default();
        let mut consumer_freed = true;
        let mut iteration = 0usize;
        while arena.bytes_allocated() + deletes > self.free_level {
            if !consumer_freed && !arena.has_free_blocks() {
                outcome.buffer_is_full = over_budget(arena.bytes_used(), deletes, budget);
                log::debug!(
                    "nothing left to free; buffer is {}",
                    if outcome.buffer_is_full { "full" } else { "not full" }
                );
                break;
            }

            match iteration % 5 {
                0 => outcome.freed_bytes += arena.free_blocks(PoolKind::Byte, 1),
                1 => outcome.freed_bytes += arena.free_blocks(PoolKind::Char, 1),
                2 => outcome.freed_bytes += arena.free_blocks(PoolKind::Int, 1),
                3 => {
                    outcome.freed_bytes +=
                        arena.free_blocks(PoolKind::PerDoc, PER_DOC_BLOCKS_PER_ROUND)
                }
                _ => {
                    if consumer_freed {
                        consumer_freed = free_consumer();
                    }
                }
            }
            iteration += 1;
        }

        log::debug!(
            "freed {} block bytes; RAM allocated now {}",
            outcome.freed_bytes,
            arena.bytes_allocated() + deletes
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(budget: usize) -> DocumentsWriterConfig {
        DocumentsWriterConfig::default()
            .with_ram_buffer_size(Some(budget))
            .with_block_sizes(1024, 256, 512, 64)
    }

    #[test]
    fn test_count_threshold_ignored_with_ram_budget() {
        let by_ram = RamPolicy::new(&config(1 << 20).with_max_buffered_docs(Some(2)));
        assert!(!by_ram.flush_by_count(10));

        let by_count = RamPolicy::new(
            &DocumentsWriterConfig::default()
                .with_ram_buffer_size(None)
                .with_max_buffered_docs(Some(2)),
        );
        assert!(!by_count.flush_by_count(1));
        assert!(by_count.flush_by_count(2));
        assert!(!by_count.should_balance(usize::MAX / 2, usize::MAX / 2, 0, false));
    }

    #[test]
    fn test_free_blocks_down_to_level() {
        let config = config(10 * 1024);
        let arena = Arena::new(&config);
        let policy = RamPolicy::new(&config);

        // 12 byte blocks allocated and released: 12 KiB allocated, none used.
        let blocks: Vec<_> = (0..12).map(|_| arena.acquire_byte_block(true)).collect();
        arena.release_byte_blocks(blocks, true);
        assert_eq!(arena.bytes_used(), 0);
        assert!(policy.should_balance(0, arena.bytes_allocated(), 0, false));

        let outcome = policy.balance(&arena, 0, || false);
        assert!(!outcome.buffer_is_full);
        assert!(arena.bytes_allocated() <= config.free_level_bytes().unwrap());
        assert_eq!(outcome.freed_bytes, 12 * 1024 - arena.bytes_allocated());
    }

    #[test]
    fn test_usage_at_budget_is_full() {
        let config = config(4 * 1024);
        let arena = Arena::new(&config);
        let policy = RamPolicy::new(&config);

        // Three 1 KiB blocks plus 1 KiB of deletes land exactly on the budget.
        let held: Vec<_> = (0..3).map(|_| arena.acquire_byte_block(true)).collect();
        let deletes = 1024;
        assert!(policy.should_balance(arena.bytes_used(), arena.bytes_allocated(), deletes, false));
        let outcome = policy.balance(&arena, deletes, || false);
        assert!(outcome.buffer_is_full);

        // One byte under the budget is neither balanced nor full.
        assert!(!policy.should_balance(arena.bytes_used(), arena.bytes_allocated(), deletes - 1, false));
        assert!(!policy.balance(&arena, deletes - 1, || false).buffer_is_full);
        arena.release_byte_blocks(held, true);
    }

    #[test]
    fn test_nothing_to_free_marks_buffer_full() {
        let config = config(4 * 1024);
        let arena = Arena::new(&config);
        let policy = RamPolicy::new(&config);

        let held: Vec<_> = (0..6).map(|_| arena.acquire_byte_block(true)).collect();
        let mut asked = 0;
        let outcome = policy.balance(&arena, 0, || {
            asked += 1;
            false
        });
        assert!(outcome.buffer_is_full);
        assert_eq!(outcome.freed_bytes, 0);
        assert_eq!(asked, 1);
        drop(held);
    }

    #[test]
    fn test_deletes_count_against_budget() {
        let config = config(1000).with_max_buffered_delete_terms(Some(3));
        let policy = RamPolicy::new(&config);
        assert!(!policy.deletes_full(100, 100, 0));
        assert!(policy.deletes_full(900, 100, 0));
        assert!(policy.deletes_full(0, 0, 3));
        assert!(policy.should_apply_deletes(500, 0));
        assert!(!policy.should_apply_deletes(499, 2));
    }
}
