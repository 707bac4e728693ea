//! Buffered deletes.
//!
//! Deletes by term, doc id and query are buffered with the number of
//! documents that existed when they were issued (the "limit"). Applying
//! them later only removes documents below that limit, so a document added
//! after a delete survives it.
//!
//! The documents writer keeps two generations: deletes buffered since the
//! last flush, which an abort discards, and flushed deletes waiting to be
//! applied to segments by the commit layer.

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::sync::Arc;

use ahash::AHashMap;
use bit_vec::BitVec;

use crate::document::Term;
use crate::error::{PennantError, Result};
use crate::index::field_infos::{FIELD_INFOS_EXTENSION, FieldInfos};
use crate::index::freq_prox::read_postings;
use crate::storage::Storage;

/// Estimated cost of one buffered doc id.
pub const BYTES_PER_DEL_DOC_ID: usize = 2 * mem::size_of::<usize>();

/// Estimated cost of one buffered term, excluding its text.
pub const BYTES_PER_DEL_TERM: usize = 6 * mem::size_of::<usize>();

/// Estimated cost of one buffered query.
pub const BYTES_PER_DEL_QUERY: usize = 4 * mem::size_of::<usize>() + 28;

/// A segment deletes can be applied to.
pub trait DeleteTarget {
    /// Number of documents in the segment.
    fn max_doc(&self) -> u32;

    /// Documents containing `term`, ascending.
    fn docs_for_term(&self, term: &Term) -> Result<Vec<u32>>;

    /// Documents matching `query`, ascending.
    fn docs_for_query(&self, query: &dyn DeleteQuery) -> Result<Vec<u32>>;

    /// Marks `doc_id` deleted. Returns false if it already was.
    fn delete_document(&mut self, doc_id: u32) -> Result<bool>;
}

/// A query whose matches get deleted.
pub trait DeleteQuery: Send + Sync + fmt::Debug {
    /// Identity of the query. Buffering a query with the same key replaces
    /// the earlier one.
    fn key(&self) -> String;

    /// Documents of `target` matching the query, ascending.
    fn matching_docs(&self, target: &dyn DeleteTarget) -> Result<Vec<u32>>;
}

/// Matches documents containing every one of its terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermsDeleteQuery {
    terms: Vec<Term>,
}

impl TermsDeleteQuery {
    pub fn new(mut terms: Vec<Term>) -> Self {
        terms.sort();
        terms.dedup();
        TermsDeleteQuery { terms }
    }
}

impl DeleteQuery for TermsDeleteQuery {
    fn key(&self) -> String {
        self.terms
            .iter()
            .map(|t| format!("+{t}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn matching_docs(&self, target: &dyn DeleteTarget) -> Result<Vec<u32>> {
        let Some((first, rest)) = self.terms.split_first() else {
            return Ok(Vec::new());
        };
        let mut docs = target.docs_for_term(first)?;
        for term in rest {
            let other = target.docs_for_term(term)?;
            docs.retain(|doc| other.binary_search(doc).is_ok());
        }
        Ok(docs)
    }
}

/// One generation of buffered deletes.
#[derive(Default)]
pub struct BufferedDeletes {
    terms: BTreeMap<Term, usize>,
    num_terms: usize,
    doc_ids: Vec<usize>,
    queries: AHashMap<String, (Arc<dyn DeleteQuery>, usize)>,
    bytes_used: usize,
}

impl fmt::Debug for BufferedDeletes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedDeletes")
            .field("terms", &self.terms)
            .field("num_terms", &self.num_terms)
            .field("doc_ids", &self.doc_ids)
            .field("queries", &self.queries.len())
            .field("bytes_used", &self.bytes_used)
            .finish()
    }
}

impl BufferedDeletes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a term delete for documents below `limit`. A term already
    /// buffered keeps the larger limit.
    pub fn add_term(&mut self, term: Term, limit: usize) {
        let bytes = BYTES_PER_DEL_TERM + term.heap_size();
        self.terms
            .entry(term)
            .and_modify(|current| *current = (*current).max(limit))
            .or_insert(limit);
        self.num_terms += 1;
        self.bytes_used += bytes;
    }

    /// Buffers the delete of one absolute doc id.
    pub fn add_doc_id(&mut self, doc_id: usize) {
        self.doc_ids.push(doc_id);
        self.bytes_used += BYTES_PER_DEL_DOC_ID;
    }

    pub fn add_query(&mut self, query: Arc<dyn DeleteQuery>, limit: usize) {
        self.queries.insert(query.key(), (query, limit));
        self.bytes_used += BYTES_PER_DEL_QUERY;
    }

    /// Moves everything in `other` into this generation, leaving `other`
    /// empty. Entries from `other` replace entries with the same key.
    pub fn update(&mut self, other: &mut BufferedDeletes) {
        self.num_terms += other.num_terms;
        self.bytes_used += other.bytes_used;
        self.terms.append(&mut other.terms);
        self.doc_ids.append(&mut other.doc_ids);
        self.queries.extend(other.queries.drain());
        other.clear();
    }

    pub fn clear(&mut self) {
        self.terms.clear();
        self.num_terms = 0;
        self.doc_ids.clear();
        self.queries.clear();
        self.bytes_used = 0;
    }

    pub fn any(&self) -> bool {
        !self.terms.is_empty() || !self.doc_ids.is_empty() || !self.queries.is_empty()
    }

    /// Term deletes buffered, counting repeats of the same term.
    pub fn num_terms(&self) -> usize {
        self.num_terms
    }

    pub fn num_doc_ids(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn num_queries(&self) -> usize {
        self.queries.len()
    }

    /// Deletes buffered of every kind, counting repeated terms.
    pub fn size(&self) -> usize {
        self.num_terms + self.doc_ids.len() + self.queries.len()
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub fn term_limit(&self, term: &Term) -> Option<usize> {
        self.terms.get(term).copied()
    }

    pub fn query_limit(&self, key: &str) -> Option<usize> {
        self.queries.get(key).map(|(_, limit)| *limit)
    }

    pub fn doc_ids(&self) -> &[usize] {
        &self.doc_ids
    }

    /// Applies every delete to `targets`, which hold consecutive doc id
    /// ranges starting at zero. Returns whether any document was deleted.
    pub fn apply(&self, targets: &mut [&mut dyn DeleteTarget]) -> Result<bool> {
        let mut any = false;
        let mut doc_start = 0usize;
        for target in targets.iter_mut() {
            any |= self.apply_to(&mut **target, doc_start)?;
            doc_start += target.max_doc() as usize;
        }
        Ok(any)
    }

    fn apply_to(&self, target: &mut dyn DeleteTarget, doc_start: usize) -> Result<bool> {
        let mut any = false;
        let doc_end = doc_start + target.max_doc() as usize;

        for (term, &limit) in &self.terms {
            for doc in target.docs_for_term(term)? {
                if doc_start + doc as usize >= limit {
                    break;
                }
                target.delete_document(doc)?;
                any = true;
            }
        }

        for &doc_id in &self.doc_ids {
            if doc_id >= doc_start && doc_id < doc_end {
                target.delete_document((doc_id - doc_start) as u32)?;
                any = true;
            }
        }

        for (query, limit) in self.queries.values() {
            for doc in target.docs_for_query(query.as_ref())? {
                if doc_start + doc as usize >= *limit {
                    break;
                }
                target.delete_document(doc)?;
                any = true;
            }
        }
        Ok(any)
    }
}

/// In-memory segment view: a term index plus a deletion bitmap.
#[derive(Debug, Clone)]
pub struct BitmapDeleteTarget {
    deleted: BitVec,
    deleted_count: u32,
    postings: BTreeMap<Term, Vec<u32>>,
}

impl BitmapDeleteTarget {
    pub fn new(max_doc: u32) -> Self {
        BitmapDeleteTarget {
            deleted: BitVec::from_elem(max_doc as usize, false),
            deleted_count: 0,
            postings: BTreeMap::new(),
        }
    }

    /// Loads the term index of a flushed segment.
    pub fn from_segment(storage: &dyn Storage, segment: &str, max_doc: u32) -> Result<Self> {
        let infos = FieldInfos::read(storage, &format!("{segment}.{FIELD_INFOS_EXTENSION}"))?;
        let mut target = Self::new(max_doc);
        for term in read_postings(storage, segment)? {
            let field = infos.by_number(term.field_number).ok_or_else(|| {
                PennantError::index(format!(
                    "segment {segment} references unknown field {}",
                    term.field_number
                ))
            })?;
            let docs = term.docs.iter().map(|d| d.doc_id).collect();
            target.postings.insert(Term::new(field.name, term.text), docs);
        }
        Ok(target)
    }

    /// Records that `doc_id` contains `term`.
    pub fn add_term(&mut self, term: Term, doc_id: u32) {
        let docs = self.postings.entry(term).or_default();
        if let Err(pos) = docs.binary_search(&doc_id) {
            docs.insert(pos, doc_id);
        }
    }

    pub fn is_deleted(&self, doc_id: u32) -> bool {
        self.deleted.get(doc_id as usize).unwrap_or(false)
    }

    pub fn num_deleted(&self) -> u32 {
        self.deleted_count
    }

    pub fn live_docs(&self) -> Vec<u32> {
        (0..self.max_doc()).filter(|&d| !self.is_deleted(d)).collect()
    }
}

impl DeleteTarget for BitmapDeleteTarget {
    fn max_doc(&self) -> u32 {
        self.deleted.len() as u32
    }

    fn docs_for_term(&self, term: &Term) -> Result<Vec<u32>> {
        Ok(self.postings.get(term).cloned().unwrap_or_default())
    }

    fn docs_for_query(&self, query: &dyn DeleteQuery) -> Result<Vec<u32>> {
        query.matching_docs(self)
    }

    fn delete_document(&mut self, doc_id: u32) -> Result<bool> {
        if doc_id >= self.max_doc() {
            return Err(PennantError::index(format!(
                "Document ID {doc_id} out of range for {} docs",
                self.max_doc()
            )));
        }
        if self.is_deleted(doc_id) {
            return Ok(false);
        }
        self.deleted.set(doc_id as usize, true);
        self.deleted_count += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(max_doc: u32, terms: &[(&str, &[u32])]) -> BitmapDeleteTarget {
        let mut target = BitmapDeleteTarget::new(max_doc);
        for (text, docs) in terms {
            for &doc in *docs {
                target.add_term(Term::new("id", *text), doc);
            }
        }
        target
    }

    #[test]
    fn test_term_limit_only_grows() {
        let mut deletes = BufferedDeletes::new();
        let term = Term::new("id", "1");
        deletes.add_term(term.clone(), 5);
        deletes.add_term(term.clone(), 3);
        assert_eq!(deletes.term_limit(&term), Some(5));
        assert_eq!(deletes.num_terms(), 2);
        assert_eq!(deletes.bytes_used(), 2 * (BYTES_PER_DEL_TERM + 3));
    }

    #[test]
    fn test_update_moves_everything() {
        let mut flushed = BufferedDeletes::new();
        let mut in_ram = BufferedDeletes::new();
        in_ram.add_term(Term::new("id", "a"), 1);
        in_ram.add_doc_id(4);
        in_ram.add_query(Arc::new(TermsDeleteQuery::new(vec![Term::new("id", "b")])), 2);
        let bytes = in_ram.bytes_used();

        flushed.update(&mut in_ram);
        assert!(!in_ram.any());
        assert_eq!(in_ram.bytes_used(), 0);
        assert!(flushed.any());
        assert_eq!(flushed.bytes_used(), bytes);
        assert_eq!(flushed.doc_ids(), &[4]);
        assert_eq!(flushed.query_limit("+id:b"), Some(2));
    }

    #[test]
    fn test_apply_respects_limits_across_segments() {
        // Segment one holds docs 0..3, segment two docs 3..5.
        let mut one = target(3, &[("x", &[0, 2]), ("y", &[1])]);
        let mut two = target(2, &[("x", &[0, 1])]);

        let mut deletes = BufferedDeletes::new();
        // Issued when 4 docs existed: doc 4 (two's doc 1) survives.
        deletes.add_term(Term::new("id", "x"), 4);
        deletes.add_doc_id(1);

        let any = deletes
            .apply(&mut [&mut one as &mut dyn DeleteTarget, &mut two])
            .unwrap();
        assert!(any);
        assert_eq!(one.live_docs(), Vec::<u32>::new());
        assert_eq!(two.live_docs(), vec![1]);
    }

    #[test]
    fn test_apply_queries() {
        let mut one = target(4, &[("a", &[0, 1, 3]), ("b", &[1, 2, 3])]);
        let mut deletes = BufferedDeletes::new();
        let query = TermsDeleteQuery::new(vec![Term::new("id", "b"), Term::new("id", "a")]);
        assert_eq!(query.key(), "+id:a +id:b");
        deletes.add_query(Arc::new(query), 2);

        assert!(deletes.apply(&mut [&mut one as &mut dyn DeleteTarget]).unwrap());
        assert!(one.is_deleted(1));
        assert!(!one.is_deleted(3));
        assert_eq!(one.num_deleted(), 1);
    }

    #[test]
    fn test_apply_nothing_matches() {
        let mut one = target(2, &[("a", &[0])]);
        let mut deletes = BufferedDeletes::new();
        deletes.add_term(Term::new("id", "missing"), 2);
        assert!(!deletes.apply(&mut [&mut one as &mut dyn DeleteTarget]).unwrap());
        assert!(one.delete_document(5).is_err());
    }
}
