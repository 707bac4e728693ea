//! Term vectors doc store.
//!
//! While a document is inverted, fields that store term vectors also feed a
//! secondary terms hash keyed by the primary's text start. When a field is
//! done its vector is sorted and appended to the document's `.tvf` buffer,
//! and the secondary postings are reset. Finished documents are written in
//! doc id order to:
//!
//! - `.tvx`: per document, `u64` pointers into `.tvd` and `.tvf`;
//! - `.tvd`: per document, the vector field count, field numbers and
//!   `.tvf` pointer deltas;
//! - `.tvf`: per field, term count, flags and per term the shared prefix
//!   length, suffix bytes, frequency and the raw position and offset
//!   streams.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::document::TermVectorMode;
use crate::error::{PennantError, Result};
use crate::index::arena::Arena;
use crate::index::arena::char_pool::CharBlockPool;
use crate::index::arena::per_doc::PerDocBuffer;
use crate::index::consumer::{DocState, DocWriter, SegmentWriteState};
use crate::index::files::FileTracker;
use crate::index::terms_hash::{HashPools, StreamWriter, TermsHashConsumer, TermsHashPerField, TokenContext};
use crate::storage::structured::StructWriter;
use crate::storage::{Storage, StorageOutput};
use crate::util::{utf16, varint};

pub const VECTORS_INDEX_EXTENSION: &str = "tvx";
pub const VECTORS_DOCUMENTS_EXTENSION: &str = "tvd";
pub const VECTORS_FIELDS_EXTENSION: &str = "tvf";

pub const STORE_POSITIONS: u8 = 0x1;
pub const STORE_OFFSETS: u8 = 0x2;

const POSITION_STREAM: usize = 0;
const OFFSET_STREAM: usize = 1;

/// Buffered vector state of one term in the current document.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermVectorPosting {
    pub freq: u32,
    pub last_offset: u32,
    pub last_position: u32,
}

/// Term vector consumer of one field.
#[derive(Debug, Default)]
pub struct TermVectorsPerField {
    mode: TermVectorMode,
    max_num_postings: usize,
}

impl TermVectorsPerField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> TermVectorMode {
        self.mode
    }

    /// Mode of the field instances of the current document.
    pub fn set_mode(&mut self, mode: TermVectorMode) {
        self.mode = mode;
    }

    /// Largest vector seen for this field.
    pub fn max_num_postings(&self) -> usize {
        self.max_num_postings
    }
}

impl TermsHashConsumer for TermVectorsPerField {
    type Data = TermVectorPosting;

    fn stream_count(&self) -> usize {
        2
    }

    fn new_term(
        &mut self,
        streams: &mut StreamWriter<'_>,
        data: &mut TermVectorPosting,
        token: &TokenContext<'_>,
    ) -> Result<()> {
        data.freq = 1;
        if self.mode.with_offsets() {
            streams.write_vint(OFFSET_STREAM, token.start_offset)?;
            streams.write_vint(OFFSET_STREAM, token.end_offset - token.start_offset)?;
            data.last_offset = token.end_offset;
        }
        if self.mode.with_positions() {
            streams.write_vint(POSITION_STREAM, token.position)?;
            data.last_position = token.position;
        }
        Ok(())
    }

    fn add_term(
        &mut self,
        streams: &mut StreamWriter<'_>,
        data: &mut TermVectorPosting,
        token: &TokenContext<'_>,
    ) -> Result<()> {
        data.freq += 1;
        if self.mode.with_offsets() {
            streams.write_vint(OFFSET_STREAM, token.start_offset - data.last_offset)?;
            streams.write_vint(OFFSET_STREAM, token.end_offset - token.start_offset)?;
            data.last_offset = token.end_offset;
        }
        if self.mode.with_positions() {
            streams.write_vint(POSITION_STREAM, token.position - data.last_position)?;
            data.last_position = token.position;
        }
        Ok(())
    }
}

type Output = StructWriter<Box<dyn StorageOutput>>;

struct Outputs {
    segment: String,
    tvx: Output,
    tvd: Output,
    tvf: Output,
    last_doc_id: usize,
}

impl Outputs {
    fn fill(&mut self, end: usize) -> Result<()> {
        while self.last_doc_id < end {
            self.tvx.write_u64(self.tvd.position())?;
            self.tvx.write_u64(self.tvf.position())?;
            self.tvd.write_varint(0)?;
            self.last_doc_id += 1;
        }
        Ok(())
    }

    fn file_names(segment: &str) -> [String; 3] {
        [
            format!("{segment}.{VECTORS_INDEX_EXTENSION}"),
            format!("{segment}.{VECTORS_DOCUMENTS_EXTENSION}"),
            format!("{segment}.{VECTORS_FIELDS_EXTENSION}"),
        ]
    }
}

/// Shared writer of the term vectors doc store. Files are only created once
/// a document with vectors is finished.
pub struct TermVectorsWriter {
    storage: Arc<dyn Storage>,
    files: Arc<FileTracker>,
    arena: Arc<Arena>,
    outputs: Mutex<Option<Outputs>>,
}

impl std::fmt::Debug for TermVectorsWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermVectorsWriter")
            .field("open", &self.outputs.lock().is_some())
            .finish()
    }
}

impl TermVectorsWriter {
    pub fn new(storage: Arc<dyn Storage>, files: Arc<FileTracker>, arena: Arc<Arena>) -> Self {
        TermVectorsWriter {
            storage,
            files,
            arena,
            outputs: Mutex::new(None),
        }
    }

    pub fn per_thread(self: &Arc<Self>) -> TermVectorsPerThread {
        TermVectorsPerThread {
            writer: Arc::clone(self),
            doc: None,
        }
    }

    fn finish_document(&self, doc: &TermVectorsDoc) -> Result<()> {
        let mut guard = self.outputs.lock();
        if guard.is_none() {
            let [tvx_name, tvd_name, tvf_name] = Outputs::file_names(&doc.segment);
            let tvx = StructWriter::new(self.storage.create_output(&tvx_name)?);
            self.files.add_open(tvx_name);
            let tvd = StructWriter::new(self.storage.create_output(&tvd_name)?);
            self.files.add_open(tvd_name);
            let tvf = StructWriter::new(self.storage.create_output(&tvf_name)?);
            self.files.add_open(tvf_name);
            *guard = Some(Outputs {
                segment: doc.segment.clone(),
                tvx,
                tvd,
                tvf,
                last_doc_id: 0,
            });
        }
        let Some(outputs) = guard.as_mut() else {
            return Err(PennantError::internal("term vector outputs missing"));
        };

        outputs.fill(doc.store_doc_id)?;
        outputs.tvx.write_u64(outputs.tvd.position())?;
        outputs.tvx.write_u64(outputs.tvf.position())?;
        outputs.tvd.write_varint(doc.field_numbers.len() as u64)?;
        for number in &doc.field_numbers {
            outputs.tvd.write_varint(*number as u64)?;
        }
        let mut last_pointer = 0;
        for pointer in &doc.field_pointers {
            outputs.tvd.write_varint(pointer - last_pointer)?;
            last_pointer = *pointer;
        }
        doc.tvf.write_to(&mut outputs.tvf)?;
        outputs.last_doc_id += 1;
        Ok(())
    }

    /// Catches up on documents without vectors and flushes, if open.
    pub fn flush(&self, state: &SegmentWriteState) -> Result<()> {
        if let Some(outputs) = self.outputs.lock().as_mut() {
            outputs.fill(state.num_docs_in_store)?;
            outputs.tvx.flush()?;
            outputs.tvd.flush()?;
            outputs.tvf.flush()?;
        }
        Ok(())
    }

    pub fn close_doc_store(&self, state: &mut SegmentWriteState) -> Result<()> {
        let Some(mut outputs) = self.outputs.lock().take() else {
            return Ok(());
        };
        outputs.fill(state.num_docs_in_store)?;

        let Outputs {
            segment,
            tvx,
            tvd,
            tvf,
            ..
        } = outputs;
        tvx.close()?;
        tvd.close()?;
        tvf.close()?;

        let names = Outputs::file_names(&segment);
        for name in &names {
            self.files.close(name);
            state.flushed_files.insert(name.clone());
        }

        let expected = 4 + state.num_docs_in_store as u64 * 16;
        let actual = self.storage.file_size(&names[0])?;
        if actual != expected {
            return Err(PennantError::aborting(format!(
                "{} is {actual} bytes but {} docs need {expected}",
                names[0], state.num_docs_in_store
            )));
        }
        log::info!("closed term vectors doc store {segment}");
        Ok(())
    }

    pub fn abort(&self) {
        if let Some(outputs) = self.outputs.lock().take() {
            let _ = outputs.tvx.discard();
            let _ = outputs.tvd.discard();
            let _ = outputs.tvf.discard();
        }
    }
}

/// Term vectors of the document a thread state is processing.
#[derive(Debug)]
pub struct TermVectorsPerThread {
    writer: Arc<TermVectorsWriter>,
    doc: Option<TermVectorsDoc>,
}

impl TermVectorsPerThread {
    pub fn start_document(&mut self) {
        self.doc = None;
    }

    /// Appends the vector of one field to the current document and resets
    /// the field's secondary postings.
    pub fn finish_field(
        &mut self,
        doc_state: &DocState,
        field_number: u32,
        field: &mut TermsHashPerField<TermVectorsPerField>,
        pools: &mut HashPools<TermVectorPosting>,
        chars: &CharBlockPool,
    ) -> Result<()> {
        let num_postings = field.num_postings();
        if num_postings == 0 {
            return Ok(());
        }
        let mode = field.consumer().mode();
        let result = self.write_field(doc_state, field_number, field, pools, chars, mode);

        let consumer = field.consumer_mut();
        consumer.max_num_postings = consumer.max_num_postings.max(num_postings);
        let shared = Arc::clone(pools.shared());
        field.reset(&shared);
        pools.reset(false);
        result
    }

    fn write_field(
        &mut self,
        doc_state: &DocState,
        field_number: u32,
        field: &TermsHashPerField<TermVectorsPerField>,
        pools: &HashPools<TermVectorPosting>,
        chars: &CharBlockPool,
        mode: TermVectorMode,
    ) -> Result<()> {
        let doc = self.doc.get_or_insert_with(|| TermVectorsDoc {
            writer: Arc::clone(&self.writer),
            doc_id: doc_state.doc_id,
            store_doc_id: doc_state.store_doc_id(),
            segment: doc_state.doc_store_segment.to_string(),
            field_numbers: Vec::new(),
            field_pointers: Vec::new(),
            tvf: PerDocBuffer::new(Arc::clone(&self.writer.arena)),
        });
        doc.field_numbers.push(field_number);
        doc.field_pointers.push(doc.tvf.len() as u64);

        let postings = field.postings();
        let sorted = postings.sorted_ids(|a, b| chars.compare(a.text_start, b.text_start));

        let mut bits = 0u8;
        if mode.with_positions() {
            bits |= STORE_POSITIONS;
        }
        if mode.with_offsets() {
            bits |= STORE_OFFSETS;
        }
        varint::write_u32(&mut doc.tvf, sorted.len() as u32)?;
        std::io::Write::write_all(&mut doc.tvf, &[bits])?;

        let mut last_term: Vec<u8> = Vec::new();
        for id in sorted {
            let posting = postings.get(id);
            let term = utf16::to_string(chars.text_at(posting.text_start)).into_bytes();
            let prefix = last_term
                .iter()
                .zip(&term)
                .take_while(|(a, b)| a == b)
                .count();
            varint::write_u32(&mut doc.tvf, prefix as u32)?;
            varint::write_u32(&mut doc.tvf, (term.len() - prefix) as u32)?;
            std::io::Write::write_all(&mut doc.tvf, &term[prefix..])?;
            varint::write_u32(&mut doc.tvf, posting.data.freq)?;

            if mode.with_positions() {
                pools.reader(posting, POSITION_STREAM).write_to(&mut doc.tvf)?;
            }
            if mode.with_offsets() {
                pools.reader(posting, OFFSET_STREAM).write_to(&mut doc.tvf)?;
            }
            last_term = term;
        }
        Ok(())
    }

    pub fn finish_document(&mut self) -> Option<TermVectorsDoc> {
        self.doc.take()
    }

    pub fn abort_document(&mut self) {
        self.doc = None;
    }
}

/// Term vectors of one finished document.
#[derive(Debug)]
pub struct TermVectorsDoc {
    writer: Arc<TermVectorsWriter>,
    doc_id: u32,
    store_doc_id: usize,
    segment: String,
    field_numbers: Vec<u32>,
    field_pointers: Vec<u64>,
    tvf: PerDocBuffer,
}

impl TermVectorsDoc {
    pub fn num_fields(&self) -> usize {
        self.field_numbers.len()
    }
}

impl DocWriter for TermVectorsDoc {
    fn doc_id(&self) -> u32 {
        self.doc_id
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let writer = Arc::clone(&self.writer);
        writer.finish_document(&self)
    }

    fn abort(self: Box<Self>) {}

    fn size_in_bytes(&self) -> usize {
        self.tvf.size_in_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;
    use crate::index::config::DocumentsWriterConfig;
    use crate::index::terms_hash::{AddOutcome, PostingsFreeList};
    use crate::storage::memory::MemoryStorage;
    use crate::util::utf16::sanitize_and_hash;

    struct Fixture {
        storage: Arc<MemoryStorage>,
        files: Arc<FileTracker>,
        writer: Arc<TermVectorsWriter>,
        chars: CharBlockPool,
        text_starts: AHashMap<String, u32>,
        pools: HashPools<TermVectorPosting>,
        field: TermsHashPerField<TermVectorsPerField>,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(MemoryStorage::new_default());
        let files = Arc::new(FileTracker::new());
        let arena = Arc::new(Arena::new(&DocumentsWriterConfig::default()));
        let shared = Arc::new(PostingsFreeList::new(Arc::clone(&arena), false, 8));
        Fixture {
            writer: Arc::new(TermVectorsWriter::new(
                storage.clone(),
                Arc::clone(&files),
                Arc::clone(&arena),
            )),
            storage,
            files,
            chars: CharBlockPool::new(Arc::clone(&arena)),
            text_starts: AHashMap::new(),
            pools: HashPools::new(arena, false, shared),
            field: TermsHashPerField::new(TermVectorsPerField::new()),
        }
    }

    fn add(f: &mut Fixture, term: &str, position: u32, start: u32, end: u32) {
        // Text lives in the char pool as the primary layer would leave it.
        let text_start = match f.text_starts.get(term) {
            Some(&text_start) => text_start,
            None => {
                let mut text: Vec<u16> = term.encode_utf16().collect();
                sanitize_and_hash(&mut text);
                let text_start = f.chars.append_term(&text);
                f.text_starts.insert(term.to_string(), text_start);
                text_start
            }
        };
        let token = TokenContext {
            position,
            start_offset: start,
            end_offset: end,
            ..Default::default()
        };
        let outcome = f
            .field
            .add_text_start(&mut f.pools, text_start, &token)
            .unwrap();
        assert!(matches!(outcome, AddOutcome::Added { .. }));
    }

    #[test]
    fn test_vector_written_in_term_order() {
        let mut f = fixture();
        f.field
            .consumer_mut()
            .set_mode(TermVectorMode::WithPositionsOffsets);

        // "b a b"
        add(&mut f, "b", 0, 0, 1);
        add(&mut f, "a", 1, 2, 3);
        add(&mut f, "b", 2, 4, 5);
        assert_eq!(f.field.num_postings(), 2);

        let state = DocState::new(1, Arc::from("_0"), 0);
        let mut per_thread = f.writer.per_thread();
        per_thread.start_document();
        per_thread
            .finish_field(&state, 3, &mut f.field, &mut f.pools, &f.chars)
            .unwrap();
        assert_eq!(f.field.num_postings(), 0);
        assert_eq!(f.field.consumer().max_num_postings(), 2);

        let doc = per_thread.finish_document().unwrap();
        assert_eq!(doc.num_fields(), 1);

        let tvf = doc.tvf.to_vec();
        let mut input = tvf.as_slice();
        assert_eq!(varint::read_u32(&mut input).unwrap(), 2);
        let mut bits = [0u8];
        std::io::Read::read_exact(&mut input, &mut bits).unwrap();
        assert_eq!(bits[0], STORE_POSITIONS | STORE_OFFSETS);

        // "a": no shared prefix, one byte suffix, freq 1, position 1,
        // offsets 2..3.
        let expected_a = [0u8, 1, b'a', 1, 1, 2, 1];
        assert_eq!(&input[..expected_a.len()], &expected_a);
        input = &input[expected_a.len()..];
        // "b": freq 2, positions 0 then +2, offsets 0..1 then 4..5.
        let expected_b = [0u8, 1, b'b', 2, 0, 2, 0, 1, 3, 1];
        assert_eq!(input, &expected_b);

        Box::new(doc).finish().unwrap();
        assert_eq!(f.files.open_files().len(), 3);

        let mut state = SegmentWriteState::new(f.storage.clone(), "_0", Some("_0".into()), 2, 2);
        f.writer.close_doc_store(&mut state).unwrap();
        assert!(f.files.open_files().is_empty());
        assert_eq!(f.storage.file_size("_0.tvx").unwrap(), 4 + 2 * 16);
    }

    #[test]
    fn test_no_vectors_no_files() {
        let f = fixture();
        let mut state = SegmentWriteState::new(f.storage.clone(), "_0", Some("_0".into()), 5, 5);
        f.writer.flush(&state).unwrap();
        f.writer.close_doc_store(&mut state).unwrap();
        assert!(state.flushed_files.is_empty());
        assert_eq!(f.storage.file_count(), 0);
    }
}
