//! The default indexing chain.
//!
//! [`DocFieldProcessor`] groups the fields of a document by name, numbers
//! them through the shared [`FieldInfos`] and sends:
//!
//! - stored values to the stored fields doc store, in document order;
//! - tokens of indexed fields to the primary terms hash
//!   ([`FreqProxPerField`]), and for fields with term vectors also to the
//!   secondary terms hash ([`TermVectorsPerField`]).
//!
//! The primary layer charges its blocks to the RAM budget; the secondary
//! layer shares the primary's char pool and is reset after every field.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;

use crate::document::{Field, TermVectorMode};
use crate::error::{PennantError, Result};
use crate::index::arena::Arena;
use crate::index::arena::char_pool::CharBlockPool;
use crate::index::config::DocumentsWriterConfig;
use crate::index::consumer::{
    DocConsumer, DocConsumerPerThread, DocState, DocWriter, SegmentWriteState, combine,
};
use crate::index::field_infos::{FIELD_INFOS_EXTENSION, FieldInfos};
use crate::index::files::FileTracker;
use crate::index::freq_prox::{FreqProxFieldView, FreqProxPerField, FreqProxPosting, PostingsWriter};
use crate::index::stored_fields::{StoredFieldsPerThread, StoredFieldsWriter};
use crate::index::term_vectors::{
    TermVectorPosting, TermVectorsPerField, TermVectorsPerThread, TermVectorsWriter,
};
use crate::index::terms_hash::{AddOutcome, HashPools, PostingsFreeList, TermsHashPerField, TokenContext};
use crate::storage::Storage;
use crate::util::utf16;

/// Inversion state of one field in the current document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldInvertState {
    /// Position of the last token, if any.
    pub position: Option<u32>,
    /// Tokens inverted.
    pub length: u32,
    /// Tokens stacked on the previous position.
    pub num_overlap: u32,
    /// Offset added to the offsets of the next field instance.
    pub offset: u32,
}

#[derive(Debug)]
struct FieldPerThread {
    number: u32,
    postings: TermsHashPerField<FreqProxPerField>,
    vectors: TermsHashPerField<TermVectorsPerField>,
    invert_state: FieldInvertState,
    last_generation: u64,
}

/// Global half of the default chain.
#[derive(Debug)]
pub struct DocFieldProcessor {
    arena: Arc<Arena>,
    field_infos: Arc<FieldInfos>,
    stored: Arc<StoredFieldsWriter>,
    vectors: Arc<TermVectorsWriter>,
    postings_free: Arc<PostingsFreeList<FreqProxPosting>>,
    vectors_free: Arc<PostingsFreeList<TermVectorPosting>>,
}

impl DocFieldProcessor {
    pub fn new(
        storage: Arc<dyn Storage>,
        files: Arc<FileTracker>,
        arena: Arc<Arena>,
        config: &DocumentsWriterConfig,
    ) -> Self {
        let chunk = config.postings_free_chunk;
        DocFieldProcessor {
            field_infos: Arc::new(FieldInfos::new()),
            stored: Arc::new(StoredFieldsWriter::new(
                Arc::clone(&storage),
                Arc::clone(&files),
                Arc::clone(&arena),
            )),
            vectors: Arc::new(TermVectorsWriter::new(storage, files, Arc::clone(&arena))),
            postings_free: Arc::new(PostingsFreeList::new(Arc::clone(&arena), true, chunk)),
            vectors_free: Arc::new(PostingsFreeList::new(Arc::clone(&arena), false, chunk)),
            arena,
        }
    }

    pub fn field_infos(&self) -> &Arc<FieldInfos> {
        &self.field_infos
    }
}

impl DocConsumer for DocFieldProcessor {
    type PerThread = DocFieldProcessorPerThread;

    fn add_thread(&self) -> Result<DocFieldProcessorPerThread> {
        Ok(DocFieldProcessorPerThread {
            field_infos: Arc::clone(&self.field_infos),
            fields: AHashMap::new(),
            chars: CharBlockPool::new(Arc::clone(&self.arena)),
            postings_pools: HashPools::new(Arc::clone(&self.arena), true, Arc::clone(&self.postings_free)),
            vector_pools: HashPools::new(Arc::clone(&self.arena), false, Arc::clone(&self.vectors_free)),
            stored: self.stored.per_thread(),
            vectors: self.vectors.per_thread(),
            generation: 0,
        })
    }

    fn flush(
        &self,
        threads: &mut [&mut DocFieldProcessorPerThread],
        state: &mut SegmentWriteState,
    ) -> Result<()> {
        self.stored.flush(state)?;
        self.vectors.flush(state)?;

        {
            let mut fields: BTreeMap<String, Vec<FreqProxFieldView<'_>>> = BTreeMap::new();
            for thread in threads.iter() {
                for (name, field) in &thread.fields {
                    fields.entry(name.clone()).or_default().push(FreqProxFieldView {
                        field: &field.postings,
                        pools: &thread.postings_pools,
                        chars: &thread.chars,
                    });
                }
            }
            PostingsWriter::create(state)?.write_fields(&fields, &self.field_infos, state)?;
        }

        for thread in threads.iter_mut() {
            thread.reset_after_flush();
        }

        let fnm = state.segment_file_name(FIELD_INFOS_EXTENSION);
        self.field_infos.write(&*state.storage, &fnm)?;
        state.flushed_files.insert(fnm);
        Ok(())
    }

    fn close_doc_store(&self, state: &mut SegmentWriteState) -> Result<()> {
        let vectors = self.vectors.close_doc_store(state);
        let stored = self.stored.close_doc_store(state);
        vectors.and(stored)
    }

    fn abort(&self) {
        self.vectors.abort();
        self.stored.abort();
    }

    fn free_ram(&self) -> bool {
        self.postings_free.free_ram() | self.vectors_free.free_ram()
    }
}

/// Per-thread half of the default chain.
#[derive(Debug)]
pub struct DocFieldProcessorPerThread {
    field_infos: Arc<FieldInfos>,
    fields: AHashMap<String, FieldPerThread>,
    chars: CharBlockPool,
    postings_pools: HashPools<FreqProxPosting>,
    vector_pools: HashPools<TermVectorPosting>,
    stored: StoredFieldsPerThread,
    vectors: TermVectorsPerThread,
    generation: u64,
}

impl DocFieldProcessorPerThread {
    /// Distinct terms buffered for `field` since the last flush.
    pub fn num_postings(&self, field: &str) -> usize {
        self.fields
            .get(field)
            .map_or(0, |f| f.postings.num_postings())
    }

    /// Distinct terms buffered across all fields.
    pub fn total_postings(&self) -> usize {
        self.fields.values().map(|f| f.postings.num_postings()).sum()
    }

    /// Inversion state `field` was left in by the last document.
    pub fn invert_state(&self, field: &str) -> Option<FieldInvertState> {
        self.fields.get(field).map(|f| f.invert_state)
    }

    fn field_mut(&mut self, name: &str, number: u32) -> &mut FieldPerThread {
        let generation = self.generation;
        let field = self
            .fields
            .entry(name.to_string())
            .or_insert_with(|| FieldPerThread {
                number,
                postings: TermsHashPerField::new(FreqProxPerField::new()),
                vectors: TermsHashPerField::new(TermVectorsPerField::new()),
                invert_state: FieldInvertState::default(),
                last_generation: generation,
            });
        field.last_generation = generation;
        field
    }

    fn invert(
        &mut self,
        doc_state: &mut DocState,
        name: &str,
        mode: TermVectorMode,
        fields: &mut [Field],
        instances: &[usize],
    ) -> Result<()> {
        let Some(field) = self.fields.get_mut(name) else {
            return Err(PennantError::internal(format!("field {name} was not registered")));
        };
        field.vectors.consumer_mut().set_mode(mode);
        field.invert_state = FieldInvertState::default();
        let state = &mut field.invert_state;

        for &i in instances {
            let Some(tokens) = fields[i].take_tokens() else {
                continue;
            };
            let mut last_end = 0;
            for token in tokens {
                let token = token?;
                if token.end_offset < token.start_offset {
                    return Err(PennantError::analysis(format!(
                        "token in field {name} ends at {} before it starts at {}",
                        token.end_offset, token.start_offset
                    )));
                }

                let next = match state.position {
                    Some(last) => last.checked_add(token.position_increment),
                    None => Some(token.position_increment.saturating_sub(1)),
                };
                let Some(position) = next else {
                    return Err(PennantError::analysis(format!(
                        "position overflow in field {name}"
                    )));
                };
                if token.position_increment == 0 {
                    state.num_overlap += 1;
                }
                state.position = Some(position);
                state.length += 1;
                last_end = token.end_offset;

                let mut text = token.text;
                let code = utf16::sanitize_and_hash(&mut text);
                let context = TokenContext {
                    doc_id: doc_state.doc_id,
                    position,
                    start_offset: state.offset + token.start_offset,
                    end_offset: state.offset + token.end_offset,
                    payload: token.payload.as_deref(),
                };

                let outcome = field
                    .postings
                    .add_text(&mut self.postings_pools, &mut self.chars, &text, code, &context)
                    .map_err(PennantError::into_aborting)?;
                match outcome {
                    AddOutcome::Skipped => doc_state.note_skipped_term(&text),
                    AddOutcome::Added { text_start, .. } => {
                        if mode.is_stored() {
                            field
                                .vectors
                                .add_text_start(&mut self.vector_pools, text_start, &context)
                                .map_err(PennantError::into_aborting)?;
                        }
                    }
                }
            }
            state.offset += last_end;
        }

        if mode.is_stored() {
            self.vectors
                .finish_field(
                    doc_state,
                    field.number,
                    &mut field.vectors,
                    &mut self.vector_pools,
                    &self.chars,
                )
                .map_err(PennantError::into_aborting)?;
        }
        Ok(())
    }

    fn reset_vectors(&mut self, recycle_postings: bool) {
        let shared = Arc::clone(self.vector_pools.shared());
        for field in self.fields.values_mut() {
            if field.vectors.num_postings() > 0 {
                field.vectors.reset(&shared);
            }
        }
        self.vector_pools.reset(recycle_postings);
    }

    fn reset_after_flush(&mut self) {
        let shared = Arc::clone(self.postings_pools.shared());
        for field in self.fields.values_mut() {
            field.postings.reset(&shared);
            *field.postings.consumer_mut() = FreqProxPerField::new();
        }
        self.postings_pools.release_all(true);
        self.reset_vectors(true);
        self.chars.reset();

        let generation = self.generation;
        self.fields.retain(|_, f| f.last_generation == generation);
        self.generation += 1;
    }
}

impl DocConsumerPerThread for DocFieldProcessorPerThread {
    fn start_document(&mut self, _doc_state: &DocState) {
        self.stored.start_document();
        self.vectors.start_document();
    }

    fn process_fields(&mut self, doc_state: &mut DocState, fields: &mut [Field]) -> Result<()> {
        // (name, number, vector mode, instance indices) in first-seen order
        let mut groups: Vec<(String, u32, TermVectorMode, Vec<usize>)> = Vec::new();
        let mut by_name: AHashMap<String, usize> = AHashMap::new();

        for (i, field) in fields.iter().enumerate() {
            let mode = if field.is_indexed() {
                field.term_vectors()
            } else {
                TermVectorMode::No
            };
            let number = self.field_infos.add(field.name(), field.is_indexed(), mode);
            self.field_mut(field.name(), number);

            match by_name.get(field.name()) {
                Some(&g) => {
                    let group = &mut groups[g];
                    group.2 = group.2.union(mode);
                    group.3.push(i);
                }
                None => {
                    by_name.insert(field.name().to_string(), groups.len());
                    groups.push((field.name().to_string(), number, mode, vec![i]));
                }
            }

            if let Some(value) = field.stored_value() {
                self.stored
                    .add_field(doc_state, number, value)
                    .map_err(PennantError::into_aborting)?;
            }
        }

        for (name, _, mode, instances) in &groups {
            let indexed = instances.iter().any(|&i| fields[i].is_indexed());
            if indexed {
                self.invert(doc_state, name, *mode, fields, instances)?;
            }
        }

        if let Some(prefix) = &doc_state.max_term_prefix {
            log::warn!(
                "doc {} has a term longer than the char block; skipped term starting with {prefix:?}",
                doc_state.doc_id
            );
        }
        Ok(())
    }

    fn finish_document(&mut self, _doc_state: &DocState) -> Result<Option<Box<dyn DocWriter>>> {
        let stored = self
            .stored
            .finish_document()
            .map(|doc| Box::new(doc) as Box<dyn DocWriter>);
        let vectors = self
            .vectors
            .finish_document()
            .map(|doc| Box::new(doc) as Box<dyn DocWriter>);
        Ok(combine(stored, vectors))
    }

    fn abort_document(&mut self, _doc_state: &DocState) {
        self.stored.abort_document();
        self.vectors.abort_document();
        self.reset_vectors(false);
    }

    fn abort(&mut self) {
        self.stored.abort_document();
        self.vectors.abort_document();
        let shared = Arc::clone(self.postings_pools.shared());
        for field in self.fields.values_mut() {
            field.postings.reset(&shared);
        }
        self.reset_vectors(true);
        self.fields.clear();
        self.postings_pools.release_all(true);
        self.chars.reset();
    }
}
