//! Stored fields doc store.
//!
//! Two files per doc store segment: `.fdx` holds one little-endian `u64`
//! pointer into `.fdt` per document, `.fdt` holds the field count followed
//! by `(field number, value)` pairs. Documents without stored fields still
//! get an entry with a count of zero so that entries line up with doc ids.

use std::io::Read;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;

use crate::document::FieldValue;
use crate::error::{PennantError, Result};
use crate::index::arena::Arena;
use crate::index::arena::per_doc::PerDocBuffer;
use crate::index::consumer::{DocState, DocWriter, SegmentWriteState};
use crate::index::files::FileTracker;
use crate::storage::structured::StructWriter;
use crate::storage::{Storage, StorageOutput};
use crate::util::varint;

pub const FIELDS_INDEX_EXTENSION: &str = "fdx";
pub const FIELDS_EXTENSION: &str = "fdt";

type Output = StructWriter<Box<dyn StorageOutput>>;

struct Outputs {
    segment: String,
    fdx: Output,
    fdt: Output,
    /// Next doc store position to be written.
    last_doc_id: usize,
}

impl Outputs {
    fn fill(&mut self, end: usize) -> Result<()> {
        while self.last_doc_id < end {
            self.fdx.write_u64(self.fdt.position())?;
            self.fdt.write_varint(0)?;
            self.last_doc_id += 1;
        }
        Ok(())
    }
}

/// Shared writer of the stored fields doc store.
pub struct StoredFieldsWriter {
    storage: Arc<dyn Storage>,
    files: Arc<FileTracker>,
    arena: Arc<Arena>,
    outputs: Mutex<Option<Outputs>>,
}

impl std::fmt::Debug for StoredFieldsWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredFieldsWriter")
            .field("open", &self.outputs.lock().is_some())
            .finish()
    }
}

impl StoredFieldsWriter {
    pub fn new(storage: Arc<dyn Storage>, files: Arc<FileTracker>, arena: Arc<Arena>) -> Self {
        StoredFieldsWriter {
            storage,
            files,
            arena,
            outputs: Mutex::new(None),
        }
    }

    pub fn per_thread(self: &Arc<Self>) -> StoredFieldsPerThread {
        StoredFieldsPerThread {
            writer: Arc::clone(self),
            doc: None,
        }
    }

    fn init_outputs<'a>(&self, outputs: &'a mut Option<Outputs>, segment: &str) -> Result<&'a mut Outputs> {
        if outputs.is_none() {
            let fdt_name = format!("{segment}.{FIELDS_EXTENSION}");
            let fdx_name = format!("{segment}.{FIELDS_INDEX_EXTENSION}");
            let fdt = StructWriter::new(self.storage.create_output(&fdt_name)?);
            self.files.add_open(fdt_name);
            let fdx = StructWriter::new(self.storage.create_output(&fdx_name)?);
            self.files.add_open(fdx_name);
            *outputs = Some(Outputs {
                segment: segment.to_string(),
                fdx,
                fdt,
                last_doc_id: 0,
            });
        }
        outputs
            .as_mut()
            .ok_or_else(|| PennantError::internal("stored fields outputs missing"))
    }

    fn finish_document(&self, doc: &StoredFieldsDoc) -> Result<()> {
        let mut guard = self.outputs.lock();
        let outputs = self.init_outputs(&mut guard, &doc.segment)?;
        outputs.fill(doc.store_doc_id)?;

        outputs.fdx.write_u64(outputs.fdt.position())?;
        outputs.fdt.write_varint(doc.num_fields as u64)?;
        doc.buffer.write_to(&mut outputs.fdt)?;
        outputs.last_doc_id += 1;
        Ok(())
    }

    /// Writes empty entries up to the store's doc count and flushes.
    pub fn flush(&self, state: &SegmentWriteState) -> Result<()> {
        let mut guard = self.outputs.lock();
        if state.num_docs_in_store > 0 {
            if let Some(segment) = &state.doc_store_segment_name {
                let outputs = self.init_outputs(&mut guard, segment)?;
                outputs.fill(state.num_docs_in_store)?;
            }
        }
        if let Some(outputs) = guard.as_mut() {
            outputs.fdx.flush()?;
            outputs.fdt.flush()?;
        }
        Ok(())
    }

    pub fn close_doc_store(&self, state: &mut SegmentWriteState) -> Result<()> {
        let mut guard = self.outputs.lock();
        let pending = guard
            .as_ref()
            .map_or(state.num_docs_in_store, |o| state.num_docs_in_store.saturating_sub(o.last_doc_id));
        if pending > 0 {
            if let Some(segment) = &state.doc_store_segment_name {
                let outputs = self.init_outputs(&mut guard, segment)?;
                outputs.fill(state.num_docs_in_store)?;
            }
        }

        let Some(outputs) = guard.take() else {
            return Ok(());
        };
        let Outputs { segment, fdx, fdt, .. } = outputs;
        let fdx_name = format!("{segment}.{FIELDS_INDEX_EXTENSION}");
        let fdt_name = format!("{segment}.{FIELDS_EXTENSION}");
        fdx.close()?;
        fdt.close()?;
        self.files.close(&fdx_name);
        self.files.close(&fdt_name);
        state.flushed_files.insert(fdx_name.clone());
        state.flushed_files.insert(fdt_name);

        let expected = 4 + state.num_docs_in_store as u64 * 8;
        let actual = self.storage.file_size(&fdx_name)?;
        if actual != expected {
            return Err(PennantError::aborting(format!(
                "{fdx_name} is {actual} bytes but {} docs need {expected}",
                state.num_docs_in_store
            )));
        }
        Ok(())
    }

    /// Drops the open doc store output.
    pub fn abort(&self) {
        if let Some(outputs) = self.outputs.lock().take() {
            let _ = outputs.fdx.discard();
            let _ = outputs.fdt.discard();
        }
    }
}

/// Stored fields of the document a thread state is processing.
#[derive(Debug)]
pub struct StoredFieldsPerThread {
    writer: Arc<StoredFieldsWriter>,
    doc: Option<StoredFieldsDoc>,
}

impl StoredFieldsPerThread {
    pub fn start_document(&mut self) {
        self.doc = None;
    }

    pub fn add_field(&mut self, doc_state: &DocState, number: u32, value: &FieldValue) -> Result<()> {
        let doc = self.doc.get_or_insert_with(|| StoredFieldsDoc {
            writer: Arc::clone(&self.writer),
            doc_id: doc_state.doc_id,
            store_doc_id: doc_state.store_doc_id(),
            segment: doc_state.doc_store_segment.to_string(),
            num_fields: 0,
            buffer: PerDocBuffer::new(Arc::clone(&self.writer.arena)),
        });
        varint::write_u32(&mut doc.buffer, number)?;
        value.write_to(&mut doc.buffer)?;
        doc.num_fields += 1;
        Ok(())
    }

    pub fn finish_document(&mut self) -> Option<StoredFieldsDoc> {
        self.doc.take()
    }

    pub fn abort_document(&mut self) {
        self.doc = None;
    }
}

/// Stored fields of one finished document.
#[derive(Debug)]
pub struct StoredFieldsDoc {
    writer: Arc<StoredFieldsWriter>,
    doc_id: u32,
    store_doc_id: usize,
    segment: String,
    num_fields: usize,
    buffer: PerDocBuffer,
}

impl DocWriter for StoredFieldsDoc {
    fn doc_id(&self) -> u32 {
        self.doc_id
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let writer = Arc::clone(&self.writer);
        writer.finish_document(&self)
    }

    fn abort(self: Box<Self>) {}

    fn size_in_bytes(&self) -> usize {
        self.buffer.size_in_bytes()
    }
}

/// One document read back from a stored fields doc store.
pub type StoredDocument = Vec<(u32, FieldValue)>;

/// Reads every document of the doc store `segment`.
pub fn read_stored_fields(storage: &dyn Storage, segment: &str) -> Result<Vec<StoredDocument>> {
    let fdx_name = format!("{segment}.{FIELDS_INDEX_EXTENSION}");
    let fdt_name = format!("{segment}.{FIELDS_EXTENSION}");
    let num_docs = (storage.file_size(&fdx_name)?.saturating_sub(4) / 8) as usize;

    let mut bytes = Vec::new();
    storage.open_input(&fdt_name)?.read_to_end(&mut bytes)?;
    if bytes.len() < 4 {
        return Err(PennantError::index(format!("{fdt_name} is truncated")));
    }
    let (mut input, checksum) = bytes.split_at(bytes.len() - 4);
    if crc32fast::hash(input) != LittleEndian::read_u32(checksum) {
        return Err(PennantError::index(format!("checksum mismatch in {fdt_name}")));
    }

    let mut docs = Vec::with_capacity(num_docs);
    for _ in 0..num_docs {
        let count = varint::read_u64(&mut input)? as usize;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let number = varint::read_u32(&mut input)?;
            fields.push((number, FieldValue::read_from(&mut input)?));
        }
        docs.push(fields);
    }
    Ok(docs)
}
