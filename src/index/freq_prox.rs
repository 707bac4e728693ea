//! Frequency and position postings.
//!
//! Every term keeps two byte streams while buffered:
//!
//! - stream 0 holds one entry per completed document: `delta << 1 | 1` when
//!   the term occurred once, else `delta << 1` followed by the frequency.
//!   The current document is kept in the record and written when the term
//!   shows up in a later document.
//! - stream 1 holds one entry per occurrence: `pos_delta << 1`, or
//!   `pos_delta << 1 | 1` followed by the payload length and bytes.
//!
//! At flush the postings of a field from all thread states are merged in
//! term order and, within a term, in doc id order. The segment receives a
//! term dictionary (`.tis`), doc/frequency postings (`.frq`) and positions
//! (`.prx`).

use std::collections::BTreeMap;
use std::io::Read;

use crate::error::Result;
use crate::index::arena::byte_pool::ByteSliceReader;
use crate::index::arena::char_pool::CharBlockPool;
use crate::index::consumer::SegmentWriteState;
use crate::index::field_infos::FieldInfos;
use crate::index::postings_hash::Posting;
use crate::index::terms_hash::{HashPools, StreamWriter, TokenContext, TermsHashConsumer, TermsHashPerField};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageOutput};
use crate::util::utf16;
use crate::util::varint;

pub const TERMS_EXTENSION: &str = "tis";
pub const FREQ_EXTENSION: &str = "frq";
pub const PROX_EXTENSION: &str = "prx";

const FREQ_STREAM: usize = 0;
const PROX_STREAM: usize = 1;

/// Buffered state of one term in one field.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreqProxPosting {
    /// Occurrences in the current document.
    pub doc_freq: u32,
    /// Current document.
    pub last_doc_id: u32,
    /// Delta code of the current document, not yet in stream 0.
    pub last_doc_code: u32,
    /// Last position written for the current document.
    pub last_position: u32,
}

/// Postings consumer of one field.
#[derive(Debug, Default)]
pub struct FreqProxPerField {
    has_payloads: bool,
}

impl FreqProxPerField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_payloads(&self) -> bool {
        self.has_payloads
    }

    fn write_prox(
        &mut self,
        streams: &mut StreamWriter<'_>,
        data: &mut FreqProxPosting,
        prox_code: u32,
        token: &TokenContext<'_>,
    ) -> Result<()> {
        match token.payload {
            Some(payload) if !payload.is_empty() => {
                streams.write_vint(PROX_STREAM, (prox_code << 1) | 1)?;
                streams.write_vint(PROX_STREAM, payload.len() as u32)?;
                streams.write_bytes(PROX_STREAM, payload)?;
                self.has_payloads = true;
            }
            _ => streams.write_vint(PROX_STREAM, prox_code << 1)?,
        }
        data.last_position = token.position;
        Ok(())
    }
}

impl TermsHashConsumer for FreqProxPerField {
    type Data = FreqProxPosting;

    fn stream_count(&self) -> usize {
        2
    }

    fn new_term(
        &mut self,
        streams: &mut StreamWriter<'_>,
        data: &mut FreqProxPosting,
        token: &TokenContext<'_>,
    ) -> Result<()> {
        data.last_doc_id = token.doc_id;
        data.last_doc_code = token.doc_id << 1;
        data.doc_freq = 1;
        self.write_prox(streams, data, token.position, token)
    }

    fn add_term(
        &mut self,
        streams: &mut StreamWriter<'_>,
        data: &mut FreqProxPosting,
        token: &TokenContext<'_>,
    ) -> Result<()> {
        if token.doc_id != data.last_doc_id {
            if data.doc_freq == 1 {
                streams.write_vint(FREQ_STREAM, data.last_doc_code | 1)?;
            } else {
                streams.write_vint(FREQ_STREAM, data.last_doc_code)?;
                streams.write_vint(FREQ_STREAM, data.doc_freq)?;
            }
            data.doc_freq = 1;
            data.last_doc_code = (token.doc_id - data.last_doc_id) << 1;
            data.last_doc_id = token.doc_id;
            self.write_prox(streams, data, token.position, token)
        } else {
            data.doc_freq += 1;
            let delta = token.position - data.last_position;
            self.write_prox(streams, data, delta, token)
        }
    }
}

/// Read access to one thread state's postings of a field.
pub struct FreqProxFieldView<'a> {
    pub field: &'a TermsHashPerField<FreqProxPerField>,
    pub pools: &'a HashPools<FreqProxPosting>,
    pub chars: &'a CharBlockPool,
}

/// Walks the documents of one term in one thread state.
struct DocCursor<'a> {
    freq: ByteSliceReader<'a>,
    prox: ByteSliceReader<'a>,
    posting: &'a Posting<FreqProxPosting>,
    doc_id: u32,
    term_freq: u32,
    pending_last: bool,
}

impl<'a> DocCursor<'a> {
    fn new(view: &FreqProxFieldView<'a>, posting: &'a Posting<FreqProxPosting>) -> Self {
        DocCursor {
            freq: view.pools.reader(posting, FREQ_STREAM),
            prox: view.pools.reader(posting, PROX_STREAM),
            posting,
            doc_id: 0,
            term_freq: 0,
            pending_last: true,
        }
    }

    fn next_doc(&mut self) -> Result<bool> {
        if self.freq.eof() {
            if self.pending_last {
                self.pending_last = false;
                self.doc_id = self.posting.data.last_doc_id;
                self.term_freq = self.posting.data.doc_freq;
                return Ok(true);
            }
            return Ok(false);
        }
        let code = varint::read_u32(&mut self.freq)?;
        self.doc_id += code >> 1;
        self.term_freq = if code & 1 != 0 {
            1
        } else {
            varint::read_u32(&mut self.freq)?
        };
        Ok(true)
    }
}

type Output = StructWriter<Box<dyn StorageOutput>>;

/// Writes the postings files of one segment.
pub struct PostingsWriter {
    tis: Output,
    frq: Output,
    prx: Output,
}

impl PostingsWriter {
    pub fn create(state: &SegmentWriteState) -> Result<Self> {
        let storage = &state.storage;
        Ok(PostingsWriter {
            tis: StructWriter::new(storage.create_output(&state.segment_file_name(TERMS_EXTENSION))?),
            frq: StructWriter::new(storage.create_output(&state.segment_file_name(FREQ_EXTENSION))?),
            prx: StructWriter::new(storage.create_output(&state.segment_file_name(PROX_EXTENSION))?),
        })
    }

    /// Merges and writes every field, fields in name order.
    pub fn write_fields(
        mut self,
        fields: &BTreeMap<String, Vec<FreqProxFieldView<'_>>>,
        field_infos: &FieldInfos,
        state: &mut SegmentWriteState,
    ) -> Result<()> {
        let with_postings: Vec<_> = fields
            .iter()
            .filter(|(_, views)| views.iter().any(|v| v.field.num_postings() > 0))
            .collect();

        self.tis.write_varint(with_postings.len() as u64)?;
        for (name, views) in with_postings {
            let number = field_infos.number(name).unwrap_or_default();
            self.append_field(number, views)?;
            if views.iter().any(|v| v.field.consumer().has_payloads()) {
                field_infos.set_store_payloads(name);
            }
        }

        self.tis.close()?;
        self.frq.close()?;
        self.prx.close()?;
        for extension in [TERMS_EXTENSION, FREQ_EXTENSION, PROX_EXTENSION] {
            state.flushed_files.insert(state.segment_file_name(extension));
        }
        Ok(())
    }

    fn append_field(&mut self, number: u32, views: &[FreqProxFieldView<'_>]) -> Result<()> {
        let sorted: Vec<_> = views
            .iter()
            .map(|v| {
                v.field
                    .postings()
                    .sorted_ids(|a, b| v.chars.compare(a.text_start, b.text_start))
            })
            .collect();
        let mut upto = vec![0usize; views.len()];
        let mut terms = Vec::new();

        loop {
            let mut min_text: Option<&[u16]> = None;
            for (i, view) in views.iter().enumerate() {
                if let Some(&id) = sorted[i].get(upto[i]) {
                    let text = view.chars.text_at(view.field.postings().get(id).text_start);
                    if min_text.is_none_or(|min| text < min) {
                        min_text = Some(text);
                    }
                }
            }
            let Some(min_text) = min_text else {
                break;
            };

            let mut cursors = Vec::new();
            for (i, view) in views.iter().enumerate() {
                if let Some(&id) = sorted[i].get(upto[i]) {
                    let posting = view.field.postings().get(id);
                    if view.chars.text_at(posting.text_start) == min_text {
                        cursors.push(DocCursor::new(view, posting));
                        upto[i] += 1;
                    }
                }
            }

            let freq_pointer = self.frq.position();
            let prox_pointer = self.prx.position();
            let doc_freq = self.append_docs(cursors)?;
            terms.push((utf16::to_string(min_text), doc_freq, freq_pointer, prox_pointer));
        }

        self.tis.write_varint(number as u64)?;
        self.tis.write_varint(terms.len() as u64)?;
        for (text, doc_freq, freq_pointer, prox_pointer) in terms {
            self.tis.write_string(&text)?;
            self.tis.write_varint(doc_freq as u64)?;
            self.tis.write_varint(freq_pointer)?;
            self.tis.write_varint(prox_pointer)?;
        }
        Ok(())
    }

    fn append_docs(&mut self, cursors: Vec<DocCursor<'_>>) -> Result<u32> {
        let mut active = Vec::with_capacity(cursors.len());
        for mut cursor in cursors {
            if cursor.next_doc()? {
                active.push(cursor);
            }
        }

        let mut last_doc_id = 0;
        let mut doc_freq = 0;
        while !active.is_empty() {
            let mut min = 0;
            for i in 1..active.len() {
                if active[i].doc_id < active[min].doc_id {
                    min = i;
                }
            }
            let cursor = &mut active[min];

            let delta = cursor.doc_id - last_doc_id;
            if cursor.term_freq == 1 {
                self.frq.write_varint(((delta << 1) | 1) as u64)?;
            } else {
                self.frq.write_varint((delta << 1) as u64)?;
                self.frq.write_varint(cursor.term_freq as u64)?;
            }

            for _ in 0..cursor.term_freq {
                let code = varint::read_u32(&mut cursor.prox)?;
                self.prx.write_varint(code as u64)?;
                if code & 1 != 0 {
                    let len = varint::read_u32(&mut cursor.prox)? as usize;
                    let mut payload = vec![0u8; len];
                    cursor.prox.read_exact(&mut payload)?;
                    self.prx.write_varint(len as u64)?;
                    self.prx.write_raw(&payload)?;
                }
            }

            last_doc_id = cursor.doc_id;
            doc_freq += 1;
            if !cursor.next_doc()? {
                active.swap_remove(min);
            }
        }
        Ok(doc_freq)
    }
}

/// One term of a flushed segment, read back with [`read_postings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermPostings {
    pub field_number: u32,
    pub text: String,
    pub docs: Vec<DocPostings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocPostings {
    pub doc_id: u32,
    pub positions: Vec<u32>,
    /// Payload of each position; empty when none was recorded.
    pub payloads: Vec<Vec<u8>>,
}

/// Reads back the postings files of `segment`.
pub fn read_postings(storage: &dyn Storage, segment: &str) -> Result<Vec<TermPostings>> {
    let mut tis = StructReader::new(storage.open_input(&format!("{segment}.{TERMS_EXTENSION}"))?)?;
    let mut frq = StructReader::new(storage.open_input(&format!("{segment}.{FREQ_EXTENSION}"))?)?;
    let mut prx = StructReader::new(storage.open_input(&format!("{segment}.{PROX_EXTENSION}"))?)?;

    let mut terms = Vec::new();
    let field_count = tis.read_varint()?;
    for _ in 0..field_count {
        let field_number = tis.read_varint()? as u32;
        let term_count = tis.read_varint()?;
        for _ in 0..term_count {
            let text = tis.read_string()?;
            let doc_freq = tis.read_varint()?;
            let _freq_pointer = tis.read_varint()?;
            let _prox_pointer = tis.read_varint()?;

            let mut docs = Vec::with_capacity(doc_freq as usize);
            let mut doc_id = 0u32;
            for _ in 0..doc_freq {
                let code = frq.read_varint()? as u32;
                doc_id += code >> 1;
                let freq = if code & 1 != 0 {
                    1
                } else {
                    frq.read_varint()? as u32
                };

                let mut positions = Vec::with_capacity(freq as usize);
                let mut payloads = Vec::with_capacity(freq as usize);
                let mut position = 0u32;
                for _ in 0..freq {
                    let code = prx.read_varint()? as u32;
                    position += code >> 1;
                    positions.push(position);
                    if code & 1 != 0 {
                        payloads.push(prx.read_bytes()?);
                    } else {
                        payloads.push(Vec::new());
                    }
                }
                docs.push(DocPostings {
                    doc_id,
                    positions,
                    payloads,
                });
            }
            terms.push(TermPostings {
                field_number,
                text,
                docs,
            });
        }
    }
    Ok(terms)
}
