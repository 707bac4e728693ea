//! Field numbering and per-field flags.

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::document::TermVectorMode;
use crate::error::{PennantError, Result};
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

pub const FIELD_INFOS_EXTENSION: &str = "fnm";

const IS_INDEXED: u8 = 0x1;
const STORE_TERM_VECTOR: u8 = 0x2;
const STORE_POSITIONS_WITH_TERM_VECTOR: u8 = 0x4;
const STORE_OFFSETS_WITH_TERM_VECTOR: u8 = 0x8;
const STORE_PAYLOADS: u8 = 0x10;

/// Flags of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub number: u32,
    pub indexed: bool,
    pub store_term_vectors: bool,
    pub store_positions_with_term_vectors: bool,
    pub store_offsets_with_term_vectors: bool,
    pub store_payloads: bool,
}

impl FieldInfo {
    fn bits(&self) -> u8 {
        let mut bits = 0;
        if self.indexed {
            bits |= IS_INDEXED;
        }
        if self.store_term_vectors {
            bits |= STORE_TERM_VECTOR;
        }
        if self.store_positions_with_term_vectors {
            bits |= STORE_POSITIONS_WITH_TERM_VECTOR;
        }
        if self.store_offsets_with_term_vectors {
            bits |= STORE_OFFSETS_WITH_TERM_VECTOR;
        }
        if self.store_payloads {
            bits |= STORE_PAYLOADS;
        }
        bits
    }

    /// Term vector mode implied by the flags.
    pub fn term_vector_mode(&self) -> TermVectorMode {
        match (
            self.store_term_vectors,
            self.store_positions_with_term_vectors,
            self.store_offsets_with_term_vectors,
        ) {
            (false, _, _) => TermVectorMode::No,
            (true, false, false) => TermVectorMode::Terms,
            (true, true, false) => TermVectorMode::WithPositions,
            (true, false, true) => TermVectorMode::WithOffsets,
            (true, true, true) => TermVectorMode::WithPositionsOffsets,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    by_number: Vec<FieldInfo>,
    by_name: AHashMap<String, u32>,
}

/// Field infos shared by all thread states of a writer. Numbers are
/// assigned in first-seen order and never change; flags only turn on.
#[derive(Debug, Default)]
pub struct FieldInfos {
    inner: RwLock<Inner>,
}

impl FieldInfos {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a field occurrence and returns the field's number.
    pub fn add(&self, name: &str, indexed: bool, term_vectors: TermVectorMode) -> u32 {
        {
            let inner = self.inner.read();
            if let Some(&number) = inner.by_name.get(name) {
                let current = &inner.by_number[number as usize];
                if (current.indexed || !indexed)
                    && (current.store_term_vectors || !term_vectors.is_stored())
                    && (current.store_positions_with_term_vectors || !term_vectors.with_positions())
                    && (current.store_offsets_with_term_vectors || !term_vectors.with_offsets())
                {
                    return number;
                }
            }
        }

        let mut inner = self.inner.write();
        let number = match inner.by_name.get(name).copied() {
            Some(number) => number,
            None => {
                let number = inner.by_number.len() as u32;
                inner.by_number.push(FieldInfo {
                    name: name.to_string(),
                    number,
                    indexed: false,
                    store_term_vectors: false,
                    store_positions_with_term_vectors: false,
                    store_offsets_with_term_vectors: false,
                    store_payloads: false,
                });
                inner.by_name.insert(name.to_string(), number);
                number
            }
        };
        let info = &mut inner.by_number[number as usize];
        info.indexed |= indexed;
        info.store_term_vectors |= term_vectors.is_stored();
        info.store_positions_with_term_vectors |= term_vectors.with_positions();
        info.store_offsets_with_term_vectors |= term_vectors.with_offsets();
        number
    }

    pub fn set_store_payloads(&self, name: &str) {
        let mut inner = self.inner.write();
        if let Some(number) = inner.by_name.get(name).copied() {
            inner.by_number[number as usize].store_payloads = true;
        }
    }

    pub fn number(&self, name: &str) -> Option<u32> {
        self.inner.read().by_name.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<FieldInfo> {
        let inner = self.inner.read();
        let number = inner.by_name.get(name)?;
        inner.by_number.get(*number as usize).cloned()
    }

    pub fn by_number(&self, number: u32) -> Option<FieldInfo> {
        self.inner.read().by_number.get(number as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_vectors(&self) -> bool {
        self.inner
            .read()
            .by_number
            .iter()
            .any(|info| info.store_term_vectors)
    }

    /// Writes the field infos file `name`.
    pub fn write(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let inner = self.inner.read();
        let mut writer = StructWriter::new(storage.create_output(name)?);
        writer.write_varint(inner.by_number.len() as u64)?;
        for info in &inner.by_number {
            writer.write_string(&info.name)?;
            writer.write_u8(info.bits())?;
        }
        writer.close()
    }

    /// Reads a field infos file written by [`write`](Self::write).
    pub fn read(storage: &dyn Storage, name: &str) -> Result<Self> {
        let mut reader = StructReader::new(storage.open_input(name)?)?;
        let count = reader.read_varint()? as usize;
        let mut inner = Inner::default();
        for number in 0..count {
            let name = reader.read_string()?;
            let bits = reader.read_u8()?;
            inner.by_name.insert(name.clone(), number as u32);
            inner.by_number.push(FieldInfo {
                name,
                number: number as u32,
                indexed: bits & IS_INDEXED != 0,
                store_term_vectors: bits & STORE_TERM_VECTOR != 0,
                store_positions_with_term_vectors: bits & STORE_POSITIONS_WITH_TERM_VECTOR != 0,
                store_offsets_with_term_vectors: bits & STORE_OFFSETS_WITH_TERM_VECTOR != 0,
                store_payloads: bits & STORE_PAYLOADS != 0,
            });
        }
        if !reader.verify_checksum()? {
            return Err(PennantError::index(format!("checksum mismatch in {name}")));
        }
        Ok(FieldInfos {
            inner: RwLock::new(inner),
        })
    }
}
