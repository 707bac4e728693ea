//! Stored field values.
//!
//! A [`FieldValue`] is what a document keeps verbatim in the doc store,
//! independently of the tokens it contributes to the inverted index.
//!
//! ```
//! use pennant::document::field_value::FieldValue;
//!
//! let text = FieldValue::from("Rust Programming");
//! assert_eq!(text.as_text(), Some("Rust Programming"));
//!
//! let active = FieldValue::Boolean(true);
//! assert_eq!(active.as_boolean(), Some(true));
//! ```

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{PennantError, Result};
use crate::util::varint;

const TAG_TEXT: u8 = 0;
const TAG_INTEGER: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_BOOLEAN: u8 = 3;
const TAG_BINARY: u8 = 4;
const TAG_NULL: u8 = 7;

/// Represents a value stored for a field in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Text value
    Text(String),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// Binary data
    Binary(Vec<u8>),
    /// Null value
    Null,
}

impl FieldValue {
    /// Convert to text if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Convert to boolean.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            FieldValue::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Get the value as binary data, if possible.
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Binary(data) => Some(data),
            _ => None,
        }
    }

    /// Serialize the value with a leading type tag.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        match self {
            FieldValue::Text(text) => {
                out.write_u8(TAG_TEXT)?;
                varint::write_u32(out, text.len() as u32)?;
                out.write_all(text.as_bytes())?;
            }
            FieldValue::Integer(num) => {
                out.write_u8(TAG_INTEGER)?;
                out.write_u64::<LittleEndian>(*num as u64)?;
            }
            FieldValue::Float(num) => {
                out.write_u8(TAG_FLOAT)?;
                out.write_f64::<LittleEndian>(*num)?;
            }
            FieldValue::Boolean(b) => {
                out.write_u8(TAG_BOOLEAN)?;
                out.write_u8(u8::from(*b))?;
            }
            FieldValue::Binary(bytes) => {
                out.write_u8(TAG_BINARY)?;
                varint::write_u32(out, bytes.len() as u32)?;
                out.write_all(bytes)?;
            }
            FieldValue::Null => out.write_u8(TAG_NULL)?,
        }
        Ok(())
    }

    /// Deserialize a value written by [`FieldValue::write_to`].
    pub fn read_from<R: Read>(input: &mut R) -> Result<Self> {
        let value = match input.read_u8()? {
            TAG_TEXT => {
                let len = varint::read_u32(input)? as usize;
                let mut bytes = vec![0u8; len];
                input.read_exact(&mut bytes)?;
                let text = String::from_utf8(bytes)
                    .map_err(|e| PennantError::storage(format!("Invalid UTF-8: {e}")))?;
                FieldValue::Text(text)
            }
            TAG_INTEGER => FieldValue::Integer(input.read_u64::<LittleEndian>()? as i64),
            TAG_FLOAT => FieldValue::Float(input.read_f64::<LittleEndian>()?),
            TAG_BOOLEAN => FieldValue::Boolean(input.read_u8()? != 0),
            TAG_BINARY => {
                let len = varint::read_u32(input)? as usize;
                let mut bytes = vec![0u8; len];
                input.read_exact(&mut bytes)?;
                FieldValue::Binary(bytes)
            }
            TAG_NULL => FieldValue::Null,
            tag => {
                return Err(PennantError::storage(format!(
                    "Unknown stored value type tag: {tag}"
                )));
            }
        };
        Ok(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}
