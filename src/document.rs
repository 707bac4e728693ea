//! Documents handed to the buffering pipeline.
//!
//! A [`Document`] is an ordered list of [`Field`]s. Indexed fields carry an
//! externally produced token stream; stored fields carry a [`FieldValue`]
//! that goes to the doc store verbatim.
//!
//! # Examples
//!
//! ```
//! use pennant::document::Document;
//! use pennant::document::field_value::FieldValue;
//!
//! let doc = Document::builder()
//!     .add_text("title", "Rust Programming", true)
//!     .add_stored("year", FieldValue::Integer(2024))
//!     .build();
//!
//! assert_eq!(doc.len(), 2);
//! ```

pub mod field;
pub mod field_value;
pub mod term;
pub mod token;

pub use field::{Field, TermVectorMode};
pub use field_value::FieldValue;
pub use term::Term;
pub use token::{Token, TokenStream};

/// A document represents a single item to be indexed.
#[derive(Debug, Default)]
pub struct Document {
    fields: Vec<Field>,
}

impl Document {
    /// Create a new empty document.
    pub fn new() -> Self {
        Document { fields: Vec::new() }
    }

    /// Append a field instance.
    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut [Field] {
        &mut self.fields
    }

    pub fn into_fields(self) -> Vec<Field> {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Create a builder for constructing documents.
    pub fn builder() -> DocumentBuilder {
        DocumentBuilder::new()
    }
}

/// A builder for constructing documents in a fluent manner.
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    document: Document,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        DocumentBuilder {
            document: Document::new(),
        }
    }

    /// Add a whitespace-tokenized text field.
    pub fn add_text<S: Into<String>>(mut self, name: S, text: &str, store: bool) -> Self {
        self.document.add_field(Field::text(name, text, store));
        self
    }

    /// Add an indexed field with a caller-supplied token stream.
    pub fn add_tokens<S: Into<String>>(mut self, name: S, tokens: TokenStream) -> Self {
        self.document.add_field(Field::indexed(name, tokens));
        self
    }

    /// Add a stored-only field.
    pub fn add_stored<S: Into<String>>(mut self, name: S, value: FieldValue) -> Self {
        self.document.add_field(Field::stored(name, value));
        self
    }

    pub fn add_field(mut self, field: Field) -> Self {
        self.document.add_field(field);
        self
    }

    pub fn build(self) -> Document {
        self.document
    }
}
