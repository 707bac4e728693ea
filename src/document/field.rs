//! Document fields.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::field_value::FieldValue;
use crate::document::token::{TokenStream, stream_of, whitespace_tokens};

/// How much term vector data a field records per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TermVectorMode {
    #[default]
    No,
    Terms,
    WithPositions,
    WithOffsets,
    WithPositionsOffsets,
}

impl TermVectorMode {
    pub fn is_stored(self) -> bool {
        self != TermVectorMode::No
    }

    pub fn with_positions(self) -> bool {
        matches!(
            self,
            TermVectorMode::WithPositions | TermVectorMode::WithPositionsOffsets
        )
    }

    pub fn with_offsets(self) -> bool {
        matches!(
            self,
            TermVectorMode::WithOffsets | TermVectorMode::WithPositionsOffsets
        )
    }

    /// The smallest mode recording everything either mode records.
    pub fn union(self, other: TermVectorMode) -> TermVectorMode {
        let positions = self.with_positions() || other.with_positions();
        let offsets = self.with_offsets() || other.with_offsets();
        match (self.is_stored() || other.is_stored(), positions, offsets) {
            (false, _, _) => TermVectorMode::No,
            (true, false, false) => TermVectorMode::Terms,
            (true, true, false) => TermVectorMode::WithPositions,
            (true, false, true) => TermVectorMode::WithOffsets,
            (true, true, true) => TermVectorMode::WithPositionsOffsets,
        }
    }
}

/// One field instance of a document.
///
/// A field is indexed when it carries a token stream and stored when it
/// carries a value. Several instances may share a name.
pub struct Field {
    name: String,
    stored: Option<FieldValue>,
    tokens: Option<TokenStream>,
    term_vectors: TermVectorMode,
}

impl Field {
    /// An indexed, unstored field.
    pub fn indexed<S: Into<String>>(name: S, tokens: TokenStream) -> Self {
        Field {
            name: name.into(),
            stored: None,
            tokens: Some(tokens),
            term_vectors: TermVectorMode::No,
        }
    }

    /// A stored, unindexed field.
    pub fn stored<S: Into<String>>(name: S, value: FieldValue) -> Self {
        Field {
            name: name.into(),
            stored: Some(value),
            tokens: None,
            term_vectors: TermVectorMode::No,
        }
    }

    /// A text field indexed by splitting on whitespace, optionally stored.
    pub fn text<S: Into<String>>(name: S, text: &str, store: bool) -> Self {
        let mut field = Field::indexed(name, stream_of(whitespace_tokens(text)));
        if store {
            field.stored = Some(FieldValue::from(text));
        }
        field
    }

    pub fn with_stored(mut self, value: FieldValue) -> Self {
        self.stored = Some(value);
        self
    }

    pub fn with_term_vectors(mut self, mode: TermVectorMode) -> Self {
        self.term_vectors = mode;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stored_value(&self) -> Option<&FieldValue> {
        self.stored.as_ref()
    }

    pub fn is_indexed(&self) -> bool {
        self.tokens.is_some()
    }

    pub fn term_vectors(&self) -> TermVectorMode {
        self.term_vectors
    }

    /// Take the token stream out of the field. Each stream is consumed once.
    pub fn take_tokens(&mut self) -> Option<TokenStream> {
        self.tokens.take()
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("stored", &self.stored)
            .field("indexed", &self.tokens.is_some())
            .field("term_vectors", &self.term_vectors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_field() {
        let mut field = Field::text("body", "hello world", true);
        assert_eq!(field.name(), "body");
        assert!(field.is_indexed());
        assert_eq!(field.stored_value(), Some(&FieldValue::from("hello world")));

        let tokens = field.take_tokens().unwrap();
        assert_eq!(tokens.count(), 2);
        assert!(!field.is_indexed());
    }

    #[test]
    fn test_term_vector_modes() {
        assert!(!TermVectorMode::No.is_stored());
        assert!(TermVectorMode::Terms.is_stored());
        assert!(!TermVectorMode::Terms.with_positions());
        assert!(TermVectorMode::WithPositionsOffsets.with_positions());
        assert!(TermVectorMode::WithPositionsOffsets.with_offsets());
        assert!(!TermVectorMode::WithPositions.with_offsets());
    }
}
