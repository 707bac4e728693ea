//! Field-qualified terms.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A term: a field name and the text indexed under it.
///
/// Terms order by field and then by text, the order buffered delete terms
/// are replayed in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Term {
    pub field: String,
    pub text: String,
}

impl Term {
    pub fn new<F: Into<String>, T: Into<String>>(field: F, text: T) -> Self {
        Term {
            field: field.into(),
            text: text.into(),
        }
    }

    /// Approximate heap size of the term's strings.
    pub fn heap_size(&self) -> usize {
        self.field.len() + self.text.len()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.text)
    }
}
