//! Pre-analyzed tokens.
//!
//! Tokenization happens outside this crate. Callers hand each indexed
//! field a [`TokenStream`] of [`Token`]s whose text is already in UTF-16
//! code units, the representation the char arena stores.
//!
//! ```
//! use pennant::document::token::Token;
//!
//! let token = Token::new("world").with_offsets(6, 11);
//! assert_eq!(token.text_string(), "world");
//! assert_eq!(token.position_increment, 1);
//! ```

use crate::error::Result;
use crate::util::utf16;

/// A single analyzed token.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Term text as UTF-16 code units.
    pub text: Vec<u16>,

    /// Distance from the previous token's position. Zero stacks this token
    /// on the previous one.
    pub position_increment: u32,

    /// Start character offset in the original field value.
    pub start_offset: u32,

    /// End character offset in the original field value.
    pub end_offset: u32,

    /// Optional payload stored with the position.
    pub payload: Option<Vec<u8>>,
}

impl Token {
    /// Create a token at the next position with no offsets.
    pub fn new(text: &str) -> Self {
        Token {
            text: text.encode_utf16().collect(),
            position_increment: 1,
            start_offset: 0,
            end_offset: 0,
            payload: None,
        }
    }

    /// Create a token from raw code units, which may be malformed UTF-16.
    pub fn from_units(text: Vec<u16>) -> Self {
        Token {
            text,
            position_increment: 1,
            start_offset: 0,
            end_offset: 0,
            payload: None,
        }
    }

    pub fn with_offsets(mut self, start: u32, end: u32) -> Self {
        self.start_offset = start;
        self.end_offset = end;
        self
    }

    pub fn with_position_increment(mut self, increment: u32) -> Self {
        self.position_increment = increment;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Decode the token text.
    pub fn text_string(&self) -> String {
        utf16::to_string(&self.text)
    }
}

/// A fallible stream of tokens for one field instance.
///
/// An `Err` item fails only the document being processed.
pub type TokenStream = Box<dyn Iterator<Item = Result<Token>> + Send>;

/// Wrap already-built tokens into a stream.
pub fn stream_of(tokens: Vec<Token>) -> TokenStream {
    Box::new(tokens.into_iter().map(Ok))
}

/// Split `text` on whitespace into tokens carrying character offsets.
///
/// A convenience for callers and tests that do not need real analysis.
pub fn whitespace_tokens(text: &str) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for offset in 0..=chars.len() {
        let at_break = offset == chars.len() || chars[offset].is_whitespace();
        match (start, at_break) {
            (Some(s), true) => {
                let word: String = chars[s..offset].iter().collect();
                tokens.push(Token::new(&word).with_offsets(s as u32, offset as u32));
                start = None;
            }
            (None, false) => start = Some(offset),
            _ => {}
        }
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_builders() {
        let token = Token::new("a")
            .with_offsets(2, 3)
            .with_position_increment(0)
            .with_payload(vec![9]);

        assert_eq!(token.text, vec![0x61]);
        assert_eq!(token.start_offset, 2);
        assert_eq!(token.end_offset, 3);
        assert_eq!(token.position_increment, 0);
        assert_eq!(token.payload, Some(vec![9]));
    }

    #[test]
    fn test_whitespace_tokens_offsets() {
        let tokens = whitespace_tokens("  quick  brown fox");
        let texts: Vec<String> = tokens.iter().map(|t| t.text_string()).collect();
        assert_eq!(texts, vec!["quick", "brown", "fox"]);
        assert_eq!((tokens[0].start_offset, tokens[0].end_offset), (2, 7));
        assert_eq!((tokens[1].start_offset, tokens[1].end_offset), (9, 14));
        assert_eq!((tokens[2].start_offset, tokens[2].end_offset), (15, 18));
    }

    #[test]
    fn test_stream_of_yields_all() {
        let stream = stream_of(whitespace_tokens("a b"));
        assert_eq!(stream.filter_map(|t| t.ok()).count(), 2);
    }
}
