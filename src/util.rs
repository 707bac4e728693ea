//! Shared utilities used across Pennant components.

pub mod array;
pub mod utf16;
pub mod varint;
