//! Error and Result types for fringe store operations.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for fringe operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The error type for store, codec, and protocol operations.
///
/// Expected absences (an evicted epoch, a minute with no data, an empty
/// query result) are expressed as `Option`/empty collections by the APIs
/// that produce them, never as a variant here.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record's presence-flag byte held something other than the
    /// expected marker or a space.
    #[error("invalid record flag for section {section}: byte {found:#04x}")]
    InvalidFlag {
        /// Marker the decoder was matching against ('R', 'P', 'X', '1', '2').
        section: char,
        /// Byte actually read.
        found: u8,
    },

    /// A record body ended before its declared length.
    #[error("truncated record: {context}")]
    TruncatedRecord {
        /// What the decoder was reading when the stream ran dry.
        context: &'static str,
    },

    /// A record declared an implausible length or section size.
    #[error("corrupt record length: {length}")]
    CorruptLength {
        /// The declared total length.
        length: i32,
    },

    /// Malformed client input on the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}
