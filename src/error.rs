//! Error handling types.

use std::io;
use std::result;

/// Error produced while parsing a GBX file.
///
/// Only the kinds that force the parser to give up entirely reach the caller. Recoverable
/// problems — an unknown chunk, a malformed UTF-8 string, a failed embedded-track parse — are
/// logged through [`tracing`] and the parser keeps going, producing a partial but
/// self-consistent [`Gbx`](crate::Gbx).
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The first three bytes of the file were not `"GBX"`.
    #[error("bad magic: not a GBX file")]
    InvalidMagic,
    /// LZO or zlib decompression failed, or produced a buffer of the wrong size.
    #[error("decompression failed: {0}")]
    Decompression(String),
    /// A read would exceed a declared region, or recursion exceeded
    /// [`ParseOptions::max_node_depth`](crate::ParseOptions::max_node_depth).
    #[error("framing error: {0}")]
    Framing(String),
    /// The underlying stream reported an I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias for fallible parse operations.
pub type ParseResult<T> = result::Result<T, ParseError>;
