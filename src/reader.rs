//! The positioned byte cursor used to decode the GBX wire format (component A).

use crate::error::{ParseError, ParseResult};
use crate::types::Vec3;
use std::io::{Read, Seek, SeekFrom};
use std::mem::size_of;

/// A `(start, length)` region of a byte stream, published under a well-known key so callers can
/// locate and rewrite it in place (e.g. `"map_name"`, `"block_data"`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Mark {
    /// Offset of the region, in bytes, from the start of the stream the mark was taken over.
    pub start: u64,
    /// Length of the region, in bytes.
    pub len: u64,
}

/// Well-known lookback string ids that never consume a fresh string from the wire.
fn well_known_lookback(code: u32) -> Option<&'static str> {
    match code {
        11 => Some("Valley"),
        12 => Some("Canyon"),
        13 => Some("Lagoon"),
        17 => Some("TMCommon"),
        202 => Some("Storm"),
        299 => Some("SMCommon"),
        10003 => Some("Common"),
        _ => None,
    }
}

/// A positioned cursor over a byte source, decoding GBX primitives.
///
/// A `Reader` carries its own lookback-string dictionary and position-mark register — two
/// parse states that the wire format ties to a single physical cursor rather than to a logical
/// node, which is why a fresh `Reader` is constructed whenever the source changes (the
/// decompressed body, a nested embedded track, a ghost sample block, ...).
pub struct Reader<R> {
    inner: R,
    pos: u64,
    seen_lookback: bool,
    stored_strings: Vec<String>,
    mark: Option<u64>,
}

impl<R> Reader<R> {
    /// Construct a reader over `inner`, starting at position 0.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pos: 0,
            seen_lookback: false,
            stored_strings: vec![],
            mark: None,
        }
    }

    /// Current logical position of the cursor.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Begin a region that can later be closed with [`pop_mark`](Self::pop_mark).
    ///
    /// At most one mark is active at a time; starting a new one discards any mark in progress.
    pub fn push_mark(&mut self) {
        self.mark = Some(self.pos);
    }

    /// Close the region started with [`push_mark`](Self::push_mark), returning its extent.
    ///
    /// Returns `None` if no mark was active.
    pub fn pop_mark(&mut self) -> Option<Mark> {
        let start = self.mark.take()?;
        Some(Mark {
            start,
            len: self.pos - start,
        })
    }
}

impl<R> Reader<R>
where
    R: Clone,
{
    /// Fork a reader over a clone of the same underlying source, positioned at the current
    /// cursor, with its own independent lookback-string dictionary and no mark in progress.
    ///
    /// Mirrors the reference implementation's `item_bp = ByteReader(bp.data); item_bp.pos =
    /// bp.pos` pattern (the item-list chunk, §4.E): some chunks are read through a reader that
    /// starts its lookback dictionary fresh rather than inheriting the caller's, even though both
    /// readers share the same bytes.
    pub fn fork(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            pos: self.pos,
            seen_lookback: false,
            stored_strings: vec![],
            mark: None,
        }
    }
}

macro_rules! impl_read_num {
    ($($ty:ident),+) => {
        $(
            #[doc = concat!("Read a little-endian `", stringify!($ty), "`.")]
            pub fn $ty(&mut self) -> ParseResult<$ty> {
                let mut buf = [0; size_of::<$ty>()];
                self.inner.read_exact(&mut buf)?;
                self.pos += size_of::<$ty>() as u64;
                Ok($ty::from_le_bytes(buf))
            }
        )+
    };
}

impl<R> Reader<R>
where
    R: Read,
{
    impl_read_num!(u8, u16, u32, i8, i16, i32, f32);

    /// Read `n` raw bytes.
    pub fn bytes(&mut self, n: usize) -> ParseResult<Vec<u8>> {
        let mut buf = vec![0; n];
        self.inner.read_exact(&mut buf)?;
        self.pos += n as u64;
        Ok(buf)
    }

    /// Read a length-prefixed UTF-8 string (`u32 length || bytes`).
    ///
    /// Invalid UTF-8 is not a fatal error: it is recorded as an absent value, matching the
    /// reference implementation's "log and return `None`" behavior for corrupt strings.
    pub fn string(&mut self) -> ParseResult<Option<String>> {
        let len = self.u32()?;
        let bytes = self.bytes(len as usize)?;
        match String::from_utf8(bytes) {
            Ok(s) => Ok(Some(s)),
            Err(err) => {
                tracing::warn!(error = %err, "invalid utf-8 in length-prefixed string");
                Ok(None)
            }
        }
    }

    /// Read a 3-component `f32` vector.
    pub fn vec3_f32(&mut self) -> ParseResult<Vec3<f32>> {
        Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    /// Read a 3-component `u8` vector.
    pub fn vec3_u8(&mut self) -> ParseResult<Vec3<u8>> {
        Ok(Vec3::new(self.u8()?, self.u8()?, self.u8()?))
    }

    /// Read a lookback string (§4.A).
    ///
    /// On the first call for this reader, consumes a `u32` version prefix. Every subsequently
    /// introduced string is appended to the dictionary and addressable by later back-references;
    /// reading an existing entry never mutates the dictionary.
    pub fn lookback_string(&mut self) -> ParseResult<String> {
        if !self.seen_lookback {
            self.u32()?;
            self.seen_lookback = true;
        }

        let code = self.u32()?;

        if (code & 0xC000_0000) != 0 && (code & 0x3FFF_FFFF) == 0 {
            let s = self.string()?.unwrap_or_default();
            self.stored_strings.push(s.clone());
            return Ok(s);
        }

        if code == 0 {
            let s = self.string()?.unwrap_or_default();
            self.stored_strings.push(s.clone());
            return Ok(s);
        }

        if code == 0xFFFF_FFFF {
            return Ok(String::new());
        }

        if (code & 0x3FFF_FFFF) == code {
            if let Some(s) = well_known_lookback(code) {
                return Ok(s.to_string());
            }
        }

        let index = (code & 0x3FFF_FFFF).wrapping_sub(1) as usize;
        Ok(self
            .stored_strings
            .get(index)
            .cloned()
            .unwrap_or_default())
    }
}

impl<R> Reader<R>
where
    R: Seek,
{
    /// Skip `n` bytes without reading them.
    pub fn skip(&mut self, n: u64) -> ParseResult<()> {
        self.inner.seek(SeekFrom::Current(n as i64))?;
        self.pos += n;
        Ok(())
    }

    /// Force the cursor to an absolute position.
    ///
    /// Used to resynchronize after reading a region whose declared size is authoritative over
    /// what the handler actually consumed (e.g. the user-data section, or the item-list chunk).
    pub fn seek_to(&mut self, pos: u64) -> ParseResult<()> {
        self.inner.seek(SeekFrom::Start(pos))?;
        self.pos = pos;
        Ok(())
    }
}

impl<R> Reader<R>
where
    R: Read + Seek,
{
    /// Peek the next `u32` without consuming it.
    pub fn peek_u32(&mut self) -> ParseResult<u32> {
        let value = self.u32()?;
        self.rewind(4)?;
        Ok(value)
    }

    /// Rewind the cursor by `n` bytes.
    pub fn rewind(&mut self, n: u64) -> ParseResult<()> {
        self.inner.seek(SeekFrom::Current(-(n as i64)))?;
        self.pos -= n;
        Ok(())
    }

    /// Run `f`, rolling back the cursor and the lookback dictionary to their pre-call state if
    /// it returns `Err`.
    ///
    /// Models the source's `pos = saved_pos` try/except rollback (the tentative TM2 login read
    /// in chunk `0x0309200E`) as an explicit transaction instead of exception-driven control
    /// flow.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<T> {
        let saved_pos = self.pos;
        let saved_strings = self.stored_strings.len();

        match f(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.seek_to(saved_pos)?;
                self.stored_strings.truncate(saved_strings);
                Err(err)
            }
        }
    }
}
