//! The parsed top-level result and its entry points: [`Gbx::parse_file`], [`Gbx::parse_reader`],
//! [`Gbx::parse_slice`]/[`Gbx::parse_bytes`], and the `_with_options` variants.

use crate::body::{self, BodyEntities, BodyReader};
use crate::entities::Entity;
use crate::error::ParseResult;
use crate::header::{self, RootEntities};
use crate::options::ParseOptions;
use crate::reader::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

/// The parsed form of a GBX file: a tree of typed entities plus the marks and raw body needed by
/// the accessors in §6.
///
/// Constructed only by the `parse_*` functions; once parsing returns, entities are read-only
/// (§3, "Lifecycle... immutable at end-of-parse").
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Gbx {
    class_id: u32,
    root_entities: RootEntities,
    body_entities: BodyEntities,
    /// The decompressed body, kept around for [`Gbx::find_raw_chunk_id`].
    body: Vec<u8>,
    marks: HashMap<String, (u64, u64)>,
}

impl Gbx {
    /// Parse a GBX file at `path`, using default [`ParseOptions`].
    pub fn parse_file<P>(path: P) -> ParseResult<Self>
    where
        P: AsRef<Path>,
    {
        Self::parse_file_with_options(path, ParseOptions::default())
    }

    /// Parse a GBX file at `path`, with custom [`ParseOptions`].
    pub fn parse_file_with_options<P>(path: P, options: ParseOptions) -> ParseResult<Self>
    where
        P: AsRef<Path>,
    {
        let file = File::open(path)?;
        Self::parse_reader_with_options(BufReader::new(file), options)
    }

    /// Parse a GBX stream, using default [`ParseOptions`].
    ///
    /// The stream, if it owns a file handle, is dropped (and thus closed) as soon as this
    /// function returns on every exit path — ordinary Rust `Drop`/RAII, no explicit `close()`
    /// required (§5).
    pub fn parse_reader<R>(reader: R) -> ParseResult<Self>
    where
        R: Read,
    {
        Self::parse_reader_with_options(reader, ParseOptions::default())
    }

    /// Parse a GBX stream, with custom [`ParseOptions`].
    pub fn parse_reader_with_options<R>(reader: R, options: ParseOptions) -> ParseResult<Self>
    where
        R: Read,
    {
        let mut outer = Reader::new(reader);
        let header::HeaderOutcome {
            class_id,
            root_entities,
            mut ctx,
            body,
        } = header::scan(&mut outer)?;

        let mut body_entities: BodyEntities = BodyEntities::new();
        let mut body_reader: BodyReader = Reader::new(Cursor::new(body.clone()));
        body::read_body(
            &mut body_reader,
            class_id,
            -1,
            &mut body_entities,
            &mut ctx,
            &options,
        )?;

        Ok(Self {
            class_id,
            root_entities,
            body_entities,
            body,
            marks: ctx.marks().clone(),
        })
    }

    /// Parse an in-memory byte slice, using default [`ParseOptions`].
    pub fn parse_slice(bytes: &[u8]) -> ParseResult<Self> {
        Self::parse_slice_with_options(bytes, ParseOptions::default())
    }

    /// Parse an in-memory byte slice, with custom [`ParseOptions`].
    pub fn parse_slice_with_options(bytes: &[u8], options: ParseOptions) -> ParseResult<Self> {
        Self::parse_reader_with_options(Cursor::new(bytes), options)
    }

    /// Parse an owned byte buffer, using default [`ParseOptions`].
    pub fn parse_bytes(bytes: Vec<u8>) -> ParseResult<Self> {
        Self::parse_slice(&bytes)
    }

    /// The root node's wire class id.
    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    /// Look up the first entity — header entities before body entities, body entities in
    /// ascending node-index order — whose class id matches.
    pub fn get_class_by_id(&self, class_id: impl Into<u32>) -> Option<&Entity> {
        let class_id = class_id.into();
        self.get_classes_by_ids(&[class_id]).into_iter().next()
    }

    /// Every entity (header or body) whose class id is in `class_ids`, header entities first,
    /// then body entities by ascending depth (§6).
    pub fn get_classes_by_ids(&self, class_ids: &[u32]) -> Vec<&Entity> {
        let mut result = Vec::new();

        for entity in self.root_entities.values() {
            if class_ids.contains(&entity.class_id()) {
                result.push(entity);
            }
        }

        for entity in self.body_entities.values() {
            if class_ids.contains(&entity.class_id()) {
                result.push(entity);
            }
        }

        result
    }

    /// Linear search over the decompressed body for the first occurrence of `chunk_id`, returning
    /// a reader positioned immediately after it.
    ///
    /// There is no guarantee that the match is a true chunk boundary — a `chunk_id` that happens
    /// to appear inside another field's bytes matches just as readily (§6).
    pub fn find_raw_chunk_id(&self, chunk_id: u32) -> Option<Reader<Cursor<&[u8]>>> {
        let needle = chunk_id.to_le_bytes();
        let at = self.body.windows(4).position(|w| w == needle)?;

        let mut reader = Reader::new(Cursor::new(self.body.as_slice()));
        reader.skip((at + 4) as u64).ok()?;
        Some(reader)
    }

    /// A named position mark, `(offset, length)`, published during parsing.
    ///
    /// Well-known keys include `"map_name"`, `"mood"`, `"track_name"`, `"block_data"`,
    /// `"data_size"`, `"user_data_size"`, and one per user-data chunk id (as decimal).
    pub fn position(&self, key: &str) -> Option<(u64, u64)> {
        self.marks.get(key).copied()
    }
}
