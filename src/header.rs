//! The header scanner (component C): magic/version, external-node references, and the pre-body
//! user-data chunks, ending with the LZO-compressed body handed back for the chunk loop (D).

use crate::context::{ParseContext, ReplayHeaderInfo};
use crate::entities::{Common, Entity};
use crate::error::{ParseError, ParseResult};
use crate::reader::Reader;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};

/// Root-level entities recovered from the user-data header, keyed by the chunk id that produced
/// them (§3, "one for root-level entities recovered from the user-data header").
pub type RootEntities = BTreeMap<u32, Entity>;

/// Everything the header scanner hands off to the body chunk loop.
pub struct HeaderOutcome {
    /// The root node's class id (raw wire value; may not resolve to a known [`ClassId`]).
    ///
    /// [`ClassId`]: crate::class_id::ClassId
    pub class_id: u32,
    pub root_entities: RootEntities,
    pub ctx: ParseContext,
    /// The LZO-decompressed body, ready for the chunk loop.
    pub body: Vec<u8>,
}

/// Read the header and decompress the body, following §4.C in order.
pub fn scan<R>(reader: &mut Reader<R>) -> ParseResult<HeaderOutcome>
where
    R: Read,
{
    if reader.bytes(3)? != b"GBX" {
        return Err(ParseError::InvalidMagic);
    }

    let version = reader.u16()?;
    // Format byte, ref-table compression byte, body compression byte: the wire format always
    // carries these, but this crate treats the body as opaque-LZO regardless of what they say
    // (§1, LZO1X decompressor is an out-of-scope collaborator invoked unconditionally).
    reader.bytes(3)?;
    if version >= 4 {
        reader.bytes(1)?;
    }

    let mut class_id = 0u32;
    if version >= 3 {
        class_id = reader.u32()?;
    }

    let mut ctx = ParseContext::new();
    let mut root_entities = RootEntities::new();

    if version >= 6 {
        read_user_data_section(reader, &mut ctx, &mut root_entities)?;
        reader.u32()?; // num_nodes: not otherwise consulted, the body loop discovers nodes as it goes.
    }

    let num_external_nodes = reader.u32()?;
    if num_external_nodes > 0 {
        reader.bytes(4)?; // ancestor level
        read_subfolder(reader)?;

        for _ in 0..num_external_nodes {
            let flags = reader.u32()?;
            if flags & 4 == 0 {
                reader.string()?;
            } else {
                reader.bytes(4)?;
            }
            reader.bytes(4)?;
            if version >= 5 {
                reader.bytes(4)?;
            }
            if flags & 4 == 0 {
                reader.bytes(4)?;
            }
        }
    }

    reader.push_mark();
    let uncompressed_size = reader.u32()?;
    let compressed_size = reader.u32()?;
    let compressed = reader.bytes(compressed_size as usize)?;
    if let Some(mark) = reader.pop_mark() {
        ctx.publish_mark("data_size", mark.start, mark.len);
    }

    let body = crate::decompress::lzo_decompress(&compressed, uncompressed_size as usize)?;

    Ok(HeaderOutcome {
        class_id,
        root_entities,
        ctx,
        body,
    })
}

/// `(u32 count, N × (string, recurse))` — the external-node sub-folder tree (§4.C step 5).
fn read_subfolder<R>(reader: &mut Reader<R>) -> ParseResult<()>
where
    R: Read,
{
    let count = reader.u32()?;
    for _ in 0..count {
        reader.string()?;
        read_subfolder(reader)?;
    }
    Ok(())
}

/// `(u32 user_data_size, u32 num_chunks, num_chunks × (u32 chunk_id, u32 chunk_size))` followed
/// by the chunk payloads, each handled independently and tolerant to its own end-of-buffer.
fn read_user_data_section<R>(
    reader: &mut Reader<R>,
    ctx: &mut ParseContext,
    root_entities: &mut RootEntities,
) -> ParseResult<()>
where
    R: Read,
{
    let section_start = reader.pos();
    let user_data_size = reader.u32()?;
    let user_data_start = reader.pos();

    let num_chunks = reader.u32()?;
    let mut chunk_defs = Vec::with_capacity(num_chunks as usize);
    for _ in 0..num_chunks {
        let chunk_id = reader.u32()?;
        reader.push_mark();
        let chunk_size = reader.u32()?;
        // The mark brackets the 4-byte size field itself, matching the reference parser's
        // push_info/pop_info around its read_uint32(), not the variable-length payload that
        // follows it.
        if let Some(mark) = reader.pop_mark() {
            ctx.publish_mark(chunk_id.to_string(), mark.start, mark.len);
        }
        chunk_defs.push((chunk_id, chunk_size));
    }

    for (chunk_id, chunk_size) in chunk_defs {
        let payload_start = reader.pos();
        let payload = reader.bytes(chunk_size as usize)?;

        let mut chunk_reader = Reader::new(Cursor::new(payload));
        if let Err(err) =
            dispatch_header_chunk(chunk_id, &mut chunk_reader, ctx, root_entities, payload_start)
        {
            tracing::warn!(
                chunk_id = format_args!("{chunk_id:#010x}"),
                error = %err,
                "error reading user-data chunk, skipping remainder"
            );
        }
    }

    let forced_pos = user_data_start + user_data_size as u64;
    let pos = reader.pos();
    if forced_pos > pos {
        reader.bytes((forced_pos - pos) as usize)?;
    } else if forced_pos < pos {
        tracing::warn!(
            declared = user_data_size,
            "user-data chunks overran their declared section size"
        );
    }
    ctx.publish_mark("user_data_size", section_start, forced_pos - section_start);

    Ok(())
}

/// Dispatch one user-data chunk payload to its handler (§4.C, "Header-entry handlers of
/// record"). Unrecognized ids are a no-op: the outer loop already bounded the read to exactly
/// `chunk_size` bytes, so there is nothing left to skip.
fn dispatch_header_chunk(
    chunk_id: u32,
    r: &mut Reader<Cursor<Vec<u8>>>,
    ctx: &mut ParseContext,
    root_entities: &mut RootEntities,
    payload_start: u64,
) -> ParseResult<()> {
    match chunk_id {
        0x0304_3002 | 0x2400_3002 => h_challenge_params(r),
        0x0304_3003 | 0x2400_3003 => h_track_name(r, ctx, root_entities, payload_start, chunk_id),
        0x0304_3005 | 0x2400_3005 => h_community(r, ctx),
        0x0309_3000 | 0x2403_F000 => h_replay_header(r, ctx),
        0x0309_3002 | 0x2403_F002 => h_replay_four_strings(r),
        _ => Ok(()),
    }
}

/// `0x03043002`/`0x24003002`: versioned challenge parameters. Consumed for its byte-shape only —
/// nothing from this chunk is retained (see `DESIGN.md` for the version-ladder resolution).
fn h_challenge_params(r: &mut Reader<Cursor<Vec<u8>>>) -> ParseResult<()> {
    let version = r.u8()?;
    if version < 3 {
        r.lookback_string()?;
        r.lookback_string()?;
        r.lookback_string()?;
        r.string()?;
    }
    r.bytes(4)?;
    if version >= 1 {
        r.bytes(16)?;
    }
    if version == 2 {
        r.bytes(4)?;
    }
    if version >= 4 {
        r.bytes(4)?;
    }
    if version >= 5 {
        r.bytes(4)?;
    }
    if version == 6 {
        r.bytes(4)?;
    }
    if version >= 7 {
        r.u32()?;
    }
    if version >= 9 {
        r.bytes(4)?;
    }
    if version >= 10 {
        r.bytes(4)?;
    }
    if version >= 11 {
        r.bytes(4)?;
    }
    if version >= 12 {
        r.bytes(4)?;
    }
    if version >= 13 {
        r.bytes(8)?;
    }
    Ok(())
}

/// `0x03043003`/`0x24003003`: stores `track_name` on a fresh [`Common`] entity keyed by the
/// chunk id, and publishes the `"track_name"` mark over the outer byte stream.
fn h_track_name(
    r: &mut Reader<Cursor<Vec<u8>>>,
    ctx: &mut ParseContext,
    root_entities: &mut RootEntities,
    payload_start: u64,
    chunk_id: u32,
) -> ParseResult<()> {
    r.bytes(1)?;
    r.lookback_string()?;
    r.lookback_string()?;
    r.lookback_string()?;

    let name_start = r.pos();
    let track_name = r.string()?;
    ctx.publish_mark("track_name", payload_start + name_start, r.pos() - name_start);

    r.bytes(1)?;

    root_entities.insert(
        chunk_id,
        Entity::Common(Common {
            class_id: chunk_id,
            track_name,
        }),
    );

    Ok(())
}

/// `0x03043005`/`0x24003005`: community string, attached to the `Challenge` entity once the body
/// loop constructs it (§9, "Parser-local side channels").
fn h_community(r: &mut Reader<Cursor<Vec<u8>>>, ctx: &mut ParseContext) -> ParseResult<()> {
    ctx.community = r.string()?;
    Ok(())
}

/// `0x03093000`/`0x2403F000`: replay header version, nickname, and (TM2) driver login, threaded
/// into body chunk `0x0309200E`'s tentative login read via [`ReplayHeaderInfo`].
fn h_replay_header(r: &mut Reader<Cursor<Vec<u8>>>, ctx: &mut ParseContext) -> ParseResult<()> {
    let version = r.u32()?;
    let mut info = ReplayHeaderInfo {
        version,
        nickname: None,
        driver_login: None,
    };

    if version >= 2 {
        r.lookback_string()?;
        r.lookback_string()?;
        r.lookback_string()?;
        r.bytes(4)?;
        info.nickname = r.string()?;
    }

    if version >= 6 {
        info.driver_login = r.string()?;
        r.bytes(1)?;
        r.lookback_string()?;
    }

    ctx.replay_header = Some(info);
    Ok(())
}

/// `0x03093002`/`0x2403F002`: 8 bytes discarded, then four length-prefixed strings discarded.
fn h_replay_four_strings(r: &mut Reader<Cursor<Vec<u8>>>) -> ParseResult<()> {
    r.bytes(8)?;
    for _ in 0..4 {
        r.string()?;
    }
    Ok(())
}
