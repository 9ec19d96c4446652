//! The body chunk loop (component D) and its per-chunk handler dispatch table.

use crate::context::ParseContext;
use crate::entities::{
    BlockItem, Challenge, CollectorList, CollectorStock, CtnGhost, Entity, Ghost, MapBlock,
    MedalTimes, Replay, WaypointSpecialProperty,
};
use crate::error::{ParseError, ParseResult};
use crate::ghost_samples;
use crate::options::ParseOptions;
use crate::reader::Reader;
use std::collections::BTreeMap;
use std::io::Cursor;

/// The shared entity store body chunk handlers read from and write into, keyed by node index
/// (the root node is index `-1`). A `BTreeMap` keeps iteration in ascending-index order, which
/// `Gbx::get_classes_by_ids` relies on directly rather than re-sorting.
pub type BodyEntities = BTreeMap<i32, Entity>;

/// The reader type every body-level chunk loop and handler operates on: the whole decompressed
/// body lives in one buffer, node references recurse within that same buffer.
pub type BodyReader = Reader<Cursor<Vec<u8>>>;

type HandlerFn =
    fn(&mut BodyReader, i32, &mut BodyEntities, &mut ParseContext, &ParseOptions) -> ParseResult<()>;

const SKIP_MARKER: i32 = 0x534B_4950;
const END_OF_NODE: u32 = 0xFACA_DE01;

/// Construct the default entity for a node's class id (§9, "Duck-typed entities").
fn construct_entity(class_id: u32) -> Entity {
    match class_id {
        0x0304_3000 | 0x2400_3000 => Entity::Challenge(Challenge {
            class_id,
            ..Default::default()
        }),
        0x0309_3000 | 0x2407_E000 => Entity::Replay(Replay {
            class_id,
            ..Default::default()
        }),
        0x0303_F005 => Entity::Ghost(Ghost {
            class_id,
            ..Default::default()
        }),
        0x0309_2000 | 0x2401_B000 => Entity::CtnGhost(CtnGhost {
            class_id,
            ..Default::default()
        }),
        0x0301_B000 | 0x2403_C000 => Entity::CollectorList(CollectorList {
            class_id,
            ..Default::default()
        }),
        0x0313_B000 | 0x2E00_9000 => Entity::WaypointSpecialProperty(WaypointSpecialProperty {
            class_id,
            ..Default::default()
        }),
        _ => Entity::Header { class_id },
    }
}

/// Apply the side-channel state the header scanner collected before the body loop ran (§9).
fn apply_context_defaults(entity: &mut Entity, ctx: &ParseContext) {
    match entity {
        Entity::Challenge(challenge) => challenge.community = ctx.community.clone(),
        Entity::Replay(replay) => {
            if let Some(info) = &ctx.replay_header {
                replay.nickname = info.nickname.clone();
                replay.driver_login = info.driver_login.clone();
            }
        }
        _ => {}
    }
}

/// Run the body chunk loop for a node, constructing/looking up its entity first.
///
/// `index` is the node-reference key (`-1` for the root class). Recursion through node
/// references must have already charged the depth counter before calling this for a child.
///
/// A read failure anywhere in a chunk handler abandons the rest of *this* node's chunk stream
/// rather than the whole parse (§7, "the parser never aborts the whole parse for a recoverable
/// kind") — the caller always gets back a partially-populated entity.
pub fn read_body(
    reader: &mut BodyReader,
    class_id: u32,
    index: i32,
    entities: &mut BodyEntities,
    ctx: &mut ParseContext,
    options: &ParseOptions,
) -> ParseResult<()> {
    if !entities.contains_key(&index) {
        let mut entity = construct_entity(class_id);
        apply_context_defaults(&mut entity, ctx);
        entities.insert(index, entity);
    }

    loop {
        match read_one_chunk(reader, class_id, index, entities, ctx, options) {
            Ok(true) => continue,
            Ok(false) => return Ok(()),
            Err(err) => {
                tracing::warn!(
                    class_id = format_args!("{class_id:#010x}"),
                    error = %err,
                    "error reading chunk, abandoning rest of node"
                );
                return Ok(());
            }
        }
    }
}

/// Read and dispatch a single chunk. Returns `Ok(false)` when the node's chunk stream ends,
/// either by the end-of-node sentinel or by meeting an unskippable unrecognized chunk.
fn read_one_chunk(
    reader: &mut BodyReader,
    _class_id: u32,
    index: i32,
    entities: &mut BodyEntities,
    ctx: &mut ParseContext,
    options: &ParseOptions,
) -> ParseResult<bool> {
    let chunk_id = reader.u32()?;
    if chunk_id == END_OF_NODE {
        return Ok(false);
    }

    let marker = reader.i32()?;
    let skip_size = if marker == SKIP_MARKER {
        Some(reader.u32()?)
    } else {
        reader.rewind(4)?;
        None
    };

    match HANDLERS.iter().find(|(id, _)| *id == chunk_id) {
        Some((_, handler)) => handler(reader, index, entities, ctx, options)?,
        None => match skip_size {
            Some(size) => {
                tracing::trace!(
                    chunk_id = format_args!("{chunk_id:#010x}"),
                    size,
                    "skipping unrecognized chunk"
                );
                reader.skip(size as u64)?;
            }
            None => {
                tracing::debug!(
                    chunk_id = format_args!("{chunk_id:#010x}"),
                    "unrecognized unskippable chunk, abandoning node"
                );
                return Ok(false);
            }
        },
    }

    Ok(true)
}

/// Read a single node-reference field: `i32 index`, plus — if `index >= 0` and the node hasn't
/// been parsed yet — `u32 child_class_id` and a recursive descent at that index.
fn read_node_ref(
    reader: &mut BodyReader,
    entities: &mut BodyEntities,
    ctx: &mut ParseContext,
    options: &ParseOptions,
) -> ParseResult<Option<i32>> {
    let index = reader.i32()?;
    if index < 0 {
        return Ok(None);
    }

    if !entities.contains_key(&index) {
        let child_class_id = reader.u32()?;
        ctx.enter_node(options.max_node_depth_value())?;
        let result = read_body(reader, child_class_id, index, entities, ctx, options);
        ctx.exit_node();
        result?;
    }

    Ok(Some(index))
}

/// Parse a node's chunk stream at a fixed class id with no wire-provided index, without storing
/// the result in the shared entity map (§9, the source's `add=False` nodes: the TM2 block-skin
/// waypoint and the item list's trailing placement node both use this).
///
/// Any nested node references the discarded subtree makes of its own are resolved against a
/// fresh, isolated map rather than the caller's `entities` — the reference parser shares one
/// global dict across the whole file, so a discarded subtree could in principle cross-reference
/// an index already seen elsewhere; that cross-subtree sharing is not reproduced here. See
/// `DESIGN.md`.
fn read_inline_node(
    reader: &mut BodyReader,
    class_id: u32,
    ctx: &mut ParseContext,
    options: &ParseOptions,
) -> ParseResult<Option<Entity>> {
    ctx.enter_node(options.max_node_depth_value())?;
    let mut scratch: BodyEntities = BTreeMap::new();
    let result = read_body(reader, class_id, 0, &mut scratch, ctx, options);
    ctx.exit_node();
    result?;
    Ok(scratch.remove(&0))
}

/// A waypoint node reached with no wire-provided index: parse it and leave it in the single-slot
/// register for the next consumer (§4.D).
fn read_inline_waypoint(
    reader: &mut BodyReader,
    class_id: u32,
    ctx: &mut ParseContext,
    options: &ParseOptions,
) -> ParseResult<()> {
    if let Some(Entity::WaypointSpecialProperty(wp)) =
        read_inline_node(reader, class_id, ctx, options)?
    {
        ctx.set_waypoint(wp);
    }
    Ok(())
}

fn entity_mut<'a>(entities: &'a mut BodyEntities, index: i32) -> &'a mut Entity {
    entities
        .get_mut(&index)
        .expect("entity constructed by read_body before its handlers run")
}

fn h_two_node_refs(
    reader: &mut BodyReader,
    _index: i32,
    entities: &mut BodyEntities,
    ctx: &mut ParseContext,
    options: &ParseOptions,
) -> ParseResult<()> {
    read_node_ref(reader, entities, ctx, options)?;
    read_node_ref(reader, entities, ctx, options)?;
    reader.u32()?;
    Ok(())
}

fn h_three_node_refs(
    reader: &mut BodyReader,
    _index: i32,
    entities: &mut BodyEntities,
    ctx: &mut ParseContext,
    options: &ParseOptions,
) -> ParseResult<()> {
    read_node_ref(reader, entities, ctx, options)?;
    read_node_ref(reader, entities, ctx, options)?;
    read_node_ref(reader, entities, ctx, options)?;
    Ok(())
}

fn h_one_node_ref(
    reader: &mut BodyReader,
    _index: i32,
    entities: &mut BodyEntities,
    ctx: &mut ParseContext,
    options: &ParseOptions,
) -> ParseResult<()> {
    read_node_ref(reader, entities, ctx, options)?;
    Ok(())
}

fn h_lookback_triple_discard(
    reader: &mut BodyReader,
    _index: i32,
    _entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    reader.lookback_string()?;
    reader.lookback_string()?;
    reader.lookback_string()?;
    Ok(())
}

fn h_lookback_single_discard(
    reader: &mut BodyReader,
    _index: i32,
    _entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    reader.lookback_string()?;
    Ok(())
}

fn h_two_strings_discard(
    reader: &mut BodyReader,
    _index: i32,
    _entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    reader.string()?;
    reader.string()?;
    Ok(())
}

fn h_four_strings_discard(
    reader: &mut BodyReader,
    _index: i32,
    _entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    reader.string()?;
    reader.string()?;
    reader.string()?;
    reader.string()?;
    Ok(())
}

/// A block-skin-style `(version, optional file path, optional extra string)` pair, repeated
/// twice (chunk `0x03059002`/`0x2403A002`).
fn h_block_skin_file_refs(
    reader: &mut BodyReader,
    _index: i32,
    _entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    reader.string()?;
    for _ in 0..2 {
        let version = reader.u8()?;
        if version >= 3 {
            reader.bytes(32)?;
        }
        let file_path = reader.string()?.unwrap_or_default();
        if !file_path.is_empty() && version >= 1 {
            reader.string()?;
        }
    }
    Ok(())
}

fn h_collector_list(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let count = reader.u32()?;
    let Entity::CollectorList(list) = entity_mut(entities, index) else {
        return Err(ParseError::Framing(
            "collector list chunk seen against non-collector-list node".into(),
        ));
    };

    for _ in 0..count {
        let block_name = reader.lookback_string()?;
        let collection = reader.lookback_string()?;
        let author = reader.lookback_string()?;
        reader.u32()?;
        list.stocks.push(CollectorStock {
            block_name,
            collection,
            author,
        });
    }

    Ok(())
}

macro_rules! skip_handler {
    ($name:ident, $n:expr) => {
        fn $name(
            reader: &mut BodyReader,
            _index: i32,
            _entities: &mut BodyEntities,
            _ctx: &mut ParseContext,
            _options: &ParseOptions,
        ) -> ParseResult<()> {
            reader.bytes($n)?;
            Ok(())
        }
    };
}

skip_handler!(h_skip_4, 4);
skip_handler!(h_skip_8, 8);
skip_handler!(h_skip_12, 12);
skip_handler!(h_skip_16, 16);
skip_handler!(h_skip_20, 20);
skip_handler!(h_skip_32, 32);
skip_handler!(h_skip_36, 36);

fn h_count_then_skip4(
    reader: &mut BodyReader,
    _index: i32,
    _entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let count = reader.u32()?;
    reader.skip(count as u64 * 4)
}

fn h_password_reserved(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    reader.bytes(20)?;
    if let Entity::Challenge(challenge) = entity_mut(entities, index) {
        challenge.password_seen = true;
    }
    Ok(())
}

fn h_checkpoint_layout(
    reader: &mut BodyReader,
    _index: i32,
    _entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let count = reader.u32()?;
    for _ in 0..count {
        reader.bytes(12)?;
    }
    Ok(())
}

/// `0x03043028`: `p`'s only role is whether the following fixed-size block is present; the
/// trailing string is always read regardless.
fn h_0x03043028(
    reader: &mut BodyReader,
    _index: i32,
    _entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let p = reader.i32()?;
    if p != 0 {
        reader.bytes(1 + 4 * 3 * 3 + 4 * 3 + 4 + 4 + 4)?;
    }
    reader.string()?;
    Ok(())
}

fn h_ghost_data(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let (sample_period, samples) = ghost_samples::read_sample_block(reader)?;

    match entity_mut(entities, index) {
        Entity::Ghost(ghost) => {
            ghost.sample_period = sample_period;
            ghost.samples = samples;
        }
        Entity::CtnGhost(ctn_ghost) => {
            ctn_ghost.ghost.sample_period = sample_period;
            ctn_ghost.ghost.samples = samples;
        }
        _ => {
            return Err(ParseError::Framing(
                "ghost sample chunk seen against non-ghost node".into(),
            ))
        }
    }

    Ok(())
}

fn h_ghost_data_prefixed(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    ctx: &mut ParseContext,
    options: &ParseOptions,
) -> ParseResult<()> {
    reader.bytes(4)?;
    h_ghost_data(reader, index, entities, ctx, options)
}

fn h_replay_embedded_track(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let size = reader.u32()?;
    let bytes = reader.bytes(size as usize)?;

    let track = match crate::Gbx::parse_slice(&bytes) {
        Ok(gbx) => Some(Box::new(gbx)),
        Err(err) => {
            tracing::warn!(error = %err, "embedded track parse failed");
            None
        }
    };

    if let Entity::Replay(replay) = entity_mut(entities, index) {
        replay.track = track;
    }

    Ok(())
}

fn h_replay_ghost_list(
    reader: &mut BodyReader,
    _index: i32,
    entities: &mut BodyEntities,
    ctx: &mut ParseContext,
    options: &ParseOptions,
) -> ParseResult<()> {
    reader.bytes(4)?;
    let num_ghosts = reader.u32()?;
    for _ in 0..num_ghosts {
        read_node_ref(reader, entities, ctx, options)?;
    }
    reader.bytes(4)?;
    Ok(())
}

fn h_checkpoint_times(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let count = reader.u32()?;
    let mut times = Vec::with_capacity(count as usize);
    for _ in 0..count {
        times.push(reader.u32()?);
        reader.u32()?;
    }

    if let Entity::CtnGhost(ctn_ghost) = entity_mut(entities, index) {
        ctn_ghost.checkpoint_times = times;
    }

    Ok(())
}

fn h_ghost_race_time(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let race_time = reader.u32()?;
    if let Entity::CtnGhost(ctn_ghost) = entity_mut(entities, index) {
        ctn_ghost.race_time = race_time;
    }
    Ok(())
}

fn h_ghost_num_respawns(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let num_respawns = reader.u32()?;
    if let Entity::CtnGhost(ctn_ghost) = entity_mut(entities, index) {
        ctn_ghost.num_respawns = num_respawns;
    }
    Ok(())
}

fn h_ghost_light_trail_color(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let color = reader.vec3_f32()?;
    if let Entity::CtnGhost(ctn_ghost) = entity_mut(entities, index) {
        ctn_ghost.light_trail_color = color;
    }
    Ok(())
}

fn h_ghost_stunts_score(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let stunts_score = reader.u32()?;
    if let Entity::CtnGhost(ctn_ghost) = entity_mut(entities, index) {
        ctn_ghost.stunts_score = stunts_score;
    }
    Ok(())
}

fn h_ghost_uid(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let uid = reader.lookback_string()?;

    let tm2_login = if ctx
        .replay_header
        .as_ref()
        .is_some_and(|info| info.version >= 8)
    {
        reader
            .transaction(|r| match r.string()? {
                Some(s) => Ok(s),
                None => Err(ParseError::Framing(
                    "invalid utf-8 in tentative login read".into(),
                )),
            })
            .ok()
    } else {
        None
    };

    if let Entity::CtnGhost(ctn_ghost) = entity_mut(entities, index) {
        ctn_ghost.uid = uid;
        if let Some(login) = tm2_login {
            ctn_ghost.login = Some(login);
        }
    }

    Ok(())
}

fn h_ghost_login(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let login = reader.string()?;
    if let Entity::CtnGhost(ctn_ghost) = entity_mut(entities, index) {
        ctn_ghost.login = login;
    }
    Ok(())
}

fn h_control_events(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    read_control_events_block(reader, index, entities, false)
}

fn h_control_events_maniaplanet(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    reader.bytes(4)?;
    read_control_events_block(reader, index, entities, true)
}

/// The control-event block shared by `0x03092019`/`0x03092025` and their `0x2401B0xx` aliases
/// (§4.E.1).
fn read_control_events_block(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    is_maniaplanet: bool,
) -> ParseResult<()> {
    let events_duration = reader.u32()?;
    if events_duration == 0 {
        if let Entity::CtnGhost(ctn_ghost) = entity_mut(entities, index) {
            ctn_ghost.is_maniaplanet = is_maniaplanet;
            ctn_ghost.events_duration = 0;
        }
        return Ok(());
    }

    reader.bytes(4)?;
    let num_control_names = reader.u32()?;
    let mut control_names = Vec::new();
    for _ in 0..num_control_names {
        let name = reader.lookback_string()?;
        if !name.is_empty() {
            control_names.push(name);
        }
    }

    if control_names.is_empty() {
        if let Entity::CtnGhost(ctn_ghost) = entity_mut(entities, index) {
            ctn_ghost.is_maniaplanet = is_maniaplanet;
            ctn_ghost.events_duration = events_duration;
        }
        return Ok(());
    }

    let num_entries = reader.u32()?;
    reader.bytes(4)?;
    let mut entries = Vec::with_capacity(num_entries as usize);
    for _ in 0..num_entries {
        let raw_time = reader.u32()?;
        let name_index = reader.u8()?;
        let enabled = reader.u16()?;
        let flags = reader.u16()?;
        let event_name = control_names
            .get(name_index as usize)
            .cloned()
            .unwrap_or_default();
        entries.push(crate::entities::ControlEntry {
            time: raw_time as i32 - 100_000,
            event_name,
            enabled,
            flags,
        });
    }

    let game_version = reader.string()?.unwrap_or_default();
    reader.bytes(12)?;
    reader.string()?;
    reader.bytes(4)?;

    if let Entity::CtnGhost(ctn_ghost) = entity_mut(entities, index) {
        ctn_ghost.is_maniaplanet = is_maniaplanet;
        ctn_ghost.events_duration = events_duration;
        ctn_ghost.control_names = control_names;
        ctn_ghost.control_entries = entries;
        ctn_ghost.game_version = game_version;
    }

    Ok(())
}

fn h_waypoint(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let version = reader.u32()?;
    if let Entity::WaypointSpecialProperty(wp) = entity_mut(entities, index) {
        match version {
            1 => {
                wp.spawn = Some(reader.u32()?);
                wp.order = reader.u32()?;
            }
            2 => {
                wp.tag = reader.string()?;
                wp.order = reader.u32()?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn h_challenge_body(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    ctx: &mut ParseContext,
    options: &ParseOptions,
) -> ParseResult<()> {
    let uid = reader.lookback_string()?;
    let environment = reader.lookback_string()?;
    let author = reader.lookback_string()?;

    let name_start = reader.pos();
    let name = reader.string()?;
    ctx.publish_mark("map_name", name_start, reader.pos() - name_start);

    let mood_start = reader.pos();
    let mood = reader.lookback_string()?;
    ctx.publish_mark("mood", mood_start, reader.pos() - mood_start);

    let env_bg = reader.lookback_string()?;
    let env_author = reader.lookback_string()?;

    let map_size = crate::types::Vec3::new(reader.i32()?, reader.i32()?, reader.i32()?);
    let req_unlock = reader.i32()?;
    let challenge_flags = reader.i32()?;
    let wide_flags = challenge_flags > 0;

    let blocks_start = reader.pos();
    let num_blocks = reader.u32()?;
    let mut blocks: Vec<MapBlock> = Vec::new();
    let mut i = 0u32;

    // §3: a block named "Unassigned1" is never appended; a block with flags == 0xFFFFFFFF is
    // never appended either (regardless of name) and does not advance the block counter — the
    // two conditions are independent, so both must be checked before pushing.
    while i < num_blocks {
        let name = reader.lookback_string()?;
        let rotation = reader.u8()?;
        let position = reader.vec3_u8()?;
        let block_flags = if wide_flags {
            reader.u32()?
        } else {
            reader.u16()? as u32
        };

        let keep = name != "Unassigned1" && block_flags != 0xFFFF_FFFF;
        if keep {
            blocks.push(MapBlock {
                name,
                rotation,
                position,
                flags: block_flags,
                ..Default::default()
            });
        }

        if block_flags == 0xFFFF_FFFF {
            continue;
        }

        if block_flags & 0x8000 != 0 {
            let skin_author = reader.lookback_string()?;
            if keep {
                blocks.last_mut().expect("just pushed").skin_author = Some(skin_author);
            }

            if challenge_flags >= 6 {
                // TM2 flags: block waypoint type tag, an unused int, then an inline waypoint node.
                reader.string()?;
                reader.i32()?;
                read_inline_waypoint(reader, 0x2E00_9000, ctx, options)?;
            } else {
                let skin = read_node_ref(reader, entities, ctx, options)?;
                if keep {
                    blocks.last_mut().expect("just pushed").skin = skin;
                }
            }

            if block_flags & 0x0010_0000 != 0 {
                let params = read_node_ref(reader, entities, ctx, options)?;
                if keep {
                    blocks.last_mut().expect("just pushed").params = params;
                }
            }
        }

        i += 1;
    }
    ctx.publish_mark("block_data", blocks_start, reader.pos() - blocks_start);

    if let Entity::Challenge(challenge) = entity_mut(entities, index) {
        challenge.uid = uid;
        challenge.environment = environment;
        challenge.author = author;
        challenge.name = name;
        challenge.mood = mood;
        challenge.env_bg = env_bg;
        challenge.env_author = env_author;
        challenge.map_size = map_size;
        challenge.req_unlock = req_unlock;
        challenge.flags = challenge_flags;
        challenge.blocks = blocks;
    }

    Ok(())
}

/// The item list's waypoint reference: unlike a generic node reference, the class id is fixed
/// (`0x2E009000`) and — since waypoint nodes are never stored — there is no "already parsed"
/// check: a present index always triggers a fresh inline parse.
fn read_item_waypoint(
    reader: &mut BodyReader,
    ctx: &mut ParseContext,
    options: &ParseOptions,
) -> ParseResult<()> {
    let idx = reader.i32()?;
    if idx >= 0 {
        read_inline_waypoint(reader, 0x2E00_9000, ctx, options)?;
    }
    Ok(())
}

/// `0x03043040`: item list. Read through a forked reader positioned at the current cursor, with
/// its own fresh lookback dictionary — the reference implementation's `item_bp = ByteReader(bp.
/// data); item_bp.pos = bp.pos` (§4.E). Reusing the shared body reader here would both under-read
/// the chunk by the lookback version `u32` a fresh reader consumes on its first lookback call,
/// and resolve `path`/`collection`/`author` back-references against the challenge body's
/// dictionary instead of a dictionary scoped to this chunk. The outer reader is resynced to the
/// fork's end position once the fork is done (§4.E, "advance the outer cursor to match").
fn h_item_list(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    ctx: &mut ParseContext,
    options: &ParseOptions,
) -> ParseResult<()> {
    let mut item_reader = reader.fork();
    item_reader.bytes(8)?;
    item_reader.bytes(8)?;
    let num_items = item_reader.u32()?;

    let mut items = Vec::with_capacity(num_items as usize);
    for _ in 0..num_items {
        item_reader.bytes(12)?;
        let path = item_reader.lookback_string()?;
        let collection = item_reader.lookback_string()?;
        let author = item_reader.lookback_string()?;
        let rotation = item_reader.f32()?;
        item_reader.bytes(15)?;
        let position = item_reader.vec3_f32()?;

        read_item_waypoint(&mut item_reader, ctx, options)?;
        let waypoint = ctx.take_waypoint();

        item_reader.bytes(18)?;
        read_inline_node(&mut item_reader, 0x0310_1004, ctx, options)?;

        items.push(BlockItem {
            path,
            collection,
            author,
            rotation,
            position,
            waypoint,
        });
    }
    item_reader.bytes(4)?;

    reader.seek_to(item_reader.pos())?;

    if let Entity::Challenge(challenge) = entity_mut(entities, index) {
        challenge.items = items;
    }

    Ok(())
}

/// `0x03043024` (bare id): `version`, an optional skip, `file_path`, then a trailing string read
/// whenever `file_path` is non-empty *or* `version >= 3`.
fn h_0x03043024_primary(
    reader: &mut BodyReader,
    _index: i32,
    _entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let version = reader.u8()?;
    if version >= 3 {
        reader.bytes(32)?;
    }
    let file_path = reader.string()?.unwrap_or_default();
    if !file_path.is_empty() || version >= 3 {
        reader.string()?;
    }
    Ok(())
}

/// `0x24003024` (legacy alias only — the bare `0x03043024` id never reaches this clause): same
/// shape, but the trailing string is gated on `path` non-empty *and* `version >= 1`.
fn h_0x03043024_alias(
    reader: &mut BodyReader,
    _index: i32,
    _entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let version = reader.u8()?;
    if version >= 3 {
        reader.bytes(32)?;
    }
    let path = reader.string()?.unwrap_or_default();
    if !path.is_empty() && version >= 1 {
        reader.string()?;
    }
    Ok(())
}

fn h_medal_times(
    reader: &mut BodyReader,
    index: i32,
    entities: &mut BodyEntities,
    _ctx: &mut ParseContext,
    _options: &ParseOptions,
) -> ParseResult<()> {
    let bronze = reader.i32()?;
    let silver = reader.i32()?;
    let gold = reader.i32()?;
    let author = reader.i32()?;
    reader.u32()?;

    if let Entity::Challenge(challenge) = entity_mut(entities, index) {
        challenge.times = MedalTimes {
            bronze,
            silver,
            gold,
            author,
        };
    }

    Ok(())
}

/// Chunk id → handler. Legacy ids (`0x030…`) and their high-nibble-shifted aliases (`0x240…`)
/// resolve to the same handler except where noted — see the duplicate-clause resolution recorded
/// in `DESIGN.md` for `0x03043024`/`0x24003024`, the only pair whose aliased form runs different
/// logic from its bare id.
static HANDLERS: &[(u32, HandlerFn)] = &[
    (0x0304_300D, h_lookback_triple_discard),
    (0x2400_300D, h_lookback_triple_discard),
    (0x0304_3011, h_two_node_refs),
    (0x2400_3011, h_two_node_refs),
    (0x0301_B000, h_collector_list),
    (0x2403_C000, h_collector_list),
    (0x0305_B000, h_skip_32),
    (0x2400_C000, h_skip_32),
    (0x0305_B001, h_four_strings_discard),
    (0x2400_C001, h_four_strings_discard),
    (0x0305_B004, h_medal_times),
    (0x2400_C004, h_medal_times),
    (0x0305_B005, h_skip_12),
    (0x2400_C005, h_skip_12),
    (0x0305_B006, h_count_then_skip4),
    (0x2400_C006, h_count_then_skip4),
    (0x0305_B008, h_skip_8),
    (0x2400_C008, h_skip_8),
    (0x0305_B00A, h_skip_36),
    (0x0305_B00D, h_skip_4),
    (0x0304_3014, h_password_reserved),
    (0x0304_3029, h_password_reserved),
    (0x0304_3017, h_checkpoint_layout),
    (0x0304_301F, h_challenge_body),
    (0x2400_301F, h_challenge_body),
    (0x0304_3021, h_three_node_refs),
    (0x2400_3021, h_three_node_refs),
    (0x0304_3022, h_skip_4),
    (0x2400_3022, h_skip_4),
    (0x0304_3024, h_0x03043024_primary),
    (0x2400_3024, h_0x03043024_alias),
    (0x0304_3025, h_skip_16),
    (0x2400_3025, h_skip_16),
    (0x0304_3026, h_one_node_ref),
    (0x2400_3026, h_one_node_ref),
    (0x0304_3028, h_0x03043028),
    (0x0304_302A, h_skip_4),
    (0x0304_3040, h_item_list),
    (0x0305_9000, h_two_strings_discard),
    (0x0305_9002, h_block_skin_file_refs),
    (0x2403_A002, h_block_skin_file_refs),
    (0x0313_B000, h_waypoint),
    (0x2E00_9000, h_waypoint),
    (0x0303_F005, h_ghost_data),
    (0x0303_F006, h_ghost_data_prefixed),
    (0x0309_3002, h_replay_embedded_track),
    (0x2403_F002, h_replay_embedded_track),
    (0x0309_3004, h_skip_16),
    (0x2403_F004, h_skip_16),
    (0x0309_3007, h_skip_4),
    (0x0309_3014, h_replay_ghost_list),
    (0x2403_F014, h_replay_ghost_list),
    (0x0309_3015, h_one_node_ref),
    (0x0309_2005, h_ghost_race_time),
    (0x2401_B005, h_ghost_race_time),
    (0x0309_2008, h_ghost_num_respawns),
    (0x2401_B008, h_ghost_num_respawns),
    (0x0309_2009, h_ghost_light_trail_color),
    (0x2401_B009, h_ghost_light_trail_color),
    (0x0309_200A, h_ghost_stunts_score),
    (0x2401_B00A, h_ghost_stunts_score),
    (0x0309_200B, h_checkpoint_times),
    (0x2401_B00B, h_checkpoint_times),
    (0x0309_200C, h_skip_4),
    (0x2401_B00C, h_skip_4),
    (0x0309_200E, h_ghost_uid),
    (0x2401_B00E, h_ghost_uid),
    (0x0309_200F, h_ghost_login),
    (0x2401_B00F, h_ghost_login),
    (0x0309_2010, h_lookback_single_discard),
    (0x2401_B010, h_lookback_single_discard),
    (0x0309_2012, h_skip_20),
    (0x2401_B012, h_skip_20),
    (0x0309_2013, h_skip_8),
    (0x2401_B013, h_skip_8),
    (0x0309_2014, h_skip_4),
    (0x2401_B014, h_skip_4),
    (0x0309_2015, h_lookback_single_discard),
    (0x2401_B015, h_lookback_single_discard),
    (0x0309_2018, h_lookback_triple_discard),
    (0x2401_B018, h_lookback_triple_discard),
    (0x0309_2019, h_control_events),
    (0x2401_B019, h_control_events),
    (0x2401_B011, h_control_events),
    (0x0309_2025, h_control_events_maniaplanet),
    (0x0309_201C, h_skip_32),
];

#[cfg(test)]
mod tests {
    use super::*;

    struct Builder {
        bytes: Vec<u8>,
        first_lookback: bool,
    }

    impl Builder {
        fn new() -> Self {
            Self {
                bytes: vec![],
                first_lookback: true,
            }
        }

        fn u8(&mut self, v: u8) -> &mut Self {
            self.bytes.push(v);
            self
        }

        fn u16(&mut self, v: u16) -> &mut Self {
            self.bytes.extend_from_slice(&v.to_le_bytes());
            self
        }

        fn u32(&mut self, v: u32) -> &mut Self {
            self.bytes.extend_from_slice(&v.to_le_bytes());
            self
        }

        fn i32(&mut self, v: i32) -> &mut Self {
            self.bytes.extend_from_slice(&v.to_le_bytes());
            self
        }

        fn raw(&mut self, v: &[u8]) -> &mut Self {
            self.bytes.extend_from_slice(v);
            self
        }

        fn string(&mut self, s: &str) -> &mut Self {
            self.u32(s.len() as u32);
            self.raw(s.as_bytes())
        }

        /// Writes a fresh lookback-string introduction (`code = 0`), emitting the one-time
        /// version prefix on the first call for this builder.
        fn lookback_fresh(&mut self, s: &str) -> &mut Self {
            if self.first_lookback {
                self.u32(0);
                self.first_lookback = false;
            }
            self.u32(0);
            self.string(s)
        }

        fn reader(self) -> BodyReader {
            Reader::new(Cursor::new(self.bytes))
        }
    }

    fn run_chunk(chunk_id: u32, payload: Builder, class_id: u32, entities: &mut BodyEntities) {
        let mut b = Builder::new();
        b.u32(chunk_id);
        b.raw(&payload.bytes);
        b.u32(END_OF_NODE);
        let mut reader = b.reader();
        let mut ctx = ParseContext::new();
        let options = ParseOptions::default();
        read_body(&mut reader, class_id, -1, entities, &mut ctx, &options).unwrap();
    }

    #[test]
    fn challenge_body_skips_sentinel_and_unassigned_blocks() {
        let mut payload = Builder::new();
        payload
            .lookback_fresh("Test001") // uid
            .lookback_fresh("Stadium") // environment
            .lookback_fresh("Nadeo") // author
            .string("Test Track") // name
            .u32(13) // mood: well-known "Lagoon"
            .lookback_fresh("Day") // env_bg
            .lookback_fresh("Nadeo") // env_author
            .i32(48)
            .i32(40)
            .i32(48) // map_size
            .i32(0) // req_unlock
            .i32(1) // flags (wide block-flags)
            .u32(1); // num_blocks

        // Record A: flags == 0xFFFFFFFF, name == "Unassigned1" — consumed, not counted, not kept.
        payload
            .lookback_fresh("Unassigned1")
            .u8(0)
            .raw(&[0, 0, 0])
            .u32(0xFFFF_FFFF);

        // Record B: the one real block, counted against num_blocks == 1.
        payload
            .lookback_fresh("StadiumRoadMain")
            .u8(2)
            .raw(&[1, 0, 1])
            .u32(0);

        let mut entities = BodyEntities::new();
        run_chunk(0x0304_301F, payload, 0x0304_3000, &mut entities);

        let challenge = entities[&-1].as_challenge().unwrap();
        assert_eq!(challenge.uid, "Test001");
        assert_eq!(challenge.mood, "Lagoon");
        assert_eq!(challenge.env_bg, "Day");
        assert_eq!(challenge.blocks.len(), 1);
        assert_eq!(challenge.blocks[0].name, "StadiumRoadMain");
        assert_eq!(challenge.blocks[0].rotation, 2);
        assert_eq!(challenge.blocks[0].flags, 0);
    }

    #[test]
    fn challenge_body_skips_named_block_with_sentinel_flags() {
        // A block whose name is NOT "Unassigned1" but whose flags are still 0xFFFFFFFF: the two
        // conditions are independent (§3), so this record must not be appended either, even
        // though its name alone would otherwise keep it.
        let mut payload = Builder::new();
        payload
            .lookback_fresh("Uid")
            .lookback_fresh("Stadium")
            .lookback_fresh("Nadeo")
            .string("Name")
            .lookback_fresh("Mood")
            .lookback_fresh("Bg")
            .lookback_fresh("BgAuthor")
            .i32(0)
            .i32(0)
            .i32(0)
            .i32(0)
            .i32(1) // wide block flags
            .u32(1);

        // Record A: named, but flags == 0xFFFFFFFF — not appended, counter not incremented.
        payload
            .lookback_fresh("StadiumRoadMain")
            .u8(0)
            .raw(&[0, 0, 0])
            .u32(0xFFFF_FFFF);

        // Record B: the one real block, counted against num_blocks == 1.
        payload
            .lookback_fresh("StadiumRoadSecond")
            .u8(1)
            .raw(&[2, 0, 2])
            .u32(0);

        let mut entities = BodyEntities::new();
        run_chunk(0x0304_301F, payload, 0x0304_3000, &mut entities);

        let challenge = entities[&-1].as_challenge().unwrap();
        assert_eq!(challenge.blocks.len(), 1);
        assert_eq!(challenge.blocks[0].name, "StadiumRoadSecond");
    }

    #[test]
    fn challenge_body_reads_narrow_block_flags_when_version_not_positive() {
        let mut payload = Builder::new();
        payload
            .lookback_fresh("Uid")
            .lookback_fresh("Stadium")
            .lookback_fresh("Nadeo")
            .string("Name")
            .lookback_fresh("Mood")
            .lookback_fresh("Bg")
            .lookback_fresh("BgAuthor")
            .i32(0)
            .i32(0)
            .i32(0)
            .i32(0)
            .i32(0) // flags == 0 -> narrow (u16) block flags
            .u32(1);

        payload
            .lookback_fresh("Block")
            .u8(0)
            .raw(&[0, 0, 0])
            .u16(7); // would be 0x00000007 either way; exercises the 16-bit read path

        let mut entities = BodyEntities::new();
        run_chunk(0x0304_301F, payload, 0x0304_3000, &mut entities);

        let challenge = entities[&-1].as_challenge().unwrap();
        assert_eq!(challenge.blocks.len(), 1);
        assert_eq!(challenge.blocks[0].flags, 7);
    }

    #[test]
    fn medal_times_chunk_reads_four_thresholds() {
        let mut payload = Builder::new();
        payload.i32(20000).i32(18000).i32(16000).i32(15000).u32(0);

        let mut entities = BodyEntities::new();
        run_chunk(0x0305_B004, payload, 0x0304_3000, &mut entities);

        let challenge = entities[&-1].as_challenge().unwrap();
        assert_eq!(challenge.times.bronze, 20000);
        assert_eq!(challenge.times.silver, 18000);
        assert_eq!(challenge.times.gold, 16000);
        assert_eq!(challenge.times.author, 15000);
    }

    #[test]
    fn control_events_maniaplanet_decodes_entries() {
        let mut payload = Builder::new();
        payload
            .u32(0) // maniaplanet prefix
            .u32(60000) // events_duration
            .u32(0) // skip
            .u32(2) // num_control_names
            .lookback_fresh("Accelerate")
            .lookback_fresh("Brake")
            .u32(1) // num_entries
            .u32(0) // skip
            .u32(100_500) // raw_time
            .u8(1) // name_index -> "Brake"
            .u16(1) // enabled
            .u16(0) // flags
            .string("3.3.0") // game_version
            .raw(&[0u8; 12])
            .string("")
            .raw(&[0u8; 4]);

        let mut entities = BodyEntities::new();
        run_chunk(0x0309_2025, payload, 0x0309_2000, &mut entities);

        let ghost = entities[&-1].as_ctn_ghost().unwrap();
        assert!(ghost.is_maniaplanet);
        assert_eq!(ghost.events_duration, 60000);
        assert_eq!(ghost.control_names, vec!["Accelerate", "Brake"]);
        assert_eq!(ghost.control_entries.len(), 1);
        assert_eq!(ghost.control_entries[0].time, 500);
        assert_eq!(ghost.control_entries[0].event_name, "Brake");
        assert_eq!(ghost.control_entries[0].enabled, 1);
        assert_eq!(ghost.game_version, "3.3.0");
    }

    #[test]
    fn control_events_with_zero_duration_stops_early() {
        let mut payload = Builder::new();
        payload.u32(0); // events_duration == 0

        let mut entities = BodyEntities::new();
        run_chunk(0x0309_2019, payload, 0x0309_2000, &mut entities);

        let ghost = entities[&-1].as_ctn_ghost().unwrap();
        assert!(!ghost.is_maniaplanet);
        assert_eq!(ghost.events_duration, 0);
        assert!(ghost.control_entries.is_empty());
    }

    #[test]
    fn collector_list_reads_stocks() {
        let mut payload = Builder::new();
        payload
            .u32(1)
            .lookback_fresh("BlockA")
            .lookback_fresh("Stadium")
            .lookback_fresh("Nadeo")
            .u32(0);

        let mut entities = BodyEntities::new();
        run_chunk(0x0301_B000, payload, 0x0301_B000, &mut entities);

        let list = entities.get_mut(&-1).unwrap().as_collector_list_mut().unwrap();
        assert_eq!(list.stocks.len(), 1);
        assert_eq!(list.stocks[0].block_name, "BlockA");
        assert_eq!(list.stocks[0].collection, "Stadium");
        assert_eq!(list.stocks[0].author, "Nadeo");
    }

    #[test]
    fn unrecognized_chunk_with_skip_marker_is_skipped() {
        let mut b = Builder::new();
        b.u32(0x9999_9999); // unknown chunk id
        b.i32(SKIP_MARKER);
        b.u32(4);
        b.raw(&[0xAA; 4]);
        b.u32(END_OF_NODE);

        let mut entities = BodyEntities::new();
        let mut reader = b.reader();
        let mut ctx = ParseContext::new();
        let options = ParseOptions::default();
        read_body(
            &mut reader,
            0x0304_3000,
            -1,
            &mut entities,
            &mut ctx,
            &options,
        )
        .unwrap();

        assert!(entities.contains_key(&-1));
    }

    #[test]
    fn unrecognized_chunk_without_skip_marker_abandons_node() {
        let mut b = Builder::new();
        b.u32(0x9999_9999); // unknown chunk id
        b.raw(&[0, 0, 0, 0]); // not the SKIP marker, and no handler to consume it
                              // deliberately no END_OF_NODE: the loop must stop without reading further

        let mut entities = BodyEntities::new();
        let mut reader = b.reader();
        let mut ctx = ParseContext::new();
        let options = ParseOptions::default();
        read_body(
            &mut reader,
            0x0304_3000,
            -1,
            &mut entities,
            &mut ctx,
            &options,
        )
        .unwrap();

        assert!(entities.contains_key(&-1));
    }
}
