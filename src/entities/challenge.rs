//! The `CGameCtnChallenge` map entity and the block/item records it owns.

use crate::types::Vec3;

/// Medal time thresholds, in milliseconds.
#[derive(Clone, Copy, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MedalTimes {
    pub bronze: i32,
    pub silver: i32,
    pub gold: i32,
    pub author: i32,
}

/// A placed map block (§3, `MapBlock`).
///
/// `flags` is always normalized to `u32` regardless of whether the wire encoded it as 16 or 32
/// bits (§4.E, challenge body chunk) — the width is a wire concern, not a model concern.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MapBlock {
    pub name: String,
    pub rotation: u8,
    pub position: Vec3<u8>,
    pub flags: u32,
    pub skin_author: Option<String>,
    /// Node index of a referenced `CGameCtnBlockSkin`, when the flags named a skin.
    pub skin: Option<i32>,
    /// Node index of a referenced waypoint/param node, when `flags & 0x100000` was set.
    pub params: Option<i32>,
}

/// A placed item (§3, `BlockItem`).
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockItem {
    pub path: String,
    pub collection: String,
    pub author: String,
    pub rotation: f32,
    pub position: Vec3<f32>,
    pub waypoint: Option<crate::entities::waypoint::WaypointSpecialProperty>,
}

/// A `CGameCtnChallenge` node: the parsed map.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Challenge {
    pub class_id: u32,
    pub uid: String,
    pub environment: String,
    pub author: String,
    pub name: Option<String>,
    pub mood: String,
    pub env_bg: String,
    pub env_author: String,
    pub map_size: Vec3<i32>,
    pub req_unlock: i32,
    pub flags: i32,
    pub times: MedalTimes,
    pub blocks: Vec<MapBlock>,
    pub items: Vec<BlockItem>,
    pub community: Option<String>,
    /// Set once the reserved password-CRC chunk (`0x03043014`/`0x03043029`) has been seen.
    ///
    /// The hash itself is never decoded — verifying checksums is out of scope — but recording
    /// that the chunk was present lets callers tell "no password" from "password, unverified".
    pub password_seen: bool,
}
