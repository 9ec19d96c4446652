//! The `CGameCtnReplayRecord` entity (§3 `Replay`).

/// A recorded replay: driver identity plus the whole embedded track it was driven on.
///
/// `track` is the result of a full, independent parse of the nested GBX stream found in chunk
/// `0x03093002` — its own lookback dictionary and entity maps, never shared with the outer
/// parse (§9, "Nested parse for embedded track"). It is `None` when the chunk was absent or its
/// nested parse failed (logged as a warning, not propagated to the outer parse's result).
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Replay {
    pub class_id: u32,
    pub nickname: Option<String>,
    pub driver_login: Option<String>,
    pub track: Option<Box<crate::Gbx>>,
}
