//! The `CGameCtnCollector` track-name side entity (header chunk `0x03043003`).

/// A standalone `track_name` record, stored under its own class id in the root-entity map.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Common {
    pub class_id: u32,
    pub track_name: Option<String>,
}
