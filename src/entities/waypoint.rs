//! The waypoint special-property node, kept in a single-slot register between header
//! production and item consumption (§4.D, "Waypoint stacking").

/// A `CGameWaypointSpecialProperty` node.
///
/// Legacy (version-1) nodes only carry a numeric `spawn`/`order` pair; TM2 nodes carry a `tag`
/// string instead. Both fields are kept so callers can branch on whichever was present.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WaypointSpecialProperty {
    pub class_id: u32,
    pub tag: Option<String>,
    pub order: u32,
    pub spawn: Option<u32>,
}
