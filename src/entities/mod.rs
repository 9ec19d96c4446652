//! The closed set of entity kinds a class id can resolve to (§9, "Duck-typed entities").
//!
//! The reference implementation mutates attributes on generic objects; here every node a chunk
//! loop can produce is one variant of a closed enum, and handlers reach into the variant they
//! need through the `as_*_mut` accessors below rather than duck-typed attribute access.

pub mod challenge;
pub mod collector_list;
pub mod common;
pub mod ghost;
pub mod replay;
pub mod waypoint;

pub use challenge::{BlockItem, Challenge, MapBlock, MedalTimes};
pub use collector_list::{CollectorList, CollectorStock};
pub use common::Common;
pub use ghost::{ControlEntry, CtnGhost, Ghost, GhostSample};
pub use replay::Replay;
pub use waypoint::WaypointSpecialProperty;

/// A node recovered from either the header user-data section or the decompressed body.
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Entity {
    /// A class id with no more specific representation; carries only the id that was seen.
    Header { class_id: u32 },
    Challenge(Challenge),
    Replay(Replay),
    Ghost(Ghost),
    CtnGhost(CtnGhost),
    WaypointSpecialProperty(WaypointSpecialProperty),
    CollectorList(CollectorList),
    Common(Common),
}

impl Entity {
    /// The wire class id this entity was constructed for (may be a legacy alias id).
    pub fn class_id(&self) -> u32 {
        match self {
            Entity::Header { class_id } => *class_id,
            Entity::Challenge(v) => v.class_id,
            Entity::Replay(v) => v.class_id,
            Entity::Ghost(v) => v.class_id,
            Entity::CtnGhost(v) => v.class_id,
            Entity::WaypointSpecialProperty(v) => v.class_id,
            Entity::CollectorList(v) => v.class_id,
            Entity::Common(v) => v.class_id,
        }
    }

    pub fn as_challenge(&self) -> Option<&Challenge> {
        match self {
            Entity::Challenge(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_challenge_mut(&mut self) -> Option<&mut Challenge> {
        match self {
            Entity::Challenge(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_replay(&self) -> Option<&Replay> {
        match self {
            Entity::Replay(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_replay_mut(&mut self) -> Option<&mut Replay> {
        match self {
            Entity::Replay(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ghost(&self) -> Option<&Ghost> {
        match self {
            Entity::Ghost(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ghost_mut(&mut self) -> Option<&mut Ghost> {
        match self {
            Entity::Ghost(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ctn_ghost(&self) -> Option<&CtnGhost> {
        match self {
            Entity::CtnGhost(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ctn_ghost_mut(&mut self) -> Option<&mut CtnGhost> {
        match self {
            Entity::CtnGhost(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_waypoint(&self) -> Option<&WaypointSpecialProperty> {
        match self {
            Entity::WaypointSpecialProperty(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_collector_list_mut(&mut self) -> Option<&mut CollectorList> {
        match self {
            Entity::CollectorList(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_common_mut(&mut self) -> Option<&mut Common> {
        match self {
            Entity::Common(v) => Some(v),
            _ => None,
        }
    }
}
