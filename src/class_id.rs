//! The class id enumeration (§3, §6) and the legacy-alias table the dispatcher consults.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The kind of entity a 32-bit class id names.
///
/// Unrecognized ids are tolerated as [`ClassId::Unknown`] rather than failing the parse — see
/// the *Class ids fall in a known enumeration* invariant in §3.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ClassId {
    Challenge = 0x0304_3000,
    ChallengeOld = 0x2400_3000,
    CollectorList = 0x0301_B000,
    ChallengeParams = 0x0305_B000,
    BlockSkin = 0x0305_9000,
    WaypointSpecialProp = 0x0313_B000,
    ItemModel = 0x2E00_2000,
    ReplayRecord = 0x0309_3000,
    /// Legacy alias for [`ReplayRecord`](Self::ReplayRecord).
    ReplayRecordOld = 0x2407_E000,
    GameGhost = 0x0303_F005,
    CtnGhost = 0x0309_2000,
    CtnGhostOld = 0x2401_B000,
    CtnCollector = 0x0301_A000,
    CtnObjectInfo = 0x0301_C000,
    CtnDecoration = 0x0303_8000,
    CtnCollection = 0x0303_3000,
    GameSkin = 0x0303_1000,
    GamePlayerProfile = 0x0308_C000,
    MwNod = 0x0100_1000,
}

impl ClassId {
    /// Resolve a wire class id, falling back to `None` for anything not in the enumeration.
    ///
    /// Callers that need the invariant-preserving "unknown classes don't fail the parse"
    /// behavior should keep the raw `u32` alongside this, since an `Entity::Header` still needs
    /// to report the id it saw.
    pub fn from_wire(raw: u32) -> Option<Self> {
        Self::try_from(raw).ok()
    }
}
