//! Ghost and driven-replay entities (§3 `Ghost`/`CtnGhost`/`GhostSample`/`ControlEntry`).

use crate::types::Vec3;

/// One decoded ghost replay sample (§4.F).
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GhostSample {
    pub position: Vec3<f32>,
    pub angle: u16,
    pub axis_heading: i16,
    pub axis_pitch: i16,
    pub speed: i16,
    pub vel_heading: i8,
    pub vel_pitch: i8,
    pub raw_data: Vec<u8>,
}

impl GhostSample {
    /// The speed the in-game HUD would show, in km/h.
    ///
    /// `0x8000` ("idle") always displays as zero; otherwise it's the exponential speed encoding
    /// the game uses, truncated toward zero and clamped to the display range.
    pub fn display_speed(&self) -> i32 {
        if self.speed as u16 == 0x8000 {
            return 0;
        }

        let value = ((self.speed as f64) / 1000.0).exp() * 3.6;
        value.abs().trunc().clamp(0.0, 1000.0) as i32
    }

    /// The block coordinate containing this sample, given the collision-box offset of the car.
    ///
    /// Block sizes are fixed at 32×8×32 map units on every surface the format supports.
    pub fn block_position(&self, x_off: f32, y_off: f32, z_off: f32) -> Vec3<i32> {
        const BLOCK_SIZE_XZ: f32 = 32.0;
        const BLOCK_SIZE_Y: f32 = 8.0;

        Vec3::new(
            ((self.position.x + x_off) / BLOCK_SIZE_XZ).trunc() as i32,
            ((self.position.y + y_off) / BLOCK_SIZE_Y).trunc() as i32,
            ((self.position.z + z_off) / BLOCK_SIZE_XZ).trunc() as i32,
        )
    }
}

/// One recorded control-input event (§4.E.1).
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControlEntry {
    /// Milliseconds since race start; the wire's `raw_time - 100000` bias already applied.
    pub time: i32,
    pub event_name: String,
    pub enabled: u16,
    pub flags: u16,
}

/// A bare `CGameGhost` node: sample stream with no race metadata.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ghost {
    pub class_id: u32,
    pub sample_period: u32,
    pub samples: Vec<GhostSample>,
}

/// A `CGameCtnGhost` node: a ghost driven in the context of a specific challenge.
#[derive(Clone, PartialEq, Default, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CtnGhost {
    pub class_id: u32,
    pub ghost: Ghost,
    pub race_time: u32,
    pub num_respawns: u32,
    pub stunts_score: u32,
    pub light_trail_color: Vec3<f32>,
    pub login: Option<String>,
    pub uid: String,
    pub checkpoint_times: Vec<u32>,
    pub control_names: Vec<String>,
    pub control_entries: Vec<ControlEntry>,
    pub game_version: String,
    pub events_duration: u32,
    pub is_maniaplanet: bool,
}
