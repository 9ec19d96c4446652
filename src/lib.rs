//! A GameBox (.Gbx) file reader for the TrackMania family of games (TMNF/TMUF/TM2).
//!
//! Parses challenges (maps), replays, and ghosts out of the GBX binary container format: see
//! [`Gbx::parse_file`] and friends for the entry points, and [`entities`] for the typed records
//! a parse produces.

#![allow(clippy::approx_constant)]

mod body;
mod class_id;
mod context;
mod decompress;
/// Entity kinds a class id can resolve to: challenges, replays, ghosts, and their sub-records.
pub mod entities;
/// Error handling types.
pub mod error;
mod gbx;
mod ghost_samples;
mod header;
mod options;
mod reader;
mod types;

pub use class_id::ClassId;
pub use entities::Entity;
pub use gbx::Gbx;
pub use options::ParseOptions;
pub use reader::{Mark, Reader};
pub use types::Vec3;
