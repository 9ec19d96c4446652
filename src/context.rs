//! Parser-local side channels threaded through header and body handlers (§9).
//!
//! The reference implementation keeps this state as ad-hoc attributes on the top-level parser
//! object; here it is one value passed by `&mut` reference, with no globals and no
//! `thread_local!`.

use crate::entities::WaypointSpecialProperty;
use crate::error::ParseError;
use std::collections::HashMap;

/// Replay-header facts recorded by the header scanner (chunk `0x03093000`/`0x2403F000`) and
/// consumed later by body chunk `0x0309200E`'s tentative TM2 login read.
#[derive(Clone, Default, Debug)]
pub struct ReplayHeaderInfo {
    pub version: u32,
    pub nickname: Option<String>,
    pub driver_login: Option<String>,
}

/// State that flows laterally between the header scanner and the body chunk loop, and between
/// sibling chunk handlers within the body loop, for a single parse.
#[derive(Default, Debug)]
pub struct ParseContext {
    /// Community string read by header chunk `0x03043005`/`0x24003005`, attached to the
    /// `Challenge` entity once the body loop constructs it.
    pub community: Option<String>,
    pub replay_header: Option<ReplayHeaderInfo>,
    /// Single-slot waypoint register (§4.D, "Waypoint stacking"). Consumed (taken) by the next
    /// item that reads a waypoint; never itself inserted into the entity map.
    pub waypoint_register: Option<WaypointSpecialProperty>,
    /// Current node-reference recursion depth; compared against
    /// [`ParseOptions::max_node_depth`](crate::ParseOptions::max_node_depth) on every recursive
    /// descent.
    depth: u32,
    /// Named byte-range marks, published under well-known keys (`"map_name"`, `"mood"`, ...).
    marks: HashMap<String, (u64, u64)>,
}

impl ParseContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter one level of node-reference recursion, failing once `max_depth` is exceeded.
    ///
    /// Pairs with [`exit_node`](Self::exit_node), which the caller must invoke once the
    /// recursive descent returns (success or error) to restore the depth counter. This is a
    /// plain increment/decrement rather than an RAII guard borrowing `self`, so the caller
    /// remains free to pass `self` on by `&mut` into the recursive call in between.
    pub fn enter_node(&mut self, max_depth: u32) -> Result<(), ParseError> {
        if self.depth >= max_depth {
            return Err(ParseError::Framing(format!(
                "node recursion exceeded max depth {max_depth}"
            )));
        }
        self.depth += 1;
        Ok(())
    }

    /// Leave one level of node-reference recursion entered via [`enter_node`](Self::enter_node).
    pub fn exit_node(&mut self) {
        self.depth -= 1;
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Take the pending waypoint out of the register, clearing it.
    pub fn take_waypoint(&mut self) -> Option<WaypointSpecialProperty> {
        self.waypoint_register.take()
    }

    pub fn set_waypoint(&mut self, waypoint: WaypointSpecialProperty) {
        self.waypoint_register = Some(waypoint);
    }

    /// Publish a named mark over the outer (compressed-container) or body byte stream.
    pub fn publish_mark(&mut self, key: impl Into<String>, start: u64, len: u64) {
        self.marks.insert(key.into(), (start, len));
    }

    pub fn mark(&self, key: &str) -> Option<(u64, u64)> {
        self.marks.get(key).copied()
    }

    pub fn marks(&self) -> &HashMap<String, (u64, u64)> {
        &self.marks
    }
}
