//! Parse-time tunables.

/// Options controlling how a GBX file is parsed.
///
/// There is no persisted configuration in this crate — the only tunable is the recursion guard
/// named by the concurrency & resource model, exposed the way the teacher crate exposes reader
/// options, through a small builder.
#[derive(Clone, Copy, Debug)]
pub struct ParseOptions {
    max_node_depth: u32,
}

impl ParseOptions {
    /// Suggested default maximum node recursion depth.
    pub const DEFAULT_MAX_NODE_DEPTH: u32 = 64;

    /// Set the maximum node recursion depth.
    ///
    /// Exceeding this depth yields [`ParseError::Framing`](crate::error::ParseError::Framing).
    pub fn max_node_depth(mut self, max_node_depth: u32) -> Self {
        self.max_node_depth = max_node_depth;
        self
    }

    pub(crate) fn max_node_depth_value(&self) -> u32 {
        self.max_node_depth
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_node_depth: Self::DEFAULT_MAX_NODE_DEPTH,
        }
    }
}
