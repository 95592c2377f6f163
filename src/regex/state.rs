use std::rc::Weak;

use crate::regex::adapter::MatchState;
use crate::values::scalar::ScalarCell;

/// An opaque snapshot of the regex engine adapter's mutable state: the
/// last-match record (subject, pattern, capture offsets) and the `pos()`
/// attribute of every variable the adapter has touched.
///
/// The interpreter takes one of these around every `eval` frame and
/// restores it on the way out, on both the normal and the exceptional
/// path, so `$1..$n`, `$&` and `pos()` observed after the eval equal what
/// they were immediately before it.
#[derive(Debug)]
pub struct RegexSnapshot {
    pub(crate) last_match: Option<MatchState>,
    pub(crate) pos: Vec<(Weak<ScalarCell>, Option<usize>)>,
}

impl RegexSnapshot {
    /// Reinstates the saved `pos()` on every cell that is still alive.
    pub(crate) fn restore_positions(&self) {
        for (cell, saved) in &self.pos {
            if let Some(cell) = cell.upgrade() {
                cell.set_pos(*saved);
            }
        }
    }
}
