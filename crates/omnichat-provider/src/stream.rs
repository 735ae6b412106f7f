//! Streaming delta computation.

/// Turns cumulative content snapshots into additive deltas.
///
/// Some providers resend the whole answer so far with every fragment. The
/// session contract only carries increments, so adapters fold each snapshot
/// through this state and forward what [`SnapshotDelta::next`] returns.
///
/// If a snapshot is shorter than what was already delivered, or the cursor no
/// longer falls on a character boundary, nothing is emitted and the cursor
/// moves to the end of the new snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDelta {
    cursor: usize,
}

impl SnapshotDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte length of the content delivered so far.
    pub fn delivered(&self) -> usize {
        self.cursor
    }

    /// Consume the next snapshot and return the part not yet delivered.
    pub fn next(&mut self, snapshot: &str) -> String {
        let delta = snapshot.get(self.cursor..).unwrap_or_default().to_string();
        self.cursor = snapshot.len();
        delta
    }
}

/// Fold a whole sequence of snapshots into their deltas.
pub fn snapshot_deltas<'a>(snapshots: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut state = SnapshotDelta::new();
    snapshots.into_iter().map(|s| state.next(s)).collect()
}
