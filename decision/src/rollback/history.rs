use std::collections::{HashMap, VecDeque};

use comms::specs::RollbackPoint;

use super::BufferKind;

/// Bounded checkpoints of every buffer of a single component, oldest first.
#[derive(Debug, Clone, Default)]
pub struct History {
    limit: usize,
    snapshots: HashMap<BufferKind, VecDeque<Vec<f32>>>,
}

impl History {
    /// Creates a new `History` keeping at most `limit` checkpoints per buffer.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            snapshots: HashMap::new(),
        }
    }

    /// Stores a copy of `data` as the newest checkpoint of `kind`, discarding the
    /// oldest ones past the limit.
    pub fn push(&mut self, kind: BufferKind, data: &[f32]) {
        let snapshots = self.snapshots.entry(kind).or_default();
        snapshots.push_back(data.to_vec());

        while snapshots.len() > self.limit {
            snapshots.pop_front();
        }
    }

    /// Picks the checkpoint of `kind` to restore.
    ///
    /// Restoring the oldest checkpoint drops every newer one.
    ///
    /// # Returns
    /// The checkpoint, or `None` if none was ever stored for `kind`.
    pub fn restore(&mut self, kind: BufferKind, point: RollbackPoint) -> Option<&[f32]> {
        let snapshots = self.snapshots.get_mut(&kind)?;

        let snapshot = match point {
            RollbackPoint::Latest => snapshots.back(),
            RollbackPoint::Oldest => {
                snapshots.truncate(1);
                snapshots.front()
            }
        };

        snapshot.map(Vec::as_slice)
    }

    pub fn depth(&self, kind: BufferKind) -> usize {
        self.snapshots.get(&kind).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut history = History::new(2);

        for v in 0..4 {
            history.push(BufferKind::Weights, &[v as f32]);
        }

        assert_eq!(history.depth(BufferKind::Weights), 2);
        assert_eq!(
            history.restore(BufferKind::Weights, RollbackPoint::Latest),
            Some(&[3.][..])
        );
        assert_eq!(history.depth(BufferKind::Weights), 2);
    }

    #[test]
    fn test_restore_oldest_truncates() {
        let mut history = History::new(2);
        history.push(BufferKind::Bias, &[1.]);
        history.push(BufferKind::Bias, &[2.]);

        assert_eq!(
            history.restore(BufferKind::Bias, RollbackPoint::Oldest),
            Some(&[1.][..])
        );
        assert_eq!(history.depth(BufferKind::Bias), 1);
    }

    #[test]
    fn test_missing_history() {
        let mut history = History::new(2);
        assert!(history.restore(BufferKind::GradientBias, RollbackPoint::Latest).is_none());
    }
}
