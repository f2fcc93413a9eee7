use comms::specs::{TieBreak, TieBreakSpec};

/// The value a track holds before anything has been observed.
pub const UNSET: f64 = 1.0e30;

/// The best validation value of one metric and the epoch it was observed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Track {
    pub min_validation: f64,
    pub min_validation_epoch: Option<usize>,
    /// The train value of the pass preceding the best validation.
    pub min_train: f64,
    tie_break: TieBreak,
}

impl Track {
    pub fn new(tie_break: TieBreak) -> Self {
        Self {
            min_validation: UNSET,
            min_validation_epoch: None,
            min_train: UNSET,
            tie_break,
        }
    }

    /// Offers an epoch's validation result to the track.
    ///
    /// # Arguments
    /// * `validation` - This epoch's validation value.
    /// * `train` - The train value of the last completed train pass.
    /// * `epoch` - The current epoch number.
    ///
    /// # Returns
    /// Whether the result improved on the best so far, in which case it becomes the new best.
    pub fn offer(&mut self, validation: f64, train: f64, epoch: usize) -> bool {
        let tie_won = match self.tie_break {
            TieBreak::LowerTrain => train < self.min_train,
            TieBreak::HigherTrain => train > self.min_train,
            TieBreak::Disabled => false,
        };

        if validation < self.min_validation || (validation == self.min_validation && tie_won) {
            self.min_validation = validation;
            self.min_validation_epoch = Some(epoch);
            self.min_train = train;
            return true;
        }

        false
    }

    /// Amount of epochs elapsed since the best validation value was observed.
    pub fn fail_streak(&self, epoch: usize) -> usize {
        match self.min_validation_epoch {
            Some(best) => epoch.saturating_sub(best),
            None => epoch + 1,
        }
    }

    pub fn reached_zero(&self) -> bool {
        self.min_validation <= 0.
    }
}

/// Best so far record for the loss and the error count tracks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestRecord {
    pub loss: Track,
    pub errors: Track,
}

impl BestRecord {
    pub fn new(tie_break: TieBreakSpec) -> Self {
        Self {
            loss: Track::new(tie_break.loss),
            errors: Track::new(tie_break.errors),
        }
    }

    /// Whether both tracks went more than `patience` epochs without improving.
    pub fn stalled(&self, epoch: usize, patience: usize) -> bool {
        self.loss.fail_streak(epoch) > patience && self.errors.fail_streak(epoch) > patience
    }
}

impl Default for BestRecord {
    fn default() -> Self {
        Self::new(TieBreakSpec::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_lower_improves() {
        let mut track = Track::new(TieBreak::LowerTrain);

        assert!(track.offer(0.5, 0.4, 0));
        assert!(!track.offer(0.6, 0.1, 1));
        assert!(track.offer(0.3, 0.9, 2));
        assert_eq!(track.min_validation_epoch, Some(2));
        assert_eq!(track.min_train, 0.9);
    }

    #[test]
    fn test_tie_breaks() {
        let mut lower = Track::new(TieBreak::LowerTrain);
        lower.offer(0.5, 0.4, 0);
        assert!(!lower.offer(0.5, 0.4, 1));
        assert!(lower.offer(0.5, 0.3, 2));

        let mut higher = Track::new(TieBreak::HigherTrain);
        higher.offer(0.5, 0.4, 0);
        assert!(!higher.offer(0.5, 0.3, 1));
        assert!(higher.offer(0.5, 0.6, 2));

        let mut disabled = Track::new(TieBreak::Disabled);
        disabled.offer(0.5, 0.4, 0);
        assert!(!disabled.offer(0.5, 0.0, 1));
    }

    #[test]
    fn test_fail_streak() {
        let mut track = Track::new(TieBreak::LowerTrain);
        assert_eq!(track.fail_streak(0), 1);

        track.offer(1.0, 1.0, 3);
        assert_eq!(track.fail_streak(3), 0);
        assert_eq!(track.fail_streak(7), 4);
    }

    #[test]
    fn test_stall_needs_both_tracks() {
        let mut record = BestRecord::default();
        record.loss.offer(0.5, 0.5, 0);
        record.errors.offer(5., 5., 0);
        record.loss.offer(0.4, 0.5, 5);

        assert!(!record.stalled(6, 2));
        assert!(record.stalled(8, 2));
    }
}
