use std::{collections::VecDeque, num::NonZeroUsize};

use comms::specs::{Minibatch, Partition, PerPartition};

/// Serves the minibatches of an epoch.
pub trait MinibatchSource {
    /// The amount of samples in every partition.
    fn class_lengths(&self) -> PerPartition<usize>;

    /// The next minibatch to process, `None` once the epoch has been fully served.
    fn next_minibatch(&mut self) -> Option<Minibatch>;

    /// Serves `minibatch` again before anything else, its result never arrived.
    fn requeue(&mut self, minibatch: Minibatch);

    /// Starts serving the next epoch.
    fn rewind(&mut self);
}

/// Serves every partition in order, in fixed size minibatches.
#[derive(Debug, Clone)]
pub struct SequentialLoader {
    class_lengths: PerPartition<usize>,
    minibatch_size: NonZeroUsize,
    partition: usize,
    served: usize,
    requeued: VecDeque<Minibatch>,
}

impl SequentialLoader {
    pub fn new(class_lengths: PerPartition<usize>, minibatch_size: NonZeroUsize) -> Self {
        Self {
            class_lengths,
            minibatch_size,
            partition: 0,
            served: 0,
            requeued: VecDeque::new(),
        }
    }

    /// Whether every partition has been served and nothing waits to be served again.
    pub fn is_exhausted(&self) -> bool {
        self.requeued.is_empty() && self.partition >= Partition::ALL.len()
    }

    fn start_of(&self, partition: Partition) -> usize {
        partition
            .preceding()
            .iter()
            .map(|&p| self.class_lengths[p])
            .sum()
    }
}

impl MinibatchSource for SequentialLoader {
    fn class_lengths(&self) -> PerPartition<usize> {
        self.class_lengths
    }

    fn next_minibatch(&mut self) -> Option<Minibatch> {
        if let Some(minibatch) = self.requeued.pop_front() {
            return Some(minibatch);
        }

        while let Some(&partition) = Partition::ALL.get(self.partition) {
            let len = self.class_lengths[partition];

            if self.served < len {
                let size = self.minibatch_size.get().min(len - self.served);
                self.served += size;

                return Some(Minibatch {
                    partition,
                    size,
                    offset: self.start_of(partition) + self.served,
                    last: self.served == len,
                });
            }

            self.partition += 1;
            self.served = 0;
        }

        None
    }

    fn requeue(&mut self, minibatch: Minibatch) {
        self.requeued.push_back(minibatch);
    }

    fn rewind(&mut self) {
        self.partition = 0;
        self.served = 0;
        self.requeued.clear();
    }
}
