use std::{
    fmt::{self, Display},
    ops::{Index, IndexMut},
};

use serde::{Deserialize, Serialize};

/// One of the three dataset roles a minibatch is drawn from.
///
/// The declaration order is the order in which partitions are served within an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Eval,
    Validation,
    Train,
}

impl Partition {
    /// Every partition in serving order.
    pub const ALL: [Partition; 3] = [Partition::Eval, Partition::Validation, Partition::Train];

    /// The position of this partition inside a `PerPartition`.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The partitions served before this one within an epoch.
    pub fn preceding(self) -> &'static [Partition] {
        &Self::ALL[..self.index()]
    }

    pub const fn name(self) -> &'static str {
        match self {
            Partition::Eval => "eval",
            Partition::Validation => "validation",
            Partition::Train => "train",
        }
    }
}

impl Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fixed size array indexed by `Partition`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerPartition<T>([T; 3]);

impl<T> PerPartition<T> {
    /// Creates a new `PerPartition` from one value per partition.
    pub const fn new(eval: T, validation: T, train: T) -> Self {
        Self([eval, validation, train])
    }

    /// Creates a new `PerPartition` calling `f` once per partition, in serving order.
    pub fn from_fn<F>(mut f: F) -> Self
    where
        F: FnMut(Partition) -> T,
    {
        Self(Partition::ALL.map(&mut f))
    }

    /// Iterates every partition along with its value.
    pub fn iter(&self) -> impl Iterator<Item = (Partition, &T)> {
        Partition::ALL.into_iter().zip(&self.0)
    }

    /// Iterates the values in serving order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.0.iter()
    }

    /// Iterates the values mutably in serving order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.0.iter_mut()
    }
}

impl PerPartition<bool> {
    pub fn all(&self) -> bool {
        self.0.iter().all(|&flag| flag)
    }

    pub fn any(&self) -> bool {
        self.0.iter().any(|&flag| flag)
    }
}

impl<T> Index<Partition> for PerPartition<T> {
    type Output = T;

    fn index(&self, partition: Partition) -> &T {
        &self.0[partition.index()]
    }
}

impl<T> IndexMut<Partition> for PerPartition<T> {
    fn index_mut(&mut self, partition: Partition) -> &mut T {
        &mut self.0[partition.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serving_order() {
        assert!(Partition::Eval < Partition::Validation);
        assert!(Partition::Validation < Partition::Train);
        assert_eq!(Partition::Train.preceding(), &[Partition::Eval, Partition::Validation]);
        assert!(Partition::Eval.preceding().is_empty());
    }

    #[test]
    fn test_indexing() {
        let mut lengths = PerPartition::new(10, 10, 100);
        lengths[Partition::Train] += 1;

        assert_eq!(lengths[Partition::Eval], 10);
        assert_eq!(lengths[Partition::Train], 101);

        let names: Vec<_> = lengths.iter().map(|(p, _)| p.name()).collect();
        assert_eq!(names, ["eval", "validation", "train"]);
    }

    #[test]
    fn test_flags() {
        let mut flags = PerPartition::<bool>::default();
        assert!(!flags.any());

        flags[Partition::Validation] = true;
        assert!(flags.any() && !flags.all());

        flags.values_mut().for_each(|flag| *flag = true);
        assert!(flags.all());
    }

    #[test]
    fn test_json_is_a_plain_array() {
        let lengths = PerPartition::new(1, 2, 3);
        let json = serde_json::to_string(&lengths).unwrap();
        assert_eq!(json, "[1,2,3]");
    }
}
