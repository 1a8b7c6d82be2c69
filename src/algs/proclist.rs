//! Process lists and per-peer count tables.
//!
//! A [`ProcessList`] names the peers one participant sends to (or expects to
//! receive from), in the order its segments are laid out. A [`CountTable`]
//! pairs such a list with one item count per peer; segment offsets are the
//! prefix sums of the counts in list order.

use crate::debug_invariants::DebugInvariants;
use crate::exchange_error::{ExchangeError, ListRole};
use itertools::Itertools;

/// Ordered list of distinct peer ranks.
///
/// Construction does not validate; [`validate`](Self::validate) checks the
/// list against a group before any communication starts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProcessList {
    peers: Vec<usize>,
}

impl ProcessList {
    pub fn new(peers: impl IntoIterator<Item = usize>) -> Self {
        Self {
            peers: peers.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Every member of a group of `size`, in rank order.
    pub fn full(size: usize) -> Self {
        Self::new(0..size)
    }

    /// Build and validate in one step.
    pub fn try_new(
        peers: impl IntoIterator<Item = usize>,
        group_size: usize,
        role: ListRole,
    ) -> Result<Self, ExchangeError> {
        let list = Self::new(peers);
        list.validate(group_size, role)?;
        Ok(list)
    }

    /// # Errors
    /// `PeerOutOfGroup` for a rank `>= group_size`, `DuplicatePeer` for a
    /// rank listed twice.
    pub fn validate(&self, group_size: usize, role: ListRole) -> Result<(), ExchangeError> {
        if let Some(&peer) = self.peers.iter().find(|&&p| p >= group_size) {
            return Err(ExchangeError::PeerOutOfGroup { peer, group_size });
        }
        if let Some(peer) = self.peers.iter().copied().duplicates().next() {
            return Err(ExchangeError::DuplicatePeer { peer, role });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.peers
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.peers.iter().copied()
    }

    pub fn contains(&self, peer: usize) -> bool {
        self.peers.contains(&peer)
    }

    pub fn position(&self, peer: usize) -> Option<usize> {
        self.peers.iter().position(|&p| p == peer)
    }
}

impl FromIterator<usize> for ProcessList {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl From<Vec<usize>> for ProcessList {
    fn from(peers: Vec<usize>) -> Self {
        Self { peers }
    }
}

impl DebugInvariants for ProcessList {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "ProcessList");
    }

    fn validate_invariants(&self) -> Result<(), ExchangeError> {
        self.validate(usize::MAX, ListRole::Send)
    }
}

/// Item count per peer, aligned with a [`ProcessList`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CountTable {
    peers: ProcessList,
    counts: Vec<usize>,
}

impl CountTable {
    /// # Errors
    /// `CountLengthMismatch` if `counts` is not one entry per peer.
    pub fn new(peers: ProcessList, counts: Vec<usize>) -> Result<Self, ExchangeError> {
        if peers.len() != counts.len() {
            return Err(ExchangeError::CountLengthMismatch {
                expected: peers.len(),
                found: counts.len(),
            });
        }
        Ok(Self { peers, counts })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Same `count` for every peer of `peers`.
    pub fn uniform(peers: ProcessList, count: usize) -> Self {
        let counts = vec![count; peers.len()];
        Self { peers, counts }
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (usize, usize)>) -> Self {
        let (peers, counts): (Vec<usize>, Vec<usize>) = pairs.into_iter().unzip();
        Self {
            peers: peers.into(),
            counts,
        }
    }

    pub fn peers(&self) -> &ProcessList {
        &self.peers
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Count for `peer`, if listed.
    pub fn get(&self, peer: usize) -> Option<usize> {
        self.peers.position(peer).map(|i| self.counts[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.peers.iter().zip(self.counts.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Prefix sums of the counts: `offsets[i]..offsets[i + 1]` is peer `i`'s
    /// segment, `offsets.len() == len() + 1`.
    pub fn offsets(&self) -> Vec<usize> {
        std::iter::once(0)
            .chain(self.counts.iter().scan(0usize, |acc, &c| {
                *acc += c;
                Some(*acc)
            }))
            .collect()
    }
}

impl DebugInvariants for CountTable {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "CountTable");
    }

    fn validate_invariants(&self) -> Result<(), ExchangeError> {
        if self.peers.len() != self.counts.len() {
            return Err(ExchangeError::CountLengthMismatch {
                expected: self.peers.len(),
                found: self.counts.len(),
            });
        }
        self.peers.validate_invariants()
    }
}

/// Validate both lists of one participant against a group of `size`.
pub fn validate_lists(
    send: &ProcessList,
    receive: &ProcessList,
    size: usize,
) -> Result<(), ExchangeError> {
    send.validate(size, ListRole::Send)?;
    receive.validate(size, ListRole::Receive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange_error::ErrorKind;

    #[test]
    fn duplicates_and_strangers_are_rejected() {
        let dup = ProcessList::new([1, 2, 1]);
        assert!(matches!(
            dup.validate(4, ListRole::Receive),
            Err(ExchangeError::DuplicatePeer {
                peer: 1,
                role: ListRole::Receive
            })
        ));
        let far = ProcessList::new([0, 9]);
        let err = far.validate(4, ListRole::Send).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.peer(), Some(9));
        assert!(ProcessList::empty().validate(1, ListRole::Send).is_ok());
    }

    #[test]
    fn offsets_are_prefix_sums_in_list_order() {
        let t = CountTable::new(ProcessList::new([3, 1, 2]), vec![2, 0, 5]).unwrap();
        assert_eq!(t.offsets(), vec![0, 2, 2, 7]);
        assert_eq!(t.total(), 7);
        assert_eq!(t.get(2), Some(5));
        assert_eq!(t.get(0), None);
        assert_eq!(CountTable::empty().offsets(), vec![0]);
    }

    #[test]
    fn length_mismatch() {
        let err = CountTable::new(ProcessList::new([0, 1]), vec![1]).unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::CountLengthMismatch {
                expected: 2,
                found: 1
            }
        ));
    }
}
