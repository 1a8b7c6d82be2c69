#![allow(dead_code)]
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sparse_alltoall::prelude::*;

/// Every concrete count algorithm, one-sided variants in all memory × phase
/// combinations.
pub fn all_count_strategies() -> Vec<CountStrategy> {
    let mut out = vec![
        CountStrategy::Dense,
        CountStrategy::TwoStep,
        CountStrategy::Proclists(ListedMethod::IsendIrecv),
        CountStrategy::Proclists(ListedMethod::Alltoallv),
    ];
    for scope in [PutScope::Group, PutScope::Listed] {
        for memory in [WindowMemory::Dedicated, WindowMemory::Caller] {
            for phases in [PutPhases::Two, PutPhases::Three] {
                out.push(CountStrategy::Put {
                    scope,
                    config: PutConfig { memory, phases },
                });
            }
        }
    }
    out
}

/// One configuration per user-facing strategy, put variants included.
pub fn all_configs() -> Vec<ExchangeConfig> {
    let mut out: Vec<ExchangeConfig> = Strategy::ALL
        .into_iter()
        .map(ExchangeConfig::with_strategy)
        .collect();
    for method in [ProclistMethod::Alltoallv, ProclistMethod::Put] {
        out.push(ExchangeConfig {
            strategy: Strategy::ProclistRestricted,
            proclist_method: method,
            ..Default::default()
        });
    }
    out.push(ExchangeConfig {
        strategy: Strategy::OneSided,
        put: PutConfig {
            memory: WindowMemory::Caller,
            phases: PutPhases::Two,
        },
        allow_two_phase: true,
        ..Default::default()
    });
    out
}

/// Who sends how much to whom: `counts[src][dst]`, `None` when `src` does not
/// list `dst`.
#[derive(Clone, Debug)]
pub struct Pattern {
    pub counts: Vec<Vec<Option<usize>>>,
    /// Seed for the receive-list order.
    pub seed: u64,
}

impl Pattern {
    pub fn size(&self) -> usize {
        self.counts.len()
    }

    pub fn send(&self, rank: usize) -> CountTable {
        CountTable::from_pairs(
            self.counts[rank]
                .iter()
                .enumerate()
                .filter_map(|(dst, c)| c.map(|c| (dst, c))),
        )
    }

    /// Every sender that lists `rank`, in a seeded shuffled order.
    pub fn receive_list(&self, rank: usize) -> ProcessList {
        let mut peers: Vec<usize> = (0..self.size())
            .filter(|&src| self.counts[src][rank].is_some())
            .collect();
        let mut rng = SmallRng::seed_from_u64(self.seed ^ rank as u64);
        peers.shuffle(&mut rng);
        ProcessList::from(peers)
    }

    /// What `rank` should resolve for its receive-list.
    pub fn expected(&self, rank: usize) -> CountTable {
        let list = self.receive_list(rank);
        let counts = list
            .iter()
            .map(|src| self.counts[src][rank].unwrap_or(0))
            .collect();
        CountTable::new(list, counts).unwrap()
    }
}

/// Unwrap every participant's result, naming the rank that failed.
pub fn all_ok<T>(results: Vec<Result<T, ExchangeError>>) -> Vec<T> {
    results
        .into_iter()
        .enumerate()
        .map(|(rank, r)| r.unwrap_or_else(|e| panic!("rank {rank} failed: {e}")))
        .collect()
}
