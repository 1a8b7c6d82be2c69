mod util;

use serial_test::serial;
use sparse_alltoall::prelude::*;
use util::{all_configs, all_count_strategies, all_ok};

/// Rank 0 sends 2 items each to ranks 1 and 3; nobody else sends.
fn fixed_scenario(rank: usize) -> (CountTable, ProcessList) {
    match rank {
        0 => (CountTable::from_pairs([(1, 2), (3, 2)]), ProcessList::empty()),
        1 | 3 => (CountTable::empty(), ProcessList::new([0])),
        _ => (CountTable::empty(), ProcessList::empty()),
    }
}

#[test]
fn fixed_scenario_on_every_strategy() {
    let group = LocalGroup::new(4);
    for strategy in all_count_strategies() {
        let got = all_ok(group.run(|comm| {
            let (send, recv) = fixed_scenario(comm.rank());
            resolve_receive_counts_with(strategy, &send, &recv, &comm, CommTag(0x100))
        }));
        assert!(got[0].is_empty(), "{strategy:?}");
        assert!(got[2].is_empty(), "{strategy:?}");
        for r in [1, 3] {
            assert_eq!(got[r].get(0), Some(2), "{strategy:?} rank {r}");
            assert_eq!(got[r].len(), 1);
        }
    }
}

#[test]
fn fixed_scenario_on_every_config() {
    let group = LocalGroup::new(4);
    for cfg in all_configs() {
        let got = all_ok(group.run(|comm| {
            let (send, recv) = fixed_scenario(comm.rank());
            resolve_receive_counts(&send, &recv, &comm, &cfg)
        }));
        assert_eq!(got[1].counts(), &[2], "{}", cfg.strategy);
        assert_eq!(got[3].counts(), &[2], "{}", cfg.strategy);
    }
}

#[test]
fn listed_silent_sender_resolves_to_zero_on_group_wide_strategies() {
    let group = LocalGroup::new(3);
    for strategy in [CountStrategy::Dense, CountStrategy::TwoStep] {
        let got = all_ok(group.run(|comm| {
            // rank 2 expects to hear from rank 1, which sends nothing
            let (send, recv) = match comm.rank() {
                0 => (CountTable::from_pairs([(2, 4)]), ProcessList::empty()),
                2 => (CountTable::empty(), ProcessList::new([1, 0])),
                _ => (CountTable::empty(), ProcessList::empty()),
            };
            resolve_receive_counts_with(strategy, &send, &recv, &comm, CommTag(0x110))
        }));
        assert_eq!(got[2].counts(), &[0, 4]);
    }
}

#[test]
fn group_of_one_resolves_its_own_count() {
    let send = CountTable::from_pairs([(0, 7)]);
    let recv = ProcessList::new([0]);
    for cfg in all_configs() {
        if cfg.strategy == Strategy::OneSided || cfg.proclist_method == ProclistMethod::Put {
            continue;
        }
        let got = resolve_receive_counts(&send, &recv, &NoComm, &cfg).unwrap();
        assert_eq!(got.get(0), Some(7));
    }
    // the in-process backend does support windows
    let group = LocalGroup::new(1);
    for strategy in all_count_strategies() {
        let got = all_ok(group.run(|comm| {
            resolve_receive_counts_with(strategy, &send, &recv, &comm, CommTag(0x120))
        }));
        assert_eq!(got[0].get(0), Some(7), "{strategy:?}");
    }
}

#[test]
fn empty_lists_resolve_empty() {
    let group = LocalGroup::new(5);
    for strategy in all_count_strategies() {
        let got = all_ok(group.run(|comm| {
            resolve_receive_counts_with(
                strategy,
                &CountTable::empty(),
                &ProcessList::empty(),
                &comm,
                CommTag(0x130),
            )
        }));
        assert!(got.iter().all(CountTable::is_empty));
    }
}

#[test]
fn malformed_lists_fail_before_communicating() {
    // a single participant of a larger group: if anything were posted the
    // call would block, so returning at all proves nothing was sent
    let group = LocalGroup::new(4);
    let comm = group.comm(2);
    let cfg = ExchangeConfig::with_strategy(Strategy::Dense);

    let dup = CountTable::from_pairs([(1, 1), (1, 2)]);
    let err = resolve_receive_counts(&dup, &ProcessList::empty(), &comm, &cfg).unwrap_err();
    assert!(matches!(
        err,
        ExchangeError::DuplicatePeer {
            peer: 1,
            role: ListRole::Send
        }
    ));

    let far = ProcessList::new([0, 4]);
    let err = resolve_receive_counts(&CountTable::empty(), &far, &comm, &cfg).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(err.peer(), Some(4));
}

#[test]
fn unlisted_sender_is_a_protocol_error() {
    let group = LocalGroup::new(3);
    let got = group.run(|comm| {
        // rank 0 sends to rank 1, which does not list it
        let send = if comm.rank() == 0 {
            CountTable::from_pairs([(1, 5)])
        } else {
            CountTable::empty()
        };
        resolve_receive_counts_with(
            CountStrategy::Dense,
            &send,
            &ProcessList::empty(),
            &comm,
            CommTag(0x140),
        )
    });
    let e = got[1].as_ref().unwrap_err();
    assert_eq!((e.kind(), e.peer()), (ErrorKind::Protocol, Some(0)));
    assert!(got[0].is_ok() && got[2].is_ok());
}

#[test]
fn two_phase_puts_need_opt_in() {
    let mut cfg = ExchangeConfig::with_strategy(Strategy::OneSided);
    cfg.put.phases = PutPhases::Two;
    let err = resolve_receive_counts(&CountTable::empty(), &ProcessList::empty(), &NoComm, &cfg)
        .unwrap_err();
    assert!(matches!(err, ExchangeError::InvalidConfig(_)));
}

#[test]
fn put_without_windows_is_unsupported() {
    let cfg = ExchangeConfig::with_strategy(Strategy::OneSided);
    let err = resolve_receive_counts(&CountTable::empty(), &ProcessList::empty(), &NoComm, &cfg)
        .unwrap_err();
    assert!(matches!(err, ExchangeError::Unsupported(_)));
    let err = resolve_receive_counts_with(
        CountStrategy::Put {
            scope: PutScope::Listed,
            config: PutConfig::default(),
        },
        &CountTable::empty(),
        &ProcessList::empty(),
        &NoComm,
        CommTag::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn prime_group_sizes() {
    for size in [2, 5, 7, 11] {
        let group = LocalGroup::new(size);
        for strategy in [CountStrategy::TwoStep, CountStrategy::Dense] {
            let got = all_ok(group.run(|comm| {
                let me = comm.rank();
                let send = CountTable::from_pairs([((me + 2) % size, me)]);
                let recv = ProcessList::new([(me + size - 2) % size]);
                resolve_receive_counts_with(strategy, &send, &recv, &comm, CommTag(0x150))
            }));
            for (me, table) in got.iter().enumerate() {
                assert_eq!(table.counts(), &[(me + size - 2) % size], "P={size}");
            }
        }
    }
}

#[test]
fn successive_calls_reuse_the_group() {
    let group = LocalGroup::new(4);
    let cfg = ExchangeConfig::with_strategy(Strategy::OneSided);
    let got = all_ok(group.run(|comm| {
        let mut tables = Vec::new();
        for round in 0..3 {
            let (send, recv) = fixed_scenario(comm.rank());
            let send = CountTable::new(
                send.peers().clone(),
                send.counts().iter().map(|c| c + round).collect(),
            )?;
            tables.push(resolve_receive_counts(&send, &recv, &comm, &cfg)?);
        }
        Ok::<_, ExchangeError>(tables)
    }));
    for round in 0..3 {
        assert_eq!(got[1][round].counts(), &[2 + round]);
    }
}

#[test]
#[serial]
fn two_step_on_a_large_group() {
    let size = 64;
    let group = LocalGroup::new(size);
    let cfg = ExchangeConfig::default();
    let got = all_ok(group.run(|comm| {
        let me = comm.rank();
        // every rank sends to half the group, which keeps auto off the sparse path
        let peers: Vec<usize> = (0..size).filter(|q| (q + me) % 2 == 0).collect();
        let send = CountTable::from_pairs(peers.iter().map(|&q| (q, q + me)));
        let recv = ProcessList::new(peers);
        let pick = sparse_alltoall::select(send.len(), recv.len(), &comm, &cfg)?;
        let counts = resolve_receive_counts(&send, &recv, &comm, &cfg)?;
        Ok::<_, ExchangeError>((pick.counts, counts))
    }));
    for (me, (pick, counts)) in got.iter().enumerate() {
        assert_eq!(*pick, CountStrategy::TwoStep);
        for (q, c) in counts.iter() {
            assert_eq!(c, me + q);
        }
    }
}

#[test]
fn broken_link_in_two_step_fails_every_rank() {
    let group = LocalGroup::new(9);
    // 3x3 grid: ranks 3 and 4 share a row
    group.fail_link(3, 4);
    let got = group.run(|comm| {
        let me = comm.rank();
        let send = CountTable::from_pairs([((me + 1) % 9, 1)]);
        let recv = ProcessList::new([(me + 8) % 9]);
        resolve_receive_counts_with(CountStrategy::TwoStep, &send, &recv, &comm, CommTag(0x120))
    });
    assert_eq!(got[3].as_ref().unwrap_err().peer(), Some(4));
    assert_eq!(got[4].as_ref().unwrap_err().peer(), Some(3));
    for (rank, r) in got.iter().enumerate() {
        // column-mates of 3 and 4 learn of the failure; the last column is untouched
        if rank % 3 == 2 {
            assert!(r.is_ok(), "rank {rank}");
        } else {
            let err = r.as_ref().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Communication, "rank {rank}");
        }
    }
}

#[test]
fn broken_link_during_auto_selection_fails_every_rank() {
    // above the small-group cutoff, auto reduces the widest list first
    let size = 10;
    let group = LocalGroup::new(size);
    group.fail_link(1, 0);
    let cfg = ExchangeConfig::default();
    let got = group.run(|comm| {
        let me = comm.rank();
        let send = CountTable::from_pairs([((me + 1) % size, 2)]);
        let recv = ProcessList::new([(me + size - 1) % size]);
        resolve_receive_counts(&send, &recv, &comm, &cfg)
    });
    for (rank, r) in got.iter().enumerate() {
        let err = r.as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Communication, "rank {rank}");
    }

    group.heal();
    let got = all_ok(group.run(|comm| {
        let me = comm.rank();
        let send = CountTable::from_pairs([((me + 1) % size, 2)]);
        let recv = ProcessList::new([(me + size - 1) % size]);
        resolve_receive_counts(&send, &recv, &comm, &cfg)
    }));
    for table in &got {
        assert_eq!(table.counts(), &[2]);
    }
}
