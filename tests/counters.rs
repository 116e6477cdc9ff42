use availsim::dhash::{OracleKind, Placement, TotalRecallConfig, TotalRecallMode};
use availsim::{ChordId, DHash, Dht, Event, Policy, RepairTriggers, TotalRecall};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Deliver every scheduled copy due by `t`, then compare the maintained
/// counters with a full scan
fn settle<D: Dht>(dht: &mut D, pending: &mut Vec<Event>, t: u64) {
    pending.sort_by_key(|e| e.time);
    let due = pending.iter().take_while(|e| e.time <= t).count();
    for copy in pending.drain(..due).collect::<Vec<_>>() {
        let more = dht.process(&copy).unwrap();
        pending.extend(more);
    }
    dht.check_availability().unwrap();
    dht.ring().check_consistency().unwrap();

    let needed = dht.policy().read_pieces();
    let ring = dht.ring();
    let (readable, counts) = dht.available_blocks();
    assert_eq!(counts.len(), dht.blocks().len());
    if ring.is_empty() {
        assert_eq!(readable, 0);
    }
    assert!(counts.iter().filter(|&&c| c >= needed).count() == readable);
}

/// Random churn over a fixed id population, then every member leaves and a
/// few come back
fn churn_then_drain<D: Dht>(mut dht: D, seed: u64) -> D {
    let mut rng = StdRng::seed_from_u64(seed);
    let ids: Vec<ChordId> = (0..32).map(|_| rng.gen_range(0..1u64 << 16)).collect();
    let mut pending = Vec::new();
    let mut t = 0;

    for _ in 0..500 {
        t += 1;
        let id = ids[rng.gen_range(0..ids.len())];
        let ev = match rng.gen_range(0..10) {
            0..=4 if !dht.ring().is_alive(id) => Event::join(t, id),
            0..=4 => Event::insert(t, id, rng.gen_range(0..1u64 << 16), 7000),
            5..=6 => Event::fail(t, id),
            7 => Event::crash(t, id),
            _ => Event::insert(t, id, rng.gen_range(0..1u64 << 16), 7000),
        };
        let more = dht.process(&ev).unwrap();
        pending.extend(more);
        settle(&mut dht, &mut pending, t);
    }

    let members = dht.ring().alive_ids().to_vec();
    for id in members {
        t += 1;
        let ev = if rng.gen_bool(0.3) {
            Event::crash(t, id)
        } else {
            Event::fail(t, id)
        };
        let more = dht.process(&ev).unwrap();
        pending.extend(more);
        settle(&mut dht, &mut pending, t);
    }
    assert!(dht.ring().is_empty());
    assert_eq!(dht.available_blocks().0, 0);

    // Copies scheduled before the drain land on dead nodes and are dropped
    t += 1_000_000;
    settle(&mut dht, &mut pending, t);
    assert!(pending.is_empty());

    for &id in ids.iter().take(8) {
        if dht.ring().is_alive(id) {
            continue;
        }
        t += 1;
        let more = dht.process(&Event::join(t, id)).unwrap();
        pending.extend(more);
        settle(&mut dht, &mut pending, t);
    }
    dht
}

#[test]
fn dhash_counters_match_scan() {
    let policies = [
        (
            Policy::Replica {
                replicas: 3,
                maintain: true,
            },
            RepairTriggers::all(),
        ),
        (
            Policy::Fragments { dfrags: 2, efrags: 4 },
            RepairTriggers::join_and_crash(),
        ),
        (Policy::Cates, RepairTriggers::all()),
        (Policy::Cates, RepairTriggers::none()),
        (
            Policy::Oracle(OracleKind::Durability),
            RepairTriggers::none(),
        ),
        (
            Policy::Oracle(OracleKind::Availability),
            RepairTriggers::none(),
        ),
    ];
    for (policy, triggers) in policies {
        for seed in [1, 7, 42] {
            let dht = churn_then_drain(DHash::new(policy, triggers, 4096), seed);
            assert!(!dht.blocks().is_empty(), "{} seed {}", policy, seed);
        }
    }
}

#[test]
fn totalrecall_counters_match_scan() {
    let mut succ_lazy = TotalRecallConfig::lazy(2, 4);
    succ_lazy.placement = Placement::Successor;
    let mut succ_sostenuto = TotalRecallConfig::sostenuto(3);
    succ_sostenuto.placement = Placement::Successor;
    let oracle = TotalRecallConfig {
        mode: TotalRecallMode::SostenutoOracle,
        ..TotalRecallConfig::sostenuto(3)
    };
    for config in [
        TotalRecallConfig::lazy(2, 4),
        TotalRecallConfig::sostenuto(3),
        succ_lazy,
        succ_sostenuto,
        oracle,
    ] {
        for seed in [3, 11] {
            let dht = churn_then_drain(TotalRecall::new(config, 4096, seed), seed);
            assert!(!dht.blocks().is_empty());
        }
    }
}

#[test]
fn last_member_leaving_empties_every_block() {
    let mut dht = DHash::new(
        Policy::Replica {
            replicas: 3,
            maintain: true,
        },
        RepairTriggers::all(),
        1000,
    );
    dht.process(&Event::join(0, 10)).unwrap();
    dht.process(&Event::insert(1, 10, 5, 8192)).unwrap();
    dht.process(&Event::fail(2, 10)).unwrap();

    assert_eq!(dht.availability(5), Some(0));
    assert_eq!(dht.available_blocks(), (0, vec![0]));
    assert_eq!(dht.lost_blocks(), 1);
    dht.check_availability().unwrap();
}
