use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use keystone_governance::VotingLedger;
use keystone_types::Address;

/// One delegate with `n` checkpoints, one per tick starting at 1.
fn ledger_with_history(n: u64) -> (VotingLedger, Address) {
    let mut ledger = VotingLedger::new();
    let holder = Address::derive(b"holder");
    ledger.delegate(holder, holder, 0).unwrap();
    for tick in 1..=n {
        ledger.mint(holder, 1, tick).unwrap();
    }
    (ledger, holder)
}

fn bench_prior_votes(c: &mut Criterion) {
    let mut group = c.benchmark_group("checkpoints_prior_votes");

    for size in [16u64, 1_024, 65_536] {
        let (ledger, holder) = ledger_with_history(size);
        let now = size + 1;
        group.bench_function(format!("lookup_{size}"), |b| {
            let mut tick = 0;
            b.iter(|| {
                tick = (tick + 7_919) % now;
                black_box(ledger.get_prior_votes(&holder, tick, now).unwrap())
            })
        });
    }

    group.finish();
}

fn bench_weight_moves(c: &mut Criterion) {
    let mut group = c.benchmark_group("checkpoints_moves");

    group.bench_function("transfer_between_delegates", |b| {
        b.iter_batched(
            || {
                let mut ledger = VotingLedger::new();
                let from = Address::derive(b"from");
                let to = Address::derive(b"to");
                ledger.mint(from, 1_000_000, 0).unwrap();
                ledger.delegate(from, from, 0).unwrap();
                ledger.delegate(to, to, 0).unwrap();
                (ledger, from, to)
            },
            |(mut ledger, from, to)| {
                for tick in 1..=100 {
                    ledger.transfer(from, to, 1, tick).unwrap();
                }
                black_box(ledger.num_checkpoints(&to))
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("redelegate", |b| {
        b.iter_batched(
            || {
                let mut ledger = VotingLedger::new();
                let holder = Address::derive(b"holder");
                ledger.mint(holder, 1_000_000, 0).unwrap();
                let delegates: Vec<Address> = (0u32..8)
                    .map(|i| Address::derive(&i.to_be_bytes()))
                    .collect();
                (ledger, holder, delegates)
            },
            |(mut ledger, holder, delegates)| {
                for (tick, delegate) in (1..).zip(delegates.iter().cycle().take(100)) {
                    ledger.delegate(holder, *delegate, tick).unwrap();
                }
                black_box(ledger.get_current_votes(&holder))
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_prior_votes, bench_weight_moves);
criterion_main!(benches);
