use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use keystone_governance::{
    Action, Deployment, Governance, GovernanceConfig, GovernorConfig, ProposalActions,
    RecordingExecutor,
};
use keystone_types::Address;

const VOTERS: u8 = 32;

fn config() -> GovernanceConfig {
    GovernanceConfig {
        governor: GovernorConfig {
            voting_delay: 1,
            voting_period: 10,
            proposal_threshold: 10,
            quorum_votes: 100,
            max_actions_per_proposal: 10,
        },
        ..Default::default()
    }
}

fn voter(i: u8) -> Address {
    Address::derive(&[b'v', i])
}

/// Deployment with `VOTERS` self-delegated holders at tick 1.
fn deployment() -> Governance<RecordingExecutor> {
    let mut gov = Governance::new(&config(), Deployment::default(), RecordingExecutor::new()).unwrap();
    gov.advance_to(1).unwrap();
    for i in 0..VOTERS {
        gov.mint(voter(i), 100).unwrap();
        gov.delegate(voter(i), voter(i)).unwrap();
    }
    gov.advance_to(2).unwrap();
    gov.take_events();
    gov
}

fn actions(n: u8) -> ProposalActions {
    (0..n).fold(ProposalActions::new(), |acc, i| {
        acc.with_action(Action::new(Address::derive(&[b't', i]), 0, "poke(uint8)", vec![i]))
    })
}

fn bench_full_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("proposal_lifecycle");

    group.bench_function("propose_vote_queue_execute", |b| {
        b.iter_batched(
            deployment,
            |mut gov| {
                let id = gov.propose(voter(0), actions(10), "bench").unwrap();
                gov.advance_by(1).unwrap();
                for i in 0..VOTERS {
                    gov.cast_vote(id, voter(i), i % 4 != 0).unwrap();
                }
                gov.advance_by(10).unwrap();
                let eta = gov.queue(id).unwrap();
                gov.advance_to(eta).unwrap();
                gov.execute(id).unwrap();
                black_box(gov.take_events().len())
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("state_query", |b| {
        let mut gov = deployment();
        let id = gov.propose(voter(0), actions(1), "bench").unwrap();
        gov.advance_by(1).unwrap();
        b.iter(|| black_box(gov.state(id).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_full_lifecycle);
criterion_main!(benches);
