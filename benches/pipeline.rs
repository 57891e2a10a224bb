//! Performance benchmarks for a3s-guard
//!
//! Run with: cargo bench

use a3s_guard::debounce::{change_digest, Fingerprint};
use a3s_guard::entity::{EntityState, Guardable, RoleState};
use a3s_guard::policy::rule_for;
use a3s_guard::provider::memory::MemoryBackends;
use a3s_guard::{
    ActionKind, ChangeEvent, ChangeKind, EngineSettings, EntityKind, GuardConfig, GuardEngine,
    Permissions,
};
use criterion::{criterion_group, criterion_main, Criterion};

const SPACE: &str = "space-1";

fn role(name: &str) -> EntityState {
    EntityState::Role(
        RoleState::new("r1", name)
            .with_color(0x3498db)
            .with_permissions(Permissions::KICK_MEMBERS | Permissions::MANAGE_MESSAGES),
    )
}

fn bench_classification(c: &mut Criterion) {
    let event = ChangeEvent::updated(SPACE, role("Mods"), role("Moderators"));

    c.bench_function("changed_fields (role)", |b| {
        b.iter(|| {
            let before = event.before.as_ref().unwrap();
            let after = event.after.as_ref().unwrap();
            before.changed_fields(after)
        });
    });

    c.bench_function("rule_for + classify", |b| {
        b.iter(|| {
            let action = ActionKind::new(EntityKind::Role, ChangeKind::Update);
            rule_for(action).map(|rule| rule.classify(&event))
        });
    });

    c.bench_function("Fingerprint hash", |b| {
        let action = ActionKind::new(EntityKind::Role, ChangeKind::Update);
        let rule = rule_for(action).unwrap();
        let classification = rule.classify(&event);
        b.iter(|| {
            Fingerprint {
                space_id: SPACE,
                violation_type: classification.violation_type,
                target_id: "r1",
                executor_id: "u1",
                change_digest: change_digest(action, &["name", "color"]),
            }
            .hash_value()
        });
    });
}

fn bench_event_serialization(c: &mut Criterion) {
    let event = ChangeEvent::updated(SPACE, role("Mods"), role("Moderators"));

    c.bench_function("ChangeEvent serialize", |b| {
        b.iter(|| serde_json::to_vec(&event).unwrap());
    });

    let bytes = serde_json::to_vec(&event).unwrap();
    c.bench_function("ChangeEvent deserialize", |b| {
        b.iter(|| serde_json::from_slice::<ChangeEvent>(&bytes).unwrap());
    });
}

fn bench_gate_drops(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let engine = rt.block_on(async {
        let backends = MemoryBackends::new("guard-bot");
        backends
            .configs
            .set(
                SPACE,
                GuardConfig {
                    enabled: false,
                    ..GuardConfig::default()
                },
            )
            .await;
        GuardEngine::new(backends.services(), EngineSettings::default()).unwrap()
    });

    c.bench_function("handle_event (disabled space)", |b| {
        b.to_async(&rt).iter(|| async {
            engine
                .handle_event(ChangeEvent::deleted(SPACE, role("Mods")))
                .await
        });
    });

    c.bench_function("handle_event (unconfigured space)", |b| {
        b.to_async(&rt).iter(|| async {
            engine
                .handle_event(ChangeEvent::deleted("space-unknown", role("Mods")))
                .await
        });
    });

    let mut group = c.benchmark_group("gate_throughput");
    for count in [10, 100, 1000] {
        group.bench_function(format!("{} events", count), |b| {
            b.to_async(&rt).iter(|| async {
                for i in 0..count {
                    let state = EntityState::Role(RoleState::new(format!("r{}", i), "Mods"));
                    engine.handle_event(ChangeEvent::deleted(SPACE, state)).await;
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_classification,
    bench_event_serialization,
    bench_gate_drops,
);
criterion_main!(benches);
