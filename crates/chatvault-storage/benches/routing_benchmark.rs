//! Routing and handle-reuse cost.
//!
//! Routing must stay well under 0.5ms per call; reads on an already-open
//! handle should cost only the query itself.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use tempfile::tempdir;

use chatvault_core::{RoutingTable, SourceDescriptor, SourceRegistry};
use chatvault_storage::{ChatRecord, ChatSchema, ChatStore, NewMessage};

fn bench_routing(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let mut routing = RoutingTable::new("primary");
    for chat in 0..10_000 {
        routing = routing.with_mapping(chat, if chat % 2 == 0 { "primary" } else { "secondary" });
    }
    let registry = SourceRegistry::new(
        vec![
            SourceDescriptor::writable("primary", dir.path().join("primary.db")),
            SourceDescriptor::writable("secondary", dir.path().join("secondary.db")),
        ],
        routing,
    )
    .unwrap();
    let store = ChatStore::with_registry(registry);
    store.run_migrations(&ChatSchema).unwrap();
    store.record_chat(&ChatRecord::new(1, 1, Some("bench"))).unwrap();
    store.save_message(1, &NewMessage::user(1, "hello")).unwrap();

    // ── Route resolution only ──
    let router = store.router();
    c.bench_function("resolve_mapped", |b| {
        b.iter(|| router.resolve(black_box(Some(4_321)), None))
    });
    c.bench_function("resolve_default", |b| {
        b.iter(|| router.resolve(black_box(Some(99_999)), None))
    });
    c.bench_function("resolve_explicit", |b| {
        b.iter(|| router.resolve(black_box(Some(1)), black_box(Some("secondary"))))
    });
    c.bench_function("resolve_write", |b| {
        b.iter(|| router.resolve_write(black_box(Some(2))).unwrap())
    });

    // ── Routed reads on a warm handle ──
    c.bench_function("count_messages_warm", |b| {
        b.iter(|| store.count_messages(black_box(1), None).unwrap())
    });

    // ── Cross-source fan-out ──
    c.bench_function("all_chats_fan_out", |b| {
        b.iter(|| store.all_chats(None).unwrap())
    });
}

criterion_group!(benches, bench_routing);
criterion_main!(benches);
