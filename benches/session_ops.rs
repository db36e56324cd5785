use std::hint::black_box;

use agent_sessions::inmemory::InMemorySessionStore;
use agent_sessions::model::{Event, EventWindow, StateMap};
use agent_sessions::store::SessionStore;
use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;

fn bench_delta(seq: u64) -> StateMap {
    let mut delta = StateMap::new();
    delta.insert("turn".into(), json!(seq));
    delta.insert("user:last_seen".into(), json!(seq));
    delta
}

fn inmemory_benches(c: &mut Criterion) {
    let store = InMemorySessionStore::new();

    c.bench_function("inmemory_append_event", |b| {
        let session = store
            .create_session("bench-app", "bench-user", Some("append"), StateMap::new())
            .expect("create");
        let mut counter = 0u64;
        b.iter(|| {
            counter = counter.wrapping_add(1);
            let event = Event::new("agent", json!({"seq": counter}))
                .with_id(format!("e{counter}"))
                .with_delta(bench_delta(counter));
            black_box(store.append_event(&session.key, event).expect("append"));
        });
    });

    c.bench_function("inmemory_get_session_windowed", |b| {
        let session = store
            .create_session("bench-app", "bench-user", Some("get"), StateMap::new())
            .expect("create");
        for seq in 0..100u64 {
            let event = Event::new("agent", json!({"seq": seq}))
                .with_id(format!("g{seq}"))
                .with_delta(bench_delta(seq));
            store.append_event(&session.key, event).expect("append");
        }
        b.iter(|| {
            black_box(
                store
                    .get_session(&session.key, EventWindow::last(10))
                    .expect("get"),
            );
        });
    });

    c.bench_function("inmemory_list_sessions", |b| {
        let store = InMemorySessionStore::new();
        for i in 0..64 {
            let session_id = format!("s{i}");
            store
                .create_session("bench-app", "bench-user", Some(&session_id), StateMap::new())
                .expect("create");
        }
        b.iter(|| {
            black_box(store.list_sessions("bench-app", None).expect("list"));
        });
    });
}

criterion_group!(session_ops, inmemory_benches);
criterion_main!(session_ops);
