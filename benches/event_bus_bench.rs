use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use goconnect_daemon::overlay::events::EventBus;
use goconnect_daemon::overlay::model::{Event, EventKind};
use tokio::runtime::Runtime;

fn status_event(network_id: &str) -> Event {
    Event::StatusChanged {
        network_id: network_id.to_string(),
        connected: true,
    }
}

/// Subscriber-map fan-out is the hot path shared by every RPC stream and
/// the SSE bridge (spec §4.3): each published event walks the subscriber
/// map under a read lock, so its cost scales with subscriber count.
fn bench_publish_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("event_bus_publish");

    for subscriber_count in [1usize, 10, 100] {
        let bus = rt.block_on(async {
            let bus = EventBus::new();
            for _ in 0..subscriber_count {
                let (_id, rx) = bus.subscribe(Vec::new()).await;
                // Leak the receiver for the duration of the benchmark so the
                // subscriber stays registered; a dropped receiver would
                // silently unregister on the next publish.
                std::mem::forget(rx);
            }
            bus
        });

        group.bench_function(format!("{subscriber_count}_subscribers"), |b| {
            b.iter(|| {
                rt.block_on(async {
                    bus.publish(black_box(status_event("net-bench"))).await;
                })
            })
        });
    }

    group.finish();
}

/// Filtered delivery (the `Subscribe(event_type_filter)` RPC, spec §4.3)
/// should cost about the same as unfiltered delivery since every
/// subscriber's filter is checked regardless of match.
fn bench_publish_with_filter(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let bus = rt.block_on(async {
        let bus = EventBus::new();
        for _ in 0..50 {
            let (_id, rx) = bus.subscribe(vec![EventKind::ChatMessage]).await;
            std::mem::forget(rx);
        }
        bus
    });

    c.bench_function("event_bus_publish_50_subscribers_filtered_out", |b| {
        b.iter(|| {
            rt.block_on(async {
                bus.publish(black_box(status_event("net-bench"))).await;
            })
        })
    });
}

fn bench_subscribe_unsubscribe(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let bus = Arc::new(rt.block_on(async { EventBus::new() }));

    c.bench_function("event_bus_subscribe_unsubscribe", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (id, rx) = bus.subscribe(Vec::new()).await;
                drop(rx);
                bus.unsubscribe(id).await;
            })
        })
    });
}

criterion_group!(
    benches,
    bench_publish_fanout,
    bench_publish_with_filter,
    bench_subscribe_unsubscribe,
);
criterion_main!(benches);
