use criterion::{Criterion, black_box, criterion_group, criterion_main};
use goconnect_daemon::overlay::chat::ChatStore;
use goconnect_daemon::overlay::model::ChatMessage;
use tokio::runtime::Runtime;

fn message(seq: i64, network_id: &str) -> ChatMessage {
    ChatMessage {
        id: String::new(),
        from_peer: "peer-bench".to_string(),
        content: format!("message {seq}"),
        timestamp: seq,
        network_id: network_id.to_string(),
        created_at: 0,
    }
}

/// Every chat send (RPC/HTTP `SendFileRequest`'s sibling, `chat/send`)
/// round-trips through this insert (spec §4.5).
fn bench_save(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = rt.block_on(async { ChatStore::open(&dir.path().join("chat.db")).await.unwrap() });

    let mut seq = 0i64;
    c.bench_function("chat_store_save", |b| {
        b.iter(|| {
            seq += 1;
            rt.block_on(async {
                store.save(black_box(message(seq, "net-bench"))).await.unwrap();
            })
        })
    });
}

/// Paged listing backs the chat view's scroll-back (spec §8 pagination
/// property); cost should stay roughly flat as the table grows because
/// both queries are index-backed (`network_id`, `timestamp DESC`).
fn bench_list_first_page(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("chat_store_list_first_page");

    for row_count in [100usize, 1_000, 5_000] {
        let dir = tempfile::tempdir().unwrap();
        let store = rt.block_on(async {
            let store = ChatStore::open(&dir.path().join("chat.db")).await.unwrap();
            for i in 0..row_count {
                store.save(message(i as i64, "net-bench")).await.unwrap();
            }
            store
        });

        group.bench_function(format!("{row_count}_rows"), |b| {
            b.iter(|| {
                rt.block_on(async {
                    black_box(store.list("net-bench", 50, "").await.unwrap());
                })
            })
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = rt.block_on(async {
        let store = ChatStore::open(&dir.path().join("chat.db")).await.unwrap();
        for i in 0..2_000 {
            store.save(message(i, "net-bench")).await.unwrap();
        }
        store
    });

    c.bench_function("chat_store_search_substring", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(store.search("net-bench", "message 1").await.unwrap());
            })
        })
    });
}

criterion_group!(benches, bench_save, bench_list_first_page, bench_search);
criterion_main!(benches);
