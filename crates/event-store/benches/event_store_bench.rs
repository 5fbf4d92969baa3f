use common::{AggregateId, Header, NamedAggregate};
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    DomainEventStream, EventBody, EventStore, EventStoreExt, InMemoryEventStore, Version,
};

fn make_stream(aggregate_id: &AggregateId, current: i64, events: usize) -> DomainEventStream {
    DomainEventStream::new(
        aggregate_id.clone(),
        Version::new(current),
        format!("req-{current}"),
        format!("cmd-{current}"),
        Header::new(),
        (0..events)
            .map(|i| EventBody::new("ItemAdded", serde_json::json!({"sku": i, "qty": 1})))
            .collect(),
    )
}

fn bench_append_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let named = NamedAggregate::new("bench", "cart");

    c.bench_function("event_store/append_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let id = named.generate_id();
                store.append(make_stream(&id, 0, 1)).await.unwrap();
            });
        });
    });
}

fn bench_append_stream_of_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let named = NamedAggregate::new("bench", "cart");

    c.bench_function("event_store/append_stream_of_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let id = named.generate_id();
                store.append(make_stream(&id, 0, 10)).await.unwrap();
            });
        });
    });
}

fn bench_load_100_streams(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let id = NamedAggregate::new("bench", "cart").generate_id();

    rt.block_on(async {
        for current in 0..100 {
            store.append(make_stream(&id, current, 1)).await.unwrap();
        }
    });

    c.bench_function("event_store/load_100_streams", |b| {
        b.iter(|| {
            rt.block_on(async {
                let streams = store.load_all(&id).await.unwrap();
                assert_eq!(streams.len(), 100);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_single_event,
    bench_append_stream_of_10,
    bench_load_100_streams
);
criterion_main!(benches);
