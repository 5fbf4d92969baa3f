use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::{FunctionInfo, Header, NamedAggregate};
use criterion::{Criterion, criterion_group, criterion_main};
use event_processor::{EventDispatcher, Reaction, ReactionRegistry};
use event_store::{
    DomainEvent, DomainEventStream, EventBody, EventStore, InMemoryEventStore, Version,
};
use messaging::{CommandWaitNotifier, LocalWaitNotificationChannel, WaitStrategyRegistrar};

struct Counter(Arc<AtomicUsize>);

#[async_trait]
impl Reaction for Counter {
    fn function_info(&self) -> FunctionInfo {
        FunctionInfo::new("bench", "counter")
    }

    fn subscribes(&self, _: &NamedAggregate, _: &DomainEvent) -> bool {
        true
    }

    async fn react(&self, _: &DomainEventStream, _: &DomainEvent) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn order() -> NamedAggregate {
    NamedAggregate::new("bench", "order")
}

fn dispatcher() -> EventDispatcher {
    let mut reactions = ReactionRegistry::new();
    reactions.register(Arc::new(Counter(Arc::new(AtomicUsize::new(0)))));
    let notifier = CommandWaitNotifier::new(Arc::new(LocalWaitNotificationChannel::new(
        Arc::new(WaitStrategyRegistrar::new()),
    )));
    EventDispatcher::new(Arc::new(reactions), notifier)
}

fn make_stream(id: &str, current: i64) -> DomainEventStream {
    DomainEventStream::new(
        order().aggregate_id(id),
        Version::new(current),
        format!("req-{id}-{current}"),
        format!("cmd-{id}-{current}"),
        Header::new(),
        vec![EventBody::new("ItemAdded", serde_json::json!({"sku": "SKU-001"}))],
    )
}

/// Populate a store with N orders of 3 streams each.
async fn populate_store(store: &InMemoryEventStore, n: usize) {
    for i in 0..n {
        let id = format!("order-{i}");
        for current in 0..3 {
            store.append(make_stream(&id, current)).await.unwrap();
        }
    }
}

fn bench_process_single_stream(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dispatcher = dispatcher();
    let stream = make_stream("order-1", 0);

    c.bench_function("event_processor/process_single_stream", |b| {
        b.iter(|| {
            rt.block_on(dispatcher.process(&stream));
        });
    });
}

fn bench_catch_up_100_orders(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    rt.block_on(populate_store(&store, 100));
    let dispatcher = dispatcher();

    c.bench_function("event_processor/catch_up_300_streams", |b| {
        b.iter(|| {
            rt.block_on(async {
                dispatcher.catch_up(&store, &order(), 50).await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_process_single_stream, bench_catch_up_100_orders);
criterion_main!(benches);
