//! End-to-end tests of the wired engine on the in-memory event store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use api::{Config, Engine};
use async_trait::async_trait;
use common::{ErrorCode, FunctionInfo, NamedAggregate, error_codes};
use compensation::{
    ExecutionFailedStatus, MarkRecoverable, RecoverableType, RetrySpec, SchedulerConfig,
    compensation_id,
};
use event_processor::{Reaction, ReactionRegistry};
use event_store::{DomainEvent, DomainEventStream, EventId, InMemoryEventStore};
use messaging::{GatewayError, MessagingError};
use modeling::{
    Aggregate, Command, CommandMessage, CommandRegistry, Event, Events, SourcingRegistry,
};
use serde::{Deserialize, Serialize};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Ticket {
    open: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenTicket {}

impl Command for OpenTicket {
    const NAME: &'static str = "OpenTicket";
    const IS_CREATE: bool = true;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TicketOpened {}

impl Event for TicketOpened {
    const NAME: &'static str = "TicketOpened";
}

impl Aggregate for Ticket {
    const CONTEXT_NAME: &'static str = "support";
    const AGGREGATE_NAME: &'static str = "ticket";

    fn register_commands(registry: &mut CommandRegistry<Self>) {
        registry.on::<OpenTicket, _>(|_, _| Ok(Events::one(TicketOpened {})));
    }

    fn register_sourcing(registry: &mut SourcingRegistry<Self>) {
        registry.on::<TicketOpened, _>(|state: &mut Ticket, _| state.open = true);
    }
}

/// Pages the on-call agent; fails a configurable number of times.
struct Pager {
    failures_left: AtomicUsize,
    seen: Mutex<Vec<EventId>>,
}

impl Pager {
    fn function() -> FunctionInfo {
        FunctionInfo::new("support", "page_on_call")
    }
}

#[async_trait]
impl Reaction for Pager {
    fn function_info(&self) -> FunctionInfo {
        Self::function()
    }

    fn subscribes(&self, named_aggregate: &NamedAggregate, _: &DomainEvent) -> bool {
        *named_aggregate == Ticket::named_aggregate()
    }

    fn retry(&self) -> bool {
        true
    }

    async fn react(&self, _: &DomainEventStream, event: &DomainEvent) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(event.id);
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("pager service unavailable");
        }
        Ok(())
    }
}

async fn start(failures: usize) -> (Engine, Arc<Pager>) {
    let config = Config {
        scheduler: SchedulerConfig {
            poll_interval: Duration::from_millis(20),
            batch_size: 10,
        },
        retry_spec: RetrySpec {
            max_retries: 3,
            min_backoff: Duration::ZERO,
            execution_timeout: Duration::from_secs(1),
        },
        ..Config::default()
    };
    let pager = Arc::new(Pager {
        failures_left: AtomicUsize::new(failures),
        seen: Mutex::new(Vec::new()),
    });
    let mut reactions = ReactionRegistry::new();
    reactions.register(pager.clone());

    let store = Arc::new(InMemoryEventStore::new());
    let mut engine = Engine::start(config, store.clone(), store, reactions)
        .await
        .unwrap();
    engine.dispatch::<Ticket>().await.unwrap();
    (engine, pager)
}

#[tokio::test]
async fn command_is_processed_through_gateway() {
    let (engine, pager) = start(0).await;
    let id = Ticket::named_aggregate().aggregate_id("t-1");
    let message = CommandMessage::of(id.clone(), &OpenTicket {}).unwrap();

    let result = engine
        .gateway()
        .send_and_wait_for_processed(message, WAIT)
        .await
        .unwrap();

    assert_eq!(result.error_code, error_codes::SUCCEEDED);
    assert_eq!(result.aggregate_id, id);
    assert!(result.aggregate_version.is_some());

    tokio::time::timeout(WAIT, async {
        while pager.seen.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    engine.shutdown().await;
}

#[tokio::test]
async fn failed_reaction_is_compensated() {
    let (engine, pager) = start(1).await;
    let id = Ticket::named_aggregate().aggregate_id("t-2");
    let message = CommandMessage::of(id, &OpenTicket {}).unwrap();
    engine
        .gateway()
        .send_and_wait_for_processed(message, WAIT)
        .await
        .unwrap();

    tokio::time::timeout(WAIT, async {
        loop {
            let event_id = pager.seen.lock().unwrap().first().copied();
            if let Some(event_id) = event_id {
                let record_id = compensation_id(&event_id, &Pager::function());
                let record = engine.compensation().load(&record_id).await.unwrap();
                if record.is_some_and(|r| r.state().status() == ExecutionFailedStatus::Succeeded)
                {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    // First delivery plus one retry.
    assert_eq!(pager.seen.lock().unwrap().len(), 2);
    engine.shutdown().await;
}

#[tokio::test]
async fn operator_command_on_missing_record_is_not_found() {
    let (engine, _) = start(0).await;
    let id = compensation_id(&EventId::new(), &Pager::function());

    let err = engine
        .compensation()
        .mark_recoverable(&id, RecoverableType::Unrecoverable)
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), error_codes::AGGREGATE_NOT_FOUND);
    engine.shutdown().await;
}

#[tokio::test]
async fn execution_records_are_not_reachable_through_gateway() {
    let (engine, _) = start(0).await;
    let id = compensation_id(&EventId::new(), &Pager::function());
    let message = CommandMessage::of(
        id,
        &MarkRecoverable {
            recoverable: RecoverableType::Unrecoverable,
        },
    )
    .unwrap();

    let result = engine.gateway().send(message).await;

    assert!(matches!(
        result,
        Err(GatewayError::Send(MessagingError::NoReceiver))
    ));
    engine.shutdown().await;
}

#[tokio::test]
async fn operator_retry_runs_alongside_the_scheduler() {
    let (engine, pager) = start(1).await;
    let id = Ticket::named_aggregate().aggregate_id("t-3");
    let message = CommandMessage::of(id, &OpenTicket {}).unwrap();
    engine
        .gateway()
        .send_and_wait_for_processed(message, WAIT)
        .await
        .unwrap();

    let record_id = tokio::time::timeout(WAIT, async {
        loop {
            let event_id = pager.seen.lock().unwrap().first().copied();
            if let Some(event_id) = event_id {
                let record_id = compensation_id(&event_id, &Pager::function());
                if engine.compensation().load(&record_id).await.unwrap().is_some() {
                    break record_id;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // Races the scheduler's prepare/apply cycle on the same record.
    for max_retries in 4..12 {
        let spec = RetrySpec {
            max_retries,
            min_backoff: Duration::ZERO,
            execution_timeout: Duration::from_secs(1),
        };
        engine
            .compensation()
            .apply_retry_spec(&record_id, spec)
            .await
            .unwrap();
    }

    let record = engine.compensation().load(&record_id).await.unwrap().unwrap();
    assert_eq!(record.state().retry_spec().max_retries, 11);
    engine.shutdown().await;
}
