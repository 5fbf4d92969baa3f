use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, Header, NamedAggregate};
use futures_util::{StreamExt, TryStreamExt, stream};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{
    DomainEvent, DomainEventStream, EventStoreError, Result, Snapshot, Version,
    snapshot::SnapshotRepository,
    store::{
        AggregateIdStream, AppendOutcome, EventStore, EventStream, ScanCursor,
        validate_stream_for_append, validate_version_range,
    },
};

const STREAM_COLUMNS: &str = "id, context_name, aggregate_name, tenant_id, aggregate_id, \
     version, request_id, command_id, header, events, create_time";

const DEFAULT_BATCH_SIZE: i64 = 100;

/// PostgreSQL-backed event and snapshot store.
///
/// One row per event stream. Unique constraints on the head version, the
/// tail version and the request id of each aggregate make concurrent
/// appends race-free.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    batch_size: i64,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets how many streams `load` fetches per round trip.
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_stream(row: PgRow) -> Result<DomainEventStream> {
        let named = NamedAggregate::new(
            row.try_get::<String, _>("context_name")?,
            row.try_get::<String, _>("aggregate_name")?,
        );
        let aggregate_id = AggregateId::new(named, row.try_get::<String, _>("aggregate_id")?)
            .with_tenant(row.try_get::<String, _>("tenant_id")?);
        let header: Header = serde_json::from_value(row.try_get("header")?)?;
        let events: Vec<DomainEvent> = serde_json::from_value(row.try_get("events")?)?;

        Ok(DomainEventStream {
            id: row.try_get("id")?,
            aggregate_id,
            version: Version::new(row.try_get("version")?),
            events,
            request_id: row.try_get("request_id")?,
            command_id: row.try_get("command_id")?,
            header,
            create_time: row.try_get("create_time")?,
        })
    }

    async fn find_by_request_id(
        tx: &mut Transaction<'_, Postgres>,
        stream: &DomainEventStream,
    ) -> Result<Option<DomainEventStream>> {
        let id = &stream.aggregate_id;
        let row = sqlx::query(&format!(
            "SELECT {STREAM_COLUMNS} FROM event_stream \
             WHERE context_name = $1 AND aggregate_name = $2 AND tenant_id = $3 \
             AND aggregate_id = $4 AND request_id = $5"
        ))
        .bind(id.context_name())
        .bind(id.aggregate_name())
        .bind(id.tenant_id())
        .bind(id.id())
        .bind(&stream.request_id)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(Self::row_to_stream).transpose()
    }

    async fn tail_version(
        executor: impl sqlx::PgExecutor<'_>,
        aggregate_id: &AggregateId,
    ) -> Result<Version> {
        let tail: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(version) FROM event_stream \
             WHERE context_name = $1 AND aggregate_name = $2 AND tenant_id = $3 \
             AND aggregate_id = $4",
        )
        .bind(aggregate_id.context_name())
        .bind(aggregate_id.aggregate_name())
        .bind(aggregate_id.tenant_id())
        .bind(aggregate_id.id())
        .fetch_one(executor)
        .await?;

        Ok(Version::new(tail.unwrap_or(0)))
    }

    /// Fetches one page of streams plus the head of the following page.
    async fn fetch_page(
        pool: &PgPool,
        aggregate_id: &AggregateId,
        head: Version,
        tail: Version,
        batch_size: i64,
    ) -> Result<Option<(Vec<DomainEventStream>, Option<Version>)>> {
        let rows = sqlx::query(&format!(
            "SELECT {STREAM_COLUMNS} FROM event_stream \
             WHERE context_name = $1 AND aggregate_name = $2 AND tenant_id = $3 \
             AND aggregate_id = $4 AND version >= $5 AND version <= $6 \
             ORDER BY version ASC LIMIT $7"
        ))
        .bind(aggregate_id.context_name())
        .bind(aggregate_id.aggregate_name())
        .bind(aggregate_id.tenant_id())
        .bind(aggregate_id.id())
        .bind(head.as_i64())
        .bind(tail.as_i64())
        .bind(batch_size)
        .fetch_all(pool)
        .await?;

        let full_page = rows.len() as i64 == batch_size;
        let page = rows
            .into_iter()
            .map(Self::row_to_stream)
            .collect::<Result<Vec<_>>>()?;
        let following = match page.last() {
            None => return Ok(None),
            Some(last) if full_page && last.version < tail => Some(last.version.next()),
            Some(_) => None,
        };
        Ok(Some((page, following)))
    }

    fn conflict_for(stream: DomainEventStream, constraint: &str, tail: Version) -> EventStoreError {
        match constraint {
            "unique_aggregate_request_id" => EventStoreError::RequestIdIdempotency {
                stream: Box::new(stream),
            },
            _ if stream.is_initial() => EventStoreError::DuplicateAggregateId {
                stream: Box::new(stream),
            },
            _ => EventStoreError::EventVersionConflict {
                stream: Box::new(stream),
                actual: tail,
            },
        }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(
        skip(self, stream),
        fields(aggregate_id = %stream.aggregate_id, version = %stream.version)
    )]
    async fn append(&self, stream: DomainEventStream) -> Result<AppendOutcome> {
        validate_stream_for_append(&stream)?;

        let mut tx = self.pool.begin().await?;

        if let Some(committed) = Self::find_by_request_id(&mut tx, &stream).await? {
            if committed.same_content(&stream) {
                tracing::debug!(request_id = %stream.request_id, "Stream already appended");
                return Ok(AppendOutcome::AlreadyAppended);
            }
            return Err(EventStoreError::RequestIdIdempotency {
                stream: Box::new(stream),
            });
        }

        let tail = Self::tail_version(&mut *tx, &stream.aggregate_id).await?;
        if stream.head_version() != tail.next() {
            return Err(Self::conflict_for(stream, "", tail));
        }

        let id = &stream.aggregate_id;
        let inserted = sqlx::query(
            r#"
            INSERT INTO event_stream (id, context_name, aggregate_name, tenant_id, aggregate_id,
                head_version, version, request_id, command_id, header, events, create_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&stream.id)
        .bind(id.context_name())
        .bind(id.aggregate_name())
        .bind(id.tenant_id())
        .bind(id.id())
        .bind(stream.head_version().as_i64())
        .bind(stream.version.as_i64())
        .bind(&stream.request_id)
        .bind(&stream.command_id)
        .bind(serde_json::to_value(&stream.header)?)
        .bind(serde_json::to_value(&stream.events)?)
        .bind(stream.create_time)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            // A concurrent writer committed first.
            if let sqlx::Error::Database(ref db_err) = e
                && let Some(constraint) = db_err.constraint()
            {
                let constraint = constraint.to_string();
                tracing::debug!(%constraint, "Append lost to a concurrent writer");
                return Err(Self::conflict_for(stream, &constraint, tail));
            }
            return Err(EventStoreError::Database(e));
        }

        tx.commit().await?;
        metrics::counter!("events_appended_total").increment(stream.size() as u64);
        Ok(AppendOutcome::Appended)
    }

    async fn load(
        &self,
        aggregate_id: &AggregateId,
        head: Version,
        tail: Version,
    ) -> Result<EventStream> {
        validate_version_range(head, tail)?;

        let pool = self.pool.clone();
        let batch_size = self.batch_size;
        let aggregate_id = aggregate_id.clone();

        // Keyset paging: each page starts right after the last version seen.
        let pages = stream::try_unfold(Some(head), move |next_head| {
            let pool = pool.clone();
            let aggregate_id = aggregate_id.clone();
            async move {
                match next_head {
                    Some(next_head) => {
                        Self::fetch_page(&pool, &aggregate_id, next_head, tail, batch_size).await
                    }
                    None => Ok(None),
                }
            }
        });

        Ok(Box::pin(
            pages
                .map_ok(|page| stream::iter(page.into_iter().map(Ok)))
                .try_flatten(),
        ))
    }

    async fn load_by_time(
        &self,
        aggregate_id: &AggregateId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<EventStream> {
        let rows = sqlx::query(&format!(
            "SELECT {STREAM_COLUMNS} FROM event_stream \
             WHERE context_name = $1 AND aggregate_name = $2 AND tenant_id = $3 \
             AND aggregate_id = $4 AND create_time >= $5 AND create_time <= $6 \
             ORDER BY version ASC"
        ))
        .bind(aggregate_id.context_name())
        .bind(aggregate_id.aggregate_name())
        .bind(aggregate_id.tenant_id())
        .bind(aggregate_id.id())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let streams = rows
            .into_iter()
            .map(Self::row_to_stream)
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::pin(stream::iter(streams.into_iter().map(Ok))))
    }

    async fn last_version(&self, aggregate_id: &AggregateId) -> Result<Version> {
        Self::tail_version(&self.pool, aggregate_id).await
    }

    async fn scan_aggregate_id(
        &self,
        named_aggregate: &NamedAggregate,
        cursor: ScanCursor,
        limit: usize,
    ) -> Result<AggregateIdStream> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT aggregate_id, tenant_id
            FROM event_stream
            WHERE context_name = $1 AND aggregate_name = $2
              AND (aggregate_id, tenant_id) > ($3, $4)
            ORDER BY aggregate_id ASC, tenant_id ASC
            LIMIT $5
            "#,
        )
        .bind(&named_aggregate.context_name)
        .bind(&named_aggregate.aggregate_name)
        .bind(&cursor.id)
        .bind(&cursor.tenant_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let named_aggregate = named_aggregate.clone();
        let ids = rows
            .into_iter()
            .map(move |row| -> Result<AggregateId> {
                Ok(
                    AggregateId::new(named_aggregate.clone(), row.try_get::<String, _>("aggregate_id")?)
                        .with_tenant(row.try_get::<String, _>("tenant_id")?),
                )
            })
            .collect::<Vec<_>>();
        Ok(stream::iter(ids).boxed())
    }
}

#[async_trait]
impl SnapshotRepository for PostgresEventStore {
    async fn load_snapshot(&self, aggregate_id: &AggregateId) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            r#"
            SELECT version, state, deleted, first_event_time, event_time,
                   first_operator, operator, snapshot_time
            FROM snapshot
            WHERE context_name = $1 AND aggregate_name = $2 AND tenant_id = $3
              AND aggregate_id = $4
            "#,
        )
        .bind(aggregate_id.context_name())
        .bind(aggregate_id.aggregate_name())
        .bind(aggregate_id.tenant_id())
        .bind(aggregate_id.id())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Snapshot {
                aggregate_id: aggregate_id.clone(),
                version: Version::new(row.try_get("version")?),
                state: row.try_get("state")?,
                deleted: row.try_get("deleted")?,
                first_event_time: row.try_get("first_event_time")?,
                event_time: row.try_get("event_time")?,
                first_operator: row.try_get("first_operator")?,
                operator: row.try_get("operator")?,
                snapshot_time: row.try_get("snapshot_time")?,
            })),
            None => Ok(None),
        }
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let id = &snapshot.aggregate_id;
        sqlx::query(
            r#"
            INSERT INTO snapshot (context_name, aggregate_name, tenant_id, aggregate_id, version,
                state, deleted, first_event_time, event_time, first_operator, operator,
                snapshot_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (context_name, aggregate_name, tenant_id, aggregate_id) DO UPDATE
            SET version = EXCLUDED.version,
                state = EXCLUDED.state,
                deleted = EXCLUDED.deleted,
                first_event_time = EXCLUDED.first_event_time,
                event_time = EXCLUDED.event_time,
                first_operator = EXCLUDED.first_operator,
                operator = EXCLUDED.operator,
                snapshot_time = EXCLUDED.snapshot_time
            WHERE snapshot.version < EXCLUDED.version
            "#,
        )
        .bind(id.context_name())
        .bind(id.aggregate_name())
        .bind(id.tenant_id())
        .bind(id.id())
        .bind(snapshot.version.as_i64())
        .bind(&snapshot.state)
        .bind(snapshot.deleted)
        .bind(snapshot.first_event_time)
        .bind(snapshot.event_time)
        .bind(&snapshot.first_operator)
        .bind(&snapshot.operator)
        .bind(snapshot.snapshot_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
