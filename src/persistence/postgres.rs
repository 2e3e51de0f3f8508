//! PostgreSQL implementation of the ledger store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::models::{AuditRow, EventRow};
use super::{ChangeOp, ChangeSet, LedgerStore};
use crate::config::LedgerConfig;
use crate::domain::{AuditId, EventId, MeterEvent, RecalculationAudit, UserId};
use crate::error::LedgerError;

const EVENT_COLUMNS: &str = "id, user_id, event_type, event_date, balance_kwh, purchase_kwh, \
     token_cost, notes, voided, voided_reason, voided_at, supersedes, superseded_by, created_at";

const AUDIT_COLUMNS: &str = "id, user_id, triggering_event_id, trigger_type, offset_kwh, \
     affected_event_ids, applied_at, undo_deadline, undone_at, idempotency_key";

fn read_err(e: sqlx::Error) -> LedgerError {
    LedgerError::PersistenceError(e.to_string())
}

fn write_err(e: sqlx::Error) -> LedgerError {
    LedgerError::TransactionFailure(e.to_string())
}

fn to_events(rows: Vec<EventRow>) -> Result<Vec<MeterEvent>, LedgerError> {
    rows.into_iter().map(MeterEvent::try_from).collect()
}

/// PostgreSQL-backed ledger store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a store over the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool sized by `config` and runs the migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError::PersistenceError`] if the database is
    /// unreachable or a migration fails.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(std::time::Duration::from_secs(
                config.database_connect_timeout_secs,
            ))
            .connect(&config.database_url)
            .await
            .map_err(read_err)?;
        let store = Self::new(pool);
        store.migrate().await?;
        tracing::info!(
            max_connections = config.database_max_connections,
            "connected to PostgreSQL"
        );
        Ok(store)
    }

    /// Runs the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError::PersistenceError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::PersistenceError(e.to_string()))
    }

    async fn fetch_one_event(
        &self,
        sql: &str,
        user_id: UserId,
        date: Option<DateTime<Utc>>,
    ) -> Result<Option<MeterEvent>, LedgerError> {
        let mut query = sqlx::query_as::<_, EventRow>(sql).bind(*user_id.as_uuid());
        if let Some(date) = date {
            query = query.bind(date);
        }
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(read_err)?
            .map(MeterEvent::try_from)
            .transpose()
    }

    async fn fetch_one_audit(
        &self,
        sql: &str,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<RecalculationAudit>, LedgerError> {
        sqlx::query_as::<_, AuditRow>(sql)
            .bind(*user_id.as_uuid())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(read_err)?
            .map(RecalculationAudit::try_from)
            .transpose()
    }
}

async fn apply_op(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    op: ChangeOp,
) -> Result<(), LedgerError> {
    match op {
        ChangeOp::InsertEvent(event) => {
            if *event.user_id.as_uuid() != user_id {
                return Err(LedgerError::TransactionFailure(format!(
                    "event {} belongs to another user",
                    event.id
                )));
            }
            sqlx::query(
                "INSERT INTO meter_events (id, user_id, event_type, event_date, balance_kwh, \
                 purchase_kwh, token_cost, notes, voided, voided_reason, voided_at, supersedes, \
                 superseded_by, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            )
            .bind(*event.id.as_uuid())
            .bind(user_id)
            .bind(event.event_type.as_str())
            .bind(event.event_date)
            .bind(event.balance_kwh.as_decimal())
            .bind(event.purchase_kwh.map(|k| k.as_decimal()))
            .bind(event.token_cost)
            .bind(event.notes)
            .bind(event.voided)
            .bind(event.voided_reason)
            .bind(event.voided_at)
            .bind(event.supersedes.map(Uuid::from))
            .bind(event.superseded_by.map(Uuid::from))
            .bind(event.created_at)
            .execute(&mut **tx)
            .await
            .map_err(write_err)?;
        }
        ChangeOp::VoidEvent {
            event_id,
            reason,
            at,
        } => {
            let result = sqlx::query(
                "UPDATE meter_events SET voided = TRUE, voided_reason = $1, voided_at = $2 \
                 WHERE user_id = $3 AND id = $4 AND NOT voided",
            )
            .bind(reason)
            .bind(at)
            .bind(user_id)
            .bind(*event_id.as_uuid())
            .execute(&mut **tx)
            .await
            .map_err(write_err)?;
            if result.rows_affected() != 1 {
                return Err(LedgerError::EventVoided(*event_id.as_uuid()));
            }
        }
        ChangeOp::LinkSuperseded {
            event_id,
            superseded_by,
        } => {
            sqlx::query(
                "UPDATE meter_events SET superseded_by = $1 WHERE user_id = $2 AND id = $3",
            )
            .bind(*superseded_by.as_uuid())
            .bind(user_id)
            .bind(*event_id.as_uuid())
            .execute(&mut **tx)
            .await
            .map_err(write_err)?;
        }
        ChangeOp::ShiftBalances { event_ids, offset } => {
            let ids: Vec<Uuid> = event_ids.iter().map(|id| *id.as_uuid()).collect();
            let result = sqlx::query(
                "UPDATE meter_events SET balance_kwh = balance_kwh + $1 \
                 WHERE user_id = $2 AND id = ANY($3) AND NOT voided",
            )
            .bind(offset.as_decimal())
            .bind(user_id)
            .bind(&ids)
            .execute(&mut **tx)
            .await
            .map_err(write_err)?;
            if result.rows_affected() != ids.len() as u64 {
                return Err(LedgerError::TransactionFailure(format!(
                    "shift touched {} of {} events",
                    result.rows_affected(),
                    ids.len()
                )));
            }
        }
        ChangeOp::InsertAudit(audit) => {
            let ids: Vec<Uuid> = audit
                .affected_event_ids
                .iter()
                .map(|id| *id.as_uuid())
                .collect();
            sqlx::query(
                "INSERT INTO recalculation_audits (id, user_id, triggering_event_id, trigger_type, \
                 offset_kwh, affected_event_ids, applied_at, undo_deadline, undone_at, \
                 idempotency_key) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(*audit.id.as_uuid())
            .bind(user_id)
            .bind(*audit.triggering_event_id.as_uuid())
            .bind(audit.trigger_type.as_str())
            .bind(audit.offset_kwh.as_decimal())
            .bind(&ids)
            .bind(audit.applied_at)
            .bind(audit.undo_deadline)
            .bind(audit.undone_at)
            .bind(audit.idempotency_key)
            .execute(&mut **tx)
            .await
            .map_err(write_err)?;
        }
        ChangeOp::MarkAuditUndone { audit_id, at } => {
            let result = sqlx::query(
                "UPDATE recalculation_audits SET undone_at = $1 \
                 WHERE user_id = $2 AND id = $3 AND undone_at IS NULL",
            )
            .bind(at)
            .bind(user_id)
            .bind(*audit_id.as_uuid())
            .execute(&mut **tx)
            .await
            .map_err(write_err)?;
            if result.rows_affected() != 1 {
                return Err(LedgerError::TransactionFailure(format!(
                    "audit {audit_id} missing or already undone"
                )));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(read_err)
    }

    async fn fetch_before(
        &self,
        user_id: UserId,
        date: DateTime<Utc>,
    ) -> Result<Option<MeterEvent>, LedgerError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM meter_events \
             WHERE user_id = $1 AND NOT voided AND event_date < $2 \
             ORDER BY event_date DESC, created_at DESC LIMIT 1"
        );
        self.fetch_one_event(&sql, user_id, Some(date)).await
    }

    async fn fetch_after(
        &self,
        user_id: UserId,
        date: DateTime<Utc>,
    ) -> Result<Vec<MeterEvent>, LedgerError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM meter_events \
             WHERE user_id = $1 AND NOT voided AND event_date > $2 \
             ORDER BY event_date ASC, created_at ASC"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(*user_id.as_uuid())
            .bind(date)
            .fetch_all(&self.pool)
            .await
            .map_err(read_err)?;
        to_events(rows)
    }

    async fn fetch_at(
        &self,
        user_id: UserId,
        date: DateTime<Utc>,
    ) -> Result<Option<MeterEvent>, LedgerError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM meter_events \
             WHERE user_id = $1 AND NOT voided AND event_date = $2 LIMIT 1"
        );
        self.fetch_one_event(&sql, user_id, Some(date)).await
    }

    async fn latest(&self, user_id: UserId) -> Result<Option<MeterEvent>, LedgerError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM meter_events WHERE user_id = $1 AND NOT voided \
             ORDER BY event_date DESC, created_at DESC LIMIT 1"
        );
        self.fetch_one_event(&sql, user_id, None).await
    }

    async fn get_event(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> Result<Option<MeterEvent>, LedgerError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM meter_events WHERE user_id = $1 AND id = $2");
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(*user_id.as_uuid())
            .bind(*event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(read_err)?
            .map(MeterEvent::try_from)
            .transpose()
    }

    async fn list_events(
        &self,
        user_id: UserId,
        include_voided: bool,
    ) -> Result<Vec<MeterEvent>, LedgerError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM meter_events \
             WHERE user_id = $1 AND ($2 OR NOT voided) \
             ORDER BY event_date ASC, created_at ASC"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(*user_id.as_uuid())
            .bind(include_voided)
            .fetch_all(&self.pool)
            .await
            .map_err(read_err)?;
        to_events(rows)
    }

    async fn get_audit(
        &self,
        user_id: UserId,
        audit_id: AuditId,
    ) -> Result<Option<RecalculationAudit>, LedgerError> {
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM recalculation_audits WHERE user_id = $1 AND id = $2"
        );
        sqlx::query_as::<_, AuditRow>(&sql)
            .bind(*user_id.as_uuid())
            .bind(*audit_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(read_err)?
            .map(RecalculationAudit::try_from)
            .transpose()
    }

    async fn find_audit_by_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<RecalculationAudit>, LedgerError> {
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM recalculation_audits \
             WHERE user_id = $1 AND idempotency_key = $2"
        );
        self.fetch_one_audit(&sql, user_id, key).await
    }

    async fn list_audits(&self, user_id: UserId) -> Result<Vec<RecalculationAudit>, LedgerError> {
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM recalculation_audits WHERE user_id = $1 \
             ORDER BY applied_at DESC"
        );
        let rows = sqlx::query_as::<_, AuditRow>(&sql)
            .bind(*user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(read_err)?;
        rows.into_iter().map(RecalculationAudit::try_from).collect()
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), LedgerError> {
        let ChangeSet { user_id, ops } = changes;
        let user_id = *user_id.as_uuid();
        let op_count = ops.len();

        let mut tx = self.pool.begin().await.map_err(write_err)?;
        for op in ops {
            // Dropping `tx` on error rolls the whole change set back.
            apply_op(&mut tx, user_id, op).await?;
        }
        tx.commit().await.map_err(write_err)?;

        tracing::debug!(%user_id, op_count, "change set committed");
        Ok(())
    }
}
