use provisio_core::chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use provisio_core::{
    CreationPlan, ExecutionRecord, LedgerEntry, LedgerEntryId, LedgerEntryKind, NodeId, Operation,
    PlanStatus, Purpose, RecordOutcome, ResourceSpec, ResourceType, SessionId,
};

use super::{LedgerRepository, RepositoryError};
use crate::DbPool;

pub struct SqlLedgerRepository {
    pool: DbPool,
}

impl SqlLedgerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_records(&self, entry_id: &str) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                node_id,
                resource_type,
                purpose,
                scope,
                operation,
                outcome,
                provider_id,
                idempotency_key,
                attempts,
                error,
                estimated_monthly_cost,
                started_at,
                finished_at
             FROM execution_record
             WHERE entry_id = ?
             ORDER BY position ASC",
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn entry_from_row(&self, row: SqliteRow) -> Result<LedgerEntry, RepositoryError> {
        let entry_id: String = row.try_get("entry_id")?;
        let records = self.load_records(&entry_id).await?;

        let kind_raw: String = row.try_get("kind")?;
        let kind = LedgerEntryKind::parse(&kind_raw)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown ledger kind `{kind_raw}`")))?;

        let plan_status_raw: String = row.try_get("plan_status")?;
        let plan_status = PlanStatus::parse(&plan_status_raw).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown plan status `{plan_status_raw}`"))
        })?;

        let plan_json: String = row.try_get("plan_json")?;
        let plan: CreationPlan = serde_json::from_str(&plan_json)
            .map_err(|error| RepositoryError::Decode(format!("invalid plan_json: {error}")))?;

        let next_steps_json: String = row.try_get("next_steps_json")?;
        let next_steps: Vec<String> = serde_json::from_str(&next_steps_json).map_err(|error| {
            RepositoryError::Decode(format!("invalid next_steps_json: {error}"))
        })?;

        Ok(LedgerEntry {
            entry_id: LedgerEntryId(entry_id),
            session_id: SessionId(row.try_get("session_id")?),
            kind,
            version: parse_u32("version", row.try_get("version")?)?,
            plan,
            plan_status,
            rollback_failed: row.try_get::<i64, _>("rollback_failed")? != 0,
            records,
            next_steps,
            content_hash: row.try_get("content_hash")?,
            prev_hash: row.try_get("prev_hash")?,
            entry_hash: row.try_get("entry_hash")?,
            signature: row.try_get("signature")?,
            recorded_at: parse_timestamp("recorded_at", row.try_get("recorded_at")?)?,
        })
    }
}

const ENTRY_COLUMNS: &str = "entry_id,
                session_id,
                kind,
                version,
                plan_id,
                plan_status,
                rollback_failed,
                plan_json,
                next_steps_json,
                content_hash,
                prev_hash,
                entry_hash,
                signature,
                recorded_at";

#[async_trait::async_trait]
impl LedgerRepository for SqlLedgerRepository {
    async fn append_entry(&self, entry: LedgerEntry) -> Result<(), RepositoryError> {
        let plan_json = serde_json::to_string(&entry.plan)
            .map_err(|error| RepositoryError::Decode(format!("plan encoding failed: {error}")))?;
        let next_steps_json = serde_json::to_string(&entry.next_steps).map_err(|error| {
            RepositoryError::Decode(format!("next_steps encoding failed: {error}"))
        })?;

        let mut transaction = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO ledger_entry (
                entry_id,
                session_id,
                kind,
                version,
                plan_id,
                plan_status,
                rollback_failed,
                plan_json,
                next_steps_json,
                content_hash,
                prev_hash,
                entry_hash,
                signature,
                recorded_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.entry_id.0)
        .bind(&entry.session_id.0)
        .bind(entry.kind.as_str())
        .bind(i64::from(entry.version))
        .bind(&entry.plan.id.0)
        .bind(entry.plan_status.as_str())
        .bind(i64::from(entry.rollback_failed))
        .bind(&plan_json)
        .bind(&next_steps_json)
        .bind(&entry.content_hash)
        .bind(entry.prev_hash.as_deref())
        .bind(&entry.entry_hash)
        .bind(&entry.signature)
        .bind(entry.recorded_at.to_rfc3339())
        .execute(&mut *transaction)
        .await;

        if let Err(error) = inserted {
            if let sqlx::Error::Database(ref database_error) = error {
                if database_error.is_unique_violation() {
                    return Err(RepositoryError::DuplicateEntry(entry.entry_id.0.clone()));
                }
            }
            return Err(error.into());
        }

        for (position, record) in entry.records.iter().enumerate() {
            sqlx::query(
                "INSERT INTO execution_record (
                    entry_id,
                    position,
                    node_id,
                    resource_type,
                    purpose,
                    scope,
                    operation,
                    outcome,
                    provider_id,
                    idempotency_key,
                    attempts,
                    error,
                    estimated_monthly_cost,
                    started_at,
                    finished_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&entry.entry_id.0)
            .bind(position as i64)
            .bind(&record.node_id.0)
            .bind(record.spec.resource_type.as_str())
            .bind(record.spec.purpose.as_str())
            .bind(&record.spec.scope)
            .bind(record.operation.as_str())
            .bind(record.outcome.as_str())
            .bind(record.provider_id.as_deref())
            .bind(&record.idempotency_key)
            .bind(i64::from(record.attempts))
            .bind(record.error.as_deref())
            .bind(record.estimated_monthly_cost.to_string())
            .bind(record.started_at.to_rfc3339())
            .bind(record.finished_at.to_rfc3339())
            .execute(&mut *transaction)
            .await?;
        }

        transaction.commit().await?;
        Ok(())
    }

    async fn find_entry(
        &self,
        entry_id: &LedgerEntryId,
    ) -> Result<Option<LedgerEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entry WHERE entry_id = ?"
        ))
        .bind(&entry_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.entry_from_row(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_entries(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entry WHERE session_id = ? ORDER BY version ASC"
        ))
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(self.entry_from_row(row).await?);
        }
        Ok(entries)
    }

    async fn latest_entry(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<LedgerEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entry
             WHERE session_id = ?
             ORDER BY version DESC
             LIMIT 1"
        ))
        .bind(&session_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.entry_from_row(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_active(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                r.node_id,
                r.resource_type,
                r.purpose,
                r.scope,
                r.operation,
                r.outcome,
                r.provider_id,
                r.idempotency_key,
                r.attempts,
                r.error,
                r.estimated_monthly_cost,
                r.started_at,
                r.finished_at
             FROM execution_record r
             JOIN ledger_entry e ON e.entry_id = r.entry_id
             WHERE e.session_id = ?
               AND r.operation = 'create'
               AND r.outcome = 'succeeded'
               AND r.provider_id IS NOT NULL
               AND NOT EXISTS (
                   SELECT 1
                   FROM execution_record d
                   JOIN ledger_entry de ON de.entry_id = d.entry_id
                   WHERE de.session_id = e.session_id
                     AND d.operation = 'delete'
                     AND d.outcome = 'succeeded'
                     AND d.provider_id = r.provider_id
               )
             ORDER BY e.version ASC, r.position ASC",
        )
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: SqliteRow) -> Result<ExecutionRecord, RepositoryError> {
    let resource_type_raw: String = row.try_get("resource_type")?;
    let resource_type = ResourceType::parse(&resource_type_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown resource type `{resource_type_raw}`"))
    })?;

    let operation_raw: String = row.try_get("operation")?;
    let operation = Operation::parse(&operation_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown operation `{operation_raw}`")))?;

    let outcome_raw: String = row.try_get("outcome")?;
    let outcome = RecordOutcome::parse(&outcome_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown outcome `{outcome_raw}`")))?;

    let cost_raw: String = row.try_get("estimated_monthly_cost")?;
    let estimated_monthly_cost = cost_raw.parse::<Decimal>().map_err(|error| {
        RepositoryError::Decode(format!("invalid estimated_monthly_cost `{cost_raw}`: {error}"))
    })?;

    Ok(ExecutionRecord {
        node_id: NodeId(row.try_get("node_id")?),
        spec: ResourceSpec::new(
            resource_type,
            Purpose(row.try_get("purpose")?),
            row.try_get::<String, _>("scope")?,
        ),
        operation,
        outcome,
        provider_id: row.try_get("provider_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        attempts: parse_u32("attempts", row.try_get("attempts")?)?,
        error: row.try_get("error")?,
        estimated_monthly_cost,
        started_at: parse_timestamp("started_at", row.try_get("started_at")?)?,
        finished_at: parse_timestamp("finished_at", row.try_get("finished_at")?)?,
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
