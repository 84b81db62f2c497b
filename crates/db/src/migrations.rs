use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::connect_with_settings;

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "ledger_entry",
        "execution_record",
        "idx_ledger_entry_session_id",
        "idx_ledger_entry_recorded_at",
        "idx_execution_record_provider_id",
        "idx_execution_record_outcome",
    ];

    #[tokio::test]
    async fn migrations_create_ledger_tables_and_indexes() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for object in MANAGED_SCHEMA_OBJECTS {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master WHERE name = ?",
            )
            .bind(object)
            .fetch_one(&pool)
            .await
            .expect("query sqlite_master")
            .get::<i64, _>("count");

            assert_eq!(count, 1, "expected schema object `{object}` to exist");
        }

        pool.close().await;
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run");
        pool.close().await;
    }
}
