use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;

pub mod activation;
pub mod models;
pub mod retention;
pub mod scores;

pub mod prelude {
    pub use crate::db::models::{GroupActivation, GroupId, StatusReport, UserId, UserScore};
    pub use crate::db::activation::ActivationStore;
    pub use crate::db::scores::ScoreStore;
    pub use crate::db::{StoreErr, StoreResult};
}

#[instrument(skip(database_url))]
pub async fn connect(database_url: &str) -> StoreResult<PgPool> {
    let pool = PgPool::connect(database_url).await?;
    tracing::info!("connected to postgres");

    Ok(pool)
}

/// Idempotent schema bootstrap, run once at startup before any handler is
/// live. Runtime DDL keeps the binary buildable without a reachable database.
#[instrument(skip(pool))]
pub async fn ensure_schema(pool: &PgPool) -> StoreResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS active_groups (
            group_id       TEXT PRIMARY KEY,
            group_title    TEXT NOT NULL,
            is_active      BOOLEAN NOT NULL,
            activated_by   BIGINT NOT NULL,
            activated_at   TIMESTAMP NOT NULL,
            deactivated_at TIMESTAMP NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_xp (
            user_id       BIGINT PRIMARY KEY,
            username      TEXT NULL,
            first_name    TEXT NULL,
            current_xp    BIGINT NOT NULL,
            total_xp      BIGINT NOT NULL,
            message_count BIGINT NOT NULL,
            last_active   TIMESTAMP NOT NULL,
            created_at    TIMESTAMP NOT NULL,
            updated_at    TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!("schema ensured");
    Ok(())
}

/// Health-endpoint probe; any failure means "disconnected", never an error.
#[instrument(skip(pool))]
pub async fn probe(pool: &PgPool) -> bool {
    match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = ?e, "database probe failed");
            false
        }
    }
}

pub type StoreResult<T> = core::result::Result<T, StoreErr>;

#[derive(Debug, Error)]
pub enum StoreErr {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}
