use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::cache::TtlCache;
use crate::db::models::{GroupActivation, GroupId, UserId};
use crate::db::retention::cutoff;
use crate::db::StoreResult;

/// Cached activation lookups go stale after this long; writes re-prime the
/// entry synchronously so the window only applies to out-of-band changes.
pub const ACTIVATION_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Gate deciding whether a group's messages are eligible for scoring.
///
/// The durable row is the effect of record; any cache in front of it is a
/// non-authoritative accelerator.
#[async_trait]
pub trait ActivationStore: Send + Sync {
    /// Fail-closed: a store read failure reports `false` (unscored beats
    /// mis-scored).
    async fn is_active(&self, group: &GroupId) -> bool;

    /// Upsert by group id: flips `is_active` on, clears `deactivated_at`,
    /// and re-primes the cache entry before returning success.
    async fn activate(&self, group: &GroupId, title: &str, activated_by: UserId)
    -> StoreResult<()>;

    async fn deactivate(&self, group: &GroupId) -> StoreResult<()>;

    async fn count_active(&self) -> StoreResult<i64>;

    /// Retention sweep: removes only groups that are inactive and have been
    /// so for longer than the horizon.
    async fn purge_inactive(&self, older_than: Duration) -> StoreResult<u64>;
}

pub struct PgActivationStore {
    pool: PgPool,
    cache: TtlCache<GroupId, bool>,
}

impl PgActivationStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: TtlCache::new(ACTIVATION_CACHE_TTL),
        }
    }

    /// Write paths prime the entry with the state they just persisted
    /// instead of dropping it, so a fresh change can never be read stale.
    /// Failed reads never pass through here.
    fn prime(&self, group: &GroupId, active: bool) {
        self.cache.insert(group.clone(), active);
    }
}

#[async_trait]
impl ActivationStore for PgActivationStore {
    #[instrument(skip(self), fields(group = %group))]
    async fn is_active(&self, group: &GroupId) -> bool {
        if let Some(active) = self.cache.get(group) {
            return active;
        }

        let fetched = sqlx::query_scalar::<_, bool>(
            "SELECT is_active FROM active_groups WHERE group_id = $1",
        )
        .bind(group)
        .fetch_optional(&self.pool)
        .await;

        match fetched {
            Ok(row) => {
                let active = row.unwrap_or(false);
                self.cache.insert(group.clone(), active);
                active
            }
            Err(e) => {
                // failures are not cached: the store should be retried on
                // the next lookup once it recovers
                tracing::error!(error = ?e, "activation lookup failed, treating group as inactive");
                false
            }
        }
    }

    #[instrument(skip(self, title), fields(group = %group))]
    async fn activate(
        &self,
        group: &GroupId,
        title: &str,
        activated_by: UserId,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO active_groups (
                group_id,
                group_title,
                is_active,
                activated_by,
                activated_at,
                deactivated_at
            )
            VALUES ($1, $2, TRUE, $3, NOW(), NULL)
            ON CONFLICT (group_id)
            DO UPDATE SET
                group_title = EXCLUDED.group_title,
                is_active = TRUE,
                activated_by = EXCLUDED.activated_by,
                activated_at = NOW(),
                deactivated_at = NULL
            "#,
        )
        .bind(group)
        .bind(title)
        .bind(activated_by)
        .execute(&self.pool)
        .await?;

        self.prime(group, true);
        tracing::info!("group activated");

        Ok(())
    }

    #[instrument(skip(self), fields(group = %group))]
    async fn deactivate(&self, group: &GroupId) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE active_groups
            SET is_active = FALSE, deactivated_at = NOW()
            WHERE group_id = $1
            "#,
        )
        .bind(group)
        .execute(&self.pool)
        .await?;

        self.prime(group, false);
        tracing::info!("group deactivated");

        Ok(())
    }

    #[instrument(skip(self))]
    async fn count_active(&self) -> StoreResult<i64> {
        Ok(
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM active_groups WHERE is_active",
            )
            .fetch_one(&self.pool)
            .await?,
        )
    }

    #[instrument(skip(self))]
    async fn purge_inactive(&self, older_than: Duration) -> StoreResult<u64> {
        let horizon = cutoff(Utc::now().naive_utc(), older_than);

        let result = sqlx::query(
            r#"
            DELETE FROM active_groups
            WHERE is_active = FALSE
              AND deactivated_at IS NOT NULL
              AND deactivated_at < $1
            "#,
        )
        .bind(horizon)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Map-backed activation store used in place of Postgres by the test suite.
#[derive(Default)]
pub struct MemoryActivationStore {
    groups: RwLock<Vec<GroupActivation>>,
}

impl MemoryActivationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<GroupActivation> {
        self.groups.read().await.clone()
    }
}

#[async_trait]
impl ActivationStore for MemoryActivationStore {
    async fn is_active(&self, group: &GroupId) -> bool {
        self.groups
            .read()
            .await
            .iter()
            .find(|g| &g.group_id == group)
            .map(|g| g.is_active)
            .unwrap_or(false)
    }

    async fn activate(
        &self,
        group: &GroupId,
        title: &str,
        activated_by: UserId,
    ) -> StoreResult<()> {
        let mut groups = self.groups.write().await;
        let now = Utc::now().naive_utc();

        match groups.iter_mut().find(|g| &g.group_id == group) {
            Some(existing) => {
                existing.group_title = title.to_string();
                existing.is_active = true;
                existing.activated_by = activated_by;
                existing.activated_at = now;
                existing.deactivated_at = None;
            }
            None => groups.push(GroupActivation {
                group_id: group.clone(),
                group_title: title.to_string(),
                is_active: true,
                activated_by,
                activated_at: now,
                deactivated_at: None,
            }),
        }

        Ok(())
    }

    async fn deactivate(&self, group: &GroupId) -> StoreResult<()> {
        let mut groups = self.groups.write().await;
        if let Some(existing) = groups.iter_mut().find(|g| &g.group_id == group) {
            existing.is_active = false;
            existing.deactivated_at = Some(Utc::now().naive_utc());
        }

        Ok(())
    }

    async fn count_active(&self) -> StoreResult<i64> {
        Ok(self.groups.read().await.iter().filter(|g| g.is_active).count() as i64)
    }

    async fn purge_inactive(&self, older_than: Duration) -> StoreResult<u64> {
        let horizon = cutoff(Utc::now().naive_utc(), older_than);
        let mut groups = self.groups.write().await;

        let before = groups.len();
        groups.retain(|g| !crate::db::retention::group_purgeable(g, horizon));

        Ok((before - groups.len()) as u64)
    }
}
