use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::db::models::{GroupActivation, UserScore};
use crate::db::prelude::{ActivationStore, ScoreStore};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 3600);
pub const STALE_HORIZON: Duration = Duration::from_secs(30 * 24 * 3600);

/// Saturating `now - older_than`, total for any input duration.
pub fn cutoff(now: NaiveDateTime, older_than: Duration) -> NaiveDateTime {
    chrono::Duration::from_std(older_than)
        .ok()
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(NaiveDateTime::MIN)
}

/// A user row may be dropped only when it holds no balance AND has been idle
/// past the horizon. A zero-XP user who was active recently is exempt:
/// purging on idle time alone could evict a user whose group is still live.
pub fn user_purgeable(row: &UserScore, horizon: NaiveDateTime) -> bool {
    row.current_xp == 0 && row.last_active < horizon
}

/// A group row may be dropped only once it is explicitly inactive and has
/// stayed so past the horizon. Active groups are never purge candidates.
pub fn group_purgeable(group: &GroupActivation, horizon: NaiveDateTime) -> bool {
    !group.is_active
        && group
            .deactivated_at
            .map(|at| at < horizon)
            .unwrap_or(false)
}

/// Daily background sweep over both tables. Failures are logged and retried
/// on the next tick; the sweep never takes the process down.
#[instrument(skip(activation, scores))]
pub fn spawn_sweeper(
    activation: Arc<dyn ActivationStore>,
    scores: Arc<dyn ScoreStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await; // immediate first tick is skipped

        loop {
            interval.tick().await;

            match scores.purge_stale(STALE_HORIZON).await {
                Ok(purged) => tracing::info!(purged, "swept stale user rows"),
                Err(e) => tracing::error!(error = ?e, "user retention sweep failed"),
            }

            match activation.purge_inactive(STALE_HORIZON).await {
                Ok(purged) => tracing::info!(purged, "swept inactive group rows"),
                Err(e) => tracing::error!(error = ?e, "group retention sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::models::{GroupId, UserId};
    use chrono::Utc;

    fn user_row(current_xp: i64, idle: chrono::Duration) -> UserScore {
        let now = Utc::now().naive_utc();
        UserScore {
            user_id: UserId(1),
            username: None,
            first_name: None,
            current_xp,
            total_xp: current_xp.max(0),
            message_count: 1,
            last_active: now - idle,
            created_at: now,
            updated_at: now,
        }
    }

    fn group_row(is_active: bool, deactivated: Option<chrono::Duration>) -> GroupActivation {
        let now = Utc::now().naive_utc();
        GroupActivation {
            group_id: GroupId::from(-1),
            group_title: "g".into(),
            is_active,
            activated_by: UserId(1),
            activated_at: now,
            deactivated_at: deactivated.map(|ago| now - ago),
        }
    }

    fn month_ago() -> NaiveDateTime {
        cutoff(Utc::now().naive_utc(), STALE_HORIZON)
    }

    #[test]
    fn test_user_purge_predicate() {
        // zero balance, idle for two months: purgeable
        assert!(user_purgeable(&user_row(0, chrono::Duration::days(60)), month_ago()));

        // zero balance but recently active: exempt
        assert!(!user_purgeable(&user_row(0, chrono::Duration::hours(1)), month_ago()));

        // holds a balance: never purged regardless of idle time
        assert!(!user_purgeable(&user_row(20, chrono::Duration::days(60)), month_ago()));
    }

    #[test]
    fn test_group_purge_predicate() {
        assert!(group_purgeable(
            &group_row(false, Some(chrono::Duration::days(60))),
            month_ago()
        ));

        // active groups are never candidates, whatever their age
        assert!(!group_purgeable(
            &group_row(true, Some(chrono::Duration::days(60))),
            month_ago()
        ));

        // recently deactivated: not yet
        assert!(!group_purgeable(
            &group_row(false, Some(chrono::Duration::hours(2))),
            month_ago()
        ));

        // inactive with no deactivation stamp: keep, provenance unknown
        assert!(!group_purgeable(&group_row(false, None), month_ago()));
    }

    #[test]
    fn test_cutoff_saturates() {
        let now = Utc::now().naive_utc();
        assert_eq!(cutoff(now, Duration::MAX), NaiveDateTime::MIN);
        assert!(cutoff(now, Duration::from_secs(60)) < now);
    }
}
