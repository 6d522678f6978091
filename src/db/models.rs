use core::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Stable external chat identifier of a group, stored as its decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct GroupId(pub String);

/// Stable external identifier of a chat user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct UserId(pub i64);

/// Per-group activation record, one row per group. Reactivation updates in
/// place, never duplicates.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GroupActivation {
    pub group_id: GroupId,
    pub group_title: String,
    pub is_active: bool,
    pub activated_by: UserId,
    pub activated_at: NaiveDateTime,
    pub deactivated_at: Option<NaiveDateTime>,
}

/// Per-user accumulator row. `current_xp` is the resettable balance,
/// `total_xp` the lifetime counter that only ever grows; `updated_at`
/// doubles as the reset stamp.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserScore {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub current_xp: i64,
    pub total_xp: i64,
    pub message_count: i64,
    pub last_active: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl UserScore {
    /// Name shown in admin reports: display name, else handle, else a
    /// synthetic placeholder.
    pub fn report_name(&self) -> String {
        self.first_name
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| self.username.clone().filter(|name| !name.is_empty()))
            .unwrap_or_else(|| format!("User{}", self.user_id))
    }
}

/// Global aggregates for the owner-facing status command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub active_groups: i64,
    pub scored_users: i64,
    pub xp_sum: i64,
}

impl From<i64> for GroupId {
    fn from(value: i64) -> Self {
        GroupId(value.to_string())
    }
}

impl From<&str> for GroupId {
    fn from(value: &str) -> Self {
        GroupId(value.to_string())
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;

    fn score(username: Option<&str>, first_name: Option<&str>) -> UserScore {
        let now = Utc::now().naive_utc();
        UserScore {
            user_id: UserId(7),
            username: username.map(str::to_string),
            first_name: first_name.map(str::to_string),
            current_xp: 0,
            total_xp: 0,
            message_count: 0,
            last_active: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_report_name_fallback_chain() {
        assert_eq!(score(Some("handle"), Some("Display")).report_name(), "Display");
        assert_eq!(score(Some("handle"), None).report_name(), "handle");
        assert_eq!(score(Some("handle"), Some("")).report_name(), "handle");
        assert_eq!(score(None, None).report_name(), "User7");
    }
}
