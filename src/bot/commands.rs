use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::instrument;
use uuid::Uuid;

use crate::bot::telegram::{InlineKeyboardButton, InlineKeyboardMarkup, Transport};
use crate::db::models::{GroupId, StatusReport, UserId, UserScore};
use crate::db::prelude::{ActivationStore, ScoreStore};
use crate::engine::ChatKind;

/// A reset confirmation goes stale after this long; a stale button press is
/// answered but changes nothing.
pub const RESET_TOKEN_TTL: Duration = Duration::from_secs(300);

const CALLBACK_PREFIX: &str = "xp_reset";

pub const ACCESS_DENIED: &str = "🚫 This bot answers to its owner only.";
const GROUP_ONLY: &str = "❌ This command only works inside a group.";
const PRIVATE_ONLY: &str = "❌ This command is only available in a private chat with the bot.";
const NEEDS_ADMIN: &str =
    "❌ Promote the bot to group administrator first, then send /on1 again.";
const GENERIC_FAILURE: &str = "❌ Something went wrong, please try again.";
const NO_SCORES: &str = "📊 No XP recorded yet.";
const STALE_CONFIRMATION: &str = "This confirmation has expired.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    Start,
    Activate,
    Deactivate,
    ListXp,
    StatusXp,
}

impl AdminCommand {
    /// First token of the message, with an optional `@botname` suffix
    /// stripped. Unknown commands are ignored, not answered.
    pub fn parse(text: &str) -> Option<Self> {
        let first = text.split_whitespace().next()?;
        let name = first.split('@').next().unwrap_or(first);

        match name {
            "/start" => Some(AdminCommand::Start),
            "/on1" => Some(AdminCommand::Activate),
            "/off1" => Some(AdminCommand::Deactivate),
            "/list_xp" => Some(AdminCommand::ListXp),
            "/status_xp" => Some(AdminCommand::StatusXp),
            _ => None,
        }
    }
}

/// Where a command arrived from, as far as the handlers care.
#[derive(Debug, Clone)]
pub struct CommandScope {
    pub chat_id: i64,
    pub kind: ChatKind,
    pub title: Option<String>,
    pub sender: UserId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<InlineKeyboardMarkup>,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }
}

/// Outcome of an inline-keyboard press: a short toast answer, plus an
/// optional replacement for the prompt message.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackReply {
    pub answer: String,
    pub edit: Option<String>,
}

#[derive(Debug)]
struct PendingReset {
    token: String,
    issued_at: Instant,
}

/// Owner-gated administrative surface. The owner check itself lives in
/// [`Self::is_owner`] and is evaluated once by the dispatcher, not inside
/// each handler.
pub struct AdminCommands {
    owner_id: i64,
    activation: Arc<dyn ActivationStore>,
    scores: Arc<dyn ScoreStore>,
    transport: Arc<dyn Transport>,
    pending_reset: Mutex<Option<PendingReset>>,
}

impl AdminCommands {
    pub fn new(
        owner_id: i64,
        activation: Arc<dyn ActivationStore>,
        scores: Arc<dyn ScoreStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            owner_id,
            activation,
            scores,
            transport,
            pending_reset: Mutex::new(None),
        }
    }

    /// The entire authorization model: a flat allow-list of size one.
    pub fn is_owner(&self, user: &UserId) -> bool {
        user.0 == self.owner_id
    }

    pub fn denial() -> Reply {
        Reply::text(ACCESS_DENIED)
    }

    #[instrument(skip(self, scope), fields(chat = scope.chat_id, sender = %scope.sender))]
    pub async fn dispatch(&self, command: AdminCommand, scope: &CommandScope) -> Reply {
        match command {
            AdminCommand::Start => Self::start(),
            AdminCommand::Activate => self.activate(scope).await,
            AdminCommand::Deactivate => self.deactivate(scope).await,
            AdminCommand::ListXp => self.list_xp(scope).await,
            AdminCommand::StatusXp => self.status_xp(scope).await,
        }
    }

    fn start() -> Reply {
        Reply::text(
            "🤖 XP bot at your service.\n\n\
             /on1 — activate scoring in a group\n\
             /off1 — deactivate scoring\n\
             /list_xp — ranked report and reset (private chat)\n\
             /status_xp — activity summary",
        )
    }

    async fn activate(&self, scope: &CommandScope) -> Reply {
        if scope.kind != ChatKind::Group {
            return Reply::text(GROUP_ONLY);
        }

        // scoring needs message visibility, which only an elevated role
        // guarantees; a negative or failed check gets guidance, not an error
        match self.transport.bot_is_admin(scope.chat_id).await {
            Ok(true) => (),
            Ok(false) => return Reply::text(NEEDS_ADMIN),
            Err(e) => {
                tracing::error!(error = ?e, "membership query failed during activation");
                return Reply::text(NEEDS_ADMIN);
            }
        }

        let group = GroupId::from(scope.chat_id);
        let title = scope.title.as_deref().unwrap_or("untitled");

        match self.activation.activate(&group, title, scope.sender).await {
            Ok(()) => Reply::text(
                "✅ XP bot activated for this group! Messages will now earn XP.",
            ),
            Err(e) => {
                tracing::error!(error = ?e, "activation write failed");
                Reply::text(GENERIC_FAILURE)
            }
        }
    }

    async fn deactivate(&self, scope: &CommandScope) -> Reply {
        let group = GroupId::from(scope.chat_id);

        if let Err(e) = self.activation.deactivate(&group).await {
            tracing::error!(error = ?e, "deactivation write failed");
            return Reply::text(GENERIC_FAILURE);
        }

        // departure is best-effort: the deactivation is already durable
        if scope.kind == ChatKind::Group
            && let Err(e) = self.transport.leave_chat(scope.chat_id).await
        {
            tracing::warn!(error = ?e, "failed to leave group after deactivation");
        }

        Reply::text("✅ XP bot deactivated.")
    }

    async fn list_xp(&self, scope: &CommandScope) -> Reply {
        if scope.kind != ChatKind::Direct {
            return Reply::text(PRIVATE_ONLY);
        }

        let rows = match self.scores.list_all(1).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = ?e, "listing failed");
                return Reply::text(GENERIC_FAILURE);
            }
        };

        if rows.is_empty() {
            return Reply::text(NO_SCORES);
        }

        let token = Uuid::new_v4().to_string();
        let keyboard = reset_keyboard(&token);

        {
            let mut pending = self
                .pending_reset
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *pending = Some(PendingReset {
                token,
                issued_at: Instant::now(),
            });
        }

        let mut text = format_report(&rows);
        text.push_str("\n⚠️ Reset all current XP balances?");

        Reply {
            text,
            keyboard: Some(keyboard),
        }
    }

    async fn status_xp(&self, scope: &CommandScope) -> Reply {
        if scope.kind == ChatKind::Group {
            let group = GroupId::from(scope.chat_id);
            return if self.activation.is_active(&group).await {
                Reply::text("✅ XP scoring is active in this group.")
            } else {
                Reply::text("❌ XP scoring is not active in this group.")
            };
        }

        match self.global_status().await {
            Ok(report) => Reply::text(format!(
                "📊 XP bot status:\n\n\
                 👥 Active groups: {}\n\
                 👤 Users holding XP: {}\n\
                 ⭐ Total current XP: {}",
                report.active_groups, report.scored_users, report.xp_sum
            )),
            Err(e) => {
                tracing::error!(error = ?e, "status aggregation failed");
                Reply::text(GENERIC_FAILURE)
            }
        }
    }

    async fn global_status(&self) -> crate::db::StoreResult<StatusReport> {
        Ok(StatusReport {
            active_groups: self.activation.count_active().await?,
            scored_users: self.scores.count_scored().await?,
            xp_sum: self.scores.sum_current().await?,
        })
    }

    /// Confirmation button handler. Consuming the token makes the flow
    /// re-entrant: pressing confirm twice resets once and answers once.
    #[instrument(skip(self, data), fields(from = %from))]
    pub async fn handle_callback(&self, from: &UserId, data: &str) -> CallbackReply {
        if !self.is_owner(from) {
            return CallbackReply {
                answer: ACCESS_DENIED.to_string(),
                edit: None,
            };
        }

        let mut parts = data.splitn(3, ':');
        let (prefix, action, token) = (
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
        );

        if prefix != CALLBACK_PREFIX || !self.take_pending(token) {
            return CallbackReply {
                answer: STALE_CONFIRMATION.to_string(),
                edit: None,
            };
        }

        match action {
            "confirm" => match self.scores.reset_all().await {
                Ok(affected) => CallbackReply {
                    answer: "Reset complete.".to_string(),
                    edit: Some(format!("✅ All XP reset — {affected} balances zeroed.")),
                },
                Err(e) => {
                    tracing::error!(error = ?e, "reset failed");
                    CallbackReply {
                        answer: "Reset failed.".to_string(),
                        edit: Some("❌ Resetting XP failed, balances are unchanged.".to_string()),
                    }
                }
            },
            "cancel" => CallbackReply {
                answer: "Cancelled.".to_string(),
                edit: Some("❌ XP reset cancelled.".to_string()),
            },
            _ => CallbackReply {
                answer: STALE_CONFIRMATION.to_string(),
                edit: None,
            },
        }
    }

    /// Consumes the pending token if it matches and is still fresh.
    fn take_pending(&self, token: &str) -> bool {
        let mut pending = self
            .pending_reset
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match pending.as_ref() {
            Some(reset) if reset.token == token && reset.issued_at.elapsed() < RESET_TOKEN_TTL => {
                *pending = None;
                true
            }
            _ => false,
        }
    }
}

fn reset_keyboard(token: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![vec![
            InlineKeyboardButton {
                text: "✅ Yes, reset".to_string(),
                callback_data: format!("{CALLBACK_PREFIX}:confirm:{token}"),
            },
            InlineKeyboardButton {
                text: "❌ No, keep".to_string(),
                callback_data: format!("{CALLBACK_PREFIX}:cancel:{token}"),
            },
        ]],
    }
}

fn format_report(rows: &[UserScore]) -> String {
    let mut text = String::from("🏆 XP leaderboard:\n\n");

    for (rank, row) in rows.iter().enumerate() {
        text.push_str(&format!(
            "{}. {}: {} XP\n",
            rank + 1,
            row.report_name(),
            row.current_xp
        ));
    }

    text.push_str(&format!("\n📈 Users holding XP: {}\n", rows.len()));
    text
}
