use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::instrument;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Ceiling on every outbound call so a slow Bot API response delays one
/// handler, never the dispatcher.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Server-side hold on getUpdates; the client-side timeout for that one call
/// has to sit above it.
const LONG_POLL_HOLD_SECS: u64 = 50;

// ---
//  wire types (minimal serde subset of the Bot API)
// ---

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

// ---
//  client
// ---

/// Thin Bot API client over a shared `reqwest` connection pool. Clones share
/// the pool and the cached identity.
#[derive(Debug, Clone)]
pub struct Bot {
    client: reqwest::Client,
    base: String,
    me: Arc<OnceCell<User>>,
}

impl Bot {
    pub fn new(token: &str) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base: format!("{TELEGRAM_API_BASE}/bot{token}"),
            me: Arc::new(OnceCell::new()),
        })
    }

    #[instrument(skip(self, payload))]
    async fn call<T>(&self, method: &'static str, payload: &Value) -> TransportResult<T>
    where
        T: DeserializeOwned,
    {
        let res = self
            .client
            .post(format!("{}/{}", self.base, method))
            .json(payload)
            .send()
            .await?;

        let body = res.json::<ApiResponse<T>>().await?;
        match body.result {
            Some(result) if body.ok => Ok(result),
            _ => {
                let description = body.description.unwrap_or_else(|| "no description".into());
                tracing::error!(method, description, "bot api call rejected");
                Err(TransportErr::Api {
                    method,
                    description,
                })
            }
        }
    }

    /// Like [`Self::call`] but with a per-request timeout for the long poll.
    #[instrument(skip(self, payload))]
    async fn call_long_poll<T>(&self, method: &'static str, payload: &Value) -> TransportResult<T>
    where
        T: DeserializeOwned,
    {
        let res = self
            .client
            .post(format!("{}/{}", self.base, method))
            .timeout(Duration::from_secs(LONG_POLL_HOLD_SECS + 10))
            .json(payload)
            .send()
            .await?;

        let body = res.json::<ApiResponse<T>>().await?;
        match body.result {
            Some(result) if body.ok => Ok(result),
            _ => Err(TransportErr::Api {
                method,
                description: body.description.unwrap_or_else(|| "no description".into()),
            }),
        }
    }

    /// Own identity, fetched once and cached for the process lifetime.
    pub async fn me(&self) -> TransportResult<&User> {
        self.me
            .get_or_try_init(|| async { self.call::<User>("getMe", &json!({})).await })
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_updates(&self, offset: i64) -> TransportResult<Vec<Update>> {
        self.call_long_poll(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": LONG_POLL_HOLD_SECS,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    #[instrument(skip(self, text, keyboard))]
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> TransportResult<Message> {
        let mut payload = json!({ "chat_id": chat_id, "text": text });
        if let Some(keyboard) = keyboard {
            payload["reply_markup"] = serde_json::to_value(keyboard)?;
        }

        self.call("sendMessage", &payload).await
    }

    #[instrument(skip(self, text))]
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> TransportResult<Value> {
        self.call(
            "editMessageText",
            &json!({ "chat_id": chat_id, "message_id": message_id, "text": text }),
        )
        .await
    }

    #[instrument(skip(self, text))]
    pub async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> TransportResult<Value> {
        let mut payload = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            payload["text"] = Value::String(text.to_string());
        }

        self.call("answerCallbackQuery", &payload).await
    }

    #[instrument(skip(self))]
    pub async fn get_chat_member(&self, chat_id: i64, user_id: i64) -> TransportResult<ChatMember> {
        self.call(
            "getChatMember",
            &json!({ "chat_id": chat_id, "user_id": user_id }),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn set_webhook(&self, url: &str) -> TransportResult<Value> {
        self.call("setWebhook", &json!({ "url": url })).await
    }

    #[instrument(skip(self))]
    pub async fn delete_webhook(&self) -> TransportResult<Value> {
        self.call("deleteWebhook", &json!({})).await
    }
}

/// The two transport calls admin flows depend on, kept behind a trait so the
/// command handlers are testable with a stub.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether this bot holds an elevated membership role in the group.
    async fn bot_is_admin(&self, chat_id: i64) -> TransportResult<bool>;

    async fn leave_chat(&self, chat_id: i64) -> TransportResult<()>;
}

#[async_trait]
impl Transport for Bot {
    #[instrument(skip(self))]
    async fn bot_is_admin(&self, chat_id: i64) -> TransportResult<bool> {
        let me = self.me().await?;
        let member = self.get_chat_member(chat_id, me.id).await?;

        Ok(matches!(member.status.as_str(), "administrator" | "creator"))
    }

    #[instrument(skip(self))]
    async fn leave_chat(&self, chat_id: i64) -> TransportResult<()> {
        self.call::<Value>("leaveChat", &json!({ "chat_id": chat_id }))
            .await?;
        Ok(())
    }
}

pub type TransportResult<T> = core::result::Result<T, TransportErr>;

#[derive(Debug, Error)]
pub enum TransportErr {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error("bot api rejected {method}: {description}")]
    Api {
        method: &'static str,
        description: String,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_update_envelope_parses() {
        let raw = r#"{
            "update_id": 10,
            "message": {
                "message_id": 1,
                "from": {"id": 42, "username": "someone", "first_name": "Some"},
                "chat": {"id": -1001, "type": "supergroup", "title": "demo"},
                "text": "hello\nthere"
            }
        }"#;

        let update: Update = serde_json::from_str(raw).unwrap();
        let message = update.message.unwrap();

        assert_eq!(update.update_id, 10);
        assert_eq!(message.chat.id, -1001);
        assert_eq!(message.chat.kind, "supergroup");
        assert_eq!(message.from.unwrap().id, 42);
        assert_eq!(message.text.as_deref(), Some("hello\nthere"));
    }

    #[test]
    fn test_callback_envelope_parses() {
        let raw = r#"{
            "update_id": 11,
            "callback_query": {
                "id": "abc",
                "from": {"id": 42, "first_name": "Some"},
                "data": "xp_reset:confirm:token"
            }
        }"#;

        let update: Update = serde_json::from_str(raw).unwrap();
        let callback = update.callback_query.unwrap();

        assert_eq!(callback.id, "abc");
        assert_eq!(callback.data.as_deref(), Some("xp_reset:confirm:token"));
    }

    #[test]
    fn test_error_envelope() {
        let raw = r#"{"ok": false, "error_code": 403, "description": "Forbidden"}"#;
        let body: ApiResponse<Value> = serde_json::from_str(raw).unwrap();

        assert!(!body.ok);
        assert_eq!(body.description.as_deref(), Some("Forbidden"));
        assert!(body.result.is_none());
    }
}
