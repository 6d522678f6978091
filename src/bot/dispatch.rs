use tracing::instrument;

use crate::bot::commands::{AdminCommand, AdminCommands, CommandScope};
use crate::bot::telegram::{CallbackQuery, Message, Update};
use crate::context::AppContext;
use crate::db::models::UserId;
use crate::engine::{ChatKind, MessageEvent};

/// Routes one update to the command surface or the scoring engine. Updates
/// carrying neither a text message nor a callback press are dropped here.
#[instrument(skip(ctx, update), fields(update_id = update.update_id))]
pub async fn handle_update(ctx: &AppContext, update: Update) {
    if let Some(message) = update.message {
        handle_message(ctx, message).await;
    } else if let Some(callback) = update.callback_query {
        handle_callback(ctx, callback).await;
    }
}

async fn handle_message(ctx: &AppContext, message: Message) {
    let (Some(text), Some(from)) = (message.text.as_deref(), message.from.as_ref()) else {
        return;
    };

    let kind = chat_kind(&message.chat.kind);
    let sender = UserId(from.id);

    if let Some(command) = AdminCommand::parse(text) {
        // the owner gate sits in front of every command, evaluated once
        let reply = if ctx.commands.is_owner(&sender) {
            let scope = CommandScope {
                chat_id: message.chat.id,
                kind,
                title: message.chat.title.clone(),
                sender,
            };
            ctx.commands.dispatch(command, &scope).await
        } else {
            tracing::warn!(sender = %sender, "command from non-owner rejected");
            AdminCommands::denial()
        };

        if let Err(e) = ctx
            .bot
            .send_message(message.chat.id, &reply.text, reply.keyboard.as_ref())
            .await
        {
            tracing::error!(error = ?e, "failed to deliver command reply");
        }

        return;
    }

    let event = MessageEvent {
        group: message.chat.id.into(),
        kind,
        sender,
        username: from.username.clone(),
        first_name: from.first_name.clone(),
        text: text.to_string(),
    };

    ctx.engine.handle(&event).await;
}

async fn handle_callback(ctx: &AppContext, callback: CallbackQuery) {
    let Some(data) = callback.data.as_deref() else {
        return;
    };

    let reply = ctx
        .commands
        .handle_callback(&UserId(callback.from.id), data)
        .await;

    if let Err(e) = ctx
        .bot
        .answer_callback_query(&callback.id, Some(&reply.answer))
        .await
    {
        tracing::error!(error = ?e, "failed to answer callback");
    }

    // replace the confirmation prompt so the buttons cannot linger
    if let (Some(edit), Some(message)) = (reply.edit, callback.message)
        && let Err(e) = ctx
            .bot
            .edit_message_text(message.chat.id, message.message_id, &edit)
            .await
    {
        tracing::error!(error = ?e, "failed to edit confirmation prompt");
    }
}

/// Telegram reports four chat types; only "private" is one-on-one. Groups,
/// supergroups and channels are all scored the same way.
fn chat_kind(raw: &str) -> ChatKind {
    if raw == "private" {
        ChatKind::Direct
    } else {
        ChatKind::Group
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_chat_kind_classification() {
        assert_eq!(chat_kind("private"), ChatKind::Direct);
        assert_eq!(chat_kind("group"), ChatKind::Group);
        assert_eq!(chat_kind("supergroup"), ChatKind::Group);
        assert_eq!(chat_kind("channel"), ChatKind::Group);
    }
}
