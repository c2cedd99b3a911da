//! Update handlers: Telegram messages in, service replies out.

use std::sync::Arc;

use gitnote_core::{IncomingMessage, NoteService, Outbound};
use teloxide::prelude::*;
use tracing::{debug, warn};

/// Converts a Telegram message into the service's input.
///
/// Media messages contribute their caption. Returns `None` for messages
/// with neither text nor caption, and for messages without a sender
/// (channel posts).
pub fn incoming(msg: &Message) -> Option<IncomingMessage> {
    let text = msg.text().or_else(|| msg.caption())?;
    let user = msg.from.as_ref()?;

    let mut incoming = IncomingMessage::new(user.id.0, msg.chat.id.0, user.full_name(), text)
        .at(msg.date);
    if let Some(username) = &user.username {
        incoming = incoming.with_username(username.clone());
    }
    if let Some(quoted) = msg
        .reply_to_message()
        .and_then(|reply| reply.text().or_else(|| reply.caption()))
    {
        incoming = incoming.with_reply_text(quoted);
    }
    Some(incoming)
}

/// Handle every incoming message.
pub async fn handle_message(
    bot: Bot,
    msg: Message,
    service: Arc<NoteService>,
) -> ResponseResult<()> {
    let Some(incoming) = incoming(&msg) else {
        debug!(chat_id = %msg.chat.id, "Ignoring message without text or sender");
        return Ok(());
    };
    debug!(chat_id = %msg.chat.id, user_id = incoming.user_id, "Message received");

    let replies = service.handle(incoming).await;
    deliver(&bot, replies).await;
    Ok(())
}

/// Sends replies and notifications; a failed send is logged and skipped.
async fn deliver(bot: &Bot, replies: Vec<Outbound>) {
    for reply in replies {
        if let Err(e) = bot.send_message(ChatId(reply.chat_id), &reply.text).await {
            warn!(chat_id = reply.chat_id, error = %e, "Failed to send message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(value: serde_json::Value) -> Message {
        serde_json::from_value(value).unwrap()
    }

    fn private_chat() -> serde_json::Value {
        json!({ "id": 42, "type": "private", "first_name": "Alice" })
    }

    fn alice() -> serde_json::Value {
        json!({
            "id": 42,
            "is_bot": false,
            "first_name": "Alice",
            "last_name": "W",
            "username": "alice_w"
        })
    }

    #[test]
    fn test_incoming_text_message() {
        let msg = message(json!({
            "message_id": 7,
            "date": 1_700_000_000,
            "chat": private_chat(),
            "from": alice(),
            "text": "buy milk"
        }));

        let incoming = incoming(&msg).unwrap();
        assert_eq!(incoming.user_id, 42);
        assert_eq!(incoming.chat_id, 42);
        assert_eq!(incoming.display_name, "Alice W");
        assert_eq!(incoming.username.as_deref(), Some("alice_w"));
        assert_eq!(incoming.text, "buy milk");
        assert_eq!(incoming.sent_at.timestamp(), 1_700_000_000);
        assert!(incoming.reply_text.is_none());
    }

    #[test]
    fn test_incoming_keeps_replied_text() {
        let msg = message(json!({
            "message_id": 8,
            "date": 1_700_000_100,
            "chat": private_chat(),
            "from": alice(),
            "text": "/save quote",
            "reply_to_message": {
                "message_id": 5,
                "date": 1_700_000_000,
                "chat": private_chat(),
                "from": alice(),
                "text": "to be or not to be"
            }
        }));

        let incoming = incoming(&msg).unwrap();
        assert_eq!(incoming.reply_text.as_deref(), Some("to be or not to be"));
    }

    #[test]
    fn test_incoming_uses_caption_of_media() {
        let msg = message(json!({
            "message_id": 10,
            "date": 1_700_000_000,
            "chat": private_chat(),
            "from": alice(),
            "photo": [{
                "file_id": "AgADBAAD",
                "file_unique_id": "AQADBAAD",
                "width": 90,
                "height": 90,
                "file_size": 1024
            }],
            "caption": "receipt from the hardware store"
        }));

        let incoming = incoming(&msg).unwrap();
        assert_eq!(incoming.text, "receipt from the hardware store");
    }

    #[test]
    fn test_incoming_skips_messages_without_text() {
        let msg = message(json!({
            "message_id": 9,
            "date": 1_700_000_000,
            "chat": private_chat(),
            "from": alice(),
            "location": { "longitude": 13.4, "latitude": 52.5 }
        }));

        assert!(incoming(&msg).is_none());
    }
}
