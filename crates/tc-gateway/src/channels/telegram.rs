//! Telegram Bot API channel adapter.
//!
//! Runs long polling in a background task and turns updates into
//! [`Inbound`] events; [`TelegramClient`] is the outbound [`ChatSink`].

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use tc_types::config::TelegramConfig;

use super::{ChatSink, Inbound, Keyboard};

/// Telegram rejects messages longer than this.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Long-poll timeout passed to `getUpdates`, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

// ── Telegram API types ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
    callback_query: Option<TgCallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    from: Option<TgUser>,
    chat: TgChat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgCallbackQuery {
    id: String,
    from: TgUser,
    message: Option<TgMessage>,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

impl TgUpdate {
    /// Convert to an inbound event, dropping anything we don't handle.
    fn into_inbound(self) -> Option<Inbound> {
        if let Some(cb) = self.callback_query {
            let message = cb.message?;
            return Some(Inbound::Callback {
                callback_id: cb.id,
                chat_id: message.chat.id,
                user_id: cb.from.id,
                message_id: message.message_id,
                data: cb.data.unwrap_or_default(),
            });
        }
        let msg = self.message?;
        let text = msg.text.filter(|t| !t.trim().is_empty())?;
        Some(Inbound::Message {
            chat_id: msg.chat.id,
            user_id: msg.from.map(|u| u.id).unwrap_or(0),
            message_id: msg.message_id,
            text,
        })
    }
}

/// Bot API client bound to one token.
#[derive(Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    token: String,
}

impl TelegramClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.token)
    }

    async fn call(&self, method: &str, params: &Value) -> Result<Value> {
        let resp: TgResponse<Value> = self
            .client
            .post(self.url(method))
            .json(params)
            .send()
            .await?
            .json()
            .await?;
        if !resp.ok {
            return Err(anyhow::anyhow!(
                "Telegram API error in {method}: {}",
                resp.description.unwrap_or_default()
            ));
        }
        Ok(resp.result.unwrap_or(Value::Null))
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<TgUpdate>> {
        let resp: TgResponse<Vec<TgUpdate>> = self
            .client
            .get(self.url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
                (
                    "allowed_updates",
                    r#"["message","callback_query"]"#.to_string(),
                ),
            ])
            .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .send()
            .await?
            .json()
            .await?;

        if !resp.ok {
            return Err(anyhow::anyhow!(
                "Telegram API error: {}",
                resp.description.unwrap_or_default()
            ));
        }
        Ok(resp.result.unwrap_or_default())
    }

    /// Start long polling. Updates from users outside `allowed_users` are
    /// dropped here; an empty list lets nobody in.
    pub fn start_polling(&self, access: TelegramConfig) -> mpsc::UnboundedReceiver<Inbound> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let client = self.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            info!("Telegram adapter started (long polling)");

            loop {
                match client.get_updates(offset).await {
                    Ok(updates) => {
                        for update in updates {
                            offset = update.update_id + 1;
                            let Some(inbound) = update.into_inbound() else {
                                continue;
                            };

                            let user_id = inbound.user_id();
                            if !access.is_user_allowed(user_id) {
                                debug!("Telegram: ignoring update from unauthorized user {user_id}");
                                continue;
                            }
                            if inbound_tx.send(inbound).is_err() {
                                error!("Telegram inbound channel closed");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Telegram polling error: {e}");
                        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                    }
                }
            }
        });

        inbound_rx
    }
}

fn reply_markup(keyboard: &Keyboard) -> Value {
    let rows: Vec<Vec<Value>> = keyboard
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| json!({ "text": b.label, "callback_data": b.data }))
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

#[async_trait]
impl ChatSink for TelegramClient {
    async fn send(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) -> Result<i64> {
        let mut params = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(kb) = &keyboard {
            params["reply_markup"] = reply_markup(kb);
        }
        let result = self.call("sendMessage", &params).await?;
        Ok(result
            .get("message_id")
            .and_then(Value::as_i64)
            .unwrap_or_default())
    }

    async fn edit(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<()> {
        let mut params = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        // Without a markup the old keyboard stays; send an empty one to clear it.
        params["reply_markup"] = reply_markup(&keyboard.unwrap_or_default());
        self.call("editMessageText", &params).await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut params = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            params["text"] = json!(text);
        }
        self.call("answerCallbackQuery", &params).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Button;

    #[test]
    fn text_message_update() {
        let update: TgUpdate = serde_json::from_value(json!({
            "update_id": 10,
            "message": {
                "message_id": 5,
                "from": {"id": 42},
                "chat": {"id": 99},
                "text": "/new web"
            }
        }))
        .unwrap();
        assert_eq!(
            update.into_inbound(),
            Some(Inbound::Message {
                chat_id: 99,
                user_id: 42,
                message_id: 5,
                text: "/new web".into()
            })
        );
    }

    #[test]
    fn callback_update() {
        let update: TgUpdate = serde_json::from_value(json!({
            "update_id": 11,
            "callback_query": {
                "id": "cb1",
                "from": {"id": 42},
                "message": {"message_id": 7, "chat": {"id": 99}},
                "data": "approve:abc"
            }
        }))
        .unwrap();
        assert_eq!(
            update.into_inbound(),
            Some(Inbound::Callback {
                callback_id: "cb1".into(),
                chat_id: 99,
                user_id: 42,
                message_id: 7,
                data: "approve:abc".into()
            })
        );
    }

    #[test]
    fn non_text_messages_are_dropped() {
        let update: TgUpdate = serde_json::from_value(json!({
            "update_id": 12,
            "message": {"message_id": 1, "chat": {"id": 1}, "sticker": {}}
        }))
        .unwrap();
        assert!(update.into_inbound().is_none());
    }

    #[test]
    fn keyboard_markup_shape() {
        let kb = vec![vec![Button::new("✅ Approve", "approve:x"), Button::new("❌ Deny", "deny:x")]];
        assert_eq!(
            reply_markup(&kb),
            json!({"inline_keyboard": [[
                {"text": "✅ Approve", "callback_data": "approve:x"},
                {"text": "❌ Deny", "callback_data": "deny:x"}
            ]]})
        );
    }
}
