//! Telegram Bot API client: short-poll `getUpdates`, reply with
//! `sendMessage`.

use std::time::Duration;

use irrigation_core::link::{ChatMessage, Messaging};
use irrigation_core::LinkError;
use serde::Deserialize;
use serde_json::json;

use crate::http;

const API_HOST: &str = "https://api.telegram.org";

// ---------------------------------------------------------------------------
// Bot API message types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    from: Option<User>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    first_name: String,
}

fn unwrap_response<T>(resp: ApiResponse<T>) -> Result<Option<T>, LinkError> {
    if resp.ok {
        Ok(resp.result)
    } else {
        Err(LinkError::Rejected(
            resp.description.unwrap_or_else(|| "telegram: not ok".into()),
        ))
    }
}

/// Every update in a `getUpdates` body, oldest first. Updates without a
/// text message (joins, stickers, edits) keep their id with empty text.
pub(crate) fn parse_updates(body: &str) -> Result<Vec<ChatMessage>, LinkError> {
    let resp: ApiResponse<Vec<Update>> =
        serde_json::from_str(body).map_err(|e| LinkError::Decode(format!("getUpdates: {e}")))?;
    let updates = unwrap_response(resp)?.unwrap_or_default();
    Ok(updates
        .into_iter()
        .map(|u| match u.message {
            Some(msg) => ChatMessage {
                update_id: u.update_id,
                chat_id: msg.chat.id.to_string(),
                from: msg.from.map(|f| f.first_name).unwrap_or_default(),
                text: msg.text.unwrap_or_default(),
            },
            None => ChatMessage {
                update_id: u.update_id,
                chat_id: String::new(),
                from: String::new(),
                text: String::new(),
            },
        })
        .collect())
}

/// Check a `sendMessage` body for an API-level refusal.
pub(crate) fn check_sent(body: &str) -> Result<(), LinkError> {
    let resp: ApiResponse<serde_json::Value> =
        serde_json::from_str(body).map_err(|e| LinkError::Decode(format!("sendMessage: {e}")))?;
    unwrap_response(resp).map(|_| ())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct TelegramBot {
    agent: ureq::Agent,
    base: String,
}

impl TelegramBot {
    pub fn new(token: &str) -> Self {
        Self {
            agent: http::agent(Duration::from_secs(10)),
            base: format!("{API_HOST}/bot{token}"),
        }
    }
}

impl Messaging for TelegramBot {
    async fn send_message(&mut self, chat_id: &str, text: &str) -> Result<(), LinkError> {
        let body = json!({ "chat_id": chat_id, "text": text });
        let resp = http::post_json(&self.agent, format!("{}/sendMessage", self.base), body).await?;
        check_sent(&resp)
    }

    async fn poll_updates(&mut self, since: i64) -> Result<Vec<ChatMessage>, LinkError> {
        let url = format!("{}/getUpdates?offset={since}&timeout=0", self.base);
        let body = http::get_text(&self.agent, url).await?;
        parse_updates(&body)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
