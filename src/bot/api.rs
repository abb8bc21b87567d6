//! Minimal Telegram Bot API client over `reqwest`.

use crate::config::TelegramConfig;
use crate::error::{AppError, AppResult};
use crate::gate::{ChatId, UserId};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Update kinds the bot subscribes to
const ALLOWED_UPDATES: &[&str] = &["message", "chat_join_request"];

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub chat_join_request: Option<ChatJoinRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatJoinRequest {
    /// Group being joined
    pub chat: Chat,
    pub from: User,
    /// Private chat the bot may use to reach the requester
    pub user_chat_id: ChatId,
    pub date: i64,
}

/// URL button rendered under a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkButton {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardMarkup<'a> {
    inline_keyboard: Vec<Vec<&'a LinkButton>>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: ChatId,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboardMarkup<'a>>,
}

#[derive(Debug, Serialize)]
struct GetUpdates<'a> {
    offset: i64,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct ApproveChatJoinRequest {
    chat_id: ChatId,
    user_id: UserId,
}

/// Telegram Bot API client
pub struct TelegramClient {
    http: Client,
    base_url: String,
    poll_timeout: Duration,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> AppResult<Self> {
        if config.bot_token.trim().is_empty() {
            return Err(AppError::telegram("bot token is empty"));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: format!(
                "{}/bot{}",
                config.api_url.trim_end_matches('/'),
                config.bot_token
            ),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
        })
    }

    /// Call a Bot API method. Errors never carry the request URL since it
    /// contains the token.
    async fn call<P, R>(&self, method: &str, params: &P, timeout: Option<Duration>) -> AppResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .json(params);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| AppError::Http(e.without_url()))?;
        let body: ApiResponse<R> = response
            .json()
            .await
            .map_err(|e| AppError::Http(e.without_url()))?;

        if !body.ok {
            return Err(AppError::telegram(format!(
                "{} failed: {}",
                method,
                body.description.unwrap_or_else(|| "no description".to_string())
            )));
        }
        body.result
            .ok_or_else(|| AppError::telegram(format!("{} returned no result", method)))
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> AppResult<Vec<Update>> {
        let params = GetUpdates {
            offset,
            timeout: self.poll_timeout.as_secs(),
            allowed_updates: ALLOWED_UPDATES,
        };
        let updates: Vec<Update> = self
            .call("getUpdates", &params, Some(self.poll_timeout + Duration::from_secs(10)))
            .await?;
        if !updates.is_empty() {
            debug!("Received {} updates", updates.len());
        }
        Ok(updates)
    }

    pub async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        button: Option<&LinkButton>,
    ) -> AppResult<()> {
        let params = SendMessage {
            chat_id,
            text,
            reply_markup: button.map(|b| InlineKeyboardMarkup {
                inline_keyboard: vec![vec![b]],
            }),
        };
        let _: serde_json::Value = self.call("sendMessage", &params, None).await?;
        Ok(())
    }

    pub async fn approve_chat_join_request(&self, chat_id: ChatId, user_id: UserId) -> AppResult<()> {
        let params = ApproveChatJoinRequest { chat_id, user_id };
        let _: bool = self.call("approveChatJoinRequest", &params, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Calls = Arc<Mutex<Vec<(String, Value)>>>;

    /// Fake Bot API for token `test-token`; records every call.
    async fn start_mock_api() -> (String, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));

        let record = |method: &'static str, reply: Value| {
            let calls = calls.clone();
            post(move |Json(body): Json<Value>| {
                let calls = calls.clone();
                let reply = reply.clone();
                async move {
                    calls.lock().unwrap().push((method.to_string(), body));
                    Json(reply)
                }
            })
        };

        let app = Router::new()
            .route(
                "/bottest-token/getUpdates",
                record(
                    "getUpdates",
                    json!({"ok": true, "result": [
                        {"update_id": 5, "chat_join_request": {
                            "chat": {"id": -1007, "type": "supergroup", "title": "Forum"},
                            "from": {"id": 42, "is_bot": false, "first_name": "Alice"},
                            "user_chat_id": 100,
                            "date": 1700000000
                        }},
                        {"update_id": 6, "message": {
                            "message_id": 1,
                            "chat": {"id": 100, "type": "private"},
                            "from": {"id": 42, "is_bot": false, "first_name": "Alice"},
                            "text": "hello"
                        }}
                    ]}),
                ),
            )
            .route(
                "/bottest-token/sendMessage",
                record("sendMessage", json!({"ok": true, "result": {"message_id": 9}})),
            )
            .route(
                "/bottest-token/approveChatJoinRequest",
                record(
                    "approveChatJoinRequest",
                    json!({"ok": false, "error_code": 400, "description": "Bad Request: HIDE_REQUESTER_MISSING"}),
                ),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), calls)
    }

    fn client(api_url: String) -> TelegramClient {
        TelegramClient::new(&TelegramConfig {
            bot_token: "test-token".to_string(),
            api_url,
            poll_timeout_secs: 1,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(TelegramClient::new(&TelegramConfig::default()).is_err());
    }

    #[test]
    fn test_debug_hides_token() {
        let rendered = format!("{:?}", client("http://127.0.0.1:9".to_string()));
        assert!(!rendered.contains("test-token"));
    }

    #[tokio::test]
    async fn test_get_updates_parses_both_kinds() {
        let (url, calls) = start_mock_api().await;
        let updates = client(url).get_updates(5).await.unwrap();

        assert_eq!(updates.len(), 2);
        let join = updates[0].chat_join_request.as_ref().unwrap();
        assert_eq!(join.chat.id, -1007);
        assert_eq!(join.user_chat_id, 100);
        let msg = updates[1].message.as_ref().unwrap();
        assert_eq!(msg.chat.kind, "private");
        assert_eq!(msg.text.as_deref(), Some("hello"));

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].1["offset"], 5);
        assert_eq!(calls[0].1["allowed_updates"], json!(["message", "chat_join_request"]));
    }

    #[tokio::test]
    async fn test_send_message_with_button() {
        let (url, calls) = start_mock_api().await;
        let button = LinkButton {
            text: "Verify".to_string(),
            url: "https://forum.example.org/user-api-key/new".to_string(),
        };
        client(url).send_message(100, "hi", Some(&button)).await.unwrap();

        let calls = calls.lock().unwrap();
        let (method, body) = &calls[0];
        assert_eq!(method, "sendMessage");
        assert_eq!(body["chat_id"], 100);
        assert_eq!(
            body["reply_markup"]["inline_keyboard"][0][0]["url"],
            "https://forum.example.org/user-api-key/new"
        );
    }

    #[tokio::test]
    async fn test_api_error_is_reported_without_token() {
        let (url, _) = start_mock_api().await;
        let err = client(url).approve_chat_join_request(-1007, 42).await.unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("HIDE_REQUESTER_MISSING"));
        assert!(!rendered.contains("test-token"));
    }

    #[tokio::test]
    async fn test_transport_error_hides_token() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(format!("http://{}", addr))
            .send_message(1, "hi", None)
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("test-token"));
    }
}
