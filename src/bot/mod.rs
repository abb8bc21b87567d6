pub mod api;
pub mod handler;

pub use api::{LinkButton, TelegramClient, Update};

use crate::config::TelegramConfig;
use crate::error::AppResult;
use crate::gate::{AuthGate, ChatId, UserId};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Pause after a failed `getUpdates` before polling again
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Outbound calls the gate needs from the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        button: Option<LinkButton>,
    ) -> AppResult<()>;

    /// Approve a pending join request of `user_id` for `group_id`.
    async fn approve_join_request(&self, group_id: ChatId, user_id: UserId) -> AppResult<()>;
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        button: Option<LinkButton>,
    ) -> AppResult<()> {
        TelegramClient::send_message(self, chat_id, text, button.as_ref()).await
    }

    async fn approve_join_request(&self, group_id: ChatId, user_id: UserId) -> AppResult<()> {
        self.approve_chat_join_request(group_id, user_id).await
    }
}

/// Shared data accessible in all update handlers
pub struct Data {
    pub gate: Arc<AuthGate>,
    pub chat: Arc<dyn ChatTransport>,
    pub config: TelegramConfig,
}

/// Poll Telegram for updates until the task is cancelled.
///
/// Every update is handled on its own task so a slow forum check never
/// blocks the poller.
pub async fn run_polling(client: Arc<TelegramClient>, data: Arc<Data>) -> AppResult<()> {
    let mut offset = 0;
    info!("Telegram bot polling for join requests");

    loop {
        let updates = match client.get_updates(offset).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!("getUpdates failed: {}; retrying in {:?}", e, POLL_RETRY_DELAY);
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let data = data.clone();
            tokio::spawn(async move {
                handler::handle_update(update, &data).await;
            });
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Chat transport that records outbound calls.
    #[derive(Debug, Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<(ChatId, String, Option<LinkButton>)>>,
        pub approvals: Mutex<Vec<(ChatId, UserId)>>,
        pub fail_approvals: AtomicBool,
    }

    impl RecordingTransport {
        pub fn sent_to(&self, chat_id: ChatId) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _, _)| *id == chat_id)
                .map(|(_, text, _)| text.clone())
                .collect()
        }

        pub fn approvals(&self) -> Vec<(ChatId, UserId)> {
            self.approvals.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn send_message(
            &self,
            chat_id: ChatId,
            text: &str,
            button: Option<LinkButton>,
        ) -> AppResult<()> {
            self.sent
                .lock()
                .unwrap()
                .push((chat_id, text.to_string(), button));
            Ok(())
        }

        async fn approve_join_request(&self, group_id: ChatId, user_id: UserId) -> AppResult<()> {
            if self.fail_approvals.load(Ordering::SeqCst) {
                return Err(AppError::telegram("Bad Request: HIDE_REQUESTER_MISSING"));
            }
            self.approvals.lock().unwrap().push((group_id, user_id));
            Ok(())
        }
    }
}
