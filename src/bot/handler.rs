use crate::bot::api::{ChatJoinRequest, Message, Update};
use crate::bot::{Data, LinkButton};
use crate::gate::keypair::looks_like_ciphertext;
use crate::gate::{JoinRequest, ResponseChannel};
use tracing::{debug, error, info, warn};

const HELP_TEXT: &str = "Hi! I verify forum accounts for people asking to join the group.\n\n\
Request to join the group and I will send you a verification link here. \
After you authorize on the forum, paste the key it shows you into this chat.";

/// Dispatch one update to its handler
pub async fn handle_update(update: Update, data: &Data) {
    if let Some(request) = update.chat_join_request {
        handle_join_request(&request, data).await;
    } else if let Some(message) = update.message {
        handle_message(&message, data).await;
    }
}

/// Send the requester an authorization link for their join request
pub async fn handle_join_request(request: &ChatJoinRequest, data: &Data) {
    let group_id = request.chat.id;
    let user = &request.from;
    info!(
        "Join request from {} ({}) for group {}",
        user.first_name, user.id, group_id
    );

    if !data.config.allows_chat(group_id) {
        debug!("Ignoring join request for unmanaged group {}", group_id);
        return;
    }

    let join = JoinRequest {
        user_id: user.id,
        user_name: user.first_name.clone(),
        group_id,
        channel_id: request.user_chat_id,
    };

    let challenge = match data.gate.issue(&join).await {
        Ok(challenge) => challenge,
        Err(e) => {
            error!("Failed to issue challenge for user {}: {}", user.id, e);
            reply(
                data,
                request.user_chat_id,
                "Sorry, I could not create a verification link. Please request to join again.",
            )
            .await;
            return;
        }
    };

    let text = format!(
        "Hello {}!\n\n\
        To join the group, please verify your forum account first:\n\
        🔗 Tap the button below to log in, then copy the key the forum shows you and send it back to me.\n\
        ⏰ This link expires in {} minutes.\n\
        ✅ Once verified, your join request is approved automatically.",
        user.first_name,
        data.gate.challenge_ttl().as_secs().div_ceil(60)
    );
    let button = LinkButton {
        text: "🚀 Verify now".to_string(),
        url: challenge.authorization_url,
    };

    if let Err(e) = data
        .chat
        .send_message(request.user_chat_id, &text, Some(button))
        .await
    {
        error!("Failed to send verification link to user {}: {}", user.id, e);
        return;
    }
    info!("Sent verification link to {} ({})", user.first_name, user.id);

    if data.config.announce_in_group {
        let notice = format!(
            "{} asked to join; a verification link was sent to them.",
            user.first_name
        );
        if let Err(e) = data.chat.send_message(group_id, &notice, None).await {
            warn!("Failed to announce join request in group {}: {}", group_id, e);
        }
    }
}

/// Handle private messages: help on `/start`, otherwise a pasted payload
pub async fn handle_message(msg: &Message, data: &Data) {
    // Ignore bot messages
    if msg.from.as_ref().is_some_and(|u| u.is_bot) {
        return;
    }

    let Some(text) = msg.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return;
    };
    let chat_id = msg.chat.id;

    if text.starts_with('/') {
        if text == "/start" || text.starts_with("/start ") || text == "/help" {
            reply(data, chat_id, HELP_TEXT).await;
        }
        return;
    }

    // Chatter is ignored unless a challenge is live; a late key still gets an answer
    if !data.gate.has_pending_channel(chat_id).await && !looks_like_ciphertext(text) {
        return;
    }

    let decision = match data.gate.resolve(text, ResponseChannel::Chat(chat_id)).await {
        Ok(decision) => decision,
        Err(e) => {
            info!("Rejected key pasted in chat {}: {}", chat_id, e);
            reply(data, chat_id, &e.user_message()).await;
            return;
        }
    };

    if let Err(e) = data
        .chat
        .approve_join_request(decision.group_id, decision.user_id)
        .await
    {
        error!(
            "Verified user {} but approving the join request failed: {}",
            decision.user_id, e
        );
        reply(
            data,
            chat_id,
            "Your forum account was verified, but I could not approve your join request. Please ask a group admin.",
        )
        .await;
        return;
    }

    let text = match &decision.forum_username {
        Some(name) => format!("✅ Verified as {}! Your join request has been approved.", name),
        None => "✅ Verified! Your join request has been approved.".to_string(),
    };
    reply(data, chat_id, &text).await;
}

async fn reply(data: &Data, chat_id: i64, text: &str) {
    if let Err(e) = data.chat.send_message(chat_id, text, None).await {
        error!("Failed to reply in chat {}: {}", chat_id, e);
    }
}
