//! Messages between users: sending, and assembling the two-party thread.
//!
//! A thread between `a` and `b` is every message sent a→b or b→a, ordered by `sent_at`
//! ascending. Messages with equal timestamps keep the order the store returned them in
//! (insertion order).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::identity::can_view_thread;
use crate::storage::{Message, MessageLog, NewMessage, User, UserDirectory, UserId};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub receiver_id: Option<UserId>,
    #[serde(default)]
    pub content: Option<String>,
}

/// A message annotated with both parties' display names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMessage {
    pub id: u64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub sender_name: String,
    pub receiver_name: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub read: bool,
}

fn annotate(m: &Message, me: &User, other: &User) -> ThreadMessage {
    let sender = if m.sender_user_id == me.id { me } else { other };
    let receiver = if m.receiver_user_id == me.id { me } else { other };
    ThreadMessage {
        id: m.id,
        sender_id: m.sender_user_id,
        receiver_id: m.receiver_user_id,
        sender_name: sender.username.clone(),
        receiver_name: receiver.username.clone(),
        content: m.content.clone(),
        sent_at: m.sent_at,
        read: m.read,
    }
}

/// Merge both directions of the conversation into one time-ordered sequence.
pub fn assemble_thread<L: MessageLog + ?Sized>(log: &L, me: &User, other: &User) -> Vec<ThreadMessage> {
    let mut msgs = log.find_messages_between(me.id, other.id);
    // stable: equal timestamps stay in store order
    msgs.sort_by_key(|m| m.sent_at);
    msgs.iter().map(|m| annotate(m, me, other)).collect()
}

/// Look up the counterpart, apply the thread visibility rule, then assemble.
/// A thread with oneself is always empty, since self-addressed messages are refused.
pub fn open_thread<S>(store: &S, me: &User, other_id: UserId) -> AppResult<Vec<ThreadMessage>>
where
    S: UserDirectory + MessageLog + ?Sized,
{
    let other = store
        .find_user_by_id(other_id)
        .ok_or_else(|| AppError::not_found("user_not_found", "User not found"))?;
    if other.id == me.id {
        return Ok(Vec::new());
    }
    if !can_view_thread(me, &other) {
        return Err(AppError::forbidden("thread_not_visible", "Thread not visible"));
    }
    Ok(assemble_thread(store, me, &other))
}

pub fn send_message<S>(store: &S, me: &User, req: &SendMessageRequest) -> AppResult<ThreadMessage>
where
    S: UserDirectory + MessageLog + ?Sized,
{
    let content = req.content.as_deref().map(str::trim).unwrap_or_default();
    let Some(receiver_id) = req.receiver_id.filter(|_| !content.is_empty()) else {
        return Err(AppError::invalid("missing_fields", "receiverId and content are required"));
    };
    if receiver_id == me.id {
        return Err(AppError::invalid("self_message", "Cannot send a message to yourself"));
    }
    let receiver = store
        .find_user_by_id(receiver_id)
        .ok_or_else(|| AppError::not_found("receiver_not_found", "Receiver not found"))?;

    let saved = store.save_message(NewMessage {
        sender_user_id: me.id,
        receiver_user_id: receiver.id,
        content: content.to_string(),
        sent_at: Some(Utc::now()),
    })?;
    debug!(target: "carelink::messaging", "message.sent id={} from={} to={}", saved.id, me.id, receiver.id);
    Ok(annotate(&saved, me, &receiver))
}
