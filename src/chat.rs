//! Direct messages between a customer and the shop.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::policy::{Action, Actor, Resource, authorize};
use crate::storage::{self, Bucket, FileStorage, SignedUrl, Upload};
use crate::store::Store;
use crate::types::{Message, MessageChange, NewMessage, Page, ReactionCount, ReactionKind};

const MAX_CONTENT_LEN: usize = 4000;

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessage {
    pub conversation_id: Uuid,
    pub recipient_id: Uuid,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub media: Option<Upload>,
    #[serde(default)]
    pub reply_to_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReactionState {
    pub message_id: Uuid,
    pub kind: ReactionKind,
    pub active: bool,
    pub counts: Vec<ReactionCount>,
}

fn check_content(content: &str) -> Result<(), ServiceError> {
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(ServiceError::Validation(format!(
            "messages are limited to {MAX_CONTENT_LEN} characters"
        )));
    }
    Ok(())
}

async fn load(store: &dyn Store, message_id: Uuid) -> Result<Message, ServiceError> {
    store
        .get_message(message_id)
        .await?
        .ok_or(ServiceError::NotFound("message"))
}

fn same_pair(message: &Message, a: Uuid, b: Uuid) -> bool {
    (message.sender_id == a && message.recipient_id == b)
        || (message.sender_id == b && message.recipient_id == a)
}

pub async fn send(
    store: &dyn Store,
    storage: &dyn FileStorage,
    actor: &Actor,
    req: SendMessage,
) -> Result<Message, ServiceError> {
    authorize(actor, Action::SendMessage, Resource::None).into_result()?;

    let content = req.content.trim().to_string();
    if content.is_empty() && req.media.is_none() {
        return Err(ServiceError::Validation("message is empty".into()));
    }
    check_content(&content)?;
    if req.recipient_id == actor.user_id {
        return Err(ServiceError::Validation("cannot message yourself".into()));
    }
    if store.get_profile(req.recipient_id).await?.is_none() {
        return Err(ServiceError::NotFound("profile"));
    }

    let (first, _) = store.list_messages(req.conversation_id, Page::new(1, 1)).await?;
    if let Some(first) = first.first() {
        if !same_pair(first, actor.user_id, req.recipient_id) {
            return Err(ServiceError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }
    }

    if let Some(reply_to) = req.reply_to_id {
        let parent = load(store, reply_to).await?;
        if parent.conversation_id != req.conversation_id {
            return Err(ServiceError::Validation(
                "reply must stay in the same conversation".into(),
            ));
        }
    }

    let (media_path, media_type) = match &req.media {
        Some(upload) => (
            Some(upload.store(storage, Bucket::ChatVoices, actor.user_id).await?),
            Some(upload.content_type.clone()),
        ),
        None => (None, None),
    };

    let inserted = store
        .insert_message(NewMessage {
            conversation_id: req.conversation_id,
            sender_id: actor.user_id,
            recipient_id: req.recipient_id,
            content,
            media_path: media_path.clone(),
            media_type,
            reply_to_id: req.reply_to_id,
        })
        .await;

    match inserted {
        Ok(message) => {
            debug!(message_id = %message.id, conversation_id = %message.conversation_id, "message sent");
            Ok(message)
        }
        Err(e) => {
            if let Some(path) = &media_path {
                storage::discard(storage, Bucket::ChatVoices, path).await;
            }
            Err(e)
        }
    }
}

pub async fn edit(
    store: &dyn Store,
    actor: &Actor,
    message_id: Uuid,
    content: &str,
) -> Result<Message, ServiceError> {
    let message = load(store, message_id).await?;
    authorize(actor, Action::Edit, Resource::Message(&message)).into_result()?;

    let content = content.trim();
    if content.is_empty() {
        return Err(ServiceError::MissingField("content"));
    }
    check_content(content)?;
    store
        .apply_message_change(message_id, MessageChange::Edit(content.to_string()))
        .await
}

/// Soft-deletes a message and drops its media file.
pub async fn delete(
    store: &dyn Store,
    storage: &dyn FileStorage,
    actor: &Actor,
    message_id: Uuid,
) -> Result<Message, ServiceError> {
    let message = load(store, message_id).await?;
    authorize(actor, Action::Edit, Resource::Message(&message)).into_result()?;

    let deleted = store
        .apply_message_change(message_id, MessageChange::SoftDelete)
        .await?;
    if let Some(path) = &message.media_path {
        storage::discard(storage, Bucket::ChatVoices, path).await;
    }
    info!(%message_id, sender = %actor.user_id, "message deleted");
    Ok(deleted)
}

pub async fn mark_read(
    store: &dyn Store,
    actor: &Actor,
    message_id: Uuid,
) -> Result<Message, ServiceError> {
    let message = load(store, message_id).await?;
    authorize(actor, Action::MarkRead, Resource::Message(&message)).into_result()?;
    if message.read_at.is_some() {
        return Ok(message);
    }
    store
        .apply_message_change(message_id, MessageChange::MarkRead)
        .await
}

pub async fn toggle_reaction(
    store: &dyn Store,
    actor: &Actor,
    message_id: Uuid,
    kind: ReactionKind,
) -> Result<ReactionState, ServiceError> {
    let message = load(store, message_id).await?;
    authorize(actor, Action::View, Resource::Message(&message)).into_result()?;
    if message.is_deleted {
        return Err(ServiceError::Validation("message was deleted".into()));
    }

    let active = store.toggle_reaction(message_id, actor.user_id, kind).await?;
    let counts = store.reaction_counts(message_id).await?;
    Ok(ReactionState {
        message_id,
        kind,
        active,
        counts,
    })
}

/// A conversation page, oldest message first.
pub async fn history(
    store: &dyn Store,
    actor: &Actor,
    conversation_id: Uuid,
    page: Page,
) -> Result<(Vec<Message>, u64), ServiceError> {
    let (messages, total) = store
        .list_messages(conversation_id, page.normalized())
        .await?;
    for message in &messages {
        authorize(actor, Action::View, Resource::Message(message)).into_result()?;
    }
    Ok((messages, total))
}

/// A fresh signed link to a message's voice note.
pub async fn media_url(
    store: &dyn Store,
    storage: &dyn FileStorage,
    actor: &Actor,
    message_id: Uuid,
) -> Result<SignedUrl, ServiceError> {
    let message = load(store, message_id).await?;
    authorize(actor, Action::View, Resource::Message(&message)).into_result()?;
    let path = message
        .media_path
        .as_deref()
        .ok_or(ServiceError::NotFound("media"))?;
    storage.create_signed_url(Bucket::ChatVoices, path)
}
