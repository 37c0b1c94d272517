use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use super::{AppState, CurrentUser, PageQuery, WithMeta};
use crate::chat::{self, ReactionState, SendMessage};
use crate::error::ApiErrorWithMeta;
use crate::responses::{ApiOk, Pagination, RequestMeta};
use crate::storage::SignedUrl;
use crate::types::{Message, ReactionKind};

pub async fn send(
    State(st): State<AppState>,
    user: CurrentUser,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<SendMessage>,
) -> Result<ApiOk<Message>, ApiErrorWithMeta> {
    let message = chat::send(st.store.as_ref(), st.storage.as_ref(), &user.actor, req)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::created("message sent", message, meta))
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub content: String,
}

pub async fn edit(
    State(st): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<EditRequest>,
) -> Result<ApiOk<Message>, ApiErrorWithMeta> {
    let message = chat::edit(st.store.as_ref(), &user.actor, id, &req.content)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::ok("message edited", message, meta))
}

pub async fn delete(
    State(st): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Message>, ApiErrorWithMeta> {
    let message = chat::delete(st.store.as_ref(), st.storage.as_ref(), &user.actor, id)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::ok("message deleted", message, meta))
}

pub async fn mark_read(
    State(st): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Message>, ApiErrorWithMeta> {
    let message = chat::mark_read(st.store.as_ref(), &user.actor, id)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::ok("message read", message, meta))
}

#[derive(Debug, Deserialize)]
pub struct ReactRequest {
    pub kind: ReactionKind,
}

pub async fn react(
    State(st): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<ReactRequest>,
) -> Result<ApiOk<ReactionState>, ApiErrorWithMeta> {
    let state = chat::toggle_reaction(st.store.as_ref(), &user.actor, id, req.kind)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::ok("reaction toggled", state, meta))
}

pub async fn media(
    State(st): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<SignedUrl>, ApiErrorWithMeta> {
    let url = chat::media_url(st.store.as_ref(), st.storage.as_ref(), &user.actor, id)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::ok("media link issued", url, meta))
}

pub async fn history(
    State(st): State<AppState>,
    user: CurrentUser,
    Path(conversation_id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Query(q): Query<PageQuery>,
) -> Result<ApiOk<Vec<Message>>, ApiErrorWithMeta> {
    let page = q.page();
    let (messages, total) = chat::history(st.store.as_ref(), &user.actor, conversation_id, page)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::paginated(
        "messages fetched",
        messages,
        Pagination::new(page, total),
        meta,
    ))
}
