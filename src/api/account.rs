use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::Value;

use super::{AppState, CurrentUser, PageQuery, WithMeta};
use crate::error::{ApiErrorWithMeta, ServiceError};
use crate::ledger;
use crate::policy::{Action, Resource, authorize};
use crate::preferences;
use crate::responses::{ApiOk, Pagination, RequestMeta};
use crate::storage::{self, Bucket, Upload};
use crate::types::{BalanceKind, LedgerEntry, Profile, ProfileUpdate};

const MAX_DISPLAY_NAME_LEN: usize = 60;

pub async fn me(
    user: CurrentUser,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Profile>, ApiErrorWithMeta> {
    Ok(ApiOk::ok("profile fetched", user.profile, meta))
}

fn check_update(user: &CurrentUser, update: &ProfileUpdate) -> Result<(), ServiceError> {
    if let Some(name) = &update.display_name {
        authorize(&user.actor, Action::ChangeDisplayName, Resource::Profile(&user.profile))
            .into_result()?;
        let len = name.trim().chars().count();
        if len == 0 || len > MAX_DISPLAY_NAME_LEN {
            return Err(ServiceError::Validation(format!(
                "display name must be 1 to {MAX_DISPLAY_NAME_LEN} characters"
            )));
        }
    }
    if update.phone.as_deref().is_some_and(|p| p.trim().is_empty()) {
        return Err(ServiceError::MissingField("phone"));
    }
    Ok(())
}

pub async fn update_me(
    State(st): State<AppState>,
    user: CurrentUser,
    Extension(meta): Extension<RequestMeta>,
    Json(mut update): Json<ProfileUpdate>,
) -> Result<ApiOk<Profile>, ApiErrorWithMeta> {
    check_update(&user, &update).with_meta(&meta)?;
    update.display_name = update.display_name.map(|n| n.trim().to_string());
    update.phone = update.phone.map(|p| p.trim().to_string());

    let profile = st
        .store
        .update_profile(user.actor.user_id, update)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::ok("profile updated", profile, meta))
}

pub async fn upload_avatar(
    State(st): State<AppState>,
    user: CurrentUser,
    Extension(meta): Extension<RequestMeta>,
    Json(upload): Json<Upload>,
) -> Result<ApiOk<Profile>, ApiErrorWithMeta> {
    if !upload.content_type.starts_with("image/") {
        return Err(ServiceError::Validation("avatar must be an image".into()).with_meta(meta));
    }
    let path = upload
        .store(st.storage.as_ref(), Bucket::Avatars, user.actor.user_id)
        .await
        .with_meta(&meta)?;

    let update = ProfileUpdate {
        avatar_path: Some(path.clone()),
        ..Default::default()
    };
    let profile = match st.store.update_profile(user.actor.user_id, update).await {
        Ok(profile) => profile,
        Err(e) => {
            storage::discard(st.storage.as_ref(), Bucket::Avatars, &path).await;
            return Err(e.with_meta(meta));
        }
    };
    if let Some(old) = user.profile.avatar_path.as_deref() {
        storage::discard(st.storage.as_ref(), Bucket::Avatars, old).await;
    }
    Ok(ApiOk::ok("avatar updated", profile, meta))
}

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    #[serde(default)]
    pub kind: Option<BalanceKind>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub async fn ledger(
    State(st): State<AppState>,
    user: CurrentUser,
    Extension(meta): Extension<RequestMeta>,
    Query(q): Query<LedgerQuery>,
) -> Result<ApiOk<Vec<LedgerEntry>>, ApiErrorWithMeta> {
    let page = PageQuery {
        page: q.page,
        per_page: q.per_page,
    }
    .page();
    let kind = q.kind.unwrap_or(BalanceKind::Wallet);
    let (entries, total) = ledger::history(st.store.as_ref(), user.actor.user_id, kind, page)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::paginated(
        "ledger fetched",
        entries,
        Pagination::new(page, total),
        meta,
    ))
}

pub async fn get_preference(
    State(st): State<AppState>,
    user: CurrentUser,
    Path(key): Path<String>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Value>, ApiErrorWithMeta> {
    let value = preferences::get_by_name(st.store.as_ref(), user.actor.user_id, &key)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::ok("preference fetched", value, meta))
}

pub async fn put_preference(
    State(st): State<AppState>,
    user: CurrentUser,
    Path(key): Path<String>,
    Extension(meta): Extension<RequestMeta>,
    Json(value): Json<Value>,
) -> Result<ApiOk<Value>, ApiErrorWithMeta> {
    let value = preferences::set_by_name(st.store.as_ref(), user.actor.user_id, &key, value)
        .await
        .with_meta(&meta)?;
    Ok(ApiOk::ok("preference saved", value, meta))
}
