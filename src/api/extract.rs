use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::Utc;
use uuid::Uuid;

use super::AppState;
use crate::error::{ApiErrorWithMeta, ServiceError};
use crate::policy::Actor;
use crate::responses::RequestMeta;
use crate::types::Profile;

/// Header carrying the caller id, set by the authenticating gateway.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

fn meta_of(parts: &Parts) -> RequestMeta {
    parts
        .extensions
        .get::<RequestMeta>()
        .cloned()
        .unwrap_or_default()
}

/// The authenticated caller with their profile loaded.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub actor: Actor,
    pub profile: Profile,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiErrorWithMeta;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let meta = meta_of(parts);
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| ServiceError::Unauthenticated.with_meta(meta.clone()))?;

        let profile = state
            .store
            .get_profile(user_id)
            .await
            .map_err(|e| e.with_meta(meta.clone()))?
            .ok_or_else(|| ServiceError::Unauthenticated.with_meta(meta.clone()))?;

        Ok(CurrentUser {
            actor: Actor::from_profile(&profile, Utc::now()),
            profile,
        })
    }
}

/// Optional `Idempotency-Key` header identifying a retried submission.
#[derive(Debug, Clone, Default)]
pub struct IdempotencyKey(pub Option<String>);

impl IdempotencyKey {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for IdempotencyKey {
    type Rejection = ApiErrorWithMeta;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(IDEMPOTENCY_HEADER) else {
            return Ok(IdempotencyKey(None));
        };
        let key = raw.to_str().map(str::trim).unwrap_or_default();
        if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(ServiceError::Validation(format!(
                "{IDEMPOTENCY_HEADER} must be 1 to {MAX_IDEMPOTENCY_KEY_LEN} visible characters"
            ))
            .with_meta(meta_of(parts)));
        }
        Ok(IdempotencyKey(Some(key.to_string())))
    }
}
