//! Per-user settings stored as JSON under a string key.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::store::Store;

/// A typed setting with a default used until the user changes it.
pub trait PreferenceKey {
    const KEY: &'static str;
    type Value: Serialize + DeserializeOwned;

    fn default_value() -> Self::Value;
}

/// Plays a sound on the admin dashboard when a new order arrives.
pub struct AdminSoundEnabled;

impl PreferenceKey for AdminSoundEnabled {
    const KEY: &'static str = "admin_sound_enabled";
    type Value = bool;

    fn default_value() -> bool {
        true
    }
}

pub struct OnboardingSeen;

impl PreferenceKey for OnboardingSeen {
    const KEY: &'static str = "onboarding_seen";
    type Value = bool;

    fn default_value() -> bool {
        false
    }
}

pub async fn get<K: PreferenceKey>(
    store: &dyn Store,
    user_id: Uuid,
) -> Result<K::Value, ServiceError> {
    let Some(raw) = store.get_preference(user_id, K::KEY).await? else {
        return Ok(K::default_value());
    };
    match serde_json::from_value(raw) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(%user_id, key = K::KEY, error = %e, "unreadable preference, using default");
            Ok(K::default_value())
        }
    }
}

pub async fn set<K: PreferenceKey>(
    store: &dyn Store,
    user_id: Uuid,
    value: K::Value,
) -> Result<(), ServiceError> {
    let raw = serde_json::to_value(value)
        .map_err(|e| ServiceError::Internal(format!("encode preference: {e}")))?;
    store.put_preference(user_id, K::KEY, raw).await
}

fn to_json<T: Serialize>(value: T) -> Result<Value, ServiceError> {
    serde_json::to_value(value).map_err(|e| ServiceError::Internal(e.to_string()))
}

async fn put_checked<K: PreferenceKey>(
    store: &dyn Store,
    user_id: Uuid,
    raw: Value,
) -> Result<Value, ServiceError> {
    let value: K::Value = serde_json::from_value(raw)
        .map_err(|e| ServiceError::Validation(format!("invalid value for {}: {e}", K::KEY)))?;
    let stored = to_json(&value)?;
    set::<K>(store, user_id, value).await?;
    Ok(stored)
}

/// Reads a preference by its wire name.
pub async fn get_by_name(store: &dyn Store, user_id: Uuid, key: &str) -> Result<Value, ServiceError> {
    if key == AdminSoundEnabled::KEY {
        to_json(get::<AdminSoundEnabled>(store, user_id).await?)
    } else if key == OnboardingSeen::KEY {
        to_json(get::<OnboardingSeen>(store, user_id).await?)
    } else {
        Err(ServiceError::NotFound("preference"))
    }
}

/// Writes a preference by its wire name after checking the value's type.
pub async fn set_by_name(
    store: &dyn Store,
    user_id: Uuid,
    key: &str,
    raw: Value,
) -> Result<Value, ServiceError> {
    if key == AdminSoundEnabled::KEY {
        put_checked::<AdminSoundEnabled>(store, user_id, raw).await
    } else if key == OnboardingSeen::KEY {
        put_checked::<OnboardingSeen>(store, user_id, raw).await
    } else {
        Err(ServiceError::NotFound("preference"))
    }
}
