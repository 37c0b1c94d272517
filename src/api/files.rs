use axum::{
    Extension,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use serde::Deserialize;

use super::{AppState, WithMeta};
use crate::error::{ApiErrorWithMeta, ServiceError};
use crate::responses::RequestMeta;
use crate::storage::Bucket;

#[derive(Debug, Deserialize)]
pub struct SignatureQuery {
    pub expires: Option<i64>,
    pub sig: Option<String>,
}

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or_default() {
        "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "webm" => "audio/webm",
        "ogg" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        _ => "application/octet-stream",
    }
}

/// Serves a stored object. Private buckets need a valid, unexpired signature.
pub async fn download(
    State(st): State<AppState>,
    Path((bucket, path)): Path<(String, String)>,
    Query(q): Query<SignatureQuery>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<impl IntoResponse, ApiErrorWithMeta> {
    let bucket = Bucket::parse(&bucket).with_meta(&meta)?;
    if bucket.is_private() {
        let (Some(expires), Some(sig)) = (q.expires, q.sig.as_deref()) else {
            return Err(ServiceError::BadSignature.with_meta(meta));
        };
        st.storage
            .verify_signed_url(bucket, &path, expires, sig)
            .with_meta(&meta)?;
    }

    let bytes = st.storage.read(bucket, &path).await.with_meta(&meta)?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&path))], bytes))
}
