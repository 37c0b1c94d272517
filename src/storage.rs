//! Object storage for proofs, avatars, voice notes and deposit screenshots.
//!
//! Private buckets are never served by plain path: callers hand out signed,
//! expiring links instead.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ServiceError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    PaymentProofs,
    Avatars,
    ChatVoices,
    DepositScreenshots,
}

impl Bucket {
    pub const ALL: &'static [Bucket] = &[
        Bucket::PaymentProofs,
        Bucket::Avatars,
        Bucket::ChatVoices,
        Bucket::DepositScreenshots,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::PaymentProofs => "payment-proofs",
            Bucket::Avatars => "avatars",
            Bucket::ChatVoices => "chat-voices",
            Bucket::DepositScreenshots => "deposit-screenshots",
        }
    }

    pub fn is_private(self) -> bool {
        !matches!(self, Bucket::Avatars)
    }

    pub fn parse(name: &str) -> Result<Self, ServiceError> {
        Self::ALL
            .iter()
            .copied()
            .find(|b| b.as_str() == name)
            .ok_or(ServiceError::NotFound("bucket"))
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-limited download link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl SignedUrl {
    /// True once the link is within `leeway` of expiring.
    pub fn needs_refresh(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        now + leeway >= self.expires_at
    }
}

/// A file carried inline in a JSON body as base64.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "EncodedUpload")]
pub struct Upload {
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Deserialize)]
struct EncodedUpload {
    content_type: String,
    data: String,
}

impl TryFrom<EncodedUpload> for Upload {
    type Error = String;

    fn try_from(raw: EncodedUpload) -> Result<Self, Self::Error> {
        let data = STANDARD
            .decode(raw.data.trim())
            .map_err(|e| format!("upload is not valid base64: {e}"))?;
        Ok(Upload {
            content_type: raw.content_type,
            data,
        })
    }
}

impl Upload {
    /// Stores the file under a fresh `{owner}/{uuid}.{ext}` path in `bucket`.
    pub async fn store(
        &self,
        storage: &dyn FileStorage,
        bucket: Bucket,
        owner: Uuid,
    ) -> Result<String, ServiceError> {
        let path = object_path(owner, &self.content_type)?;
        storage.upload(bucket, &path, &self.data).await
    }
}

/// Best-effort cleanup of an object nothing will reference.
pub async fn discard(storage: &dyn FileStorage, bucket: Bucket, path: &str) {
    if let Err(e) = storage.remove(bucket, path).await {
        warn!(%bucket, path, error = %e, "orphaned upload left behind");
    }
}

/// File extension for an accepted upload content type.
pub fn extension_for(content_type: &str) -> Result<&'static str, ServiceError> {
    let ext = match content_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "audio/webm" => "webm",
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        "audio/mp4" => "m4a",
        other => {
            return Err(ServiceError::Validation(format!(
                "unsupported content type '{other}'"
            )));
        }
    };
    Ok(ext)
}

/// A fresh object path under the owner's folder.
pub fn object_path(owner: Uuid, content_type: &str) -> Result<String, ServiceError> {
    Ok(format!("{owner}/{}.{}", Uuid::new_v4(), extension_for(content_type)?))
}

/// Rejects traversal and absolute paths.
fn checked_relative(path: &str) -> Result<&Path, ServiceError> {
    let p = Path::new(path);
    let clean = !path.is_empty()
        && p.components().all(|c| matches!(c, Component::Normal(_)));
    if !clean {
        return Err(ServiceError::Validation(format!("invalid object path '{path}'")));
    }
    Ok(p)
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Stores `data` at `path` inside `bucket` and returns the path.
    async fn upload(&self, bucket: Bucket, path: &str, data: &[u8]) -> Result<String, ServiceError>;

    async fn remove(&self, bucket: Bucket, path: &str) -> Result<(), ServiceError>;

    async fn read(&self, bucket: Bucket, path: &str) -> Result<Vec<u8>, ServiceError>;

    fn create_signed_url(&self, bucket: Bucket, path: &str) -> Result<SignedUrl, ServiceError>;

    /// Checks a link minted by [`FileStorage::create_signed_url`].
    fn verify_signed_url(
        &self,
        bucket: Bucket,
        path: &str,
        expires: i64,
        sig: &str,
    ) -> Result<(), ServiceError>;
}

/// Signs and checks download links.
#[derive(Clone)]
pub struct UrlSigner {
    secret: String,
    base_url: String,
    ttl: Duration,
}

impl UrlSigner {
    pub fn new(secret: impl Into<String>, base_url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ttl,
        }
    }

    fn mac(&self, bucket: Bucket, path: &str, expires: i64) -> Result<HmacSha256, ServiceError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| ServiceError::Internal(format!("signing key: {e}")))?;
        mac.update(format!("{bucket}/{path}:{expires}").as_bytes());
        Ok(mac)
    }

    pub fn sign_at(
        &self,
        bucket: Bucket,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<SignedUrl, ServiceError> {
        let expires_at = now + self.ttl;
        let expires = expires_at.timestamp();
        let sig = hex::encode(self.mac(bucket, path, expires)?.finalize().into_bytes());
        Ok(SignedUrl {
            url: format!(
                "{}/files/{bucket}/{path}?expires={expires}&sig={sig}",
                self.base_url
            ),
            expires_at: Utc
                .timestamp_opt(expires, 0)
                .single()
                .unwrap_or(expires_at),
        })
    }

    pub fn sign(&self, bucket: Bucket, path: &str) -> Result<SignedUrl, ServiceError> {
        self.sign_at(bucket, path, Utc::now())
    }

    pub fn verify_at(
        &self,
        bucket: Bucket,
        path: &str,
        expires: i64,
        sig: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let sig = hex::decode(sig).map_err(|_| ServiceError::BadSignature)?;
        self.mac(bucket, path, expires)?
            .verify_slice(&sig)
            .map_err(|_| ServiceError::BadSignature)?;
        if now.timestamp() >= expires {
            return Err(ServiceError::LinkExpired);
        }
        Ok(())
    }

    pub fn verify(&self, bucket: Bucket, path: &str, expires: i64, sig: &str) -> Result<(), ServiceError> {
        self.verify_at(bucket, path, expires, sig, Utc::now())
    }
}

/// Filesystem-backed storage rooted at one directory, one subdirectory per bucket.
#[derive(Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
    signer: UrlSigner,
    max_bytes: usize,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            signer,
            max_bytes,
        }
    }

    fn resolve(&self, bucket: Bucket, path: &str) -> Result<PathBuf, ServiceError> {
        Ok(self.root.join(bucket.as_str()).join(checked_relative(path)?))
    }
}

fn io_err(e: std::io::Error) -> ServiceError {
    ServiceError::Storage(e.to_string())
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn upload(&self, bucket: Bucket, path: &str, data: &[u8]) -> Result<String, ServiceError> {
        if data.len() > self.max_bytes {
            return Err(ServiceError::PayloadTooLarge {
                limit: self.max_bytes,
            });
        }
        let target = self.resolve(bucket, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&target, data).await.map_err(io_err)?;
        debug!(%bucket, path, bytes = data.len(), "object stored");
        Ok(path.to_string())
    }

    async fn remove(&self, bucket: Bucket, path: &str) -> Result<(), ServiceError> {
        let target = self.resolve(bucket, path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(%bucket, path, error = %e, "object removal failed");
                Err(io_err(e))
            }
        }
    }

    async fn read(&self, bucket: Bucket, path: &str) -> Result<Vec<u8>, ServiceError> {
        let target = self.resolve(bucket, path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServiceError::NotFound("file"))
            }
            Err(e) => Err(io_err(e)),
        }
    }

    fn create_signed_url(&self, bucket: Bucket, path: &str) -> Result<SignedUrl, ServiceError> {
        checked_relative(path)?;
        self.signer.sign(bucket, path)
    }

    fn verify_signed_url(
        &self,
        bucket: Bucket,
        path: &str,
        expires: i64,
        sig: &str,
    ) -> Result<(), ServiceError> {
        self.signer.verify(bucket, path, expires, sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UrlSigner {
        UrlSigner::new("secret", "http://localhost:8000/", Duration::hours(1))
    }

    #[test]
    fn signed_url_verifies_until_expiry() {
        let now = Utc::now();
        let url = signer().sign_at(Bucket::PaymentProofs, "u/a.jpg", now).unwrap();
        assert!(url.url.starts_with("http://localhost:8000/files/payment-proofs/u/a.jpg?expires="));

        let expires = url.expires_at.timestamp();
        let sig = url.url.rsplit("sig=").next().unwrap();
        assert!(signer().verify_at(Bucket::PaymentProofs, "u/a.jpg", expires, sig, now).is_ok());
        assert!(matches!(
            signer().verify_at(Bucket::PaymentProofs, "u/b.jpg", expires, sig, now),
            Err(ServiceError::BadSignature)
        ));
        assert!(matches!(
            signer().verify_at(
                Bucket::PaymentProofs,
                "u/a.jpg",
                expires,
                sig,
                now + Duration::hours(2)
            ),
            Err(ServiceError::LinkExpired)
        ));
    }

    #[test]
    fn refresh_window() {
        let now = Utc::now();
        let url = signer().sign_at(Bucket::ChatVoices, "x.webm", now).unwrap();
        assert!(!url.needs_refresh(now, Duration::minutes(5)));
        assert!(url.needs_refresh(now + Duration::minutes(56), Duration::minutes(5)));
    }

    #[test]
    fn traversal_is_rejected() {
        assert!(checked_relative("../etc/passwd").is_err());
        assert!(checked_relative("/abs").is_err());
        assert!(checked_relative("").is_err());
        assert!(checked_relative("user/file.png").is_ok());
    }

    #[test]
    fn uploads_decode_from_base64() {
        let upload: Upload =
            serde_json::from_str(r#"{"content_type":"image/png","data":"cG5n"}"#).unwrap();
        assert_eq!(upload.data, b"png");
        assert!(serde_json::from_str::<Upload>(r#"{"content_type":"image/png","data":"***"}"#).is_err());
        assert!(object_path(Uuid::nil(), "text/html").is_err());
    }

    #[tokio::test]
    async fn stores_and_removes_objects() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path(), signer(), 8);
        let path = storage.upload(Bucket::Avatars, "u/a.png", b"png").await.unwrap();
        assert_eq!(storage.read(Bucket::Avatars, &path).await.unwrap(), b"png");

        storage.remove(Bucket::Avatars, &path).await.unwrap();
        assert!(matches!(
            storage.read(Bucket::Avatars, &path).await,
            Err(ServiceError::NotFound(_))
        ));

        let err = storage.upload(Bucket::Avatars, "u/big.png", &[0; 9]).await.unwrap_err();
        assert!(matches!(err, ServiceError::PayloadTooLarge { limit: 8 }));
    }
}
