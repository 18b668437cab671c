//! Object-storage REST content store.
//!
//! Speaks the storage API exposed by hosted Postgres platforms:
//!
//! | operation   | request                                             |
//! |-------------|-----------------------------------------------------|
//! | get         | `GET  {base}/object/{bucket}/{path}`                |
//! | put         | `POST {base}/object/{bucket}/{path}` + `x-upsert`   |
//! | remove      | `DELETE {base}/object/{bucket}` `{"prefixes": [..]}`|
//! | signed_url  | `POST {base}/object/sign/{bucket}/{path}`           |
//!
//! Every request carries the service key as a bearer token. The only
//! timeout at this layer is the client's request timeout.

use super::{validate_key, ContentStore};
use crate::error::StoreError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub struct HttpContentStore {
    client: Client,
    base_url: String,
    service_key: String,
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

impl HttpContentStore {
    /// `base_url` is the storage API root, e.g. `https://x.example.co/storage/v1`.
    pub fn new(base_url: &str, service_key: impl Into<String>, timeout_secs: u64) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.into(),
        })
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/object/{}/{}", self.base_url, bucket, path)
    }

    fn sign_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/object/sign/{}/{}", self.base_url, bucket, path)
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/object/{}", self.base_url, bucket)
    }

    /// Signed paths come back relative to the API root.
    fn absolutize(&self, signed: &str) -> String {
        if signed.starts_with("http://") || signed.starts_with("https://") {
            signed.to_string()
        } else {
            format!("{}/{}", self.base_url, signed.trim_start_matches('/'))
        }
    }

    async fn check(response: Response, what: &str) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = format!("{what}: HTTP {status} {}", body.trim());
        if status == StatusCode::NOT_FOUND {
            Err(StoreError::NotFound(detail))
        } else {
            Err(StoreError::Unavailable(detail))
        }
    }
}

#[async_trait]
impl ContentStore for HttpContentStore {
    async fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        validate_key(bucket, path)?;
        debug!("Uploading {} bytes to {}/{}", bytes.len(), bucket, path);
        let response = self
            .client
            .post(self.object_url(bucket, path))
            .bearer_auth(&self.service_key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        Self::check(response, "upload").await?;
        Ok(())
    }

    async fn get(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StoreError> {
        validate_key(bucket, path)?;
        let response = self
            .client
            .get(self.object_url(bucket, path))
            .bearer_auth(&self.service_key)
            .send()
            .await?;
        let response = Self::check(response, "download").await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StoreError> {
        for path in paths {
            validate_key(bucket, path)?;
        }
        if paths.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .delete(self.bucket_url(bucket))
            .bearer_auth(&self.service_key)
            .json(&json!({ "prefixes": paths }))
            .send()
            .await?;
        Self::check(response, "remove").await?;
        Ok(())
    }

    async fn signed_url(&self, bucket: &str, path: &str, ttl_secs: u64) -> Result<String, StoreError> {
        validate_key(bucket, path)?;
        let response = self
            .client
            .post(self.sign_url(bucket, path))
            .bearer_auth(&self.service_key)
            .json(&json!({ "expiresIn": ttl_secs }))
            .send()
            .await?;
        let signed: SignedUrlResponse = Self::check(response, "sign").await?.json().await?;
        Ok(self.absolutize(&signed.signed_url))
    }
}
