//! Object storage client for photo evidence.

use crate::config::BackendConfig;
use crate::error::ClientError;
use crate::rest::{build_auth_headers, build_http_client, read_body};
use async_trait::async_trait;
use fieldops_core::error::FieldOpsResult;
use fieldops_core::ports::PhotoStore;
use reqwest::header::HeaderMap;

const STORAGE_RESOURCE: &str = "storage";

#[derive(Clone)]
pub struct StorageClient {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderMap,
}

impl StorageClient {
    pub fn new(config: &BackendConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_http_client(config)?,
            base_url: config.base_url().to_string(),
            auth_header: build_auth_headers(config)?,
        })
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path)
    }

    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, path)
    }

    async fn put_object(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ClientError> {
        let size = bytes.len();
        let response = self
            .client
            .post(self.object_url(bucket, path))
            .headers(self.auth_header.clone())
            .header("content-type", content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;
        read_body(response).await?;
        tracing::info!(bucket, path, size, "Photo uploaded");
        Ok(self.public_url(bucket, path))
    }
}

#[async_trait]
impl PhotoStore for StorageClient {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> FieldOpsResult<String> {
        self.put_object(bucket, path, content_type, bytes)
            .await
            .map_err(|e| {
                tracing::warn!(bucket, path, error = %e, "Photo upload failed");
                e.into_field_ops(STORAGE_RESOURCE)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_and_public_urls() {
        let client = StorageClient::new(&BackendConfig {
            url: "https://abc.supabase.co".to_string(),
            anon_key: "anon".to_string(),
            request_timeout_ms: 1000,
        })
        .unwrap();
        assert_eq!(
            client.object_url("chat-images", "AB1234/1.jpg"),
            "https://abc.supabase.co/storage/v1/object/chat-images/AB1234/1.jpg"
        );
        assert_eq!(
            client.public_url("evidencias", "dev_1_0_R1.jpg"),
            "https://abc.supabase.co/storage/v1/object/public/evidencias/dev_1_0_R1.jpg"
        );
    }
}
