//! Card image handling for the seed run
//!
//! An image goes source -> codec -> store. Download and upload each go
//! through the shared [`RetryController`]; a 404 from the source means the
//! record simply has no image.

use crate::config::StorageConfig;
use crate::error::{IngestError, RemoteError, Result};
use crate::models::{path_component, PartitionKey, SourceRecord};
use crate::retry::RetryController;
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use cardvault_common::checksum::sha256_hex;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Where raw image bytes come from
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, RemoteError>;
}

/// Turns downloaded bytes into the stored form
pub trait AssetCodec: Send + Sync {
    fn encode(&self, raw: Vec<u8>) -> Result<EncodedAsset>;
}

/// Where encoded images are kept; returns the public URL
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn store(&self, key: &str, asset: &EncodedAsset)
        -> std::result::Result<String, RemoteError>;
}

/// Encoded image ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAsset {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub extension: String,
    /// Hex SHA-256 of `bytes`
    pub checksum: String,
}

// ============================================================================
// HTTP source
// ============================================================================

/// Downloads images over HTTP(S)
#[derive(Clone)]
pub struct HttpAssetSource {
    client: reqwest::Client,
}

impl HttpAssetSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cardvault-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetSource for HttpAssetSource {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, RemoteError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::from_status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        debug!(url, bytes = bytes.len(), "Image downloaded");
        Ok(bytes.to_vec())
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Stores images as downloaded, detecting the type from magic bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCodec;

impl AssetCodec for PassthroughCodec {
    fn encode(&self, raw: Vec<u8>) -> Result<EncodedAsset> {
        if raw.is_empty() {
            return Err(IngestError::Codec("empty image body".to_string()));
        }

        let (content_type, extension) = sniff_image_type(&raw);
        Ok(EncodedAsset {
            checksum: sha256_hex(&raw),
            bytes: raw,
            content_type: content_type.to_string(),
            extension: extension.to_string(),
        })
    }
}

fn sniff_image_type(bytes: &[u8]) -> (&'static str, &'static str) {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        ("image/jpeg", "jpg")
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        ("image/png", "png")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        ("image/webp", "webp")
    } else if bytes.starts_with(b"GIF8") {
        ("image/gif", "gif")
    } else {
        ("application/octet-stream", "bin")
    }
}

// ============================================================================
// Stores
// ============================================================================

/// S3 or MinIO bucket
#[derive(Clone)]
pub struct S3AssetStore {
    client: Client,
    config: StorageConfig,
}

impl S3AssetStore {
    pub fn new(config: StorageConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "cardvault-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!(bucket = %config.bucket, "Storage client initialized");

        Self { client, config }
    }
}

#[async_trait]
impl AssetStore for S3AssetStore {
    async fn store(
        &self,
        key: &str,
        asset: &EncodedAsset,
    ) -> std::result::Result<String, RemoteError> {
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .content_type(&asset.content_type)
            .metadata("sha256", &asset.checksum)
            .body(ByteStream::from(asset.bytes.clone()))
            .send()
            .await
            .map_err(|err| match err.raw_response() {
                Some(response) => RemoteError::from_status(response.status().as_u16()),
                None => RemoteError::Transport(err.to_string()),
            })?;

        debug!(
            bucket = %self.config.bucket,
            key,
            bytes = asset.bytes.len(),
            checksum = %asset.checksum,
            "Image uploaded"
        );
        Ok(self.config.object_url(key))
    }
}

/// In-process store returning `memory://` URLs
#[derive(Debug, Default)]
pub struct MemoryAssetStore {
    objects: Mutex<BTreeMap<String, EncodedAsset>>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn store(
        &self,
        key: &str,
        asset: &EncodedAsset,
    ) -> std::result::Result<String, RemoteError> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), asset.clone());
        Ok(format!("memory://{key}"))
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Resolves a record's image into a stored URL
#[derive(Clone)]
pub struct AssetPipeline {
    source: Arc<dyn AssetSource>,
    codec: Arc<dyn AssetCodec>,
    store: Arc<dyn AssetStore>,
    retry: RetryController,
    prefix: String,
}

impl AssetPipeline {
    pub fn new(
        source: Arc<dyn AssetSource>,
        codec: Arc<dyn AssetCodec>,
        store: Arc<dyn AssetStore>,
        retry: RetryController,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            source,
            codec,
            store,
            retry,
            prefix: prefix.into(),
        }
    }

    /// Object key for a record's image ("cards/lea/en/232.jpg")
    pub fn object_key(
        &self,
        key: &PartitionKey,
        record: &SourceRecord,
        extension: &str,
    ) -> String {
        format!(
            "{}/{}/{}/{}.{}",
            self.prefix.trim_end_matches('/'),
            path_component(&key.group),
            path_component(&key.language),
            path_component(record.collector_number.trim()),
            extension
        )
    }

    /// Download, encode and store the record's image
    ///
    /// `Ok(None)` when the record has no image reference or the source
    /// reports it missing. Errors are returned after retries are exhausted.
    pub async fn resolve(
        &self,
        key: &PartitionKey,
        record: &SourceRecord,
    ) -> Result<Option<String>> {
        let Some(url) = record.preferred_image_url() else {
            return Ok(None);
        };

        let Some(raw) = self
            .retry
            .call("asset download", || self.source.fetch(url))
            .await?
        else {
            debug!(url, "Image not found at source");
            return Ok(None);
        };

        let asset = self.codec.encode(raw)?;
        let object_key = self.object_key(key, record, &asset.extension);

        match self
            .retry
            .call("asset upload", || self.store.store(&object_key, &asset))
            .await?
        {
            Some(stored) => Ok(Some(stored)),
            None => Err(IngestError::Storage(format!(
                "storage target missing for {object_key}"
            ))),
        }
    }
}
