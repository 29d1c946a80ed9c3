//! Storage layer for segscan
//!
//! This module provides object storage access via OpenDAL:
//! - Opening binlog/deltalog objects as byte streams for the decoders
//! - Collection manifest handling

pub mod metadata;

use bytes::Bytes;
use opendal::Operator;
use std::future::Future;

pub use metadata::{CollectionManifest, ManifestStore};

use crate::{Error, Result};

/// Placeholder recorded in binlog paths in place of the storage root
pub const ROOT_PATH_PLACEHOLDER: &str = "ROOT_PATH";

/// Storage configuration
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct StorageConfig {
    /// S3 endpoint URL
    pub endpoint: String,
    /// S3 bucket name
    pub bucket: String,
    /// AWS access key ID
    pub access_key_id: Option<String>,
    /// AWS secret access key
    pub secret_access_key: Option<String>,
    /// AWS region
    pub region: String,
    /// Substituted for `ROOT_PATH` in recorded binlog paths
    #[serde(default)]
    pub root_path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "a-bucket".to_string(),
            access_key_id: None,
            secret_access_key: None,
            region: "us-east-1".to_string(),
            root_path: Some("files".to_string()),
        }
    }
}

/// Create an S3 operator from configuration
pub fn create_s3_operator(config: &StorageConfig) -> Result<Operator> {
    let mut builder = opendal::services::S3::default()
        .endpoint(&config.endpoint)
        .bucket(&config.bucket)
        .region(&config.region);

    if let Some(ref key) = config.access_key_id {
        builder = builder.access_key_id(key);
    }
    if let Some(ref secret) = config.secret_access_key {
        builder = builder.secret_access_key(secret);
    }

    let op = Operator::new(builder)
        .map_err(Error::Storage)?
        .finish();

    Ok(op)
}

/// Create an operator over a local directory
pub fn create_fs_operator(root: &str) -> Result<Operator> {
    let builder = opendal::services::Fs::default().root(root);
    let op = Operator::new(builder)
        .map_err(Error::Storage)?
        .finish();
    Ok(op)
}

/// Create an in-memory operator for testing
pub fn create_memory_operator() -> Result<Operator> {
    let builder = opendal::services::Memory::default();
    let op = Operator::new(builder)
        .map_err(Error::Storage)?
        .finish();
    Ok(op)
}

/// Opened object contents, addressable by position
///
/// Cloning is cheap; all clones share one reference-counted buffer which is
/// freed when the last owner (normally the decoder) is dropped.
#[derive(Debug, Clone)]
pub struct ByteStream {
    data: Bytes,
}

impl ByteStream {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read `len` bytes starting at `offset`
    pub fn read_at(&self, offset: usize, len: usize) -> Result<Bytes> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "read of {} bytes at offset {} past end of {}-byte stream",
                        len,
                        offset,
                        self.data.len()
                    ),
                ))
            })?;
        Ok(self.data.slice(offset..end))
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

/// Opens recorded binlog paths as byte streams
///
/// Implementations own retries and timeouts; the reader chain performs none.
pub trait Translator: Send + Sync {
    fn open(&self, path: &str) -> impl Future<Output = Result<ByteStream>> + Send;
}

/// Storage client for segscan operations
#[derive(Clone)]
pub struct StorageClient {
    operator: Operator,
    root_path: Option<String>,
}

impl StorageClient {
    /// Create a new storage client
    pub fn new(operator: Operator) -> Self {
        Self {
            operator,
            root_path: None,
        }
    }

    /// Create from S3 configuration
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let operator = create_s3_operator(config)?;
        Ok(Self::new(operator).with_root_path(config.root_path.clone()))
    }

    /// Create a client over a local directory
    pub fn local(root: &str) -> Result<Self> {
        let operator = create_fs_operator(root)?;
        Ok(Self::new(operator))
    }

    /// Create an in-memory client for testing
    pub fn memory() -> Result<Self> {
        let operator = create_memory_operator()?;
        Ok(Self::new(operator))
    }

    pub fn with_root_path(mut self, root_path: Option<String>) -> Self {
        self.root_path = root_path;
        self
    }

    /// Get the underlying operator
    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// Map a recorded binlog path to an object path
    pub fn resolve(&self, path: &str) -> String {
        match self.root_path {
            Some(ref root) => path.replace(ROOT_PATH_PLACEHOLDER, root),
            None => path.to_string(),
        }
    }

    /// Write data to storage
    pub async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        self.operator
            .write(path, data)
            .await
            .map_err(Error::Storage)
    }

    /// Read data from storage
    pub async fn read(&self, path: &str) -> Result<Bytes> {
        self.operator
            .read(path)
            .await
            .map(|buf| buf.to_bytes())
            .map_err(Error::Storage)
    }

    /// Check if a path exists
    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.operator
            .exists(path)
            .await
            .map_err(Error::Storage)
    }

    /// List objects under a prefix
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self
            .operator
            .list(prefix)
            .await
            .map_err(Error::Storage)?;

        Ok(entries.into_iter().map(|e| e.path().to_string()).collect())
    }
}

impl Translator for StorageClient {
    async fn open(&self, path: &str) -> Result<ByteStream> {
        let resolved = self.resolve(path);
        tracing::debug!(path = %resolved, "opening binlog object");
        let data = self.read(&resolved).await?;
        Ok(ByteStream::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_stream_read_at() {
        let stream = ByteStream::new(vec![1u8, 2, 3, 4, 5]);
        assert_eq!(stream.len(), 5);
        assert_eq!(stream.read_at(1, 3).unwrap().as_ref(), &[2, 3, 4]);
        assert!(stream.read_at(4, 2).is_err());
        assert!(stream.read_at(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_resolve_root_path() {
        let client = StorageClient::memory()
            .unwrap()
            .with_root_path(Some("files".to_string()));
        assert_eq!(
            client.resolve("ROOT_PATH/insert_log/1/2/3/100/1"),
            "files/insert_log/1/2/3/100/1"
        );
        let plain = StorageClient::memory().unwrap();
        assert_eq!(plain.resolve("ROOT_PATH/x"), "ROOT_PATH/x");
    }

    #[tokio::test]
    async fn test_translator_opens_objects() {
        let client = StorageClient::memory()
            .unwrap()
            .with_root_path(Some("files".to_string()));
        client
            .write("files/insert_log/a", vec![9, 8, 7])
            .await
            .unwrap();

        assert!(client.exists("files/insert_log/a").await.unwrap());
        let stream = client.open("ROOT_PATH/insert_log/a").await.unwrap();
        assert_eq!(stream.into_bytes().as_ref(), &[9, 8, 7]);

        assert!(client.open("ROOT_PATH/insert_log/missing").await.is_err());
    }

    #[tokio::test]
    async fn test_local_client() {
        let dir = tempfile::tempdir().unwrap();
        let client = StorageClient::local(dir.path().to_str().unwrap()).unwrap();
        client.write("segment/1", vec![1, 2]).await.unwrap();

        assert!(dir.path().join("segment/1").exists());
        let listed = client.list("segment/").await.unwrap();
        assert!(listed.iter().any(|p| p == "segment/1"));
    }
}
