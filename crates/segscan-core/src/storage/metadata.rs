//! Collection manifests
//!
//! A manifest is a JSON snapshot of one collection's schema and segment
//! metadata, kept next to the data files. It stands in for the metadata
//! service when scanning a copied bucket or a local directory.

use serde::{Deserialize, Serialize};

use super::StorageClient;
use crate::models::{CollectionSchema, Segment, SegmentLevel};
use crate::{Error, Result};

/// Schema and segments of one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionManifest {
    pub collection_id: i64,
    pub schema: CollectionSchema,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl CollectionManifest {
    /// L0 segments only carry deletes that apply to the whole collection
    pub fn l0_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.level == SegmentLevel::L0)
    }

    pub fn data_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.level != SegmentLevel::L0)
    }
}

/// Manager for collection manifests
pub struct ManifestStore<'a> {
    client: &'a StorageClient,
}

impl<'a> ManifestStore<'a> {
    /// Create a new manifest store
    pub fn new(client: &'a StorageClient) -> Self {
        Self { client }
    }

    /// Get the path of a collection's manifest file
    fn manifest_path(collection_id: i64) -> String {
        format!("_manifest/collection_{}.json", collection_id)
    }

    /// Load the manifest of a collection
    pub async fn get_manifest(&self, collection_id: i64) -> Result<CollectionManifest> {
        let path = Self::manifest_path(collection_id);
        if !self.client.exists(&path).await? {
            return Err(Error::NotFound(format!("collection {}", collection_id)));
        }

        let data = self.client.read(&path).await?;
        serde_json::from_slice(&data).map_err(Error::Serialization)
    }

    /// Store or replace the manifest of a collection
    pub async fn commit_manifest(&self, manifest: &CollectionManifest) -> Result<()> {
        let data = serde_json::to_vec_pretty(manifest).map_err(Error::Serialization)?;
        self.client
            .write(&Self::manifest_path(manifest.collection_id), data)
            .await
    }

    /// Ids of all collections with a manifest
    pub async fn list_collections(&self) -> Result<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .client
            .list("_manifest/")
            .await?
            .iter()
            .filter_map(|path| {
                path.rsplit('/')
                    .next()?
                    .strip_prefix("collection_")?
                    .strip_suffix(".json")?
                    .parse()
                    .ok()
            })
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
