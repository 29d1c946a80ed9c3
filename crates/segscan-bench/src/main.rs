//! segscan Benchmark Tool
//!
//! Builds a synthetic collection in memory, then times each scan action
//! over it. Set `RUST_LOG=segscan_core=debug` for per-file logs.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use arrow::array::{ArrayRef, Int64Array, StringArray};
use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use segscan_core::models::{
    CollectionSchema, DataType, FieldSchema, PrimaryKey, SegmentLevel, TIMESTAMP_FIELD_ID,
};
use segscan_core::storage::{CollectionManifest, ManifestStore, StorageClient};
use segscan_core::tasks::ScanAction;
use segscan_core::testutil::SegmentBuilder;
use segscan_core::{CollectionScanner, ScanConfig};

const COLLECTION_ID: i64 = 1;
const SEGMENTS: i64 = 8;
const BATCHES_PER_SEGMENT: usize = 4;
const ROWS_PER_BATCH: i64 = 10_000;

#[derive(Debug, Serialize)]
struct Report {
    action: String,
    segments: usize,
    counter: i64,
    elapsed_ms: f64,
    rows_per_sec: f64,
}

fn schema() -> CollectionSchema {
    CollectionSchema {
        name: "bench".to_string(),
        fields: vec![
            FieldSchema::new(100, "id", DataType::Int64).primary_key(),
            FieldSchema::new(101, "tag", DataType::VarChar),
        ],
    }
}

/// Legacy and wide-column segments alternate; pks repeat across segments
async fn build_collection(client: &StorageClient) -> anyhow::Result<CollectionManifest> {
    let mut rng = rand::thread_rng();
    let mut segments = Vec::new();

    for segment_id in 1..=SEGMENTS {
        let mut pk_batches = Vec::new();
        let mut ts_batches = Vec::new();
        let mut tag_batches = Vec::new();
        for batch in 0..BATCHES_PER_SEGMENT as i64 {
            let base = batch * ROWS_PER_BATCH;
            let pks: Vec<i64> = (0..ROWS_PER_BATCH).map(|_| rng.gen_range(0..base + ROWS_PER_BATCH * 4)).collect();
            let ts: Vec<i64> = pks.iter().map(|_| rng.gen_range(1_000..2_000)).collect();
            let tags: Vec<String> = pks.iter().map(|pk| format!("tag-{}", pk % 97)).collect();
            pk_batches.push(Arc::new(Int64Array::from(pks)) as ArrayRef);
            ts_batches.push(Arc::new(Int64Array::from(ts)) as ArrayRef);
            tag_batches.push(Arc::new(StringArray::from(tags)) as ArrayRef);
        }

        let builder = if segment_id % 2 == 1 {
            SegmentBuilder::new(COLLECTION_ID, segment_id, 1)
                .v1_field(TIMESTAMP_FIELD_ID, DataType::Int64, ts_batches)?
                .v1_field(100, DataType::Int64, pk_batches)?
                .v1_field(101, DataType::VarChar, tag_batches)?
        } else {
            let batches = (0..BATCHES_PER_SEGMENT)
                .map(|i| {
                    vec![
                        (TIMESTAMP_FIELD_ID, ts_batches[i].clone()),
                        (100, pk_batches[i].clone()),
                        (101, tag_batches[i].clone()),
                    ]
                })
                .collect();
            SegmentBuilder::new(COLLECTION_ID, segment_id, 2).v2_group(
                0,
                vec![TIMESTAMP_FIELD_ID, 100, 101],
                batches,
                4096,
            )?
        };
        let deletes = (0..100).map(|_| (PrimaryKey::Int64(rng.gen_range(0..1_000)), 1_500)).collect();
        segments.push(builder.deltalog(deletes)?.write(client).await?);
    }

    let deletes = (0..1_000).map(|_| (PrimaryKey::Int64(rng.gen_range(0..40_000)), 1_800)).collect();
    let mut l0 = SegmentBuilder::new(COLLECTION_ID, SEGMENTS + 1, 1).deltalog(deletes)?;
    l0.segment_mut().level = SegmentLevel::L0;
    segments.push(l0.write(client).await?);

    Ok(CollectionManifest {
        collection_id: COLLECTION_ID,
        schema: schema(),
        segments,
    })
}

async fn bench_action(
    client: Arc<StorageClient>,
    manifest: &CollectionManifest,
    action: ScanAction,
) -> anyhow::Result<Report> {
    let config = ScanConfig {
        action,
        output_limit: 5,
        ..Default::default()
    };
    let scanner = CollectionScanner::new(client, config)?;
    let task = scanner.build_task(&manifest.schema)?;

    let start = Instant::now();
    let counter = scanner
        .run(manifest, &["tag".to_string()], task.clone(), &CancellationToken::new())
        .await?;
    let elapsed = start.elapsed();
    println!("{}", task.summary());

    let total_rows = SEGMENTS * BATCHES_PER_SEGMENT as i64 * ROWS_PER_BATCH;
    Ok(Report {
        action: action.to_string(),
        segments: SEGMENTS as usize,
        counter,
        elapsed_ms: elapsed.as_secs_f64() * 1_000.0,
        rows_per_sec: total_rows as f64 / elapsed.as_secs_f64(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("segscan Benchmark Suite");
    println!("=======================\n");

    let client = Arc::new(StorageClient::memory()?);
    let manifest = build_collection(&client).await.context("failed to build collection")?;
    ManifestStore::new(&client).commit_manifest(&manifest).await?;
    let manifest = ManifestStore::new(&client).get_manifest(COLLECTION_ID).await?;

    for action in [ScanAction::Count, ScanAction::Dedup, ScanAction::Locate] {
        let report = bench_action(client.clone(), &manifest, action).await?;
        println!("{}\n", serde_json::to_string(&report)?);
    }
    Ok(())
}
