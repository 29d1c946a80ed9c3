//! Collection-wide scans
//!
//! Resolves output fields, loads tombstones, and runs one
//! [`SegmentIterator`] per segment on a bounded set of tokio tasks that
//! share a single [`ScanTask`].

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::codec::CodecRegistry;
use crate::config::ScanConfig;
use crate::deltalog::DeltalogReader;
use crate::filter::{EntryFilter, ExprEngine, PredicateFilter, TombstoneFilter};
use crate::iterator::{RangeOutcome, SegmentIterator};
use crate::models::{CollectionSchema, DataType, Segment, SegmentLevel, SegmentState, TIMESTAMP_FIELD_ID};
use crate::storage::{CollectionManifest, Translator};
use crate::tasks::{build_task, ScanTask};
use crate::{Error, Result};

/// Runs scans over all segments of a collection
pub struct CollectionScanner<T> {
    translator: Arc<T>,
    codecs: Arc<CodecRegistry>,
    config: ScanConfig,
    engine: Option<Arc<dyn ExprEngine>>,
}

impl<T: Translator + 'static> CollectionScanner<T> {
    pub fn new(translator: Arc<T>, config: ScanConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            translator,
            codecs: Arc::new(CodecRegistry::new()),
            config,
            engine: None,
        })
    }

    /// Engine compiling the configured predicate
    pub fn with_expr_engine(mut self, engine: Arc<dyn ExprEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// The task selected by the configured action
    pub fn build_task(&self, schema: &CollectionSchema) -> Result<Arc<dyn ScanTask>> {
        build_task(self.config.action, schema, self.config.output_limit)
    }

    /// Timestamp, primary key and the named fields
    fn output_fields(schema: &CollectionSchema, names: &[String]) -> Result<Vec<i64>> {
        let pk_field = schema
            .primary_key()
            .ok_or_else(|| Error::decode(format!("collection {} has no primary key field", schema.name)))?;
        let mut fields = vec![TIMESTAMP_FIELD_ID, pk_field.field_id];
        for name in names {
            match schema.field_by_name(name) {
                Some(field) if !fields.contains(&field.field_id) => fields.push(field.field_id),
                Some(_) => {}
                None => tracing::warn!(field = %name, "output field not in schema, ignored"),
            }
        }
        Ok(fields)
    }

    /// L0 segments hold deletes for the whole collection and ignore the segment id
    fn wanted(&self, segment: &Segment) -> bool {
        let selected = segment.level == SegmentLevel::L0
            || self.config.segment_id.map_or(true, |id| id == segment.id);
        selected && (self.config.include_unhealthy || segment.state != SegmentState::Dropped)
    }

    /// Scan the collection, feeding matching rows to `task`
    ///
    /// Returns the task's counter. A task asking to stop ends its segment
    /// normally; the first error cancels the remaining segments.
    pub async fn run(
        &self,
        manifest: &CollectionManifest,
        output_field_names: &[String],
        task: Arc<dyn ScanTask>,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        let schema = Arc::new(manifest.schema.clone());
        let pk_type = schema
            .primary_key()
            .map(|f| f.data_type)
            .ok_or_else(|| Error::decode(format!("collection {} has no primary key field", schema.name)))?;
        let fields = Self::output_fields(&schema, output_field_names)?;

        let segments: Vec<&Segment> = manifest.segments.iter().filter(|s| self.wanted(s)).collect();
        let (l0, normal): (Vec<&Segment>, Vec<&Segment>) =
            segments.into_iter().partition(|s| s.level == SegmentLevel::L0);
        tracing::info!(
            collection_id = manifest.collection_id,
            action = %self.config.action,
            expr = ?self.config.expr,
            segments = normal.len(),
            l0_segments = l0.len(),
            worker_num = self.config.worker_num,
            ignore_delete = self.config.ignore_delete,
            "starting collection scan"
        );

        let mut shared_filters: Vec<Arc<dyn EntryFilter>> = Vec::new();
        if !self.config.ignore_delete {
            let l0_deletes = load_tombstones(self.translator.as_ref(), &l0, pk_type, cancel).await?;
            tracing::debug!(keys = l0_deletes.len(), "loaded l0 deletes");
            shared_filters.push(Arc::new(l0_deletes));
        }
        let predicate = match (&self.config.expr, &self.engine) {
            (None, _) => None,
            (Some(expr), Some(engine)) => {
                Some(Arc::new(PredicateFilter::new(engine.as_ref(), expr, &schema)?) as Arc<dyn EntryFilter>)
            }
            (Some(_), None) => {
                return Err(Error::InvalidConfig(
                    "a filter expression needs an expression engine".to_string(),
                ))
            }
        };

        let token = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.config.worker_num));
        let mut jobs = JoinSet::new();
        let total = normal.len();

        for segment in normal {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit.map_err(|e| Error::Other(e.into()))?,
            };

            let segment = Arc::new(segment.clone());
            let iter = SegmentIterator::new(
                segment.clone(),
                schema.clone(),
                self.translator.clone(),
                self.codecs.clone(),
                fields.clone(),
            )
            .with_batch_size(self.config.batch_size);
            let job = SegmentJob {
                segment,
                translator: self.translator.clone(),
                filters: shared_filters.clone(),
                predicate: predicate.clone(),
                ignore_delete: self.config.ignore_delete,
                pk_type,
            };
            let task = task.clone();
            let token = token.clone();

            jobs.spawn(async move {
                let _permit = permit;
                let segment_id = job.segment.id;
                let result = job.run(iter, task.as_ref(), &token).await;
                if let Err(ref e) = result {
                    if !matches!(e, Error::Cancelled) {
                        tracing::warn!(segment_id, error = %e, "segment scan failed");
                        token.cancel();
                    }
                }
                result
            });
        }

        let mut first_err: Option<Error> = None;
        let mut done = 0usize;
        while let Some(joined) = jobs.join_next().await {
            let err = match joined {
                Ok(Ok(outcome)) => {
                    done += 1;
                    tracing::info!(
                        done,
                        total,
                        stopped = outcome == RangeOutcome::Stopped,
                        counter = task.counter(),
                        "segment finished"
                    );
                    continue;
                }
                Ok(Err(e)) => e,
                Err(e) => Error::Other(e.into()),
            };
            token.cancel();
            // a real failure outranks the cancellations it caused
            if first_err.as_ref().map_or(true, |e| matches!(e, Error::Cancelled)) {
                first_err = Some(err);
            }
        }

        if let Some(err) = first_err {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tracing::info!(
            collection_id = manifest.collection_id,
            counter = task.counter(),
            "collection scan finished"
        );
        Ok(task.counter())
    }
}

/// Everything one spawned segment scan owns
struct SegmentJob<T> {
    segment: Arc<Segment>,
    translator: Arc<T>,
    filters: Vec<Arc<dyn EntryFilter>>,
    predicate: Option<Arc<dyn EntryFilter>>,
    ignore_delete: bool,
    pk_type: DataType,
}

impl<T: Translator> SegmentJob<T> {
    async fn run(
        self,
        mut iter: SegmentIterator<T>,
        task: &dyn ScanTask,
        cancel: &CancellationToken,
    ) -> Result<RangeOutcome> {
        let mut filters = self.filters;
        if !self.ignore_delete {
            let deletes =
                load_tombstones(self.translator.as_ref(), &[self.segment.as_ref()], self.pk_type, cancel).await?;
            filters.push(Arc::new(deletes));
        }
        filters.extend(self.predicate);
        for filter in filters {
            iter = iter.with_filter(filter);
        }
        iter.range(task, cancel).await
    }
}

/// Fold the deltalogs of `segments` into one tombstone filter
pub async fn load_tombstones<T: Translator>(
    translator: &T,
    segments: &[&Segment],
    pk_type: DataType,
    cancel: &CancellationToken,
) -> Result<TombstoneFilter> {
    let mut filter = TombstoneFilter::new();
    for segment in segments {
        for path in segment.delta_paths() {
            let stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                stream = translator.open(path) => stream?,
            };
            let delta = DeltalogReader::new(stream)?.read_all(pk_type)?;
            tracing::debug!(segment_id = segment.id, path, rows = delta.row_count(), "read deltalog");
            filter.add_delta_data(&delta);
        }
    }
    Ok(filter)
}
