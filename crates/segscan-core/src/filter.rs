//! Row filters applied before rows reach a scan task
//!
//! Filters are pure: the same `(pk, ts, values)` always gives the same
//! answer, so one filter can be shared by concurrent segment scans.

use std::collections::HashMap;

use crate::deltalog::DeltaData;
use crate::models::{CollectionSchema, PrimaryKey, RowValues, Value};
use crate::{Error, Result};

/// Environment variable bound to the row's primary key
pub const PK_VAR: &str = "$pk";
/// Environment variable bound to the row's timestamp
pub const TIMESTAMP_VAR: &str = "$timestamp";

/// Decides whether a row is passed on
pub trait EntryFilter: Send + Sync {
    fn matches(&self, pk: &PrimaryKey, ts: i64, values: &RowValues) -> bool;
}

/// Hides rows removed by a later delete of the same key
///
/// A row survives iff no delete of its key carries a timestamp at or after
/// the row's own.
#[derive(Debug, Clone, Default)]
pub struct TombstoneFilter {
    deletes: HashMap<PrimaryKey, u64>,
}

impl TombstoneFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold delete records, keeping the latest timestamp per key
    pub fn from_delta_data<'a>(deltas: impl IntoIterator<Item = &'a DeltaData>) -> Self {
        let mut filter = Self::new();
        for delta in deltas {
            filter.add_delta_data(delta);
        }
        filter
    }

    pub fn add_delta_data(&mut self, delta: &DeltaData) {
        delta.range(|pk, ts| {
            self.insert(pk.clone(), ts);
            true
        });
    }

    pub fn insert(&mut self, pk: PrimaryKey, ts: u64) {
        let entry = self.deletes.entry(pk).or_insert(ts);
        if ts > *entry {
            *entry = ts;
        }
    }

    pub fn delete_ts(&self, pk: &PrimaryKey) -> Option<u64> {
        self.deletes.get(pk).copied()
    }

    pub fn len(&self) -> usize {
        self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty()
    }
}

impl EntryFilter for TombstoneFilter {
    fn matches(&self, pk: &PrimaryKey, ts: i64, _values: &RowValues) -> bool {
        match self.deletes.get(pk) {
            None => true,
            Some(deleted_at) => u64::try_from(ts).is_ok_and(|ts| ts > *deleted_at),
        }
    }
}

/// A compiled predicate, evaluated against a name -> value environment
pub trait CompiledExpr: Send + Sync {
    fn run(&self, env: &HashMap<String, Value>) -> anyhow::Result<Value>;
}

/// Compiler of predicate expressions
pub trait ExprEngine: Send + Sync {
    fn compile(&self, expr: &str) -> anyhow::Result<Box<dyn CompiledExpr>>;
}

/// Keeps rows for which a user expression evaluates to `true`
///
/// Field values are bound under their schema names, next to [`PK_VAR`] and
/// [`TIMESTAMP_VAR`]. A non-boolean result or an evaluation error drops the
/// row and is logged.
pub struct PredicateFilter {
    expr: String,
    program: Box<dyn CompiledExpr>,
    names: HashMap<i64, String>,
}

impl PredicateFilter {
    pub fn new(engine: &dyn ExprEngine, expr: &str, schema: &CollectionSchema) -> Result<Self> {
        let program = engine
            .compile(expr)
            .map_err(|e| Error::Filter(format!("failed to compile {:?}: {:#}", expr, e)))?;
        let names = schema
            .fields
            .iter()
            .map(|f| (f.field_id, f.name.clone()))
            .collect();
        Ok(Self {
            expr: expr.to_string(),
            program,
            names,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    fn environment(&self, pk: &PrimaryKey, ts: i64, values: &RowValues) -> HashMap<String, Value> {
        let mut env: HashMap<String, Value> = values
            .iter()
            .filter_map(|(field_id, value)| {
                self.names
                    .get(field_id)
                    .map(|name| (name.clone(), value.clone()))
            })
            .collect();
        env.insert(PK_VAR.to_string(), pk.to_value());
        env.insert(TIMESTAMP_VAR.to_string(), Value::Int64(ts));
        env
    }
}

impl EntryFilter for PredicateFilter {
    fn matches(&self, pk: &PrimaryKey, ts: i64, values: &RowValues) -> bool {
        match self.program.run(&self.environment(pk, ts, values)) {
            Ok(Value::Bool(matched)) => matched,
            Ok(other) => {
                tracing::warn!(expr = %self.expr, %pk, result = %other, "filter expression result is not bool");
                false
            }
            Err(e) => {
                tracing::warn!(expr = %self.expr, %pk, error = %e, "filter expression failed");
                false
            }
        }
    }
}

/// True for a float scalar or vector holding NaN or an infinity
///
/// Meant to be exposed by expression engines, to hunt corrupted vectors.
pub fn abnormal_float(value: &Value) -> bool {
    match value {
        Value::Float(v) => !v.is_finite(),
        Value::Double(v) => !v.is_finite(),
        Value::FloatVector(v) => v.iter().any(|x| !x.is_finite()),
        _ => false,
    }
}
