//! Scan configuration

use serde::{Deserialize, Serialize};

use crate::tasks::ScanAction;
use crate::{Error, Result};

/// Options of a collection scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub action: ScanAction,
    /// Only scan this segment
    pub segment_id: Option<i64>,
    /// Predicate rows must satisfy, compiled by the injected engine
    pub expr: Option<String>,
    /// Segments scanned concurrently
    pub worker_num: usize,
    /// Rows printed by a locate scan; 0 prints all
    pub output_limit: i64,
    /// Skip deltalogs entirely
    pub ignore_delete: bool,
    /// Also scan dropped segments
    pub include_unhealthy: bool,
    /// Rows per Arrow record batch
    pub batch_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            action: ScanAction::Count,
            segment_id: None,
            expr: None,
            worker_num: 4,
            output_limit: 10,
            ignore_delete: false,
            include_unhealthy: false,
            batch_size: 1024,
        }
    }
}

impl ScanConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_num == 0 {
            return Err(Error::InvalidConfig("worker_num must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be at least 1".to_string()));
        }
        if self.output_limit < 0 {
            return Err(Error::InvalidConfig(format!(
                "output_limit must not be negative, got {}",
                self.output_limit
            )));
        }
        Ok(())
    }
}
