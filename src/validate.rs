//! Row count sanity check before a table is replaced.

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Accepted range of the new row count relative to the previous one
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CountLimits {
    pub min_ratio: f64,
    pub max_ratio: f64,
}

impl Default for CountLimits {
    fn default() -> Self {
        Self {
            min_ratio: 0.95,
            max_ratio: 1.05,
        }
    }
}

impl CountLimits {
    /// Inclusive bounds for a previous count of `old`
    pub fn bounds(&self, old: usize) -> (usize, usize) {
        let old = old as f64;
        (
            (self.min_ratio * old).floor() as usize,
            (self.max_ratio * old).ceil() as usize,
        )
    }

    /// Accept `new` when the table did not exist before, or when it falls
    /// within the bounds. An empty result or an empty previous table is
    /// always rejected.
    pub fn check(&self, table: &str, old: Option<usize>, new: usize) -> Result<()> {
        let Some(old) = old else {
            warn!("No previous row count for '{}', accepting {} rows", table, new);
            return Ok(());
        };

        let (min, max) = self.bounds(old);
        if old == 0 || new == 0 || new < min || new > max {
            return Err(Error::CountOutOfLimits { old, new, min, max });
        }

        info!(
            "Row count for '{}' within limits: {} (previous {}, allowed {}..={})",
            table, new, old, min, max
        );
        Ok(())
    }
}
