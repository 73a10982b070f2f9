// THEORY:
// The classification map is the first lens the labeling pass looks through. It
// turns an 8-bit intensity into an integer depth level; everything downstream
// (which pixels are connected, which region nests inside which) is decided on
// levels only, never on raw intensities.
//
// Two policies are supported:
// - binary threshold: level 0 below `T`, level 1 at or above it.
// - lookup table: any 256-entry table. A non-decreasing table gives the usual
//   "brighter is deeper" nesting. A non-monotonic table is not an error; the
//   forest then nests by the table's levels, whatever they mean.
//
// The map is resolved once into a flat `[u8; 256]` so the hot loop is a single
// indexed load per pixel.

use crate::error::{BlobError, BlobResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_THRESHOLD: u8 = 60;
pub const DEFAULT_STAIRCASE_STEP: u8 = 30;

/// User-facing description of a classification policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    /// Two levels split at the threshold.
    Threshold(u8),
    /// `0` below `threshold`, then one level more every `step` intensities.
    Staircase { threshold: u8, step: u8 },
    /// Explicit level for every intensity. Must hold 256 entries.
    Table(Vec<u8>),
}

impl Default for Classification {
    fn default() -> Self {
        Self::Threshold(DEFAULT_THRESHOLD)
    }
}

impl Classification {
    /// True when the policy yields at most two levels, i.e. the threshold
    /// variant of the forest builder applies.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Threshold(_))
    }
}

/// Resolved intensity -> level lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthMap {
    table: [u8; 256],
    max_level: u8,
}

impl DepthMap {
    pub fn threshold(thresh: u8) -> Self {
        let mut table = [0u8; 256];
        for (value, level) in table.iter_mut().enumerate() {
            *level = u8::from(value >= thresh as usize);
        }
        Self::from_table(table)
    }

    /// Staircase: `0` for `v < threshold`, `(v - threshold) / step + 1` above.
    pub fn staircase(threshold: u8, step: u8) -> Self {
        let step = step.max(1) as usize;
        let mut table = [0u8; 256];
        for (value, level) in table.iter_mut().enumerate() {
            if value >= threshold as usize {
                *level = ((value - threshold as usize) / step + 1) as u8;
            }
        }
        Self::from_table(table)
    }

    pub fn from_slice(levels: &[u8]) -> BlobResult<Self> {
        let table: [u8; 256] = levels
            .try_into()
            .map_err(|_| BlobError::InvalidLevelTable { len: levels.len() })?;
        Ok(Self::from_table(table))
    }

    pub fn from_table(table: [u8; 256]) -> Self {
        let max_level = table.iter().copied().max().unwrap_or(0);
        Self { table, max_level }
    }

    pub fn from_classification(classification: &Classification) -> BlobResult<Self> {
        match classification {
            Classification::Threshold(t) => Ok(Self::threshold(*t)),
            Classification::Staircase { threshold, step } => Ok(Self::staircase(*threshold, *step)),
            Classification::Table(levels) => Self::from_slice(levels),
        }
    }

    #[inline]
    pub fn level(&self, intensity: u8) -> u8 {
        self.table[intensity as usize]
    }

    pub fn max_level(&self) -> u8 {
        self.max_level
    }

    pub fn as_table(&self) -> &[u8; 256] {
        &self.table
    }
}
