#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(pub u32);

/// Index used for parent links in flat CV arrays; cell roots carry `NO_PARENT`.
pub const NO_PARENT: i64 = -1;

/// Prefix-sum partition of a flat index range into per-cell sub-ranges.
///
/// `bounds` has one entry per cell plus a trailing total, so cell `c` owns
/// `bounds[c]..bounds[c+1]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellPartition {
    pub bounds: Vec<usize>,
}

impl CellPartition {
    pub fn new() -> Self {
        Self { bounds: vec![0] }
    }

    pub fn push(&mut self, count: usize) {
        let last = *self.bounds.last().unwrap_or(&0);
        self.bounds.push(last + count);
    }

    pub fn num_cells(&self) -> usize {
        self.bounds.len().saturating_sub(1)
    }

    pub fn total(&self) -> usize {
        *self.bounds.last().unwrap_or(&0)
    }

    pub fn range(&self, cell: usize) -> std::ops::Range<usize> {
        self.bounds[cell]..self.bounds[cell + 1]
    }

    /// Cell owning flat index `index`, or `None` past the end.
    pub fn cell_of(&self, index: usize) -> Option<usize> {
        if index >= self.total() {
            return None;
        }
        match self.bounds.binary_search(&index) {
            Ok(mut at) => {
                while at + 1 < self.bounds.len() && self.bounds[at + 1] == index {
                    at += 1;
                }
                Some(at)
            }
            Err(at) => Some(at - 1),
        }
    }

    pub fn validate(&self, total: usize) -> Result<(), String> {
        if self.bounds.is_empty() {
            return Err("partition has no bounds".to_string());
        }
        if self.bounds[0] != 0 {
            return Err(format!("partition starts at {}, expected 0", self.bounds[0]));
        }
        for window in self.bounds.windows(2) {
            if let [lo, hi] = window {
                if hi < lo {
                    return Err(format!("partition bound {} precedes {}", hi, lo));
                }
            }
        }
        if self.total() != total {
            return Err(format!(
                "partition ends at {}, expected {}",
                self.total(),
                total
            ));
        }
        Ok(())
    }
}

impl Default for CellPartition {
    fn default() -> Self {
        Self::new()
    }
}
