//! # Configuration Module
//!
//! Centralizes the configuration constants and the per-build settings handed
//! to the tree builder. Interdependent constants live together in
//! [`constants`] with their relationships documented and checked at compile
//! time.

pub mod constants;
pub use constants::*;

use eyre::{ensure, Result};

/// Free bytes on an empty page of the given header shape.
pub fn empty_capacity(compact: bool) -> usize {
    if compact {
        EMPTY_CAPACITY_COMPACT
    } else {
        EMPTY_CAPACITY_REDUNDANT
    }
}

/// Per-build settings. Passed to `TreeBuilder::new`; there are no process
/// globals.
#[derive(Debug, Clone, Copy)]
pub struct BuildConfig {
    /// Percent of each page's empty capacity the loader fills, 10..=100.
    /// 100 on a clustered index switches to the fixed space reserve.
    pub fill_factor: u8,
    /// Passed through to the page compressor for compressed indexes.
    pub compression_level: i32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            fill_factor: FILL_FACTOR_MAX,
            compression_level: 3,
        }
    }
}

impl BuildConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (FILL_FACTOR_MIN..=FILL_FACTOR_MAX).contains(&self.fill_factor),
            "fill factor {} outside {}..={}",
            self.fill_factor,
            FILL_FACTOR_MIN,
            FILL_FACTOR_MAX
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        BuildConfig::default().validate().unwrap();
    }

    #[test]
    fn fill_factor_bounds_enforced() {
        let low = BuildConfig {
            fill_factor: 9,
            ..Default::default()
        };
        assert!(low.validate().is_err());

        let high = BuildConfig {
            fill_factor: 101,
            ..Default::default()
        };
        assert!(high.validate().is_err());

        let ok = BuildConfig {
            fill_factor: 50,
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }
}
