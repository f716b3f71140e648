//! Size-bracketed migration strategy selection
//!
//! Brackets are half-open and boundaries go to the upper bracket:
//!
//! | size (GB)            | strategy              |
//! |----------------------|-----------------------|
//! | `< gcs`              | [`MigrationStrategy::GcsImport`] |
//! | `gcs <= size < dms`  | [`MigrationStrategy::GcpDms`] |
//! | `>= dms`, or NaN     | [`MigrationStrategy::MydumperMyloader`] |

use crate::error::{ConfigError, StrategyError};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Data-movement strategy, ordered from lightest to heaviest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStrategy {
    /// Per-table logical dump through object storage
    GcsImport,
    /// Managed database migration service
    GcpDms,
    /// Parallel bulk dump and load
    MydumperMyloader,
}

impl MigrationStrategy {
    /// Human-readable name
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::GcsImport => "GCS Import",
            Self::GcpDms => "GCP DMS",
            Self::MydumperMyloader => "Mydumper/Myloader",
        }
    }
}

impl std::fmt::Display for MigrationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::GcsImport => "GCS_IMPORT",
            Self::GcpDms => "GCP_DMS",
            Self::MydumperMyloader => "MYDUMPER_MYLOADER",
        };
        f.write_str(text)
    }
}

/// Bracket boundaries in GB
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Upper bound of the GCS import bracket
    pub gcs_import_threshold_gb: f64,
    /// Upper bound of the DMS bracket
    pub dms_threshold_gb: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            gcs_import_threshold_gb: 100.0,
            dms_threshold_gb: 500.0,
        }
    }
}

impl Thresholds {
    /// Create a pair
    #[inline]
    #[must_use]
    pub const fn new(gcs_import_threshold_gb: f64, dms_threshold_gb: f64) -> Self {
        Self {
            gcs_import_threshold_gb,
            dms_threshold_gb,
        }
    }

    /// Both finite and strictly ordered
    ///
    /// # Errors
    /// [`ConfigError::InvalidThresholds`] otherwise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (gcs, dms) = (self.gcs_import_threshold_gb, self.dms_threshold_gb);
        if gcs.is_finite() && dms.is_finite() && gcs < dms {
            Ok(())
        } else {
            Err(ConfigError::InvalidThresholds { gcs, dms })
        }
    }
}

/// Maps a database size to a strategy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategySelector {
    thresholds: Thresholds,
}

impl StrategySelector {
    /// Selector over validated thresholds
    ///
    /// # Errors
    /// [`ConfigError::InvalidThresholds`] for unusable thresholds.
    pub fn new(thresholds: Thresholds) -> Result<Self, ConfigError> {
        thresholds.validate()?;
        Ok(Self { thresholds })
    }

    /// One-shot selection
    ///
    /// # Errors
    /// [`ConfigError::InvalidThresholds`] for unusable thresholds.
    pub fn select(
        size_gb: f64,
        gcs_threshold: f64,
        dms_threshold: f64,
    ) -> Result<MigrationStrategy, ConfigError> {
        Ok(Self::new(Thresholds::new(gcs_threshold, dms_threshold))?.choose(size_gb))
    }

    /// Strategy for a size under the configured thresholds
    #[must_use]
    pub fn choose(&self, size_gb: f64) -> MigrationStrategy {
        let strategy = if size_gb < self.thresholds.gcs_import_threshold_gb {
            MigrationStrategy::GcsImport
        } else if size_gb < self.thresholds.dms_threshold_gb {
            MigrationStrategy::GcpDms
        } else {
            // also reached for NaN
            MigrationStrategy::MydumperMyloader
        };
        tracing::debug!(size_gb, %strategy, "strategy selected");
        strategy
    }

    /// Configured thresholds
    #[inline]
    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }
}

/// Write-once holder of the strategy chosen for a run
#[derive(Debug, Default)]
pub struct StrategyLock(OnceCell<MigrationStrategy>);

impl StrategyLock {
    /// Unlocked
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the strategy; locking the same strategy again is a no-op
    ///
    /// # Errors
    /// [`StrategyError::AlreadyLocked`] when a different one is locked.
    pub fn lock(&self, strategy: MigrationStrategy) -> Result<MigrationStrategy, StrategyError> {
        let locked = *self.0.get_or_init(|| {
            tracing::info!(%strategy, "migration strategy locked");
            strategy
        });
        if locked == strategy {
            Ok(locked)
        } else {
            Err(StrategyError::AlreadyLocked {
                locked,
                requested: strategy,
            })
        }
    }

    /// Locked strategy, if any
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<MigrationStrategy> {
        self.0.get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn boundaries_go_up() {
        let s = StrategySelector::new(Thresholds::default()).unwrap();
        assert_eq!(s.choose(0.0), MigrationStrategy::GcsImport);
        assert_eq!(s.choose(99.999), MigrationStrategy::GcsImport);
        assert_eq!(s.choose(100.0), MigrationStrategy::GcpDms);
        assert_eq!(s.choose(499.9), MigrationStrategy::GcpDms);
        assert_eq!(s.choose(500.0), MigrationStrategy::MydumperMyloader);
    }

    #[test]
    fn nan_size_is_heaviest() {
        assert_eq!(
            StrategySelector::select(f64::NAN, 100.0, 500.0).unwrap(),
            MigrationStrategy::MydumperMyloader
        );
    }

    #[test]
    fn invalid_thresholds() {
        assert!(matches!(
            StrategySelector::select(10.0, 500.0, 100.0),
            Err(ConfigError::InvalidThresholds { .. })
        ));
        assert!(StrategySelector::select(10.0, 100.0, 100.0).is_err());
        assert!(StrategySelector::select(10.0, f64::NAN, 100.0).is_err());
        assert!(StrategySelector::select(10.0, 1.0, f64::INFINITY).is_err());
    }

    #[test]
    fn lock_is_write_once() {
        let lock = StrategyLock::new();
        assert_eq!(lock.get(), None);
        assert_eq!(lock.lock(MigrationStrategy::GcpDms), Ok(MigrationStrategy::GcpDms));
        assert_eq!(lock.lock(MigrationStrategy::GcpDms), Ok(MigrationStrategy::GcpDms));
        assert!(lock.lock(MigrationStrategy::GcsImport).is_err());
        assert_eq!(lock.get(), Some(MigrationStrategy::GcpDms));
    }

    proptest! {
        #[test]
        fn prop_monotonic_in_size(a in 0.0..2000.0f64, b in 0.0..2000.0f64) {
            let s = StrategySelector::new(Thresholds::default()).unwrap();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(s.choose(lo) <= s.choose(hi));
        }

        #[test]
        fn prop_brackets_match_thresholds(
            gcs in 1.0..1000.0f64,
            gap in 0.001..1000.0f64,
            size in 0.0..3000.0f64,
        ) {
            let dms = gcs + gap;
            let chosen = StrategySelector::select(size, gcs, dms).unwrap();
            let expected = if size < gcs {
                MigrationStrategy::GcsImport
            } else if size < dms {
                MigrationStrategy::GcpDms
            } else {
                MigrationStrategy::MydumperMyloader
            };
            prop_assert_eq!(chosen, expected);
        }
    }
}
