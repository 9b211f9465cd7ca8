//! System resource gauges.

use std::path::{Path, PathBuf};

use sysinfo::Disks;

use crate::traits::ResourceGauge;

/// Reads disk usage of the volume holding `path` via `sysinfo`.
#[derive(Debug, Clone)]
pub struct SystemResourceGauge {
    path: PathBuf,
}

impl SystemResourceGauge {
    /// Measure the volume that contains `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for SystemResourceGauge {
    fn default() -> Self {
        Self::new(".")
    }
}

impl ResourceGauge for SystemResourceGauge {
    fn disk_usage_percent(&self) -> Result<f64, String> {
        let target = std::fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        let disks = Disks::new_with_refreshed_list();
        let volumes = disks
            .list()
            .iter()
            .map(|d| (d.mount_point(), d.total_space(), d.available_space()));
        usage_for(&target, volumes)
            .ok_or_else(|| format!("no mounted volume contains {}", target.display()))
    }
}

/// Usage of the deepest mount point containing `target`.
#[allow(clippy::cast_precision_loss)]
fn usage_for<'a>(
    target: &Path,
    volumes: impl Iterator<Item = (&'a Path, u64, u64)>,
) -> Option<f64> {
    let (_, total, available) = volumes
        .filter(|(mount, total, _)| *total > 0 && target.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.components().count())?;
    let used = total.saturating_sub(available);
    Some(used as f64 / total as f64 * 100.0)
}
