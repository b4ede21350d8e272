use std::path::PathBuf;

use tracing::warn;

use super::Probe;
use crate::job::Event;

/// Free space as a percentage of total; `None` for a zero-sized filesystem.
pub fn free_percent(available: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(available as f64 / total as f64 * 100.0)
}

/// Polls free space on a mount point and raises an alert while it sits below a threshold.
///
/// Only the low condition produces events; recovering above the threshold is silent.
pub struct DiskProbe {
    mount: PathBuf,
    threshold_percent: f64,
}

impl DiskProbe {
    /// Alert when free space on `mount` is below `threshold_percent`.
    pub fn new(mount: impl Into<PathBuf>, threshold_percent: f64) -> Self {
        Self { mount: mount.into(), threshold_percent }
    }
}

impl Probe for DiskProbe {
    type State = Option<f64>;

    fn name(&self) -> &'static str { "disk" }

    fn observe(&mut self) -> Option<f64> {
        let sizes = fs2::available_space(&self.mount)
            .and_then(|avail| fs2::total_space(&self.mount).map(|total| (avail, total)));
        match sizes {
            Ok((avail, total)) => free_percent(avail, total),
            Err(e) => {
                warn!(mount = %self.mount.display(), error = %e, "disk usage unavailable");
                None
            }
        }
    }

    fn diff(&self, _prev: &Option<f64>, curr: &Option<f64>) -> Vec<Event> {
        match curr {
            Some(pct) if *pct < self.threshold_percent => {
                vec![Event::DiskLow { mount: self.mount.clone(), free_percent: *pct }]
            }
            _ => Vec::new(),
        }
    }
}
