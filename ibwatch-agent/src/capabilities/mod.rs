//! Hardware and driver detection for the InfiniBand check
//!
//! - InfiniBand class devices (`/sys/class/infiniband`)
//! - NVIDIA kernel driver (`/proc/driver/nvidia`)
//! - At least one GPU known to the driver (`/proc/driver/nvidia/gpus`)

use ibwatch_check::Instrumentation;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Looks for the devices under a filesystem root (`/` on a real node).
pub struct SysfsInstrumentation {
    root: PathBuf,
    require_nvidia: bool,
}

impl SysfsInstrumentation {
    pub fn new(require_nvidia: bool) -> Self {
        Self::with_root("/", require_nvidia)
    }

    pub fn with_root<P: Into<PathBuf>>(root: P, require_nvidia: bool) -> Self {
        Self {
            root: root.into(),
            require_nvidia,
        }
    }

    fn has_entries(path: &Path) -> bool {
        match fs::read_dir(path) {
            Ok(mut entries) => entries.next().is_some(),
            Err(_) => false,
        }
    }
}

impl Instrumentation for SysfsInstrumentation {
    fn missing_reason(&self) -> Option<String> {
        let ib_class = self.root.join("sys/class/infiniband");
        if !Self::has_entries(&ib_class) {
            debug!(path = %ib_class.display(), "no infiniband class devices");
            return Some("no infiniband class devices found".to_string());
        }

        if !self.require_nvidia {
            return None;
        }

        let driver = self.root.join("proc/driver/nvidia");
        if !driver.is_dir() {
            return Some("NVIDIA driver is not loaded".to_string());
        }
        if !Self::has_entries(&driver.join("gpus")) {
            return Some("NVIDIA driver is loaded but no GPU is detected".to_string());
        }
        None
    }
}
