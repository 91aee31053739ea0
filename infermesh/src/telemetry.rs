//! Host disk information

use std::path::Path;

use sysinfo::Disks;

/// Free bytes on the disk holding `path`.
///
/// Picks the mounted disk with the longest mount point that prefixes the
/// canonical path. `None` when no disk matches, e.g. inside some sandboxes.
pub fn available_space(path: &Path) -> Option<u64> {
    let canonical = std::fs::canonicalize(path).ok()?;
    let disks = Disks::new_with_refreshed_list();

    disks
        .iter()
        .filter(|disk| canonical.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}
