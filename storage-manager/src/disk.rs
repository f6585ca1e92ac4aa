use std::path::Path;

use serde::Serialize;

use crate::error::StorageError;

/// Filesystem-level usage for the volume holding the recordings tree
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_fraction: f64,
}

impl DiskUsage {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }

    pub fn free_gb(&self) -> f64 {
        self.free_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Query usage of the filesystem containing `path`
pub fn usage(path: &Path) -> Result<DiskUsage, StorageError> {
    use nix::sys::statvfs::statvfs;

    let stat = statvfs(path).map_err(|e| StorageError::StatvfsFailed(e.to_string()))?;

    let block_size = stat.fragment_size() as u64;
    let total_bytes = stat.blocks() as u64 * block_size;
    let free_bytes = stat.blocks_available() as u64 * block_size;

    if total_bytes == 0 {
        return Err(StorageError::InvalidFilesystem);
    }

    Ok(DiskUsage {
        total_bytes,
        free_bytes,
        used_fraction: (total_bytes - free_bytes) as f64 / total_bytes as f64,
    })
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1}TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500B");
        assert_eq!(format_bytes(1024), "1.0KB");
        assert_eq!(format_bytes(1536), "1.5KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.0GB");
    }

    #[test]
    fn test_usage() {
        let u = usage(Path::new("/tmp")).unwrap();
        assert!(u.total_bytes > 0);
        assert!((0.0..=1.0).contains(&u.used_fraction));
    }
}
