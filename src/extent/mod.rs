//! Backing Extent Module
//!
//! Provisions the raw storage behind each block. The allocator only needs a
//! stable name for an extent of the requested size; what the name points at
//! is up to the provisioner.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{BlockTableError, Result};

/// Creates backing extents for new blocks
pub trait ExtentProvisioner: Send + Sync {
    /// Provision an empty extent of `size` bytes for block `id`, returning its name
    fn provision(&self, id: u64, size: u64) -> Result<String>;
}

/// One sparse file per block inside a directory
///
/// "blocks/000042.blk" holds block 42.
#[derive(Debug, Clone)]
pub struct DirExtents {
    dir: PathBuf,
}

impl DirExtents {
    /// Use `dir` for extents, creating it if needed
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Path of the extent for block `id`
    pub fn extent_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{:06}.blk", id))
    }
}

impl ExtentProvisioner for DirExtents {
    fn provision(&self, id: u64, size: u64) -> Result<String> {
        let path = self.extent_path(id);
        let wrap = |source| BlockTableError::ExtentProvision { id, source };

        // A file already at this path is left over from an aborted transaction
        // whose block id was rolled back; it is reclaimed.
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(wrap)?;
        file.set_len(size).map_err(wrap)?;
        file.sync_all().map_err(wrap)?;

        Ok(path.to_string_lossy().into_owned())
    }
}
