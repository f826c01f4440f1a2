//! Configuration for blocktable
//!
//! Centralized configuration with sensible defaults. The only setting an
//! operator must supply is the metadata store path; everything else is
//! derived or defaulted.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{BlockTableError, Result};

/// Default capacity of a block's backing extent (128 MiB)
pub const DEFAULT_BLOCK_SIZE: u64 = 128 * 1024 * 1024;

/// Default size of a page (4 KiB)
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Default number of encode buffers kept for reuse
pub const DEFAULT_BUFFER_POOL_CAPACITY: usize = 64;

/// Block and page geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Capacity in bytes of every newly provisioned block
    pub block_size: u64,

    /// Size in bytes of one page (and so of one block slot)
    pub page_size: u64,
}

impl Layout {
    pub const fn new(block_size: u64, page_size: u64) -> Self {
        Self {
            block_size,
            page_size,
        }
    }

    /// Number of page slots a block of `block_size` bytes holds
    pub fn slots_per_block(&self) -> u64 {
        self.block_size.checked_div(self.page_size).unwrap_or(0)
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE, DEFAULT_PAGE_SIZE)
    }
}

/// Main configuration for a blocktable instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Path of the metadata store file (blocks, pages, files collections)
    pub metadata_path: PathBuf,

    /// Directory holding one backing extent per block
    pub block_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Allocation Configuration
    // -------------------------------------------------------------------------
    /// Block and page sizes
    pub layout: Layout,

    /// Max number of idle encode buffers retained by the codec
    pub buffer_pool_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::from("./blocktable_data/meta.redb"),
            block_dir: PathBuf::from("./blocktable_data/blocks"),
            layout: Layout::default(),
            buffer_pool_capacity: DEFAULT_BUFFER_POOL_CAPACITY,
        }
    }
}

/// On-disk config file shape
///
/// ```toml
/// db = "/var/lib/blocktable/meta.redb"
/// block_dir = "/var/lib/blocktable/blocks"   # optional
/// block_size = 134217728                     # optional
/// page_size = 4096                           # optional
/// ```
#[derive(Debug, Deserialize)]
struct ConfigFile {
    db: PathBuf,
    block_dir: Option<PathBuf>,
    block_size: Option<u64>,
    page_size: Option<u64>,
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            BlockTableError::Config(format!("read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(text).map_err(|e| BlockTableError::Config(format!("parse: {}", e)))?;

        let mut builder = Config::builder().metadata_path(&file.db);
        if let Some(dir) = file.block_dir {
            builder = builder.block_dir(dir);
        }
        let defaults = Layout::default();
        builder = builder.layout(Layout::new(
            file.block_size.unwrap_or(defaults.block_size),
            file.page_size.unwrap_or(defaults.page_size),
        ));

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }

    /// Reject geometries that cannot hold a single page per block
    pub fn validate(&self) -> Result<()> {
        if self.layout.page_size == 0 {
            return Err(BlockTableError::Config("page_size must be non-zero".to_string()));
        }
        if self.layout.page_size > self.layout.block_size {
            return Err(BlockTableError::Config(format!(
                "page_size {} exceeds block_size {}",
                self.layout.page_size, self.layout.block_size
            )));
        }
        if self.metadata_path.as_os_str().is_empty() {
            return Err(BlockTableError::Config("metadata path is empty".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
    block_dir_set: bool,
}

impl ConfigBuilder {
    /// Set the metadata store path
    ///
    /// Unless `block_dir` is set explicitly, blocks live in a `blocks/`
    /// directory next to the metadata file.
    pub fn metadata_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.metadata_path = path.into();
        self
    }

    /// Set the backing extent directory
    pub fn block_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.block_dir = path.into();
        self.block_dir_set = true;
        self
    }

    /// Set block and page sizes
    pub fn layout(mut self, layout: Layout) -> Self {
        self.config.layout = layout;
        self
    }

    /// Set the block size (in bytes)
    pub fn block_size(mut self, size: u64) -> Self {
        self.config.layout.block_size = size;
        self
    }

    /// Set the page size (in bytes)
    pub fn page_size(mut self, size: u64) -> Self {
        self.config.layout.page_size = size;
        self
    }

    /// Set how many idle encode buffers are retained
    pub fn buffer_pool_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_pool_capacity = capacity;
        self
    }

    pub fn build(mut self) -> Config {
        if !self.block_dir_set {
            let parent = self
                .config
                .metadata_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            self.config.block_dir = parent.join("blocks");
        }
        self.config
    }
}
