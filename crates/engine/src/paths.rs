//! Output file naming
//!
//! A run writes one file per file group. Ranks are split into contiguous
//! blocks, one block per file:
//!
//! ```text
//! data_path/
//! ├── <prefix>output.sion          # num_files = 1
//! │
//! ├── <prefix>output-0000.sion     # num_files > 1: ranks 0..k
//! ├── <prefix>output-0001.sion     #                ranks k..2k
//! └── ...
//! ```
//!
//! Every unit of a file group computes the same path without communicating.

use crate::config::BackendParameters;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Base name of every output file
pub const DEFAULT_BASE_NAME: &str = "output";

/// The set of ranks sharing one output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileGroup {
    /// Index of this group, `0..count`
    pub index: u32,
    /// Number of file groups of the run
    pub count: u32,
    /// Lowest rank of the group (hosts the metadata writer)
    pub first_rank: u32,
    /// Number of ranks in the group
    pub members: u32,
}

impl FileGroup {
    /// File group of `rank` in a process group of `size` split into
    /// `num_files` files.
    ///
    /// The file count is clamped to `1..=size`. When `size` is not a multiple
    /// of the count, the first groups get one extra rank.
    pub fn for_rank(rank: u32, size: u32, num_files: u32) -> Self {
        let size = size.max(1);
        let count = num_files.clamp(1, size);
        let base = size / count;
        let extra = size % count;
        let large = extra * (base + 1);

        let index = if rank < large {
            rank / (base + 1)
        } else {
            extra + (rank - large) / base
        };
        let index = index.min(count - 1);

        FileGroup {
            index,
            count,
            first_rank: index * base + index.min(extra),
            members: base + u32::from(index < extra),
        }
    }

    /// Ranks belonging to this group.
    pub fn ranks(&self) -> Range<u32> {
        self.first_rank..self.first_rank + self.members
    }

    /// Whether `rank` belongs to this group.
    pub fn contains(&self, rank: u32) -> bool {
        self.ranks().contains(&rank)
    }

    /// Whether the run is split into several files.
    pub fn is_split(&self) -> bool {
        self.count > 1
    }
}

/// Builds output file paths from the backend parameters.
#[derive(Debug, Clone)]
pub struct FilenameBuilder {
    data_path: PathBuf,
    data_prefix: String,
    base_name: String,
    extension: String,
}

impl FilenameBuilder {
    /// Create from parameters, with the default base name.
    pub fn from_params(params: &BackendParameters) -> Self {
        FilenameBuilder {
            data_path: params.data_path.clone(),
            data_prefix: params.data_prefix.clone(),
            base_name: DEFAULT_BASE_NAME.to_string(),
            extension: params.file_ext.clone(),
        }
    }

    /// Replace the base name (builder pattern).
    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = base_name.into();
        self
    }

    /// Output directory.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Path of the file written by `group`.
    pub fn build(&self, group: &FileGroup) -> PathBuf {
        let name = if group.is_split() {
            format!(
                "{}{}-{:04}.{}",
                self.data_prefix, self.base_name, group.index, self.extension
            )
        } else {
            format!("{}{}.{}", self.data_prefix, self.base_name, self.extension)
        };
        self.data_path.join(name)
    }
}
