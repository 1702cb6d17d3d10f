//! Backend configuration via `sionrec.toml`
//!
//! Parameters can come from three places: the built-in defaults, a
//! `sionrec.toml` file, and partial updates pushed through the coordinator's
//! status interface. Every source goes through [`BackendParameters::validate`]
//! before it takes effect.

use serde::{Deserialize, Serialize};
use sionrec_core::RecordingError;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name placed next to the recording output.
pub const CONFIG_FILE_NAME: &str = "sionrec.toml";

const SEPARATORS: &[char] = &['/', '\\'];

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A parameter value is out of range
    #[error("Invalid parameter '{field}': {reason}")]
    Invalid {
        /// Offending parameter
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// Config file could not be read or written
    #[error("Failed to access config file '{}': {source}", path.display())]
    File {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config text is not valid TOML for this schema
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// Config could not be serialized
    #[error("Failed to serialize config: {0}")]
    Serialize(String),
}

impl From<ConfigError> for RecordingError {
    fn from(e: ConfigError) -> Self {
        RecordingError::Configuration(e.to_string())
    }
}

/// Recording backend parameters.
///
/// # Example
///
/// ```toml
/// file_ext = "sion"
/// buffer_size = 1024
/// chunk_size = 262144
/// collective = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendParameters {
    /// Output file extension, without the leading dot
    pub file_ext: String,
    /// Initial capacity of each unit's buffer, in bytes
    pub buffer_size: usize,
    /// Write buffer size hint for the collective I/O layer, in bytes
    pub chunk_size: u64,
    /// Collective mode: every synchronize is a rendezvous of all units
    pub collective: bool,
    /// Directory receiving the output files, empty for the working directory
    pub data_path: PathBuf,
    /// Prefix prepended to every output file name
    pub data_prefix: String,
    /// Number of output files the process group is split into
    pub num_files: u32,
    /// Upper bound on waiting at a collective call, in milliseconds
    pub rendezvous_timeout_ms: u64,
}

impl Default for BackendParameters {
    fn default() -> Self {
        Self {
            file_ext: "sion".to_string(),
            buffer_size: 1024,
            chunk_size: 262_144,
            collective: false,
            data_path: PathBuf::new(),
            data_prefix: String::new(),
            num_files: 1,
            rendezvous_timeout_ms: 60_000,
        }
    }
}

impl BackendParameters {
    /// Check every parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file_ext.is_empty() {
            return Err(invalid("file_ext", "must not be empty"));
        }
        if self.file_ext.starts_with('.') {
            return Err(invalid("file_ext", "must not start with a dot"));
        }
        if self.file_ext.contains(SEPARATORS) {
            return Err(invalid("file_ext", "must not contain a path separator"));
        }
        if self.data_prefix.contains(SEPARATORS) {
            return Err(invalid("data_prefix", "must not contain a path separator"));
        }
        if self.buffer_size == 0 {
            return Err(invalid("buffer_size", "must be positive"));
        }
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size", "must be positive"));
        }
        if self.num_files == 0 {
            return Err(invalid("num_files", "must be at least 1"));
        }
        if self.rendezvous_timeout_ms == 0 {
            return Err(invalid("rendezvous_timeout_ms", "must be positive"));
        }
        Ok(())
    }

    /// Rendezvous timeout as a duration.
    pub fn rendezvous_timeout(&self) -> Duration {
        Duration::from_millis(self.rendezvous_timeout_ms)
    }

    /// Apply a partial update.
    ///
    /// The update is all-or-nothing: if the result does not validate, `self`
    /// is left untouched.
    pub fn apply(&mut self, update: &ParameterUpdate) -> Result<(), ConfigError> {
        let mut next = self.clone();
        if let Some(v) = &update.file_ext {
            next.file_ext = v.clone();
        }
        if let Some(v) = update.buffer_size {
            next.buffer_size = v;
        }
        if let Some(v) = update.chunk_size {
            next.chunk_size = v;
        }
        if let Some(v) = update.collective {
            next.collective = v;
        }
        if let Some(v) = &update.data_path {
            next.data_path = v.clone();
        }
        if let Some(v) = &update.data_prefix {
            next.data_prefix = v.clone();
        }
        if let Some(v) = update.num_files {
            next.num_files = v;
        }
        if let Some(v) = update.rendezvous_timeout_ms {
            next.rendezvous_timeout_ms = v;
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# sionrec recording backend configuration
#
# Output file extension, without the leading dot (default: "sion")
file_ext = "sion"

# Initial size of each thread's record buffer in bytes (default: 1024).
# The buffer grows on demand; a larger value avoids early reallocations.
buffer_size = 1024

# Write buffer size hint for the shared file in bytes (default: 262144)
chunk_size = 262144

# Collective mode (default: false)
#   false = each thread flushes independently
#   true  = every synchronize is a rendezvous of all threads and processes
collective = false

# Output directory and file name prefix (default: working directory, none)
data_path = ""
data_prefix = ""

# Number of output files the processes are split into (default: 1)
num_files = 1

# Upper bound on waiting at a collective call in milliseconds (default: 60000)
rendezvous_timeout_ms = 60000
"#
    }

    /// Parse parameters from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let params: BackendParameters =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Read and parse parameters from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::File {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|source| ConfigError::File {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    /// Serialize these parameters to TOML and write them to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|source| ConfigError::File {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

/// Partial parameter update.
///
/// Absent keys keep their current value; unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParameterUpdate {
    /// New file extension
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_ext: Option<String>,
    /// New buffer size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,
    /// New chunk size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    /// New collective flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collective: Option<bool>,
    /// New output directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_path: Option<PathBuf>,
    /// New file name prefix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_prefix: Option<String>,
    /// New file count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_files: Option<u32>,
    /// New rendezvous timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendezvous_timeout_ms: Option<u64>,
}

impl ParameterUpdate {
    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == ParameterUpdate::default()
    }

    /// Parse an update from JSON text.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
