//! Recording engine for sionrec
//!
//! This crate orchestrates the lower layers into a recording run:
//! - Coordinator: process-wide run lifecycle (initialize, status, finalize)
//! - Unit recorder: per-thread enroll/write/synchronize hot path
//! - Device registry and file session of each execution unit
//! - Configuration (`sionrec.toml`) and output file naming
//!
//! The engine is the only component that knows about:
//! - Run state and its transitions
//! - Which unit writes the metadata header of each file
//! - Mapping durability-layer failures onto the public error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod paths;
pub mod registry;
pub mod session;
pub mod unit;

pub use config::{BackendParameters, ConfigError, ParameterUpdate, CONFIG_FILE_NAME};
pub use coordinator::{BackendStatus, RecordingCoordinator, RunContext};
pub use paths::{FileGroup, FilenameBuilder, DEFAULT_BASE_NAME};
pub use registry::{DeviceRegistry, Enrollment};
pub use session::{FileSession, FlushStats};
pub use unit::{UnitRecorder, UnitSummary};
