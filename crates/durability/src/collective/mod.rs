//! Collective I/O capability.
//!
//! The coordinator never touches the shared file directly. Every byte goes
//! through a [`CollectiveIo`] implementation:
//!
//! - `traits`: the capability trait, open requests and errors
//! - `shared_file`: shared-file implementation for all units living in one
//!   OS process (threads and simulated ranks)
//! - `memory`: in-memory fake with call logging and fault injection

pub mod memory;
pub mod shared_file;
pub mod traits;

pub use memory::{FaultPoint, MemoryBlock, MemoryCollective, MemoryFile};
pub use shared_file::SharedFileIo;
pub use traits::{CollectiveIo, CollectiveIoError, OpenRequest, SessionId};
