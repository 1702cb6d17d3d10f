//! Recording Integration Tests
//!
//! Drive the full pipeline (coordinator, unit recorders, shared-file I/O)
//! and read the produced files back.

#[path = "../common/mod.rs"]
mod common;

mod concurrency;
mod end_to_end;
mod lifecycle;
mod multi_process;
