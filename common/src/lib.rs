//! Common infrastructure for the Strata dataset layer.
//!
//! This crate provides the error type shared by all crates and the
//! filesystem capability that dataset discovery and scanning read through.

pub mod error;
pub mod filesystem;

pub use error::{CommonError, ErrorContext, Result};
pub use filesystem::{
    BufferFile, FileInfo, FileSystem, FileSystemBackend, FileSystemBuilder, FileSystemConfig,
    FileSystemStats, ObjectStoreFileSystem, ReadableFile,
};
