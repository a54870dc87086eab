//! Remote endpoint layer
//!
//! The transfer side of remote file access. A [`RemoteEndpoint`] is one
//! session against a server authority and offers the namespace operations
//! (stat, dirlist, mkdir, rm, locate, prepare, query). Opening a file yields a
//! [`RemoteFileIo`] carrying the data operations for that file.
//!
//! Two implementations ship with the crate:
//! - [`memory::MemoryEndpoint`]: an in-process server model
//! - [`object::ObjectStoreEndpoint`]: object storage through `object_store`

use async_trait::async_trait;
use bytes::Bytes;
use common::{Error, OpenMode, RemoteUrl, Result};
use std::ops::Range;

pub mod config;
pub mod memory;
pub mod object;
mod types;

pub use config::{EndpointConfig, StoreConfig};
pub use types::*;

/// Namespace operations against one server authority.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    /// `host:port` of the server this endpoint talks to.
    fn address(&self) -> &str;

    /// Open a file.
    async fn open(&self, url: &RemoteUrl, mode: OpenMode) -> Result<Box<dyn RemoteFileIo>>;

    /// Stat a path.
    async fn stat(&self, path: &str) -> Result<StatInfo>;

    /// List a directory, in server order.
    async fn dir_list(&self, path: &str) -> Result<Vec<DirEntry>>;

    /// Create a directory, with its parents when `make_path` is set.
    async fn mkdir(&self, path: &str, make_path: bool) -> Result<()>;

    /// Remove a file.
    async fn rm(&self, path: &str) -> Result<()>;

    /// Remove an empty directory.
    async fn rmdir(&self, path: &str) -> Result<()>;

    /// Resolve the servers holding a path.
    async fn locate(&self, path: &str) -> Result<Vec<Location>>;

    /// Ask the server to bring paths online.
    async fn prepare(&self, paths: &[String], flags: PrepareFlags, priority: u8) -> Result<()>;

    /// Server query; the reply is raw text.
    async fn query(&self, code: QueryCode, arg: &str) -> Result<Bytes>;

    /// Protocol version and server role.
    async fn protocol(&self) -> Result<ProtocolInfo>;
}

/// Data operations on one open file.
#[async_trait]
pub trait RemoteFileIo: Send + Sync {
    fn is_open(&self) -> bool;

    async fn stat(&self) -> Result<StatInfo>;

    /// Read into `buf` starting at `offset`; returns the bytes transferred.
    async fn read(&self, offset: u64, buf: &mut [u8]) -> Result<u32>;

    /// Read every chunk and place them back to back in `buf`, in request order.
    async fn vector_read(&self, chunks: &[ChunkRequest], buf: &mut [u8]) -> Result<VectorReadInfo>;

    async fn write(&self, offset: u64, data: &[u8]) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Largest file the backends that buffer whole files will hold.
pub(crate) const MAX_IN_MEMORY_SIZE: u64 = 1 << 30;

/// Buffer range written by `len` bytes at `offset`, refused when it would go
/// past [`MAX_IN_MEMORY_SIZE`].
pub(crate) fn memory_span(path: &str, offset: u64, len: usize) -> Result<Range<usize>> {
    let end = u64::try_from(len)
        .ok()
        .and_then(|len| offset.checked_add(len));
    match end {
        Some(end) if end <= MAX_IN_MEMORY_SIZE => Ok(offset as usize..end as usize),
        _ => Err(Error::InvalidArgument(format!(
            "{} bytes at offset {} of {} go past the {} byte limit",
            len, offset, path, MAX_IN_MEMORY_SIZE
        ))),
    }
}
