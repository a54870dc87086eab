//! Response and request shapes exchanged with a remote endpoint.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Flags attached to a stat response.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatFlags: u32 {
        const X_BIT_SET = 1;
        const IS_DIR = 2;
        const OTHER = 4;
        const OFFLINE = 8;
        const READABLE = 16;
        const WRITABLE = 32;
        const POSC_PENDING = 64;
        const BACKUP_EXISTS = 128;
    }
}

/// Raw stat response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatInfo {
    /// Opaque identifier; a decimal 64-bit integer on conforming servers.
    pub id: String,
    pub size: u64,
    pub flags: StatFlags,
    /// Seconds since the Unix epoch.
    pub mod_time: u64,
}

impl StatInfo {
    pub fn is_dir(&self) -> bool {
        self.flags.contains(StatFlags::IS_DIR)
    }

    pub fn is_offline(&self) -> bool {
        self.flags.contains(StatFlags::OFFLINE)
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Server that reported the entry.
    pub host_address: String,
    pub name: String,
    pub stat: Option<StatInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    ManagerOnline,
    ManagerPending,
    ServerOnline,
    ServerPending,
}

/// A server holding (or able to serve) a located file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// `host:port`
    pub address: String,
    pub kind: LocationKind,
}

/// One segment of a vector read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    pub offset: u64,
    pub length: u32,
}

impl ChunkRequest {
    pub fn new(offset: u64, length: u32) -> Self {
        Self { offset, length }
    }
}

/// Result of a vector read: the bytes actually transferred and the chunks
/// as the server served them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VectorReadInfo {
    pub size: u64,
    pub chunks: Vec<ChunkRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCode {
    Config,
    Space,
    Stats,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PrepareFlags: u8 {
        const CANCEL = 1;
        const NOTIFY = 2;
        const NO_ERRORS = 4;
        const STAGE = 8;
        const WRITE_MODE = 16;
        const COLOCATE = 32;
        const FRESH = 64;
    }
}

/// Role a server announces in its protocol response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostRole {
    /// Terminal server that holds the data itself.
    #[default]
    DataServer,
    Manager,
    Supervisor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub version: u32,
    pub role: HostRole,
}

/// Protocol version reported by the bundled endpoints.
pub const PROTOCOL_VERSION: u32 = 0x0000_0500;
