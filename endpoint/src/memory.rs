//! In-process endpoint.
//!
//! Keeps a whole namespace in memory and answers every endpoint operation the
//! way a single data server would. Used by tests and by callers that want a
//! scratch namespace without a server.

use crate::{
    ChunkRequest, DirEntry, HostRole, Location, LocationKind, PrepareFlags, ProtocolInfo,
    QueryCode, RemoteEndpoint, RemoteFileIo, StatFlags, StatInfo, VectorReadInfo,
    PROTOCOL_VERSION,
};
use async_trait::async_trait;
use bytes::Bytes;
use common::{ancestors, file_name, normalize_path, parent_path, Error, OpenMode, RemoteUrl, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
enum NodeKind {
    File(Vec<u8>),
    Dir,
}

#[derive(Debug, Clone)]
struct Node {
    id: u64,
    kind: NodeKind,
    extra_flags: StatFlags,
    mod_time: u64,
}

impl Node {
    fn stat(&self) -> StatInfo {
        let (size, mut flags) = match &self.kind {
            NodeKind::File(data) => (data.len() as u64, StatFlags::READABLE | StatFlags::WRITABLE),
            NodeKind::Dir => (0, StatFlags::IS_DIR | StatFlags::READABLE | StatFlags::WRITABLE),
        };
        flags |= self.extra_flags;
        StatInfo {
            id: self.id.to_string(),
            size,
            flags,
            mod_time: self.mod_time,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir)
    }
}

/// A prepare request as the endpoint received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRequest {
    pub paths: Vec<String>,
    pub flags: PrepareFlags,
    pub priority: u8,
}

struct MemoryState {
    nodes: BTreeMap<String, Node>,
    locations: HashMap<String, Vec<Location>>,
    prepared: Vec<PrepareRequest>,
    next_id: u64,
}

impl MemoryState {
    fn new() -> Self {
        let mut state = Self {
            nodes: BTreeMap::new(),
            locations: HashMap::new(),
            prepared: Vec::new(),
            // Device 1, inode 1 for the root.
            next_id: (1 << 32) | 1,
        };
        state.insert("/".to_string(), NodeKind::Dir);
        state
    }

    fn insert(&mut self, path: String, kind: NodeKind) {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(
            path,
            Node {
                id,
                kind,
                extra_flags: StatFlags::empty(),
                mod_time: now(),
            },
        );
    }

    fn ensure_parents(&mut self, path: &str) -> Result<()> {
        for dir in ancestors(path)? {
            match self.nodes.get(&dir) {
                Some(node) if node.is_dir() => {}
                Some(_) => return Err(Error::NotADirectory(dir)),
                None => self.insert(dir, NodeKind::Dir),
            }
        }
        Ok(())
    }

    fn file(&self, path: &str) -> Result<&Node> {
        match self.nodes.get(path) {
            Some(node) if node.is_dir() => Err(Error::NotAFile(path.to_string())),
            Some(node) => Ok(node),
            None => Err(Error::PathNotFound(path.to_string())),
        }
    }

    fn has_children(&self, path: &str) -> bool {
        self.nodes
            .keys()
            .any(|p| p != path && parent_path(p).as_deref() == Some(path))
    }
}

fn now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// In-memory data server.
pub struct MemoryEndpoint {
    address: String,
    role: HostRole,
    readv_ior_max: Option<u32>,
    state: Arc<RwLock<MemoryState>>,
    calls: Arc<AtomicU64>,
}

impl MemoryEndpoint {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            role: HostRole::DataServer,
            readv_ior_max: Some(2_097_136),
            state: Arc::new(RwLock::new(MemoryState::new())),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_role(mut self, role: HostRole) -> Self {
        self.role = role;
        self
    }

    /// `None` makes the `readv_ior_max` config query fail.
    pub fn with_readv_ior_max(mut self, max: Option<u32>) -> Self {
        self.readv_ior_max = max;
        self
    }

    /// Number of endpoint and file operations served so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Create or replace a file, creating parent directories as needed.
    pub async fn put_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = normalize_path(path)?;
        let mut state = self.state.write().await;
        state.ensure_parents(&path)?;
        match state.nodes.get_mut(&path) {
            Some(node) if node.is_dir() => return Err(Error::NotAFile(path)),
            Some(node) => {
                node.kind = NodeKind::File(data.to_vec());
                node.mod_time = now();
            }
            None => state.insert(path, NodeKind::File(data.to_vec())),
        }
        Ok(())
    }

    pub async fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        let path = normalize_path(path).ok()?;
        let state = self.state.read().await;
        match &state.nodes.get(&path)?.kind {
            NodeKind::File(data) => Some(data.clone()),
            NodeKind::Dir => None,
        }
    }

    /// Mark a path as migrated to (or restored from) offline storage.
    pub async fn set_offline(&self, path: &str, offline: bool) -> Result<()> {
        self.update_flags(path, StatFlags::OFFLINE, offline).await
    }

    pub async fn set_executable(&self, path: &str, executable: bool) -> Result<()> {
        self.update_flags(path, StatFlags::X_BIT_SET, executable).await
    }

    async fn update_flags(&self, path: &str, flag: StatFlags, on: bool) -> Result<()> {
        let path = normalize_path(path)?;
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(&path)
            .ok_or_else(|| Error::PathNotFound(path.clone()))?;
        node.extra_flags.set(flag, on);
        Ok(())
    }

    /// Answer locate requests for `path` with `address` instead of this server.
    pub async fn set_location(&self, path: &str, address: &str) -> Result<()> {
        let path = normalize_path(path)?;
        self.state.write().await.locations.insert(
            path,
            vec![Location {
                address: address.to_string(),
                kind: LocationKind::ServerOnline,
            }],
        );
        Ok(())
    }

    pub async fn prepared(&self) -> Vec<PrepareRequest> {
        self.state.read().await.prepared.clone()
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteEndpoint for MemoryEndpoint {
    fn address(&self) -> &str {
        &self.address
    }

    async fn open(&self, url: &RemoteUrl, mode: OpenMode) -> Result<Box<dyn RemoteFileIo>> {
        self.record_call();
        let path = url.path().to_string();
        let mut state = self.state.write().await;

        match mode {
            OpenMode::None => {
                return Err(Error::InvalidMode(format!("no open mode given for {}", url)));
            }
            OpenMode::Read | OpenMode::Update => {
                let node = state.file(&path)?;
                if node.extra_flags.contains(StatFlags::OFFLINE) {
                    return Err(Error::Offline(path));
                }
            }
            OpenMode::Create => {
                if state.nodes.contains_key(&path) {
                    return Err(Error::PathAlreadyExists(path));
                }
                state.ensure_parents(&path)?;
                state.insert(path.clone(), NodeKind::File(Vec::new()));
            }
            OpenMode::Delete => {
                state.ensure_parents(&path)?;
                match state.nodes.get_mut(&path) {
                    Some(node) if node.is_dir() => return Err(Error::NotAFile(path)),
                    Some(node) => {
                        node.kind = NodeKind::File(Vec::new());
                        node.mod_time = now();
                    }
                    None => state.insert(path.clone(), NodeKind::File(Vec::new())),
                }
            }
        }

        tracing::debug!(path = %path, mode = %mode, "memory endpoint opened file");
        Ok(Box::new(MemoryFile {
            path,
            mode,
            open: true,
            state: self.state.clone(),
            calls: self.calls.clone(),
        }))
    }

    async fn stat(&self, path: &str) -> Result<StatInfo> {
        self.record_call();
        let path = normalize_path(path)?;
        let state = self.state.read().await;
        state
            .nodes
            .get(&path)
            .map(Node::stat)
            .ok_or(Error::PathNotFound(path))
    }

    async fn dir_list(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.record_call();
        let path = normalize_path(path)?;
        let state = self.state.read().await;
        match state.nodes.get(&path) {
            Some(node) if node.is_dir() => {}
            Some(_) => return Err(Error::NotADirectory(path)),
            None => return Err(Error::PathNotFound(path)),
        }

        let entries = state
            .nodes
            .iter()
            .filter(|(p, _)| **p != path && parent_path(p).as_deref() == Some(path.as_str()))
            .filter_map(|(p, node)| {
                Some(DirEntry {
                    host_address: self.address.clone(),
                    name: file_name(p)?,
                    stat: Some(node.stat()),
                })
            })
            .collect();
        Ok(entries)
    }

    async fn mkdir(&self, path: &str, make_path: bool) -> Result<()> {
        self.record_call();
        let path = normalize_path(path)?;
        let mut state = self.state.write().await;
        if let Some(node) = state.nodes.get(&path) {
            if make_path && node.is_dir() {
                return Ok(());
            }
            return Err(Error::PathAlreadyExists(path));
        }

        if make_path {
            state.ensure_parents(&path)?;
        } else if let Some(parent) = parent_path(&path) {
            match state.nodes.get(&parent) {
                Some(node) if node.is_dir() => {}
                Some(_) => return Err(Error::NotADirectory(parent)),
                None => return Err(Error::PathNotFound(parent)),
            }
        }
        state.insert(path, NodeKind::Dir);
        Ok(())
    }

    async fn rm(&self, path: &str) -> Result<()> {
        self.record_call();
        let path = normalize_path(path)?;
        let mut state = self.state.write().await;
        state.file(&path)?;
        state.nodes.remove(&path);
        state.locations.remove(&path);
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        self.record_call();
        let path = normalize_path(path)?;
        if path == "/" {
            return Err(Error::InvalidPath("cannot remove the root directory".to_string()));
        }
        let mut state = self.state.write().await;
        match state.nodes.get(&path) {
            Some(node) if node.is_dir() => {}
            Some(_) => return Err(Error::NotADirectory(path)),
            None => return Err(Error::PathNotFound(path)),
        }
        if state.has_children(&path) {
            return Err(Error::DirectoryNotEmpty(path));
        }
        state.nodes.remove(&path);
        Ok(())
    }

    async fn locate(&self, path: &str) -> Result<Vec<Location>> {
        self.record_call();
        let path = normalize_path(path)?;
        let state = self.state.read().await;
        if !state.nodes.contains_key(&path) {
            return Err(Error::PathNotFound(path));
        }
        Ok(state.locations.get(&path).cloned().unwrap_or_else(|| {
            vec![Location {
                address: self.address.clone(),
                kind: LocationKind::ServerOnline,
            }]
        }))
    }

    async fn prepare(&self, paths: &[String], flags: PrepareFlags, priority: u8) -> Result<()> {
        self.record_call();
        let mut normalized = Vec::with_capacity(paths.len());
        for p in paths {
            normalized.push(normalize_path(p)?);
        }

        let mut state = self.state.write().await;
        for p in &normalized {
            if !state.nodes.contains_key(p) {
                return Err(Error::PathNotFound(p.clone()));
            }
        }
        if flags.contains(PrepareFlags::STAGE) {
            for p in &normalized {
                if let Some(node) = state.nodes.get_mut(p) {
                    node.extra_flags.remove(StatFlags::OFFLINE);
                }
            }
        }
        state.prepared.push(PrepareRequest {
            paths: normalized,
            flags,
            priority,
        });
        Ok(())
    }

    async fn query(&self, code: QueryCode, arg: &str) -> Result<Bytes> {
        self.record_call();
        match (code, arg) {
            (QueryCode::Config, "readv_ior_max") => match self.readv_ior_max {
                Some(max) => Ok(Bytes::from(format!("{}\n", max))),
                None => Err(Error::Remote("readv_ior_max is not configured".to_string())),
            },
            _ => Err(Error::Remote(format!("unsupported query {:?} {}", code, arg))),
        }
    }

    async fn protocol(&self) -> Result<ProtocolInfo> {
        self.record_call();
        Ok(ProtocolInfo {
            version: PROTOCOL_VERSION,
            role: self.role,
        })
    }
}

struct MemoryFile {
    path: String,
    mode: OpenMode,
    open: bool,
    state: Arc<RwLock<MemoryState>>,
    calls: Arc<AtomicU64>,
}

impl MemoryFile {
    fn check_open(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.open {
            Ok(())
        } else {
            Err(Error::NotOpen(self.path.clone()))
        }
    }
}

#[async_trait]
impl RemoteFileIo for MemoryFile {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn stat(&self) -> Result<StatInfo> {
        self.check_open()?;
        let state = self.state.read().await;
        Ok(state.file(&self.path)?.stat())
    }

    async fn read(&self, offset: u64, buf: &mut [u8]) -> Result<u32> {
        self.check_open()?;
        let state = self.state.read().await;
        let NodeKind::File(data) = &state.file(&self.path)?.kind else {
            return Err(Error::NotAFile(self.path.clone()));
        };
        Ok(copy_range(data, offset, buf) as u32)
    }

    async fn vector_read(&self, chunks: &[ChunkRequest], buf: &mut [u8]) -> Result<VectorReadInfo> {
        self.check_open()?;
        let total: usize = chunks.iter().map(|c| c.length as usize).sum();
        if buf.len() < total {
            return Err(Error::InvalidArgument(format!(
                "vector read needs {} bytes, buffer holds {}",
                total,
                buf.len()
            )));
        }

        let state = self.state.read().await;
        let NodeKind::File(data) = &state.file(&self.path)?.kind else {
            return Err(Error::NotAFile(self.path.clone()));
        };

        let mut info = VectorReadInfo::default();
        let mut pos = 0usize;
        for chunk in chunks {
            let end = pos + chunk.length as usize;
            let served = copy_range(data, chunk.offset, &mut buf[pos..end]);
            info.size += served as u64;
            info.chunks.push(ChunkRequest::new(chunk.offset, served as u32));
            pos = end;
        }
        Ok(info)
    }

    async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_open()?;
        if !self.mode.is_writable() {
            return Err(Error::PermissionDenied(format!(
                "{} is open in {} mode",
                self.path, self.mode
            )));
        }

        let span = crate::memory_span(&self.path, offset, data.len())?;
        let mut state = self.state.write().await;
        let node = state
            .nodes
            .get_mut(&self.path)
            .ok_or_else(|| Error::PathNotFound(self.path.clone()))?;
        let NodeKind::File(contents) = &mut node.kind else {
            return Err(Error::NotAFile(self.path.clone()));
        };
        if contents.len() < span.end {
            contents.resize(span.end, 0);
        }
        contents[span].copy_from_slice(data);
        node.mod_time = now();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.open = false;
        Ok(())
    }
}

/// Copy `data[offset..]` into `buf` as far as both reach.
fn copy_range(data: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    let start = offset.min(data.len() as u64) as usize;
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> RemoteUrl {
        RemoteUrl::parse(&format!("root://localhost:1094/{}", path)).unwrap()
    }

    #[tokio::test]
    async fn test_open_modes() {
        let ep = MemoryEndpoint::new("localhost:1094");
        assert!(matches!(
            ep.open(&url("/tmp/missing"), OpenMode::Read).await,
            Err(Error::PathNotFound(_))
        ));
        assert!(matches!(
            ep.open(&url("/tmp/f"), OpenMode::None).await,
            Err(Error::InvalidMode(_))
        ));

        ep.open(&url("/tmp/f"), OpenMode::Create).await.unwrap();
        assert!(matches!(
            ep.open(&url("/tmp/f"), OpenMode::Create).await,
            Err(Error::PathAlreadyExists(_))
        ));
        assert!(ep.stat("/tmp").await.unwrap().is_dir());

        ep.put_file("/tmp/f", b"abc").await.unwrap();
        ep.open(&url("/tmp/f"), OpenMode::Delete).await.unwrap();
        assert_eq!(ep.file_contents("/tmp/f").await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_read_write() {
        let ep = MemoryEndpoint::new("localhost:1094");
        let mut file = ep.open(&url("/data/f"), OpenMode::Create).await.unwrap();
        file.write(0, b"hello").await.unwrap();
        file.write(8, b"world").await.unwrap();
        assert_eq!(
            ep.file_contents("/data/f").await.unwrap(),
            b"hello\0\0\0world"
        );

        let mut buf = [0u8; 8];
        assert_eq!(file.read(8, &mut buf).await.unwrap(), 5);
        assert_eq!(&buf[..5], b"world");
        assert_eq!(file.read(100, &mut buf).await.unwrap(), 0);

        file.close().await.unwrap();
        assert!(!file.is_open());
        assert!(matches!(file.read(0, &mut buf).await, Err(Error::NotOpen(_))));
    }

    #[tokio::test]
    async fn test_write_at_huge_offset_is_refused() {
        let ep = MemoryEndpoint::new("localhost:1094");
        let file = ep.open(&url("/data/f"), OpenMode::Create).await.unwrap();
        for offset in [u64::MAX, crate::MAX_IN_MEMORY_SIZE] {
            assert!(matches!(
                file.write(offset, b"x").await,
                Err(Error::InvalidArgument(_))
            ));
        }
        assert_eq!(ep.file_contents("/data/f").await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_write_needs_writable_mode() {
        let ep = MemoryEndpoint::new("localhost:1094");
        ep.put_file("/data/f", b"abc").await.unwrap();
        let file = ep.open(&url("/data/f"), OpenMode::Read).await.unwrap();
        assert!(matches!(
            file.write(0, b"x").await,
            Err(Error::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_vector_read_is_positional() {
        let ep = MemoryEndpoint::new("localhost:1094");
        ep.put_file("/data/f", b"0123456789").await.unwrap();
        let file = ep.open(&url("/data/f"), OpenMode::Read).await.unwrap();

        let chunks = [ChunkRequest::new(8, 4), ChunkRequest::new(0, 2)];
        let mut buf = [b'_'; 6];
        let info = file.vector_read(&chunks, &mut buf).await.unwrap();
        assert_eq!(&buf, b"89__01");
        assert_eq!(info.size, 4);
        assert_eq!(info.chunks, vec![ChunkRequest::new(8, 2), ChunkRequest::new(0, 2)]);

        let mut small = [0u8; 3];
        assert!(matches!(
            file.vector_read(&chunks, &mut small).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_namespace_operations() {
        let ep = MemoryEndpoint::new("localhost:1094");
        assert!(matches!(ep.mkdir("/a/b", false).await, Err(Error::PathNotFound(_))));
        ep.mkdir("/a/b", true).await.unwrap();
        ep.mkdir("/a/b", true).await.unwrap();
        ep.put_file("/a/b/z", b"1").await.unwrap();
        ep.put_file("/a/b/y", b"22").await.unwrap();

        let names: Vec<String> = ep
            .dir_list("/a/b")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["y", "z"]);

        assert!(matches!(ep.rmdir("/a/b").await, Err(Error::DirectoryNotEmpty(_))));
        assert!(matches!(ep.rm("/a/b").await, Err(Error::NotAFile(_))));
        ep.rm("/a/b/y").await.unwrap();
        ep.rm("/a/b/z").await.unwrap();
        ep.rmdir("/a/b").await.unwrap();
        assert!(matches!(ep.stat("/a/b").await, Err(Error::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_locate_and_prepare() {
        let ep = MemoryEndpoint::new("redirector:1094");
        ep.put_file("/store/f", b"x").await.unwrap();
        ep.set_offline("/store/f", true).await.unwrap();

        let locations = ep.locate("/store/f").await.unwrap();
        assert_eq!(locations[0].address, "redirector:1094");
        ep.set_location("/store/f", "disk07:1095").await.unwrap();
        assert_eq!(ep.locate("/store/f").await.unwrap()[0].address, "disk07:1095");
        assert!(ep.locate("/store/none").await.is_err());

        assert!(ep.stat("/store/f").await.unwrap().is_offline());
        ep.prepare(&["/store/f".to_string()], PrepareFlags::STAGE, 3)
            .await
            .unwrap();
        assert!(!ep.stat("/store/f").await.unwrap().is_offline());
        assert_eq!(ep.prepared().await[0].priority, 3);
    }

    #[tokio::test]
    async fn test_query_and_protocol() {
        let ep = MemoryEndpoint::new("localhost:1094").with_readv_ior_max(Some(1000));
        let reply = ep.query(QueryCode::Config, "readv_ior_max").await.unwrap();
        assert_eq!(&reply[..], b"1000\n");
        assert!(ep.query(QueryCode::Space, "/").await.is_err());

        let ep = ep.with_readv_ior_max(None).with_role(HostRole::Manager);
        assert!(ep.query(QueryCode::Config, "readv_ior_max").await.is_err());
        assert_eq!(ep.protocol().await.unwrap().role, HostRole::Manager);
    }
}
