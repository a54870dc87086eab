//! Endpoint backed by an object store.
//!
//! Object stores have flat keys, so directories are key prefixes plus a
//! zero-byte `.keep` marker written by `mkdir`. Writes to an open file are
//! buffered in the handle and published as one object on close.

use crate::{
    ChunkRequest, DirEntry, EndpointConfig, HostRole, Location, LocationKind, PrepareFlags,
    ProtocolInfo, QueryCode, RemoteEndpoint, RemoteFileIo, StatFlags, StatInfo, StoreConfig,
    VectorReadInfo, PROTOCOL_VERSION,
};
use async_trait::async_trait;
use bytes::Bytes;
use common::{normalize_path, parent_path, Error, OpenMode, RemoteUrl, Result};
use object_store::{
    aws::AmazonS3Builder, azure::MicrosoftAzureBuilder, gcp::GoogleCloudStorageBuilder,
    local::LocalFileSystem, memory::InMemory, path::Path as ObjectPath, ObjectMeta, ObjectStore,
    PutPayload,
};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::Mutex;

const DIR_MARKER: &str = ".keep";

/// Convert a string path to ObjectPath
fn to_object_path(path: &str) -> ObjectPath {
    ObjectPath::from(path.trim_start_matches('/'))
}

fn marker_path(path: &str) -> ObjectPath {
    to_object_path(path).child(DIR_MARKER)
}

fn map_store_error(op: &str, path: &str, err: object_store::Error) -> Error {
    match err {
        object_store::Error::NotFound { .. } => Error::PathNotFound(path.to_string()),
        other => Error::Storage(format!("Failed to {} {}: {}", op, path, other)),
    }
}

/// Stable numeric id for a path, kept positive so it survives a signed parse.
fn path_id(path: &str) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    (hasher.finish() >> 1).to_string()
}

fn file_stat(path: &str, meta: &ObjectMeta) -> StatInfo {
    StatInfo {
        id: path_id(path),
        size: meta.size as u64,
        flags: StatFlags::READABLE | StatFlags::WRITABLE,
        mod_time: meta.last_modified.timestamp().max(0) as u64,
    }
}

fn dir_stat(path: &str) -> StatInfo {
    StatInfo {
        id: path_id(path),
        size: 0,
        flags: StatFlags::IS_DIR | StatFlags::READABLE | StatFlags::WRITABLE,
        mod_time: 0,
    }
}

/// Build the store behind an endpoint. A configuration the backend refuses
/// is reported as an invalid argument naming the endpoint.
fn build_store(config: &EndpointConfig) -> Result<Arc<dyn ObjectStore>> {
    let invalid = |e: object_store::Error| {
        Error::InvalidArgument(format!("store for endpoint {}: {}", config.address, e))
    };

    let store: Arc<dyn ObjectStore> = match &config.store {
        StoreConfig::S3 {
            bucket,
            region,
            access_key_id,
            secret_access_key,
            endpoint,
        } => {
            let mut builder = AmazonS3Builder::new()
                .with_bucket_name(bucket)
                .with_region(region);
            match (access_key_id, secret_access_key) {
                (Some(id), Some(secret)) => {
                    builder = builder
                        .with_access_key_id(id)
                        .with_secret_access_key(secret);
                }
                (None, None) => {}
                _ => {
                    return Err(Error::InvalidArgument(format!(
                        "endpoint {}: S3 access key id and secret go together",
                        config.address
                    )));
                }
            }
            // Custom endpoints are addressed path-style.
            if let Some(url) = endpoint {
                builder = builder
                    .with_endpoint(url)
                    .with_allow_http(url.starts_with("http://"))
                    .with_virtual_hosted_style_request(false);
            }
            Arc::new(builder.build().map_err(invalid)?)
        }
        StoreConfig::Gcs {
            bucket,
            service_account_path,
        } => {
            let mut builder = GoogleCloudStorageBuilder::new().with_bucket_name(bucket);
            if let Some(path) = service_account_path {
                builder = builder.with_service_account_path(path);
            }
            Arc::new(builder.build().map_err(invalid)?)
        }
        StoreConfig::Azure {
            container,
            account,
            access_key,
        } => {
            let mut builder = MicrosoftAzureBuilder::new()
                .with_account(account)
                .with_container_name(container);
            if let Some(key) = access_key {
                builder = builder.with_access_key(key);
            }
            Arc::new(builder.build().map_err(invalid)?)
        }
        StoreConfig::Local { root_path } => {
            Arc::new(LocalFileSystem::new_with_prefix(root_path).map_err(invalid)?)
        }
        StoreConfig::Memory => Arc::new(InMemory::new()),
    };

    tracing::debug!(address = %config.address, backend = config.store.kind(), "object store ready");
    Ok(store)
}

pub struct ObjectStoreEndpoint {
    address: String,
    role: HostRole,
    readv_ior_max: u32,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreEndpoint {
    /// Create an endpoint from configuration
    pub fn from_config(config: &EndpointConfig) -> Result<Self> {
        if config.readv_ior_max == 0 {
            return Err(Error::InvalidArgument(format!(
                "endpoint {}: readv_ior_max must be positive",
                config.address
            )));
        }
        let store = build_store(config)?;
        Ok(Self::with_store(config, store))
    }

    /// Create an endpoint over an existing store
    pub fn with_store(config: &EndpointConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            address: config.address.clone(),
            role: config.role,
            readv_ior_max: config.readv_ior_max,
            store,
        }
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        match self.store.head(&to_object_path(path)).await {
            Ok(meta) => Ok(Some(meta)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(map_store_error("stat", path, e)),
        }
    }

    async fn dir_exists(&self, path: &str) -> Result<bool> {
        if path == "/" {
            return Ok(true);
        }
        if self.head(&format!("{}/{}", path, DIR_MARKER)).await?.is_some() {
            return Ok(true);
        }
        let listing = self
            .store
            .list_with_delimiter(Some(&to_object_path(path)))
            .await
            .map_err(|e| map_store_error("list", path, e))?;
        Ok(!listing.objects.is_empty() || !listing.common_prefixes.is_empty())
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        self.store
            .put(&to_object_path(path), PutPayload::from(data))
            .await
            .map_err(|e| map_store_error("write", path, e))?;
        Ok(())
    }
}

#[async_trait]
impl RemoteEndpoint for ObjectStoreEndpoint {
    fn address(&self) -> &str {
        &self.address
    }

    async fn open(&self, url: &RemoteUrl, mode: OpenMode) -> Result<Box<dyn RemoteFileIo>> {
        let path = url.path().to_string();
        let buffer = match mode {
            OpenMode::None => {
                return Err(Error::InvalidMode(format!("no open mode given for {}", url)));
            }
            OpenMode::Read | OpenMode::Update => {
                if self.head(&path).await?.is_none() {
                    if self.dir_exists(&path).await? {
                        return Err(Error::NotAFile(path));
                    }
                    return Err(Error::PathNotFound(path));
                }
                None
            }
            OpenMode::Create => {
                if self.head(&path).await?.is_some() {
                    return Err(Error::PathAlreadyExists(path));
                }
                self.put(&path, Bytes::new()).await?;
                Some(Vec::new())
            }
            OpenMode::Delete => {
                self.put(&path, Bytes::new()).await?;
                Some(Vec::new())
            }
        };

        tracing::debug!(path = %path, mode = %mode, "object store endpoint opened file");
        Ok(Box::new(ObjectFile {
            store: self.store.clone(),
            location: to_object_path(&path),
            path,
            mode,
            open: true,
            buffer: Mutex::new(buffer),
        }))
    }

    async fn stat(&self, path: &str) -> Result<StatInfo> {
        let path = normalize_path(path)?;
        if let Some(meta) = self.head(&path).await? {
            return Ok(file_stat(&path, &meta));
        }
        if self.dir_exists(&path).await? {
            return Ok(dir_stat(&path));
        }
        Err(Error::PathNotFound(path))
    }

    async fn dir_list(&self, path: &str) -> Result<Vec<DirEntry>> {
        let path = normalize_path(path)?;
        let prefix = if path == "/" {
            None
        } else {
            Some(to_object_path(&path))
        };

        let listing = self
            .store
            .list_with_delimiter(prefix.as_ref())
            .await
            .map_err(|e| map_store_error("list directory", &path, e))?;
        if listing.objects.is_empty() && listing.common_prefixes.is_empty() {
            if self.head(&path).await?.is_some() {
                return Err(Error::NotADirectory(path));
            }
            if !self.dir_exists(&path).await? {
                return Err(Error::PathNotFound(path));
            }
        }

        let mut entries = Vec::new();
        for meta in &listing.objects {
            let Some(name) = meta.location.filename() else {
                continue;
            };
            if name == DIR_MARKER {
                continue;
            }
            let full = format!("/{}", meta.location);
            entries.push(DirEntry {
                host_address: self.address.clone(),
                name: name.to_string(),
                stat: Some(file_stat(&full, meta)),
            });
        }
        for dir in &listing.common_prefixes {
            let Some(name) = dir.filename() else {
                continue;
            };
            let full = format!("/{}", dir);
            entries.push(DirEntry {
                host_address: self.address.clone(),
                name: name.to_string(),
                stat: Some(dir_stat(&full)),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn mkdir(&self, path: &str, make_path: bool) -> Result<()> {
        let path = normalize_path(path)?;
        if self.head(&path).await?.is_some() {
            return Err(Error::PathAlreadyExists(path));
        }
        if self.dir_exists(&path).await? {
            if make_path {
                return Ok(());
            }
            return Err(Error::PathAlreadyExists(path));
        }
        if !make_path {
            if let Some(parent) = parent_path(&path) {
                if !self.dir_exists(&parent).await? {
                    return Err(Error::PathNotFound(parent));
                }
            }
        }

        self.store
            .put(&marker_path(&path), PutPayload::from(Bytes::new()))
            .await
            .map_err(|e| map_store_error("mkdir", &path, e))?;
        Ok(())
    }

    async fn rm(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        if self.head(&path).await?.is_none() {
            if self.dir_exists(&path).await? {
                return Err(Error::NotAFile(path));
            }
            return Err(Error::PathNotFound(path));
        }
        self.store
            .delete(&to_object_path(&path))
            .await
            .map_err(|e| map_store_error("delete", &path, e))
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        if path == "/" {
            return Err(Error::InvalidPath("cannot remove the root directory".to_string()));
        }
        if self.head(&path).await?.is_some() {
            return Err(Error::NotADirectory(path));
        }
        if !self.dir_exists(&path).await? {
            return Err(Error::PathNotFound(path));
        }

        let listing = self
            .store
            .list_with_delimiter(Some(&to_object_path(&path)))
            .await
            .map_err(|e| map_store_error("list directory", &path, e))?;
        let has_content = !listing.common_prefixes.is_empty()
            || listing
                .objects
                .iter()
                .any(|meta| meta.location.filename() != Some(DIR_MARKER));
        if has_content {
            return Err(Error::DirectoryNotEmpty(path));
        }

        match self.store.delete(&marker_path(&path)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_store_error("rmdir", &path, e)),
        }
    }

    async fn locate(&self, path: &str) -> Result<Vec<Location>> {
        self.stat(path).await?;
        Ok(vec![Location {
            address: self.address.clone(),
            kind: LocationKind::ServerOnline,
        }])
    }

    async fn prepare(&self, paths: &[String], flags: PrepareFlags, priority: u8) -> Result<()> {
        // Objects are always online; a prepare only has to confirm existence.
        for path in paths {
            self.stat(path).await?;
        }
        tracing::debug!(count = paths.len(), ?flags, priority, "prepare accepted");
        Ok(())
    }

    async fn query(&self, code: QueryCode, arg: &str) -> Result<Bytes> {
        match (code, arg) {
            (QueryCode::Config, "readv_ior_max") => {
                Ok(Bytes::from(format!("{}\n", self.readv_ior_max)))
            }
            _ => Err(Error::Remote(format!("unsupported query {:?} {}", code, arg))),
        }
    }

    async fn protocol(&self) -> Result<ProtocolInfo> {
        Ok(ProtocolInfo {
            version: PROTOCOL_VERSION,
            role: self.role,
        })
    }
}

struct ObjectFile {
    store: Arc<dyn ObjectStore>,
    location: ObjectPath,
    path: String,
    mode: OpenMode,
    open: bool,
    /// Whole-object contents once the handle has written; `None` while the
    /// store copy is authoritative.
    buffer: Mutex<Option<Vec<u8>>>,
}

impl ObjectFile {
    fn check_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::NotOpen(self.path.clone()))
        }
    }

    async fn remote_size(&self) -> Result<u64> {
        let meta = self
            .store
            .head(&self.location)
            .await
            .map_err(|e| map_store_error("stat", &self.path, e))?;
        Ok(meta.size as u64)
    }

    async fn fetch_all(&self) -> Result<Vec<u8>> {
        let data = self
            .store
            .get(&self.location)
            .await
            .map_err(|e| map_store_error("read", &self.path, e))?
            .bytes()
            .await
            .map_err(|e| map_store_error("read", &self.path, e))?;
        Ok(data.to_vec())
    }
}

fn copy_range(data: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    let start = offset.min(data.len() as u64) as usize;
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    n
}

#[async_trait]
impl RemoteFileIo for ObjectFile {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn stat(&self) -> Result<StatInfo> {
        self.check_open()?;
        if let Some(data) = self.buffer.lock().await.as_ref() {
            return Ok(StatInfo {
                id: path_id(&self.path),
                size: data.len() as u64,
                flags: StatFlags::READABLE | StatFlags::WRITABLE,
                mod_time: chrono::Utc::now().timestamp().max(0) as u64,
            });
        }
        let meta = self
            .store
            .head(&self.location)
            .await
            .map_err(|e| map_store_error("stat", &self.path, e))?;
        Ok(file_stat(&self.path, &meta))
    }

    async fn read(&self, offset: u64, buf: &mut [u8]) -> Result<u32> {
        self.check_open()?;
        if let Some(data) = self.buffer.lock().await.as_ref() {
            return Ok(copy_range(data, offset, buf) as u32);
        }

        let size = self.remote_size().await?;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let end = size.min(offset.saturating_add(buf.len() as u64));
        let data = self
            .store
            .get_range(&self.location, offset..end)
            .await
            .map_err(|e| map_store_error("read", &self.path, e))?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len() as u32)
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

        let mut info = VectorReadInfo::default();
        if let Some(data) = self.buffer.lock().await.as_ref() {
            let mut pos = 0usize;
            for chunk in chunks {
                let end = pos + chunk.length as usize;
                let served = copy_range(data, chunk.offset, &mut buf[pos..end]);
                info.size += served as u64;
                info.chunks.push(ChunkRequest::new(chunk.offset, served as u32));
                pos = end;
            }
            return Ok(info);
        }

        // get_ranges rejects empty ranges, so only ask for the non-empty ones
        // and remember where each lands in the caller's buffer.
        let size = self.remote_size().await?;
        let mut ranges = Vec::new();
        let mut targets = Vec::new();
        let mut pos = 0usize;
        for chunk in chunks {
            let start = chunk.offset.min(size);
            let end = size.min(chunk.offset.saturating_add(chunk.length as u64));
            if end > start {
                ranges.push(start..end);
                targets.push(pos);
            }
            info.chunks
                .push(ChunkRequest::new(chunk.offset, (end.saturating_sub(start)) as u32));
            pos += chunk.length as usize;
        }

        if !ranges.is_empty() {
            let parts = self
                .store
                .get_ranges(&self.location, &ranges)
                .await
                .map_err(|e| map_store_error("vector read", &self.path, e))?;
            for (data, target) in parts.iter().zip(targets) {
                buf[target..target + data.len()].copy_from_slice(data);
                info.size += data.len() as u64;
            }
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
        let mut guard = self.buffer.lock().await;
        if guard.is_none() {
            *guard = Some(self.fetch_all().await?);
        }
        if let Some(contents) = guard.as_mut() {
            if contents.len() < span.end {
                contents.resize(span.end, 0);
            }
            contents[span].copy_from_slice(data);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        if let Some(contents) = self.buffer.get_mut().take() {
            if self.mode.is_writable() {
                self.store
                    .put(&self.location, PutPayload::from(Bytes::from(contents)))
                    .await
                    .map_err(|e| map_store_error("publish", &self.path, e))?;
            }
        }
        Ok(())
    }
}
