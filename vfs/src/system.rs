//! Metadata and directory session against one endpoint.

use crate::dir_cursor::DirectoryCursor;
use crate::stager::{parse_stage_priority, FileCollection, PLACEHOLDER_REDIRECT, PLACEHOLDER_UNRESOLVED};
use crate::stat::FileStatus;
use common::{normalize_path, Error, RemoteUrl, Result};
use endpoint::{HostRole, PrepareFlags, RemoteEndpoint};
use std::fmt;
use std::sync::Arc;

/// Token returned by [`RemoteFilesystem::open_directory`].
///
/// Tokens are generation numbers: each open hands out the next one, so every
/// token below the live one has been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirHandle(u64);

impl fmt::Display for DirHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct DirSession {
    token: u64,
    cursor: DirectoryCursor,
}

/// Filesystem view of one endpoint.
///
/// Only one directory listing is active at a time: opening a directory
/// releases the previous cursor and invalidates its handle.
pub struct RemoteFilesystem {
    endpoint: Arc<dyn RemoteEndpoint>,
    url: RemoteUrl,
    session: Option<DirSession>,
    generation: u64,
}

impl RemoteFilesystem {
    pub fn new(endpoint: Arc<dyn RemoteEndpoint>, url: RemoteUrl) -> Self {
        Self {
            endpoint,
            url,
            session: None,
            generation: 0,
        }
    }

    pub fn url(&self) -> &RemoteUrl {
        &self.url
    }

    pub fn endpoint(&self) -> &Arc<dyn RemoteEndpoint> {
        &self.endpoint
    }

    fn report(&self, op: &str, path: &str, err: Error) -> Error {
        tracing::error!(op, endpoint = %self.url, path, error = %err, "remote filesystem operation failed");
        err
    }

    /// Offline entries are a successful stat with only the offline mode bit.
    pub async fn stat(&self, path: &str) -> Result<FileStatus> {
        let info = self
            .endpoint
            .stat(path)
            .await
            .map_err(|e| self.report("stat", path, e))?;
        Ok(FileStatus::from_stat(&info))
    }

    pub fn open_directory(&mut self, path: &str) -> Result<DirHandle> {
        let path = normalize_path(path).map_err(|e| self.report("open_directory", path, e))?;
        self.session = None;

        self.generation += 1;
        let token = self.generation;
        tracing::debug!(endpoint = %self.url, path = %path, token = %token, "directory opened");
        self.session = Some(DirSession {
            token,
            cursor: DirectoryCursor::new(path),
        });
        Ok(DirHandle(token))
    }

    /// Issued by this view and no longer live.
    fn is_retired(&self, handle: DirHandle) -> bool {
        let live = matches!(&self.session, Some(session) if session.token == handle.0);
        handle.0 != 0 && handle.0 <= self.generation && !live
    }

    fn current_session(&mut self, handle: DirHandle) -> Result<&mut DirSession> {
        match self.session.as_mut() {
            Some(session) if session.token == handle.0 => Ok(session),
            _ => Err(Error::InvalidDirHandle),
        }
    }

    /// Next name in the directory, or `None` once the listing is exhausted.
    pub async fn next_entry(&mut self, handle: DirHandle) -> Result<Option<String>> {
        let endpoint = self.endpoint.clone();
        let result = match self.current_session(handle) {
            Ok(session) => session.cursor.next_entry(endpoint.as_ref()).await,
            Err(e) => Err(e),
        };
        result.map_err(|e| self.report("next_entry", &handle.to_string(), e))
    }

    /// Release the cursor behind `handle`. Freeing an already released
    /// handle does nothing.
    pub fn free_directory(&mut self, handle: DirHandle) -> Result<()> {
        if self.is_retired(handle) {
            return Ok(());
        }
        let live = matches!(&self.session, Some(session) if session.token == handle.0);
        if !live {
            return Err(self.report(
                "free_directory",
                &handle.to_string(),
                Error::InvalidDirHandle,
            ));
        }
        self.session = None;
        Ok(())
    }

    /// Create `path` and any missing parents.
    pub async fn make_directory(&self, path: &str) -> Result<()> {
        self.endpoint
            .mkdir(path, true)
            .await
            .map_err(|e| self.report("make_directory", path, e))
    }

    /// Remove a file or an empty directory.
    pub async fn unlink(&self, path: &str) -> Result<()> {
        let info = self
            .endpoint
            .stat(path)
            .await
            .map_err(|e| self.report("unlink", path, e))?;
        let result = if info.is_dir() {
            self.endpoint.rmdir(path).await
        } else {
            self.endpoint.rm(path).await
        };
        result.map_err(|e| self.report("unlink", path, e))
    }

    /// Resolve `path` to the URL of the server that holds it.
    pub async fn locate(&self, path: &str) -> Result<RemoteUrl> {
        let locations = self
            .endpoint
            .locate(path)
            .await
            .map_err(|e| self.report("locate", path, e))?;
        let first = locations
            .first()
            .ok_or_else(|| self.report("locate", path, Error::PathNotFound(path.to_string())))?;
        RemoteUrl::from_parts(self.url.scheme(), &first.address, path)
            .map_err(|e| self.report("locate", path, e))
    }

    /// Locate every entry of `collection`, marking each staged or not and
    /// putting the resolved URL (or a placeholder) in front of its URL list.
    /// Returns the number of entries processed.
    pub async fn locate_collection(
        &self,
        collection: Option<&mut FileCollection>,
        add_placeholder: bool,
    ) -> Result<usize> {
        let collection = collection.ok_or_else(|| {
            self.report(
                "locate_collection",
                "",
                Error::InvalidArgument("no collection given".to_string()),
            )
        })?;

        let mut processed = 0;
        for info in collection.files_mut() {
            let current = info.current_url().clone();
            match self.locate(current.path()).await {
                Err(_) => {
                    info.set_staged(false);
                    if add_placeholder {
                        info.add_url(RemoteUrl::parse(PLACEHOLDER_UNRESOLVED)?, true);
                    }
                }
                Ok(found) => {
                    info.set_staged(true);
                    if !found.same_target(&current) {
                        info.add_url(found, true);
                    } else if add_placeholder {
                        info.add_url(RemoteUrl::parse(PLACEHOLDER_REDIRECT)?, true);
                    }
                }
            }
            processed += 1;
        }

        tracing::debug!(endpoint = %self.url, processed, "collection located");
        Ok(processed)
    }

    /// Ask the endpoint to bring `path` online. `options` may carry a
    /// `priority=<n>` token.
    pub async fn stage(&self, path: &str, options: &str) -> Result<()> {
        self.stage_collection(&[path.to_string()], options).await
    }

    pub async fn stage_collection(&self, paths: &[String], options: &str) -> Result<()> {
        if paths.is_empty() {
            return Err(self.report(
                "stage",
                "",
                Error::InvalidArgument("nothing to stage".to_string()),
            ));
        }
        let paths = paths
            .iter()
            .map(|p| normalize_path(p))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| self.report("stage", options, e))?;

        let priority = parse_stage_priority(options);
        tracing::info!(endpoint = %self.url, count = paths.len(), priority, "staging");
        self.endpoint
            .prepare(&paths, PrepareFlags::STAGE, priority)
            .await
            .map_err(|e| self.report("stage", &paths.join(","), e))
    }

    /// True only when the endpoint is a data server and `path` resolves to
    /// this machine.
    pub async fn is_path_local(&self, path: &str) -> bool {
        match self.endpoint.protocol().await {
            Ok(info) if info.role == HostRole::DataServer => self
                .url
                .with_path(path)
                .map(|url| url.is_local())
                .unwrap_or(false),
            Ok(_) => false,
            Err(e) => {
                tracing::debug!(endpoint = %self.url, error = %e, "protocol query failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stager::FileInfo;
    use crate::stat::FileMode;
    use endpoint::memory::MemoryEndpoint;

    fn system(ep: &Arc<MemoryEndpoint>, authority: &str) -> RemoteFilesystem {
        let url = RemoteUrl::parse(&format!("root://{}/", authority)).unwrap();
        RemoteFilesystem::new(ep.clone(), url)
    }

    async fn populated() -> Arc<MemoryEndpoint> {
        let ep = MemoryEndpoint::new("localhost:1094");
        ep.put_file("/data/a.root", b"aaaa").await.unwrap();
        ep.put_file("/data/b.root", b"bb").await.unwrap();
        ep.put_file("/data/sub/c.root", b"c").await.unwrap();
        Arc::new(ep)
    }

    #[tokio::test]
    async fn test_stat() {
        let ep = populated().await;
        let fs = system(&ep, "localhost:1094");

        let status = fs.stat("/data/a.root").await.unwrap();
        assert!(status.is_file());
        assert_eq!(status.size, 4);
        assert!(status.mode.contains(FileMode::IRUSR | FileMode::IWUSR));
        assert!(fs.stat("/data").await.unwrap().is_dir());

        ep.set_offline("/data/b.root", true).await.unwrap();
        let offline = fs.stat("/data/b.root").await.unwrap();
        assert_eq!(offline.mode, FileMode::OFFLINE);

        assert!(matches!(fs.stat("/nope").await, Err(Error::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_directory_listing() {
        let ep = populated().await;
        let mut fs = system(&ep, "localhost:1094");

        let handle = fs.open_directory("/data").unwrap();
        let mut names = Vec::new();
        while let Some(name) = fs.next_entry(handle).await.unwrap() {
            names.push(name);
        }
        assert_eq!(names, vec!["a.root", "b.root", "sub"]);
        assert_eq!(fs.next_entry(handle).await.unwrap(), None);

        fs.free_directory(handle).unwrap();
        fs.free_directory(handle).unwrap();

        let again = fs.open_directory("/data").unwrap();
        assert_ne!(again, handle);
        assert_eq!(fs.next_entry(again).await.unwrap().as_deref(), Some("a.root"));
        assert!(matches!(fs.next_entry(handle).await, Err(Error::InvalidDirHandle)));
    }

    #[tokio::test]
    async fn test_open_directory_replaces_session() {
        let ep = populated().await;
        let mut fs = system(&ep, "localhost:1094");

        let first = fs.open_directory("/data").unwrap();
        let second = fs.open_directory("/data/sub").unwrap();
        assert!(matches!(fs.next_entry(first).await, Err(Error::InvalidDirHandle)));

        // Freeing the stale handle must not touch the live session.
        fs.free_directory(first).unwrap();
        assert_eq!(fs.next_entry(second).await.unwrap().as_deref(), Some("c.root"));
    }

    #[tokio::test]
    async fn test_many_sessions_keep_old_tokens_retired() {
        let ep = populated().await;
        let mut fs = system(&ep, "localhost:1094");

        let first = fs.open_directory("/data").unwrap();
        fs.free_directory(first).unwrap();
        for _ in 0..10_000 {
            let handle = fs.open_directory("/data").unwrap();
            fs.free_directory(handle).unwrap();
        }
        let live = fs.open_directory("/data/sub").unwrap();
        assert_eq!(fs.generation, 10_002);

        fs.free_directory(first).unwrap();
        assert!(matches!(fs.next_entry(first).await, Err(Error::InvalidDirHandle)));
        assert_eq!(fs.next_entry(live).await.unwrap().as_deref(), Some("c.root"));
        assert!(matches!(
            fs.free_directory(DirHandle(10_003)),
            Err(Error::InvalidDirHandle)
        ));
        assert!(matches!(fs.free_directory(DirHandle(0)), Err(Error::InvalidDirHandle)));
    }

    #[tokio::test]
    async fn test_unknown_handle_is_rejected_locally() {
        let ep = populated().await;
        let mut fs = system(&ep, "localhost:1094");
        let mut other = system(&ep, "localhost:1094");
        let foreign = other.open_directory("/data").unwrap();

        let calls = ep.calls();
        assert!(matches!(fs.next_entry(foreign).await, Err(Error::InvalidDirHandle)));
        assert!(matches!(fs.free_directory(foreign), Err(Error::InvalidDirHandle)));
        assert_eq!(ep.calls(), calls);
    }

    #[tokio::test]
    async fn test_make_directory_and_unlink() {
        let ep = populated().await;
        let fs = system(&ep, "localhost:1094");

        fs.make_directory("/new/deep/dir").await.unwrap();
        assert!(fs.stat("/new/deep").await.unwrap().is_dir());
        assert_eq!(crate::status_code(&fs.make_directory("/new/deep/dir").await), 0);

        fs.unlink("/data/a.root").await.unwrap();
        assert!(fs.stat("/data/a.root").await.is_err());
        fs.unlink("/new/deep/dir").await.unwrap();
        assert!(fs.stat("/new/deep/dir").await.is_err());

        assert!(matches!(fs.unlink("/data/sub").await, Err(Error::DirectoryNotEmpty(_))));
        assert_eq!(crate::status_code(&fs.unlink("/missing").await), -1);
    }

    #[tokio::test]
    async fn test_locate() {
        let ep = populated().await;
        let fs = system(&ep, "localhost:1094");

        let url = fs.locate("/data/a.root").await.unwrap();
        assert_eq!(url.as_str(), "root://localhost:1094//data/a.root");

        ep.set_location("/data/b.root", "disk07:1095").await.unwrap();
        let url = fs.locate("/data/b.root").await.unwrap();
        assert_eq!(url.host_id(), "disk07:1095");
        assert_eq!(url.path(), "/data/b.root");

        assert!(fs.locate("/missing").await.is_err());
    }

    #[tokio::test]
    async fn test_locate_collection() {
        let ep = populated().await;
        ep.set_location("/data/b.root", "disk07:1095").await.unwrap();
        let fs = system(&ep, "localhost:1094");

        let mut collection = FileCollection::new("run42");
        for path in ["/data/a.root", "/data/b.root", "/data/gone.root"] {
            let url = RemoteUrl::from_parts("root", "localhost:1094", path).unwrap();
            collection.push(FileInfo::new(url));
        }

        let processed = fs.locate_collection(Some(&mut collection), true).await.unwrap();
        assert_eq!(processed, 3);

        let files = collection.files();
        assert!(files[0].is_staged());
        assert_eq!(files[0].current_url().as_str(), PLACEHOLDER_REDIRECT);
        assert!(files[1].is_staged());
        assert_eq!(files[1].current_url().host_id(), "disk07:1095");
        assert_eq!(files[1].urls().len(), 2);
        assert!(!files[2].is_staged());
        assert_eq!(files[2].current_url().as_str(), PLACEHOLDER_UNRESOLVED);

        assert!(fs.locate_collection(None, true).await.is_err());
    }

    #[tokio::test]
    async fn test_locate_collection_without_placeholders() {
        let ep = populated().await;
        let fs = system(&ep, "localhost:1094");

        let mut collection = FileCollection::new("run43");
        for path in ["/data/a.root", "/data/gone.root"] {
            let url = RemoteUrl::from_parts("root", "localhost:1094", path).unwrap();
            collection.push(FileInfo::new(url));
        }
        fs.locate_collection(Some(&mut collection), false).await.unwrap();

        for info in collection.files() {
            assert_eq!(info.urls().len(), 1);
        }
        assert!(collection.files()[0].is_staged());
        assert!(!collection.files()[1].is_staged());
    }

    #[tokio::test]
    async fn test_stage_with_priority() {
        let ep = populated().await;
        ep.set_offline("/data/a.root", true).await.unwrap();
        let fs = system(&ep, "localhost:1094");

        fs.stage("/data/a.root", "option=x priority=3").await.unwrap();
        let prepared = ep.prepared().await;
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].priority, 3);
        assert_eq!(prepared[0].paths, vec!["/data/a.root".to_string()]);
        assert!(prepared[0].flags.contains(PrepareFlags::STAGE));
        assert!(!fs.stat("/data/a.root").await.unwrap().is_offline());

        let batch = vec!["/data/a.root".to_string(), "/data/b.root".to_string()];
        fs.stage_collection(&batch, "priority=300|priority=x").await.unwrap();
        assert_eq!(ep.prepared().await[1].priority, 0);

        assert!(fs.stage("/missing", "").await.is_err());
        assert!(fs.stage_collection(&[], "").await.is_err());
    }

    #[tokio::test]
    async fn test_is_path_local() {
        let ep = populated().await;
        let fs = system(&ep, "localhost:1094");
        assert!(fs.is_path_local("/data/a.root").await);

        let remote = system(&ep, "eos.example.org:1094");
        assert!(!remote.is_path_local("/data/a.root").await);

        let manager = Arc::new(MemoryEndpoint::new("localhost:1094").with_role(HostRole::Manager));
        let fs = system(&manager, "localhost:1094");
        assert!(!fs.is_path_local("/data/a.root").await);
    }
}
